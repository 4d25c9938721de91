use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{LevelFilter, info};

use story_gen_core::io::{build_output_path, read_corpus};
use story_gen_core::model::{DEFAULT_DISCOUNT, GenerationConfig};
use story_gen_core::tokenizer::{SubwordConfig, WholeWordConfig};
use story_gen_core::{
	Lambdas, Smoothing, TokenId, TokenizerArtifact, TokenizerConfig, TokenizerMode, TrigramArtifact, check_compatible,
};

#[derive(Parser, Debug)]
#[command(name = "story-gen", version, about = "Train tokenizers and trigram models, generate stories")]
struct Cli {
	/// Increase verbosity (-v, -vv)
	#[arg(short = 'v', long, global = true, action = ArgAction::Count)]
	verbose: u8,

	/// Decrease verbosity (-q, -qq)
	#[arg(short = 'q', long, global = true, action = ArgAction::Count)]
	quiet: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Learn a vocabulary from a corpus (one document per line)
	TrainTokenizer(TrainTokenizerArgs),
	/// Count a trigram model over a corpus with a trained tokenizer
	TrainModel(TrainModelArgs),
	/// Print the ids of a text
	Encode(EncodeArgs),
	/// Print the text of a sequence of ids
	Decode(DecodeArgs),
	/// Continue a prefix, printing tokens as they are sampled
	Generate(GenerateArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
	Word,
	Subword,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SmoothingKind {
	Interpolated,
	KneserNey,
}

#[derive(Args, Debug)]
struct TrainTokenizerArgs {
	corpus: PathBuf,

	/// Output path (defaults to `<corpus>.tokenizer`)
	#[arg(short, long, value_name = "PATH")]
	output: Option<PathBuf>,

	/// Target vocabulary size, reserved symbols included
	#[arg(long, value_name = "SIZE", default_value_t = 250)]
	vocab_size: usize,

	#[arg(long, value_enum, default_value_t = Mode::Subword)]
	mode: Mode,

	/// Whole-word mode only: drop words seen fewer times
	#[arg(long, value_name = "COUNT", default_value_t = 1)]
	min_frequency: usize,
}

#[derive(Args, Debug)]
struct TrainModelArgs {
	corpus: PathBuf,

	#[arg(long, value_name = "PATH")]
	tokenizer: PathBuf,

	/// Output path (defaults to `<corpus>.trigram`)
	#[arg(short, long, value_name = "PATH")]
	output: Option<PathBuf>,

	#[arg(long, value_enum, default_value_t = SmoothingKind::Interpolated)]
	smoothing: SmoothingKind,

	/// Interpolation weights λ1,λ2,λ3 (unigram, bigram, trigram)
	#[arg(long, value_name = "L1,L2,L3", value_delimiter = ',', num_args = 3, default_values_t = [0.1, 0.3, 0.6])]
	lambdas: Vec<f64>,

	/// Kneser–Ney absolute discount, in (0, 1]
	#[arg(long, default_value_t = DEFAULT_DISCOUNT)]
	discount: f64,
}

#[derive(Args, Debug)]
struct EncodeArgs {
	#[arg(long, value_name = "PATH")]
	tokenizer: PathBuf,

	text: String,
}

#[derive(Args, Debug)]
struct DecodeArgs {
	#[arg(long, value_name = "PATH")]
	tokenizer: PathBuf,

	/// Reader-facing rendering instead of the literal one
	#[arg(long)]
	display: bool,

	#[arg(required = true)]
	ids: Vec<TokenId>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
	#[arg(long, value_name = "PATH")]
	tokenizer: PathBuf,

	#[arg(long, value_name = "PATH")]
	model: PathBuf,

	#[arg(long, default_value = "")]
	prefix: String,

	#[arg(long, value_name = "COUNT", default_value_t = 500)]
	max_length: usize,

	#[arg(long, default_value_t = 1.0)]
	temperature: f64,

	#[arg(long)]
	seed: Option<u64>,

	/// Always pick the most probable token
	#[arg(long)]
	greedy: bool,
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose, cli.quiet);

	match cli.command {
		Commands::TrainTokenizer(args) => run_train_tokenizer(args),
		Commands::TrainModel(args) => run_train_model(args),
		Commands::Encode(args) => run_encode(args),
		Commands::Decode(args) => run_decode(args),
		Commands::Generate(args) => run_generate(args),
	}
}

/// `RUST_LOG` wins over `-v`/`-q` when it is set.
fn init_logging(verbose: u8, quiet: u8) {
	let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
	builder.format_timestamp_millis();
	if let Some(level) = flag_level(verbose, quiet, std::env::var_os("RUST_LOG").is_some()) {
		builder.filter_level(level);
	}
	let _ = builder.try_init();
}

fn flag_level(verbose: u8, quiet: u8, env_filter: bool) -> Option<LevelFilter> {
	if env_filter {
		return None;
	}
	Some(match (quiet, verbose) {
		(0, 0) => LevelFilter::Info,
		(0, 1) => LevelFilter::Debug,
		(0, _) => LevelFilter::Trace,
		(1, _) => LevelFilter::Warn,
		_ => LevelFilter::Error,
	})
}

fn load_corpus(path: &Path) -> Result<Vec<String>> {
	let corpus = read_corpus(path).with_context(|| format!("unable to read corpus {}", path.display()))?;
	info!("{} documents read from {}", corpus.len(), path.display());
	Ok(corpus)
}

fn load_tokenizer(path: &Path) -> Result<TokenizerArtifact> {
	TokenizerArtifact::load(path).with_context(|| format!("unable to load tokenizer {}", path.display()))
}

fn output_path(explicit: Option<PathBuf>, corpus: &Path, extension: &str) -> Result<PathBuf> {
	match explicit {
		Some(path) => Ok(path),
		None => build_output_path(corpus, extension).context("unable to derive an output path"),
	}
}

fn run_train_tokenizer(args: TrainTokenizerArgs) -> Result<()> {
	let corpus = load_corpus(&args.corpus)?;
	let mode = match args.mode {
		Mode::Word => TokenizerMode::WholeWord(WholeWordConfig { min_frequency: args.min_frequency }),
		Mode::Subword => TokenizerMode::Subword(SubwordConfig::default()),
	};
	let config = TokenizerConfig { vocab_size: args.vocab_size, mode };

	let tokenizer = TokenizerArtifact::train(&corpus, &config).context("tokenizer training failed")?;
	let output = output_path(args.output, &args.corpus, "tokenizer")?;
	tokenizer
		.save(&output)
		.with_context(|| format!("unable to write {}", output.display()))?;

	info!(
		"{} symbols, {} merges ({:?}) written to {}",
		tokenizer.vocab_size(),
		tokenizer.merges().len(),
		tokenizer.stop_reason(),
		output.display()
	);
	Ok(())
}

fn smoothing(args: &TrainModelArgs) -> Result<Smoothing> {
	match args.smoothing {
		SmoothingKind::Interpolated => {
			let [unigram, bigram, trigram] = args.lambdas[..] else {
				bail!("expected three interpolation weights, got {}", args.lambdas.len());
			};
			Ok(Lambdas::new(unigram, bigram, trigram)?.into())
		}
		SmoothingKind::KneserNey => Ok(Smoothing::kneser_ney(args.discount)?),
	}
}

fn run_train_model(args: TrainModelArgs) -> Result<()> {
	let smoothing = smoothing(&args)?;

	let tokenizer = load_tokenizer(&args.tokenizer)?;
	let corpus = load_corpus(&args.corpus)?;
	let model = TrigramArtifact::train(&tokenizer, &corpus, smoothing).context("trigram training failed")?;

	let output = output_path(args.output, &args.corpus, "trigram")?;
	model
		.save(&output)
		.with_context(|| format!("unable to write {}", output.display()))?;
	info!(
		"{} trigram model over {} tokens written to {}",
		smoothing.name(),
		model.counts().total(),
		output.display()
	);
	Ok(())
}

fn run_encode(args: EncodeArgs) -> Result<()> {
	let tokenizer = load_tokenizer(&args.tokenizer)?;
	let ids: Vec<String> = tokenizer.encode(&args.text).iter().map(TokenId::to_string).collect();
	println!("{}", ids.join(" "));
	Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
	let tokenizer = load_tokenizer(&args.tokenizer)?;
	let text = if args.display {
		tokenizer.decode_display(&args.ids)
	} else {
		tokenizer.decode(&args.ids)
	};
	println!("{text}");
	Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
	let tokenizer = load_tokenizer(&args.tokenizer)?;
	let model = TrigramArtifact::load(&args.model)
		.with_context(|| format!("unable to load model {}", args.model.display()))?;
	check_compatible(&tokenizer, &model)?;

	let config = GenerationConfig {
		max_length: args.max_length,
		temperature: args.temperature,
		greedy: args.greedy,
		seed: args.seed,
	};
	let prefix = tokenizer.encode(&args.prefix);
	let generation = model.generation(&prefix, &config, config.rng())?;

	let mut stdout = io::stdout().lock();
	write_story(&mut stdout, &tokenizer, prefix, generation)?;
	Ok(())
}

/// Writes the rendered prefix, then each sampled token as soon as it
/// arrives, then a newline. Unlike the library's `generate`, the output
/// starts with the prefix.
fn write_story<W: Write>(
	out: &mut W,
	tokenizer: &TokenizerArtifact,
	prefix: Vec<TokenId>,
	generation: impl Iterator<Item = TokenId>,
) -> io::Result<()> {
	let text = tokenizer.decode_display(&prefix);
	out.write_all(text.as_bytes())?;
	out.flush()?;
	let mut printed = text.len();

	let mut ids = prefix;
	for id in generation {
		ids.push(id);
		// The rendering only ever grows, so print what is new.
		let text = tokenizer.decode_display(&ids);
		if let Some(new) = text.get(printed..) {
			out.write_all(new.as_bytes())?;
			out.flush()?;
		}
		printed = text.len();
	}
	writeln!(out)
}
