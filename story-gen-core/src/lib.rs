//! Story generation core: tokenizer training, trigram modelling and sampling.
//!
//! This crate provides:
//! - A tokenizer trainer and codec with whole-word and subword (pair-merge) modes
//! - A trigram language model with linear interpolation of unigram, bigram
//!   and trigram estimates, or interpolated Kneser–Ney smoothing
//! - Temperature-controlled, seedable generation that stops on `<EOT>` or
//!   after `max_length` tokens
//! - Compact binary persistence of both artifacts
//!
//! The free functions below cover the usual pipeline. The artifact types
//! expose the finer-grained API (lazy [`model::Generation`], distributions,
//! perplexity).

/// Typed errors returned by training and loading.
pub mod error;

/// I/O utilities (corpus loading, path helpers, artifact files).
pub mod io;

/// Trigram model, interpolation weights and generation.
pub mod model;

/// Vocabulary learning, encoding and decoding.
pub mod tokenizer;

pub use error::{ModelError, Result};
pub use model::{Generation, GenerationConfig, Lambdas, Smoothing, TrigramArtifact};
pub use tokenizer::{TokenId, TokenizerArtifact, TokenizerConfig, TokenizerMode};

/// Learns a tokenizer of `vocab_size` symbols (reserved ones included).
///
/// # Errors
/// - `InvalidConfiguration` if `vocab_size` leaves no room beyond the reserved symbols
/// - `EmptyCorpus` if the corpus holds no word
pub fn train_tokenizer<S: AsRef<str>>(corpus: &[S], vocab_size: usize, mode: TokenizerMode) -> Result<TokenizerArtifact> {
	TokenizerArtifact::train(corpus, &TokenizerConfig { vocab_size, mode })
}

pub fn encode(tokenizer: &TokenizerArtifact, text: &str) -> Vec<TokenId> {
	tokenizer.encode(text)
}

pub fn decode(tokenizer: &TokenizerArtifact, ids: &[TokenId]) -> String {
	tokenizer.decode(ids)
}

/// Encodes `corpus` with `tokenizer` and counts a trigram model over it.
///
/// # Errors
/// - `InvalidConfiguration` if `lambdas` are not valid interpolation weights
/// - `EmptyCorpus` if nothing is left to count
pub fn train_trigram<S>(tokenizer: &TokenizerArtifact, corpus: &[S], lambdas: (f64, f64, f64)) -> Result<TrigramArtifact>
where
	S: AsRef<str> + Sync,
{
	TrigramArtifact::train(tokenizer, corpus, Lambdas::try_from(lambdas)?)
}

/// Continues `prefix` and returns the generated text (prefix excluded).
///
/// At most `max_length` tokens are sampled; sampling stops early after
/// `<EOT>`. A fixed `rng_seed` makes the output reproducible.
///
/// # Errors
/// `InvalidConfiguration` if `temperature` is not a positive finite number,
/// or if `model` was not trained over `tokenizer`'s vocabulary.
pub fn generate(
	tokenizer: &TokenizerArtifact,
	model: &TrigramArtifact,
	prefix: &str,
	max_length: usize,
	temperature: f64,
	rng_seed: Option<u64>,
) -> Result<String> {
	let config = GenerationConfig { max_length, temperature, greedy: false, seed: rng_seed };
	generate_with(tokenizer, model, prefix, &config)
}

/// [`generate`] with a full [`GenerationConfig`] (greedy mode included).
pub fn generate_with(
	tokenizer: &TokenizerArtifact,
	model: &TrigramArtifact,
	prefix: &str,
	config: &GenerationConfig,
) -> Result<String> {
	check_compatible(tokenizer, model)?;
	let prefix = tokenizer.encode(prefix);
	let ids: Vec<TokenId> = model.generation(&prefix, config, config.rng())?.collect();
	Ok(tokenizer.decode_display(&ids))
}

/// Fails when the two artifacts were not trained together.
pub fn check_compatible(tokenizer: &TokenizerArtifact, model: &TrigramArtifact) -> Result<()> {
	if tokenizer.vocab_size() != model.vocab_size() {
		return Err(ModelError::InvalidConfiguration(format!(
			"model predicts over {} ids but the tokenizer has {}",
			model.vocab_size(),
			tokenizer.vocab_size()
		)));
	}
	Ok(())
}
