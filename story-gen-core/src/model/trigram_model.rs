use std::path::Path;
use std::sync::mpsc;
use std::thread;

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::counts::{Contexts, NGramCounts, START};
use super::generator::{Generation, GenerationConfig};
use super::smoothing::Smoothing;
use crate::error::{ModelError, Result};
use crate::io;
use crate::tokenizer::{EOT, TokenId, TokenizerArtifact};

/// Trained trigram language model.
///
/// With [`Smoothing::Interpolated`] (the default),
/// `P(w3 | w1, w2) = λ3·MLE3(w3 | w1, w2) + λ2·MLE2(w3 | w2) + λ1·MLE1(w3)`,
/// where an estimate whose context was never observed is 0. With
/// [`Smoothing::KneserNey`] the same counts feed interpolated Kneser–Ney.
///
/// The artifact is immutable once built; generation only reads it, so a
/// single instance can serve concurrent requests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrigramArtifact {
	/// Size of the tokenizer vocabulary the model predicts over.
	vocab_size: usize,
	smoothing: Smoothing,
	counts: NGramCounts,
	#[serde(skip)]
	contexts: Contexts,
}

impl TrigramArtifact {
	/// Encodes `corpus` with `tokenizer` and counts n-grams in one pass.
	///
	/// Documents are split into chunks (based on CPU cores * factor), each
	/// chunk is encoded and counted on its own thread into a private table,
	/// and the partial tables are merged. Merging is commutative, so the
	/// result does not depend on thread scheduling.
	///
	/// `smoothing` accepts plain [`Lambdas`](super::Lambdas) for linear interpolation.
	///
	/// # Errors
	/// - `InvalidConfiguration` if the smoothing parameters are out of range
	/// - `EmptyCorpus` if there is no document or no token after encoding
	pub fn train<S, M>(tokenizer: &TokenizerArtifact, corpus: &[S], smoothing: M) -> Result<Self>
	where
		S: AsRef<str> + Sync,
		M: Into<Smoothing>,
	{
		let smoothing = smoothing.into();
		smoothing.validate()?;
		if corpus.is_empty() {
			return Err(ModelError::EmptyCorpus("no documents".to_owned()));
		}
		info!("training {} trigram model on {} documents", smoothing.name(), corpus.len());

		let cpus = num_cpus::get();
		let factor = 8;
		let chunks = cpus * factor;
		let chunk_size = corpus.len().div_ceil(chunks);

		let counts = thread::scope(|scope| {
			let (tx, rx) = mpsc::channel();
			for chunk in corpus.chunks(chunk_size) {
				let tx = tx.clone();
				scope.spawn(move || {
					let mut partial = NGramCounts::default();
					for document in chunk {
						partial.add_sequence(&tokenizer.encode(document.as_ref()));
					}
					// The receiver lives until every sender is gone.
					let _ = tx.send(partial);
				});
			}
			drop(tx);

			let mut counts = NGramCounts::default();
			for partial in rx.iter() {
				counts.merge(&partial);
			}
			counts
		});

		if counts.total() == 0 {
			return Err(ModelError::EmptyCorpus("no tokens after encoding".to_owned()));
		}
		info!(
			"trigram model: {} tokens, {} unigrams, {} bigrams, {} trigrams",
			counts.total(),
			counts.len_unigrams(),
			counts.len_bigrams(),
			counts.len_trigrams()
		);

		Ok(Self::from_counts(tokenizer.vocab_size(), smoothing, counts))
	}

	fn from_counts(vocab_size: usize, smoothing: Smoothing, counts: NGramCounts) -> Self {
		let contexts = Contexts::build(&counts);
		Self { vocab_size, smoothing, counts, contexts }
	}

	pub fn vocab_size(&self) -> usize {
		self.vocab_size
	}

	pub fn smoothing(&self) -> Smoothing {
		self.smoothing
	}

	pub fn counts(&self) -> &NGramCounts {
		&self.counts
	}

	/// `MLE1(w) = c(w) / N`.
	pub fn mle_unigram(&self, w: TokenId) -> f64 {
		ratio(self.counts.unigram(w), self.counts.total())
	}

	/// `MLE2(w | w2) = c(w2, w) / Σx c(w2, x)`, 0 for an unseen context.
	pub fn mle_bigram(&self, w2: TokenId, w: TokenId) -> f64 {
		ratio(self.counts.bigram(w2, w), self.contexts.after_one(w2))
	}

	/// `MLE3(w | w1, w2) = c(w1, w2, w) / Σx c(w1, w2, x)`, 0 for an unseen context.
	pub fn mle_trigram(&self, w1: TokenId, w2: TokenId, w: TokenId) -> f64 {
		ratio(self.counts.trigram(w1, w2, w), self.contexts.after_two(w1, w2))
	}

	/// Smoothed `P(w3 | w1, w2)`. Use [`START`] for missing context.
	pub fn probability(&self, w1: TokenId, w2: TokenId, w3: TokenId) -> f64 {
		match self.smoothing {
			Smoothing::Interpolated(lambdas) => {
				lambdas.trigram() * self.mle_trigram(w1, w2, w3)
					+ lambdas.bigram() * self.mle_bigram(w2, w3)
					+ lambdas.unigram() * self.mle_unigram(w3)
			}
			Smoothing::KneserNey { discount } => self.kn_trigram(discount, w1, w2, w3),
		}
	}

	/// Smoothed distribution over the whole vocabulary for `(w1, w2)`.
	///
	/// Entry `i` is `P(i | w1, w2)`. When part of the mass is missing
	/// because a context was never observed, the vector is renormalised;
	/// when no mass at all is available it is uniform.
	pub fn distribution(&self, w1: TokenId, w2: TokenId) -> Vec<f64> {
		let mut dist = match self.smoothing {
			Smoothing::Interpolated(_) => self.interpolated_masses(w1, w2),
			Smoothing::KneserNey { discount } => (0..self.vocab_size as TokenId)
				.map(|w| self.kn_trigram(discount, w1, w2, w))
				.collect(),
		};

		let sum: f64 = dist.iter().sum();
		if sum > 0.0 {
			for p in &mut dist {
				*p /= sum;
			}
		} else if !dist.is_empty() {
			let uniform = 1.0 / dist.len() as f64;
			dist.fill(uniform);
		}
		dist
	}

	/// Ids generation may pick after `(w1, w2)`, with their probabilities.
	///
	/// The observed successors of the pair; when there are none, the
	/// observed successors of `w2`; when there are none either, the whole
	/// vocabulary. Each id is weighted by [`Self::probability`], ids with no
	/// mass are dropped, and the result is in ascending id order. Empty only
	/// when nothing in the vocabulary has mass.
	pub fn candidates(&self, w1: TokenId, w2: TokenId) -> Vec<(TokenId, f64)> {
		let known = |w: TokenId| (w as usize) < self.vocab_size;

		let mut ids: Vec<TokenId> = self
			.counts
			.successors_of_pair(w1, w2)
			.map(|(w, _)| w)
			.filter(|&w| known(w))
			.collect();
		if ids.is_empty() {
			ids = self
				.counts
				.successors_of(w2)
				.map(|(w, _)| w)
				.filter(|&w| w != START && known(w))
				.collect();
		}
		if ids.is_empty() {
			ids = (0..self.vocab_size as TokenId).collect();
		}

		ids.into_iter()
			.map(|w| (w, self.probability(w1, w2, w)))
			.filter(|&(_, p)| p > 0.0)
			.collect()
	}

	fn interpolated_masses(&self, w1: TokenId, w2: TokenId) -> Vec<f64> {
		let mut dist = vec![0.0; self.vocab_size];
		let Smoothing::Interpolated(lambdas) = self.smoothing else {
			return dist;
		};

		let total = self.counts.total();
		if total > 0 {
			for (w, c) in self.counts.unigrams() {
				add(&mut dist, w, lambdas.unigram() * ratio(c, total));
			}
		}
		let after_one = self.contexts.after_one(w2);
		if after_one > 0 {
			for (w, c) in self.counts.successors_of(w2) {
				add(&mut dist, w, lambdas.bigram() * ratio(c, after_one));
			}
		}
		let after_two = self.contexts.after_two(w1, w2);
		if after_two > 0 {
			for (w, c) in self.counts.successors_of_pair(w1, w2) {
				add(&mut dist, w, lambdas.trigram() * ratio(c, after_two));
			}
		}
		dist
	}

	/// `N1+(· w) / N1+(· ·)`, uniform when no bigram was seen.
	fn kn_unigram(&self, w: TokenId) -> f64 {
		let total = self.contexts.distinct_bigrams();
		if total == 0 {
			return 1.0 / self.vocab_size.max(1) as f64;
		}
		ratio(self.contexts.distinct_before(w), total)
	}

	fn kn_bigram(&self, discount: f64, w2: TokenId, w: TokenId) -> f64 {
		let context = self.contexts.after_one(w2);
		if context == 0 {
			return self.kn_unigram(w);
		}
		let context = context as f64;
		let kept = (self.counts.bigram(w2, w) as f64 - discount).max(0.0) / context;
		let freed = discount * self.contexts.distinct_after_one(w2) as f64 / context;
		kept + freed * self.kn_unigram(w)
	}

	fn kn_trigram(&self, discount: f64, w1: TokenId, w2: TokenId, w: TokenId) -> f64 {
		let context = self.contexts.after_two(w1, w2);
		if context == 0 {
			return self.kn_bigram(discount, w2, w);
		}
		let context = context as f64;
		let kept = (self.counts.trigram(w1, w2, w) as f64 - discount).max(0.0) / context;
		let freed = discount * self.contexts.distinct_after_two(w1, w2) as f64 / context;
		kept + freed * self.kn_bigram(discount, w2, w)
	}

	/// Perplexity of held-out encoded documents, padded and closed the same
	/// way as during training. Infinite when some token has probability 0.
	pub fn perplexity(&self, sequences: &[Vec<TokenId>]) -> f64 {
		let mut log_sum = 0.0;
		let mut n = 0u64;
		for ids in sequences {
			let Some(&last) = ids.last() else {
				continue;
			};
			let closing = (last != EOT).then_some(EOT);
			let (mut w1, mut w2) = (START, START);
			for &id in ids.iter().chain(closing.iter()) {
				let p = self.probability(w1, w2, id);
				if p <= 0.0 {
					return f64::INFINITY;
				}
				log_sum += p.ln();
				n += 1;
				(w1, w2) = (w2, id);
			}
		}
		if n == 0 {
			return f64::INFINITY;
		}
		(-log_sum / n as f64).exp()
	}

	/// Starts a lazy generation continuing `prefix` (already encoded).
	///
	/// # Errors
	/// `InvalidConfiguration` if the temperature is not a positive finite
	/// number (greedy mode ignores it).
	pub fn generation<R: Rng>(
		&self,
		prefix: &[TokenId],
		config: &GenerationConfig,
		rng: R,
	) -> Result<Generation<'_, R>> {
		config.validate()?;
		Ok(Generation::new(self, prefix, config, rng))
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(postcard::to_stdvec(self)?)
	}

	/// Decodes a persisted model, validates it and rebuilds the context totals.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let artifact: Self = io::decode_postcard(bytes, "trigram artifact")?;
		artifact.smoothing.validate()?;
		artifact.validate_counts()?;
		debug!(
			"{} trigram artifact loaded: {} tokens",
			artifact.smoothing.name(),
			artifact.counts.total()
		);
		Ok(Self::from_counts(artifact.vocab_size, artifact.smoothing, artifact.counts))
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_postcard(self, path)
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = std::fs::read(path)?;
		Self::from_bytes(&bytes)
	}

	fn validate_counts(&self) -> Result<()> {
		let corrupt = |msg: String| Err(ModelError::CorruptArtifact(msg));
		let known = |w: TokenId| (w as usize) < self.vocab_size;
		let context = |w: TokenId| known(w) || w == START;

		if self.vocab_size == 0 {
			return corrupt("empty vocabulary".to_owned());
		}
		if self.counts.total() == 0 {
			return corrupt("no tokens counted".to_owned());
		}

		let mut sum = 0u64;
		for (w, c) in self.counts.unigrams() {
			if !known(w) {
				return corrupt(format!("unigram id {w} outside the vocabulary"));
			}
			sum += c;
		}
		if sum != self.counts.total() {
			return corrupt(format!("unigram counts sum to {sum}, expected {}", self.counts.total()));
		}

		for ((w1, w2), _) in self.counts.bigrams() {
			let padding = w1 == START && w2 == START;
			if !context(w1) || !(known(w2) || padding) {
				return corrupt(format!("bigram ({w1}, {w2}) outside the vocabulary"));
			}
		}
		for ((w1, w2, w3), c) in self.counts.trigrams() {
			if !context(w1) || !context(w2) || !known(w3) {
				return corrupt(format!("trigram ({w1}, {w2}, {w3}) outside the vocabulary"));
			}
			if self.counts.bigram(w1, w2) < c {
				return corrupt(format!("trigram ({w1}, {w2}, {w3}) exceeds its context count"));
			}
		}
		Ok(())
	}
}

fn ratio(count: u64, total: u64) -> f64 {
	if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

fn add(dist: &mut [f64], w: TokenId, mass: f64) {
	if let Some(p) = dist.get_mut(w as usize) {
		*p += mass;
	}
}
