//! Tokenizer trainer and codec.
//!
//! A tokenizer is learned once from a corpus and then frozen into a
//! [`TokenizerArtifact`]. Two strategies are supported, selected by
//! [`TokenizerMode`]:
//! - whole-word: the most frequent whitespace-delimited words
//! - subword: greedy character-pair merges, replayed in learned order
//!
//! Encoding and decoding never fail. Unknown input degrades to `<UNK>`.

mod special;
mod subword;
mod vocab;
mod word;

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::io;

pub use special::{EOP, EOS, EOT, RESERVED_COUNT, Reserved, UNK, normalize};
pub use subword::Merge;
pub use vocab::Vocabulary;

/// Integer id of a vocabulary symbol.
pub type TokenId = u32;

/// Whole-word mode settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WholeWordConfig {
	/// Words seen fewer times than this are left out of the vocabulary.
	pub min_frequency: usize,
}

impl Default for WholeWordConfig {
	fn default() -> Self {
		Self { min_frequency: 1 }
	}
}

/// Subword mode settings. The target size lives in [`TokenizerConfig`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubwordConfig {}

/// Tokenization strategy, fixed at training time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum TokenizerMode {
	WholeWord(WholeWordConfig),
	Subword(SubwordConfig),
}

impl TokenizerMode {
	pub fn name(&self) -> &'static str {
		match self {
			TokenizerMode::WholeWord(_) => "whole_word",
			TokenizerMode::Subword(_) => "subword",
		}
	}
}

/// Training parameters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenizerConfig {
	/// Target vocabulary cardinality, reserved symbols included.
	pub vocab_size: usize,
	pub mode: TokenizerMode,
}

impl TokenizerConfig {
	pub fn whole_word(vocab_size: usize) -> Self {
		Self { vocab_size, mode: TokenizerMode::WholeWord(WholeWordConfig::default()) }
	}

	pub fn subword(vocab_size: usize) -> Self {
		Self { vocab_size, mode: TokenizerMode::Subword(SubwordConfig::default()) }
	}
}

/// Why training ended.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
	/// The vocabulary reached the requested size.
	TargetReached,
	/// Whole-word mode ran out of distinct (frequent enough) words.
	CorpusExhausted,
	/// Subword mode found no pair occurring more than once.
	NoRepeatedPair,
}

/// Trained, immutable tokenizer state: vocabulary, merge order, mode.
///
/// Ids `0..RESERVED_COUNT` always hold the [`Reserved`] symbols.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TokenizerArtifact {
	mode: TokenizerMode,
	vocab: Vocabulary,
	merges: Vec<Merge>,
	stop_reason: StopReason,
}

impl TokenizerArtifact {
	/// Learns a vocabulary (and merge rules in subword mode) from `corpus`.
	///
	/// # Errors
	/// - `InvalidConfiguration` if `vocab_size` does not leave room past the reserved ids
	/// - `EmptyCorpus` if there is no document, or no word survives
	///   normalisation (and `min_frequency` in whole-word mode)
	pub fn train<S: AsRef<str>>(corpus: &[S], config: &TokenizerConfig) -> Result<Self> {
		if config.vocab_size <= RESERVED_COUNT {
			return Err(ModelError::InvalidConfiguration(format!(
				"vocab_size must exceed the {RESERVED_COUNT} reserved symbols, got {}",
				config.vocab_size
			)));
		}
		if corpus.is_empty() {
			return Err(ModelError::EmptyCorpus("no documents".to_owned()));
		}
		info!(
			"training {} tokenizer on {} documents, target vocabulary {}",
			config.mode.name(),
			corpus.len(),
			config.vocab_size
		);

		let no_words = || ModelError::EmptyCorpus("no words left after normalisation and filtering".to_owned());
		let artifact = match &config.mode {
			TokenizerMode::WholeWord(word_config) => {
				let (vocab, stop_reason) =
					word::train(corpus, config.vocab_size, word_config).ok_or_else(no_words)?;
				Self { mode: config.mode.clone(), vocab, merges: Vec::new(), stop_reason }
			}
			TokenizerMode::Subword(_) => {
				let (vocab, merges, stop_reason) =
					subword::train(corpus, config.vocab_size).ok_or_else(no_words)?;
				Self { mode: config.mode.clone(), vocab, merges, stop_reason }
			}
		};
		if artifact.vocab.len() <= RESERVED_COUNT {
			return Err(no_words());
		}

		if artifact.stop_reason != StopReason::TargetReached {
			info!(
				"tokenizer stopped early at {} of {} symbols: {:?}",
				artifact.vocab.len(),
				config.vocab_size,
				artifact.stop_reason
			);
		}
		Ok(artifact)
	}

	/// Maps text to ids. Unknown words (or characters) become `<UNK>`.
	pub fn encode(&self, text: &str) -> Vec<TokenId> {
		match self.mode {
			TokenizerMode::WholeWord(_) => word::encode(&self.vocab, text),
			TokenizerMode::Subword(_) => subword::encode(&self.vocab, &self.merges, text),
		}
	}

	/// Round-trippable rendering: terminals appear as literals and ids outside
	/// the vocabulary are skipped. `decode(encode(t)) == normalize(t)` for any
	/// `t` made of vocabulary symbols.
	pub fn decode(&self, ids: &[TokenId]) -> String {
		match self.mode {
			TokenizerMode::WholeWord(_) => word::decode(&self.vocab, ids),
			TokenizerMode::Subword(_) => subword::decode(&self.vocab, ids),
		}
	}

	/// Reader-facing rendering: `<EOS>` and `<UNK>` are dropped, `<EOP>`
	/// becomes a line break and output ends at the first `<EOT>`.
	pub fn decode_display(&self, ids: &[TokenId]) -> String {
		match self.mode {
			TokenizerMode::WholeWord(_) => word::decode_display(&self.vocab, ids),
			TokenizerMode::Subword(_) => subword::decode_display(&self.vocab, ids),
		}
	}

	pub fn mode(&self) -> &TokenizerMode {
		&self.mode
	}

	pub fn vocab(&self) -> &Vocabulary {
		&self.vocab
	}

	pub fn vocab_size(&self) -> usize {
		self.vocab.len()
	}

	/// Merge rules in learned order. Empty in whole-word mode.
	pub fn merges(&self) -> &[Merge] {
		&self.merges
	}

	pub fn stop_reason(&self) -> StopReason {
		self.stop_reason
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(postcard::to_stdvec(self)?)
	}

	/// Decodes and validates a persisted tokenizer.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let artifact: Self = io::decode_postcard(bytes, "tokenizer artifact")?;
		artifact.validate()?;
		Ok(artifact)
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		io::write_postcard(self, path)
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = std::fs::read(path)?;
		Self::from_bytes(&bytes)
	}

	/// Structural checks run on every load.
	fn validate(&self) -> Result<()> {
		let corrupt = |msg: String| Err(ModelError::CorruptArtifact(msg));

		for reserved in Reserved::ALL {
			if self.vocab.symbol(reserved.id()) != Some(reserved.symbol()) {
				return corrupt(format!("reserved symbol {} missing at id {}", reserved.symbol(), reserved.id()));
			}
		}
		if self.vocab.len() <= RESERVED_COUNT {
			return corrupt("vocabulary holds only reserved symbols".to_owned());
		}

		match self.mode {
			TokenizerMode::WholeWord(_) => {
				if !self.merges.is_empty() {
					return corrupt("whole-word tokenizer carries merge rules".to_owned());
				}
			}
			TokenizerMode::Subword(_) => {
				for (rank, merge) in self.merges.iter().enumerate() {
					let reserved = |id: TokenId| (id as usize) < RESERVED_COUNT;
					if reserved(merge.left) || reserved(merge.right) || reserved(merge.merged) {
						return corrupt(format!("merge {rank} touches a reserved symbol"));
					}
					let (Some(left), Some(right), Some(merged)) = (
						self.vocab.symbol(merge.left),
						self.vocab.symbol(merge.right),
						self.vocab.symbol(merge.merged),
					) else {
						return corrupt(format!("merge {rank} references an unknown symbol"));
					};
					if merged.len() != left.len() + right.len()
						|| !merged.starts_with(left)
						|| !merged.ends_with(right)
					{
						return corrupt(format!("merge {rank} does not spell {merged:?}"));
					}
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn corpus() -> Vec<&'static str> {
		vec!["ایک تھا بادشاہ <EOT>", "ایک تھا چوہا <EOT>"]
	}

	#[test]
	fn rejects_vocab_size_without_room() {
		let result = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(RESERVED_COUNT));
		assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))));
	}

	#[test]
	fn rejects_empty_corpus() {
		let empty: Vec<&str> = Vec::new();
		let result = TokenizerArtifact::train(&empty, &TokenizerConfig::subword(32));
		assert!(matches!(result, Err(ModelError::EmptyCorpus(_))));

		let result = TokenizerArtifact::train(&["<EOT>", " "], &TokenizerConfig::whole_word(32));
		assert!(matches!(result, Err(ModelError::EmptyCorpus(_))));
	}

	#[test]
	fn rejects_corpus_emptied_by_min_frequency() {
		let config = TokenizerConfig {
			vocab_size: 16,
			mode: TokenizerMode::WholeWord(WholeWordConfig { min_frequency: 2 }),
		};
		let result = TokenizerArtifact::train(&["a b c", "d e f"], &config);
		assert!(matches!(result, Err(ModelError::EmptyCorpus(_))));
	}

	#[test]
	fn whole_word_scenario() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(16)).unwrap();
		for word in ["ایک", "تھا", "بادشاہ", "چوہا", "<EOT>"] {
			assert!(artifact.vocab().id(word).is_some(), "missing {word}");
		}
		let ids = artifact.encode("ایک تھا");
		assert_eq!(ids.len(), 2);
		assert_eq!(artifact.decode(&ids), "ایک تھا");
		assert_eq!(artifact.stop_reason(), StopReason::CorpusExhausted);
	}

	#[test]
	fn unknown_word_maps_to_unk() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(16)).unwrap();
		let ids = artifact.encode("زیبرا");
		assert_eq!(ids, vec![UNK]);
		assert_eq!(artifact.decode(&ids), "<UNK>");
		assert_eq!(artifact.decode_display(&ids), "");
	}

	#[test]
	fn unknown_word_falls_back_to_fragments_in_subword_mode() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::subword(40)).unwrap();
		let ids = artifact.encode("زیبرا");
		assert!(!ids.is_empty());
		assert!(ids.iter().all(|&id| (id as usize) < artifact.vocab_size()));
		let _ = artifact.decode(&ids);
	}

	#[test]
	fn decode_skips_out_of_range_ids() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(16)).unwrap();
		let id = artifact.vocab().id("ایک").unwrap();
		assert_eq!(artifact.decode(&[id, 10_000]), "ایک");
	}

	#[test]
	fn bytes_round_trip_preserves_behaviour() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::subword(40)).unwrap();
		let loaded = TokenizerArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
		assert_eq!(loaded, artifact);
		let text = "ایک تھا چوہا";
		assert_eq!(loaded.encode(text), artifact.encode(text));
	}

	#[test]
	fn load_rejects_missing_reserved_symbols() {
		let mut artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(16)).unwrap();
		artifact.vocab = Vocabulary::new(["ایک".to_owned(), "تھا".to_owned()]);
		let result = TokenizerArtifact::from_bytes(&artifact.to_bytes().unwrap());
		assert!(matches!(result, Err(ModelError::CorruptArtifact(_))));
	}

	#[test]
	fn load_rejects_merges_with_unknown_symbols() {
		let mut artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::subword(40)).unwrap();
		artifact.merges.push(Merge { left: 5, right: 6, merged: 9_999 });
		let result = TokenizerArtifact::from_bytes(&artifact.to_bytes().unwrap());
		assert!(matches!(result, Err(ModelError::CorruptArtifact(_))));
	}

	#[test]
	fn load_rejects_truncated_bytes() {
		let artifact = TokenizerArtifact::train(&corpus(), &TokenizerConfig::whole_word(16)).unwrap();
		let bytes = artifact.to_bytes().unwrap();
		let result = TokenizerArtifact::from_bytes(&bytes[..bytes.len() / 2]);
		assert!(matches!(result, Err(ModelError::CorruptArtifact(_))));
	}
}
