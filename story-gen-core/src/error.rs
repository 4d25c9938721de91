//! Error type shared by tokenizer training, trigram training and artifact loading.
//!
//! Encoding, decoding and generation never fail on a validated artifact, so
//! they do not appear here.

use thiserror::Error;

/// Errors surfaced to callers of the core.
///
/// Training and loading fail fast with one of these; nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum ModelError {
	/// A training or generation parameter is out of range
	/// (vocabulary too small, λ weights not summing to 1, temperature ≤ 0).
	#[error("invalid configuration: {0}")]
	InvalidConfiguration(String),

	/// No documents, or no tokens left after normalisation.
	#[error("empty corpus: {0}")]
	EmptyCorpus(String),

	/// A persisted artifact failed structural validation on load.
	#[error("corrupt artifact: {0}")]
	CorruptArtifact(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("serialization failed: {0}")]
	Serialization(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
