//! Trigram language model and generation.
//!
//! This module provides:
//! - N-gram counting over encoded documents (`NGramCounts`)
//! - Interpolation weights (`Lambdas`) and the smoothing choice (`Smoothing`)
//! - The trained, persistable model (`TrigramArtifact`)
//! - Lazy sampling of continuations (`Generation`, `GenerationConfig`)

/// Unigram, bigram and trigram counts with `START` padding.
///
/// Also derives the per-context totals used as MLE denominators.
pub mod counts;

/// Sampling loop over a trained model.
///
/// Temperature scaling, greedy decoding, seeded randomness and the
/// `<EOT>` / `max_length` stop conditions.
pub mod generator;

/// Validated interpolation weights `(λ1, λ2, λ3)`.
pub mod lambdas;

/// Interpolated or Kneser–Ney combination of the count tables.
pub mod smoothing;

/// Training, smoothed probabilities, sampling candidates and persistence.
pub mod trigram_model;

pub use counts::{NGramCounts, START};
pub use generator::{Generation, GenerationConfig};
pub use lambdas::Lambdas;
pub use smoothing::{DEFAULT_DISCOUNT, Smoothing};
pub use trigram_model::TrigramArtifact;
