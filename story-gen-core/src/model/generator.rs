use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::counts::START;
use super::trigram_model::TrigramArtifact;
use crate::error::{ModelError, Result};
use crate::tokenizer::{EOT, TokenId};

/// Generation parameters.
///
/// # Fields
/// - `max_length`: upper bound on emitted tokens (the prefix is not counted).
///   `0` produces an empty continuation.
/// - `temperature`: reshapes the distribution before sampling, `< 1`
///   sharpens and `> 1` flattens. Must be finite and `> 0`.
/// - `greedy`: always take the most probable id (lowest id on ties);
///   `temperature` is then ignored.
/// - `seed`: fixes the random source; `None` draws one from the OS.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationConfig {
	pub max_length: usize,
	pub temperature: f64,
	pub greedy: bool,
	pub seed: Option<u64>,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self { max_length: 500, temperature: 1.0, greedy: false, seed: None }
	}
}

impl GenerationConfig {
	/// # Errors
	/// `InvalidConfiguration` if sampling is requested with a temperature
	/// that is not a positive finite number.
	pub fn validate(&self) -> Result<()> {
		if !self.greedy && !(self.temperature.is_finite() && self.temperature > 0.0) {
			return Err(ModelError::InvalidConfiguration(format!(
				"temperature must be > 0, got {}",
				self.temperature
			)));
		}
		Ok(())
	}

	/// Random source for this configuration: seeded when `seed` is set.
	pub fn rng(&self) -> StdRng {
		match self.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_os_rng(),
		}
	}
}

/// A lazily produced continuation, one sampled id per `next()`.
///
/// Owns its context window, emitted count and random source; the model is
/// only borrowed for reading. Ends after `<EOT>` is emitted or after
/// `max_length` ids, whichever comes first.
pub struct Generation<'a, R> {
	model: &'a TrigramArtifact,
	/// The last two ids, `START`-padded.
	context: (TokenId, TokenId),
	remaining: usize,
	temperature: f64,
	greedy: bool,
	rng: R,
	finished: bool,
}

impl<'a, R: Rng> Generation<'a, R> {
	pub(crate) fn new(model: &'a TrigramArtifact, prefix: &[TokenId], config: &GenerationConfig, rng: R) -> Self {
		Self {
			model,
			context: seed_context(prefix),
			remaining: config.max_length,
			temperature: config.temperature,
			greedy: config.greedy,
			rng,
			finished: false,
		}
	}

	/// Current two-token context.
	pub fn context(&self) -> (TokenId, TokenId) {
		self.context
	}
}

impl<R: Rng> Iterator for Generation<'_, R> {
	type Item = TokenId;

	fn next(&mut self) -> Option<TokenId> {
		if self.finished || self.remaining == 0 {
			return None;
		}

		let (w1, w2) = self.context;
		let mut candidates = self.model.candidates(w1, w2);
		let next = if candidates.is_empty() {
			self.rng.random_range(0..self.model.vocab_size().max(1)) as TokenId
		} else if self.greedy {
			argmax(&candidates)
		} else {
			apply_temperature(&mut candidates, self.temperature);
			sample(&candidates, &mut self.rng)
		};

		self.remaining -= 1;
		self.context = (w2, next);
		if next == EOT {
			self.finished = true;
		}
		Some(next)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		if self.finished { (0, Some(0)) } else { (0, Some(self.remaining)) }
	}
}

/// Two trailing ids of the prefix, left-padded with `START`.
fn seed_context(prefix: &[TokenId]) -> (TokenId, TokenId) {
	match prefix {
		[] => (START, START),
		[only] => (START, *only),
		[.., w1, w2] => (*w1, *w2),
	}
}

/// `p' ∝ exp(ln(p) / temperature)`, computed relative to the largest
/// probability so small temperatures do not underflow. Zero stays zero.
fn apply_temperature(candidates: &mut [(TokenId, f64)], temperature: f64) {
	let max = candidates.iter().map(|&(_, p)| p).fold(0.0, f64::max);
	if max <= 0.0 {
		return;
	}
	let log_max = max.ln();
	for (_, p) in candidates.iter_mut() {
		if *p > 0.0 {
			*p = ((p.ln() - log_max) / temperature).exp();
		}
	}
	let sum: f64 = candidates.iter().map(|&(_, p)| p).sum();
	for (_, p) in candidates.iter_mut() {
		*p /= sum;
	}
}

/// Weighted draw by cumulative subtraction over the candidate weights.
///
/// Zero-weight candidates are never returned unless every weight is zero.
fn sample<R: Rng>(candidates: &[(TokenId, f64)], rng: &mut R) -> TokenId {
	let total: f64 = candidates.iter().map(|&(_, p)| p).sum();
	if total <= 0.0 {
		let pick = rng.random_range(0..candidates.len().max(1));
		return candidates.get(pick).map_or(0, |&(id, _)| id);
	}

	let mut r = rng.random::<f64>() * total;
	let mut fallback = candidates[0].0;
	for &(id, weight) in candidates {
		if weight <= 0.0 {
			continue;
		}
		if r < weight {
			return id;
		}
		r -= weight;
		fallback = id;
	}

	// Rounding left `r` past the last bucket.
	fallback
}

/// Most probable candidate, lowest id on ties (candidates come in id order).
fn argmax(candidates: &[(TokenId, f64)]) -> TokenId {
	let mut best: Option<(TokenId, f64)> = None;
	for &(id, p) in candidates {
		if best.is_none_or(|(_, top)| p > top) {
			best = Some((id, p));
		}
	}
	best.map_or(0, |(id, _)| id)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seed_context_pads_short_prefixes() {
		assert_eq!(seed_context(&[]), (START, START));
		assert_eq!(seed_context(&[7]), (START, 7));
		assert_eq!(seed_context(&[5, 6, 7]), (6, 7));
	}

	#[test]
	fn rejects_non_positive_temperature() {
		for temperature in [0.0, -1.0, f64::NAN, f64::INFINITY] {
			let config = GenerationConfig { temperature, ..GenerationConfig::default() };
			assert!(matches!(config.validate(), Err(ModelError::InvalidConfiguration(_))));
		}
	}

	#[test]
	fn greedy_ignores_temperature() {
		let config = GenerationConfig { temperature: 0.0, greedy: true, ..GenerationConfig::default() };
		assert!(config.validate().is_ok());
	}

	#[test]
	fn low_temperature_sharpens() {
		let mut candidates = vec![(4, 0.2), (5, 0.5), (6, 0.3)];
		apply_temperature(&mut candidates, 0.1);
		assert!(candidates[1].1 > 0.95);
		assert_eq!(candidates.iter().map(|&(id, _)| id).collect::<Vec<_>>(), vec![4, 5, 6]);
		assert!((candidates.iter().map(|&(_, p)| p).sum::<f64>() - 1.0).abs() < 1e-9);
	}

	#[test]
	fn high_temperature_flattens() {
		let mut candidates = vec![(0, 0.1), (1, 0.9)];
		apply_temperature(&mut candidates, 10.0);
		assert!(candidates[0].1 > 0.4 && candidates[0].1 < 0.5);
	}

	#[test]
	fn sample_only_returns_candidates() {
		let mut rng = StdRng::seed_from_u64(7);
		let candidates = [(9, 0.7), (12, 0.0), (30, 0.3)];
		for _ in 0..1_000 {
			let id = sample(&candidates, &mut rng);
			assert!(id == 9 || id == 30);
		}
	}

	#[test]
	fn sample_is_deterministic_for_a_seed() {
		let candidates = [(0, 0.25), (1, 0.25), (2, 0.25), (3, 0.25)];
		let draw = |seed| {
			let mut rng = StdRng::seed_from_u64(seed);
			(0..32).map(|_| sample(&candidates, &mut rng)).collect::<Vec<_>>()
		};
		assert_eq!(draw(42), draw(42));
	}

	#[test]
	fn argmax_prefers_lowest_id_on_ties() {
		assert_eq!(argmax(&[(2, 0.1), (5, 0.4), (8, 0.4), (9, 0.1)]), 5);
	}
}
