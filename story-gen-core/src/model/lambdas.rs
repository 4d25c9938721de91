use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Tolerance on `λ1 + λ2 + λ3 == 1`.
const SUM_TOLERANCE: f64 = 1e-6;

/// Interpolation weights of the trigram model.
///
/// # Invariants
/// - every weight is finite and non-negative
/// - the weights sum to 1 (within `1e-6`)
///
/// Fixed at training time and applied uniformly to every prediction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Lambdas {
	/// λ1, weight of the unigram estimate.
	unigram: f64,
	/// λ2, weight of the bigram estimate.
	bigram: f64,
	/// λ3, weight of the trigram estimate.
	trigram: f64,
}

impl Default for Lambdas {
	fn default() -> Self {
		Self { unigram: 0.1, bigram: 0.3, trigram: 0.6 }
	}
}

impl Lambdas {
	/// Builds validated weights `(λ1, λ2, λ3)`.
	///
	/// # Errors
	/// `InvalidConfiguration` if a weight is negative or not finite, or if
	/// they do not sum to 1.
	pub fn new(unigram: f64, bigram: f64, trigram: f64) -> Result<Self> {
		let lambdas = Self { unigram, bigram, trigram };
		lambdas.validate()?;
		Ok(lambdas)
	}

	/// Normalises arbitrary non-negative weights so they sum to 1.
	///
	/// # Errors
	/// `InvalidConfiguration` if a weight is negative or not finite, or if
	/// all of them are zero.
	pub fn from_weights(unigram: f64, bigram: f64, trigram: f64) -> Result<Self> {
		Self::check_each(unigram, bigram, trigram)?;
		let sum = unigram + bigram + trigram;
		if sum <= 0.0 {
			return Err(ModelError::InvalidConfiguration("interpolation weights are all zero".to_owned()));
		}
		Self::new(unigram / sum, bigram / sum, trigram / sum)
	}

	pub(crate) fn validate(&self) -> Result<()> {
		Self::check_each(self.unigram, self.bigram, self.trigram)?;
		let sum = self.unigram + self.bigram + self.trigram;
		if (sum - 1.0).abs() > SUM_TOLERANCE {
			return Err(ModelError::InvalidConfiguration(format!(
				"interpolation weights must sum to 1, got {sum}"
			)));
		}
		Ok(())
	}

	fn check_each(unigram: f64, bigram: f64, trigram: f64) -> Result<()> {
		for (name, value) in [("λ1", unigram), ("λ2", bigram), ("λ3", trigram)] {
			if !value.is_finite() || value < 0.0 {
				return Err(ModelError::InvalidConfiguration(format!(
					"{name} must be a finite non-negative number, got {value}"
				)));
			}
		}
		Ok(())
	}

	pub fn unigram(&self) -> f64 {
		self.unigram
	}

	pub fn bigram(&self) -> f64 {
		self.bigram
	}

	pub fn trigram(&self) -> f64 {
		self.trigram
	}
}

impl TryFrom<(f64, f64, f64)> for Lambdas {
	type Error = ModelError;

	fn try_from((unigram, bigram, trigram): (f64, f64, f64)) -> Result<Self> {
		Self::new(unigram, bigram, trigram)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_is_valid() {
		assert!(Lambdas::default().validate().is_ok());
	}

	#[test]
	fn rejects_sum_above_one() {
		let result = Lambdas::new(0.2, 0.4, 0.6);
		assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))));
	}

	#[test]
	fn rejects_negative_weight() {
		let result = Lambdas::new(-0.1, 0.5, 0.6);
		assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))));
	}

	#[test]
	fn rejects_nan() {
		let result = Lambdas::new(f64::NAN, 0.5, 0.5);
		assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))));
	}

	#[test]
	fn from_weights_normalises() {
		let lambdas = Lambdas::from_weights(1.0, 3.0, 6.0).unwrap();
		assert!((lambdas.unigram() - 0.1).abs() < 1e-12);
		assert!((lambdas.bigram() - 0.3).abs() < 1e-12);
		assert!((lambdas.trigram() - 0.6).abs() < 1e-12);
	}

	#[test]
	fn from_weights_rejects_all_zero() {
		assert!(Lambdas::from_weights(0.0, 0.0, 0.0).is_err());
	}
}
