use serde::{Deserialize, Serialize};

use super::lambdas::Lambdas;
use crate::error::{ModelError, Result};

/// Discount applied by [`Smoothing::KneserNey`] unless told otherwise.
pub const DEFAULT_DISCOUNT: f64 = 0.75;

/// How the trigram model combines its three count tables.
///
/// - `Interpolated`: `λ3·MLE3 + λ2·MLE2 + λ1·MLE1`
/// - `KneserNey`: interpolated Kneser–Ney with one absolute discount for
///   every order. Observed counts lose `discount`, the freed mass goes to
///   the next lower order, and the unigram level uses continuation counts
///   (how many distinct ids precede a token) instead of raw frequency.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum Smoothing {
	Interpolated(Lambdas),
	KneserNey { discount: f64 },
}

impl Default for Smoothing {
	fn default() -> Self {
		Smoothing::Interpolated(Lambdas::default())
	}
}

impl From<Lambdas> for Smoothing {
	fn from(lambdas: Lambdas) -> Self {
		Smoothing::Interpolated(lambdas)
	}
}

impl Smoothing {
	/// # Errors
	/// `InvalidConfiguration` unless `0 < discount <= 1`.
	pub fn kneser_ney(discount: f64) -> Result<Self> {
		let smoothing = Smoothing::KneserNey { discount };
		smoothing.validate()?;
		Ok(smoothing)
	}

	pub fn name(&self) -> &'static str {
		match self {
			Smoothing::Interpolated(_) => "interpolated",
			Smoothing::KneserNey { .. } => "kneser_ney",
		}
	}

	pub(crate) fn validate(&self) -> Result<()> {
		match self {
			Smoothing::Interpolated(lambdas) => lambdas.validate(),
			// A discount above 1 would remove more than an observed count holds.
			Smoothing::KneserNey { discount } if *discount > 0.0 && *discount <= 1.0 => Ok(()),
			Smoothing::KneserNey { discount } => Err(ModelError::InvalidConfiguration(format!(
				"Kneser–Ney discount must be in (0, 1], got {discount}"
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_is_interpolated() {
		assert_eq!(Smoothing::default(), Smoothing::Interpolated(Lambdas::default()));
		assert!(Smoothing::default().validate().is_ok());
	}

	#[test]
	fn kneser_ney_rejects_out_of_range_discount() {
		for discount in [0.0, -0.5, 1.5, f64::NAN] {
			let result = Smoothing::kneser_ney(discount);
			assert!(matches!(result, Err(ModelError::InvalidConfiguration(_))), "{discount}");
		}
		assert!(Smoothing::kneser_ney(DEFAULT_DISCOUNT).is_ok());
		assert!(Smoothing::kneser_ney(1.0).is_ok());
	}
}
