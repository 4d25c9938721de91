use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tokenizer::{EOT, TokenId};

/// Context padding for the first tokens of a sequence. Lies outside every
/// vocabulary, so it only ever appears in context positions.
pub const START: TokenId = TokenId::MAX;

/// Unigram, bigram and trigram counts collected in one pass.
///
/// Ordered maps keep serialization byte-deterministic and let a context's
/// successors be read with a range scan.
///
/// # Invariants
/// - the unigram counts sum to `total`
/// - every trigram `(a, b, c)` has `bigram(a, b) >= trigram(a, b, c)`
/// - `START` never appears as a predicted (last) id, except in the
///   padding bigram `(START, START)`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct NGramCounts {
	unigrams: BTreeMap<TokenId, u64>,
	bigrams: BTreeMap<(TokenId, TokenId), u64>,
	trigrams: BTreeMap<(TokenId, TokenId, TokenId), u64>,
	total: u64,
}

impl NGramCounts {
	/// Counts one encoded document.
	///
	/// The sequence is padded on the left with two `START` ids and closed
	/// with `<EOT>` when it does not already end with it. Each real token
	/// adds one unigram, one bigram and one trigram. Empty sequences are
	/// ignored.
	pub fn add_sequence(&mut self, ids: &[TokenId]) {
		let Some(&last) = ids.last() else {
			return;
		};
		let closing = (last != EOT).then_some(EOT);

		*self.bigrams.entry((START, START)).or_insert(0) += 1;
		let (mut w1, mut w2) = (START, START);
		for &id in ids.iter().chain(closing.iter()) {
			*self.unigrams.entry(id).or_insert(0) += 1;
			*self.bigrams.entry((w2, id)).or_insert(0) += 1;
			*self.trigrams.entry((w1, w2, id)).or_insert(0) += 1;
			self.total += 1;
			(w1, w2) = (w2, id);
		}
	}

	/// Adds another table into this one. Used to combine per-thread partial counts.
	pub fn merge(&mut self, other: &Self) {
		for (&k, &v) in &other.unigrams {
			*self.unigrams.entry(k).or_insert(0) += v;
		}
		for (&k, &v) in &other.bigrams {
			*self.bigrams.entry(k).or_insert(0) += v;
		}
		for (&k, &v) in &other.trigrams {
			*self.trigrams.entry(k).or_insert(0) += v;
		}
		self.total += other.total;
	}

	/// Total number of real tokens counted.
	pub fn total(&self) -> u64 {
		self.total
	}

	pub fn unigram(&self, w: TokenId) -> u64 {
		self.unigrams.get(&w).copied().unwrap_or(0)
	}

	pub fn bigram(&self, w1: TokenId, w2: TokenId) -> u64 {
		self.bigrams.get(&(w1, w2)).copied().unwrap_or(0)
	}

	pub fn trigram(&self, w1: TokenId, w2: TokenId, w3: TokenId) -> u64 {
		self.trigrams.get(&(w1, w2, w3)).copied().unwrap_or(0)
	}

	pub fn unigrams(&self) -> impl Iterator<Item = (TokenId, u64)> + '_ {
		self.unigrams.iter().map(|(&w, &c)| (w, c))
	}

	pub fn bigrams(&self) -> impl Iterator<Item = ((TokenId, TokenId), u64)> + '_ {
		self.bigrams.iter().map(|(&k, &c)| (k, c))
	}

	pub fn trigrams(&self) -> impl Iterator<Item = ((TokenId, TokenId, TokenId), u64)> + '_ {
		self.trigrams.iter().map(|(&k, &c)| (k, c))
	}

	/// Ids observed after `w`, with their bigram counts.
	pub fn successors_of(&self, w: TokenId) -> impl Iterator<Item = (TokenId, u64)> + '_ {
		self.bigrams
			.range((w, 0)..=(w, TokenId::MAX))
			.map(|(&(_, next), &c)| (next, c))
	}

	/// Ids observed after `(w1, w2)`, with their trigram counts.
	pub fn successors_of_pair(&self, w1: TokenId, w2: TokenId) -> impl Iterator<Item = (TokenId, u64)> + '_ {
		self.trigrams
			.range((w1, w2, 0)..=(w1, w2, TokenId::MAX))
			.map(|(&(_, _, next), &c)| (next, c))
	}

	pub fn len_unigrams(&self) -> usize {
		self.unigrams.len()
	}

	pub fn len_bigrams(&self) -> usize {
		self.bigrams.len()
	}

	pub fn len_trigrams(&self) -> usize {
		self.trigrams.len()
	}
}

/// Denominators and distinct-continuation counts derived from [`NGramCounts`].
///
/// Not persisted: rebuilt after training and after every load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Contexts {
	/// Σ over real successors `x` of `bigram(w, x)`.
	after_one: BTreeMap<TokenId, u64>,
	/// Σ over `x` of `trigram(w1, w2, x)`.
	after_two: BTreeMap<(TokenId, TokenId), u64>,
	/// `N1+(w ·)`, distinct real successors of `w`.
	distinct_after_one: BTreeMap<TokenId, u64>,
	/// `N1+(w1 w2 ·)`.
	distinct_after_two: BTreeMap<(TokenId, TokenId), u64>,
	/// `N1+(· w)`, distinct predecessors of `w`.
	distinct_before: BTreeMap<TokenId, u64>,
	/// `N1+(· ·)`, distinct real bigrams.
	distinct_bigrams: u64,
}

impl Contexts {
	pub(crate) fn build(counts: &NGramCounts) -> Self {
		let mut contexts = Self::default();
		for ((w, next), c) in counts.bigrams() {
			if next == START {
				continue;
			}
			*contexts.after_one.entry(w).or_insert(0) += c;
			*contexts.distinct_after_one.entry(w).or_insert(0) += 1;
			*contexts.distinct_before.entry(next).or_insert(0) += 1;
			contexts.distinct_bigrams += 1;
		}
		for ((w1, w2, _), c) in counts.trigrams() {
			*contexts.after_two.entry((w1, w2)).or_insert(0) += c;
			*contexts.distinct_after_two.entry((w1, w2)).or_insert(0) += 1;
		}
		contexts
	}

	pub(crate) fn after_one(&self, w: TokenId) -> u64 {
		self.after_one.get(&w).copied().unwrap_or(0)
	}

	pub(crate) fn after_two(&self, w1: TokenId, w2: TokenId) -> u64 {
		self.after_two.get(&(w1, w2)).copied().unwrap_or(0)
	}

	pub(crate) fn distinct_after_one(&self, w: TokenId) -> u64 {
		self.distinct_after_one.get(&w).copied().unwrap_or(0)
	}

	pub(crate) fn distinct_after_two(&self, w1: TokenId, w2: TokenId) -> u64 {
		self.distinct_after_two.get(&(w1, w2)).copied().unwrap_or(0)
	}

	pub(crate) fn distinct_before(&self, w: TokenId) -> u64 {
		self.distinct_before.get(&w).copied().unwrap_or(0)
	}

	pub(crate) fn distinct_bigrams(&self) -> u64 {
		self.distinct_bigrams
	}
}
