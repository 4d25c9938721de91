//! Subword mode: greedy character-pair merge learning and replay.
//!
//! Each word is a chunk. Every unit after the first in a text carries a
//! leading space inside its chunk, so fragments concatenate back into
//! spaced words without a separator. Merges never cross chunk boundaries.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::special::{DisplayWriter, Reserved, Unit, split_units};
use super::vocab::Vocabulary;
use super::{RESERVED_COUNT, StopReason, TokenId};

/// A learned merge: adjacent `left right` becomes `merged`.
///
/// `merged` may name a symbol that already existed when the merge was
/// learned; the merge is still replayed so encode matches training.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Merge {
	pub left: TokenId,
	pub right: TokenId,
	pub merged: TokenId,
}

/// Symbol slot inside a chunk. `None` is a character outside the alphabet;
/// it never pairs and encodes to `<UNK>`.
type Slot = Option<TokenId>;

/// Training chunk with its corpus frequency.
struct Chunk {
	slots: Vec<Slot>,
	freq: usize,
}

/// Mutable state of one training run. Owned by [`train`] and dropped with it.
struct MergeArena {
	vocab: Vocabulary,
	chunks: Vec<Chunk>,
	pair_counts: HashMap<(TokenId, TokenId), usize>,
	/// Pairs whose concatenation spells a reserved symbol.
	blocked: HashSet<(TokenId, TokenId)>,
	merges: Vec<Merge>,
}

impl MergeArena {
	fn new(vocab: Vocabulary, chunks: Vec<Chunk>) -> Self {
		let mut arena = Self {
			vocab,
			chunks,
			pair_counts: HashMap::new(),
			blocked: HashSet::new(),
			merges: Vec::new(),
		};
		for idx in 0..arena.chunks.len() {
			arena.count_pairs(idx, true);
		}
		arena
	}

	/// Adds (or removes) the weighted adjacent pairs of one chunk.
	fn count_pairs(&mut self, idx: usize, add: bool) {
		let chunk = &self.chunks[idx];
		for window in chunk.slots.windows(2) {
			if let (Some(a), Some(b)) = (window[0], window[1]) {
				let count = self.pair_counts.entry((a, b)).or_insert(0);
				if add {
					*count += chunk.freq;
				} else {
					*count -= chunk.freq;
				}
			}
		}
	}

	/// Most frequent pair. Ties go to the lexicographically smallest
	/// concatenation, then to the smallest left symbol.
	fn best_pair(&self) -> Option<((TokenId, TokenId), usize)> {
		let mut best: Option<((TokenId, TokenId), usize)> = None;
		for (&pair, &count) in &self.pair_counts {
			if count == 0 || self.blocked.contains(&pair) {
				continue;
			}
			let better = match best {
				None => true,
				Some((best_pair, best_count)) => match count.cmp(&best_count) {
					Ordering::Greater => true,
					Ordering::Less => false,
					Ordering::Equal => self.tie_order(pair, best_pair) == Ordering::Less,
				},
			};
			if better {
				best = Some((pair, count));
			}
		}
		best
	}

	fn tie_order(&self, a: (TokenId, TokenId), b: (TokenId, TokenId)) -> Ordering {
		let text = |id| self.vocab.symbol(id).unwrap_or_default();
		let (a_left, a_right) = (text(a.0), text(a.1));
		let (b_left, b_right) = (text(b.0), text(b.1));
		a_left
			.chars()
			.chain(a_right.chars())
			.cmp(b_left.chars().chain(b_right.chars()))
			.then_with(|| a_left.cmp(b_left))
	}

	/// Learns one merge and rewrites every chunk containing the pair.
	fn apply(&mut self, (left, right): (TokenId, TokenId)) {
		let merged_symbol = format!(
			"{}{}",
			self.vocab.symbol(left).unwrap_or_default(),
			self.vocab.symbol(right).unwrap_or_default()
		);
		if Reserved::from_symbol(&merged_symbol).is_some() {
			self.blocked.insert((left, right));
			return;
		}
		let merged = self.vocab.push(merged_symbol);
		let merge = Merge { left, right, merged };
		self.merges.push(merge);

		for idx in 0..self.chunks.len() {
			if !contains_pair(&self.chunks[idx].slots, left, right) {
				continue;
			}
			self.count_pairs(idx, false);
			merge_slots(&mut self.chunks[idx].slots, &merge);
			self.count_pairs(idx, true);
		}
		self.pair_counts.retain(|_, count| *count > 0);
	}
}

fn contains_pair(slots: &[Slot], left: TokenId, right: TokenId) -> bool {
	slots
		.windows(2)
		.any(|w| w[0] == Some(left) && w[1] == Some(right))
}

/// Replaces every adjacent `left right` with `merged`, scanning left to right.
/// Returns whether anything changed.
fn merge_slots(slots: &mut Vec<Slot>, merge: &Merge) -> bool {
	if slots.len() < 2 {
		return false;
	}
	let mut out = Vec::with_capacity(slots.len());
	let mut i = 0;
	let mut changed = false;
	while i < slots.len() {
		if i + 1 < slots.len() && slots[i] == Some(merge.left) && slots[i + 1] == Some(merge.right) {
			out.push(Some(merge.merged));
			i += 2;
			changed = true;
		} else {
			out.push(slots[i]);
			i += 1;
		}
	}
	*slots = out;
	changed
}

/// Splits `chunk` into base-alphabet slots.
fn base_slots(vocab: &Vocabulary, chunk: &str) -> Vec<Slot> {
	let mut buf = [0u8; 4];
	chunk.chars().map(|c| vocab.id(c.encode_utf8(&mut buf))).collect()
}

/// A mergeable chunk or a reserved unit standing between chunks.
enum Piece {
	Chunk(String),
	Reserved(Reserved),
}

fn pieces_of(text: &str) -> Vec<Piece> {
	split_units(text)
		.into_iter()
		.enumerate()
		.map(|(idx, unit)| match unit {
			Unit::Word(word) if idx == 0 => Piece::Chunk(word.to_owned()),
			Unit::Word(word) => Piece::Chunk(format!(" {word}")),
			Unit::Reserved(reserved) => Piece::Reserved(reserved),
		})
		.collect()
}

/// Learns the base alphabet then greedy merges until the vocabulary holds
/// `vocab_size` symbols or no pair occurs more than once.
///
/// Returns `None` when the corpus holds no word at all.
pub(super) fn train<S: AsRef<str>>(
	corpus: &[S],
	vocab_size: usize,
) -> Option<(Vocabulary, Vec<Merge>, StopReason)> {
	// chunk text -> index into `unique`, first-seen order
	let mut index: HashMap<String, usize> = HashMap::new();
	let mut unique: Vec<(String, usize)> = Vec::new();
	for document in corpus {
		for piece in pieces_of(document.as_ref()) {
			let Piece::Chunk(chunk) = piece else {
				continue;
			};
			match index.get(&chunk) {
				Some(&idx) => unique[idx].1 += 1,
				None => {
					index.insert(chunk.clone(), unique.len());
					unique.push((chunk, 1));
				}
			}
		}
	}
	if unique.is_empty() {
		return None;
	}

	let mut char_counts: HashMap<char, usize> = HashMap::new();
	for (chunk, freq) in &unique {
		for c in chunk.chars() {
			*char_counts.entry(c).or_insert(0) += freq;
		}
	}
	let mut alphabet: Vec<(char, usize)> = char_counts.into_iter().collect();
	let room = vocab_size - RESERVED_COUNT;
	if alphabet.len() > room {
		alphabet.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
		alphabet.truncate(room);
		debug!("subword training: alphabet truncated to {room} characters");
	}
	let mut alphabet: Vec<char> = alphabet.into_iter().map(|(c, _)| c).collect();
	alphabet.sort_unstable();

	let vocab = Vocabulary::new(
		Reserved::ALL
			.iter()
			.map(|r| r.symbol().to_owned())
			.chain(alphabet.iter().map(char::to_string)),
	);
	debug!(
		"subword training: {} distinct chunks, base vocabulary {}",
		unique.len(),
		vocab.len()
	);

	let chunks = unique
		.iter()
		.map(|(chunk, freq)| Chunk { slots: base_slots(&vocab, chunk), freq: *freq })
		.collect();
	let mut arena = MergeArena::new(vocab, chunks);

	let stop = loop {
		if arena.vocab.len() >= vocab_size {
			break StopReason::TargetReached;
		}
		match arena.best_pair() {
			Some((pair, count)) if count > 1 => arena.apply(pair),
			_ => break StopReason::NoRepeatedPair,
		}
		if arena.merges.len() % 100 == 0 {
			debug!("subword training: {} merges, vocabulary {}", arena.merges.len(), arena.vocab.len());
		}
	};
	info!("subword training: learned {} merges ({:?})", arena.merges.len(), stop);

	Some((arena.vocab, arena.merges, stop))
}

/// Replays `merges` in learned order over one chunk until no merge applies.
fn encode_chunk(vocab: &Vocabulary, merges: &[Merge], chunk: &str, out: &mut Vec<TokenId>) {
	let mut slots = base_slots(vocab, chunk);
	loop {
		let mut changed = false;
		for merge in merges {
			changed |= merge_slots(&mut slots, merge);
		}
		if !changed {
			break;
		}
	}
	out.extend(slots.into_iter().map(|slot| slot.unwrap_or(Reserved::Unknown.id())));
}

pub(super) fn encode(vocab: &Vocabulary, merges: &[Merge], text: &str) -> Vec<TokenId> {
	let mut ids = Vec::new();
	for piece in pieces_of(text) {
		match piece {
			Piece::Chunk(chunk) => encode_chunk(vocab, merges, &chunk, &mut ids),
			Piece::Reserved(reserved) => ids.push(reserved.id()),
		}
	}
	ids
}

pub(super) fn decode(vocab: &Vocabulary, ids: &[TokenId]) -> String {
	let mut out = String::new();
	for &id in ids {
		let Some(symbol) = vocab.symbol(id) else {
			continue;
		};
		if Reserved::from_id(id).is_some() && !out.is_empty() {
			out.push(' ');
		}
		out.push_str(symbol);
	}
	out
}

pub(super) fn decode_display(vocab: &Vocabulary, ids: &[TokenId]) -> String {
	let mut writer = DisplayWriter::new();
	for &id in ids {
		match Reserved::from_id(id) {
			Some(Reserved::StoryEnd) => break,
			Some(Reserved::ParagraphEnd) => writer.paragraph_break(),
			Some(Reserved::SentenceEnd | Reserved::Unknown) => (),
			None => {
				if let Some(fragment) = vocab.symbol(id) {
					writer.fragment(fragment);
				}
			}
		}
	}
	writer.finish()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn symbols(vocab: &Vocabulary, ids: &[TokenId]) -> Vec<String> {
		ids.iter().map(|&id| vocab.symbol(id).unwrap().to_owned()).collect()
	}

	#[test]
	fn learns_most_frequent_pair_first() {
		let corpus = ["aaab", "aaab", "ab"];
		let (vocab, merges, _) = train(&corpus, RESERVED_COUNT + 3).unwrap();
		// base: a b; first merge ("a","a") x4 vs ("a","b") x3
		assert_eq!(merges.len(), 1);
		assert_eq!(vocab.symbol(merges[0].merged), Some("aa"));
	}

	#[test]
	fn ties_break_on_concatenation() {
		// "ab" and "cd" both appear twice
		let corpus = ["cd ab", "cd ab"];
		let (vocab, merges, _) = train(&corpus, 64).unwrap();
		let first = vocab.symbol(merges[0].merged).unwrap();
		assert_eq!(first, " a");
	}

	#[test]
	fn stops_without_repeated_pairs() {
		let corpus = ["abc"];
		let (vocab, merges, stop) = train(&corpus, 64).unwrap();
		assert!(merges.is_empty());
		assert_eq!(vocab.len(), RESERVED_COUNT + 3);
		assert_eq!(stop, StopReason::NoRepeatedPair);
	}

	#[test]
	fn alphabet_is_truncated_to_fit() {
		let corpus = ["aaa bb c"];
		let (vocab, merges, stop) = train(&corpus, RESERVED_COUNT + 2).unwrap();
		assert_eq!(vocab.len(), RESERVED_COUNT + 2);
		assert!(merges.is_empty());
		assert_eq!(stop, StopReason::TargetReached);
		// 'a' (3) and 'b'/' ' (2 each, ' ' sorts first) survive
		assert!(vocab.id("a").is_some());
		assert!(vocab.id(" ").is_some());
		assert!(vocab.id("c").is_none());
	}

	#[test]
	fn encode_replays_training_segmentation() {
		let corpus = ["low lower lowest", "low low"];
		let (vocab, merges, _) = train(&corpus, 30).unwrap();
		let ids = encode(&vocab, &merges, "low lower");
		assert_eq!(decode(&vocab, &ids), "low lower");
		// "low" is frequent enough to become one symbol
		assert_eq!(symbols(&vocab, &ids[..1]), vec!["low".to_owned()]);
	}

	#[test]
	fn unknown_characters_become_unk() {
		let corpus = ["ab ab"];
		let (vocab, merges, _) = train(&corpus, 16).unwrap();
		let ids = encode(&vocab, &merges, "abz");
		assert_eq!(ids.last(), Some(&Reserved::Unknown.id()));
		assert_eq!(decode(&vocab, &ids), "ab <UNK>");
	}

	#[test]
	fn terminals_round_trip_with_spacing() {
		let corpus = ["a b <EOT>"];
		let (vocab, merges, _) = train(&corpus, 16).unwrap();
		let ids = encode(&vocab, &merges, "a <EOS> b <EOT>");
		assert_eq!(decode(&vocab, &ids), "a <EOS> b <EOT>");
		assert_eq!(decode_display(&vocab, &ids), "a b");
	}

	#[test]
	fn never_merges_into_a_reserved_symbol() {
		let corpus = ["x<EOT>y x<EOT>y x<EOT>y"];
		let (vocab, merges, _) = train(&corpus, 64).unwrap();
		assert!(merges.iter().all(|m| m.merged as usize >= RESERVED_COUNT));
		let ids = encode(&vocab, &merges, "x<EOT>y");
		assert_eq!(decode(&vocab, &ids), "x<EOT>y");
	}

	#[test]
	fn merge_slots_is_left_to_right() {
		let merge = Merge { left: 5, right: 5, merged: 9 };
		let mut slots = vec![Some(5), Some(5), Some(5)];
		assert!(merge_slots(&mut slots, &merge));
		assert_eq!(slots, vec![Some(9), Some(5)]);
	}
}
