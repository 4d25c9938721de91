//! Whole-word mode: one id per whitespace-delimited word.

use std::collections::HashMap;

use log::debug;

use super::special::{DisplayWriter, Reserved, Unit, split_units};
use super::vocab::Vocabulary;
use super::{StopReason, TokenId, WholeWordConfig};

/// Learns the `vocab_size - RESERVED_COUNT` most frequent words.
///
/// Ties on frequency keep first-seen order. Returns `None` when the corpus
/// holds no word at all, or none seen `min_frequency` times.
pub(super) fn train<S: AsRef<str>>(
	corpus: &[S],
	vocab_size: usize,
	config: &WholeWordConfig,
) -> Option<(Vocabulary, StopReason)> {
	// word -> (count, first-seen rank)
	let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
	for document in corpus {
		for unit in split_units(document.as_ref()) {
			if let Unit::Word(word) = unit {
				let rank = counts.len();
				counts.entry(word).or_insert((0, rank)).0 += 1;
			}
		}
	}
	if counts.is_empty() {
		return None;
	}
	debug!("whole-word training: {} distinct words", counts.len());

	let mut ranked: Vec<(&str, usize, usize)> = counts
		.into_iter()
		.filter(|(_, (count, _))| *count >= config.min_frequency)
		.map(|(word, (count, rank))| (word, count, rank))
		.collect();
	if ranked.is_empty() {
		debug!("no word reaches min_frequency {}", config.min_frequency);
		return None;
	}
	ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

	let mut vocab = Vocabulary::new(Reserved::ALL.iter().map(|r| r.symbol().to_owned()));
	for (word, _, _) in ranked {
		if vocab.len() >= vocab_size {
			break;
		}
		vocab.push(word.to_owned());
	}

	let stop = if vocab.len() >= vocab_size {
		StopReason::TargetReached
	} else {
		StopReason::CorpusExhausted
	};
	Some((vocab, stop))
}

pub(super) fn encode(vocab: &Vocabulary, text: &str) -> Vec<TokenId> {
	split_units(text)
		.into_iter()
		.map(|unit| match unit {
			Unit::Word(word) => vocab.id(word).unwrap_or(Reserved::Unknown.id()),
			Unit::Reserved(reserved) => reserved.id(),
		})
		.collect()
}

pub(super) fn decode(vocab: &Vocabulary, ids: &[TokenId]) -> String {
	ids.iter()
		.filter_map(|&id| vocab.symbol(id))
		.collect::<Vec<_>>()
		.join(" ")
}

pub(super) fn decode_display(vocab: &Vocabulary, ids: &[TokenId]) -> String {
	let mut writer = DisplayWriter::new();
	for &id in ids {
		match Reserved::from_id(id) {
			Some(Reserved::StoryEnd) => break,
			Some(Reserved::ParagraphEnd) => writer.paragraph_break(),
			Some(Reserved::SentenceEnd | Reserved::Unknown) => (),
			None => {
				if let Some(word) = vocab.symbol(id) {
					writer.word(word);
				}
			}
		}
	}
	writer.finish()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tokenizer::RESERVED_COUNT;

	fn config() -> WholeWordConfig {
		WholeWordConfig { min_frequency: 1 }
	}

	#[test]
	fn frequency_order_with_first_seen_ties() {
		let corpus = ["b a c", "a c d"];
		let (vocab, stop) = train(&corpus, 16, &config()).unwrap();
		// a:2 c:2 (a seen after b but before c), then b:1 d:1
		assert_eq!(vocab.symbol(RESERVED_COUNT as TokenId), Some("a"));
		assert_eq!(vocab.symbol(RESERVED_COUNT as TokenId + 1), Some("c"));
		assert_eq!(vocab.symbol(RESERVED_COUNT as TokenId + 2), Some("b"));
		assert_eq!(vocab.symbol(RESERVED_COUNT as TokenId + 3), Some("d"));
		assert_eq!(stop, StopReason::CorpusExhausted);
	}

	#[test]
	fn truncates_to_vocab_size() {
		let corpus = ["x x x y y z"];
		let (vocab, stop) = train(&corpus, RESERVED_COUNT + 2, &config()).unwrap();
		assert_eq!(vocab.len(), RESERVED_COUNT + 2);
		assert_eq!(vocab.id("z"), None);
		assert_eq!(stop, StopReason::TargetReached);
	}

	#[test]
	fn min_frequency_can_leave_nothing() {
		let corpus = ["a b c", "d e f"];
		let result = train(&corpus, 16, &WholeWordConfig { min_frequency: 2 });
		assert!(result.is_none());
	}

	#[test]
	fn min_frequency_filters_rare_words() {
		let corpus = ["x x y"];
		let (vocab, _) = train(&corpus, 16, &WholeWordConfig { min_frequency: 2 }).unwrap();
		assert!(vocab.id("x").is_some());
		assert!(vocab.id("y").is_none());
	}

	#[test]
	fn terminals_are_not_counted_as_words() {
		let corpus = ["<EOT> <EOT> a\u{E001}"];
		let (vocab, _) = train(&corpus, 16, &config()).unwrap();
		assert_eq!(vocab.len(), RESERVED_COUNT + 1);
	}

	#[test]
	fn corpus_without_words_yields_nothing() {
		let corpus = ["<EOT>", "   "];
		assert!(train(&corpus, 16, &config()).is_none());
	}

	#[test]
	fn display_skips_sentence_ends_and_stops_at_story_end() {
		let (vocab, _) = train(&["a b c"], 16, &config()).unwrap();
		let ids = encode(&vocab, "a <EOS> b <EOP> c <EOT> a");
		assert_eq!(decode_display(&vocab, &ids), "a b\nc");
		assert_eq!(decode(&vocab, &ids), "a <EOS> b <EOP> c <EOT> a");
	}
}
