//! Reserved symbols and the whitespace/terminal pre-tokenizer both modes share.

use serde::{Deserialize, Serialize};

use super::TokenId;

/// Reserved vocabulary entries. They occupy ids `0..RESERVED_COUNT` in
/// every artifact and are never produced by merge learning.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reserved {
	/// `<EOS>`, end of sentence.
	SentenceEnd,
	/// `<EOP>`, end of paragraph.
	ParagraphEnd,
	/// `<EOT>`, end of story. Generation stops when it is sampled.
	StoryEnd,
	/// `<UNK>`, out-of-vocabulary fallback.
	Unknown,
}

/// Number of reserved ids at the start of every vocabulary.
pub const RESERVED_COUNT: usize = 4;

/// Id of `<EOS>`.
pub const EOS: TokenId = 0;
/// Id of `<EOP>`.
pub const EOP: TokenId = 1;
/// Id of `<EOT>`.
pub const EOT: TokenId = 2;
/// Id of `<UNK>`.
pub const UNK: TokenId = 3;

impl Reserved {
	pub const ALL: [Reserved; RESERVED_COUNT] = [
		Reserved::SentenceEnd,
		Reserved::ParagraphEnd,
		Reserved::StoryEnd,
		Reserved::Unknown,
	];

	pub fn id(self) -> TokenId {
		match self {
			Reserved::SentenceEnd => EOS,
			Reserved::ParagraphEnd => EOP,
			Reserved::StoryEnd => EOT,
			Reserved::Unknown => UNK,
		}
	}

	/// Literal form as it appears in vocabularies and round-trip output.
	pub fn symbol(self) -> &'static str {
		match self {
			Reserved::SentenceEnd => "<EOS>",
			Reserved::ParagraphEnd => "<EOP>",
			Reserved::StoryEnd => "<EOT>",
			Reserved::Unknown => "<UNK>",
		}
	}

	pub fn from_id(id: TokenId) -> Option<Self> {
		Self::ALL.get(id as usize).copied()
	}

	pub fn from_symbol(symbol: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|r| r.symbol() == symbol)
	}

	/// Private-use code points the corpus cleaner inserts for terminals.
	fn from_marker(c: char) -> Option<Self> {
		match c {
			'\u{E001}' => Some(Reserved::SentenceEnd),
			'\u{E002}' => Some(Reserved::ParagraphEnd),
			'\u{E003}' => Some(Reserved::StoryEnd),
			_ => None,
		}
	}
}

/// One pre-tokenized unit of text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Unit<'a> {
	Word(&'a str),
	Reserved(Reserved),
}

/// Splits text on whitespace and separates terminals, whether written as
/// literals (`<EOT>`) or as private-use markers glued to a word.
pub(crate) fn split_units(text: &str) -> Vec<Unit<'_>> {
	let mut units = Vec::new();
	for piece in text.split_whitespace() {
		if let Some(reserved) = Reserved::from_symbol(piece) {
			units.push(Unit::Reserved(reserved));
			continue;
		}

		let mut start = 0;
		for (idx, c) in piece.char_indices() {
			if let Some(reserved) = Reserved::from_marker(c) {
				if start < idx {
					units.push(Unit::Word(&piece[start..idx]));
				}
				units.push(Unit::Reserved(reserved));
				start = idx + c.len_utf8();
			}
		}
		if start < piece.len() {
			units.push(Unit::Word(&piece[start..]));
		}
	}
	units
}

/// Canonical form of a text: units joined by single spaces, terminals
/// written as literals. Round-trip guarantees are stated against this.
pub fn normalize(text: &str) -> String {
	split_units(text)
		.into_iter()
		.map(|unit| match unit {
			Unit::Word(word) => word,
			Unit::Reserved(reserved) => reserved.symbol(),
		})
		.collect::<Vec<_>>()
		.join(" ")
}

/// Accumulates reader-facing output: `<EOP>` becomes a line break and no
/// space is left dangling at the start of a line.
pub(crate) struct DisplayWriter {
	out: String,
}

impl DisplayWriter {
	pub(crate) fn new() -> Self {
		Self { out: String::new() }
	}

	/// Appends a fragment verbatim, dropping a leading space at line start.
	pub(crate) fn fragment(&mut self, fragment: &str) {
		if self.at_line_start() {
			self.out.push_str(fragment.trim_start_matches(' '));
		} else {
			self.out.push_str(fragment);
		}
	}

	/// Appends a whole word, separated from the previous one by a space.
	pub(crate) fn word(&mut self, word: &str) {
		if !self.at_line_start() {
			self.out.push(' ');
		}
		self.out.push_str(word);
	}

	pub(crate) fn paragraph_break(&mut self) {
		if !self.out.is_empty() {
			self.out.push('\n');
		}
	}

	fn at_line_start(&self) -> bool {
		self.out.is_empty() || self.out.ends_with('\n')
	}

	pub(crate) fn finish(self) -> String {
		self.out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reserved_ids_are_dense_and_ordered() {
		for (idx, reserved) in Reserved::ALL.into_iter().enumerate() {
			assert_eq!(reserved.id() as usize, idx);
			assert_eq!(Reserved::from_id(reserved.id()), Some(reserved));
			assert_eq!(Reserved::from_symbol(reserved.symbol()), Some(reserved));
		}
		assert_eq!(Reserved::from_id(RESERVED_COUNT as TokenId), None);
	}

	#[test]
	fn split_units_recognises_literals() {
		let units = split_units("ایک تھا <EOT>");
		assert_eq!(
			units,
			vec![Unit::Word("ایک"), Unit::Word("تھا"), Unit::Reserved(Reserved::StoryEnd)]
		);
	}

	#[test]
	fn split_units_detaches_glued_markers() {
		let units = split_units("بادشاہ۔\u{E001} \u{E002}ایک\u{E003}");
		assert_eq!(
			units,
			vec![
				Unit::Word("بادشاہ۔"),
				Unit::Reserved(Reserved::SentenceEnd),
				Unit::Reserved(Reserved::ParagraphEnd),
				Unit::Word("ایک"),
				Unit::Reserved(Reserved::StoryEnd),
			]
		);
	}

	#[test]
	fn normalize_collapses_whitespace_and_rewrites_markers() {
		assert_eq!(normalize("  a \t b\u{E003}\n"), "a b <EOT>");
		assert_eq!(normalize(""), "");
	}

	#[test]
	fn display_writer_breaks_lines() {
		let mut writer = DisplayWriter::new();
		writer.word("a");
		writer.word("b");
		writer.paragraph_break();
		writer.fragment(" c");
		assert_eq!(writer.finish(), "a b\nc");
	}
}
