//! Dense id ↔ symbol table shared by both tokenizer modes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::TokenId;

/// Maps token ids to symbols and back. Ids are contiguous from `0` to `len - 1`.
///
/// Only the id-ordered symbol list is persisted; the reverse index is rebuilt
/// on load, which also rejects duplicated symbols.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
	id_to_symbol: Vec<String>,
	symbol_to_id: HashMap<String, TokenId>,
}

impl Vocabulary {
	/// Builds a vocabulary from symbols in id order.
	/// Duplicate symbols are skipped (first occurrence wins).
	pub(crate) fn new(symbols: impl IntoIterator<Item = String>) -> Self {
		let mut vocab = Self {
			id_to_symbol: Vec::new(),
			symbol_to_id: HashMap::new(),
		};
		for symbol in symbols {
			vocab.push(symbol);
		}
		vocab
	}

	/// Number of symbols (vocab size).
	pub fn len(&self) -> usize {
		self.id_to_symbol.len()
	}

	pub fn is_empty(&self) -> bool {
		self.id_to_symbol.is_empty()
	}

	/// Returns the symbol for `id`, or `None` if out of range.
	pub fn symbol(&self, id: TokenId) -> Option<&str> {
		self.id_to_symbol.get(id as usize).map(String::as_str)
	}

	/// Returns the id for `symbol`, or `None` if not in vocab.
	pub fn id(&self, symbol: &str) -> Option<TokenId> {
		self.symbol_to_id.get(symbol).copied()
	}

	/// Iterates `(id, symbol)` in id order.
	pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> {
		self.id_to_symbol
			.iter()
			.enumerate()
			.map(|(id, symbol)| (id as TokenId, symbol.as_str()))
	}

	/// Adds a symbol and returns its id. An existing symbol keeps its id.
	pub(crate) fn push(&mut self, symbol: String) -> TokenId {
		if let Some(&id) = self.symbol_to_id.get(&symbol) {
			return id;
		}
		let id = self.id_to_symbol.len() as TokenId;
		self.id_to_symbol.push(symbol.clone());
		self.symbol_to_id.insert(symbol, id);
		id
	}
}

impl TryFrom<Vec<String>> for Vocabulary {
	type Error = String;

	fn try_from(symbols: Vec<String>) -> Result<Self, Self::Error> {
		if symbols.len() > TokenId::MAX as usize {
			return Err(format!("{} symbols exceed the id space", symbols.len()));
		}
		let expected = symbols.len();
		let vocab = Self::new(symbols);
		if vocab.len() != expected {
			return Err(format!(
				"duplicated symbols break the dense id space ({} unique of {})",
				vocab.len(),
				expected
			));
		}
		Ok(vocab)
	}
}

impl From<Vocabulary> for Vec<String> {
	fn from(vocab: Vocabulary) -> Self {
		vocab.id_to_symbol
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_assigns_dense_ids() {
		let mut v = Vocabulary::new(["a".to_owned(), "b".to_owned()]);
		assert_eq!(v.len(), 2);
		let id = v.push("c".to_owned());
		assert_eq!(id, 2);
		assert_eq!(v.symbol(2), Some("c"));
		assert_eq!(v.id("c"), Some(2));
	}

	#[test]
	fn push_duplicate_returns_existing_id() {
		let mut v = Vocabulary::new(["a".to_owned()]);
		let first = v.push("b".to_owned());
		let second = v.push("b".to_owned());
		assert_eq!(first, second);
		assert_eq!(v.len(), 2);
	}

	#[test]
	fn try_from_rejects_duplicates() {
		let result = Vocabulary::try_from(vec!["a".to_owned(), "b".to_owned(), "a".to_owned()]);
		assert!(result.is_err());
	}

	#[test]
	fn out_of_range_id_has_no_symbol() {
		let v = Vocabulary::new(["a".to_owned()]);
		assert_eq!(v.symbol(1), None);
		assert_eq!(v.id("z"), None);
	}
}
