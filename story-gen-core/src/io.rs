use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ModelError, Result};

/// Reads a corpus file and returns one document per non-blank line.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
/// - Trims each line and drops the empty ones
pub fn read_corpus<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_owned)
		.collect())
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/corpus.txt` + `"tokenizer"` → `data/corpus.tokenizer`
pub fn build_output_path<P: AsRef<Path>>(
	input_path: P,
	output_extension: &str,
) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Serializes `value` with postcard and writes it to `path`,
/// creating the parent directory when missing.
pub(crate) fn write_postcard<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
	let path = path.as_ref();
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}
	let bytes = postcard::to_stdvec(value)?;
	fs::write(path, bytes)?;
	Ok(())
}

/// Decodes a postcard payload. A payload that does not decode is reported
/// as a corrupt artifact, not as a serialization failure.
pub(crate) fn decode_postcard<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
	postcard::from_bytes(bytes)
		.map_err(|e| ModelError::CorruptArtifact(format!("{what} does not decode: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn read_corpus_skips_blank_lines() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("corpus.txt");
		fs::write(&path, "first story\n\n   \r\nsecond story  \n").unwrap();

		let corpus = read_corpus(&path).unwrap();
		assert_eq!(corpus, vec!["first story".to_owned(), "second story".to_owned()]);
	}

	#[test]
	fn build_output_path_swaps_extension() {
		let out = build_output_path("data/corpus.txt", "tokenizer").unwrap();
		assert_eq!(out, PathBuf::from("data/corpus.tokenizer"));
	}

	#[test]
	fn write_postcard_creates_parent_directory() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("value.bin");
		write_postcard(&vec![1u32, 2, 3], &path).unwrap();

		let bytes = fs::read(&path).unwrap();
		let back: Vec<u32> = decode_postcard(&bytes, "value").unwrap();
		assert_eq!(back, vec![1, 2, 3]);
	}

	#[test]
	fn decode_postcard_reports_corrupt_artifact() {
		let result: Result<Vec<String>> = decode_postcard(&[0xff, 0xff, 0xff], "value");
		assert!(matches!(result, Err(ModelError::CorruptArtifact(_))));
	}
}
