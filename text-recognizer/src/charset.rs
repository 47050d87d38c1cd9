//! Dictionary loading and index ↔ token mapping.
//!
//! Dictionary files are UTF-8, one token per line. Whitespace inside a line
//! is significant: a line holding a single space is a valid token.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{RecognitionError, Result};

const UTF8_BOM: &str = "\u{FEFF}";

/// Ordered token list backing the CTC class axis.
///
/// Index 0 of the *model* output is the CTC blank and is not part of the
/// charset; decoders subtract one before looking tokens up here.
#[derive(Debug, Clone)]
pub struct Charset {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

impl Charset {
    /// Load and merge one or more dictionary files.
    ///
    /// Files are concatenated in argument order; a token already seen is
    /// skipped, so indices are stable across merges.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            return Err(RecognitionError::Configuration(
                "no dictionary path given".into(),
            ));
        }

        let mut tokens = Vec::new();
        let mut seen = HashSet::new();
        for path in paths {
            let path = path.as_ref();
            let file = std::fs::File::open(path).map_err(|e| {
                RecognitionError::Resource(format!(
                    "cannot open dictionary {}: {e}",
                    path.display()
                ))
            })?;
            read_tokens(BufReader::new(file), &mut tokens, &mut seen)?;
        }

        Self::from_tokens(tokens)
    }

    /// Load from an in-memory dictionary stream.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut seen = HashSet::new();
        read_tokens(BufReader::new(reader), &mut tokens, &mut seen)?;
        Self::from_tokens(tokens)
    }

    fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(RecognitionError::Resource("dictionary is empty".into()));
        }
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Ok(Self { tokens, index })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_of(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Read tokens line by line, stripping the BOM from the first line only and
/// the trailing `\r` left behind by CRLF terminators.
fn read_tokens<R: BufRead>(
    mut reader: R,
    tokens: &mut Vec<String>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let mut raw = String::new();
    let mut first = true;
    loop {
        raw.clear();
        let n = reader
            .read_line(&mut raw)
            .map_err(|e| RecognitionError::Resource(format!("dictionary read failed: {e}")))?;
        if n == 0 {
            break;
        }

        let mut line = raw.as_str();
        if first {
            line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
            first = false;
        }
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if seen.insert(line.to_string()) {
            tokens.push(line.to_string());
        }
    }
    Ok(())
}

/// Output-side rune filter, independent from the decoding charset.
///
/// Any rune whose single-rune string is not a member is dropped from the
/// decoded text. Indexing of the decoding charset is never affected.
#[derive(Debug, Clone)]
pub struct FilterCharset {
    runes: HashSet<char>,
}

impl FilterCharset {
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let charset = Charset::from_files(paths)?;
        Ok(Self::from_charset(&charset))
    }

    pub fn from_charset(charset: &Charset) -> Self {
        let runes = charset
            .tokens()
            .iter()
            .filter_map(|t| {
                let mut chars = t.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            })
            .collect();
        Self { runes }
    }

    pub fn contains(&self, rune: char) -> bool {
        self.runes.contains(&rune)
    }

    pub fn filter(&self, text: &str) -> String {
        text.chars().filter(|c| self.runes.contains(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn charset_from(bytes: &[u8]) -> Charset {
        Charset::from_reader(bytes).unwrap()
    }

    #[test]
    fn loads_tokens_in_order() {
        let cs = charset_from(b"a\nb\nc\n");
        assert_eq!(cs.len(), 3);
        assert_eq!(cs.token_of(0), Some("a"));
        assert_eq!(cs.token_of(2), Some("c"));
        assert_eq!(cs.token_of(3), None);
    }

    #[test]
    fn index_round_trips() {
        let cs = charset_from("a\nb\nç\n€\n".as_bytes());
        for i in 0..cs.len() {
            let token = cs.token_of(i).unwrap();
            assert_eq!(cs.index_of(token), Some(i));
        }
        assert_eq!(cs.index_of("missing"), None);
    }

    #[test]
    fn merge_deduplicates_in_first_seen_order() {
        // S4: [a b ç] + [b c €] -> [a b ç c €]
        let mut tokens = Vec::new();
        let mut seen = HashSet::new();
        read_tokens("a\nb\nç\n".as_bytes(), &mut tokens, &mut seen).unwrap();
        read_tokens("b\nc\n€\n".as_bytes(), &mut tokens, &mut seen).unwrap();
        let cs = Charset::from_tokens(tokens).unwrap();
        assert_eq!(cs.len(), 5);
        assert_eq!(cs.tokens(), &["a", "b", "ç", "c", "€"]);
    }

    #[test]
    fn merge_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("d1.txt");
        let p2 = dir.path().join("d2.txt");
        std::fs::File::create(&p1)
            .unwrap()
            .write_all("a\nb\nç\n".as_bytes())
            .unwrap();
        std::fs::File::create(&p2)
            .unwrap()
            .write_all("b\nc\n€\n".as_bytes())
            .unwrap();

        let cs = Charset::from_files(&[p1, p2]).unwrap();
        assert_eq!(cs.tokens(), &["a", "b", "ç", "c", "€"]);
    }

    #[test]
    fn bom_stripped_from_first_line_only() {
        let cs = charset_from("\u{FEFF}a\nb\n".as_bytes());
        assert_eq!(cs.token_of(0), Some("a"));
        assert_eq!(cs.token_of(1), Some("b"));
    }

    #[test]
    fn whitespace_tokens_survive() {
        // A leading-space token and a bare space token are both meaningful.
        let cs = charset_from(b" a\n \nb\n");
        assert_eq!(cs.token_of(0), Some(" a"));
        assert_eq!(cs.token_of(1), Some(" "));
        assert_eq!(cs.index_of(" "), Some(1));
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let cs = charset_from(b"a\r\nb\r\n");
        assert_eq!(cs.tokens(), &["a", "b"]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let cs = charset_from(b"a\n\nb\n");
        assert_eq!(cs.len(), 3);
        assert_eq!(cs.token_of(1), Some(""));
    }

    #[test]
    fn empty_inputs_fail() {
        assert!(Charset::from_reader(b"".as_slice()).is_err());
        let empty: &[&str] = &[];
        assert!(Charset::from_files(empty).is_err());
        assert!(Charset::from_files(&["/nonexistent/dict.txt"]).is_err());
    }

    #[test]
    fn filter_keeps_member_runes_only() {
        let cs = charset_from(b"a\nb\nc\n");
        let filter = FilterCharset::from_charset(&cs);
        assert_eq!(filter.filter("abcd"), "abc");
        assert_eq!(filter.filter(""), "");
        assert!(filter.contains('a'));
        assert!(!filter.contains('d'));
    }

    #[test]
    fn filter_ignores_multi_rune_tokens() {
        let cs = charset_from("ab\nc\n".as_bytes());
        let filter = FilterCharset::from_charset(&cs);
        assert!(!filter.contains('a'));
        assert!(filter.contains('c'));
    }
}
