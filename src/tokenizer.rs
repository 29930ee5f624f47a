//! Byte-level BPE tokenizer compatible with CLIP's text encoder.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::errors::{HatCheckError, HatCheckResult};

pub const START_OF_TEXT: i64 = 49406;
pub const END_OF_TEXT: i64 = 49407;
pub const MAX_LENGTH: usize = 77;

const WORD_END: &str = "</w>";

/// Token ids for a batch of prompts, padded to the longest prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub rows: usize,
    pub seq_len: usize,
}

pub struct ClipTokenizer {
    vocab: HashMap<String, i64>,
    ranks: HashMap<(String, String), usize>,
    byte_map: [char; 256],
}

impl ClipTokenizer {
    /// Loads `vocab.json` and `merges.txt` as published alongside CLIP checkpoints.
    pub fn from_files(vocab: &Path, merges: &Path) -> HatCheckResult<Self> {
        let vocab: HashMap<String, i64> = serde_json::from_slice(&fs::read(vocab)?)?;
        let merges = fs::read_to_string(merges)?;
        Self::from_parts(vocab, &merges)
    }

    pub fn from_parts(vocab: HashMap<String, i64>, merges: &str) -> HatCheckResult<Self> {
        let mut ranks = HashMap::new();
        for line in merges.lines().filter(|l| !l.starts_with("#version")) {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(a), Some(b)) => {
                    let rank = ranks.len();
                    ranks.insert((a.to_string(), b.to_string()), rank);
                }
                (None, _) => continue,
                _ => {
                    return Err(HatCheckError::ModelLoad(format!("malformed merge rule {line:?}")))
                }
            }
        }
        Ok(Self {
            vocab,
            ranks,
            byte_map: bytes_to_unicode(),
        })
    }

    /// Encodes one prompt, framed by start and end tokens and truncated to
    /// [`MAX_LENGTH`].
    pub fn encode(&self, text: &str) -> HatCheckResult<Vec<i64>> {
        let mut ids = vec![START_OF_TEXT];
        let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        for piece in pre_tokenize(&cleaned) {
            let mapped: String = piece.bytes().map(|b| self.byte_map[b as usize]).collect();
            for symbol in self.bpe(&mapped) {
                let id = self.vocab.get(&symbol).copied().ok_or_else(|| {
                    HatCheckError::Vocabulary(format!("token {symbol:?} of {text:?} is not in the vocabulary"))
                })?;
                ids.push(id);
            }
        }
        ids.truncate(MAX_LENGTH - 1);
        ids.push(END_OF_TEXT);
        Ok(ids)
    }

    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S]) -> HatCheckResult<Batch> {
        let encoded = texts
            .iter()
            .map(|t| self.encode(t.as_ref()))
            .collect::<HatCheckResult<Vec<_>>>()?;
        let seq_len = encoded.iter().map(Vec::len).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(encoded.len() * seq_len);
        let mut attention_mask = Vec::with_capacity(encoded.len() * seq_len);
        for row in &encoded {
            ids.extend_from_slice(row);
            ids.extend(std::iter::repeat(END_OF_TEXT).take(seq_len - row.len()));
            attention_mask.extend(std::iter::repeat(1).take(row.len()));
            attention_mask.extend(std::iter::repeat(0).take(seq_len - row.len()));
        }
        Ok(Batch {
            ids,
            attention_mask,
            rows: encoded.len(),
            seq_len,
        })
    }

    fn bpe(&self, word: &str) -> Vec<String> {
        let mut symbols: Vec<String> = word.chars().map(String::from).collect();
        if let Some(last) = symbols.last_mut() {
            last.push_str(WORD_END);
        }

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .filter_map(|pair| {
                    self.ranks
                        .get(&(pair[0].clone(), pair[1].clone()))
                        .map(|&rank| (rank, pair[0].clone(), pair[1].clone()))
                })
                .min_by_key(|(rank, _, _)| *rank);
            let Some((_, first, second)) = best else {
                break;
            };

            let mut merged = Vec::with_capacity(symbols.len());
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == first && symbols[i + 1] == second {
                    merged.push(format!("{first}{second}"));
                    i += 2;
                } else {
                    merged.push(symbols[i].clone());
                    i += 1;
                }
            }
            symbols = merged;
        }
        symbols
    }
}

/// Splits text into letter runs, single digits and runs of other
/// non-space characters.
fn pre_tokenize(text: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Kind {
        Letter,
        Other,
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut kind = None;
    for c in text.chars() {
        let next = if c.is_whitespace() {
            None
        } else if c.is_alphabetic() {
            Some(Kind::Letter)
        } else if c.is_numeric() {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.push(c.to_string());
            kind = None;
            continue;
        } else {
            Some(Kind::Other)
        };

        if next != kind && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if next.is_some() {
            current.push(c);
        }
        kind = next;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// GPT-2 style reversible mapping from bytes to printable characters.
fn bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        table[b as usize] = if printable {
            char::from(b)
        } else {
            let c = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
            shifted += 1;
            c
        };
    }
    table
}
