//! # Byte-level tokenizer
//!
//! Converts text into fixed-width [`TokenSequence`]s using the single-byte
//! entries of a [`Vocabulary`].
//!
//! ## Fill policy
//!
//! For a sequence of `max_length` slots:
//!
//! 1. Slot 0 holds the begin sentinel (mask 1).
//! 2. Each input byte, in order, is looked up while the write position is
//!    below `max_length - 1`. Hits are appended with mask 1; misses are
//!    skipped without producing output.
//! 3. If a slot remains, the end sentinel is written at the next free
//!    position (mask 1).
//! 4. Every other slot is `(0, 0)`.
//!
//! The number of written slots is tracked explicitly in
//! [`TokenSequence::filled`]; id 0 is a legitimate vocabulary id and is never
//! treated as an end marker.

use crate::vocab::Vocabulary;
use std::sync::Arc;

pub use crate::vocab::TokenId;

/// Default begin-of-sequence sentinel (`[CLS]`).
pub const DEFAULT_BEGIN_ID: TokenId = 101;
/// Default end-of-sequence sentinel (`[SEP]`).
pub const DEFAULT_END_ID: TokenId = 102;
/// Default fixed sequence width.
pub const DEFAULT_MAX_LENGTH: usize = 512;

/// Reported when a structured request has no usable batch container.
///
/// Individual non-text elements are *not* errors; they are counted in
/// [`Batch::rejected`].
#[derive(thiserror::Error, Debug)]
pub enum TokenizeError {
    /// The payload is not a structured document at all.
    #[error("request is not valid JSON: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    /// The document has no `texts` field.
    #[error("request has no `texts` field")]
    MissingTexts,

    /// The `texts` field is present but is not a list.
    #[error("`texts` must be a list, found {found}")]
    TextsNotAList { found: &'static str },
}

/// Sentinel ids and sequence width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenizerConfig {
    pub max_length: usize,
    pub begin_id: TokenId,
    pub end_id: TokenId,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            begin_id: DEFAULT_BEGIN_ID,
            end_id: DEFAULT_END_ID,
        }
    }
}

/// Fixed-width id/mask sequence with an explicit fill count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSequence {
    ids: Vec<TokenId>,
    mask: Vec<u8>,
    filled: usize,
}

impl TokenSequence {
    /// A sequence of `max_length` `(0, 0)` slots.
    pub fn empty(max_length: usize) -> Self {
        Self {
            ids: vec![0; max_length],
            mask: vec![0; max_length],
            filled: 0,
        }
    }

    /// Resets every slot to `(0, 0)`, resizing to `max_length` if needed.
    fn reset(&mut self, max_length: usize) {
        self.ids.clear();
        self.ids.resize(max_length, 0);
        self.mask.clear();
        self.mask.resize(max_length, 0);
        self.filled = 0;
    }

    #[inline]
    fn push(&mut self, id: TokenId) {
        self.ids[self.filled] = id;
        self.mask[self.filled] = 1;
        self.filled += 1;
    }

    /// All `max_length` ids, including trailing zeros.
    pub fn ids(&self) -> &[TokenId] {
        &self.ids
    }

    /// All `max_length` mask bits (0 or 1).
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    /// Number of written slots (sentinels included).
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// The written ids only.
    pub fn filled_ids(&self) -> &[TokenId] {
        &self.ids[..self.filled]
    }

    /// The configured width; always equal to `ids().len()`.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Ordered tokenization results, one sequence per input element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    sequences: Vec<TokenSequence>,
    rejected: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequences(&self) -> &[TokenSequence] {
        &self.sequences
    }

    /// Elements that were not text; each occupies an all-zero row.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, TokenSequence> {
        self.sequences.iter()
    }

    pub fn into_sequences(self) -> Vec<TokenSequence> {
        self.sequences
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a TokenSequence;
    type IntoIter = core::slice::Iter<'a, TokenSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}

/// Byte-level tokenizer bound to one vocabulary snapshot.
#[derive(Clone, Debug)]
pub struct Tokenizer {
    vocabulary: Arc<Vocabulary>,
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new(vocabulary: Arc<Vocabulary>, config: TokenizerConfig) -> Self {
        Self { vocabulary, config }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// Rebinds the tokenizer to a newly published vocabulary.
    pub fn set_vocabulary(&mut self, vocabulary: Arc<Vocabulary>) {
        self.vocabulary = vocabulary;
    }

    /// Tokenizes one text unit into a fresh sequence.
    pub fn tokenize(&self, text: &[u8]) -> TokenSequence {
        let mut sequence = TokenSequence::empty(self.config.max_length);
        self.tokenize_into(text, &mut sequence);
        sequence
    }

    /// Tokenizes one text unit, reusing `sequence`'s allocation.
    pub fn tokenize_into(&self, text: &[u8], sequence: &mut TokenSequence) {
        let max_length = self.config.max_length;
        sequence.reset(max_length);
        if max_length == 0 {
            return;
        }

        sequence.push(self.config.begin_id);

        let content_limit = max_length - 1;
        for &byte in text {
            if sequence.filled >= content_limit {
                break;
            }
            if let Some(id) = self.vocabulary.lookup_byte(byte) {
                sequence.push(id);
            }
        }

        if sequence.filled < max_length {
            sequence.push(self.config.end_id);
        }
    }

    /// Tokenizes an ordered batch into a fresh [`Batch`].
    ///
    /// `None` items stand for non-text elements: they yield an all-zero row
    /// at their position and are counted in [`Batch::rejected`].
    pub fn tokenize_batch<'a, I>(&self, items: I) -> Batch
    where
        I: IntoIterator<Item = Option<&'a [u8]>>,
    {
        let mut batch = Batch::new();
        self.tokenize_batch_into(items, &mut batch);
        batch
    }

    /// Like [`tokenize_batch`](Self::tokenize_batch) but reuses `batch`'s
    /// row allocations.
    pub fn tokenize_batch_into<'a, I>(&self, items: I, batch: &mut Batch)
    where
        I: IntoIterator<Item = Option<&'a [u8]>>,
    {
        let max_length = self.config.max_length;
        batch.rejected = 0;

        let mut rows = 0;
        for item in items {
            if rows == batch.sequences.len() {
                batch.sequences.push(TokenSequence::empty(max_length));
            }
            let sequence = &mut batch.sequences[rows];
            match item {
                Some(text) => self.tokenize_into(text, sequence),
                None => {
                    sequence.reset(max_length);
                    batch.rejected += 1;
                }
            }
            rows += 1;
        }
        batch.sequences.truncate(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_tokenizer(max_length: usize) -> Tokenizer {
        let vocab = Vocabulary::from_json_str(r#"{"h":10,"e":11,"l":12,"o":13}"#).unwrap();
        Tokenizer::new(
            Arc::new(vocab),
            TokenizerConfig {
                max_length,
                ..TokenizerConfig::default()
            },
        )
    }

    fn assert_fill_contract(sequence: &TokenSequence, config: &TokenizerConfig) {
        assert_eq!(sequence.ids().len(), config.max_length);
        assert_eq!(sequence.mask().len(), config.max_length);
        if config.max_length == 0 {
            return;
        }
        assert_eq!(sequence.ids()[0], config.begin_id);
        for (slot, (&id, &mask)) in sequence.ids().iter().zip(sequence.mask()).enumerate() {
            if slot < sequence.filled() {
                assert_eq!(mask, 1, "slot {slot} inside the fill must be masked");
            } else {
                assert_eq!((id, mask), (0, 0), "slot {slot} past the fill must be empty");
            }
        }
    }

    #[test]
    fn tokenizes_hello() {
        let tokenizer = hello_tokenizer(8);
        let sequence = tokenizer.tokenize(b"hello");

        assert_eq!(sequence.ids(), &[101, 10, 11, 12, 12, 13, 102, 0]);
        assert_eq!(sequence.mask(), &[1, 1, 1, 1, 1, 1, 1, 0]);
        assert_eq!(sequence.filled(), 7);
        assert_eq!(sequence.filled_ids(), &[101, 10, 11, 12, 12, 13, 102]);
    }

    #[test]
    fn unknown_bytes_are_skipped() {
        let tokenizer = hello_tokenizer(8);
        let sequence = tokenizer.tokenize(b"h?e!");
        assert_eq!(sequence.filled_ids(), &[101, 10, 11, 102]);
    }

    #[test]
    fn empty_text_gets_both_sentinels() {
        let tokenizer = hello_tokenizer(4);
        let sequence = tokenizer.tokenize(b"");
        assert_eq!(sequence.ids(), &[101, 102, 0, 0]);
        assert_eq!(sequence.mask(), &[1, 1, 0, 0]);
    }

    #[test]
    fn long_text_is_truncated_and_ends_with_sentinel() {
        let tokenizer = hello_tokenizer(6);
        let sequence = tokenizer.tokenize(b"hellohellohello");

        assert_eq!(sequence.ids(), &[101, 10, 11, 12, 12, 102]);
        assert_eq!(sequence.mask(), &[1; 6]);
        assert!(
            !sequence
                .ids()
                .iter()
                .zip(sequence.mask())
                .any(|(&id, &mask)| id == 0 && mask == 1)
        );
    }

    #[test]
    fn tiny_capacities_never_overflow() {
        assert_eq!(hello_tokenizer(0).tokenize(b"hello").ids(), &[] as &[TokenId]);

        let one = hello_tokenizer(1).tokenize(b"hello");
        assert_eq!(one.ids(), &[101]);
        assert_eq!(one.mask(), &[1]);

        let two = hello_tokenizer(2).tokenize(b"hello");
        assert_eq!(two.ids(), &[101, 102]);
    }

    #[test]
    fn fill_contract_holds_for_many_inputs() {
        let inputs: [&[u8]; 6] = [b"", b"h", b"hello world", b"zzzz", b"\x00\xffoo", &[b'l'; 600]];
        for max_length in [0, 1, 2, 3, 8, 64, 512] {
            let tokenizer = hello_tokenizer(max_length);
            for input in inputs {
                assert_fill_contract(&tokenizer.tokenize(input), tokenizer.config());
            }
        }
    }

    #[test]
    fn vocabulary_id_zero_is_not_an_end_marker() {
        let vocab = Vocabulary::from_json_str(r#"{"a": 0, "b": 5}"#).unwrap();
        let tokenizer = Tokenizer::new(
            Arc::new(vocab),
            TokenizerConfig {
                max_length: 6,
                ..TokenizerConfig::default()
            },
        );
        let sequence = tokenizer.tokenize(b"ab");

        assert_eq!(sequence.ids(), &[101, 0, 5, 102, 0, 0]);
        assert_eq!(sequence.mask(), &[1, 1, 1, 1, 0, 0]);
        assert_eq!(sequence.filled(), 4);
    }

    #[test]
    fn batch_preserves_order() {
        let tokenizer = hello_tokenizer(8);
        let inputs: [&[u8]; 3] = [b"h", b"ee", b"lll"];
        let batch = tokenizer.tokenize_batch(inputs.iter().map(|text| Some(*text)));

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rejected(), 0);
        for (sequence, input) in batch.iter().zip(inputs) {
            assert_eq!(*sequence, tokenizer.tokenize(input));
        }
    }

    #[test]
    fn rejected_elements_keep_their_row() {
        let tokenizer = hello_tokenizer(4);
        let batch = tokenizer.tokenize_batch([Some(&b"h"[..]), None, Some(&b"o"[..])]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rejected(), 1);
        assert_eq!(batch.sequences()[0].ids(), &[101, 10, 102, 0]);
        assert_eq!(batch.sequences()[1], TokenSequence::empty(4));
        assert_eq!(batch.sequences()[2].ids(), &[101, 13, 102, 0]);
    }

    #[test]
    fn batch_reuse_shrinks_and_resets() {
        let tokenizer = hello_tokenizer(4);
        let mut batch = Batch::new();

        tokenizer.tokenize_batch_into([Some(&b"hh"[..]), None, Some(&b"e"[..])], &mut batch);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rejected(), 1);

        tokenizer.tokenize_batch_into([Some(&b"o"[..])], &mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rejected(), 0);
        assert_eq!(batch.sequences()[0].ids(), &[101, 13, 102, 0]);
    }
}
