//! # Vocabulary Store
//!
//! An immutable map from fixed-width byte keys to token ids, built once before
//! any worker starts and read concurrently without synchronization afterwards.
//!
//! Keys are normalized to [`KEY_LEN`] bytes: longer keys are truncated and
//! shorter keys are zero-padded, so two keys that share their first 32 bytes
//! are the same entry. When the source contains such collisions (or literal
//! duplicates) the entry that appears *last in the source* wins.
//!
//! Padding is with NUL bytes, so a key is indistinguishable from itself with
//! trailing NULs appended: `"a"` and `"a\0"` are one entry. The empty key
//! would pad to the same bytes as `"\0"` and is rejected at load time.
//!
//! Besides the general [`Vocabulary::lookup`], the store keeps a 256-slot
//! table of the single-byte keys so the tokenizer's per-byte lookup is a plain
//! array index.
//!
//! [`VocabularyCell`] publishes a vocabulary to workers and supports hot
//! reload: a replacement is built off to the side and swapped in as a whole,
//! and workers notice the swap through a generation counter at burst
//! boundaries. No lookup ever takes a lock.

use ahash::AHashMap;
use core::fmt;
use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::{fs::File, io::BufReader, io::Read, path::Path, sync::Arc};

/// Width in bytes of a normalized vocabulary key.
pub const KEY_LEN: usize = 32;

/// A normalized (truncated / zero-padded) vocabulary key.
pub type VocabKey = [u8; KEY_LEN];

/// Token id emitted into sequences.
///
/// Vocabulary sources carry signed 32-bit ids; negative ids are rejected at
/// load time, so every stored id fits both `i32` and `u32`.
pub type TokenId = u32;

/// Errors raised while building a [`Vocabulary`].
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// The source could not be opened or read.
    #[error("unreadable vocabulary source: {0}")]
    Io(#[from] std::io::Error),

    /// The source is not a JSON object of string keys to integer ids.
    #[error("malformed vocabulary source: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The empty string is not a valid key.
    #[error("empty vocabulary key (id {id})")]
    EmptyKey { id: i64 },

    /// An id lies outside `0..=i32::MAX`.
    #[error("id {id} for key {key:?} is outside 0..=2147483647")]
    InvalidId { key: String, id: i64 },
}

/// Normalizes `key` to exactly [`KEY_LEN`] bytes.
pub fn normalize_key(key: &[u8]) -> VocabKey {
    let mut padded = [0_u8; KEY_LEN];
    let len = key.len().min(KEY_LEN);
    padded[..len].copy_from_slice(&key[..len]);
    padded
}

/// Immutable key → id map with O(1) lookups.
#[derive(Clone)]
pub struct Vocabulary {
    entries: AHashMap<VocabKey, TokenId>,
    bytes: [Option<TokenId>; 256],
}

impl Vocabulary {
    /// Builds a vocabulary from `(key, id)` pairs, in order.
    ///
    /// Later pairs overwrite earlier ones whose normalized key is equal.
    pub fn from_entries<I, K>(entries: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<[u8]>,
    {
        let entries = entries.into_iter();
        let mut map = AHashMap::with_capacity(entries.size_hint().0);

        for (key, id) in entries {
            let key = key.as_ref();
            if key.is_empty() {
                return Err(LoadError::EmptyKey { id });
            }
            let id = TokenId::try_from(id)
                .ok()
                .filter(|id| i32::try_from(*id).is_ok())
                .ok_or_else(|| LoadError::InvalidId {
                    key: String::from_utf8_lossy(key).into_owned(),
                    id,
                })?;
            map.insert(normalize_key(key), id);
        }

        let mut bytes = [None; 256];
        for (byte, slot) in bytes.iter_mut().enumerate() {
            *slot = map.get(&normalize_key(&[byte as u8])).copied();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(entries = map.len(), "vocabulary built");

        Ok(Self {
            entries: map,
            bytes,
        })
    }

    /// Parses a JSON object of `token → id` pairs.
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let OrderedEntries(entries) = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    /// Parses a JSON object of `token → id` pairs from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LoadError> {
        let OrderedEntries(entries) = serde_json::from_reader(BufReader::new(reader))?;
        Self::from_entries(entries)
    }

    /// Loads a JSON vocabulary file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Looks up `key` after normalizing it to [`KEY_LEN`] bytes.
    #[inline]
    pub fn lookup(&self, key: &[u8]) -> Option<TokenId> {
        self.entries.get(&normalize_key(key)).copied()
    }

    /// Looks up the single-byte key `byte`.
    ///
    /// Equivalent to `lookup(&[byte])`.
    #[inline]
    pub fn lookup_byte(&self, byte: u8) -> Option<TokenId> {
        self.bytes[usize::from(byte)]
    }

    /// Number of distinct normalized keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&VocabKey, TokenId)> + '_ {
        self.entries.iter().map(|(key, id)| (key, *id))
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("entries", &self.entries.len())
            .field(
                "byte_keys",
                &self.bytes.iter().filter(|slot| slot.is_some()).count(),
            )
            .finish()
    }
}

/// JSON object entries in source order.
///
/// Deserializing straight into a map would apply duplicate keys in whatever
/// order the map iterates; visiting the object keeps file order so the last
/// occurrence wins.
struct OrderedEntries(Vec<(String, i64)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object mapping tokens to integer ids")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, i64>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Publication point for the active [`Vocabulary`].
///
/// Readers take a snapshot (`Arc` clone) once and then use it lock-free; they
/// only come back when [`VocabularyCell::generation`] changes. A writer
/// replaces the whole vocabulary and bumps the generation while holding the
/// write lock, so a snapshot and its generation are always consistent.
pub struct VocabularyCell {
    current: RwLock<Arc<Vocabulary>>,
    generation: AtomicU64,
}

impl VocabularyCell {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            current: RwLock::new(Arc::new(vocabulary)),
            generation: AtomicU64::new(0),
        }
    }

    /// Current generation; incremented by every [`publish`](Self::publish).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the active vocabulary together with its generation.
    pub fn snapshot(&self) -> (Arc<Vocabulary>, u64) {
        let guard = self.current.read();
        (Arc::clone(&guard), self.generation.load(Ordering::Acquire))
    }

    /// Replaces the active vocabulary and returns the new generation.
    ///
    /// Workers holding the previous snapshot keep using it until their next
    /// burst boundary; it is freed once the last of them lets go.
    pub fn publish(&self, vocabulary: Vocabulary) -> u64 {
        let mut guard = self.current.write();
        *guard = Arc::new(vocabulary);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        #[cfg(feature = "tracing")]
        tracing::info!(generation, entries = guard.len(), "vocabulary published");

        generation
    }
}

impl fmt::Debug for VocabularyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VocabularyCell")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
