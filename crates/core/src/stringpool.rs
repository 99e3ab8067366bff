//! Interned String Pool
//!
//! An append-only interner for identifiers and string literals. Strings
//! enter by content and receive a dense [`StringId`]; two entries with
//! identical bytes share an id. The pool caches each string's content
//! hash so value hashing never rescans interned bytes.
//!
//! Ids are stable for the lifetime of the owning state and the pool is
//! never shrunk. The slot budget is fixed at construction; interning past
//! it is a programming error and panics.

use std::collections::HashMap;

/// A dense handle into the string pool.
pub type StringId = u32;

/// Default number of slots a state reserves for interned strings.
pub const DEFAULT_POOL_SIZE: usize = 512;

/// djb2 over the string's bytes. This is the hash used for interned and
/// heap strings alike so that equal content always hashes equal.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in bytes {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(u64::from(byte));
    }
    hash
}

struct PooledString {
    content: String,
    hash: u64,
}

/// The intern table.
pub struct StringPool {
    strings: Vec<PooledString>,
    /// Chains of candidate ids per content hash.
    buckets: HashMap<u64, Vec<StringId>>,
    capacity: usize,
}

impl StringPool {
    /// Create a pool with the given slot budget.
    pub fn new(capacity: usize) -> StringPool {
        StringPool {
            strings: Vec::new(),
            buckets: HashMap::new(),
            capacity,
        }
    }

    /// Intern a string, returning its id. Interning the same content
    /// twice returns the same id.
    ///
    /// # Panics
    ///
    /// Panics if the pool's slot budget is exhausted.
    pub fn intern(&mut self, string: &str) -> StringId {
        self.intern_bytes(string.as_bytes())
    }

    /// Intern a byte slice (must be valid UTF-8 in practice; source text
    /// is always `&str`-derived).
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> StringId {
        let hash = hash_bytes(bytes);

        if let Some(chain) = self.buckets.get(&hash) {
            for &id in chain {
                if self.strings[id as usize].content.as_bytes() == bytes {
                    return id;
                }
            }
        }

        assert!(
            self.strings.len() < self.capacity,
            "string pool exhausted ({} slots)",
            self.capacity
        );

        let id = self.strings.len() as StringId;
        self.strings.push(PooledString {
            content: String::from_utf8_lossy(bytes).into_owned(),
            hash,
        });
        self.buckets.entry(hash).or_default().push(id);
        id
    }

    /// Find the id for already-interned content without interning it.
    pub fn find(&self, string: &str) -> Option<StringId> {
        let bytes = string.as_bytes();
        let chain = self.buckets.get(&hash_bytes(bytes))?;
        chain
            .iter()
            .copied()
            .find(|&id| self.strings[id as usize].content.as_bytes() == bytes)
    }

    /// Look up the content for an id.
    pub fn lookup(&self, id: StringId) -> &str {
        &self.strings[id as usize].content
    }

    /// The cached content hash for an id.
    pub fn hash_of(&self, id: StringId) -> u64 {
        self.strings[id as usize].hash
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringPool {
    fn default() -> StringPool {
        StringPool::new(DEFAULT_POOL_SIZE)
    }
}
