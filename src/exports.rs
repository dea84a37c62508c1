//! The host export table modules link against.
//!
//! Undefined symbols of a module resolve only against one table of host
//! functions and data. Symbols are never looked up in other modules.

use crate::TargetAddr;
use alloc::{string::String, sync::Arc, vec::Vec};
use core::hash::{Hash, Hasher};
use foldhash::{SharedSeed, fast::FoldHasher};
use hashbrown::HashTable;

/// Resolves host symbol names to target addresses.
pub trait SymbolLookup {
    /// Finds the address of a symbol by its name.
    fn lookup(&self, name: &str) -> Option<TargetAddr>;
}

impl<F: ?Sized> SymbolLookup for F
where
    F: Fn(&str) -> Option<TargetAddr>,
{
    fn lookup(&self, name: &str) -> Option<TargetAddr> {
        self(name)
    }
}

impl<S: SymbolLookup + ?Sized> SymbolLookup for Arc<S> {
    fn lookup(&self, name: &str) -> Option<TargetAddr> {
        (**self).lookup(name)
    }
}

impl SymbolLookup for () {
    fn lookup(&self, _name: &str) -> Option<TargetAddr> {
        None
    }
}

struct ExportEntry {
    name: String,
    addr: TargetAddr,
}

const HASHER: FoldHasher<'static> = FoldHasher::with_seed(0, SharedSeed::global_fixed());

/// A name to address table, usually built once at startup from a
/// generated list.
#[derive(Default)]
pub struct HostExports {
    map: HashTable<ExportEntry>,
}

impl HostExports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(name, address)` pairs. Later duplicates
    /// replace earlier ones.
    pub fn from_table<'a>(table: impl IntoIterator<Item = (&'a str, TargetAddr)>) -> Self {
        let mut exports = Self::new();
        for (name, addr) in table {
            exports.insert(name, addr);
        }
        exports
    }

    /// Adds or replaces an export, returning the previous address.
    pub fn insert(&mut self, name: impl Into<String>, addr: TargetAddr) -> Option<TargetAddr> {
        let name = name.into();
        let hash = hash(name.as_bytes());
        match self
            .map
            .find_mut(hash, |entry| entry.name == name)
        {
            Some(entry) => Some(core::mem::replace(&mut entry.addr, addr)),
            None => {
                self.map
                    .insert_unique(hash, ExportEntry { name, addr }, |e| hash_of(e));
                None
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All exports sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TargetAddr)> {
        let mut entries: Vec<_> = self
            .map
            .iter()
            .map(|e| (e.name.as_str(), e.addr))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }
}

impl SymbolLookup for HostExports {
    fn lookup(&self, name: &str) -> Option<TargetAddr> {
        self.map
            .find(hash(name.as_bytes()), |entry| entry.name == name)
            .map(|entry| entry.addr)
    }
}

#[inline]
fn hash(name: &[u8]) -> u64 {
    let mut hasher = HASHER;
    name.hash(&mut hasher);
    hasher.finish()
}

#[inline]
fn hash_of(entry: &ExportEntry) -> u64 {
    hash(entry.name.as_bytes())
}
