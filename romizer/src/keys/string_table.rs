use super::{string_hash, KeyStrategy, KeyTable, Placement};
use crate::error::{Error, Result};
use std::sync::Arc;

pub const STRING_BUCKETS: usize = 32;

/// Interned strings are numbered in the order they were first seen.
#[derive(Debug, Default)]
pub struct StringKeys;

impl KeyStrategy<Arc<String>> for StringKeys {
    fn hash(&self, item: &Arc<String>) -> u32 {
        string_hash(item.as_bytes())
    }

    fn assign(&self, item: &Arc<String>, placement: Placement<'_, Arc<String>>) -> Result<u16> {
        u16::try_from(placement.position).map_err(|_| Error::KeyOverflow {
            table: "InternStringTable",
            entry: self.describe(item),
        })
    }

    fn describe(&self, item: &Arc<String>) -> String {
        item.to_string()
    }
}

/// Where a string's characters sit in the shared character array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharRange {
    pub offset: usize,
    pub length: usize,
}

/// Java string constants, stored as one character array with each string
/// pointing into it.
#[derive(Debug)]
pub struct StringTable {
    table: KeyTable<Arc<String>, StringKeys>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            table: KeyTable::new("InternStringTable", STRING_BUCKETS, StringKeys),
        }
    }

    pub fn intern(&mut self, string: Arc<String>) -> Result<u16> {
        self.table.key(string)
    }

    pub fn index(&self, string: &str) -> Option<u16> {
        self.table.iter().find(|(item, _)| item.as_str() == string).map(|(_, key)| key)
    }

    /// `&stringArrayInternal[i]` for an interned string.
    pub fn reference(&self, string: &str) -> Result<String> {
        self.index(string)
            .map(reference)
            .ok_or_else(|| Error::internal(format!("string \"{}\" was never interned", string)))
    }

    /// All characters in string order, with each string's place in them.
    pub fn arrange(&self) -> (Vec<u16>, Vec<CharRange>) {
        let mut chars = Vec::new();
        let mut ranges = Vec::with_capacity(self.table.len());

        for (string, _) in self.table.iter() {
            let offset = chars.len();
            chars.extend(string.encode_utf16());
            ranges.push(CharRange {
                offset,
                length: chars.len() - offset,
            });
        }

        (chars, ranges)
    }

    pub fn strings(&self) -> impl Iterator<Item = &Arc<String>> {
        self.table.iter().map(|(string, _)| string)
    }

    pub fn next(&self, string: &Arc<String>) -> Option<u16> {
        self.table.next(string).and_then(|next| self.table.get(next))
    }

    pub fn table(&self) -> &KeyTable<Arc<String>, StringKeys> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn close(&mut self) {
        self.table.close();
    }
}

pub fn reference(index: u16) -> String {
    format!("&stringArrayInternal[{}]", index)
}
