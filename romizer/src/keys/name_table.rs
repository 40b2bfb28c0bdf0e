use super::{java_bytes, string_hash, KeyStrategy, KeyTable, Placement};
use crate::error::{Error, Result};

pub const NAME_BUCKETS: usize = 256;

/// Keys of names: the first entry of a bucket gets `bucket + 256`, every
/// later one the key of the entry it displaces plus 256, so that
/// `key % 256` is always the bucket.
#[derive(Debug, Default)]
pub struct NameKeys;

impl KeyStrategy<Vec<u8>> for NameKeys {
    fn hash(&self, item: &Vec<u8>) -> u32 {
        string_hash(item)
    }

    fn assign(&self, item: &Vec<u8>, mut placement: Placement<'_, Vec<u8>>) -> Result<u16> {
        let key = match placement.chain.next() {
            None => placement.bucket as u32 + NAME_BUCKETS as u32,
            Some((_, next)) => next as u32 + NAME_BUCKETS as u32,
        };

        u16::try_from(key).map_err(|_| Error::KeyOverflow {
            table: "UTFStringTable",
            entry: self.describe(item),
        })
    }

    fn describe(&self, item: &Vec<u8>) -> String {
        String::from_utf8_lossy(item).into_owned()
    }
}

/// Every name the image refers to: package and class names, member names,
/// encoded signatures and long stack map frames.
#[derive(Debug)]
pub struct NameTable {
    table: KeyTable<Vec<u8>, NameKeys>,
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    pub fn new() -> Self {
        Self {
            table: KeyTable::new("UTFStringTable", NAME_BUCKETS, NameKeys),
        }
    }

    pub fn key(&mut self, name: &str) -> Result<u16> {
        self.key_bytes(java_bytes(name))
    }

    /// Key of a raw byte string, such as an encoded signature.
    pub fn key_bytes(&mut self, bytes: Vec<u8>) -> Result<u16> {
        self.table.key(bytes)
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.table.get(java_bytes(name).as_slice())
    }

    pub fn get_bytes(&self, bytes: &[u8]) -> Option<u16> {
        self.table.get(bytes)
    }

    /// The `AllUTFStrings` member holding `name`.
    pub fn ustring(&self, name: &str) -> Result<String> {
        self.get(name)
            .map(ustring)
            .ok_or_else(|| Error::internal(format!("name {} was never registered", name)))
    }

    pub fn table(&self) -> &KeyTable<Vec<u8>, NameKeys> {
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

    pub fn is_closed(&self) -> bool {
        self.table.is_closed()
    }
}

/// Hex form of a name key, as used in member names of `AllUTFStrings`.
pub fn key_suffix(key: u16) -> String {
    format!("{:04x}", key)
}

pub fn ustring(key: u16) -> String {
    format!("&AllUTFStrings.U{}", key_suffix(key))
}
