pub mod class_table;
pub mod name_table;
pub mod string_table;

pub use class_table::{ClassName, ClassTable, NameAndTypeKey};
pub use name_table::NameTable;
pub use string_table::StringTable;

use crate::error::{Error, Result};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// The hash the target runtime uses for names: `h * 37 + c` over the bytes
/// taken as signed chars.
pub fn string_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |hash, byte| hash.wrapping_mul(37).wrapping_add(*byte as i8 as i32 as u32))
}

/// Modified UTF-8, the encoding names are stored in on the target.
pub fn java_bytes(string: &str) -> Vec<u8> {
    cesu8::to_java_cesu8(string).into_owned()
}

/// How a [`KeyTable`] hashes its items and picks the key of a new entry.
pub trait KeyStrategy<T> {
    fn hash(&self, item: &T) -> u32;

    /// Key for `item`, which is about to become the head of its bucket.
    fn assign(&self, item: &T, placement: Placement<'_, T>) -> Result<u16>;

    fn describe(&self, item: &T) -> String;
}

#[derive(Debug)]
struct Slot<T> {
    item: T,
    next: Option<usize>,
    key: u16,
}

/// A bucket-chained table whose entries carry keys derived from their place
/// in the chain. New entries go to the head of their bucket, which is also
/// how the runtime links them.
#[derive(Debug)]
pub struct KeyTable<T, S> {
    name: &'static str,
    strategy: S,
    heads: Vec<Option<usize>>,
    slots: Vec<Slot<T>>,
    index: HashMap<T, usize>,
    by_key: HashMap<u16, usize>,
    closed: bool,
}

impl<T: Hash + Eq + Clone, S: KeyStrategy<T>> KeyTable<T, S> {
    pub fn new(name: &'static str, buckets: usize, strategy: S) -> Self {
        Self {
            name,
            strategy,
            heads: vec![None; buckets],
            slots: Vec::new(),
            index: HashMap::new(),
            by_key: HashMap::new(),
            closed: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.heads.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn bucket_of(&self, item: &T) -> usize {
        self.strategy.hash(item) as usize % self.heads.len()
    }

    pub fn get<Q>(&self, item: &Q) -> Option<u16>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(item).map(|slot| self.slots[*slot].key)
    }

    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(item)
    }

    /// The key of `item`, adding it first if it is new.
    pub fn key(&mut self, item: T) -> Result<u16> {
        match self.get(&item) {
            Some(key) => Ok(key),
            None => self.insert(item),
        }
    }

    /// Adds a new item at the head of its bucket. The item must not be
    /// present yet.
    pub fn insert(&mut self, item: T) -> Result<u16> {
        if self.closed {
            return Err(Error::KeyTableClosed {
                table: self.name,
                entry: self.strategy.describe(&item),
            });
        }

        let bucket = self.bucket_of(&item);
        let next = self.heads[bucket];
        let placement = Placement {
            bucket,
            position: self.slots.len(),
            chain: self.chain_from(next),
        };
        let key = self.strategy.assign(&item, placement)?;

        let slot = self.slots.len();
        self.slots.push(Slot {
            item: item.clone(),
            next,
            key,
        });
        self.heads[bucket] = Some(slot);
        self.index.insert(item, slot);
        self.by_key.insert(key, slot);

        Ok(key)
    }

    /// Replaces the key of an entry added while the table was open.
    pub(crate) fn set_key(&mut self, item: &T, key: u16) {
        if let Some(slot) = self.index.get(item).copied() {
            let old = std::mem::replace(&mut self.slots[slot].key, key);
            if self.by_key.get(&old) == Some(&slot) {
                self.by_key.remove(&old);
            }
            self.by_key.insert(key, slot);
        }
    }

    /// Reverse lookup of a key.
    pub fn item(&self, key: u16) -> Option<&T> {
        self.by_key.get(&key).map(|slot| &self.slots[*slot].item)
    }

    /// The entry after `item` in its bucket chain.
    pub fn next<Q>(&self, item: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.index.get(item)?;
        self.slots[*slot].next.map(|next| &self.slots[next].item)
    }

    /// Head of a bucket.
    pub fn first(&self, bucket: usize) -> Option<&T> {
        self.heads.get(bucket).copied().flatten().map(|slot| &self.slots[slot].item)
    }

    pub fn chain(&self, bucket: usize) -> Chain<'_, T> {
        self.chain_from(self.heads.get(bucket).copied().flatten())
    }

    fn chain_from(&self, slot: Option<usize>) -> Chain<'_, T> {
        Chain {
            slots: &self.slots,
            current: slot,
        }
    }

    /// Entries with their keys, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, u16)> {
        self.slots.iter().map(|slot| (&slot.item, slot.key))
    }

    /// Entries bucket by bucket, each bucket head first. This is the order
    /// the runtime sees them in.
    pub fn iter_buckets(&self) -> impl Iterator<Item = (&T, u16)> + '_ {
        (0..self.heads.len()).flat_map(move |bucket| self.chain(bucket))
    }

    /// Freezes the table. Lookups keep working; inserts fail.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// The three tables an image is keyed by. Class keys draw on the name
/// table, so the two are always used together.
#[derive(Debug, Default)]
pub struct Keys {
    pub names: NameTable,
    pub classes: ClassTable,
    pub strings: StringTable,
}

impl Keys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_key(&mut self, name: &str) -> Result<u16> {
        self.classes.class_key_of(&mut self.names, name)
    }

    pub fn add_array_class(&mut self, name: &ClassName) -> Result<()> {
        self.classes.add_array_class(&mut self.names, name)
    }

    pub fn name_and_type_key(&mut self, name: &str, descriptor: &str) -> Result<NameAndTypeKey> {
        self.classes.name_and_type_key(&mut self.names, name, descriptor)
    }

    pub fn close(&mut self) {
        self.names.close();
        self.classes.close();
        self.strings.close();
    }

    pub fn is_closed(&self) -> bool {
        self.names.is_closed() && self.classes.is_closed()
    }
}

/// Where a new entry lands.
pub struct Placement<'a, T> {
    pub bucket: usize,
    /// Number of entries added before this one.
    pub position: usize,
    /// The entries already in the bucket, newest first.
    pub chain: Chain<'a, T>,
}

/// Walks one bucket chain, yielding each entry with its key.
pub struct Chain<'a, T> {
    slots: &'a [Slot<T>],
    current: Option<usize>,
}

impl<'a, T> Iterator for Chain<'a, T> {
    type Item = (&'a T, u16);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = &self.slots[self.current?];
        self.current = slot.next;
        Some((&slot.item, slot.key))
    }
}
