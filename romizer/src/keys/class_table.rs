use super::name_table::NameTable;
use super::{java_bytes, string_hash, KeyStrategy, KeyTable, Placement};
use crate::error::{Error, Result};
use std::fmt;

pub const CLASS_BUCKETS: usize = 32;

/// Array depth sits above the 13-bit base key.
pub const ARRAY_SHIFT: u16 = 13;
pub const BASE_KEY_MASK: u16 = 0x1FFF;
/// Depth value standing for "deeper than 6": the base key then names the
/// whole array class.
pub const MAX_ARRAY_DEPTH: u16 = 7;
/// Class keys may not reach the runtime's new-object flag bit.
const NEW_OBJECT_FLAG: u16 = 0x1000;
/// Stored for a shallow array until its element class has a key.
const PENDING: u16 = 1 << ARRAY_SHIFT;

/// A class name split the way the runtime stores it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassName {
    pub depth: u16,
    /// Element type character of a primitive array.
    pub base_type: Option<u8>,
    pub package: Option<String>,
    pub base: Option<String>,
}

impl ClassName {
    pub fn parse(name: &str) -> Option<Self> {
        let depth = name.bytes().take_while(|byte| *byte == b'[').count();

        if depth == 0 {
            if name.is_empty() {
                return None;
            }
            let (package, base) = match name.rfind('/') {
                Some(slash) => (Some(name[..slash].to_string()), name[slash + 1..].to_string()),
                None => (None, name.to_string()),
            };
            return Some(Self {
                depth: 0,
                base_type: None,
                package,
                base: Some(base),
            });
        }

        let element = &name[depth..];
        if element.len() == 1 {
            return Some(Self {
                depth: depth as u16,
                base_type: Some(element.as_bytes()[0]),
                package: None,
                base: None,
            });
        }

        let inner = element.strip_prefix('L')?.strip_suffix(';')?;
        let inner = Self::parse(inner).filter(|inner| inner.depth == 0)?;

        Some(Self {
            depth: depth as u16,
            ..inner
        })
    }

    pub fn is_array(&self) -> bool {
        self.depth > 0
    }

    pub fn is_primitive_array(&self) -> bool {
        self.base_type.is_some()
    }

    pub fn with_depth(&self, depth: u16) -> Self {
        Self {
            depth,
            ..self.clone()
        }
    }

    /// The name the runtime files the class under next to its package:
    /// the base name, wrapped in array brackets for arrays.
    pub fn full_base_name(&self) -> String {
        let mut name = "[".repeat(self.depth as usize);

        match (&self.base_type, &self.base) {
            (Some(base_type), _) => name.push(*base_type as char),
            (None, Some(base)) if self.depth > 0 => {
                name.push('L');
                name.push_str(base);
                name.push(';');
            }
            (None, Some(base)) => name.push_str(base),
            (None, None) => {}
        }

        name
    }

    /// Hash the runtime computes from the package and base names.
    pub fn hash_code(&self) -> u32 {
        let mut hash = string_hash(&java_bytes(&self.full_base_name())).wrapping_add(37);
        if let Some(package) = &self.package {
            hash = hash.wrapping_add(string_hash(&java_bytes(package)).wrapping_mul(3));
        }
        hash
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str("[")?;
        }

        if let Some(base_type) = self.base_type {
            return write!(f, "{}", base_type as char);
        }

        if self.depth > 0 {
            f.write_str("L")?;
        }
        if let Some(package) = &self.package {
            write!(f, "{}/", package)?;
        }
        if let Some(base) = &self.base {
            f.write_str(base)?;
        }
        if self.depth > 0 {
            f.write_str(";")?;
        }

        Ok(())
    }
}

/// Keys of classes. Arrays up to depth 6 are fixed up afterwards with their
/// structural key; everything else chains off the last depth 0 (or depth 7)
/// key of its bucket.
#[derive(Debug, Default)]
pub struct ClassKeys;

impl KeyStrategy<ClassName> for ClassKeys {
    fn hash(&self, item: &ClassName) -> u32 {
        item.hash_code()
    }

    fn assign(&self, item: &ClassName, placement: Placement<'_, ClassName>) -> Result<u16> {
        if item.is_array() && item.depth < MAX_ARRAY_DEPTH {
            return Ok(PENDING);
        }

        let mut key = 256 + placement.bucket as u16;
        for (_, value) in placement.chain {
            let depth = value >> ARRAY_SHIFT;
            if depth == 0 || depth == MAX_ARRAY_DEPTH {
                key = (value & BASE_KEY_MASK) + CLASS_BUCKETS as u16;
                break;
            }
        }

        if key & NEW_OBJECT_FLAG != 0 {
            return Err(Error::KeyOverflow {
                table: "ClassTable",
                entry: self.describe(item),
            });
        }

        Ok(key)
    }

    fn describe(&self, item: &ClassName) -> String {
        item.to_string()
    }
}

/// The two keys of a member: its name and its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NameAndTypeKey {
    pub name: u16,
    pub type_: u16,
}

impl fmt::Display for NameAndTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameAndTypeKey(0x{:04x}, 0x{:04x})", self.name, self.type_)
    }
}

#[derive(Debug)]
pub struct ClassTable {
    table: KeyTable<ClassName, ClassKeys>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            table: KeyTable::new("ClassTable", CLASS_BUCKETS, ClassKeys),
        }
    }

    pub fn table(&self) -> &KeyTable<ClassName, ClassKeys> {
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

    pub fn next(&self, name: &ClassName) -> Option<&ClassName> {
        self.table.next(name)
    }

    /// Class names in table order, bucket by bucket.
    pub fn names(&self) -> impl Iterator<Item = &ClassName> + '_ {
        self.table.iter_buckets().map(|(name, _)| name)
    }

    fn add(&mut self, names: &mut NameTable, name: &ClassName) -> Result<()> {
        if self.table.contains(name) {
            return Ok(());
        }

        self.table.insert(name.clone())?;

        if let Some(package) = &name.package {
            names.key(package)?;
        }
        names.key(&name.full_base_name())?;

        if name.is_array() && name.depth < MAX_ARRAY_DEPTH {
            let key = self.class_key(names, name)?;
            self.table.set_key(name, key);
            return Ok(());
        }

        if name.is_array() {
            self.add_array_class(names, &name.with_depth(name.depth - 1))?;
        }

        Ok(())
    }

    fn stored_key(&mut self, names: &mut NameTable, name: &ClassName) -> Result<u16> {
        if self.table.get(name).is_none() {
            self.add(names, name)?;
        }
        self.table
            .get(name)
            .ok_or_else(|| Error::internal(format!("class {} has no key", name)))
    }

    /// Adds an array class and every array class it is built from.
    pub fn add_array_class(&mut self, names: &mut NameTable, name: &ClassName) -> Result<()> {
        let last = if name.is_primitive_array() { 1 } else { 0 };
        let mut name = name.clone();

        loop {
            self.add(names, &name)?;
            if name.depth <= last {
                return Ok(());
            }
            name = name.with_depth(name.depth - 1);
        }
    }

    /// The key the runtime knows a class by: array depth in the top three
    /// bits, base class key or primitive type character below.
    pub fn class_key(&mut self, names: &mut NameTable, name: &ClassName) -> Result<u16> {
        if name.depth >= MAX_ARRAY_DEPTH {
            return Ok(self.stored_key(names, name)? | MAX_ARRAY_DEPTH << ARRAY_SHIFT);
        }

        if let Some(base_type) = name.base_type {
            return Ok((name.depth << ARRAY_SHIFT) + base_type as u16);
        }

        let base = name.with_depth(0);
        Ok(self.stored_key(names, &base)? | name.depth << ARRAY_SHIFT)
    }

    pub fn class_key_of(&mut self, names: &mut NameTable, name: &str) -> Result<u16> {
        let parsed = ClassName::parse(name).ok_or_else(|| Error::internal(format!("malformed class name {}", name)))?;
        self.class_key(names, &parsed)
    }

    /// [`Self::class_key`] of a class already in the table, without adding
    /// anything.
    pub fn lookup_key(&self, name: &ClassName) -> Option<u16> {
        if name.depth >= MAX_ARRAY_DEPTH {
            return self.table.get(name).map(|key| key | MAX_ARRAY_DEPTH << ARRAY_SHIFT);
        }

        if let Some(base_type) = name.base_type {
            return Some((name.depth << ARRAY_SHIFT) + base_type as u16);
        }

        self.table.get(&name.with_depth(0)).map(|key| key | name.depth << ARRAY_SHIFT)
    }

    /// The class named by a stored key.
    pub fn class_name(&self, key: u16) -> Option<&ClassName> {
        self.table.item(key)
    }

    pub fn field_signature_key(&mut self, names: &mut NameTable, signature: &str) -> Result<u16> {
        let bytes = signature.as_bytes();

        match bytes {
            [single] if single.is_ascii_uppercase() => Ok((*single & 0x7F) as u16),
            [b'[', ..] => self.class_key_of(names, signature),
            [b'L', .., b';'] => self.class_key_of(names, &signature[1..signature.len() - 1]),
            _ => Err(Error::internal(format!("unknown signature {}", signature))),
        }
    }

    pub fn name_and_type_key(&mut self, names: &mut NameTable, name: &str, descriptor: &str) -> Result<NameAndTypeKey> {
        let name = names.key(name)?;
        let type_ = if descriptor.starts_with('(') {
            let encoded = self.encode_method_signature(names, descriptor)?;
            names.key_bytes(encoded)?
        } else {
            self.field_signature_key(names, descriptor)?
        };

        Ok(NameAndTypeKey { name, type_ })
    }

    /// Compact form of a method descriptor: the argument count, then each
    /// type as its primitive character or as the two bytes of its class key
    /// (behind an `L` when the high byte could pass for a primitive).
    pub fn encode_method_signature(&mut self, names: &mut NameTable, descriptor: &str) -> Result<Vec<u8>> {
        let malformed = || Error::internal(format!("malformed method descriptor {}", descriptor));

        let close = descriptor.find(')').ok_or_else(malformed)?;
        let mut encoded = vec![0];
        let mut index = 1;
        let mut count = 0u8;

        while index < close {
            index = self.encode_type(names, descriptor, index, &mut encoded)?;
            count += 1;
        }

        encoded[0] = count;
        let end = self.encode_type(names, descriptor, close + 1, &mut encoded)?;
        if end != descriptor.len() {
            return Err(malformed());
        }

        Ok(encoded)
    }

    fn encode_type(&mut self, names: &mut NameTable, descriptor: &str, index: usize, encoded: &mut Vec<u8>) -> Result<usize> {
        let malformed = || Error::internal(format!("malformed method descriptor {}", descriptor));
        let bytes = descriptor.as_bytes();

        let end = match bytes.get(index).ok_or_else(malformed)? {
            b'L' => index + descriptor[index..].find(';').ok_or_else(malformed)? + 1,
            b'[' => {
                let mut end = index + 1;
                while bytes.get(end) == Some(&b'[') {
                    end += 1;
                }
                if bytes.get(end) == Some(&b'L') {
                    end + descriptor[end..].find(';').ok_or_else(malformed)? + 1
                } else {
                    end + 1
                }
            }
            primitive => {
                encoded.push(*primitive);
                return Ok(index + 1);
            }
        };

        let key = self.field_signature_key(names, descriptor.get(index..end).ok_or_else(malformed)?)?;
        let high = (key >> 8) as u8;
        if high.is_ascii_uppercase() {
            encoded.push(b'L');
        }
        encoded.push(high);
        encoded.push(key as u8);

        Ok(end)
    }

    /// Inverse of [`Self::encode_method_signature`]. `None` when the bytes
    /// are not an encoded signature of known classes.
    pub fn decode_method_signature(&self, encoded: &[u8]) -> Option<String> {
        let count = *encoded.first()?;
        let mut index = 1;
        let mut result = String::from("(");

        for _ in 0..count {
            index = self.decode_type(encoded, index, &mut result)?;
        }
        result.push(')');

        index = self.decode_type(encoded, index, &mut result)?;
        (index == encoded.len()).then_some(result)
    }

    fn decode_type(&self, encoded: &[u8], mut index: usize, result: &mut String) -> Option<usize> {
        let mut first = *encoded.get(index)?;
        index += 1;

        let (depth, base) = if first.is_ascii_uppercase() && first != b'L' {
            (0, first as u16)
        } else {
            if first == b'L' {
                first = *encoded.get(index)?;
                index += 1;
            }
            let second = *encoded.get(index)?;
            index += 1;

            let key = (first as u16) << 8 | second as u16;
            (key >> ARRAY_SHIFT, key & BASE_KEY_MASK)
        };

        if depth == MAX_ARRAY_DEPTH {
            result.push_str(&self.class_name(base)?.to_string());
            return Some(index);
        }

        for _ in 0..depth {
            result.push('[');
        }

        if base < 256 && (base as u8).is_ascii_uppercase() {
            result.push(base as u8 as char);
        } else {
            result.push('L');
            result.push_str(&self.class_name(base)?.to_string());
            result.push(';');
        }

        Some(index)
    }
}
