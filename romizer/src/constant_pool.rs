use crate::classfile::resolved::ClassId;
use crate::classfile::{tag, ConstantInfo, ConstantInfoPool};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to an entry of the shared [`ConstantPool`]. Two handles are equal
/// exactly when they name the same entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(u32);

impl EntryRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Utf8(Arc<String>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(EntryRef),
    Class(EntryRef),
    NameAndType { name: EntryRef, descriptor: EntryRef },
    FieldRef { class: EntryRef, name_and_type: EntryRef },
    MethodRef { class: EntryRef, name_and_type: EntryRef },
    InterfaceMethodRef { class: EntryRef, name_and_type: EntryRef },
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => tag::UTF8,
            Constant::Integer(_) => tag::INTEGER,
            Constant::Float(_) => tag::FLOAT,
            Constant::Long(_) => tag::LONG,
            Constant::Double(_) => tag::DOUBLE,
            Constant::String(_) => tag::STRING,
            Constant::Class(_) => tag::CLASS,
            Constant::NameAndType { .. } => tag::NAME_AND_TYPE,
            Constant::FieldRef { .. } => tag::FIELD,
            Constant::MethodRef { .. } => tag::METHOD,
            Constant::InterfaceMethodRef { .. } => tag::INTERFACE_METHOD,
        }
    }

    /// Pool slots (and operand stack words) taken by the constant.
    pub fn slots(&self) -> u16 {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    /// Literal values need no linking.
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_) | Constant::Float(_) | Constant::Long(_) | Constant::Double(_) | Constant::String(_)
        )
    }

    /// Names and name-and-type pairs only exist to describe other entries.
    pub fn is_descriptive(&self) -> bool {
        matches!(self, Constant::Utf8(_) | Constant::NameAndType { .. })
    }

    fn key(&self) -> ConstantKey {
        match self {
            Constant::Utf8(string) => ConstantKey::Utf8(string.clone()),
            Constant::Integer(value) => ConstantKey::Integer(*value),
            Constant::Float(value) => ConstantKey::Float(value.to_bits()),
            Constant::Long(value) => ConstantKey::Long(*value),
            Constant::Double(value) => ConstantKey::Double(value.to_bits()),
            Constant::String(utf8) => ConstantKey::String(*utf8),
            Constant::Class(name) => ConstantKey::Class(*name),
            Constant::NameAndType { name, descriptor } => ConstantKey::NameAndType(*name, *descriptor),
            Constant::FieldRef { class, name_and_type } => ConstantKey::FieldRef(*class, *name_and_type),
            Constant::MethodRef { class, name_and_type } => ConstantKey::MethodRef(*class, *name_and_type),
            Constant::InterfaceMethodRef { class, name_and_type } => {
                ConstantKey::InterfaceMethodRef(*class, *name_and_type)
            }
        }
    }
}

// Floats are compared by bit pattern so that NaN constants merge.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ConstantKey {
    Utf8(Arc<String>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String(EntryRef),
    Class(EntryRef),
    NameAndType(EntryRef, EntryRef),
    FieldRef(EntryRef, EntryRef),
    MethodRef(EntryRef, EntryRef),
    InterfaceMethodRef(EntryRef, EntryRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    pub class: ClassId,
    pub index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    pub class: ClassId,
    pub index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Class(ClassId),
    Field(FieldId),
    Method(MethodId),
}

/// Linking state of a class or member reference. Moves from `Unbound` to
/// `Bound` or `Failed`; a bound entry never changes again.
#[derive(Clone, Debug, PartialEq)]
pub enum Link {
    Unbound,
    Bound(Target),
    Failed(Arc<str>),
}

#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub constant: Constant,
    link: Link,
    references: u32,
    shared: bool,
}

impl PoolEntry {
    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn references(&self) -> u32 {
        self.references
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

/// A member reference with its names looked up.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberRef<'a> {
    pub class: EntryRef,
    pub class_name: &'a Arc<String>,
    pub name: &'a Arc<String>,
    pub descriptor: &'a Arc<String>,
}

/// The deduplicating store every class draws its constants from.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
    interned: HashMap<ConstantKey, EntryRef>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the shared entry structurally equal to `constant`, creating it
    /// on first sight.
    pub fn intern(&mut self, constant: Constant) -> EntryRef {
        let key = constant.key();

        if let Some(entry) = self.interned.get(&key) {
            return *entry;
        }

        let entry = self.push(constant, true);
        self.interned.insert(key, entry);
        entry
    }

    /// Duplicates `entry` into a new entry that is never returned by
    /// [`ConstantPool::intern`]. The copy starts with the original's link.
    pub fn local_copy(&mut self, entry: EntryRef) -> EntryRef {
        let original = &self.entries[entry.index()];
        let constant = original.constant.clone();
        let link = original.link.clone();

        let copy = self.push(constant, false);
        self.entries[copy.index()].link = link;
        copy
    }

    fn push(&mut self, constant: Constant, shared: bool) -> EntryRef {
        let entry = EntryRef(self.entries.len() as u32);
        self.entries.push(PoolEntry {
            constant,
            link: Link::Unbound,
            references: 0,
            shared,
        });
        entry
    }

    pub fn entry(&self, entry: EntryRef) -> &PoolEntry {
        &self.entries[entry.index()]
    }

    pub fn constant(&self, entry: EntryRef) -> &Constant {
        &self.entries[entry.index()].constant
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryRef, &PoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (EntryRef(index as u32), entry))
    }

    pub fn utf8(&self, entry: EntryRef) -> Option<&Arc<String>> {
        match self.constant(entry) {
            Constant::Utf8(string) => Some(string),
            _ => None,
        }
    }

    /// Body of a `String` constant.
    pub fn string(&self, entry: EntryRef) -> Option<&Arc<String>> {
        match self.constant(entry) {
            Constant::String(utf8) => self.utf8(*utf8),
            _ => None,
        }
    }

    pub fn class_name(&self, entry: EntryRef) -> Option<&Arc<String>> {
        match self.constant(entry) {
            Constant::Class(name) => self.utf8(*name),
            _ => None,
        }
    }

    pub fn name_and_type(&self, entry: EntryRef) -> Option<(&Arc<String>, &Arc<String>)> {
        match self.constant(entry) {
            Constant::NameAndType { name, descriptor } => Some((self.utf8(*name)?, self.utf8(*descriptor)?)),
            _ => None,
        }
    }

    pub fn member(&self, entry: EntryRef) -> Option<MemberRef<'_>> {
        match self.constant(entry) {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(MemberRef {
                    class: *class,
                    class_name: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            _ => None,
        }
    }

    pub fn link(&self, entry: EntryRef) -> &Link {
        &self.entries[entry.index()].link
    }

    pub fn target(&self, entry: EntryRef) -> Option<Target> {
        match self.link(entry) {
            Link::Bound(target) => Some(*target),
            _ => None,
        }
    }

    /// True when the entry can be used without further lookup at runtime.
    pub fn is_linked(&self, entry: EntryRef) -> bool {
        let entry = &self.entries[entry.index()];
        entry.constant.is_value() || matches!(entry.link, Link::Bound(_))
    }

    /// Binds an entry to its target. Binding again to the same target is a
    /// no-op; binding a bound entry elsewhere is an internal error.
    pub fn bind(&mut self, entry: EntryRef, target: Target) -> Result<()> {
        let slot = &mut self.entries[entry.index()];

        match &slot.link {
            Link::Bound(existing) if *existing == target => Ok(()),
            Link::Bound(existing) => Err(Error::internal(format!(
                "entry {} already bound to {:?}, not {:?}",
                entry.index(),
                existing,
                target
            ))),
            _ => {
                slot.link = Link::Bound(target);
                Ok(())
            }
        }
    }

    /// Records why an entry could not be bound. Bound entries are left alone.
    pub fn fail(&mut self, entry: EntryRef, reason: impl Into<Arc<str>>) {
        let slot = &mut self.entries[entry.index()];

        if !matches!(slot.link, Link::Bound(_)) {
            slot.link = Link::Failed(reason.into());
        }
    }

    pub fn clear_references(&mut self) {
        self.entries.iter_mut().for_each(|entry| entry.references = 0);
    }

    pub fn add_reference(&mut self, entry: EntryRef) {
        self.entries[entry.index()].references += 1;
    }

    pub fn references(&self, entry: EntryRef) -> u32 {
        self.entries[entry.index()].references
    }
}

/// One class's view of the shared pool: its raw constant-pool indices mapped
/// to shared entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassPool {
    slots: Vec<Option<EntryRef>>,
}

impl ClassPool {
    /// Resolves every slot of `raw` into `pool`.
    pub fn from_raw(class: &str, raw: &ConstantInfoPool, pool: &mut ConstantPool) -> Result<Self> {
        let mut class_pool = Self {
            slots: vec![None; raw.count as usize],
        };

        for index in 1..raw.count {
            if raw.get(index).is_some() {
                class_pool.resolve(class, raw, pool, index)?;
            }
        }

        Ok(class_pool)
    }

    /// Maps raw index `index` to its shared entry. Resolving the same index
    /// twice returns the same entry and leaves `pool` untouched.
    pub fn resolve(&mut self, class: &str, raw: &ConstantInfoPool, pool: &mut ConstantPool, index: u16) -> Result<EntryRef> {
        if let Some(Some(entry)) = self.slots.get(index as usize) {
            return Ok(*entry);
        }

        let info = raw.get(index).ok_or_else(|| Error::IndexOutOfRange {
            class: class.to_string(),
            index,
            len: raw.count as usize,
        })?;

        let kind = info.tag();

        let constant = match info {
            ConstantInfo::Utf8(utf8) => Constant::Utf8(utf8.string.clone()),
            ConstantInfo::Integer(value) => Constant::Integer(*value),
            ConstantInfo::Float(value) => Constant::Float(*value),
            ConstantInfo::Long(value) => Constant::Long(*value),
            ConstantInfo::Double(value) => Constant::Double(*value),
            ConstantInfo::String(string) => {
                Constant::String(self.resolve_tagged(class, raw, pool, string.string_index, tag::UTF8)?)
            }
            ConstantInfo::Class(info) => {
                Constant::Class(self.resolve_tagged(class, raw, pool, info.name_index, tag::UTF8)?)
            }
            ConstantInfo::NameAndType(info) => Constant::NameAndType {
                name: self.resolve_tagged(class, raw, pool, info.name_index, tag::UTF8)?,
                descriptor: self.resolve_tagged(class, raw, pool, info.descriptor_index, tag::UTF8)?,
            },
            ConstantInfo::FieldRef(info) | ConstantInfo::MethodRef(info) | ConstantInfo::InterfaceMethodRef(info) => {
                let owner = self.resolve_tagged(class, raw, pool, info.class_index, tag::CLASS)?;
                let name_and_type =
                    self.resolve_tagged(class, raw, pool, info.name_and_type_index, tag::NAME_AND_TYPE)?;

                match kind {
                    tag::FIELD => Constant::FieldRef { class: owner, name_and_type },
                    tag::METHOD => Constant::MethodRef { class: owner, name_and_type },
                    _ => Constant::InterfaceMethodRef { class: owner, name_and_type },
                }
            }
        };

        let entry = pool.intern(constant);

        if self.slots.len() <= index as usize {
            self.slots.resize(index as usize + 1, None);
        }
        self.slots[index as usize] = Some(entry);

        Ok(entry)
    }

    fn resolve_tagged(
        &mut self,
        class: &str,
        raw: &ConstantInfoPool,
        pool: &mut ConstantPool,
        index: u16,
        expected: u8,
    ) -> Result<EntryRef> {
        match raw.get(index) {
            Some(info) if info.tag() == expected => self.resolve(class, raw, pool, index),
            Some(info) => Err(Error::format(
                class,
                format!("constant {} has tag {}, expected {}", index, info.tag(), expected),
            )),
            None => Err(Error::IndexOutOfRange {
                class: class.to_string(),
                index,
                len: raw.count as usize,
            }),
        }
    }

    /// Entry for a raw index that was resolved when the class was read.
    pub fn entry(&self, class: &str, index: u16) -> Result<EntryRef> {
        self.get(index).ok_or_else(|| Error::IndexOutOfRange {
            class: class.to_string(),
            index,
            len: self.slots.len(),
        })
    }

    pub fn get(&self, index: u16) -> Option<EntryRef> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, EntryRef)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.map(|entry| (index as u16, entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::constant::{ClassInfo, NameAndTypeInfo, RefInfo, Utf8Info};

    fn raw_pool() -> (ConstantInfoPool, u16) {
        let mut raw = ConstantInfoPool::default();
        let class_name = raw.push(ConstantInfo::Utf8(Utf8Info::new("A")));
        let class = raw.push(ConstantInfo::Class(ClassInfo { name_index: class_name }));
        let name = raw.push(ConstantInfo::Utf8(Utf8Info::new("foo")));
        let descriptor = raw.push(ConstantInfo::Utf8(Utf8Info::new("()I")));
        let name_and_type = raw.push(ConstantInfo::NameAndType(NameAndTypeInfo {
            name_index: name,
            descriptor_index: descriptor,
        }));
        let method = raw.push(ConstantInfo::MethodRef(RefInfo {
            class_index: class,
            name_and_type_index: name_and_type,
        }));
        (raw, method)
    }

    #[test]
    fn interning_equal_content_yields_one_entry() {
        let mut pool = ConstantPool::new();
        let first = pool.intern(Constant::Utf8(Arc::new("java/lang/Object".into())));
        let second = pool.intern(Constant::Utf8(Arc::new("java/lang/Object".into())));

        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn local_copies_are_distinct_but_equal() {
        let mut pool = ConstantPool::new();
        let name = pool.intern(Constant::Utf8(Arc::new("java/lang/Throwable".into())));
        let class = pool.intern(Constant::Class(name));

        let copy_a = pool.local_copy(class);
        let copy_b = pool.local_copy(class);

        assert_ne!(copy_a, copy_b);
        assert_ne!(copy_a, class);
        assert_eq!(pool.constant(copy_a), pool.constant(copy_b));
        assert!(!pool.entry(copy_a).is_shared());
        assert_eq!(pool.intern(Constant::Class(name)), class);
    }

    #[test]
    fn resolution_is_idempotent() {
        let (raw, method) = raw_pool();
        let mut pool = ConstantPool::new();
        let mut class_pool = ClassPool::from_raw("A", &raw, &mut pool).unwrap();
        let entries = pool.len();

        let first = class_pool.resolve("A", &raw, &mut pool, method).unwrap();
        let second = class_pool.resolve("A", &raw, &mut pool, method).unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.len(), entries);

        let member = pool.member(first).unwrap();
        assert_eq!(member.class_name.as_str(), "A");
        assert_eq!(member.name.as_str(), "foo");
        assert_eq!(member.descriptor.as_str(), "()I");
    }

    #[test]
    fn two_classes_share_entries() {
        let (raw, method) = raw_pool();
        let mut pool = ConstantPool::new();
        let a = ClassPool::from_raw("A", &raw, &mut pool).unwrap();
        let b = ClassPool::from_raw("B", &raw, &mut pool).unwrap();

        assert_eq!(a.get(method), b.get(method));
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let (raw, _) = raw_pool();
        let mut pool = ConstantPool::new();
        let mut class_pool = ClassPool::default();

        let error = class_pool.resolve("A", &raw, &mut pool, 40).unwrap_err();
        assert!(matches!(error, Error::IndexOutOfRange { index: 40, .. }));
        assert!(error.is_per_class());
    }

    #[test]
    fn wrong_tag_is_a_format_error() {
        let mut raw = ConstantInfoPool::default();
        let number = raw.push(ConstantInfo::Integer(3));
        let class = raw.push(ConstantInfo::Class(ClassInfo { name_index: number }));

        let mut pool = ConstantPool::new();
        let error = ClassPool::default().resolve("A", &raw, &mut pool, class).unwrap_err();
        assert!(matches!(error, Error::Format { .. }));
    }

    #[test]
    fn bound_entries_stay_bound() {
        let mut pool = ConstantPool::new();
        let name = pool.intern(Constant::Utf8(Arc::new("A".into())));
        let class = pool.intern(Constant::Class(name));

        pool.bind(class, Target::Class(3)).unwrap();
        pool.bind(class, Target::Class(3)).unwrap();
        pool.fail(class, "ignored");

        assert_eq!(pool.target(class), Some(Target::Class(3)));
        assert!(pool.bind(class, Target::Class(4)).is_err());
    }
}
