use crate::classfile::resolved::{ClassId, ClassRecord, Field, Method};
use crate::constant_pool::{FieldId, MethodId};
use indexmap::IndexMap;

/// Every class known to one run, in the order it was added. A class's
/// [`ClassId`] is its position, so iteration order is stable and output is
/// deterministic.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: IndexMap<String, ClassRecord>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Adds a class and stamps its id into it and its members. A class whose
    /// name is already registered is handed back untouched.
    pub fn insert(&mut self, mut record: ClassRecord) -> Result<ClassId, ClassRecord> {
        if self.classes.contains_key(record.name.as_str()) {
            return Err(record);
        }

        let id = self.classes.len() as ClassId;
        record.id = id;

        for (index, field) in record.fields.iter_mut().enumerate() {
            field.class = id;
            field.index = index;
        }

        for (index, method) in record.methods.iter_mut().enumerate() {
            method.class = id;
            method.index = index;
        }

        self.classes.insert(record.name.to_string(), record);
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Option<ClassId> {
        self.classes.get_index_of(name).map(|index| index as ClassId)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassRecord> {
        self.classes.get_index(id as usize).map(|(_, record)| record)
    }

    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut ClassRecord> {
        self.classes.get_index_mut(id as usize).map(|(_, record)| record)
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassRecord> {
        self.classes.get(name)
    }

    /// Panics on an id this registry did not hand out.
    pub fn class(&self, id: ClassId) -> &ClassRecord {
        &self.classes[id as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassRecord {
        &mut self.classes[id as usize]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.class(id.class).fields[id.index]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.class(id.class).methods[id.index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassRecord> {
        self.classes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClassRecord> {
        self.classes.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> {
        0..self.classes.len() as ClassId
    }

    /// Superclass chain starting at `id` itself.
    pub fn ancestors(&self, id: ClassId) -> Ancestors<'_> {
        Ancestors {
            registry: self,
            next: Some(id),
            remaining: self.classes.len(),
        }
    }

    /// True when `child` is `parent` or inherits from it through superclasses.
    pub fn is_subclass(&self, child: ClassId, parent: ClassId) -> bool {
        self.ancestors(child).any(|ancestor| ancestor == parent)
    }
}

pub struct Ancestors<'a> {
    registry: &'a ClassRegistry,
    next: Option<ClassId>,
    // Bounds the walk if a cycle slipped past linking.
    remaining: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.next?;
        self.next = self.registry.get(current).and_then(|record| record.super_class);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::resolved::ArrayElement;
    use std::sync::Arc;

    fn array(name: &str) -> ClassRecord {
        ClassRecord::array(Arc::new(name.to_string()), ArrayElement::Primitive(10))
    }

    #[test]
    fn ids_follow_insertion_order() {
        let mut registry = ClassRegistry::new();

        assert_eq!(registry.insert(array("[I")).unwrap(), 0);
        assert_eq!(registry.insert(array("[J")).unwrap(), 1);
        assert_eq!(registry.id("[J"), Some(1));
        assert_eq!(registry.class(1).id, 1);
    }

    #[test]
    fn duplicates_are_handed_back() {
        let mut registry = ClassRegistry::new();
        registry.insert(array("[I")).unwrap();

        let duplicate = registry.insert(array("[I")).unwrap_err();
        assert_eq!(duplicate.name.as_str(), "[I");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ancestors_walk_superclasses() {
        let mut registry = ClassRegistry::new();
        let base = registry.insert(array("[I")).unwrap();
        let child = registry.insert(array("[J")).unwrap();
        registry.class_mut(child).super_class = Some(base);

        assert_eq!(registry.ancestors(child).collect::<Vec<_>>(), vec![child, base]);
        assert!(registry.is_subclass(child, base));
        assert!(!registry.is_subclass(base, child));
    }
}
