use crate::classfile::attribute::AttributeDecoders;
use crate::classfile::resolved::{primitive, ArrayElement, ClassId, ClassRecord};
use crate::constant_pool::{Constant, ConstantPool, EntryRef, FieldId, MethodId, Target};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::provider::ClassProvider;
use crate::reader::ClassReader;
use crate::registry::ClassRegistry;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

/// Binds the symbolic references of every registered class to classes and
/// members, loading classes through the provider as they are named.
pub struct Linker<'a> {
    registry: &'a mut ClassRegistry,
    pool: &'a mut ConstantPool,
    provider: &'a dyn ClassProvider,
    decoders: &'a AttributeDecoders,
    diagnostics: &'a mut Diagnostics,
    load_referenced: bool,
    hierarchy_linked: HashSet<ClassId>,
    unavailable: HashSet<String>,
    resolved: HashSet<EntryRef>,
}

impl<'a> Linker<'a> {
    pub fn new(
        registry: &'a mut ClassRegistry,
        pool: &'a mut ConstantPool,
        provider: &'a dyn ClassProvider,
        decoders: &'a AttributeDecoders,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            registry,
            pool,
            provider,
            decoders,
            diagnostics,
            load_referenced: true,
            hierarchy_linked: HashSet::new(),
            unavailable: HashSet::new(),
            resolved: HashSet::new(),
        }
    }

    pub fn load_referenced(mut self, load_referenced: bool) -> Self {
        self.load_referenced = load_referenced;
        self
    }

    /// Registers freshly read classes. Duplicates are reported and dropped.
    pub fn register(registry: &mut ClassRegistry, diagnostics: &mut Diagnostics, records: Vec<ClassRecord>) -> Vec<ClassId> {
        records
            .into_iter()
            .filter_map(|record| match registry.insert(record) {
                Ok(id) => Some(id),
                Err(duplicate) => {
                    diagnostics.warn(&duplicate.name, "duplicate class definition ignored");
                    None
                }
            })
            .collect()
    }

    /// Links hierarchies, binds references, checks for cycles and lays out
    /// instances. Unresolvable references are warnings; a missing superclass
    /// or a cycle is an error.
    pub fn link(mut self) -> Result<()> {
        let mut next = 0;
        while (next as usize) < self.registry.len() {
            self.link_hierarchy(next)?;
            next += 1;
        }

        let mut next = 0;
        while (next as usize) < self.registry.len() {
            self.resolve_class(next)?;
            next += 1;
        }

        self.check_circularity()?;
        self.layout();

        log::debug!("linked {} classes", self.registry.len());

        Ok(())
    }

    /// Looks a class up, reading it through the provider if it is not yet
    /// registered. A class that cannot be found or read yields `None`.
    pub fn load(&mut self, name: &str) -> Result<Option<ClassId>> {
        if let Some(id) = self.registry.id(name) {
            return Ok(Some(id));
        }

        if self.unavailable.contains(name) {
            return Ok(None);
        }

        let Some(bytes) = self.provider.get_class(name) else {
            self.unavailable.insert(name.to_string());
            return Ok(None);
        };

        let records = match ClassReader::new(self.pool, self.decoders).read(name, &bytes) {
            Ok(records) => records,
            Err(error) if error.is_per_class() => {
                self.diagnostics.error(name, error.to_string());
                self.unavailable.insert(name.to_string());
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let ids = Self::register(self.registry, self.diagnostics, records);

        for id in ids {
            self.link_hierarchy(id)?;
        }

        match self.registry.id(name) {
            Some(id) => Ok(Some(id)),
            None => {
                self.diagnostics.warn(name, "class file does not define the class it was found under");
                self.unavailable.insert(name.to_string());
                Ok(None)
            }
        }
    }

    fn link_hierarchy(&mut self, id: ClassId) -> Result<()> {
        if !self.hierarchy_linked.insert(id) {
            return Ok(());
        }

        let record = self.registry.class(id);
        let name = record.name.clone();
        let super_name = record.super_name.clone();
        let interfaces = record.interfaces.clone();

        if let Some(super_name) = super_name {
            let super_class = self.load(&super_name)?.ok_or_else(|| Error::MissingSuperclass {
                class: name.to_string(),
                superclass: super_name.to_string(),
            })?;

            self.registry.class_mut(id).super_class = Some(super_class);
        }

        for entry in interfaces {
            let Some(interface) = self.pool.class_name(entry).cloned() else {
                return Err(Error::format(name.as_str(), "interface entry is not a class"));
            };

            match self.load(&interface)? {
                Some(interface_id) => {
                    self.pool.bind(entry, Target::Class(interface_id))?;
                    self.registry.class_mut(id).interface_ids.push(interface_id);
                }
                None => self
                    .diagnostics
                    .warn(&name, format!("interface {} could not be found", interface)),
            }
        }

        Ok(())
    }

    fn check_circularity(&self) -> Result<()> {
        for id in self.registry.ids() {
            let mut seen = HashSet::new();
            let mut current = Some(id);

            while let Some(class) = current {
                if !seen.insert(class) {
                    return Err(Error::ClassCircularity {
                        class: self.registry.class(id).name.to_string(),
                    });
                }
                current = self.registry.class(class).super_class;
            }
        }

        Ok(())
    }

    /// Every class and member entry `id` depends on, in pool order, with its
    /// catch types last.
    fn referenced_entries(&self, id: ClassId) -> Vec<EntryRef> {
        let record = self.registry.class(id);

        let mut entries: Vec<EntryRef> = record
            .pool
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| {
                matches!(
                    self.pool.constant(*entry),
                    Constant::Class(_)
                        | Constant::FieldRef { .. }
                        | Constant::MethodRef { .. }
                        | Constant::InterfaceMethodRef { .. }
                )
            })
            .collect();

        for method in &record.methods {
            if let Some(code) = method.code() {
                entries.extend(code.handlers.iter().filter_map(|handler| handler.catch_type));
            }
        }

        entries
    }

    fn resolve_class(&mut self, id: ClassId) -> Result<()> {
        let from = self.registry.class(id).name.clone();

        for entry in self.referenced_entries(id) {
            match self.pool.constant(entry) {
                Constant::Class(_) => {
                    self.resolve_class_entry(&from, entry)?;
                }
                _ => self.resolve_member_entry(&from, entry)?,
            }
        }

        Ok(())
    }

    /// Binds a class entry. Array classes that are not registered yet are left
    /// unbound; they are materialised after quickening.
    fn resolve_class_entry(&mut self, from: &str, entry: EntryRef) -> Result<Option<ClassId>> {
        if let Some(Target::Class(id)) = self.pool.target(entry) {
            return Ok(Some(id));
        }

        let Some(name) = self.pool.class_name(entry).cloned() else {
            return Err(Error::internal(format!("entry {} is not a class", entry.index())));
        };

        let found = if name.starts_with('[') {
            self.load_element(&name)?;
            self.registry.id(&name)
        } else if self.load_referenced {
            self.load(&name)?
        } else {
            self.registry.id(&name)
        };

        match found {
            Some(id) => {
                self.pool.bind(entry, Target::Class(id))?;
            }
            None if name.starts_with('[') => {}
            None => {
                if self.resolved.insert(entry) {
                    self.diagnostics.warn(from, format!("class {} could not be found", name));
                }
                self.pool.fail(entry, format!("class {} not found", name));
            }
        }

        Ok(found)
    }

    /// Makes sure the element class of an array of objects is available.
    fn load_element(&mut self, name: &str) -> Result<()> {
        let element = name.trim_start_matches('[');

        if let Some(class) = element.strip_prefix('L').and_then(|rest| rest.strip_suffix(';')) {
            if self.load_referenced && self.load(class)?.is_none() {
                self.diagnostics.warn(name, format!("element class {} could not be found", class));
            }
        }

        Ok(())
    }

    fn resolve_member_entry(&mut self, from: &str, entry: EntryRef) -> Result<()> {
        if self.pool.target(entry).is_some() || !self.resolved.insert(entry) {
            return Ok(());
        }

        let (class_entry, class_name, name, descriptor) = match self.pool.member(entry) {
            Some(member) => (
                member.class,
                member.class_name.clone(),
                member.name.clone(),
                member.descriptor.clone(),
            ),
            None => return Err(Error::internal(format!("entry {} is not a member reference", entry.index()))),
        };

        let owner = if class_name.starts_with('[') {
            self.resolve_class_entry(from, class_entry)?;
            self.load(JAVA_LANG_OBJECT)?
        } else {
            self.resolve_class_entry(from, class_entry)?
        };

        let Some(owner) = owner else {
            self.pool.fail(entry, format!("class {} not found", class_name));
            return Ok(());
        };

        let target = match self.pool.constant(entry) {
            Constant::FieldRef { .. } => find_field(self.registry, owner, &name, &descriptor).map(Target::Field),
            _ => find_method(self.registry, owner, &name, &descriptor).map(Target::Method),
        };

        match target {
            Some(target) => self.pool.bind(entry, target)?,
            None => {
                self.diagnostics.warn(
                    from,
                    format!("could not resolve {}.{}:{}", class_name, name, descriptor),
                );
                self.pool.fail(entry, format!("no member {}:{} in {}", name, descriptor, class_name));
            }
        }

        Ok(())
    }

    /// Assigns cell offsets to instance fields, superclass fields first.
    fn layout(&mut self) {
        let mut done = vec![false; self.registry.len()];

        for id in self.registry.ids() {
            layout_class(self.registry, id, &mut done);
        }
    }
}

fn layout_class(registry: &mut ClassRegistry, id: ClassId, done: &mut [bool]) -> u16 {
    if done[id as usize] {
        return registry.class(id).instance_size;
    }

    let mut offset = match registry.class(id).super_class {
        Some(super_class) => layout_class(registry, super_class, done),
        None => 0,
    };

    let record = registry.class_mut(id);

    for field in record.fields.iter_mut().filter(|field| !field.is_static()) {
        field.offset = offset;
        offset += field.cells();
    }

    record.instance_size = offset;
    done[id as usize] = true;
    offset
}

/// Searches `class` and its superclasses, then breadth first through every
/// interface they implement. The first match wins.
fn search(
    registry: &ClassRegistry,
    class: ClassId,
    find: impl Fn(&ClassRecord) -> Option<usize>,
) -> Option<(ClassId, usize)> {
    for ancestor in registry.ancestors(class) {
        if let Some(index) = find(registry.class(ancestor)) {
            return Some((ancestor, index));
        }
    }

    let mut queue: VecDeque<ClassId> = registry
        .ancestors(class)
        .flat_map(|ancestor| registry.class(ancestor).interface_ids.clone())
        .collect();
    let mut seen = HashSet::new();

    while let Some(interface) = queue.pop_front() {
        if !seen.insert(interface) {
            continue;
        }

        let record = registry.class(interface);
        if let Some(index) = find(record) {
            return Some((interface, index));
        }

        queue.extend(record.interface_ids.iter().copied());
    }

    None
}

pub fn find_field(registry: &ClassRegistry, class: ClassId, name: &str, descriptor: &str) -> Option<FieldId> {
    search(registry, class, |record| record.find_field(name, descriptor)).map(|(class, index)| FieldId { class, index })
}

pub fn find_method(registry: &ClassRegistry, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
    search(registry, class, |record| record.find_method(name, descriptor))
        .map(|(class, index)| MethodId { class, index })
}

/// What an array class holds: the class one dimension down, or the type
/// code of a one-dimensional primitive array.
pub fn array_element(name: &str) -> Option<ArrayElement> {
    let element = name.strip_prefix('[')?;

    match element.as_bytes() {
        [b'[', ..] => Some(ArrayElement::Class(Arc::new(element.to_string()))),
        [b'L', .., b';'] => Some(ArrayElement::Class(Arc::new(element[1..element.len() - 1].to_string()))),
        [c] => primitive::from_descriptor(*c).map(ArrayElement::Primitive),
        _ => None,
    }
}

/// Registers an array class for every array class constant still unbound
/// after quickening and binds those constants. Returns how many classes were
/// made.
pub fn materialise_arrays(registry: &mut ClassRegistry, pool: &mut ConstantPool) -> Result<usize> {
    let entries: Vec<EntryRef> = registry
        .iter()
        .flat_map(|record| record.class_entries(pool))
        .filter(|entry| pool.target(*entry).is_none())
        .collect();

    let object = registry.id(JAVA_LANG_OBJECT);
    let mut made = 0;

    for entry in entries {
        let Some(name) = pool.class_name(entry).filter(|name| name.starts_with('[')).cloned() else {
            continue;
        };

        let id = match registry.id(&name) {
            Some(id) => id,
            None => {
                let element = array_element(&name)
                    .ok_or_else(|| Error::internal(format!("malformed array class name {}", name)))?;

                let mut record = ClassRecord::array(name.clone(), element);
                record.super_class = object;

                made += 1;
                registry
                    .insert(record)
                    .map_err(|_| Error::internal(format!("array class {} registered twice", name)))?
            }
        };

        pool.bind(entry, Target::Class(id))?;
    }

    if made > 0 {
        log::debug!("materialised {} array classes", made);
    }

    Ok(made)
}
