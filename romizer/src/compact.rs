use crate::classfile::resolved::ClassRecord;
use crate::constant_pool::{ConstantPool, EntryRef};
use crate::error::{Error, Result};
use crate::registry::ClassRegistry;
use std::collections::{HashMap, HashSet};

/// Entries a class still needs at run time: pool-dependent code operands,
/// catch types and interfaces.
fn roots(record: &ClassRecord) -> Result<Vec<EntryRef>> {
    let mut roots = Vec::new();

    for method in &record.methods {
        let Some(code) = method.code() else {
            continue;
        };

        for pool_ref in &code.pool_refs {
            let index = pool_ref
                .index(&code.bytes)
                .ok_or_else(|| Error::internal(format!("{}: operand at {} is truncated", record.name, pool_ref.offset)))?;
            roots.push(record.pool.entry(&record.name, index)?);
        }

        roots.extend(code.handlers.iter().filter_map(|handler| handler.catch_type));
    }

    roots.extend(record.interfaces.iter().copied());
    Ok(roots)
}

/// Recounts references from every class's roots.
pub fn count_references(registry: &ClassRegistry, pool: &mut ConstantPool) -> Result<()> {
    pool.clear_references();

    for record in registry.iter() {
        for entry in roots(record)? {
            pool.add_reference(entry);
        }
    }

    Ok(())
}

/// Slot to entry map of a compacted pool. Slot 0 and the slot after a long
/// or double stay empty.
pub fn layout(entries: impl IntoIterator<Item = EntryRef>, pool: &ConstantPool) -> Vec<Option<EntryRef>> {
    let mut constants = vec![None];

    for entry in entries {
        constants.push(Some(entry));
        if pool.constant(entry).slots() == 2 {
            constants.push(None);
        }
    }

    constants
}

pub fn index_map(constants: &[Option<EntryRef>]) -> HashMap<EntryRef, u16> {
    let mut map = HashMap::with_capacity(constants.len());

    for (index, entry) in constants.iter().enumerate() {
        if let Some(entry) = entry {
            map.entry(*entry).or_insert(index as u16);
        }
    }

    map
}

/// Builds each class's emitted pool and renumbers its code operands to
/// match. Names and name-and-type pairs are never emitted; with `compact`
/// set, neither is anything the class no longer refers to.
pub fn compact_pools(registry: &mut ClassRegistry, pool: &mut ConstantPool, compact: bool) -> Result<()> {
    count_references(registry, pool)?;

    let mut dropped = 0;

    for record in registry.iter_mut() {
        let used: HashSet<EntryRef> = roots(record)?.into_iter().collect();

        let mut seen = HashSet::new();
        let mut shared = Vec::new();

        for (_, entry) in record.pool.iter() {
            let constant = pool.constant(entry);

            if constant.is_descriptive() || !seen.insert(entry) {
                continue;
            }

            if compact && !used.contains(&entry) {
                dropped += 1;
                continue;
            }

            shared.push(entry);
        }

        let catch_types = record
            .methods
            .iter()
            .filter_map(|method| method.code())
            .flat_map(|code| code.handlers.iter().filter_map(|handler| handler.catch_type))
            .collect::<Vec<_>>();

        let constants = layout(shared.into_iter().chain(catch_types), pool);
        let index = index_map(&constants);

        let name = record.name.clone();
        let class_pool = record.pool.clone();

        for method in record.methods.iter_mut() {
            let Some(code) = method.code_mut() else {
                continue;
            };

            for pool_ref in &code.pool_refs {
                let old = pool_ref
                    .index(&code.bytes)
                    .ok_or_else(|| Error::internal(format!("{}: operand at {} is truncated", name, pool_ref.offset)))?;
                let entry = class_pool.entry(&name, old)?;

                let new = *index.get(&entry).ok_or_else(|| {
                    Error::internal(format!("{}: entry for operand at {} was dropped", name, pool_ref.offset))
                })?;

                if !pool_ref.wide && new > u8::MAX as u16 {
                    return Err(Error::internal(format!("{}: ldc operand {} no longer fits a byte", name, new)));
                }

                pool_ref.set_index(&mut code.bytes, new);
            }
        }

        record.constants = constants;
    }

    log::debug!("compacted constant pools, {} unused entries dropped", dropped);

    Ok(())
}
