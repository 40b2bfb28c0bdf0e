use crate::bytecode::{Opcode, PoolRef};
use crate::classfile::attribute::Code;
use crate::classfile::resolved::{AccessFlags, ClassId, FieldType};
use crate::constant_pool::{ConstantPool, EntryRef, Target};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::registry::ClassRegistry;
use byteorder::{BigEndian, ByteOrder};

/// What happened to one constant pool operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Rewritten to a fast form whose operand is an instance cell index; the
    /// pool is no longer involved.
    Detached { offset: u32, opcode: Opcode, cell: u16 },
    /// Rewritten to a fast form that still indexes the pool.
    Rewritten { offset: u32, opcode: Opcode },
    /// No faster form applies.
    Kept { offset: u32 },
    /// The reference did not link, so the instruction is left alone.
    Unresolved { offset: u32, entry: EntryRef },
}

impl Outcome {
    pub fn offset(&self) -> u32 {
        match self {
            Outcome::Detached { offset, .. }
            | Outcome::Rewritten { offset, .. }
            | Outcome::Kept { offset }
            | Outcome::Unresolved { offset, .. } => *offset,
        }
    }

    pub fn is_pool_dependent(&self) -> bool {
        !matches!(self, Outcome::Detached { .. })
    }
}

/// A method body after quickening.
#[derive(Clone, Debug, PartialEq)]
pub struct Quickened {
    pub bytes: Vec<u8>,
    pub outcomes: Vec<Outcome>,
    /// Operands that still name pool entries.
    pub pool_refs: Vec<PoolRef>,
}

impl Quickened {
    pub fn is_complete(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|outcome| matches!(outcome, Outcome::Unresolved { .. }))
    }
}

/// Rewrites the linked instructions of a class's methods into fast forms.
pub struct Quickener<'a> {
    registry: &'a ClassRegistry,
    pool: &'a ConstantPool,
}

impl<'a> Quickener<'a> {
    pub fn new(registry: &'a ClassRegistry, pool: &'a ConstantPool) -> Self {
        Self { registry, pool }
    }

    /// Quickens one method body of `class`. Never touches the input.
    pub fn quicken(&self, class: ClassId, code: &Code) -> Result<Quickened> {
        let record = self.registry.class(class);
        let mut bytes = code.bytes.clone();
        let mut outcomes = Vec::with_capacity(code.pool_refs.len());
        let mut pool_refs = Vec::with_capacity(code.pool_refs.len());

        for pool_ref in &code.pool_refs {
            let offset = pool_ref.offset as usize;
            let opcode = Opcode::decode(bytes[offset]).ok_or_else(|| {
                Error::format(record.name.as_str(), format!("invalid opcode at offset {}", offset))
            })?;

            if !pool_ref.wide {
                if opcode != Opcode::Ldc {
                    return Err(Error::format(
                        record.name.as_str(),
                        format!("unexpected opcode {} in ldc list at offset {}", opcode, offset),
                    ));
                }

                outcomes.push(Outcome::Kept {
                    offset: pool_ref.offset,
                });
                pool_refs.push(*pool_ref);
                continue;
            }

            let index = pool_ref
                .index(&bytes)
                .ok_or_else(|| Error::format(record.name.as_str(), format!("truncated operand at {}", offset)))?;
            let entry = record.pool.entry(&record.name, index)?;

            let outcome = self.quicken_instruction(record.name.as_str(), pool_ref.offset, opcode, entry)?;

            match &outcome {
                Outcome::Detached { opcode, cell, .. } => {
                    bytes[offset] = *opcode as u8;
                    BigEndian::write_u16(&mut bytes[offset + 1..offset + 3], *cell);
                }
                Outcome::Rewritten { opcode, .. } => {
                    bytes[offset] = *opcode as u8;
                    pool_refs.push(*pool_ref);
                }
                _ => pool_refs.push(*pool_ref),
            }

            outcomes.push(outcome);
        }

        Ok(Quickened {
            bytes,
            outcomes,
            pool_refs,
        })
    }

    fn is_resolved(&self, entry: EntryRef) -> bool {
        if self.pool.is_linked(entry) {
            return true;
        }

        // Array classes can always be made on demand.
        self.pool
            .class_name(entry)
            .map(|name| name.starts_with('['))
            .unwrap_or(false)
    }

    fn quicken_instruction(&self, class: &str, offset: u32, opcode: Opcode, entry: EntryRef) -> Result<Outcome> {
        use Opcode::*;

        if !self.is_resolved(entry) {
            return Ok(Outcome::Unresolved { offset, entry });
        }

        let rewritten = |opcode| Ok(Outcome::Rewritten { offset, opcode });

        match opcode {
            Ldc_w | Ldc2_w | Invokeinterface | Anewarray => Ok(Outcome::Kept { offset }),
            Getstatic => rewritten(self.field_variant(entry, Getstatic_fast, Getstatic2_fast, Getstaticp_fast)?),
            Putstatic => rewritten(self.field_variant(entry, Putstatic_fast, Putstatic2_fast, Putstatic_fast)?),
            Getfield | Putfield => {
                let opcode = if opcode == Getfield {
                    self.field_variant(entry, Getfield_fast, Getfield2_fast, Getfieldp_fast)?
                } else {
                    self.field_variant(entry, Putfield_fast, Putfield2_fast, Putfield_fast)?
                };

                let Some(Target::Field(field)) = self.pool.target(entry) else {
                    return Err(Error::internal(format!("{}: field entry at {} is not bound", class, offset)));
                };

                Ok(Outcome::Detached {
                    offset,
                    opcode,
                    cell: self.registry.field(field).offset,
                })
            }
            Invokevirtual => {
                let Some(Target::Method(method)) = self.pool.target(entry) else {
                    return Ok(Outcome::Kept { offset });
                };

                let method = self.registry.method(method);
                let owner = self.registry.class(method.class);

                if method.access.intersects(AccessFlags::PRIVATE | AccessFlags::FINAL)
                    || owner.access.contains(AccessFlags::FINAL)
                {
                    rewritten(Invokespecial_fast)
                } else {
                    Ok(Outcome::Kept { offset })
                }
            }
            Invokespecial => rewritten(Invokespecial_fast),
            Invokestatic => rewritten(Invokestatic_fast),
            New => rewritten(New_fast),
            Checkcast => rewritten(Checkcast_fast),
            Instanceof => rewritten(Instanceof_fast),
            Multianewarray => rewritten(Multianewarray_fast),
            other => Err(Error::format(
                class,
                format!("unexpected opcode {} with a constant operand at offset {}", other, offset),
            )),
        }
    }

    /// Picks the variant for the field's type: pointer, two-word or plain.
    fn field_variant(&self, entry: EntryRef, one_word: Opcode, two_words: Opcode, reference: Opcode) -> Result<Opcode> {
        let descriptor = self
            .pool
            .member(entry)
            .map(|member| member.descriptor.clone())
            .ok_or_else(|| Error::internal(format!("entry {} is not a field reference", entry.index())))?;

        Ok(match FieldType::parse(&descriptor) {
            Some((field_type, _)) if field_type.is_reference() => reference,
            Some((FieldType::Long | FieldType::Double, _)) => two_words,
            _ => one_word,
        })
    }
}

/// Summary of quickening one class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassQuickening {
    pub methods: usize,
    pub rewritten: usize,
    pub unresolved: usize,
}

impl ClassQuickening {
    pub fn is_complete(&self) -> bool {
        self.unresolved == 0
    }
}

/// Quickens every method of every class in place and marks which classes no
/// longer depend on unresolved entries.
pub fn quicken_all(
    registry: &mut ClassRegistry,
    pool: &ConstantPool,
    diagnostics: &mut Diagnostics,
    warn: bool,
) -> Result<Vec<ClassQuickening>> {
    let mut summaries = Vec::with_capacity(registry.len());

    for id in registry.ids() {
        let mut results = Vec::new();

        {
            let quickener = Quickener::new(registry, pool);
            let record = registry.class(id);

            for (index, method) in record.methods.iter().enumerate() {
                if let Some(code) = method.code() {
                    let quickened = quickener.quicken(id, code)?;

                    for outcome in &quickened.outcomes {
                        if let Outcome::Unresolved { entry, .. } = outcome {
                            let message = format!(
                                "could not quicken reference from {}.{}{} to {}",
                                record.name,
                                method.name,
                                method.descriptor,
                                describe(pool, *entry)
                            );

                            if warn {
                                diagnostics.warn(&record.name, message);
                            } else {
                                log::debug!("{}", message);
                            }
                        }
                    }

                    results.push((index, quickened));
                }
            }
        }

        let mut summary = ClassQuickening {
            methods: results.len(),
            ..Default::default()
        };

        let record = registry.class_mut(id);

        for (index, quickened) in results {
            summary.rewritten += quickened
                .outcomes
                .iter()
                .filter(|outcome| matches!(outcome, Outcome::Detached { .. } | Outcome::Rewritten { .. }))
                .count();
            summary.unresolved += quickened
                .outcomes
                .iter()
                .filter(|outcome| matches!(outcome, Outcome::Unresolved { .. }))
                .count();

            if let Some(code) = record.methods[index].code_mut() {
                code.bytes = quickened.bytes;
                code.pool_refs = quickened.pool_refs;
            }
        }

        record.fully_quickened = summary.is_complete();
        summaries.push(summary);
    }

    Ok(summaries)
}

/// Human readable form of a class or member entry.
pub fn describe(pool: &ConstantPool, entry: EntryRef) -> String {
    if let Some(member) = pool.member(entry) {
        format!("{}.{}:{}", member.class_name, member.name, member.descriptor)
    } else if let Some(name) = pool.class_name(entry) {
        name.to_string()
    } else {
        format!("{:?}", pool.constant(entry))
    }
}
