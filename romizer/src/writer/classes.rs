//! `AllClassblocks` and every per-class table hanging off it.

use super::names::{class_native_name, pretty_field, pretty_method, table_native_name, MethodNames};
use super::output::{hex, int_literal, safe_string, CodeWriter};
use super::section::{SectionCounter, SectionMode};
use super::stack_map::{self, MapOwner};
use super::{names_of, tables, BlockKind, ClassBlock, ImageWriter};
use crate::bytecode::{instruction_length, Opcode};
use crate::classfile::attribute::Code;
use crate::classfile::resolved::{
    primitive, AccessFlags, ArrayElement, ClassKind, ClassRecord, FieldType, Method, ReturnType,
};
use crate::compact::index_map;
use crate::constant_pool::{Constant, EntryRef, FieldId, MethodId, Target};
use crate::error::{Error, Result};
use std::io::Write;

pub const ACC_ARRAY_CLASS: u16 = 0x1000;
pub const ACC_ROM_CLASS: u16 = 0x2000;
pub const ACC_ROM_NON_INIT_CLASS: u16 = 0x4000;
pub const ACC_DOUBLE: u16 = 0x4000;
pub const ACC_POINTER: u16 = 0x8000;

/// Code holding a switch keeps its operands word aligned.
fn alignment(code: &[u8]) -> usize {
    let mut offset = 0;

    while offset < code.len() {
        if matches!(Opcode::decode(code[offset]), Some(Opcode::Tableswitch | Opcode::Lookupswitch)) {
            return 4;
        }

        match instruction_length(code, offset) {
            Ok(length) => offset += length,
            Err(_) => return 4,
        }
    }

    1
}

fn type_flags(field_type: &FieldType) -> u16 {
    if field_type.is_reference() {
        ACC_POINTER
    } else if field_type.cells() == 2 {
        ACC_DOUBLE
    } else {
        0
    }
}

fn method_access(method: &Method) -> u16 {
    let flags = match &method.signature.return_type {
        ReturnType::Void => ACC_DOUBLE | ACC_POINTER,
        ReturnType::FieldType(field_type) => type_flags(field_type),
    };
    method.access.bits() | flags
}

fn long_text(macro_name: &str, bits: u64) -> String {
    format!(
        "{}({}, {})",
        macro_name,
        int_literal((bits >> 32) as u32 as i32),
        int_literal(bits as u32 as i32)
    )
}

fn code_of<'r>(record: &ClassRecord, method: &'r Method) -> Result<&'r Code> {
    method
        .code()
        .ok_or_else(|| Error::format(record.name.as_str(), format!("method {}{} has no code", method.name, method.descriptor)))
}

/// One entry of the `AllCode` initializer.
enum CodePiece<'r> {
    Padding(usize),
    Method { record: &'r ClassRecord, index: usize },
}

impl<'a> ImageWriter<'a> {
    pub(super) fn write_declarations<W: Write>(&self, out: &mut CodeWriter<W>, blocks: &[ClassBlock<'_>]) {
        out.println("struct AllClassblocks_Struct {");
        for block in blocks {
            let structure = match block.kind {
                BlockKind::Array { .. } => "arrayClassStruct",
                _ => "instanceClassStruct",
            };
            out.println(format_args!("\tstruct {} {};", structure, block.native));
        }
        out.println("};");
        out.newline();
        out.println("FORWARD_STATIC_DECLARATION");
        out.println("struct AllClassblocks_Struct AllClassblocks;");
        out.newline();
    }

    pub(super) fn write_class_definitions<W: Write>(&mut self, out: &mut CodeWriter<W>, blocks: &[ClassBlock<'a>]) -> Result<()> {
        let instances = super::instance_records(blocks);

        self.write_all_code(out, &instances)?;
        out.page();
        self.write_all_handlers(out, &instances)?;
        out.page();
        self.write_all_stack_maps(out, &instances)?;
        out.page();
        self.write_all_methods(out, &instances)?;
        out.page();
        self.write_all_fields(out, &instances)?;
        out.page();
        self.write_all_constant_pools(out, &instances)?;
        out.page();
        self.write_all_interfaces(out, &instances)?;

        if self.config.relocatable {
            out.println("void *ClassDefinitionSectionHeader = &ClassDefinitionSectionHeader;");
        }

        out.println("static struct AllClassblocks_Struct AllClassblocks = {");
        for block in blocks {
            match &block.kind {
                BlockKind::Instance(record) => self.write_instance_block(out, block, record)?,
                BlockKind::Array { access, element } => self.write_array_block(out, block, *access, element)?,
                BlockKind::Raw => {
                    self.write_basic_info(out, block, "RAW_CLASS_INFO", 0)?;
                    out.println("\t\tNULL),");
                }
            }
        }
        out.println("};");

        out.page();
        tables::write_class_table(out, &self.keys.classes);

        out.page();
        self.write_primitive_array_classes(out);

        if self.config.relocatable {
            out.println("void *ClassDefinitionSectionTrailer = &ClassDefinitionSectionTrailer;");
        }

        Ok(())
    }

    fn write_basic_info<W: Write>(&self, out: &mut CodeWriter<W>, block: &ClassBlock<'_>, macro_name: &str, access: u16) -> Result<()> {
        let name = &block.name;
        let names = &self.keys.names;

        out.println(format_args!("\t{}( \\", macro_name));

        match &name.package {
            Some(package) => out.println(format_args!("\t\t{},  /* {} */ \\", names.ustring(package)?, package)),
            None => out.println("\t\tNULL, "),
        }

        let base = name.full_base_name();
        out.println(format_args!("\t\t{},  /* {} */ \\", names.ustring(&base)?, base));

        match self.keys.classes.next(name) {
            Some(next) => out.print(format_args!("\t\t&AllClassblocks.{}, ", table_native_name(next))),
            None => out.print("\t\tNULL, "),
        }

        let key = self
            .keys
            .classes
            .lookup_key(name)
            .ok_or_else(|| Error::internal(format!("class {} has no key", name)))?;
        out.println(format_args!("{}, {}, \\", hex(key), hex(access)));

        Ok(())
    }

    fn write_instance_block<W: Write>(&self, out: &mut CodeWriter<W>, block: &ClassBlock<'_>, record: &ClassRecord) -> Result<()> {
        let initialized = record.has_static_initializer();

        let mut access = record.access.bits() | ACC_ROM_CLASS;
        if !initialized {
            access |= ACC_ROM_NON_INIT_CLASS;
        }

        self.write_basic_info(out, block, "INSTANCE_INFO", access)?;

        out.print(format_args!("\t\t{}, ", record.instance_size));
        out.println(if initialized { "CLASS_VERIFIED, \\" } else { "CLASS_READY, \\" });

        let names = names_of(&self.methods, record)?;
        let finalizer = record
            .find_method("finalize", "()V")
            .and_then(|index| names.native[index].as_deref());
        out.println(format_args!("\t\t{}, \\", finalizer.unwrap_or("NULL")));

        match record.super_class {
            Some(id) => out.println(format_args!(
                "\t\t&AllClassblocks.{}, \\",
                class_native_name(&self.registry.class(id).name)
            )),
            None => out.println("\t\tNULL, \\"),
        }

        let native = &block.native;
        let table = |present: bool, reference: String| if present { reference } else { "NULL".to_string() };

        out.println(format_args!(
            "\t\t{}, \\",
            table(
                !record.methods.is_empty(),
                format!("&AllMethods.{}_MethodSection.{}", native, native)
            )
        ));
        out.println(format_args!(
            "\t\t{}, \\",
            table(!record.fields.is_empty(), format!("&AllFields.{}", native))
        ));
        out.println(format_args!(
            "\t\t{}, \\",
            table(!record.constants.is_empty(), format!("&AllConstantPools.{}", native))
        ));
        out.println(format_args!(
            "\t\t{} ),",
            table(!record.interfaces.is_empty(), format!("&AllInterfaces.{}", native))
        ));

        Ok(())
    }

    fn write_array_block<W: Write>(
        &self,
        out: &mut CodeWriter<W>,
        block: &ClassBlock<'_>,
        access: AccessFlags,
        element: &ArrayElement,
    ) -> Result<()> {
        let access = access.bits() | ACC_ARRAY_CLASS | ACC_ROM_CLASS;

        match element {
            ArrayElement::Class(name) => {
                self.write_basic_info(out, block, "ARRAY_OF_OBJECT", access)?;
                out.println(format_args!("\t\tAllClassblocks.{}),", class_native_name(name)));
            }
            ArrayElement::Primitive(code) => {
                let name = primitive::name(*code)
                    .ok_or_else(|| Error::internal(format!("array {} has element type {}", block.name, code)))?;
                self.write_basic_info(out, block, "ARRAY_OF_PRIMITIVE", access)?;
                out.println(format_args!("\t\t{}),", name.to_uppercase()));
            }
        }

        Ok(())
    }

    fn write_all_code<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let mut counter = SectionCounter::new(self.config.code_section_cap());
        let mut pieces = Vec::new();
        let mut natives = Vec::new();
        let mut paddings = 0;

        out.println("struct AllCode_Struct { ");
        counter.start_first(out, SectionMode::Definition);

        for &record in instances {
            let names = names_of(&self.methods, record)?;

            for (index, method) in record.methods.iter().enumerate() {
                if method.is_abstract() {
                    continue;
                }

                if method.is_native() {
                    natives.extend(names.native[index].clone());
                    continue;
                }

                let code = code_of(record, method)?;
                let alignment = alignment(&code.bytes);
                let padding = alignment - counter.offset() % alignment;

                if padding != alignment {
                    counter.not_next_section(padding);
                    paddings += 1;
                    out.println(format_args!("\t\tBYTE padding{}[{}];", paddings, padding));
                    pieces.push(CodePiece::Padding(padding));
                }

                let name = &names.code[index];
                counter.maybe_next_section(out, code.bytes.len());
                out.println(format_args!("#define {}_CodeSection section{}", name, counter.section()));
                out.println(format_args!("\t\t/* {} */", pretty_method(&method.name, &method.descriptor)));
                out.println(format_args!("\t\tBYTE {}[{}];", name, code.bytes.len()));

                pieces.push(CodePiece::Method { record, index });
            }
        }

        counter.end_last_section(out);
        self.stats.code_bytes = counter.total();
        out.println("};");
        out.newline();

        out.println("#if !ENABLEFASTBYTECODES && !ENABLE_JAVA_DEBUGGER");
        out.println("CONST");
        out.println("#endif");
        out.println("static struct AllCode_Struct AllCode = {");
        counter.start_first(out, SectionMode::Initialization);

        for piece in &pieces {
            match piece {
                CodePiece::Padding(padding) => {
                    counter.not_next_section(*padding);
                    out.println(format_args!("\t\t{{ 0 }}, /* padding size {} */", padding));
                }
                CodePiece::Method { record, index } => {
                    let method = &record.methods[*index];
                    let bytes = &code_of(record, method)?.bytes;
                    let custom = self.custom_code == Some(MethodId { class: record.id, index: *index });

                    counter.maybe_next_section(out, bytes.len());
                    out.println(format_args!(
                        "\t\t{{ /* {}: {} */",
                        record.name,
                        pretty_method(&method.name, &method.descriptor)
                    ));
                    out.write_array(0, bytes.len(), 10, "\t\t\t", |offset| {
                        if offset == 0 && custom {
                            "CUSTOMCODE".to_string()
                        } else {
                            hex(bytes[offset])
                        }
                    });
                    out.println("\t\t},");
                }
            }
        }

        counter.end_last_section(out);
        out.println("};");
        out.newline();

        if self.config.relocatable {
            counter.print_relocation_info(out, "AllCode", "CODE");
        } else {
            for native in &natives {
                out.println(format_args!("extern void {}(void);", native));
            }
        }

        Ok(())
    }

    fn write_all_handlers<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let with_handlers = || {
            instances.iter().flat_map(|&record| {
                record.methods.iter().enumerate().filter_map(move |(index, method)| {
                    method
                        .code()
                        .filter(|code| !code.handlers.is_empty())
                        .map(|code| (record, index, method, code))
                })
            })
        };

        out.println("struct AllHandlers_Struct { ");
        for (record, index, method, code) in with_handlers() {
            let names = names_of(&self.methods, record)?;
            self.stats.catch_frames += code.handlers.len();

            out.println(format_args!(
                "\tstruct {{ /* {}: {}*/",
                record.name,
                pretty_method(&method.name, &method.descriptor)
            ));
            out.println("\t\tlong length;");
            out.println(format_args!("\t\tstruct exceptionHandlerStruct handlers[{}];", code.handlers.len()));
            out.println(format_args!("\t}} {};", names.code[index]));
        }
        out.println("};");
        out.newline();

        out.println("static CONST struct AllHandlers_Struct AllHandlers = {");
        for (record, _, method, code) in with_handlers() {
            let slots = index_map(&record.constants);

            out.println(format_args!(
                "\t{{ /* {}: {}*/",
                record.name,
                pretty_method(&method.name, &method.descriptor)
            ));
            out.println(format_args!("\t\t{},", code.handlers.len()));
            out.println("\t\t{");

            for (position, handler) in code.handlers.iter().enumerate() {
                let catch_index = match handler.catch_type {
                    Some(entry) => *slots.get(&entry).ok_or_else(|| {
                        Error::internal(format!("{}: catch type of handler {} is not in the pool", record.name, position))
                    })?,
                    None => 0,
                };

                out.println(format_args!(
                    "\t\t\tHANDLER_ENTRY({}, {}, {}, {}){}",
                    handler.start_pc,
                    handler.end_pc,
                    handler.handler_pc,
                    catch_index,
                    if position + 1 == code.handlers.len() { "" } else { "," }
                ));
            }

            out.println("\t\t}");
            out.println("\t},");
            out.newline();
        }
        out.println("};");

        Ok(())
    }

    fn write_all_stack_maps<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let mut todo = Vec::new();

        out.println("struct AllStackMaps_Struct { ");
        for &record in instances {
            let names = names_of(&self.methods, record)?;

            for (index, method) in record.methods.iter().enumerate() {
                let Some(code) = method.code().filter(|code| !code.stack_map().is_empty()) else {
                    continue;
                };

                let pretty = pretty_method(&method.name, &method.descriptor);
                let owner = MapOwner {
                    class: &record.name,
                    pretty: &pretty,
                    native: &names.code[index],
                };
                stack_map::print_declaration(out, &owner, code, "\t");
                todo.push((record, index, pretty, code));
            }
        }
        out.println("};");
        out.newline();

        out.println("static CONST struct AllStackMaps_Struct AllStackMaps = {");
        for (record, index, pretty, code) in &todo {
            let names = names_of(&self.methods, record)?;
            let owner = MapOwner {
                class: &record.name,
                pretty,
                native: &names.code[*index],
            };
            stack_map::print_definition(out, &self.keys.names, &owner, code, "\t")?;
        }
        out.println("};");

        Ok(())
    }

    /// The `AllMethods_Struct` type. Relocation lists also number each
    /// class's section.
    pub(super) fn write_method_declarations<W: Write>(
        &self,
        out: &mut CodeWriter<W>,
        instances: &[&'a ClassRecord],
        numbered: bool,
    ) -> SectionCounter {
        let mut counter = SectionCounter::new(self.config.method_section_cap());

        out.println("struct AllMethods_Struct { ");
        counter.start_first(out, SectionMode::Definition);

        for record in instances {
            let count = record.methods.len();
            counter.maybe_next_section(out, count);

            if count == 0 {
                continue;
            }

            let native = class_native_name(&record.name);
            out.println("\t\tstruct {");
            out.println(format_args!("#define {}_MethodSection section{}", native, counter.section()));
            if numbered {
                out.println(format_args!("#define {}_MethodSectionNumber {}", native, counter.section()));
            }
            out.println("\t\t\tlong length;");
            out.println(format_args!("\t\t\tstruct methodStruct methods[{}];", count));
            out.println(format_args!("\t\t}} {};", native));
        }

        counter.end_last_section(out);
        out.println("};");
        counter
    }

    fn write_all_methods<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let mut counter = self.write_method_declarations(out, instances, false);

        out.println("static CONST struct AllMethods_Struct AllMethods = {");
        counter.start_first(out, SectionMode::Initialization);

        for record in instances.iter().filter(|record| !record.methods.is_empty()) {
            counter.maybe_next_section(out, record.methods.len());
            out.println("\t\t{");
            out.println(format_args!("\t\t\t/* {} */", record.name));
            self.write_methods(out, record)?;
            out.println("\t\t},");
        }

        counter.end_last_section(out);
        out.println("};");
        out.newline();

        if self.config.relocatable {
            counter.print_relocation_info(out, "AllMethods", "METHODTABLE");
        } else if let Some(id) = self.custom_code {
            let record = self.registry.class(id.class);
            let method = &record.methods[id.index];

            // the cast drops the CONST
            out.println(format_args!(
                "METHOD RunCustomCodeMethod = (METHOD) ROM_CLINIT_METHOD({}, {}) /* {} */;",
                class_native_name(&record.name),
                id.index,
                pretty_method(&method.name, &method.descriptor)
            ));
            out.newline();
        }

        Ok(())
    }

    fn write_methods<W: Write>(&mut self, out: &mut CodeWriter<W>, record: &ClassRecord) -> Result<()> {
        let names: &MethodNames = names_of(&self.methods, record)?;
        let count = record.methods.len();

        out.println(format_args!("\t\t\t{},", count));
        out.println("\t\t\t{");

        for (index, method) in record.methods.iter().enumerate() {
            let access = method_access(method);
            let bodiless = method.is_abstract() || method.is_native();

            let kind = if method.is_abstract() {
                "ABSTRACT_"
            } else if method.is_native() {
                "NATIVE_"
            } else {
                ""
            };

            out.println(format_args!(
                "\t\t\t\t{}METHOD_INFO( /* {} */ \\",
                kind,
                pretty_method(&method.name, &method.descriptor)
            ));
            out.println(format_args!("\t\t\t\t\t{}, \\", names.class));

            if method.is_native() && !method.is_abstract() {
                let function = match &names.native[index] {
                    Some(function) if !self.config.relocatable => function.as_str(),
                    _ => "NULL",
                };
                out.println(format_args!("\t\t\t\t\t{}, \\", function));
            } else if !bodiless {
                let code = code_of(record, method)?;
                let name = &names.code[index];

                out.println(format_args!("\t\t\t\t\tAllCode.{}_CodeSection.{}, \\", name, name));

                if code.handlers.is_empty() {
                    out.println("\t\t\t\t\t0, \\");
                } else {
                    out.println(format_args!("\t\t\t\t\t&AllHandlers.{}, \\", name));
                }

                if code.stack_map().is_empty() {
                    out.println("\t\t\t\t\t0, \\");
                } else {
                    out.println(format_args!("\t\t\t\t\t&AllStackMaps.{}, \\", name));
                }
            }

            out.print(format_args!("\t\t\t\t\t{}, {}, ", hex(access), method.args_size()));

            if !bodiless {
                let code = code_of(record, method)?;
                let custom = self.custom_code == Some(MethodId { class: record.id, index });
                let stack = if custom {
                    "RunCustomCodeMethod_MAX_STACK_SIZE".to_string()
                } else {
                    code.max_stack.to_string()
                };

                out.println(format_args!("{}, {}, {}, \\", code.max_locals, stack, code.bytes.len()));
                out.print("\t\t\t\t\t");
            }

            let key = self.keys.name_and_type_key(&method.name, &method.descriptor)?;
            out.print(key);
            out.println(if index + 1 == count { ")" } else { ")," });
        }

        out.println("\t\t\t}");
        self.stats.methods += count;

        Ok(())
    }

    fn write_all_fields<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let todo: Vec<&ClassRecord> = instances.iter().copied().filter(|record| !record.fields.is_empty()).collect();

        out.println("struct AllFields_Struct { ");
        for record in &todo {
            out.println("\tstruct {");
            out.println("\t\tlong length;");
            out.println(format_args!("\t\tstruct fieldStruct fields[{}];", record.fields.len()));
            out.println(format_args!("\t}} {};", class_native_name(&record.name)));
        }
        out.println("};");

        out.println("static CONST struct AllFields_Struct AllFields = { ");
        for record in &todo {
            out.println("\t{");
            out.println(format_args!("\t\t/* {} */", record.name));
            self.write_fields(out, record)?;
            out.println("\t},");
        }
        out.println("};");
        out.newline();

        Ok(())
    }

    fn write_fields<W: Write>(&mut self, out: &mut CodeWriter<W>, record: &ClassRecord) -> Result<()> {
        let count = record.fields.len();
        let native = class_native_name(&record.name);

        out.println(format_args!("\t\t{},", count));
        out.println("\t\t{");

        for (index, field) in record.fields.iter().enumerate() {
            let offset = if field.is_static() {
                let id = FieldId {
                    class: field.class,
                    index: field.index,
                };
                self.statics
                    .offset(id)
                    .ok_or_else(|| Error::internal(format!("static {}.{} has no store offset", record.name, field.name)))?
            } else {
                field.offset
            };

            if field.is_static() {
                out.print("\t\t\tSTATIC_FIELD_INFO( ");
            } else {
                out.print("\t\t\tFIELD_INFO( ");
            }
            out.println(format_args!("/* {} */ \\", pretty_field(&field.name, &field.descriptor)));

            let access = field.access.bits() | type_flags(&field.field_type);
            let key = self.keys.name_and_type_key(&field.name, &field.descriptor)?;

            out.print(format_args!("\t\t\t\t{}, {}, {}, {})", native, hex(access), offset, key));
            out.println(if index + 1 == count { "" } else { "," });
        }

        out.println("\t\t}");
        self.stats.fields += count;

        Ok(())
    }

    fn write_all_constant_pools<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let todo: Vec<&ClassRecord> = instances.iter().copied().filter(|record| !record.constants.is_empty()).collect();

        out.println("struct AllConstantPools_Struct { ");
        for record in &todo {
            let length = record.constants.len();
            out.println("\tstruct {");
            out.println(format_args!("\t\tunion ROMconstantPoolEntryStruct entries[{}];", length));
            out.println(format_args!("\t\tunsigned char tags[{}];", length));
            out.println(format_args!("\t}} {};", class_native_name(&record.name)));
        }
        out.println("};");

        out.println("static CONST struct AllConstantPools_Struct AllConstantPools = {");
        for record in &todo {
            out.println("\t{");
            out.println(format_args!("\t\t/* {} */", record.name));
            self.write_constant_pool(out, record)?;
            out.println("\t},");
        }
        out.println("};");
        out.newline();

        Ok(())
    }

    fn write_constant_pool<W: Write>(&mut self, out: &mut CodeWriter<W>, record: &ClassRecord) -> Result<()> {
        let pool = self.pool;
        let length = record.constants.len();
        let mut tags = vec![0u8; length];

        out.println("\t\t{");
        out.println(format_args!("\t\t\tROM_CPOOL_LENGTH({}),", length));

        for (index, slot) in record.constants.iter().enumerate() {
            let Some(entry) = *slot else {
                continue;
            };

            let constant = pool.constant(entry);
            tags[index] = match constant {
                Constant::Integer(_) | Constant::String(_) | Constant::Long(_) | Constant::Double(_) => constant.tag(),
                _ if pool.is_linked(entry) => constant.tag() | 0x80,
                _ => constant.tag(),
            };

            let text = self.constant_text(record, entry)?;
            let next = index + constant.slots() as usize;
            out.println(format_args!("\t\t\tROM_CPOOL_{}{}", text, if next < length { "," } else { "" }));
        }

        out.println("\t\t},");
        out.println("\t\t{");
        out.write_array(0, length, 12, "\t\t\t", |index| tags[index].to_string());
        out.println("\t\t}");

        self.stats.constants += length;
        Ok(())
    }

    fn constant_text(&mut self, record: &ClassRecord, entry: EntryRef) -> Result<String> {
        let pool = self.pool;
        let registry = self.registry;

        let text = match pool.constant(entry) {
            Constant::Integer(value) => format!("INT({})", int_literal(*value)),
            Constant::Float(value) => format!("INT({})", int_literal(value.to_bits() as i32)),
            Constant::Long(value) => long_text("LONG", *value as u64),
            Constant::Double(value) => long_text("DOUBLE", value.to_bits()),
            Constant::String(_) => {
                let string = pool
                    .string(entry)
                    .ok_or_else(|| Error::format(record.name.as_str(), "string constant has no body"))?;
                format!(
                    "STRING({}) /* {} */",
                    self.keys.strings.reference(string)?,
                    safe_string(string.as_bytes()).replace("*/", "*\\/")
                )
            }
            Constant::Class(_) => match pool.target(entry) {
                Some(Target::Class(id)) => format!("CLASS({})", class_native_name(&registry.class(id).name)),
                _ => {
                    let name = pool
                        .class_name(entry)
                        .ok_or_else(|| Error::format(record.name.as_str(), "class constant has no name"))?;
                    format!("UNRESOLVED_CLASS({})", hex(self.keys.class_key(name)?))
                }
            },
            Constant::FieldRef { .. } | Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. } => {
                match pool.target(entry) {
                    Some(Target::Field(id)) => {
                        let field = registry.field(id);
                        format!(
                            "FIELD({}, {}) /* {} */",
                            class_native_name(&registry.class(id.class).name),
                            id.index,
                            pretty_field(&field.name, &field.descriptor)
                        )
                    }
                    Some(Target::Method(id)) => {
                        let method = registry.method(id);
                        format!(
                            "METHOD({}, {}) /* {} */",
                            class_native_name(&registry.class(id.class).name),
                            id.index,
                            pretty_method(&method.name, &method.descriptor)
                        )
                    }
                    _ => {
                        let member = pool
                            .member(entry)
                            .ok_or_else(|| Error::format(record.name.as_str(), "member constant is incomplete"))?;
                        let class = self.keys.class_key(member.class_name)?;
                        let key = self.keys.name_and_type_key(member.name, member.descriptor)?;
                        format!("UNRESOLVED_MEMBER({}, {})", hex(class), key)
                    }
                }
            }
            other => {
                return Err(Error::format(
                    record.name.as_str(),
                    format!("constant of tag {} cannot be placed in a pool", other.tag()),
                ))
            }
        };

        Ok(text)
    }

    fn write_all_interfaces<W: Write>(&mut self, out: &mut CodeWriter<W>, instances: &[&'a ClassRecord]) -> Result<()> {
        let todo: Vec<&ClassRecord> = instances.iter().copied().filter(|record| !record.interfaces.is_empty()).collect();

        out.println("struct AllInterfaces_Struct { ");
        for record in &todo {
            out.println("\tstruct {");
            out.println("\t\tunsigned short length;");
            out.println(format_args!("\t\tunsigned short index[{}];", record.interfaces.len()));
            out.println(format_args!("\t}} {};", class_native_name(&record.name)));
        }
        out.println("};");
        out.newline();

        out.println("static CONST struct AllInterfaces_Struct AllInterfaces = { ");
        for record in &todo {
            let slots = index_map(&record.constants);
            let indices = record
                .interfaces
                .iter()
                .map(|entry| {
                    slots
                        .get(entry)
                        .copied()
                        .ok_or_else(|| Error::internal(format!("{}: interface entry is not in the pool", record.name)))
                })
                .collect::<Result<Vec<u16>>>()?;

            out.println("\t{");
            out.println(format_args!("\t\t/* {} */", record.name));
            out.println(format_args!("\t\t{}, /* interfaces */", indices.len()));
            out.println("\t\t{");
            out.write_array(0, indices.len(), 12, "\t\t\t", |index| indices[index].to_string());
            out.println("\t\t}");
            out.println("\t},");
        }
        out.println("};");
        out.newline();

        Ok(())
    }

    /// Array classes of each primitive type, indexed by type code.
    fn write_primitive_array_classes<W: Write>(&self, out: &mut CodeWriter<W>) {
        let mut table: [Option<String>; 12] = Default::default();

        for record in self.registry.iter() {
            if let ClassKind::Array {
                element: ArrayElement::Primitive(code),
            } = &record.kind
            {
                if let Some(slot) = table.get_mut(*code as usize) {
                    *slot = Some(class_native_name(&record.name));
                }
            }
        }

        out.println("ARRAY_CLASS PrimitiveArrayClasses[12] = {");
        out.write_array(0, table.len(), 1, "\t", |index| match &table[index] {
            Some(native) => format!("&AllClassblocks.{}", native),
            None => "NULL".to_string(),
        });
        out.println("};");
        out.newline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomizerConfig;
    use crate::testing::{op, wide, ClassBuilder, Fixture, Item, Sym};

    fn render(fixture: &Fixture, config: &RomizerConfig) -> String {
        let mut writer = ImageWriter::new(&fixture.registry, &fixture.pool, config, "today").unwrap();
        String::from_utf8(writer.write_image(Vec::new()).unwrap()).unwrap()
    }

    #[test]
    fn switches_are_word_aligned() {
        // iconst_0, tableswitch with one case
        let code = [0x03, 0xaa, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(alignment(&code), 4);
        assert_eq!(alignment(&[0x03, 0xac]), 1);
    }

    #[test]
    fn method_flags_describe_the_result() {
        let fixture = Fixture::prepared(vec![ClassBuilder::root()
            .method("v", "()V", &[0xb1])
            .method("o", "()Ljava/lang/Object;", &[0x01, 0xb0])
            .method("j", "()J", &[0x09, 0xad])
            .method("i", "()I", &[0x03, 0xac])])
        .unwrap();
        let record = fixture.registry.by_name("java/lang/Object").unwrap();

        let flags: Vec<u16> = record.methods.iter().map(method_access).collect();
        assert_eq!(flags, vec![0xc001, 0x8001, 0x4001, 0x0001]);
    }

    #[test]
    fn code_is_laid_out_in_sections() {
        let fixture = Fixture::prepared(vec![ClassBuilder::root()
            .method("a", "()V", &[0x00, 0x00, 0xb1])
            .method("b", "()V", &[0xb1])])
        .unwrap();

        let config = RomizerConfig {
            max_code_section: Some(3),
            ..Default::default()
        };
        let text = render(&fixture, &config);

        assert!(text.contains(
            "struct AllCode_Struct { \n\
             \tstruct {\n\
             #define java_lang_Object_a_CodeSection section1\n\
             \t\t/* void a() */\n\
             \t\tBYTE java_lang_Object_a[3];\n\
             \t} section1;\n\
             \tlong dummy1;\n\
             \tstruct {\n\
             #define java_lang_Object_b_CodeSection section2\n"
        ));
        assert!(text.contains(
            "\t\t{ /* java/lang/Object: void a() */\n\t\t\t0x0, 0x0, 0xb1\n\t\t},\n\t}, /* section 1 (size 3) */\n"
        ));
    }

    #[test]
    fn handlers_use_compacted_catch_indices() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root(),
            ClassBuilder::new("java/lang/Throwable"),
            ClassBuilder::new("A")
                .method("run", "()V", &[0x00, 0xb1, 0x57, 0xb1])
                .handler(0, 1, 2, Some("java/lang/Throwable"))
                .handler(0, 1, 3, None),
        ])
        .unwrap();

        let record = fixture.registry.by_name("A").unwrap();
        let catch = record.methods[0].code().unwrap().handlers[0].catch_type.unwrap();
        let slot = index_map(&record.constants)[&catch];

        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("\t\tstruct exceptionHandlerStruct handlers[2];\n\t} A_run;\n"));
        assert!(text.contains(&format!(
            "\t\t2,\n\t\t{{\n\t\t\tHANDLER_ENTRY(0, 1, 2, {}),\n\t\t\tHANDLER_ENTRY(0, 1, 3, 0)\n\t\t}}\n\t}},\n\n",
            slot
        )));
        assert!(text.contains("\t\t\t\t\t&AllHandlers.A_run, \\\n"));
    }

    #[test]
    fn method_tables_name_code_and_keys() {
        let fixture = Fixture::prepared(vec![ClassBuilder::root()
            .method("hashCode", "()I", &[0x03, 0xac])
            .bodiless(AccessFlags::PUBLIC | AccessFlags::NATIVE, "getClass", "()Ljava/lang/Class;")])
        .unwrap();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("\t\t\t/* java/lang/Object */\n\t\t\t2,\n\t\t\t{\n"));
        assert!(text.contains(
            "\t\t\t\tMETHOD_INFO( /* int hashCode() */ \\\n\
             \t\t\t\t\tjava_lang_Object, \\\n\
             \t\t\t\t\tAllCode.java_lang_Object_hashCode_CodeSection.java_lang_Object_hashCode, \\\n\
             \t\t\t\t\t0, \\\n\
             \t\t\t\t\t0, \\\n\
             \t\t\t\t\t0x1, 1, 4, 4, 2, \\\n\
             \t\t\t\t\tNameAndTypeKey("
        ));
        assert!(text.contains(
            "\t\t\t\tNATIVE_METHOD_INFO( /* Class getClass() */ \\\n\
             \t\t\t\t\tjava_lang_Object, \\\n\
             \t\t\t\t\tJava_java_lang_Object_getClass, \\\n\
             \t\t\t\t\t0x8101, 1, NameAndTypeKey("
        ));
        assert!(text.contains("extern void Java_java_lang_Object_getClass(void);\n"));
    }

    #[test]
    fn fields_carry_offsets_and_type_flags() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root(),
            ClassBuilder::new("A")
                .field("x", "I", 0)
                .field("next", "LA;", 0)
                .static_field("count", "J", Some(Sym::Long(3))),
        ])
        .unwrap();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("\t\t\tFIELD_INFO( /* int x */ \\\n\t\t\t\tA, 0x0, 0, NameAndTypeKey("));
        assert!(text.contains("\t\t\tFIELD_INFO( /* A next */ \\\n\t\t\t\tA, 0x8000, 1, NameAndTypeKey("));
        assert!(text.contains("\t\t\tSTATIC_FIELD_INFO( /* long count */ \\\n\t\t\t\tA, 0x4009, 1, NameAndTypeKey("));
    }

    #[test]
    fn constant_pools_flag_linked_entries() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root(),
            ClassBuilder::new("A").method_code(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "make",
                "()V",
                vec![
                    wide(0xbb, Sym::class("A")),
                    wide(0xbb, Sym::class("Missing")),
                    op(&[0x57, 0x57, 0xb1]),
                ],
            ),
        ])
        .unwrap();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("\t\t\tROM_CPOOL_LENGTH(3),\n\t\t\tROM_CPOOL_CLASS(A),\n\t\t\tROM_CPOOL_UNRESOLVED_CLASS(0x"));
        assert!(text.contains("\t\t\t0, 135, 7\n"));
    }

    #[test]
    fn class_blocks_follow_table_order() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root(),
            ClassBuilder::new("p/Named")
                .method_code(
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    "<clinit>",
                    "()V",
                    vec![op(&[0x01]), wide(0xc0, Sym::class("[I")), op(&[0x57, 0xb1])],
                )
                .frame(0, vec![], vec![Item::Int]),
        ])
        .unwrap();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("struct AllClassblocks_Struct {\n\tstruct instanceClassStruct java_lang_Object;\n"));
        assert!(text.contains("\tstruct arrayClassStruct manufacturedArrayOfInt;\n"));
        assert!(text.contains(", 0x6001, \\\n\t\t0, CLASS_READY, \\\n"));
        assert!(text.contains(", 0x2001, \\\n\t\t0, CLASS_VERIFIED, \\\n"));
        assert!(text.contains("\t\t&AllClassblocks.java_lang_Object, \\\n"));
        assert!(text.contains("/* p */ \\\n"));
        assert!(text.contains("\t\t\t\t\t&AllStackMaps.p_Named_clinit, \\\n"));
        assert!(text.contains("\tARRAY_OF_PRIMITIVE( \\\n\t\tNULL, \n"));
        assert!(text.contains(", 0x3411, \\\n\t\tINT),\n"));
        assert!(text.contains(
            "ARRAY_CLASS PrimitiveArrayClasses[12] = {\n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\tNULL, \n\t&AllClassblocks.manufacturedArrayOfInt, \n\tNULL\n};\n"
        ));
    }

    #[test]
    fn relocatable_images_list_sections() {
        let fixture = Fixture::prepared(vec![ClassBuilder::root().method("a", "()V", &[0xb1])]).unwrap();
        let config = RomizerConfig {
            relocatable: true,
            ..Default::default()
        };
        let text = render(&fixture, &config);

        assert!(text.contains("#define NUMBER_OF_CODE_RESOURCES 1\n"));
        assert!(text.contains("#define NUMBER_OF_METHODTABLE_RESOURCES 1\n"));
        assert!(text.contains("void *ClassDefinitionSectionHeader = &ClassDefinitionSectionHeader;\n"));
        assert!(!text.contains("RunCustomCodeMethod"));
    }
}
