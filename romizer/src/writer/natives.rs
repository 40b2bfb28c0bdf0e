//! Tables binding native methods to their C functions.

use super::names::{is_overloaded_native, MethodNames};
use super::output::CodeWriter;
use crate::classfile::resolved::{ClassId, ClassRecord, Method};
use crate::registry::ClassRegistry;
use std::collections::HashMap;
use std::io::Write;

fn spaces(length: isize) -> String {
    " ".repeat(length.max(1) as usize)
}

/// Every native method of every instance class with its C function, in
/// registry order.
fn natives<'r>(
    registry: &'r ClassRegistry,
    methods: &'r HashMap<ClassId, MethodNames>,
) -> Vec<(&'r ClassRecord, &'r Method, &'r str)> {
    registry
        .iter()
        .filter(|record| !record.is_array())
        .filter_map(|record| methods.get(&record.id).map(|names| (record, names)))
        .flat_map(|(record, names)| {
            record
                .methods
                .iter()
                .zip(&names.native)
                .filter_map(move |(method, native)| native.as_deref().map(|native| (record, method, native)))
        })
        .collect()
}

/// `extern` declarations and the list a relocating loader patches.
pub fn write_relocations<W: Write>(
    out: &mut CodeWriter<W>,
    registry: &ClassRegistry,
    methods: &HashMap<ClassId, MethodNames>,
) {
    let natives = natives(registry, methods);

    for (_, _, native) in &natives {
        out.println(format_args!("extern void {}(void);", native));
    }
    out.newline();
    out.newline();

    out.println(format_args!("long NativeRelocationCount = {};", natives.len()));
    out.println("struct NativeRelocationStruct NativeRelocations[] = {");
    for (position, (record, method, native)) in natives.iter().enumerate() {
        let class = methods.get(&record.id).map(|names| names.class.as_str()).unwrap_or_default();

        out.println("\tNATIVE_RELOCATION_METHOD(  \\");
        out.println(format_args!("\t\t{}, {}, \\", class, method.index));
        out.println(format_args!(
            "\t\t{}){}",
            native,
            if position + 1 < natives.len() { "," } else { "" }
        ));
    }
    out.println("};");
    out.newline();
}

/// Per-class lists of native functions by name, and the table of those
/// lists the runtime searches by class.
pub fn write_native_table<W: Write>(
    out: &mut CodeWriter<W>,
    registry: &ClassRegistry,
    methods: &HashMap<ClassId, MethodNames>,
) {
    let natives = natives(registry, methods);

    for (_, _, native) in &natives {
        out.println(format_args!("extern void {}(void);", native));
    }
    out.newline();
    out.newline();

    let mut classes: Vec<&ClassRecord> = natives.iter().map(|(record, _, _)| *record).collect();
    classes.dedup_by_key(|record| record.id);

    for record in &classes {
        let Some(names) = methods.get(&record.id) else {
            continue;
        };

        out.println(format_args!("const NativeImplementationType {}_natives[] = {{", names.class));
        for (_, method, native) in natives.iter().filter(|(owner, _, _)| owner.id == record.id) {
            out.print(format_args!(
                "\t{{ \"{}\",{}",
                method.name,
                spaces(20 - method.name.len() as isize)
            ));
            if is_overloaded_native(record, method) {
                out.print(format_args!("\"{}\", ", method.descriptor));
            } else {
                out.print("NULL, ");
            }
            out.println(format_args!("{}}},", native));
        }
        out.println("\tNATIVE_END_OF_LIST");
        out.println("};");
        out.newline();
    }

    out.println("const ClassNativeImplementationType nativeImplementations[] = {");
    for record in &classes {
        let Some(names) = methods.get(&record.id) else {
            continue;
        };

        let (package, base) = match record.name.rfind('/') {
            Some(slash) => (Some(&record.name[..slash]), &record.name[slash + 1..]),
            None => (None, record.name.as_str()),
        };

        out.print("\t{ ");
        match package {
            Some(package) => out.print(format_args!("\"{}\",{}", package, spaces(25 - package.len() as isize))),
            None => out.print(format_args!("0{}", spaces(26))),
        }
        out.print(format_args!("\"{}\",{}", base, spaces(25 - base.len() as isize)));
        out.println(format_args!("{}_natives }},", names.class));
    }
    out.println("NATIVE_END_OF_LIST");
    out.println("};");
}
