#![cfg(test)]

use crate::config::{OutputMode, RomizerConfig};
use crate::constant_pool::Constant;
use crate::error::Error;
use crate::provider::MemoryProvider;
use crate::testing::{op, wide, ClassBuilder, Fixture, Insn, Sym};
use crate::classfile::constant::StringInfo;
use crate::classfile::resolved::AccessFlags;
use crate::classfile::{ClassFile, ConstantInfo};
use crate::diagnostics::Severity;
use crate::{format_date, Romizer, RunSummary};
use chrono::DateTime;
use parse_macro::JParse;
use romizer_types::JParse;
use std::fs;
use std::io::Cursor;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn parent() -> ClassBuilder {
    ClassBuilder::new("A").method("value", "()I", &[0x04, 0xac])
}

fn child() -> ClassBuilder {
    ClassBuilder::new("B").superclass("A").method_code(
        AccessFlags::PUBLIC,
        "twice",
        "()I",
        vec![op(&[0x2a]), wide(0xb6, Sym::method("A", "value", "()I")), op(&[0x05, 0x68, 0xac])],
    )
}

fn provider() -> MemoryProvider {
    let mut provider = MemoryProvider::new();
    provider.insert("java/lang/Object", ClassBuilder::root().build());
    provider.insert("A", parent().build());
    provider
}

fn config(mode: OutputMode) -> RomizerConfig {
    RomizerConfig {
        mode,
        generation_date: Some("Sun Oct 18 00:00:00 UTC 2026".to_string()),
        ..Default::default()
    }
}

fn romize(config: RomizerConfig) -> (String, RunSummary) {
    init_logging();

    let mut romizer = Romizer::new(config, Box::new(provider()));
    romizer.add_bytes("B.class", &child().build()).unwrap();

    let (bytes, summary) = romizer.run(Vec::new()).unwrap();
    (String::from_utf8(bytes).unwrap(), summary)
}

#[test]
fn constants_survive_linking() {
    let fixture = Fixture::linked(vec![ClassBuilder::root(), parent(), child()]).unwrap();
    let pool = &fixture.pool;
    let b = fixture.registry.by_name("B").unwrap();

    let mut members = Vec::new();
    let mut classes = Vec::new();

    for (_, entry) in b.pool.iter() {
        match pool.constant(entry) {
            Constant::MethodRef { .. } => {
                let member = pool.member(entry).unwrap();
                members.push((member.class_name.to_string(), member.name.to_string(), member.descriptor.to_string()));
            }
            Constant::Class(_) => classes.push(pool.class_name(entry).unwrap().to_string()),
            _ => {}
        }
    }

    assert_eq!(members, vec![("A".to_string(), "value".to_string(), "()I".to_string())]);
    assert!(classes.contains(&"A".to_string()));
    assert!(classes.contains(&"B".to_string()));
}

#[test]
fn unquickened_image_names_what_the_input_named() {
    let (text, summary) = romize(RomizerConfig {
        quicken: false,
        ..config(OutputMode::Image)
    });

    assert_eq!(summary.classes, 3);
    assert_eq!(summary.fully_quickened, 0);
    assert!(text.contains("METHOD(A, 0) /* int value() */"));
    assert!(text.contains("\"value\""));
    assert!(text.contains("\"twice\""));
    assert!(text.contains("struct instanceClassStruct A;"));
    assert!(text.contains("struct instanceClassStruct B;"));
}

#[test]
fn quickened_runs_report_each_class() {
    let (text, summary) = romize(config(OutputMode::Image));

    assert_eq!(summary.fully_quickened, 3);
    assert_eq!(summary.partially_quickened, 0);
    assert_eq!(summary.warnings(), 0);
    assert_eq!(summary.stats.classes, 3);
    assert_eq!(summary.stats.methods, 2);
    assert!(text.starts_with("/* This is a generated file.  Do not modify.\n * Generated on Sun Oct 18 00:00:00 UTC 2026\n"));
    assert!(text.contains("#define ROM_GENERATION_DATE \"Sun Oct 18 00:00:00 UTC 2026\"\n"));
    assert!(text.contains("INSTANCE_CLASS JavaLangObject = (INSTANCE_CLASS)&AllClassblocks.java_lang_Object;\n"));
    assert!(!text.contains("JavaLangThread"));
    assert!(text.contains("NameTypeKey mainNameAndType = NameAndTypeKey(0x"));
    assert!(text.ends_with("#endif\n\n#endif\n"));
}

#[test]
fn output_is_deterministic() {
    let (first, _) = romize(config(OutputMode::Image));
    let (second, _) = romize(config(OutputMode::Image));

    assert_eq!(first, second);
}

#[test]
fn other_output_modes() {
    let (relocations, _) = romize(config(OutputMode::Relocations));
    assert!(relocations.starts_with("#include <global.h>\n#include <stddef.h>\n#include <rom.h>\n\n"));
    assert!(relocations.contains("long NativeRelocationCount = 0;\n"));
    assert!(relocations.ends_with("};\n\n#endif\n"));

    let (natives, _) = romize(config(OutputMode::NativeTable));
    assert!(natives.contains("\n#if !ROMIZING\n"));
    assert!(natives.contains("const ClassNativeImplementationType nativeImplementations[] = {\n"));
    assert!(natives.ends_with("NATIVE_END_OF_LIST\n};\n#endif\n"));
}

#[test]
fn missing_classes_degrade_to_warnings() {
    init_logging();

    let stranger = ClassBuilder::new("C").method_code(
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        "make",
        "()V",
        vec![wide(0xbb, Sym::class("Nowhere")), op(&[0x57, 0xb1])],
    );

    let mut romizer = Romizer::new(
        RomizerConfig {
            warn: true,
            ..config(OutputMode::Image)
        },
        Box::new(provider()),
    );
    romizer.add_bytes("C.class", &stranger.build()).unwrap();

    let (bytes, summary) = romizer.run(Vec::new()).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    assert_eq!(summary.partially_quickened, 1);
    assert!(summary.warnings() > 0);
    assert!(text.contains("UNRESOLVED_CLASS(0x"));
}

#[test]
fn malformed_inputs_are_rejected() {
    let mut romizer = Romizer::new(RomizerConfig::default(), Box::new(MemoryProvider::new()));

    assert!(matches!(romizer.add_bytes("junk", &[0, 1, 2, 3]), Err(Error::BadMagic { .. })));
    assert!(romizer.add_bytes("short", &[0xca, 0xfe]).is_err());
    assert!(romizer.registry().is_empty());
}

#[test]
fn directories_are_read_in_path_order() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("java/lang")).unwrap();
    fs::write(root.path().join("java/lang/Object.class"), ClassBuilder::root().build()).unwrap();
    fs::write(root.path().join("A.class"), parent().build()).unwrap();
    fs::write(root.path().join("notes.txt"), b"not a class").unwrap();

    let mut romizer = Romizer::new(RomizerConfig::default(), Box::new(MemoryProvider::new()));
    let ids = romizer.add_path(root.path()).unwrap();

    assert_eq!(ids.len(), 2);
    assert!(romizer.registry().contains("A"));
    assert!(romizer.registry().contains("java/lang/Object"));
}

#[test]
fn constant_values_reach_the_image_exactly() {
    init_logging();

    let constants = ClassBuilder::new("K")
        .static_field("smallest", "I", Some(Sym::Int(i32::MIN)))
        .static_field("minus", "J", Some(Sym::Long(-1)))
        .static_field("half", "F", Some(Sym::Float(1.5)))
        .static_field("one", "D", Some(Sym::Double(1.0)))
        .static_field("greeting", "Ljava/lang/String;", Some(Sym::string("hi")))
        .method_code(
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            "load",
            "()V",
            vec![Insn::Ldc(Sym::Int(100_000)), op(&[0x57, 0xb1])],
        );

    let mut romizer = Romizer::new(config(OutputMode::Image), Box::new(provider()));
    romizer.add_bytes("K.class", &constants.build()).unwrap();

    let (bytes, _) = romizer.run(Vec::new()).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    assert!(text.contains("ROM_STATIC_INT((long)0x80000000)"));
    assert!(text.contains("ROM_STATIC_LONG(-1, -1)"));
    assert!(text.contains(&format!("ROM_STATIC_INT({})", 1.5f32.to_bits())));
    assert!(text.contains(&format!("ROM_STATIC_DOUBLE({}, 0)", 1.0f64.to_bits() >> 32)));
    assert!(text.contains("ROM_STATIC_STRING(&stringArrayInternal["));
    assert!(text.contains("ROM_CPOOL_INT(100000)"));
}

#[test]
fn malformed_files_are_skipped() {
    init_logging();

    let mut broken = ClassFile::from_bytes(Cursor::new(ClassBuilder::new("Broken").build())).unwrap();
    broken.constant_pool.push(ConstantInfo::String(StringInfo { string_index: 400 }));

    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("A.class"), parent().build()).unwrap();
    fs::write(root.path().join("Broken.class"), broken.to_bytes()).unwrap();

    let mut romizer = Romizer::new(RomizerConfig::default(), Box::new(provider()));
    let ids = romizer.add_path(root.path()).unwrap();

    assert_eq!(ids, vec![romizer.registry().id("A").unwrap()]);
    assert!(!romizer.registry().contains("Broken"));
    assert_eq!(romizer.diagnostics().count(Severity::Error), 1);

    let skipped = romizer.diagnostics().iter().next().unwrap();
    assert!(skipped.class.as_deref().unwrap().ends_with("Broken.class"));
    assert!(skipped.message.contains("out of range"));

    let (_, summary) = romizer.run(Vec::new()).unwrap();
    assert_eq!(summary.errors(), 1);
    assert!(summary.classes >= 2);
}

#[test]
fn dates_read_like_the_runtime_expects() {
    let at = |seconds| format_date(DateTime::from_timestamp(seconds, 0).unwrap());

    assert_eq!(at(0), "Thu Jan 01 00:00:00 UTC 1970");
    assert_eq!(at(1_000_000_000), "Sun Sep 09 01:46:40 UTC 2001");
    assert_eq!(at(951_782_400), "Tue Feb 29 00:00:00 UTC 2000");
}

#[derive(JParse, Debug, PartialEq, Eq, Clone)]
struct Framed {
    tag: u16,
    #[prefix = 1]
    items: Vec<u16>,
}

#[test]
fn derived_structures_honour_prefix_widths() {
    let framed = Framed { tag: 15, items: vec![12] };

    assert_eq!(framed.to_bytes(), vec![0, 15, 1, 0, 12]);
    assert_eq!(Framed::from_bytes(Cursor::new([0, 15, 1, 0, 12])).unwrap(), framed);
}
