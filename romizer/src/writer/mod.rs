//! Emission of the linked program as statically initialised C data.
//!
//! [`ImageWriter`] first walks every class once to fill and close the key
//! tables, then writes the image in a fixed order: prolog, class block
//! declarations, interned strings, the static store, the UTF table, the class
//! definitions and the epilog. The same writer produces the relocation list
//! and the native method table used by the other build configurations.

mod classes;
pub mod names;
mod natives;
pub mod output;
pub mod section;
pub mod stack_map;
pub mod statics;
pub mod tables;

pub use output::CodeWriter;
pub use statics::StaticStore;

use crate::classfile::resolved::{AccessFlags, ArrayElement, ClassId, ClassKind, ClassRecord};
use crate::config::RomizerConfig;
use crate::constant_pool::{Constant, ConstantPool, MethodId};
use crate::error::{Error, Result};
use crate::keys::{ClassName, Keys};
use crate::linker::array_element;
use crate::registry::ClassRegistry;
use names::{class_native_name, MethodNames};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;

/// Classes the runtime reaches through a global of its own.
pub const PUBLIC_CLASSES: [(&str, &str); 7] = [
    ("JavaLangObject", "java/lang/Object"),
    ("JavaLangClass", "java/lang/Class"),
    ("JavaLangString", "java/lang/String"),
    ("JavaLangThread", "java/lang/Thread"),
    ("JavaLangSystem", "java/lang/System"),
    ("JavaLangThrowable", "java/lang/Throwable"),
    ("JavaLangError", "java/lang/Error"),
];

/// Member keys the runtime looks methods up by.
pub const PUBLIC_NAME_TYPES: [(&str, &str, &str); 4] = [
    ("initNameAndType", "<init>", "()V"),
    ("clinitNameAndType", "<clinit>", "()V"),
    ("runNameAndType", "run", "()V"),
    ("mainNameAndType", "main", "([Ljava/lang/String;)V"),
];

const CUSTOM_CODE_CLASS: &str = "java/lang/Class";
const CUSTOM_CODE_METHOD: (&str, &str) = ("runCustomCode", "()V");

/// Space taken by the image, counted while it is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageStats {
    pub classes: usize,
    pub methods: usize,
    pub code_bytes: usize,
    pub catch_frames: usize,
    pub fields: usize,
    pub constants: usize,
    pub java_strings: usize,
}

impl fmt::Display for ImageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} classes", self.classes)?;
        writeln!(f, "{} method blocks", self.methods)?;
        writeln!(f, "{} bytes of Java code", self.code_bytes)?;
        writeln!(f, "{} catch frames", self.catch_frames)?;
        writeln!(f, "{} field blocks", self.fields)?;
        writeln!(f, "{} constant pool entries", self.constants)?;
        write!(f, "{} Java strings", self.java_strings)
    }
}

/// How an entry of the class table is laid out in `AllClassblocks`.
enum BlockKind<'a> {
    Instance(&'a ClassRecord),
    Array { access: AccessFlags, element: ArrayElement },
    /// Known by name only.
    Raw,
}

struct ClassBlock<'a> {
    name: ClassName,
    native: String,
    kind: BlockKind<'a>,
}

pub struct ImageWriter<'a> {
    registry: &'a ClassRegistry,
    pool: &'a ConstantPool,
    config: &'a RomizerConfig,
    keys: Keys,
    methods: HashMap<ClassId, MethodNames>,
    statics: StaticStore,
    custom_code: Option<MethodId>,
    date: String,
    stats: ImageStats,
}

impl<'a> ImageWriter<'a> {
    /// Lays out the static store and fills the key tables. Every name the
    /// image uses is known once this returns.
    pub fn new(
        registry: &'a ClassRegistry,
        pool: &'a ConstantPool,
        config: &'a RomizerConfig,
        date: impl Into<String>,
    ) -> Result<Self> {
        let methods = registry
            .iter()
            .filter(|record| record.kind == ClassKind::Instance)
            .map(|record| (record.id, MethodNames::new(record)))
            .collect();

        let custom_code = registry.by_name(CUSTOM_CODE_CLASS).and_then(|record| {
            record
                .find_method(CUSTOM_CODE_METHOD.0, CUSTOM_CODE_METHOD.1)
                .map(|index| MethodId { class: record.id, index })
        });

        let mut writer = Self {
            registry,
            pool,
            config,
            keys: Keys::new(),
            methods,
            statics: StaticStore::layout(registry, pool)?,
            custom_code,
            date: date.into(),
            stats: ImageStats {
                classes: registry.len(),
                ..Default::default()
            },
        };

        writer.initial_pass()?;
        Ok(writer)
    }

    /// Registers every member, string and class the image names, then
    /// closes the tables.
    fn initial_pass(&mut self) -> Result<()> {
        let registry = self.registry;
        let pool = self.pool;

        for record in registry.iter() {
            if record.is_array() {
                let name = parse_class_name(&record.name)?;
                self.keys.add_array_class(&name)?;
                continue;
            }

            self.keys.class_key(&record.name)?;

            for method in &record.methods {
                self.keys.name_and_type_key(&method.name, &method.descriptor)?;
                if let Some(code) = method.code() {
                    stack_map::register(&mut self.keys.names, code)?;
                }
            }

            for field in &record.fields {
                self.keys.name_and_type_key(&field.name, &field.descriptor)?;

                if let Some(string) = field
                    .constant_value()
                    .filter(|_| field.is_static())
                    .and_then(|entry| pool.string(entry))
                {
                    self.keys.strings.intern(string.clone())?;
                }
            }

            for entry in record.constants.iter().flatten() {
                match pool.constant(*entry) {
                    Constant::String(_) => {
                        if let Some(string) = pool.string(*entry) {
                            self.keys.strings.intern(string.clone())?;
                        }
                    }
                    Constant::Class(_) if pool.target(*entry).is_none() => {
                        if let Some(name) = pool.class_name(*entry) {
                            self.keys.class_key(name)?;
                        }
                    }
                    Constant::FieldRef { .. } | Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. }
                        if pool.target(*entry).is_none() =>
                    {
                        if let Some(member) = pool.member(*entry) {
                            self.keys.class_key(member.class_name)?;
                            self.keys.name_and_type_key(member.name, member.descriptor)?;
                        }
                    }
                    _ => {}
                }
            }
        }

        for (_, name, descriptor) in PUBLIC_NAME_TYPES {
            self.keys.name_and_type_key(name, descriptor)?;
        }

        self.keys.close();

        log::debug!(
            "key tables closed: {} names, {} classes, {} strings",
            self.keys.names.len(),
            self.keys.classes.len(),
            self.keys.strings.len()
        );

        Ok(())
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn statics(&self) -> &StaticStore {
        &self.statics
    }

    pub fn stats(&self) -> ImageStats {
        self.stats
    }

    fn target(&self) -> String {
        self.config.output.display().to_string()
    }

    /// Every class of the class table in the order it was entered, with
    /// array classes made up for names that never got a record.
    fn class_blocks(&self) -> Result<Vec<ClassBlock<'a>>> {
        let registry = self.registry;

        self.keys
            .classes
            .table()
            .iter()
            .map(|(name, _)| {
                let text = name.to_string();

                let kind = match registry.by_name(&text) {
                    Some(record) => match &record.kind {
                        ClassKind::Instance => BlockKind::Instance(record),
                        ClassKind::Array { element } => BlockKind::Array {
                            access: record.access,
                            element: element.clone(),
                        },
                    },
                    None if name.is_array() => BlockKind::Array {
                        access: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
                        element: array_element(&text)
                            .ok_or_else(|| Error::internal(format!("malformed array class name {}", text)))?,
                    },
                    None => BlockKind::Raw,
                };

                Ok(ClassBlock {
                    native: class_native_name(&text),
                    name: name.clone(),
                    kind,
                })
            })
            .collect()
    }

    /// Writes the complete ROM image.
    pub fn write_image<W: Write>(&mut self, sink: W) -> Result<W> {
        let relocatable = self.config.relocatable;
        let blocks = self.class_blocks()?;
        let mut out = CodeWriter::new(sink);

        self.write_prolog(&mut out);
        self.write_declarations(&mut out, &blocks);

        out.page();
        if relocatable {
            out.println("void *StringSectionHeader = &StringSectionHeader;");
        }
        self.stats.java_strings = tables::write_string_table(&mut out, &self.keys.strings)?;
        if relocatable {
            out.println("void *StringSectionTrailer = &StringSectionTrailer;");
        }

        out.page();
        self.statics.write(&mut out, &self.keys.strings)?;

        out.page();
        if relocatable {
            out.println("void *UTFSectionHeader = &UTFSectionHeader;");
        }
        tables::write_name_table(&mut out, &self.keys.names, &self.keys.classes);
        if relocatable {
            out.println("void *UTFSectionTrailer = &UTFSectionTrailer;");
        }

        out.page();
        self.write_class_definitions(&mut out, &blocks)?;

        out.page();
        self.write_epilog(&mut out, &blocks)?;

        log::info!(
            "wrote {} classes, {} methods, {} bytes of code",
            self.stats.classes,
            self.stats.methods,
            self.stats.code_bytes
        );

        out.finish(&self.target())
    }

    /// Writes the method table declarations and the list of native methods
    /// a relocating loader has to patch.
    pub fn write_relocation_file<W: Write>(&mut self, sink: W) -> Result<W> {
        let blocks = self.class_blocks()?;
        let mut out = CodeWriter::new(sink);

        out.println("#include <global.h>");
        out.println("#include <stddef.h>");
        out.println("#include <rom.h>");
        out.newline();

        let instances = instance_records(&blocks);
        self.write_method_declarations(&mut out, &instances, true);

        out.println("#if ROMIZING");
        out.newline();
        natives::write_relocations(&mut out, self.registry, &self.methods);
        out.println("#endif");

        out.finish(&self.target())
    }

    /// Writes the table the runtime binds native methods through when it
    /// runs without a ROM image.
    pub fn write_native_table<W: Write>(&mut self, sink: W) -> Result<W> {
        let mut out = CodeWriter::new(sink);

        out.println("/* This is a generated file.  Do not modify.");
        out.println(format_args!(" * Generated on {}", self.date));
        out.println(" */");
        out.newline();
        out.newline();
        out.println("#include <global.h>");
        out.newline();
        out.println("#if !ROMIZING");

        natives::write_native_table(&mut out, self.registry, &self.methods);

        out.println("#endif");

        out.finish(&self.target())
    }

    fn write_prolog<W: Write>(&self, out: &mut CodeWriter<W>) {
        out.println("/* This is a generated file.  Do not modify.");
        out.println(format_args!(" * Generated on {}", self.date));
        out.println(" */");
        out.newline();
        out.newline();
        out.println(format_args!("#define ROM_GENERATION_DATE \"{}\"", self.date));
        out.newline();

        for line in [
            "#define COMPILING_ROMJAVA 1",
            "",
            "#include <global.h>",
            "#include \"rom.h\"",
            "",
            "#if ROMIZING",
            "",
        ] {
            out.println(line);
        }
    }

    fn write_epilog<W: Write>(&mut self, out: &mut CodeWriter<W>, blocks: &[ClassBlock<'_>]) -> Result<()> {
        if self.config.relocatable {
            out.println("#include \"src/runtime/PalmMain.c\"");
            out.println("#endif");
            return Ok(());
        }

        for (global, class) in PUBLIC_CLASSES {
            let Some(block) = blocks.iter().find(|block| block.name.to_string() == class) else {
                continue;
            };

            let kind = match block.kind {
                BlockKind::Array { .. } => "ARRAY_CLASS",
                _ => "INSTANCE_CLASS",
            };
            out.println(format_args!("{} {} = ({})&AllClassblocks.{};", kind, global, kind, block.native));
        }

        for (global, name, descriptor) in PUBLIC_NAME_TYPES {
            let key = self.keys.name_and_type_key(name, descriptor)?;
            out.println(format_args!("NameTypeKey {} = {};", global, key));
        }
        out.newline();

        for line in EPILOG {
            out.println(line);
        }

        Ok(())
    }
}

/// Registry instances in class table order.
fn instance_records<'a>(blocks: &[ClassBlock<'a>]) -> Vec<&'a ClassRecord> {
    blocks
        .iter()
        .filter_map(|block| match block.kind {
            BlockKind::Instance(record) => Some(record),
            _ => None,
        })
        .collect()
}

fn names_of<'m>(methods: &'m HashMap<ClassId, MethodNames>, record: &ClassRecord) -> Result<&'m MethodNames> {
    methods
        .get(&record.id)
        .ok_or_else(|| Error::internal(format!("class {} has no method names", record.name)))
}

fn parse_class_name(name: &str) -> Result<ClassName> {
    ClassName::parse(name).ok_or_else(|| Error::internal(format!("malformed class name {}", name)))
}

const EPILOG: &[&str] = &[
    "void InitializeROMImage() { ",
    "    memcpy(KVM_staticData, &KVM_masterStaticData, sizeof(KVM_staticData));",
    "}",
    "",
    "void FinalizeROMImage() { ",
    "    finalizeROMHashTable(UTFStringTable, offsetof(struct UTF_Hash_Entry, next));",
    "    finalizeROMHashTable(InternStringTable, offsetof(struct internedStringInstanceStruct, next));",
    "    finalizeROMHashTable(ClassTable, offsetof(struct classStruct, next));",
    "    KVM_staticData[0] = 0;",
    "}",
    "",
    "#if INCLUDEDEBUGCODE",
    "bool_t isROMString(void *x) { ",
    "    if (x == (void *)(&stringCharArrayInternal.ofClass)) { ",
    "        return TRUE;",
    "    } else { ",
    "        void *start = (void *)&stringArrayInternal[0];",
    "        void *end = (void *)((char *)start + sizeof(stringArrayInternal));",
    "        return x >= start && x < end;",
    "    }",
    "}",
    "",
    "bool_t isROMClass(void *x) { ",
    "    void *start = (void *)&AllClassblocks;",
    "    void *end  = (void *)((char *)start + sizeof(AllClassblocks));",
    "    return x >= start && x < end;",
    "}",
    "#endif",
    "",
    "#endif",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::resolved::AccessFlags;
    use crate::testing::{op, wide, ClassBuilder, Fixture, Sym};

    fn fixture() -> Fixture {
        Fixture::prepared(vec![
            ClassBuilder::root().method("hashCode", "()I", &[0x03, 0xac]),
            ClassBuilder::new("A")
                .static_field("greeting", "Ljava/lang/String;", Some(Sym::string("hi")))
                .method_code(
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    "make",
                    "()V",
                    vec![wide(0xbb, Sym::class("Gone")), op(&[0x57, 0xb1])],
                ),
        ])
        .unwrap()
    }

    fn render(fixture: &Fixture, config: &RomizerConfig) -> String {
        let mut writer = ImageWriter::new(&fixture.registry, &fixture.pool, config, "today").unwrap();
        String::from_utf8(writer.write_image(Vec::new()).unwrap()).unwrap()
    }

    #[test]
    fn image_parts_come_in_order() {
        let fixture = fixture();
        let text = render(&fixture, &RomizerConfig::default());

        let order = [
            "#define ROM_GENERATION_DATE \"today\"",
            "struct AllClassblocks_Struct {",
            "stringArrayInternal",
            "KVM_masterStaticData",
            "AllUTFStrings",
            "struct AllCode_Struct AllCode",
            "PrimitiveArrayClasses",
            "InitializeROMImage",
        ];

        let positions: Vec<usize> = order
            .iter()
            .map(|marker| text.find(marker).unwrap_or_else(|| panic!("missing {}", marker)))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", positions);
    }

    #[test]
    fn tables_close_before_writing() {
        let fixture = fixture();
        let config = RomizerConfig::default();
        let writer = ImageWriter::new(&fixture.registry, &fixture.pool, &config, "today").unwrap();
        let keys = writer.keys();

        assert!(keys.classes.is_closed());
        assert!(keys.classes.lookup_key(&ClassName::parse("A").unwrap()).is_some());
        assert!(keys.classes.lookup_key(&ClassName::parse("Gone").unwrap()).is_some());
        assert!(keys.names.get("hashCode").is_some());
        assert!(keys.strings.reference("hi").is_ok());
    }

    #[test]
    fn statistics_cover_the_image() {
        let fixture = fixture();
        let config = RomizerConfig::default();
        let mut writer = ImageWriter::new(&fixture.registry, &fixture.pool, &config, "today").unwrap();
        writer.write_image(Vec::new()).unwrap();

        let stats = writer.stats();
        assert_eq!(stats.classes, 2);
        assert_eq!(stats.methods, 2);
        assert_eq!(stats.code_bytes, 2 + 5);
        assert_eq!(stats.fields, 1);
        assert_eq!(stats.java_strings, 1);
        assert!(stats.to_string().starts_with("2 classes\n2 method blocks\n7 bytes of Java code\n"));
    }

    #[test]
    fn public_handles_only_for_present_classes() {
        let fixture = fixture();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("INSTANCE_CLASS JavaLangObject = (INSTANCE_CLASS)&AllClassblocks.java_lang_Object;\n"));
        assert!(!text.contains("JavaLangString ="));
        for (global, _, _) in PUBLIC_NAME_TYPES {
            assert!(text.contains(&format!("NameTypeKey {} = NameAndTypeKey(0x", global)));
        }
    }

    #[test]
    fn relocatable_images_end_with_the_loader() {
        let fixture = fixture();
        let text = render(
            &fixture,
            &RomizerConfig {
                relocatable: true,
                ..Default::default()
            },
        );

        assert!(text.contains("void *StringSectionHeader = &StringSectionHeader;\n"));
        assert!(text.contains("void *UTFSectionTrailer = &UTFSectionTrailer;\n"));
        assert!(text.ends_with("#include \"src/runtime/PalmMain.c\"\n#endif\n"));
        assert!(!text.contains("NameTypeKey"));
    }

    #[test]
    fn custom_code_is_marked() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root(),
            ClassBuilder::new("java/lang/Class").method_code(
                AccessFlags::PRIVATE | AccessFlags::STATIC,
                "runCustomCode",
                "()V",
                vec![op(&[0xb1])],
            ),
        ])
        .unwrap();
        let text = render(&fixture, &RomizerConfig::default());

        assert!(text.contains("\t\t\tCUSTOMCODE\n"));
        assert!(text.contains("RunCustomCodeMethod_MAX_STACK_SIZE"));
        assert!(text.contains(
            "METHOD RunCustomCodeMethod = (METHOD) ROM_CLINIT_METHOD(java_lang_Class, 0) /* void runCustomCode() */;\n"
        ));
    }

    #[test]
    fn relocation_file_declares_numbered_methods() {
        let fixture = Fixture::prepared(vec![
            ClassBuilder::root().bodiless(AccessFlags::PUBLIC | AccessFlags::NATIVE, "hashCode", "()I"),
        ])
        .unwrap();
        let config = RomizerConfig::default();
        let mut writer = ImageWriter::new(&fixture.registry, &fixture.pool, &config, "today").unwrap();
        let text = String::from_utf8(writer.write_relocation_file(Vec::new()).unwrap()).unwrap();

        assert!(text.contains("#if ROMIZING\n\nextern void Java_java_lang_Object_hashCode(void);\n"));
        assert!(text.contains("long NativeRelocationCount = 1;\n"));
        assert!(text.ends_with("\t\tJava_java_lang_Object_hashCode)\n};\n\n#endif\n"));
    }

    #[test]
    fn native_table_has_its_own_header() {
        let fixture = fixture();
        let config = RomizerConfig::default();
        let mut writer = ImageWriter::new(&fixture.registry, &fixture.pool, &config, "today").unwrap();
        let text = String::from_utf8(writer.write_native_table(Vec::new()).unwrap()).unwrap();

        assert!(text.starts_with(
            "/* This is a generated file.  Do not modify.\n * Generated on today\n */\n\n\n#include <global.h>\n\n#if !ROMIZING\n"
        ));
        assert!(!text.contains("_natives[] = {"));
    }
}
