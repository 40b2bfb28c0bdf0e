//! Assembles class files and bundles byte for byte for tests.

use crate::classfile::attribute_info::{
    CodeAttributeInfo, ExceptionTableInfo, IndexAttributeInfo, StackMapFrameInfo, StackMapInfo, VerificationTypeInfo,
    ITEM_DOUBLE, ITEM_INTEGER, ITEM_LONG, ITEM_NULL, ITEM_OBJECT,
};
use crate::classfile::constant::{ClassInfo, NameAndTypeInfo, RefInfo, StringInfo, Utf8Info};
use crate::classfile::attribute::AttributeDecoders;
use crate::classfile::resolved::AccessFlags;
use crate::constant_pool::ConstantPool;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::linker::Linker;
use crate::provider::{ClassProvider, MemoryProvider};
use crate::reader::ClassReader;
use crate::registry::ClassRegistry;
use crate::classfile::{
    AttributeInfo, ClassBody, ClassFile, ConstantInfo, ConstantInfoPool, FieldInfo, MethodInfo, MultiClass, CLASS_MAGIC,
};
use romizer_types::JParse;

/// A constant named by content rather than by index.
#[derive(Clone, Debug, PartialEq)]
pub enum Sym {
    Class(String),
    Field(String, String, String),
    Method(String, String, String),
    InterfaceMethod(String, String, String),
    String(String),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

impl Sym {
    pub fn class(name: &str) -> Self {
        Sym::Class(name.into())
    }

    pub fn field(class: &str, name: &str, descriptor: &str) -> Self {
        Sym::Field(class.into(), name.into(), descriptor.into())
    }

    pub fn method(class: &str, name: &str, descriptor: &str) -> Self {
        Sym::Method(class.into(), name.into(), descriptor.into())
    }

    pub fn interface_method(class: &str, name: &str, descriptor: &str) -> Self {
        Sym::InterfaceMethod(class.into(), name.into(), descriptor.into())
    }

    pub fn string(value: &str) -> Self {
        Sym::String(value.into())
    }
}

/// One piece of a method body.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Raw(Vec<u8>),
    /// Opcode followed by a two byte pool index.
    Wide(u8, Sym),
    /// `ldc` with a one byte pool index.
    Ldc(Sym),
    /// `invokeinterface` with its count and zero bytes.
    Interface(Sym, u8),
}

pub fn op(bytes: &[u8]) -> Insn {
    Insn::Raw(bytes.to_vec())
}

pub fn wide(opcode: u8, sym: Sym) -> Insn {
    Insn::Wide(opcode, sym)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Int,
    Long,
    Double,
    Null,
    Object(String),
}

#[derive(Clone, Debug)]
struct FieldDef {
    access: u16,
    name: String,
    descriptor: String,
    value: Option<Sym>,
}

#[derive(Clone, Debug)]
struct CodeDef {
    max_stack: u16,
    max_locals: u16,
    body: Vec<Insn>,
    handlers: Vec<(u16, u16, u16, Option<String>)>,
    frames: Vec<(u16, Vec<Item>, Vec<Item>)>,
}

#[derive(Clone, Debug)]
struct MethodDef {
    access: u16,
    name: String,
    descriptor: String,
    code: Option<CodeDef>,
}

#[derive(Clone, Debug)]
pub struct ClassBuilder {
    name: String,
    access: u16,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    source_file: Option<String>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            access: AccessFlags::PUBLIC.bits(),
            super_name: Some("java/lang/Object".into()),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            source_file: None,
        }
    }

    /// `java/lang/Object` itself, which has no superclass.
    pub fn root() -> Self {
        Self {
            super_name: None,
            ..Self::new("java/lang/Object")
        }
    }

    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access.bits();
        self
    }

    pub fn superclass(mut self, name: &str) -> Self {
        self.super_name = Some(name.into());
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.into());
        self
    }

    pub fn field(self, name: &str, descriptor: &str, access: u16) -> Self {
        self.field_with(access, name, descriptor, None)
    }

    pub fn static_field(self, name: &str, descriptor: &str, value: Option<Sym>) -> Self {
        self.field_with(
            (AccessFlags::PUBLIC | AccessFlags::STATIC).bits(),
            name,
            descriptor,
            value,
        )
    }

    pub fn field_with(mut self, access: u16, name: &str, descriptor: &str, value: Option<Sym>) -> Self {
        self.fields.push(FieldDef {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            value,
        });
        self
    }

    /// Public instance method with raw code.
    pub fn method(self, name: &str, descriptor: &str, code: &[u8]) -> Self {
        self.method_code(AccessFlags::PUBLIC, name, descriptor, vec![op(code)])
    }

    pub fn method_code(mut self, access: AccessFlags, name: &str, descriptor: &str, body: Vec<Insn>) -> Self {
        self.methods.push(MethodDef {
            access: access.bits(),
            name: name.into(),
            descriptor: descriptor.into(),
            code: Some(CodeDef {
                max_stack: 4,
                max_locals: 4,
                body,
                handlers: vec![],
                frames: vec![],
            }),
        });
        self
    }

    /// Native or abstract method, which carries no code.
    pub fn bodiless(mut self, access: AccessFlags, name: &str, descriptor: &str) -> Self {
        self.methods.push(MethodDef {
            access: access.bits(),
            name: name.into(),
            descriptor: descriptor.into(),
            code: None,
        });
        self
    }

    fn last_code(&mut self) -> &mut CodeDef {
        self.methods
            .last_mut()
            .and_then(|method| method.code.as_mut())
            .expect("last method has no code")
    }

    pub fn limits(mut self, max_stack: u16, max_locals: u16) -> Self {
        let code = self.last_code();
        code.max_stack = max_stack;
        code.max_locals = max_locals;
        self
    }

    pub fn handler(mut self, start: u16, end: u16, handler: u16, catch_type: Option<&str>) -> Self {
        self.last_code()
            .handlers
            .push((start, end, handler, catch_type.map(String::from)));
        self
    }

    pub fn frame(mut self, offset: u16, locals: Vec<Item>, stack: Vec<Item>) -> Self {
        self.last_code().frames.push((offset, locals, stack));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = PoolBuilder::default();
        let body = self.body(&mut pool);

        ClassFile {
            magic: CLASS_MAGIC,
            minor_version: 0,
            major_version: 45,
            constant_pool: pool.raw,
            body,
        }
        .to_bytes()
    }

    pub fn bundle(classes: Vec<ClassBuilder>) -> Vec<u8> {
        let mut pool = PoolBuilder::default();
        let bodies = classes.iter().map(|class| class.body(&mut pool)).collect();
        MultiClass::new(pool.raw, bodies).to_bytes()
    }

    fn body(&self, pool: &mut PoolBuilder) -> ClassBody {
        let this_class = pool.class(&self.name);
        let super_class = self.super_name.as_deref().map(|name| pool.class(name)).unwrap_or(0);
        let interfaces = self.interfaces.iter().map(|name| pool.class(name)).collect();

        let fields = self
            .fields
            .iter()
            .map(|field| FieldInfo {
                access_flags: field.access,
                name_index: pool.utf8(&field.name),
                descriptor_index: pool.utf8(&field.descriptor),
                attributes: field
                    .value
                    .as_ref()
                    .map(|value| {
                        let index = pool.sym(value);
                        vec![pool.attribute("ConstantValue", IndexAttributeInfo { index }.to_bytes())]
                    })
                    .unwrap_or_default(),
            })
            .collect();

        let methods = self
            .methods
            .iter()
            .map(|method| MethodInfo {
                access_flags: method.access,
                name_index: pool.utf8(&method.name),
                descriptor_index: pool.utf8(&method.descriptor),
                attributes: method
                    .code
                    .as_ref()
                    .map(|code| vec![pool.code(code)])
                    .unwrap_or_default(),
            })
            .collect();

        let attributes = self
            .source_file
            .as_ref()
            .map(|name| {
                let index = pool.utf8(name);
                vec![pool.attribute("SourceFile", IndexAttributeInfo { index }.to_bytes())]
            })
            .unwrap_or_default();

        ClassBody {
            access_flags: self.access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        }
    }
}

#[derive(Default)]
struct PoolBuilder {
    raw: ConstantInfoPool,
}

impl PoolBuilder {
    fn add(&mut self, constant: ConstantInfo) -> u16 {
        let existing = (1..self.raw.count).find(|index| self.raw.get(*index) == Some(&constant));
        existing.unwrap_or_else(|| self.raw.push(constant))
    }

    fn utf8(&mut self, string: &str) -> u16 {
        self.add(ConstantInfo::Utf8(Utf8Info::new(string)))
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.add(ConstantInfo::Class(ClassInfo { name_index }))
    }

    fn member(&mut self, class: &str, name: &str, descriptor: &str) -> RefInfo {
        let class_index = self.class(class);
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let name_and_type_index = self.add(ConstantInfo::NameAndType(NameAndTypeInfo {
            name_index,
            descriptor_index,
        }));
        RefInfo {
            class_index,
            name_and_type_index,
        }
    }

    fn sym(&mut self, sym: &Sym) -> u16 {
        match sym {
            Sym::Class(name) => self.class(name),
            Sym::Field(class, name, descriptor) => {
                let info = self.member(class, name, descriptor);
                self.add(ConstantInfo::FieldRef(info))
            }
            Sym::Method(class, name, descriptor) => {
                let info = self.member(class, name, descriptor);
                self.add(ConstantInfo::MethodRef(info))
            }
            Sym::InterfaceMethod(class, name, descriptor) => {
                let info = self.member(class, name, descriptor);
                self.add(ConstantInfo::InterfaceMethodRef(info))
            }
            Sym::String(value) => {
                let string_index = self.utf8(value);
                self.add(ConstantInfo::String(StringInfo { string_index }))
            }
            Sym::Int(value) => self.add(ConstantInfo::Integer(*value)),
            Sym::Float(value) => self.add(ConstantInfo::Float(*value)),
            Sym::Long(value) => self.add(ConstantInfo::Long(*value)),
            Sym::Double(value) => self.add(ConstantInfo::Double(*value)),
        }
    }

    fn attribute(&mut self, name: &str, info: Vec<u8>) -> AttributeInfo {
        AttributeInfo {
            name_index: self.utf8(name),
            info,
        }
    }

    fn item(&mut self, item: &Item) -> VerificationTypeInfo {
        match item {
            Item::Int => VerificationTypeInfo { tag: ITEM_INTEGER, operand: 0 },
            Item::Long => VerificationTypeInfo { tag: ITEM_LONG, operand: 0 },
            Item::Double => VerificationTypeInfo { tag: ITEM_DOUBLE, operand: 0 },
            Item::Null => VerificationTypeInfo { tag: ITEM_NULL, operand: 0 },
            Item::Object(name) => VerificationTypeInfo {
                tag: ITEM_OBJECT,
                operand: self.class(name),
            },
        }
    }

    fn code(&mut self, spec: &CodeDef) -> AttributeInfo {
        let mut code = Vec::new();

        for insn in &spec.body {
            match insn {
                Insn::Raw(bytes) => code.extend(bytes),
                Insn::Wide(opcode, sym) => {
                    let index = self.sym(sym);
                    code.push(*opcode);
                    code.extend(index.to_be_bytes());
                }
                Insn::Ldc(sym) => {
                    let index = self.sym(sym);
                    code.push(0x12);
                    code.push(index as u8);
                }
                Insn::Interface(sym, count) => {
                    let index = self.sym(sym);
                    code.push(0xB9);
                    code.extend(index.to_be_bytes());
                    code.extend([*count, 0]);
                }
            }
        }

        let exception_table = spec
            .handlers
            .iter()
            .map(|(start_pc, end_pc, handler_pc, catch_type)| ExceptionTableInfo {
                start_pc: *start_pc,
                end_pc: *end_pc,
                handler_pc: *handler_pc,
                catch_type: catch_type.as_deref().map(|name| self.class(name)).unwrap_or(0),
            })
            .collect();

        let mut attributes = Vec::new();

        if !spec.frames.is_empty() {
            let frames = spec
                .frames
                .iter()
                .map(|(offset, locals, stack)| StackMapFrameInfo {
                    offset: *offset,
                    locals: locals.iter().map(|item| self.item(item)).collect(),
                    stack: stack.iter().map(|item| self.item(item)).collect(),
                })
                .collect();
            let info = StackMapInfo { frames }.to_bytes();
            attributes.push(self.attribute("StackMap", info));
        }

        let info = CodeAttributeInfo {
            max_stack: spec.max_stack,
            max_locals: spec.max_locals,
            code,
            exception_table,
            attributes,
        }
        .to_bytes();

        self.attribute("Code", info)
    }
}

/// Classes read into a fresh registry, optionally linked.
#[derive(Debug)]
pub struct Fixture {
    pub registry: ClassRegistry,
    pub pool: ConstantPool,
    pub diagnostics: Diagnostics,
}

impl Fixture {
    pub fn read(classes: Vec<ClassBuilder>) -> Result<Self> {
        let decoders = AttributeDecoders::default();
        let mut fixture = Self {
            registry: ClassRegistry::new(),
            pool: ConstantPool::new(),
            diagnostics: Diagnostics::new(),
        };

        for class in classes {
            let records = ClassReader::new(&mut fixture.pool, &decoders).read(&class.name, &class.build())?;
            Linker::register(&mut fixture.registry, &mut fixture.diagnostics, records);
        }

        Ok(fixture)
    }

    pub fn linked(classes: Vec<ClassBuilder>) -> Result<Self> {
        Self::linked_with(classes, &MemoryProvider::new())
    }

    pub fn linked_with(classes: Vec<ClassBuilder>, provider: &dyn ClassProvider) -> Result<Self> {
        let mut fixture = Self::read(classes)?;
        let decoders = AttributeDecoders::default();

        Linker::new(
            &mut fixture.registry,
            &mut fixture.pool,
            provider,
            &decoders,
            &mut fixture.diagnostics,
        )
        .link()?;

        Ok(fixture)
    }
}

impl Fixture {
    /// Linked, quickened and compacted, the way an image is written.
    pub fn prepared(classes: Vec<ClassBuilder>) -> Result<Self> {
        let mut fixture = Self::linked(classes)?;

        crate::quicken::quicken_all(&mut fixture.registry, &fixture.pool, &mut fixture.diagnostics, false)?;
        crate::linker::materialise_arrays(&mut fixture.registry, &mut fixture.pool)?;
        crate::compact::compact_pools(&mut fixture.registry, &mut fixture.pool, true)?;

        Ok(fixture)
    }
}
