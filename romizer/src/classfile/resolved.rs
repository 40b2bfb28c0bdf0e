use crate::classfile::attribute::{Attribute, AttributeContext, AttributeDecoders, AttributeLevel, Code};
use crate::classfile::{ClassBody, ConstantInfoPool, FieldInfo, MethodInfo};
use crate::constant_pool::{ClassPool, ConstantPool, EntryRef};
use crate::error::{Error, Result};
use bitflags::bitflags;
use highway::{HighwayHash, HighwayHasher, Key};
use once_cell::sync::OnceCell;
use std::sync::Arc;

bitflags! {

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
    }

}

impl AccessFlags {
    /// Keeps the bits the target runtime understands; the rest of the class
    /// file's flag word is ignored.
    pub fn from_class_file(bits: u16) -> Self {
        Self::from_bits_truncate(bits)
    }
}

pub type ClassId = u32;

/// Primitive array element codes of the target runtime.
pub mod primitive {
    pub const T_BOOLEAN: u8 = 4;
    pub const T_CHAR: u8 = 5;
    pub const T_FLOAT: u8 = 6;
    pub const T_DOUBLE: u8 = 7;
    pub const T_BYTE: u8 = 8;
    pub const T_SHORT: u8 = 9;
    pub const T_INT: u8 = 10;
    pub const T_LONG: u8 = 11;

    pub fn from_descriptor(c: u8) -> Option<u8> {
        Some(match c {
            b'Z' => T_BOOLEAN,
            b'C' => T_CHAR,
            b'F' => T_FLOAT,
            b'D' => T_DOUBLE,
            b'B' => T_BYTE,
            b'S' => T_SHORT,
            b'I' => T_INT,
            b'J' => T_LONG,
            _ => return None,
        })
    }

    pub fn name(code: u8) -> Option<&'static str> {
        Some(match code {
            T_BOOLEAN => "boolean",
            T_CHAR => "char",
            T_FLOAT => "float",
            T_DOUBLE => "double",
            T_BYTE => "byte",
            T_SHORT => "short",
            T_INT => "int",
            T_LONG => "long",
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayElement {
    /// A class or a sub-array, by name.
    Class(Arc<String>),
    /// One of the [`primitive`] codes.
    Primitive(u8),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Instance,
    Array { element: ArrayElement },
}

#[derive(Debug)]
pub struct ClassRecord {
    pub id: ClassId,
    pub name: Arc<String>,
    pub access: AccessFlags,
    pub kind: ClassKind,
    pub super_name: Option<Arc<String>>,
    pub super_class: Option<ClassId>,
    /// Class entries naming the direct interfaces.
    pub interfaces: Vec<EntryRef>,
    pub interface_ids: Vec<ClassId>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
    pub pool: ClassPool,
    /// Emitted constant pool, filled in by compaction. Slot 0 is always
    /// empty, as is the slot after a long or double.
    pub constants: Vec<Option<EntryRef>>,
    /// Instance size in cells, superclass cells included.
    pub instance_size: u16,
    pub fully_quickened: bool,
}

impl ClassRecord {
    /// Builds a record from one class body whose pool has already been
    /// resolved into `pool`.
    pub fn from_body(
        body: &ClassBody,
        raw: &ConstantInfoPool,
        class_pool: ClassPool,
        pool: &mut ConstantPool,
        decoders: &AttributeDecoders,
    ) -> Result<Self> {
        let name = raw
            .class_name(body.this_class)
            .map(|name| Arc::new(name.to_string()))
            .ok_or_else(|| Error::format("<unknown>", format!("this_class {} is not a class entry", body.this_class)))?;

        let super_name = match body.super_class {
            0 => None,
            index => Some(
                raw.class_name(index)
                    .map(|name| Arc::new(name.to_string()))
                    .ok_or_else(|| Error::format(name.as_str(), format!("super_class {} is not a class entry", index)))?,
            ),
        };

        if super_name.is_none() && name.as_str() != "java/lang/Object" {
            return Err(Error::format(name.as_str(), "only java/lang/Object may lack a superclass"));
        }

        let interfaces = body
            .interfaces
            .iter()
            .map(|index| class_pool.entry(&name, *index))
            .collect::<Result<Vec<_>>>()?;

        let mut context = AttributeContext {
            class: name.as_str(),
            raw,
            class_pool: &class_pool,
            pool,
            decoders,
        };

        let fields = body
            .fields
            .iter()
            .map(|info| Field::new(info, &mut context))
            .collect::<Result<Vec<_>>>()?;

        let methods = body
            .methods
            .iter()
            .map(|info| Method::new(info, &mut context))
            .collect::<Result<Vec<_>>>()?;

        let attributes = decoders.decode_all(AttributeLevel::Member, &mut context, &body.attributes)?;

        Ok(Self {
            id: 0,
            name: name.clone(),
            access: AccessFlags::from_class_file(body.access_flags),
            kind: ClassKind::Instance,
            super_name,
            super_class: None,
            interfaces,
            interface_ids: Vec::new(),
            fields,
            methods,
            attributes,
            pool: class_pool,
            constants: Vec::new(),
            instance_size: 0,
            fully_quickened: false,
        })
    }

    /// An array class, which has no members of its own.
    pub fn array(name: Arc<String>, element: ArrayElement) -> Self {
        Self {
            id: 0,
            name,
            access: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
            kind: ClassKind::Array { element },
            super_name: Some(Arc::new("java/lang/Object".to_string())),
            super_class: None,
            interfaces: Vec::new(),
            interface_ids: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            pool: ClassPool::default(),
            constants: Vec::new(),
            instance_size: 0,
            fully_quickened: true,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    pub fn has_static_initializer(&self) -> bool {
        self.methods
            .iter()
            .any(|method| method.name.as_str() == "<clinit>" && method.descriptor.as_str() == "()V")
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        let key = member_key(name, descriptor);
        self.methods.iter().position(|method| method.key() == key)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        let key = member_key(name, descriptor);
        self.fields.iter().position(|field| field.key() == key)
    }

    pub fn source_file(&self) -> Option<&Arc<String>> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::SourceFile(name) => Some(name),
            _ => None,
        })
    }

    /// Every class entry the class's own data refers to, catch types and
    /// interfaces included.
    pub fn class_entries(&self, pool: &ConstantPool) -> Vec<EntryRef> {
        let mut entries: Vec<EntryRef> = self
            .pool
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| pool.class_name(*entry).is_some())
            .collect();

        for method in &self.methods {
            if let Some(code) = method.code() {
                entries.extend(code.handlers.iter().filter_map(|handler| handler.catch_type));
            }
        }

        entries.extend(self.interfaces.iter().copied());
        entries.sort();
        entries.dedup();
        entries
    }
}

static MEMBER_KEY: Key = Key([0x6b76_6d5f_726f_6d69, 0x7a65_725f_6b65_7973, 0x0, 0x1]);

/// Hash of a member's name and descriptor, used to match members across a
/// hierarchy without comparing strings.
pub fn member_key(name: &str, descriptor: &str) -> u64 {
    let mut hasher = HighwayHasher::new(MEMBER_KEY);
    hasher.append(name.as_bytes());
    hasher.append(&[0]);
    hasher.append(descriptor.as_bytes());
    hasher.finalize64()
}

#[derive(Clone, Debug)]
pub struct Field {
    pub class: ClassId,
    pub index: usize,
    pub access: AccessFlags,
    pub name: Arc<String>,
    pub descriptor: Arc<String>,
    pub field_type: FieldType,
    pub attributes: Vec<Attribute>,
    /// Cell offset into the instance for instance fields, or into the static
    /// store for statics.
    pub offset: u16,
    key: OnceCell<u64>,
}

impl Field {
    fn new(info: &FieldInfo, context: &mut AttributeContext<'_>) -> Result<Self> {
        let name = context.utf8(info.name_index)?;
        let descriptor = context.utf8(info.descriptor_index)?;

        let field_type = match FieldType::parse(&descriptor) {
            Some((field_type, length)) if length == descriptor.len() => field_type,
            _ => {
                return Err(Error::format(
                    context.class,
                    format!("malformed field descriptor {} for {}", descriptor, name),
                ))
            }
        };

        let decoders = context.decoders;

        Ok(Self {
            class: 0,
            index: 0,
            access: AccessFlags::from_class_file(info.access_flags),
            name,
            descriptor,
            field_type,
            attributes: decoders.decode_all(AttributeLevel::Member, context, &info.attributes)?,
            offset: 0,
            key: OnceCell::new(),
        })
    }

    pub fn key(&self) -> u64 {
        *self.key.get_or_init(|| member_key(&self.name, &self.descriptor))
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// Cells taken by a value of this field.
    pub fn cells(&self) -> u16 {
        self.field_type.cells()
    }

    pub fn constant_value(&self) -> Option<EntryRef> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::ConstantValue(entry) => Some(*entry),
            _ => None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Method {
    pub class: ClassId,
    pub index: usize,
    pub access: AccessFlags,
    pub name: Arc<String>,
    pub descriptor: Arc<String>,
    pub signature: MethodDescriptor,
    pub attributes: Vec<Attribute>,
    key: OnceCell<u64>,
}

impl Method {
    fn new(info: &MethodInfo, context: &mut AttributeContext<'_>) -> Result<Self> {
        let name = context.utf8(info.name_index)?;
        let descriptor = context.utf8(info.descriptor_index)?;

        let signature = MethodDescriptor::try_from(descriptor.as_str()).map_err(|_| {
            Error::format(
                context.class,
                format!("malformed method descriptor {} for {}", descriptor, name),
            )
        })?;

        let decoders = context.decoders;

        Ok(Self {
            class: 0,
            index: 0,
            access: AccessFlags::from_class_file(info.access_flags),
            name,
            descriptor,
            signature,
            attributes: decoders.decode_all(AttributeLevel::Member, context, &info.attributes)?,
            key: OnceCell::new(),
        })
    }

    pub fn key(&self) -> u64 {
        *self.key.get_or_init(|| member_key(&self.name, &self.descriptor))
    }

    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut Code> {
        self.attributes.iter_mut().find_map(|attribute| match attribute {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.access.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.access.contains(AccessFlags::NATIVE)
    }

    /// Argument words, including `this` for instance methods.
    pub fn args_size(&self) -> u16 {
        let receiver = if self.is_static() { 0 } else { 1 };
        receiver + self.signature.args.iter().map(FieldType::cells).sum::<u16>()
    }
}

#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub enum FieldType {
    Array {
        type_: Box<FieldType>,
        dimensions: usize,
    },
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Class(String),
}

#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub enum ReturnType {
    FieldType(FieldType),
    Void,
}

impl FieldType {
    /// Parses one type from the front of `slice`, returning it with the
    /// number of bytes it used.
    pub fn parse(slice: &str) -> Option<(Self, usize)> {
        Some((
            match slice.as_bytes().first()? {
                b'B' => FieldType::Byte,
                b'C' => FieldType::Char,
                b'D' => FieldType::Double,
                b'F' => FieldType::Float,
                b'I' => FieldType::Int,
                b'J' => FieldType::Long,
                b'S' => FieldType::Short,
                b'Z' => FieldType::Boolean,
                b'[' => {
                    let dimensions = slice.bytes().take_while(|byte| *byte == b'[').count();
                    let (inner, length) = FieldType::parse(&slice[dimensions..])?;

                    return Some((
                        FieldType::Array {
                            type_: Box::new(inner),
                            dimensions,
                        },
                        length + dimensions,
                    ));
                }
                b'L' => {
                    let end = slice.find(';')?;
                    if end < 2 {
                        return None;
                    }
                    return Some((FieldType::Class(String::from(&slice[1..end])), end + 1));
                }
                _ => return None,
            },
            1,
        ))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Array { .. } | FieldType::Class(_))
    }

    pub fn cells(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct MethodDescriptor {
    pub args: Vec<FieldType>,
    pub return_type: ReturnType,
}

impl TryFrom<&str> for MethodDescriptor {
    type Error = ();

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        if !value.starts_with('(') {
            return Err(());
        }

        let parameters_end = value.find(')').ok_or(())?;

        let mut idx = 1;

        let mut args = vec![];

        while idx < parameters_end {
            let (field_type, length) = FieldType::parse(&value[idx..parameters_end]).ok_or(())?;
            args.push(field_type);
            idx += length;
        }

        let returns = &value[parameters_end + 1..];

        let return_type = match returns {
            "V" => ReturnType::Void,
            _ => match FieldType::parse(returns) {
                Some((field_type, length)) if length == returns.len() => ReturnType::FieldType(field_type),
                _ => return Err(()),
            },
        };

        Ok(Self { args, return_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_parse() {
        let descriptor = MethodDescriptor::try_from("(I[[Ljava/lang/String;J)V").unwrap();

        assert_eq!(
            descriptor.args,
            vec![
                FieldType::Int,
                FieldType::Array {
                    type_: Box::new(FieldType::Class("java/lang/String".into())),
                    dimensions: 2
                },
                FieldType::Long
            ]
        );
        assert_eq!(descriptor.return_type, ReturnType::Void);

        assert!(MethodDescriptor::try_from("(Q)V").is_err());
        assert!(MethodDescriptor::try_from("()").is_err());
        assert!(MethodDescriptor::try_from("(L;)V").is_err());
    }

    #[test]
    fn member_keys_depend_on_name_and_type() {
        assert_eq!(member_key("foo", "()V"), member_key("foo", "()V"));
        assert_ne!(member_key("foo", "()V"), member_key("foo", "()I"));
        assert_ne!(member_key("fo", "o()V"), member_key("foo", "()V"));
    }

    #[test]
    fn wide_types_take_two_cells() {
        assert_eq!(FieldType::Long.cells(), 2);
        assert_eq!(FieldType::Double.cells(), 2);
        assert_eq!(FieldType::Class("A".into()).cells(), 1);
    }

    #[test]
    fn primitive_codes_match_descriptors() {
        assert_eq!(primitive::from_descriptor(b'I'), Some(primitive::T_INT));
        assert_eq!(primitive::from_descriptor(b'L'), None);
        assert_eq!(primitive::name(primitive::T_BOOLEAN), Some("boolean"));
    }
}
