pub mod attribute;
pub mod resolved;

use byteorder::{BigEndian, ReadBytesExt};
use parse_macro::JParse;
use romizer_types::JParse;
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Read};

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;
pub const MULTICLASS_MAGIC: u32 = 0xCAFE_BEEF;
pub const MULTICLASS_MINOR: u16 = 1;
pub const MULTICLASS_MAJOR: u16 = 0;

pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD: u8 = 9;
    pub const METHOD: u8 = 10;
    pub const INTERFACE_METHOD: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
}

#[derive(JParse, Clone, Debug, PartialEq)]
pub struct ClassFile {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantInfoPool,
    pub body: ClassBody,
}

/// Everything after the constant pool. Shared by single class files and
/// the members of a multi-class bundle.
#[derive(JParse, Clone, Debug, PartialEq)]
pub struct ClassBody {
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

/// Many classes behind one pre-deduplicated constant pool.
#[derive(JParse, Clone, Debug, PartialEq)]
pub struct MultiClass {
    pub magic: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantInfoPool,
    pub classes: Vec<ClassBody>,
}

impl MultiClass {
    pub fn new(constant_pool: ConstantInfoPool, classes: Vec<ClassBody>) -> Self {
        Self {
            magic: MULTICLASS_MAGIC,
            minor_version: MULTICLASS_MINOR,
            major_version: MULTICLASS_MAJOR,
            constant_pool,
            classes,
        }
    }
}

#[derive(JParse, Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(JParse, Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(JParse, Clone, Debug, PartialEq)]
pub struct AttributeInfo {
    pub name_index: u16,
    #[prefix = 4]
    pub info: Vec<u8>,
}

/// Raw constant pool, keyed by slot. The second slot of a long or double is
/// left empty.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConstantInfoPool {
    pub count: u16,
    pub constants: HashMap<u16, ConstantInfo>,
}

impl ConstantInfoPool {
    pub fn get(&self, index: u16) -> Option<&ConstantInfo> {
        self.constants.get(&index)
    }

    /// Appends a constant at the next free slot and returns its index.
    pub fn push(&mut self, constant: ConstantInfo) -> u16 {
        let index = self.count.max(1);
        let width = constant.slots();
        self.constants.insert(index, constant);
        self.count = index + width;
        index
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            ConstantInfo::Utf8(constant::Utf8Info { string }) => Some(string.as_str()),
            _ => None,
        }
    }

    /// Name of the class entry at `index`.
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            ConstantInfo::Class(constant::ClassInfo { name_index }) => self.utf8(*name_index),
            _ => None,
        }
    }
}

impl JParse for ConstantInfoPool {
    type Output = ConstantInfoPool;

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<Self::Output, Error> {
        let count = r.read_u16::<BigEndian>()?;

        let mut constants = HashMap::new();

        let mut slot = 1;

        while slot < count {
            let constant = ConstantInfo::from_bytes(&mut r)?;
            let width = constant.slots();

            if u32::from(slot) + u32::from(width) > u32::from(count) {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("two-slot constant at index {} overruns pool of {}", slot, count),
                ));
            }

            constants.insert(slot, constant);
            slot += width;
        }

        Ok(Self { count, constants })
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(self.count.max(1).to_be_bytes());

        for index in 1..self.count {
            if let Some(constant) = self.constants.get(&index) {
                out.extend(constant.to_bytes());
            }
        }

        out
    }
}

pub mod constant {
    use parse_macro::JParse;
    use romizer_types::JParse;
    use std::fmt::{Debug, Formatter};
    use std::io::{Error, ErrorKind, Read};
    use std::sync::Arc;

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct ClassInfo {
        pub name_index: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct RefInfo {
        pub class_index: u16,
        pub name_and_type_index: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct StringInfo {
        pub string_index: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct NameAndTypeInfo {
        pub name_index: u16,
        pub descriptor_index: u16,
    }

    #[derive(Clone, PartialEq)]
    pub struct Utf8Info {
        pub string: Arc<String>,
    }

    impl Utf8Info {
        pub fn new(string: &str) -> Self {
            Self {
                string: Arc::new(string.to_string()),
            }
        }
    }

    impl JParse for Utf8Info {
        type Output = Utf8Info;

        fn from_bytes_prefixed<R: Read, const PREFIX: usize>(
            mut r: R,
        ) -> Result<Self::Output, Error> {
            let bytes = <Vec<u8>>::from_bytes(&mut r)?;
            let string = cesu8::from_java_cesu8(&bytes)
                .map_err(|_| Error::new(ErrorKind::InvalidData, "invalid modified UTF-8 in constant pool"))?;

            Ok(Self {
                string: Arc::new(string.into_owned()),
            })
        }

        fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
            let bytes = cesu8::to_java_cesu8(&self.string);
            let mut out: Vec<u8> = (bytes.len() as u16).to_be_bytes().into();
            out.extend(bytes.iter());
            out
        }
    }

    impl Debug for Utf8Info {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "Utf8Info {{ string: \"{}\" }}", self.string)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstantInfo {
    Class(constant::ClassInfo),
    FieldRef(constant::RefInfo),
    MethodRef(constant::RefInfo),
    InterfaceMethodRef(constant::RefInfo),
    String(constant::StringInfo),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    NameAndType(constant::NameAndTypeInfo),
    Utf8(constant::Utf8Info),
}

impl ConstantInfo {
    pub fn tag(&self) -> u8 {
        match self {
            ConstantInfo::Class(_) => tag::CLASS,
            ConstantInfo::FieldRef(_) => tag::FIELD,
            ConstantInfo::MethodRef(_) => tag::METHOD,
            ConstantInfo::InterfaceMethodRef(_) => tag::INTERFACE_METHOD,
            ConstantInfo::String(_) => tag::STRING,
            ConstantInfo::Integer(_) => tag::INTEGER,
            ConstantInfo::Float(_) => tag::FLOAT,
            ConstantInfo::Long(_) => tag::LONG,
            ConstantInfo::Double(_) => tag::DOUBLE,
            ConstantInfo::NameAndType(_) => tag::NAME_AND_TYPE,
            ConstantInfo::Utf8(_) => tag::UTF8,
        }
    }

    /// Number of pool slots the constant occupies.
    pub fn slots(&self) -> u16 {
        match self {
            ConstantInfo::Long(_) | ConstantInfo::Double(_) => 2,
            _ => 1,
        }
    }
}

impl JParse for ConstantInfo {
    type Output = Self;

    fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<Self::Output, Error> {
        let tag = r.read_u8()?;

        Ok(match tag {
            tag::CLASS => Self::Class(constant::ClassInfo::from_bytes(&mut r)?),
            tag::FIELD => Self::FieldRef(constant::RefInfo::from_bytes(&mut r)?),
            tag::METHOD => Self::MethodRef(constant::RefInfo::from_bytes(&mut r)?),
            tag::INTERFACE_METHOD => Self::InterfaceMethodRef(constant::RefInfo::from_bytes(&mut r)?),
            tag::STRING => Self::String(constant::StringInfo::from_bytes(&mut r)?),
            tag::INTEGER => Self::Integer(i32::from_bytes(&mut r)?),
            tag::FLOAT => Self::Float(f32::from_bytes(&mut r)?),
            tag::LONG => Self::Long(i64::from_bytes(&mut r)?),
            tag::DOUBLE => Self::Double(f64::from_bytes(&mut r)?),
            tag::NAME_AND_TYPE => Self::NameAndType(constant::NameAndTypeInfo::from_bytes(&mut r)?),
            tag::UTF8 => Self::Utf8(constant::Utf8Info::from_bytes(&mut r)?),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported constant pool tag {}", tag),
                ))
            }
        })
    }

    fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];

        out.extend(match self {
            ConstantInfo::Class(info) => info.to_bytes(),
            ConstantInfo::FieldRef(info)
            | ConstantInfo::MethodRef(info)
            | ConstantInfo::InterfaceMethodRef(info) => info.to_bytes(),
            ConstantInfo::String(info) => info.to_bytes(),
            ConstantInfo::Integer(value) => value.to_bytes(),
            ConstantInfo::Float(value) => value.to_bytes(),
            ConstantInfo::Long(value) => value.to_bytes(),
            ConstantInfo::Double(value) => value.to_bytes(),
            ConstantInfo::NameAndType(info) => info.to_bytes(),
            ConstantInfo::Utf8(info) => info.to_bytes(),
        });

        out
    }
}

pub mod attribute_info {
    use crate::classfile::AttributeInfo;
    use byteorder::{BigEndian, ReadBytesExt};
    use parse_macro::JParse;
    use romizer_types::JParse;
    use std::io::{Error, ErrorKind, Read};

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct CodeAttributeInfo {
        pub max_stack: u16,
        pub max_locals: u16,
        #[prefix = 4]
        pub code: Vec<u8>,
        pub exception_table: Vec<ExceptionTableInfo>,
        pub attributes: Vec<AttributeInfo>,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct ExceptionTableInfo {
        pub start_pc: u16,
        pub end_pc: u16,
        pub handler_pc: u16,
        pub catch_type: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct ExceptionsAttributeInfo {
        pub exception_index_table: Vec<u16>,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct IndexAttributeInfo {
        pub index: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct LineNumberTableInfo {
        pub line_numbers: Vec<LineNumberInfo>,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct LineNumberInfo {
        pub start_pc: u16,
        pub line_number: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct LocalVariableTableInfo {
        pub local_variables: Vec<LocalVariableInfo>,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct LocalVariableInfo {
        pub start_pc: u16,
        pub length: u16,
        pub name_index: u16,
        pub descriptor_index: u16,
        pub index: u16,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct StackMapInfo {
        pub frames: Vec<StackMapFrameInfo>,
    }

    #[derive(JParse, Clone, Debug, PartialEq)]
    pub struct StackMapFrameInfo {
        pub offset: u16,
        pub locals: Vec<VerificationTypeInfo>,
        pub stack: Vec<VerificationTypeInfo>,
    }

    pub const ITEM_BOGUS: u8 = 0;
    pub const ITEM_INTEGER: u8 = 1;
    pub const ITEM_FLOAT: u8 = 2;
    pub const ITEM_DOUBLE: u8 = 3;
    pub const ITEM_LONG: u8 = 4;
    pub const ITEM_NULL: u8 = 5;
    pub const ITEM_INIT_OBJECT: u8 = 6;
    pub const ITEM_OBJECT: u8 = 7;
    pub const ITEM_NEW_OBJECT: u8 = 8;

    /// One stack-map item: a tag byte, plus a u2 operand for `Object`
    /// (pool index) and `NewObject` (code offset).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VerificationTypeInfo {
        pub tag: u8,
        pub operand: u16,
    }

    impl JParse for VerificationTypeInfo {
        type Output = Self;

        fn from_bytes_prefixed<R: Read, const PREFIX: usize>(mut r: R) -> Result<Self, Error> {
            let tag = r.read_u8()?;

            let operand = match tag {
                ITEM_OBJECT | ITEM_NEW_OBJECT => r.read_u16::<BigEndian>()?,
                ITEM_BOGUS..=ITEM_INIT_OBJECT => 0,
                _ => {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        format!("unknown stack map item tag {}", tag),
                    ))
                }
            };

            Ok(Self { tag, operand })
        }

        fn to_bytes_prefixed<const PREFIX: usize>(&self) -> Vec<u8> {
            let mut out = vec![self.tag];
            if matches!(self.tag, ITEM_OBJECT | ITEM_NEW_OBJECT) {
                out.extend(self.operand.to_be_bytes());
            }
            out
        }
    }
}
