use crate::bytecode::{scan_pool_refs, PoolRef};
use crate::classfile::attribute_info::{
    CodeAttributeInfo, ExceptionsAttributeInfo, IndexAttributeInfo, LineNumberTableInfo, LocalVariableTableInfo,
    StackMapInfo, VerificationTypeInfo, ITEM_BOGUS, ITEM_DOUBLE, ITEM_FLOAT, ITEM_INIT_OBJECT, ITEM_INTEGER, ITEM_LONG,
    ITEM_NEW_OBJECT, ITEM_NULL, ITEM_OBJECT,
};
use crate::classfile::{AttributeInfo, ConstantInfoPool};
use crate::constant_pool::{ClassPool, ConstantPool, EntryRef};
use crate::error::{Error, Result};
use romizer_types::JParse;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Code(Code),
    Exceptions(Vec<EntryRef>),
    ConstantValue(EntryRef),
    LineNumberTable(Vec<LineNumber>),
    LocalVariableTable(Vec<LocalVariable>),
    StackMap(Vec<StackMapFrame>),
    SourceFile(Arc<String>),
    Uninterpreted { name: Arc<String>, bytes: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    pub handlers: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
    /// Constant pool operands still present in `bytes`. Quickening removes
    /// the ones it turns into instance offsets.
    pub pool_refs: Vec<PoolRef>,
}

impl Code {
    pub fn stack_map(&self) -> &[StackMapFrame] {
        self.attributes
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::StackMap(frames) => Some(frames.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class-local copy of the caught class; `None` catches everything.
    pub catch_type: Option<EntryRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: Arc<String>,
    pub descriptor: Arc<String>,
    pub index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMapFrame {
    pub offset: u16,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationType {
    Bogus,
    Integer,
    Float,
    Double,
    Long,
    Null,
    InitObject,
    Object(EntryRef),
    NewObject(u16),
}

impl VerificationType {
    /// Whether the slot holds a pointer the collector must trace.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::InitObject | VerificationType::Object(_) | VerificationType::NewObject(_)
        )
    }

    /// Longs and doubles take a second slot.
    pub fn slots(&self) -> usize {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }
}

/// What a decoder can see while turning attribute bytes into an [`Attribute`].
pub struct AttributeContext<'a> {
    pub class: &'a str,
    pub raw: &'a ConstantInfoPool,
    pub class_pool: &'a ClassPool,
    pub pool: &'a mut ConstantPool,
    pub decoders: &'a AttributeDecoders,
}

impl AttributeContext<'_> {
    pub fn entry(&self, index: u16) -> Result<EntryRef> {
        self.class_pool.entry(self.class, index)
    }

    pub fn utf8(&self, index: u16) -> Result<Arc<String>> {
        self.pool
            .utf8(self.entry(index)?)
            .cloned()
            .ok_or_else(|| Error::format(self.class, format!("constant {} is not a Utf8 entry", index)))
    }

    fn parse<T: JParse<Output = T>>(&self, cursor: &mut Cursor<&[u8]>) -> Result<T> {
        T::from_bytes(cursor).map_err(|error| Error::from_parse(self.class, error))
    }
}

pub type Decoder = fn(&mut AttributeContext<'_>, &mut Cursor<&[u8]>) -> Result<Attribute>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeLevel {
    /// Attributes of classes, fields and methods.
    Member,
    /// Attributes nested in a `Code` attribute.
    Code,
}

/// Name to decoder tables, one per attribute level. Names without a decoder
/// are kept as [`Attribute::Uninterpreted`].
#[derive(Clone, Debug)]
pub struct AttributeDecoders {
    member: HashMap<&'static str, Decoder>,
    code: HashMap<&'static str, Decoder>,
}

impl Default for AttributeDecoders {
    fn default() -> Self {
        let mut decoders = Self::empty();

        decoders.register(AttributeLevel::Member, "Code", decode_code);
        decoders.register(AttributeLevel::Member, "Exceptions", decode_exceptions);
        decoders.register(AttributeLevel::Member, "ConstantValue", decode_constant_value);
        decoders.register(AttributeLevel::Member, "SourceFile", decode_source_file);

        decoders.register(AttributeLevel::Code, "LineNumberTable", decode_line_numbers);
        decoders.register(AttributeLevel::Code, "LocalVariableTable", decode_local_variables);
        decoders.register(AttributeLevel::Code, "StackMap", decode_stack_map);

        decoders
    }
}

impl AttributeDecoders {
    pub fn empty() -> Self {
        Self {
            member: HashMap::new(),
            code: HashMap::new(),
        }
    }

    pub fn register(&mut self, level: AttributeLevel, name: &'static str, decoder: Decoder) {
        match level {
            AttributeLevel::Member => self.member.insert(name, decoder),
            AttributeLevel::Code => self.code.insert(name, decoder),
        };
    }

    fn lookup(&self, level: AttributeLevel, name: &str) -> Option<Decoder> {
        match level {
            AttributeLevel::Member => self.member.get(name).copied(),
            AttributeLevel::Code => self.code.get(name).copied(),
        }
    }

    pub fn decode(&self, level: AttributeLevel, context: &mut AttributeContext<'_>, info: &AttributeInfo) -> Result<Attribute> {
        let raw = context.raw;
        let class = context.class;
        let name = raw
            .utf8(info.name_index)
            .ok_or_else(|| Error::format(class, format!("attribute name {} is not a Utf8 entry", info.name_index)))?;

        let Some(decoder) = self.lookup(level, name) else {
            return Ok(Attribute::Uninterpreted {
                name: Arc::new(name.to_string()),
                bytes: info.info.clone(),
            });
        };

        let mut cursor = Cursor::new(info.info.as_slice());
        let attribute = decoder(context, &mut cursor)?;

        if cursor.position() as usize != info.info.len() {
            return Err(Error::format(
                class,
                format!(
                    "bad attribute length for {}: declared {}, decoded {}",
                    name,
                    info.info.len(),
                    cursor.position()
                ),
            ));
        }

        Ok(attribute)
    }

    pub fn decode_all(
        &self,
        level: AttributeLevel,
        context: &mut AttributeContext<'_>,
        infos: &[AttributeInfo],
    ) -> Result<Vec<Attribute>> {
        infos.iter().map(|info| self.decode(level, context, info)).collect()
    }
}

fn decode_code(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: CodeAttributeInfo = context.parse(cursor)?;

    let pool_refs = scan_pool_refs(&info.code).map_err(|error| Error::format(context.class, error.to_string()))?;

    let mut handlers = Vec::with_capacity(info.exception_table.len());

    for entry in &info.exception_table {
        let catch_type = match entry.catch_type {
            0 => None,
            index => {
                let shared = context.entry(index)?;
                Some(context.pool.local_copy(shared))
            }
        };

        handlers.push(ExceptionHandler {
            start_pc: entry.start_pc,
            end_pc: entry.end_pc,
            handler_pc: entry.handler_pc,
            catch_type,
        });
    }

    let decoders = context.decoders;
    let attributes = decoders.decode_all(AttributeLevel::Code, context, &info.attributes)?;

    Ok(Attribute::Code(Code {
        max_stack: info.max_stack,
        max_locals: info.max_locals,
        bytes: info.code,
        handlers,
        attributes,
        pool_refs,
    }))
}

fn decode_exceptions(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: ExceptionsAttributeInfo = context.parse(cursor)?;

    Ok(Attribute::Exceptions(
        info.exception_index_table
            .iter()
            .map(|index| context.entry(*index))
            .collect::<Result<_>>()?,
    ))
}

fn decode_constant_value(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: IndexAttributeInfo = context.parse(cursor)?;
    let entry = context.entry(info.index)?;

    if !context.pool.constant(entry).is_value() {
        return Err(Error::format(context.class, "ConstantValue does not name a literal"));
    }

    Ok(Attribute::ConstantValue(entry))
}

fn decode_source_file(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: IndexAttributeInfo = context.parse(cursor)?;
    Ok(Attribute::SourceFile(context.utf8(info.index)?))
}

fn decode_line_numbers(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: LineNumberTableInfo = context.parse(cursor)?;

    Ok(Attribute::LineNumberTable(
        info.line_numbers
            .iter()
            .map(|line| LineNumber {
                start_pc: line.start_pc,
                line_number: line.line_number,
            })
            .collect(),
    ))
}

fn decode_local_variables(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: LocalVariableTableInfo = context.parse(cursor)?;

    let mut variables = Vec::with_capacity(info.local_variables.len());

    for variable in &info.local_variables {
        variables.push(LocalVariable {
            start_pc: variable.start_pc,
            length: variable.length,
            name: context.utf8(variable.name_index)?,
            descriptor: context.utf8(variable.descriptor_index)?,
            index: variable.index,
        });
    }

    Ok(Attribute::LocalVariableTable(variables))
}

fn decode_stack_map(context: &mut AttributeContext<'_>, cursor: &mut Cursor<&[u8]>) -> Result<Attribute> {
    let info: StackMapInfo = context.parse(cursor)?;

    let items = |context: &AttributeContext<'_>, items: &[VerificationTypeInfo]| -> Result<Vec<VerificationType>> {
        items.iter().map(|item| verification_type(context, item)).collect()
    };

    let mut frames = Vec::with_capacity(info.frames.len());

    for frame in &info.frames {
        frames.push(StackMapFrame {
            offset: frame.offset,
            locals: items(context, &frame.locals)?,
            stack: items(context, &frame.stack)?,
        });
    }

    Ok(Attribute::StackMap(frames))
}

fn verification_type(context: &AttributeContext<'_>, item: &VerificationTypeInfo) -> Result<VerificationType> {
    Ok(match item.tag {
        ITEM_BOGUS => VerificationType::Bogus,
        ITEM_INTEGER => VerificationType::Integer,
        ITEM_FLOAT => VerificationType::Float,
        ITEM_DOUBLE => VerificationType::Double,
        ITEM_LONG => VerificationType::Long,
        ITEM_NULL => VerificationType::Null,
        ITEM_INIT_OBJECT => VerificationType::InitObject,
        ITEM_OBJECT => VerificationType::Object(context.entry(item.operand)?),
        ITEM_NEW_OBJECT => VerificationType::NewObject(item.operand),
        tag => return Err(Error::format(context.class, format!("unknown stack map item {}", tag))),
    })
}
