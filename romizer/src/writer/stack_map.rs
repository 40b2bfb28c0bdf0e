use super::output::{hex, CodeWriter};
use crate::classfile::attribute::{Code, StackMapFrame, VerificationType};
use crate::error::{Error, Result};
use crate::keys::NameTable;
use std::io::Write;

/// Short entries keep the stack size in the top four bits of the offset.
const MAX_SHORT_CODE_LENGTH: usize = 1023;
const MAX_SHORT_STACK: usize = 15;

/// Reference bits of one frame, one per slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBits {
    pub offset: u16,
    pub locals: Vec<bool>,
    pub stack: Vec<bool>,
}

fn slots(types: &[VerificationType]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(types.len());

    for item in types {
        bits.push(item.is_reference());
        if item.slots() == 2 {
            bits.push(false);
        }
    }

    bits
}

impl FrameBits {
    pub fn new(frame: &StackMapFrame) -> Self {
        Self {
            offset: frame.offset,
            locals: slots(&frame.locals),
            stack: slots(&frame.stack),
        }
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Locals from bit 0, the stack from bit `max_locals`. Bits past 63
    /// wrap around.
    pub fn bitmap(&self, max_locals: u16) -> u64 {
        let locals = self.locals.iter().enumerate();
        let stack = self
            .stack
            .iter()
            .enumerate()
            .map(|(index, bit)| (index + max_locals as usize, bit));

        locals
            .chain(stack)
            .filter(|(_, bit)| **bit)
            .fold(0u64, |map, (index, _)| map | 1u64.wrapping_shl(index as u32))
    }

    /// Name table form of the frame: the stack size, then the bitmap a
    /// byte at a time up to its last set bit.
    pub fn key_string(&self, max_locals: u16) -> Result<String> {
        let size = u32::try_from(self.stack_size()).ok().and_then(char::from_u32);
        let mut string = String::from(
            size.ok_or_else(|| Error::internal(format!("stack size {} does not fit a name", self.stack_size())))?,
        );

        let mut map = self.bitmap(max_locals);
        while map != 0 {
            string.push(char::from((map & 0xFF) as u8));
            map >>= 8;
        }

        Ok(string)
    }

    pub fn comment(&self, max_locals: u16) -> String {
        let mut comment = String::from("/* Locals: ");

        if max_locals == 0 {
            comment.push_str("<None>");
        } else {
            comment.extend(self.locals.iter().map(|bit| if *bit { 'X' } else { '-' }));
            for _ in self.locals.len()..max_locals as usize {
                comment.push('.');
            }
        }

        comment.push_str("; Stack: ");
        if self.stack.is_empty() {
            comment.push_str("<None>");
        } else {
            comment.extend(self.stack.iter().map(|bit| if *bit { 'X' } else { '-' }));
        }

        comment.push_str(" */");
        comment
    }
}

pub fn frames(code: &Code) -> Vec<FrameBits> {
    code.stack_map().iter().map(FrameBits::new).collect()
}

/// Whether every frame of the method packs into an offset and two bitmap
/// bytes.
pub fn use_short_form(code: &Code) -> bool {
    if code.bytes.len() > MAX_SHORT_CODE_LENGTH {
        return false;
    }

    if code.max_stack as usize <= MAX_SHORT_STACK && code.max_locals as usize + code.max_stack as usize <= 16 {
        return true;
    }

    frames(code)
        .iter()
        .all(|frame| frame.stack_size() <= MAX_SHORT_STACK && frame.bitmap(code.max_locals) <= 0xFFFF)
}

/// Registers the long-form frames of a method with the name table.
pub fn register(names: &mut NameTable, code: &Code) -> Result<usize> {
    if code.stack_map().is_empty() || use_short_form(code) {
        return Ok(0);
    }

    let frames = frames(code);
    for frame in &frames {
        names.key(&frame.key_string(code.max_locals)?)?;
    }

    Ok(frames.len())
}

/// Which method a stack map belongs to, for naming and comments.
pub struct MapOwner<'a> {
    pub class: &'a str,
    pub pretty: &'a str,
    pub native: &'a str,
}

pub fn print_declaration<W: Write>(out: &mut CodeWriter<W>, owner: &MapOwner<'_>, code: &Code, prefix: &str) {
    let count = code.stack_map().len();

    out.println(format_args!("{}struct {{ /* {}: {}*/", prefix, owner.class, owner.pretty));
    out.println(format_args!("{}\tunsigned short length;", prefix));

    if use_short_form(code) {
        out.println(format_args!(
            "{}\tstruct {{ unsigned short offset; unsigned char map[2]; }} frame[{}];",
            prefix, count
        ));
    } else {
        out.println(format_args!(
            "{}\tstruct {{ unsigned short offset; unsigned short info; }} frame[{}];",
            prefix, count
        ));
    }

    out.println(format_args!("{}}} {};", prefix, owner.native));
}

pub fn print_definition<W: Write>(
    out: &mut CodeWriter<W>,
    names: &NameTable,
    owner: &MapOwner<'_>,
    code: &Code,
    prefix: &str,
) -> Result<()> {
    let frames = frames(code);
    let short = use_short_form(code);
    let inner = format!("{}\t", prefix);

    out.println(format_args!("{}{{ /* {}: {}*/", prefix, owner.class, owner.pretty));
    out.println(format_args!(
        "{}{}{},",
        inner,
        frames.len(),
        if short { " | STACK_MAP_SHORT_ENTRY_FLAG" } else { "" }
    ));
    out.println(format_args!("{}{{", inner));

    for (index, frame) in frames.iter().enumerate() {
        out.println(format_args!("{}\t\t{}", inner, frame.comment(code.max_locals)));

        if short {
            let map = frame.bitmap(code.max_locals);
            out.print(format_args!(
                "{}\t{{{} + ({} << 12), {{ {}, {} }}",
                inner,
                frame.offset,
                frame.stack_size(),
                hex((map & 0xFF) as u32),
                hex((map >> 8 & 0xFF) as u32)
            ));
        } else {
            let string = frame.key_string(code.max_locals)?;
            let key = names
                .get(&string)
                .ok_or_else(|| Error::internal(format!("{}: stack map frame at {} has no key", owner.class, frame.offset)))?;
            out.print(format_args!("{}\t{{{}, {}", inner, frame.offset, hex(key)));
        }

        out.print("}");
        if index + 1 < frames.len() {
            out.println(",");
        } else {
            out.newline();
        }
    }

    out.println(format_args!("{}}}", inner));
    out.println(format_args!("{}}},", prefix));

    Ok(())
}
