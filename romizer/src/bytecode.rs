use byteorder::{BigEndian, ByteOrder};
use discrim::FromDiscriminant;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromDiscriminant)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    Nop = 0x00,
    Aconst_null = 0x01,
    Iconst_m1 = 0x02,
    Iconst_0 = 0x03,
    Iconst_1 = 0x04,
    Iconst_2 = 0x05,
    Iconst_3 = 0x06,
    Iconst_4 = 0x07,
    Iconst_5 = 0x08,
    Lconst_0 = 0x09,
    Lconst_1 = 0x0a,
    Fconst_0 = 0x0b,
    Fconst_1 = 0x0c,
    Fconst_2 = 0x0d,
    Dconst_0 = 0x0e,
    Dconst_1 = 0x0f,
    Bipush = 0x10,
    Sipush = 0x11,
    Ldc = 0x12,
    Ldc_w = 0x13,
    Ldc2_w = 0x14,
    Iload = 0x15,
    Lload = 0x16,
    Fload = 0x17,
    Dload = 0x18,
    Aload = 0x19,
    Iload_0 = 0x1a,
    Iload_1 = 0x1b,
    Iload_2 = 0x1c,
    Iload_3 = 0x1d,
    Lload_0 = 0x1e,
    Lload_1 = 0x1f,
    Lload_2 = 0x20,
    Lload_3 = 0x21,
    Fload_0 = 0x22,
    Fload_1 = 0x23,
    Fload_2 = 0x24,
    Fload_3 = 0x25,
    Dload_0 = 0x26,
    Dload_1 = 0x27,
    Dload_2 = 0x28,
    Dload_3 = 0x29,
    Aload_0 = 0x2a,
    Aload_1 = 0x2b,
    Aload_2 = 0x2c,
    Aload_3 = 0x2d,
    Iaload = 0x2e,
    Laload = 0x2f,
    Faload = 0x30,
    Daload = 0x31,
    Aaload = 0x32,
    Baload = 0x33,
    Caload = 0x34,
    Saload = 0x35,
    Istore = 0x36,
    Lstore = 0x37,
    Fstore = 0x38,
    Dstore = 0x39,
    Astore = 0x3a,
    Istore_0 = 0x3b,
    Istore_1 = 0x3c,
    Istore_2 = 0x3d,
    Istore_3 = 0x3e,
    Lstore_0 = 0x3f,
    Lstore_1 = 0x40,
    Lstore_2 = 0x41,
    Lstore_3 = 0x42,
    Fstore_0 = 0x43,
    Fstore_1 = 0x44,
    Fstore_2 = 0x45,
    Fstore_3 = 0x46,
    Dstore_0 = 0x47,
    Dstore_1 = 0x48,
    Dstore_2 = 0x49,
    Dstore_3 = 0x4a,
    Astore_0 = 0x4b,
    Astore_1 = 0x4c,
    Astore_2 = 0x4d,
    Astore_3 = 0x4e,
    Iastore = 0x4f,
    Lastore = 0x50,
    Fastore = 0x51,
    Dastore = 0x52,
    Aastore = 0x53,
    Bastore = 0x54,
    Castore = 0x55,
    Sastore = 0x56,
    Pop = 0x57,
    Pop2 = 0x58,
    Dup = 0x59,
    Dup_x1 = 0x5a,
    Dup_x2 = 0x5b,
    Dup2 = 0x5c,
    Dup2_x1 = 0x5d,
    Dup2_x2 = 0x5e,
    Swap = 0x5f,
    Iadd = 0x60,
    Ladd = 0x61,
    Fadd = 0x62,
    Dadd = 0x63,
    Isub = 0x64,
    Lsub = 0x65,
    Fsub = 0x66,
    Dsub = 0x67,
    Imul = 0x68,
    Lmul = 0x69,
    Fmul = 0x6a,
    Dmul = 0x6b,
    Idiv = 0x6c,
    Ldiv = 0x6d,
    Fdiv = 0x6e,
    Ddiv = 0x6f,
    Irem = 0x70,
    Lrem = 0x71,
    Frem = 0x72,
    Drem = 0x73,
    Ineg = 0x74,
    Lneg = 0x75,
    Fneg = 0x76,
    Dneg = 0x77,
    Ishl = 0x78,
    Lshl = 0x79,
    Ishr = 0x7a,
    Lshr = 0x7b,
    Iushr = 0x7c,
    Lushr = 0x7d,
    Iand = 0x7e,
    Land = 0x7f,
    Ior = 0x80,
    Lor = 0x81,
    Ixor = 0x82,
    Lxor = 0x83,
    Iinc = 0x84,
    I2l = 0x85,
    I2f = 0x86,
    I2d = 0x87,
    L2i = 0x88,
    L2f = 0x89,
    L2d = 0x8a,
    F2i = 0x8b,
    F2l = 0x8c,
    F2d = 0x8d,
    D2i = 0x8e,
    D2l = 0x8f,
    D2f = 0x90,
    I2b = 0x91,
    I2c = 0x92,
    I2s = 0x93,
    Lcmp = 0x94,
    Fcmpl = 0x95,
    Fcmpg = 0x96,
    Dcmpl = 0x97,
    Dcmpg = 0x98,
    Ifeq = 0x99,
    Ifne = 0x9a,
    Iflt = 0x9b,
    Ifge = 0x9c,
    Ifgt = 0x9d,
    Ifle = 0x9e,
    If_icmpeq = 0x9f,
    If_icmpne = 0xa0,
    If_icmplt = 0xa1,
    If_icmpge = 0xa2,
    If_icmpgt = 0xa3,
    If_icmple = 0xa4,
    If_acmpeq = 0xa5,
    If_acmpne = 0xa6,
    Goto = 0xa7,
    Jsr = 0xa8,
    Ret = 0xa9,
    Tableswitch = 0xaa,
    Lookupswitch = 0xab,
    Ireturn = 0xac,
    Lreturn = 0xad,
    Freturn = 0xae,
    Dreturn = 0xaf,
    Areturn = 0xb0,
    Return = 0xb1,
    Getstatic = 0xb2,
    Putstatic = 0xb3,
    Getfield = 0xb4,
    Putfield = 0xb5,
    Invokevirtual = 0xb6,
    Invokespecial = 0xb7,
    Invokestatic = 0xb8,
    Invokeinterface = 0xb9,
    New = 0xbb,
    Newarray = 0xbc,
    Anewarray = 0xbd,
    Arraylength = 0xbe,
    Athrow = 0xbf,
    Checkcast = 0xc0,
    Instanceof = 0xc1,
    Monitorenter = 0xc2,
    Monitorexit = 0xc3,
    Wide = 0xc4,
    Multianewarray = 0xc5,
    Ifnull = 0xc6,
    Ifnonnull = 0xc7,
    Goto_w = 0xc8,
    Jsr_w = 0xc9,

    Getfield_fast = 0xcb,
    Getfieldp_fast = 0xcc,
    Getfield2_fast = 0xcd,
    Putfield_fast = 0xce,
    Putfield2_fast = 0xcf,
    Getstatic_fast = 0xd0,
    Getstaticp_fast = 0xd1,
    Getstatic2_fast = 0xd2,
    Putstatic_fast = 0xd3,
    Putstatic2_fast = 0xd4,
    Invokevirtual_fast = 0xd6,
    Invokespecial_fast = 0xd7,
    Invokestatic_fast = 0xd8,
    Invokeinterface_fast = 0xd9,
    New_fast = 0xda,
    Anewarray_fast = 0xdb,
    Multianewarray_fast = 0xdc,
    Checkcast_fast = 0xdd,
    Instanceof_fast = 0xde,
    Customcode = 0xdf,
}

impl Opcode {
    pub fn decode(byte: u8) -> Option<Self> {
        Self::from_discriminant(byte).ok()
    }

    /// Length of the instruction in bytes, or `None` for the variable-length
    /// switches and `wide`.
    pub fn fixed_length(self) -> Option<usize> {
        use Opcode::*;

        Some(match self {
            Tableswitch | Lookupswitch | Wide => return None,
            Bipush | Ldc | Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore
            | Ret | Newarray => 2,
            Sipush | Ldc_w | Ldc2_w | Iinc | Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | If_icmpeq | If_icmpne
            | If_icmplt | If_icmpge | If_icmpgt | If_icmple | If_acmpeq | If_acmpne | Goto | Jsr | Getstatic
            | Putstatic | Getfield | Putfield | Invokevirtual | Invokespecial | Invokestatic | New | Anewarray
            | Checkcast | Instanceof | Ifnull | Ifnonnull => 3,
            Multianewarray => 4,
            Invokeinterface | Goto_w | Jsr_w => 5,
            Getfield_fast | Getfieldp_fast | Getfield2_fast | Putfield_fast | Putfield2_fast | Getstatic_fast
            | Getstaticp_fast | Getstatic2_fast | Putstatic_fast | Putstatic2_fast | Invokevirtual_fast
            | Invokespecial_fast | Invokestatic_fast | New_fast | Anewarray_fast | Checkcast_fast
            | Instanceof_fast => 3,
            Multianewarray_fast => 4,
            Invokeinterface_fast => 5,
            _ => 1,
        })
    }

    /// True for the opcodes whose first operand is a two-byte constant pool
    /// index.
    pub fn has_wide_pool_operand(self) -> bool {
        use Opcode::*;

        matches!(
            self,
            Ldc_w
                | Ldc2_w
                | Getstatic
                | Putstatic
                | Getfield
                | Putfield
                | Invokevirtual
                | Invokespecial
                | Invokestatic
                | Invokeinterface
                | New
                | Anewarray
                | Checkcast
                | Instanceof
                | Multianewarray
        )
    }

    pub fn is_quickened(self) -> bool {
        self as u8 >= Opcode::Getfield_fast as u8
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    InvalidOpcode { offset: usize, opcode: u8 },
    Truncated { offset: usize },
    AlreadyQuickened { offset: usize, opcode: Opcode },
}

impl Display for ScanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode {:#04x} at offset {}", opcode, offset)
            }
            ScanError::Truncated { offset } => write!(f, "instruction at offset {} runs past end of code", offset),
            ScanError::AlreadyQuickened { offset, opcode } => {
                write!(f, "quickened opcode {} at offset {} in input", opcode, offset)
            }
        }
    }
}

/// Length of the instruction starting at `offset`.
pub fn instruction_length(code: &[u8], offset: usize) -> Result<usize, ScanError> {
    let opcode_byte = *code.get(offset).ok_or(ScanError::Truncated { offset })?;
    let opcode = Opcode::decode(opcode_byte).ok_or(ScanError::InvalidOpcode {
        offset,
        opcode: opcode_byte,
    })?;

    let length = match opcode {
        Opcode::Wide => match code.get(offset + 1).copied().and_then(Opcode::decode) {
            Some(Opcode::Iinc) => 6,
            Some(_) => 4,
            None => return Err(ScanError::Truncated { offset }),
        },
        Opcode::Tableswitch | Opcode::Lookupswitch => {
            // Operands start at the next multiple of four from the code start.
            let operands = (offset + 4) & !3;
            let word = |index: usize| -> Result<i32, ScanError> {
                let start = operands + index * 4;
                code.get(start..start + 4)
                    .map(BigEndian::read_i32)
                    .ok_or(ScanError::Truncated { offset })
            };

            if opcode == Opcode::Tableswitch {
                let low = word(1)? as i64;
                let high = word(2)? as i64;
                if high < low {
                    return Err(ScanError::Truncated { offset });
                }
                operands - offset + 12 + (high - low + 1) as usize * 4
            } else {
                let pairs = word(1)?;
                if pairs < 0 {
                    return Err(ScanError::Truncated { offset });
                }
                operands - offset + 8 + pairs as usize * 8
            }
        }
        other => other.fixed_length().unwrap_or(1),
    };

    if offset + length > code.len() {
        return Err(ScanError::Truncated { offset });
    }

    Ok(length)
}

/// Where an instruction refers to the constant pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolRef {
    /// Offset of the opcode.
    pub offset: u32,
    /// `ldc` carries a one-byte index; everything else carries two bytes.
    pub wide: bool,
}

impl PoolRef {
    pub fn index(&self, code: &[u8]) -> Option<u16> {
        let operand = self.offset as usize + 1;

        if self.wide {
            code.get(operand..operand + 2).map(BigEndian::read_u16)
        } else {
            code.get(operand).map(|index| *index as u16)
        }
    }

    /// Overwrites the pool index operand.
    pub fn set_index(&self, code: &mut [u8], index: u16) {
        let operand = self.offset as usize + 1;

        if self.wide {
            BigEndian::write_u16(&mut code[operand..operand + 2], index);
        } else {
            code[operand] = index as u8;
        }
    }
}

/// Lists every constant pool operand in `code`, in code order.
pub fn scan_pool_refs(code: &[u8]) -> Result<Vec<PoolRef>, ScanError> {
    let mut refs = Vec::new();
    let mut offset = 0;

    while offset < code.len() {
        let length = instruction_length(code, offset)?;
        let opcode = Opcode::decode(code[offset]).ok_or(ScanError::InvalidOpcode {
            offset,
            opcode: code[offset],
        })?;

        if opcode.is_quickened() {
            return Err(ScanError::AlreadyQuickened { offset, opcode });
        }

        if opcode == Opcode::Ldc {
            refs.push(PoolRef {
                offset: offset as u32,
                wide: false,
            });
        } else if opcode.has_wide_pool_operand() {
            refs.push(PoolRef {
                offset: offset as u32,
                wide: true,
            });
        }

        offset += length;
    }

    Ok(refs)
}
