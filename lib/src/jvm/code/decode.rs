use crate::jvm::binary_format::Deserialize;
use crate::jvm::class_file::ConstantPool;
use crate::jvm::code::{
    CodeElement, CompareMode, EqComparison, Instruction, InvokeType, Label, LabelGenerator,
    OrdComparison, ShiftType,
};
use crate::jvm::{BaseType, Error, MalformedKind};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

/// Instructions read out of a code array, along with the labels needed to refer to positions in
/// that array
#[derive(Debug)]
pub struct DecodedCode {
    /// Instructions, along with their offsets
    pub instructions: Vec<(usize, Instruction)>,

    /// Labels by offset (the code length itself is a valid offset, for range ends)
    labels: BTreeMap<usize, Label>,

    /// Offsets at which instructions start
    boundaries: BTreeSet<usize>,

    code_length: usize,
}

impl DecodedCode {
    /// Decode a code array
    ///
    /// Constant operands are checked against the pool, and every jump target must land at the
    /// start of an instruction.
    pub fn decode(
        code: &[u8],
        pool: &ConstantPool,
        generator: &mut LabelGenerator,
    ) -> Result<DecodedCode, Error> {
        let mut labels: BTreeMap<usize, Label> = BTreeMap::new();
        let mut boundaries = BTreeSet::new();
        let mut instructions = vec![];
        let mut cursor = Cursor::new(code);

        while (cursor.position() as usize) < code.len() {
            let offset = cursor.position() as usize;
            boundaries.insert(offset);
            let mut target = |relative: i64| -> Result<Label, MalformedKind> {
                let absolute = offset as i64 + relative;
                if absolute < 0 || absolute >= code.len() as i64 {
                    return Err(MalformedKind::BadCodeOffset {
                        offset,
                        target: absolute,
                    });
                }
                Ok(*labels
                    .entry(absolute as usize)
                    .or_insert_with(|| generator.fresh_label()))
            };
            let instruction = decode_instruction(&mut cursor, offset, pool, &mut target)?;
            instructions.push((offset, instruction));
        }

        for (offset, label) in labels.iter() {
            if !boundaries.contains(offset) {
                let source = instructions
                    .iter()
                    .find(|(_, insn)| insn.jump_targets().contains(label))
                    .map_or(0, |(source, _)| *source);
                return Err(MalformedKind::BadCodeOffset {
                    offset: source,
                    target: *offset as i64,
                }
                .into());
            }
        }

        Ok(DecodedCode {
            instructions,
            labels,
            boundaries,
            code_length: code.len(),
        })
    }

    /// Is this offset an instruction start or the end of the code?
    pub fn is_boundary(&self, offset: usize) -> bool {
        offset == self.code_length || self.boundaries.contains(&offset)
    }

    /// Get (or make) the label at an offset, provided the offset is a boundary
    pub fn label_at(&mut self, offset: usize, generator: &mut LabelGenerator) -> Option<Label> {
        if !self.is_boundary(offset) {
            return None;
        }
        Some(
            *self
                .labels
                .entry(offset)
                .or_insert_with(|| generator.fresh_label()),
        )
    }

    /// Instruction at an offset
    pub fn instruction_at(&self, offset: usize) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |(off, _)| *off)
            .ok()
            .map(|idx| &self.instructions[idx].1)
    }

    /// Interleave labels and instructions
    pub fn into_elements(self) -> Vec<CodeElement> {
        let mut elements = Vec::with_capacity(self.instructions.len() + self.labels.len());
        let mut labels = self.labels.into_iter().peekable();
        for (offset, instruction) in self.instructions {
            while let Some((_, label)) = labels.next_if(|(lbl_offset, _)| *lbl_offset <= offset) {
                elements.push(CodeElement::Label(label));
            }
            elements.push(CodeElement::Instruction(instruction));
        }
        elements.extend(labels.map(|(_, label)| CodeElement::Label(label)));
        elements
    }
}

fn decode_instruction(
    cursor: &mut Cursor<&[u8]>,
    offset: usize,
    pool: &ConstantPool,
    target: &mut impl FnMut(i64) -> Result<Label, MalformedKind>,
) -> Result<Instruction, Error> {
    use Instruction::*;

    let opcode = u8::deserialize(cursor)?;

    let insn = match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x02 => IConstM1,
        0x03 => IConst0,
        0x04 => IConst1,
        0x05 => IConst2,
        0x06 => IConst3,
        0x07 => IConst4,
        0x08 => IConst5,
        0x09 => LConst0,
        0x0a => LConst1,
        0x0b => FConst0,
        0x0c => FConst1,
        0x0d => FConst2,
        0x0e => DConst0,
        0x0f => DConst1,
        0x10 => BiPush(i8::deserialize(cursor)?),
        0x11 => SiPush(i16::deserialize(cursor)?),
        0x12 => Ldc(pool.check_loadable(byte_index(cursor)?, false)?),
        0x13 => Ldc(pool.check_loadable(u16::deserialize(cursor)?, false)?),
        0x14 => Ldc2(pool.check_loadable(u16::deserialize(cursor)?, true)?),
        0x15 => ILoad(byte_index(cursor)?),
        0x16 => LLoad(byte_index(cursor)?),
        0x17 => FLoad(byte_index(cursor)?),
        0x18 => DLoad(byte_index(cursor)?),
        0x19 => ALoad(byte_index(cursor)?),
        0x1a..=0x1d => ILoad((opcode - 0x1a) as u16),
        0x1e..=0x21 => LLoad((opcode - 0x1e) as u16),
        0x22..=0x25 => FLoad((opcode - 0x22) as u16),
        0x26..=0x29 => DLoad((opcode - 0x26) as u16),
        0x2a..=0x2d => ALoad((opcode - 0x2a) as u16),
        0x2e => IALoad,
        0x2f => LALoad,
        0x30 => FALoad,
        0x31 => DALoad,
        0x32 => AALoad,
        0x33 => BALoad,
        0x34 => CALoad,
        0x35 => SALoad,
        0x36 => IStore(byte_index(cursor)?),
        0x37 => LStore(byte_index(cursor)?),
        0x38 => FStore(byte_index(cursor)?),
        0x39 => DStore(byte_index(cursor)?),
        0x3a => AStore(byte_index(cursor)?),
        0x3b..=0x3e => IStore((opcode - 0x3b) as u16),
        0x3f..=0x42 => LStore((opcode - 0x3f) as u16),
        0x43..=0x46 => FStore((opcode - 0x43) as u16),
        0x47..=0x4a => DStore((opcode - 0x47) as u16),
        0x4b..=0x4e => AStore((opcode - 0x4b) as u16),
        0x4f => IAStore,
        0x50 => LAStore,
        0x51 => FAStore,
        0x52 => DAStore,
        0x53 => AAStore,
        0x54 => BAStore,
        0x55 => CAStore,
        0x56 => SAStore,
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => ISh(ShiftType::Left),
        0x79 => LSh(ShiftType::Left),
        0x7a => ISh(ShiftType::ArithmeticRight),
        0x7b => LSh(ShiftType::ArithmeticRight),
        0x7c => ISh(ShiftType::LogicalRight),
        0x7d => LSh(ShiftType::LogicalRight),
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x84 => IInc(byte_index(cursor)?, i8::deserialize(cursor)? as i16),
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmp(CompareMode::L),
        0x96 => FCmp(CompareMode::G),
        0x97 => DCmp(CompareMode::L),
        0x98 => DCmp(CompareMode::G),
        0x99..=0x9e => {
            let comparison = ord_comparison(opcode - 0x99);
            If(comparison, target(i16::deserialize(cursor)? as i64)?)
        }
        0x9f..=0xa4 => {
            let comparison = ord_comparison(opcode - 0x9f);
            IfICmp(comparison, target(i16::deserialize(cursor)? as i64)?)
        }
        0xa5 => IfACmp(EqComparison::EQ, target(i16::deserialize(cursor)? as i64)?),
        0xa6 => IfACmp(EqComparison::NE, target(i16::deserialize(cursor)? as i64)?),
        0xa7 => Goto(target(i16::deserialize(cursor)? as i64)?),
        0xa8 => Jsr(target(i16::deserialize(cursor)? as i64)?),
        0xa9 => Ret(byte_index(cursor)?),
        0xaa => {
            skip_switch_padding(cursor)?;
            let default = target(i32::deserialize(cursor)? as i64)?;
            let low = i32::deserialize(cursor)?;
            let high = i32::deserialize(cursor)?;
            if high < low {
                return Err(MalformedKind::InvalidOpcode { opcode, offset }.into());
            }
            let mut targets = vec![];
            for _ in low..=high {
                targets.push(target(i32::deserialize(cursor)? as i64)?);
            }
            TableSwitch {
                default,
                low,
                targets,
            }
        }
        0xab => {
            skip_switch_padding(cursor)?;
            let default = target(i32::deserialize(cursor)? as i64)?;
            let npairs = i32::deserialize(cursor)?;
            if npairs < 0 {
                return Err(MalformedKind::InvalidOpcode { opcode, offset }.into());
            }
            let mut targets = vec![];
            for _ in 0..npairs {
                let key = i32::deserialize(cursor)?;
                targets.push((key, target(i32::deserialize(cursor)? as i64)?));
            }
            LookupSwitch { default, targets }
        }
        0xac => IReturn,
        0xad => LReturn,
        0xae => FReturn,
        0xaf => DReturn,
        0xb0 => AReturn,
        0xb1 => Return,
        0xb2 => GetStatic(pool.check_field_ref(u16::deserialize(cursor)?)?),
        0xb3 => PutStatic(pool.check_field_ref(u16::deserialize(cursor)?)?),
        0xb4 => GetField(pool.check_field_ref(u16::deserialize(cursor)?)?),
        0xb5 => PutField(pool.check_field_ref(u16::deserialize(cursor)?)?),
        0xb6 => Invoke(
            InvokeType::Virtual,
            pool.check_method_ref(u16::deserialize(cursor)?)?,
        ),
        0xb7 => Invoke(
            InvokeType::Special,
            pool.check_method_ref(u16::deserialize(cursor)?)?,
        ),
        0xb8 => Invoke(
            InvokeType::Static,
            pool.check_method_ref(u16::deserialize(cursor)?)?,
        ),
        0xb9 => {
            let method = pool.check_method_ref(u16::deserialize(cursor)?)?;
            let count = u8::deserialize(cursor)?;
            let _zero = u8::deserialize(cursor)?;
            Invoke(InvokeType::Interface(count), method)
        }
        0xba => {
            let call_site = pool.check_invoke_dynamic(u16::deserialize(cursor)?)?;
            let _zero = u16::deserialize(cursor)?;
            InvokeDynamic(call_site)
        }
        0xbb => New(pool.check_class(u16::deserialize(cursor)?)?),
        0xbc => {
            let code = u8::deserialize(cursor)?;
            match BaseType::from_array_type_code(code) {
                Some(base_type) => NewArray(base_type),
                None => return Err(MalformedKind::InvalidOpcode { opcode, offset }.into()),
            }
        }
        0xbd => ANewArray(pool.check_class(u16::deserialize(cursor)?)?),
        0xbe => ArrayLength,
        0xbf => AThrow,
        0xc0 => CheckCast(pool.check_class(u16::deserialize(cursor)?)?),
        0xc1 => InstanceOf(pool.check_class(u16::deserialize(cursor)?)?),
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        0xc4 => {
            let modified = u8::deserialize(cursor)?;
            let index = u16::deserialize(cursor)?;
            match modified {
                0x15 => ILoad(index),
                0x16 => LLoad(index),
                0x17 => FLoad(index),
                0x18 => DLoad(index),
                0x19 => ALoad(index),
                0x36 => IStore(index),
                0x37 => LStore(index),
                0x38 => FStore(index),
                0x39 => DStore(index),
                0x3a => AStore(index),
                0xa9 => Ret(index),
                0x84 => IInc(index, i16::deserialize(cursor)?),
                _ => {
                    return Err(MalformedKind::InvalidOpcode {
                        opcode: modified,
                        offset: offset + 1,
                    }
                    .into())
                }
            }
        }
        0xc5 => {
            let class = pool.check_class(u16::deserialize(cursor)?)?;
            MultiANewArray(class, u8::deserialize(cursor)?)
        }
        0xc6 => IfNull(EqComparison::EQ, target(i16::deserialize(cursor)? as i64)?),
        0xc7 => IfNull(EqComparison::NE, target(i16::deserialize(cursor)? as i64)?),
        0xc8 => Goto(target(i32::deserialize(cursor)? as i64)?),
        0xc9 => Jsr(target(i32::deserialize(cursor)? as i64)?),
        _ => return Err(MalformedKind::InvalidOpcode { opcode, offset }.into()),
    };
    Ok(insn)
}

/// Local variable index in its non-`wide` form
fn byte_index(cursor: &mut Cursor<&[u8]>) -> Result<u16, Error> {
    u8::deserialize(cursor).map(u16::from)
}

/// Opcodes for `if<cond>` and `if_icmp<cond>` share the same ordering of conditions
fn ord_comparison(relative_opcode: u8) -> OrdComparison {
    match relative_opcode {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

/// Switch operands start at the next multiple of four from the start of the code
fn skip_switch_padding(cursor: &mut Cursor<&[u8]>) -> Result<(), Error> {
    while cursor.position() % 4 != 0 {
        u8::deserialize(cursor)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(code: &[u8]) -> Result<DecodedCode, Error> {
        DecodedCode::decode(code, &ConstantPool::new(), &mut LabelGenerator::new())
    }

    #[test]
    fn branches_get_labels() {
        // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
        let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let decoded = decode(&code).unwrap();
        assert_eq!(decoded.instructions.len(), 6);
        assert!(decoded.is_boundary(6));
        assert!(decoded.is_boundary(8));
        assert!(!decoded.is_boundary(2));

        let elements = decoded.into_elements();
        assert_eq!(elements.len(), 7);
        match (&elements[1], &elements[4]) {
            (
                CodeElement::Instruction(Instruction::If(OrdComparison::EQ, target)),
                CodeElement::Label(label),
            ) => assert_eq!(target, label),
            other => panic!("unexpected elements {:?}", other),
        }
    }

    #[test]
    fn wide_and_short_forms_fold_together() {
        let code = [0xc4, 0x15, 0x01, 0x00, 0x15, 0x02, 0x1b, 0xc4, 0x84, 0x01, 0x00, 0xff, 0xff];
        let decoded = decode(&code).unwrap();
        let instructions: Vec<_> = decoded.instructions.into_iter().map(|(_, i)| i).collect();
        assert_eq!(
            instructions,
            vec![
                Instruction::ILoad(256),
                Instruction::ILoad(2),
                Instruction::ILoad(1),
                Instruction::IInc(256, -1)
            ]
        );
    }

    #[test]
    fn switch_padding_depends_on_offset() {
        // nop; tableswitch (2 bytes padding) default=+19 low=0 high=0 [+19]; return
        let mut code = vec![0x00, 0xaa, 0x00, 0x00];
        code.extend_from_slice(&[0, 0, 0, 19, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 19]);
        code.push(0xb1);
        let decoded = decode(&code).unwrap();
        assert_eq!(decoded.instructions.len(), 3);
        assert_eq!(decoded.instructions[2], (20, Instruction::Return));
    }

    #[test]
    fn rejects_bad_targets_and_opcodes() {
        // goto +1 lands inside its own operand
        assert!(matches!(
            decode(&[0xa7, 0x00, 0x01]),
            Err(Error::MalformedClass(MalformedKind::BadCodeOffset { target: 1, .. }))
        ));
        assert!(matches!(
            decode(&[0xa7, 0x00, 0x10]),
            Err(Error::MalformedClass(MalformedKind::BadCodeOffset { target: 16, .. }))
        ));
        assert!(matches!(
            decode(&[0x00, 0xcb]),
            Err(Error::MalformedClass(MalformedKind::InvalidOpcode {
                opcode: 0xcb,
                offset: 1
            }))
        ));
        assert!(matches!(
            decode(&[0x11, 0x00]),
            Err(Error::MalformedClass(MalformedKind::Truncated))
        ));
    }
}
