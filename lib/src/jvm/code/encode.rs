use crate::jvm::binary_format::Serialize;
use crate::jvm::code::{
    CodeElement, CompareMode, EqComparison, Instruction, InvokeType, Label, OrdComparison,
    ShiftType,
};
use crate::jvm::ValidationKind;
use byteorder::WriteBytesExt;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::io::Result;

/// Code array produced from a sequence of code elements
#[derive(Debug)]
pub struct EncodedCode {
    pub bytes: Vec<u8>,

    /// Offset of every placed label (labels at the very end map to the code length)
    pub label_offsets: HashMap<Label, usize>,

    /// Offset of every instruction, in order
    pub instruction_offsets: Vec<usize>,
}

/// Maximum length of a code array
const MAX_CODE_LENGTH: usize = 65535;

/// Turn code elements into a code array
///
/// Unconditional jumps (`goto`, `jsr`) whose target is more than a signed 16-bit offset away get
/// widened to `goto_w`/`jsr_w`. Since widening one jump can push other jumps out of range, this
/// iterates until nothing else needs widening (widening never shrinks code, so this terminates).
/// A conditional branch out of range is an error: fixing it would mean inverting the condition
/// around a `goto_w`, which changes the shape of the control flow graph.
pub fn encode(elements: &[CodeElement]) -> std::result::Result<EncodedCode, ValidationKind> {
    let mut wide_jumps: HashSet<usize> = HashSet::new();

    loop {
        // Lay out the code with the current set of wide jumps
        let mut label_offsets: HashMap<Label, usize> = HashMap::new();
        let mut instruction_offsets: Vec<usize> = vec![];
        let mut offset: usize = 0;
        for element in elements {
            match element {
                CodeElement::Label(label) => {
                    if label_offsets.insert(*label, offset).is_some() {
                        return Err(ValidationKind::DuplicateLabel(*label));
                    }
                }
                CodeElement::Instruction(insn) => {
                    let wide = wide_jumps.contains(&instruction_offsets.len());
                    instruction_offsets.push(offset);
                    offset += encoded_width(insn, offset, wide);
                }
            }
        }
        if offset > MAX_CODE_LENGTH {
            return Err(ValidationKind::CodeTooLarge);
        }

        // Resolve jump targets into relative offsets, noting jumps that need to be widened
        let mut relative_targets: Vec<Vec<i32>> = vec![];
        let mut newly_wide = false;
        for (idx, insn) in instructions(elements).enumerate() {
            let insn_offset = instruction_offsets[idx] as i64;
            let mut relative = vec![];
            for target in insn.jump_targets() {
                let target_offset = match label_offsets.get(&target) {
                    Some(target_offset) => *target_offset as i64,
                    None => return Err(ValidationKind::DanglingLabel(target)),
                };
                let delta = target_offset - insn_offset;
                let fits_short = i16::try_from(delta).is_ok();
                match insn {
                    Instruction::Goto(_) | Instruction::Jsr(_) => {
                        if !fits_short && wide_jumps.insert(idx) {
                            newly_wide = true;
                        }
                    }
                    Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => (),
                    _ if !fits_short => return Err(ValidationKind::BranchOutOfRange(idx)),
                    _ => (),
                }
                relative.push(delta as i32);
            }
            relative_targets.push(relative);
        }
        if newly_wide {
            continue;
        }

        // Write everything out
        let mut bytes = Vec::with_capacity(offset);
        for (idx, insn) in instructions(elements).enumerate() {
            let wide = wide_jumps.contains(&idx);
            encode_instruction(insn, wide, &relative_targets[idx], &mut bytes)
                .map_err(|_| ValidationKind::CodeTooLarge)?;
        }

        return Ok(EncodedCode {
            bytes,
            label_offsets,
            instruction_offsets,
        });
    }
}

fn instructions(elements: &[CodeElement]) -> impl Iterator<Item = &Instruction> {
    elements.iter().filter_map(|element| match element {
        CodeElement::Instruction(insn) => Some(insn),
        CodeElement::Label(_) => None,
    })
}

/// Padding after a switch opcode, so that operands start at a multiple of four
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn load_store_width(idx: u16) -> usize {
    match idx {
        0..=3 => 1,
        4..=255 => 2,
        _ => 4,
    }
}

/// Number of bytes the instruction takes at the given offset
pub fn encoded_width(insn: &Instruction, offset: usize, wide_jump: bool) -> usize {
    use Instruction::*;

    match insn {
        ILoad(idx) | LLoad(idx) | FLoad(idx) | DLoad(idx) | ALoad(idx) | IStore(idx)
        | LStore(idx) | FStore(idx) | DStore(idx) | AStore(idx) => load_store_width(*idx),
        Ret(idx) => {
            if *idx <= 255 {
                2
            } else {
                4
            }
        }
        IInc(idx, diff) => {
            if *idx <= 255 && i8::try_from(*diff).is_ok() {
                3
            } else {
                6
            }
        }
        BiPush(_) | NewArray(_) => 2,
        Ldc(idx) => {
            if idx.0 <= 255 {
                2
            } else {
                3
            }
        }
        Goto(_) | Jsr(_) if wide_jump => 5,
        SiPush(_) | Ldc2(_) | If(_, _) | IfICmp(_, _) | IfACmp(_, _) | IfNull(_, _) | Goto(_)
        | Jsr(_) | GetStatic(_) | PutStatic(_) | GetField(_) | PutField(_) | New(_)
        | ANewArray(_) | CheckCast(_) | InstanceOf(_) => 3,
        Invoke(InvokeType::Interface(_), _) | InvokeDynamic(_) => 5,
        Invoke(_, _) => 3,
        MultiANewArray(_, _) => 4,
        TableSwitch { targets, .. } => 1 + switch_padding(offset) + 4 * (3 + targets.len()),
        LookupSwitch { targets, .. } => 1 + switch_padding(offset) + 8 * (1 + targets.len()),
        _ => 1,
    }
}

/* The load/store instructions follow the same pattern:
 *
 *   - short form (0-3) have special bytes
 *   - normal form (0-255) use `iload` plus a byte operand
 *   - wide form (255-65535) use `wide iload` plus two byte operands
 */
fn encode_load_or_store<W: WriteBytesExt>(
    idx: u16,
    short_form_start: u8,
    normal_form: u8,
    writer: &mut W,
) -> Result<()> {
    match u8::try_from(idx) {
        Ok(n @ 0..=3) => (short_form_start + n).serialize(writer),
        Ok(n) => {
            normal_form.serialize(writer)?;
            n.serialize(writer)
        }
        Err(_) => {
            0xC4u8.serialize(writer)?;
            normal_form.serialize(writer)?;
            idx.serialize(writer)
        }
    }
}

fn ord_opcode(base: u8, comparison: &OrdComparison) -> u8 {
    base + match comparison {
        OrdComparison::EQ => 0,
        OrdComparison::NE => 1,
        OrdComparison::LT => 2,
        OrdComparison::GE => 3,
        OrdComparison::GT => 4,
        OrdComparison::LE => 5,
    }
}

/// Write out one instruction
///
/// `relative` holds the jump targets of the instruction (in the order of
/// [`Instruction::jump_targets`]), as offsets relative to the start of the instruction. The
/// writer must be positioned at the right offset in the code array for switch padding to work.
fn encode_instruction(
    insn: &Instruction,
    wide_jump: bool,
    relative: &[i32],
    writer: &mut Vec<u8>,
) -> Result<()> {
    use Instruction::*;

    let short_target = |idx: usize| relative.get(idx).copied().unwrap_or(0) as i16;

    match insn {
        Nop => 0x00u8.serialize(writer)?,
        AConstNull => 0x01u8.serialize(writer)?,
        IConstM1 => 0x02u8.serialize(writer)?,
        IConst0 => 0x03u8.serialize(writer)?,
        IConst1 => 0x04u8.serialize(writer)?,
        IConst2 => 0x05u8.serialize(writer)?,
        IConst3 => 0x06u8.serialize(writer)?,
        IConst4 => 0x07u8.serialize(writer)?,
        IConst5 => 0x08u8.serialize(writer)?,
        LConst0 => 0x09u8.serialize(writer)?,
        LConst1 => 0x0au8.serialize(writer)?,
        FConst0 => 0x0bu8.serialize(writer)?,
        FConst1 => 0x0cu8.serialize(writer)?,
        FConst2 => 0x0du8.serialize(writer)?,
        DConst0 => 0x0eu8.serialize(writer)?,
        DConst1 => 0x0fu8.serialize(writer)?,
        BiPush(b) => {
            0x10u8.serialize(writer)?;
            b.serialize(writer)?;
        }
        SiPush(s) => {
            0x11u8.serialize(writer)?;
            s.serialize(writer)?;
        }
        Ldc(idx) => match u8::try_from(idx.0) {
            Ok(idx) => {
                0x12u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Err(_) => {
                0x13u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
        },
        Ldc2(idx) => {
            0x14u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        ILoad(idx) => encode_load_or_store(*idx, 0x1a, 0x15, writer)?,
        LLoad(idx) => encode_load_or_store(*idx, 0x1e, 0x16, writer)?,
        FLoad(idx) => encode_load_or_store(*idx, 0x22, 0x17, writer)?,
        DLoad(idx) => encode_load_or_store(*idx, 0x26, 0x18, writer)?,
        ALoad(idx) => encode_load_or_store(*idx, 0x2a, 0x19, writer)?,
        IALoad => 0x2eu8.serialize(writer)?,
        LALoad => 0x2fu8.serialize(writer)?,
        FALoad => 0x30u8.serialize(writer)?,
        DALoad => 0x31u8.serialize(writer)?,
        AALoad => 0x32u8.serialize(writer)?,
        BALoad => 0x33u8.serialize(writer)?,
        CALoad => 0x34u8.serialize(writer)?,
        SALoad => 0x35u8.serialize(writer)?,
        IStore(idx) => encode_load_or_store(*idx, 0x3b, 0x36, writer)?,
        LStore(idx) => encode_load_or_store(*idx, 0x3f, 0x37, writer)?,
        FStore(idx) => encode_load_or_store(*idx, 0x43, 0x38, writer)?,
        DStore(idx) => encode_load_or_store(*idx, 0x47, 0x39, writer)?,
        AStore(idx) => encode_load_or_store(*idx, 0x4b, 0x3a, writer)?,
        IAStore => 0x4fu8.serialize(writer)?,
        LAStore => 0x50u8.serialize(writer)?,
        FAStore => 0x51u8.serialize(writer)?,
        DAStore => 0x52u8.serialize(writer)?,
        AAStore => 0x53u8.serialize(writer)?,
        BAStore => 0x54u8.serialize(writer)?,
        CAStore => 0x55u8.serialize(writer)?,
        SAStore => 0x56u8.serialize(writer)?,
        Pop => 0x57u8.serialize(writer)?,
        Pop2 => 0x58u8.serialize(writer)?,
        Dup => 0x59u8.serialize(writer)?,
        DupX1 => 0x5au8.serialize(writer)?,
        DupX2 => 0x5bu8.serialize(writer)?,
        Dup2 => 0x5cu8.serialize(writer)?,
        Dup2X1 => 0x5du8.serialize(writer)?,
        Dup2X2 => 0x5eu8.serialize(writer)?,
        Swap => 0x5fu8.serialize(writer)?,
        IAdd => 0x60u8.serialize(writer)?,
        LAdd => 0x61u8.serialize(writer)?,
        FAdd => 0x62u8.serialize(writer)?,
        DAdd => 0x63u8.serialize(writer)?,
        ISub => 0x64u8.serialize(writer)?,
        LSub => 0x65u8.serialize(writer)?,
        FSub => 0x66u8.serialize(writer)?,
        DSub => 0x67u8.serialize(writer)?,
        IMul => 0x68u8.serialize(writer)?,
        LMul => 0x69u8.serialize(writer)?,
        FMul => 0x6au8.serialize(writer)?,
        DMul => 0x6bu8.serialize(writer)?,
        IDiv => 0x6cu8.serialize(writer)?,
        LDiv => 0x6du8.serialize(writer)?,
        FDiv => 0x6eu8.serialize(writer)?,
        DDiv => 0x6fu8.serialize(writer)?,
        IRem => 0x70u8.serialize(writer)?,
        LRem => 0x71u8.serialize(writer)?,
        FRem => 0x72u8.serialize(writer)?,
        DRem => 0x73u8.serialize(writer)?,
        INeg => 0x74u8.serialize(writer)?,
        LNeg => 0x75u8.serialize(writer)?,
        FNeg => 0x76u8.serialize(writer)?,
        DNeg => 0x77u8.serialize(writer)?,
        ISh(ShiftType::Left) => 0x78u8.serialize(writer)?,
        LSh(ShiftType::Left) => 0x79u8.serialize(writer)?,
        ISh(ShiftType::ArithmeticRight) => 0x7au8.serialize(writer)?,
        LSh(ShiftType::ArithmeticRight) => 0x7bu8.serialize(writer)?,
        ISh(ShiftType::LogicalRight) => 0x7cu8.serialize(writer)?,
        LSh(ShiftType::LogicalRight) => 0x7du8.serialize(writer)?,
        IAnd => 0x7eu8.serialize(writer)?,
        LAnd => 0x7fu8.serialize(writer)?,
        IOr => 0x80u8.serialize(writer)?,
        LOr => 0x81u8.serialize(writer)?,
        IXor => 0x82u8.serialize(writer)?,
        LXor => 0x83u8.serialize(writer)?,
        IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
            (Ok(b), Ok(d)) => {
                0x84u8.serialize(writer)?;
                b.serialize(writer)?;
                d.serialize(writer)?;
            }
            _ => {
                0xc4u8.serialize(writer)?;
                0x84u8.serialize(writer)?;
                idx.serialize(writer)?;
                diff.serialize(writer)?;
            }
        },
        I2L => 0x85u8.serialize(writer)?,
        I2F => 0x86u8.serialize(writer)?,
        I2D => 0x87u8.serialize(writer)?,
        L2I => 0x88u8.serialize(writer)?,
        L2F => 0x89u8.serialize(writer)?,
        L2D => 0x8au8.serialize(writer)?,
        F2I => 0x8bu8.serialize(writer)?,
        F2L => 0x8cu8.serialize(writer)?,
        F2D => 0x8du8.serialize(writer)?,
        D2I => 0x8eu8.serialize(writer)?,
        D2L => 0x8fu8.serialize(writer)?,
        D2F => 0x90u8.serialize(writer)?,
        I2B => 0x91u8.serialize(writer)?,
        I2C => 0x92u8.serialize(writer)?,
        I2S => 0x93u8.serialize(writer)?,
        LCmp => 0x94u8.serialize(writer)?,
        FCmp(CompareMode::L) => 0x95u8.serialize(writer)?,
        FCmp(CompareMode::G) => 0x96u8.serialize(writer)?,
        DCmp(CompareMode::L) => 0x97u8.serialize(writer)?,
        DCmp(CompareMode::G) => 0x98u8.serialize(writer)?,
        If(comparison, _) => {
            ord_opcode(0x99, comparison).serialize(writer)?;
            short_target(0).serialize(writer)?;
        }
        IfICmp(comparison, _) => {
            ord_opcode(0x9f, comparison).serialize(writer)?;
            short_target(0).serialize(writer)?;
        }
        IfACmp(comparison, _) => {
            let opcode: u8 = match comparison {
                EqComparison::EQ => 0xa5,
                EqComparison::NE => 0xa6,
            };
            opcode.serialize(writer)?;
            short_target(0).serialize(writer)?;
        }
        Goto(_) | Jsr(_) => {
            let is_goto = matches!(insn, Goto(_));
            if wide_jump {
                (if is_goto { 0xc8u8 } else { 0xc9u8 }).serialize(writer)?;
                relative.first().copied().unwrap_or(0).serialize(writer)?;
            } else {
                (if is_goto { 0xa7u8 } else { 0xa8u8 }).serialize(writer)?;
                short_target(0).serialize(writer)?;
            }
        }
        Ret(idx) => match u8::try_from(*idx) {
            Ok(n) => {
                0xa9u8.serialize(writer)?;
                n.serialize(writer)?;
            }
            Err(_) => {
                0xc4u8.serialize(writer)?;
                0xa9u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
        },
        TableSwitch { low, targets, .. } => {
            let offset = writer.len();
            0xaau8.serialize(writer)?;
            for _ in 0..switch_padding(offset) {
                0x00u8.serialize(writer)?;
            }
            for target in relative.iter().take(1) {
                target.serialize(writer)?;
            }
            low.serialize(writer)?;
            (low + targets.len() as i32 - 1).serialize(writer)?;
            for target in relative.iter().skip(1) {
                target.serialize(writer)?;
            }
        }
        LookupSwitch { targets, .. } => {
            let offset = writer.len();
            0xabu8.serialize(writer)?;
            for _ in 0..switch_padding(offset) {
                0x00u8.serialize(writer)?;
            }
            for target in relative.iter().take(1) {
                target.serialize(writer)?;
            }
            (targets.len() as i32).serialize(writer)?;
            for ((key, _), target) in targets.iter().zip(relative.iter().skip(1)) {
                key.serialize(writer)?;
                target.serialize(writer)?;
            }
        }
        IReturn => 0xacu8.serialize(writer)?,
        LReturn => 0xadu8.serialize(writer)?,
        FReturn => 0xaeu8.serialize(writer)?,
        DReturn => 0xafu8.serialize(writer)?,
        AReturn => 0xb0u8.serialize(writer)?,
        Return => 0xb1u8.serialize(writer)?,
        GetStatic(idx) => {
            0xb2u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        PutStatic(idx) => {
            0xb3u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        GetField(idx) => {
            0xb4u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        PutField(idx) => {
            0xb5u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        Invoke(InvokeType::Virtual, idx) => {
            0xb6u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        Invoke(InvokeType::Special, idx) => {
            0xb7u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        Invoke(InvokeType::Static, idx) => {
            0xb8u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        Invoke(InvokeType::Interface(cnt), idx) => {
            0xb9u8.serialize(writer)?;
            idx.serialize(writer)?;
            cnt.serialize(writer)?;
            0u8.serialize(writer)?;
        }
        InvokeDynamic(idx) => {
            0xbau8.serialize(writer)?;
            idx.serialize(writer)?;
            0u16.serialize(writer)?;
        }
        New(idx) => {
            0xbbu8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        NewArray(base_type) => {
            0xbcu8.serialize(writer)?;
            base_type.array_type_code().serialize(writer)?;
        }
        ANewArray(idx) => {
            0xbdu8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        ArrayLength => 0xbeu8.serialize(writer)?,
        AThrow => 0xbfu8.serialize(writer)?,
        CheckCast(idx) => {
            0xc0u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        InstanceOf(idx) => {
            0xc1u8.serialize(writer)?;
            idx.serialize(writer)?;
        }
        MonitorEnter => 0xc2u8.serialize(writer)?,
        MonitorExit => 0xc3u8.serialize(writer)?,
        MultiANewArray(idx, dimensions) => {
            0xc5u8.serialize(writer)?;
            idx.serialize(writer)?;
            dimensions.serialize(writer)?;
        }
        IfNull(comparison, _) => {
            let opcode: u8 = match comparison {
                EqComparison::EQ => 0xc6,
                EqComparison::NE => 0xc7,
            };
            opcode.serialize(writer)?;
            short_target(0).serialize(writer)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantPool;
    use crate::jvm::code::{DecodedCode, LabelGenerator};

    #[test]
    fn short_forms_are_chosen() {
        let elements: Vec<CodeElement> = vec![
            Instruction::ILoad(0).into(),
            Instruction::ILoad(7).into(),
            Instruction::ILoad(300).into(),
            Instruction::IInc(1, 200).into(),
            Instruction::Return.into(),
        ];
        let encoded = encode(&elements).unwrap();
        assert_eq!(
            encoded.bytes,
            vec![0x1a, 0x15, 7, 0xc4, 0x15, 0x01, 0x2c, 0xc4, 0x84, 0, 1, 0, 200, 0xb1]
        );
        assert_eq!(encoded.instruction_offsets, vec![0, 1, 3, 7, 13]);
    }

    #[test]
    fn far_goto_is_widened() {
        let mut labels = LabelGenerator::new();
        let end = labels.fresh_label();
        let mut elements: Vec<CodeElement> = vec![Instruction::Goto(end).into()];
        elements.extend((0..40000).map(|_| CodeElement::from(Instruction::Nop)));
        elements.push(end.into());
        elements.push(Instruction::Return.into());

        let encoded = encode(&elements).unwrap();
        assert_eq!(&encoded.bytes[..5], &[0xc8, 0x00, 0x00, 0x9c, 0x45]);
        assert_eq!(encoded.label_offsets[&end], 40005);

        // The widened jump still decodes back to a plain `goto`
        let decoded =
            DecodedCode::decode(&encoded.bytes, &ConstantPool::new(), &mut labels).unwrap();
        assert!(matches!(decoded.instructions[0].1, Instruction::Goto(_)));
    }

    #[test]
    fn far_conditional_is_an_error() {
        let mut labels = LabelGenerator::new();
        let end = labels.fresh_label();
        let mut elements: Vec<CodeElement> = vec![
            Instruction::IConst0.into(),
            Instruction::If(OrdComparison::EQ, end).into(),
        ];
        elements.extend((0..40000).map(|_| CodeElement::from(Instruction::Nop)));
        elements.push(end.into());
        elements.push(Instruction::Return.into());

        assert!(matches!(
            encode(&elements),
            Err(ValidationKind::BranchOutOfRange(1))
        ));
    }

    #[test]
    fn missing_and_duplicate_labels() {
        let mut labels = LabelGenerator::new();
        let (a, b) = (labels.fresh_label(), labels.fresh_label());
        let dangling: Vec<CodeElement> = vec![Instruction::Goto(a).into()];
        assert_eq!(
            encode(&dangling).unwrap_err(),
            ValidationKind::DanglingLabel(a)
        );

        let duplicate: Vec<CodeElement> =
            vec![b.into(), Instruction::Nop.into(), b.into(), Instruction::Return.into()];
        assert_eq!(
            encode(&duplicate).unwrap_err(),
            ValidationKind::DuplicateLabel(b)
        );
    }

    #[test]
    fn switch_round_trips_through_decoder() {
        let mut labels = LabelGenerator::new();
        let (a, b) = (labels.fresh_label(), labels.fresh_label());
        let elements: Vec<CodeElement> = vec![
            Instruction::Nop.into(),
            Instruction::ILoad(0).into(),
            Instruction::LookupSwitch {
                default: a,
                targets: vec![(-1, b), (10, a)],
            }
            .into(),
            a.into(),
            Instruction::Return.into(),
            b.into(),
            Instruction::Return.into(),
        ];
        let encoded = encode(&elements).unwrap();
        // nop, iload_0, lookupswitch with 1 byte of padding, then 8 + 16 bytes of operands
        assert_eq!(encoded.instruction_offsets, vec![0, 1, 2, 28, 29]);

        let decoded =
            DecodedCode::decode(&encoded.bytes, &ConstantPool::new(), &mut labels).unwrap();
        match &decoded.instructions[2].1 {
            Instruction::LookupSwitch { targets, .. } => {
                assert_eq!(targets.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![-1, 10])
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
