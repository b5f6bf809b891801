//! The instruction AST is slightly different from the usual presentation of JVM bytecode, to
//! make it more convenient to edit:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches and also simplifies tasks like inverting a
//!     branch condition.
//!
//!   - Encoding variants (`ldc_w`, `goto_w`, `jsr_w`, `iload_0`, ...) are chosen by the encoder
//!     and never appear here.

use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, FieldRefConstantIndex, InvokeDynamicConstantIndex,
    MethodRefConstantIndex,
};
use crate::jvm::code::Label;
use crate::jvm::BaseType;
use std::ops::Not;

/// JVM bytecode instruction, with jump targets as labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantIndex), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantIndex),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    If(OrdComparison, Label), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Label), // covers `if_icmpeq`, `if_icmpne`, ... `if_icmple`
    IfACmp(EqComparison, Label), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Label), // covers `ifnull`, `ifnonnull`
    Goto(Label),                 // covers `goto` and `goto_w`
    Jsr(Label),                  // covers `jsr` and `jsr_w`
    Ret(u16),
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len() - 1`
        default: Label,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Label>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Label,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Label)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    GetStatic(FieldRefConstantIndex),
    PutStatic(FieldRefConstantIndex),
    GetField(FieldRefConstantIndex),
    PutField(FieldRefConstantIndex),
    Invoke(InvokeType, MethodRefConstantIndex),
    InvokeDynamic(InvokeDynamicConstantIndex),
    New(ClassConstantIndex),
    NewArray(BaseType),
    ANewArray(ClassConstantIndex),
    ArrayLength,
    AThrow,
    CheckCast(ClassConstantIndex),
    InstanceOf(ClassConstantIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassConstantIndex, u8),
}

impl Instruction {
    /// Labels this instruction may jump to (not counting fall through)
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Instruction::If(_, lbl)
            | Instruction::IfICmp(_, lbl)
            | Instruction::IfACmp(_, lbl)
            | Instruction::IfNull(_, lbl)
            | Instruction::Goto(lbl)
            | Instruction::Jsr(lbl) => vec![*lbl],
            Instruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            Instruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            _ => vec![],
        }
    }

    /// Mutable access to every jump target
    pub fn jump_targets_mut(&mut self) -> Vec<&mut Label> {
        match self {
            Instruction::If(_, lbl)
            | Instruction::IfICmp(_, lbl)
            | Instruction::IfACmp(_, lbl)
            | Instruction::IfNull(_, lbl)
            | Instruction::Goto(lbl)
            | Instruction::Jsr(lbl) => vec![lbl],
            Instruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![default];
                ts.extend(targets.iter_mut());
                ts
            }
            Instruction::LookupSwitch { default, targets } => {
                let mut ts = vec![default];
                ts.extend(targets.iter_mut().map(|(_, target)| target));
                ts
            }
            _ => vec![],
        }
    }

    /// Can execution continue to the next instruction?
    ///
    /// `jsr` counts as falling through, since the matching `ret` returns to the next
    /// instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Goto(_)
                | Instruction::Ret(_)
                | Instruction::TableSwitch { .. }
                | Instruction::LookupSwitch { .. }
                | Instruction::IReturn
                | Instruction::LReturn
                | Instruction::FReturn
                | Instruction::DReturn
                | Instruction::AReturn
                | Instruction::Return
                | Instruction::AThrow
        )
    }

    /// Local variable slot touched by the instruction, along with the number of slots used
    pub fn local_variable(&self) -> Option<(u16, u16)> {
        match self {
            Instruction::ILoad(idx)
            | Instruction::FLoad(idx)
            | Instruction::ALoad(idx)
            | Instruction::IStore(idx)
            | Instruction::FStore(idx)
            | Instruction::AStore(idx)
            | Instruction::IInc(idx, _)
            | Instruction::Ret(idx) => Some((*idx, 1)),
            Instruction::LLoad(idx)
            | Instruction::DLoad(idx)
            | Instruction::LStore(idx)
            | Instruction::DStore(idx) => Some((*idx, 2)),
            _ => None,
        }
    }

    /// Constant pool entry used by the instruction, along with the kind of entry expected
    pub fn constant_operand(&self) -> Option<(ConstantIndex, &'static str)> {
        match self {
            Instruction::Ldc(idx) => Some((*idx, "loadable")),
            Instruction::Ldc2(idx) => Some((*idx, "two-slot loadable")),
            Instruction::GetStatic(idx)
            | Instruction::PutStatic(idx)
            | Instruction::GetField(idx)
            | Instruction::PutField(idx) => Some(((*idx).into(), "Fieldref")),
            Instruction::Invoke(_, idx) => Some(((*idx).into(), "Methodref")),
            Instruction::InvokeDynamic(idx) => Some(((*idx).into(), "InvokeDynamic")),
            Instruction::New(idx)
            | Instruction::ANewArray(idx)
            | Instruction::CheckCast(idx)
            | Instruction::InstanceOf(idx)
            | Instruction::MultiANewArray(idx, _) => Some(((*idx).into(), "Class")),
            _ => None,
        }
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}

/// Element of a method body: either an instruction or a label marking the position right
/// before the next instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeElement {
    Label(Label),
    Instruction(Instruction),
}

impl From<Instruction> for CodeElement {
    fn from(instruction: Instruction) -> CodeElement {
        CodeElement::Instruction(instruction)
    }
}

impl From<Label> for CodeElement {
    fn from(label: Label) -> CodeElement {
        CodeElement::Label(label)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LabelGenerator;

    #[test]
    fn control_flow_queries() {
        let mut labels = LabelGenerator::new();
        let (a, b) = (labels.fresh_label(), labels.fresh_label());

        let switch = Instruction::LookupSwitch {
            default: a,
            targets: vec![(1, b), (5, a)],
        };
        assert_eq!(switch.jump_targets(), vec![a, b, a]);
        assert!(!switch.falls_through());

        let branch = Instruction::IfNull(EqComparison::NE, b);
        assert_eq!(branch.jump_targets(), vec![b]);
        assert!(branch.falls_through());
        assert!(Instruction::Jsr(a).falls_through());
        assert!(!Instruction::AThrow.falls_through());
    }

    #[test]
    fn retargeting_through_mutable_targets() {
        let mut labels = LabelGenerator::new();
        let (a, b) = (labels.fresh_label(), labels.fresh_label());
        let mut switch = Instruction::TableSwitch {
            default: a,
            low: 0,
            targets: vec![a, b],
        };
        for target in switch.jump_targets_mut() {
            if *target == a {
                *target = b;
            }
        }
        assert_eq!(switch.jump_targets(), vec![b, b, b]);
    }

    #[test]
    fn local_variable_widths() {
        assert_eq!(Instruction::DStore(4).local_variable(), Some((4, 2)));
        assert_eq!(Instruction::IInc(3, -1).local_variable(), Some((3, 1)));
        assert_eq!(Instruction::IAdd.local_variable(), None);
        assert_eq!(!OrdComparison::LT, OrdComparison::GE);
    }
}
