use super::*;
use crate::jvm::class_file::{
    ClassConstantIndex, Constant, ConstantIndex, ConstantPool, SerializableType, StackMapFrame,
};
use crate::jvm::code::{Instruction, InvokeType, Label};
use crate::jvm::{
    BinaryName, Error, FieldType, MalformedKind, MethodDescriptor, ParseDescriptor, RefType,
    UnqualifiedName, VerifierErrorKind,
};
use crate::util::Width;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Frames are kept in the compressed shape used by the `StackMapTable` attribute: a `long` or
/// `double` local is a single entry standing for two slots, and trailing `Top` locals are left
/// off.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: Vec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: Vec<VerificationType<Cls, U>>,
}

/// Frame as stored in the method model
pub type ModelFrame = Frame<RefType<BinaryName>, Label>;

/// Frame as stored in a class file
pub type SerializableFrame = Frame<ClassConstantIndex, u16>;

impl<Cls: Clone + PartialEq, U: Clone + PartialEq> Frame<Cls, U> {
    /// Build a frame out of slot-per-entry locals
    pub fn from_slots(
        local_slots: &[VerificationType<Cls, U>],
        stack: Vec<VerificationType<Cls, U>>,
    ) -> Self {
        let mut locals = vec![];
        let mut slot = 0;
        while slot < local_slots.len() {
            let local = &local_slots[slot];
            slot += local.width();
            locals.push(local.clone());
        }
        while let Some(VerificationType::Top) = locals.last() {
            locals.pop();
        }
        Frame { locals, stack }
    }

    /// Locals with one entry per slot (the second half of a `long` or `double` is `Top`)
    pub fn expand_locals(&self) -> Vec<VerificationType<Cls, U>> {
        let mut slots = vec![];
        for local in &self.locals {
            slots.push(local.clone());
            if local.width() == 2 {
                slots.push(VerificationType::Top);
            }
        }
        slots
    }

    /// Number of slots used by the locals
    pub fn local_slots(&self) -> usize {
        self.locals.iter().map(Width::width).sum()
    }

    /// Number of slots used by the stack
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(Width::width).sum()
    }

    /// Compute the frame described by a `StackMapTable` entry following this frame
    pub fn next_frame<E: From<MalformedKind>>(
        &self,
        frame: &StackMapFrame,
        mut convert: impl FnMut(&SerializableType) -> Result<VerificationType<Cls, U>, E>,
    ) -> Result<Self, E> {
        let mut convert_all = |types: &[SerializableType]| -> Result<Vec<_>, E> {
            types.iter().map(&mut convert).collect()
        };
        Ok(match frame {
            StackMapFrame::SameLocalsNoStack { .. } => Frame {
                locals: self.locals.clone(),
                stack: vec![],
            },
            StackMapFrame::SameLocalsOneStack { stack, .. } => Frame {
                locals: self.locals.clone(),
                stack: convert_all(std::slice::from_ref(stack))?,
            },
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                let chopped = *chopped_k as usize;
                if chopped > self.locals.len() {
                    return Err(MalformedKind::BadAttribute {
                        name: String::from("StackMapTable"),
                        reason: format!(
                            "cannot chop {} locals from a frame with {}",
                            chopped,
                            self.locals.len()
                        ),
                    }
                    .into());
                }
                Frame {
                    locals: self.locals[..self.locals.len() - chopped].to_vec(),
                    stack: vec![],
                }
            }
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                let mut all_locals = self.locals.clone();
                all_locals.extend(convert_all(locals)?);
                Frame {
                    locals: all_locals,
                    stack: vec![],
                }
            }
            StackMapFrame::Full { locals, stack, .. } => Frame {
                locals: convert_all(locals)?,
                stack: convert_all(stack)?,
            },
        })
    }
}

impl ModelFrame {
    /// Resolve the frame into its serializable form
    pub fn into_serializable(
        &self,
        constants: &mut ConstantPool,
        mut uninitialized_offset: impl FnMut(&Label) -> Result<u16, Error>,
    ) -> Result<SerializableFrame, Error> {
        let mut convert = |vtype: &VType| -> Result<SerializableType, Error> {
            vtype.try_map(
                |ref_type| constants.get_class_ref(ref_type).map_err(Error::from),
                &mut uninitialized_offset,
            )
        };
        Ok(Frame {
            locals: self.locals.iter().map(&mut convert).collect::<Result<_, _>>()?,
            stack: self.stack.iter().map(&mut convert).collect::<Result<_, _>>()?,
        })
    }
}

impl SerializableFrame {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev =
                        self.locals[..] == previous_frame.locals[..this_locals_len];
                    if len_difference < 4 && this_is_prefix_of_prev {
                        return if len_difference == 0 {
                            StackMapFrame::SameLocalsNoStack { offset_delta }
                        } else {
                            StackMapFrame::ChopLocalsNoStack {
                                offset_delta,
                                chopped_k: len_difference as u8,
                            }
                        };
                    }
                } else if this_locals_len - prev_locals_len < 4
                    && self.locals[..prev_locals_len] == previous_frame.locals[..]
                {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self.locals[prev_locals_len..].to_vec(),
                    };
                }
            }
            1 => {
                if self.locals == previous_frame.locals {
                    return StackMapFrame::SameLocalsOneStack {
                        offset_delta,
                        stack: self.stack[0].clone(),
                    };
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a full stack map frame for this frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            locals: self.locals.clone(),
            stack: self.stack.clone(),
        }
    }
}

/// Frame used while stepping through instructions
///
/// Unlike [`Frame`], the locals here have one entry per slot so that instructions can index
/// directly into them. The stack still has one entry per value.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ExecutionFrame {
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

/// Information an instruction needs, beyond the frame, to compute its effect
pub struct ExecutionContext<'a> {
    pub constants: &'a ConstantPool,

    /// Class declaring the method being executed
    pub this_class: &'a BinaryName,

    /// Label placed right before the instruction (required to type the result of `new`)
    pub label: Option<Label>,
}

impl ExecutionFrame {
    /// Frame on entry to a method
    pub fn entry(
        this_class: &BinaryName,
        is_static: bool,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> ExecutionFrame {
        let mut frame = ExecutionFrame::default();
        if !is_static {
            let this = if *name == UnqualifiedName::INIT && *this_class != BinaryName::OBJECT {
                VType::UninitializedThis
            } else {
                VType::Object(RefType::Object(this_class.clone()))
            };
            frame.locals.push(this);
        }
        for parameter in &descriptor.parameters {
            let vtype = VType::from(parameter.clone());
            let width = vtype.width();
            frame.locals.push(vtype);
            if width == 2 {
                frame.locals.push(VType::Top);
            }
        }
        frame
    }

    pub fn from_frame(frame: &ModelFrame) -> ExecutionFrame {
        ExecutionFrame {
            locals: frame.expand_locals(),
            stack: frame.stack.clone(),
        }
    }

    pub fn to_frame(&self) -> ModelFrame {
        Frame::from_slots(&self.locals, self.stack.clone())
    }

    /// Frame at the start of an exception handler covering code where this frame holds
    pub fn handler_frame(&self, caught: RefType<BinaryName>) -> ExecutionFrame {
        ExecutionFrame {
            locals: self.locals.clone(),
            stack: vec![VType::Object(caught)],
        }
    }

    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(Width::width).sum()
    }

    /// Update the frame to reflect the effects of the given instruction
    ///
    /// Primitive types and stack heights are checked exactly. Reference types are only checked
    /// for being references: assignability is left to the JVM verifier.
    pub fn execute(
        &mut self,
        insn: &Instruction,
        context: &ExecutionContext,
    ) -> Result<(), VerifierErrorKind> {
        execute(self, insn, context)
    }
}

fn execute(
    frame: &mut ExecutionFrame,
    insn: &Instruction,
    context: &ExecutionContext,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let constants = context.constants;
    let ExecutionFrame {
        ref mut locals,
        ref mut stack,
    } = frame;

    match insn {
        Nop => (),
        AConstNull => stack.push(Null),
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => stack.push(Integer),
        LConst0 | LConst1 => stack.push(Long),
        FConst0 | FConst1 | FConst2 => stack.push(Float),
        DConst0 | DConst1 => stack.push(Double),
        BiPush(_) | SiPush(_) => stack.push(Integer),
        Ldc(index) => stack.push(constant_type(constants, *index, false)?),
        Ldc2(index) => stack.push(constant_type(constants, *index, true)?),

        ILoad(idx) => stack.push(load_primitive(locals, *idx, Integer)?),
        LLoad(idx) => stack.push(load_primitive(locals, *idx, Long)?),
        FLoad(idx) => stack.push(load_primitive(locals, *idx, Float)?),
        DLoad(idx) => stack.push(load_primitive(locals, *idx, Double)?),
        ALoad(idx) => {
            let local = get_local(locals, *idx)?;
            if !local.is_reference() {
                return Err(invalid_type(&local, "reference"));
            }
            stack.push(local);
        }

        IALoad | BALoad | CALoad | SALoad => array_load(stack, Integer)?,
        LALoad => array_load(stack, Long)?,
        FALoad => array_load(stack, Float)?,
        DALoad => array_load(stack, Double)?,
        AALoad => {
            pop_expecting(stack, Integer)?;
            let element = match pop_reference(stack)? {
                Object(array_type) => match array_type.element() {
                    Some(FieldType::Ref(element)) => Object(element),
                    Some(FieldType::Base(_)) => {
                        return Err(invalid_type(&Object(array_type), "array of references"))
                    }
                    None => Object(RefType::Object(BinaryName::OBJECT)),
                },
                _ => Null,
            };
            stack.push(element);
        }

        IStore(idx) => {
            pop_expecting(stack, Integer)?;
            store_local(locals, *idx, Integer);
        }
        LStore(idx) => {
            pop_expecting(stack, Long)?;
            store_local(locals, *idx, Long);
        }
        FStore(idx) => {
            pop_expecting(stack, Float)?;
            store_local(locals, *idx, Float);
        }
        DStore(idx) => {
            pop_expecting(stack, Double)?;
            store_local(locals, *idx, Double);
        }
        AStore(idx) => {
            // `Top` stands in for the return address pushed by `jsr`
            let value = pop(stack)?;
            if !value.is_reference() && value != Top {
                return Err(invalid_type(&value, "reference"));
            }
            store_local(locals, *idx, value);
        }

        IAStore | BAStore | CAStore | SAStore => array_store(stack, Integer)?,
        LAStore => array_store(stack, Long)?,
        FAStore => array_store(stack, Float)?,
        DAStore => array_store(stack, Double)?,
        AAStore => {
            pop_reference(stack)?;
            pop_expecting(stack, Integer)?;
            pop_reference(stack)?;
        }

        Pop => {
            pop_width(stack, 1)?;
        }
        Pop2 => {
            if pop(stack)?.width() == 1 {
                pop_width(stack, 1)?;
            }
        }
        Dup => {
            let value1 = pop_width(stack, 1)?;
            stack.push(value1.clone());
            stack.push(value1);
        }
        DupX1 => {
            let value1 = pop_width(stack, 1)?;
            let value2 = pop_width(stack, 1)?;
            stack.push(value1.clone());
            stack.push(value2);
            stack.push(value1);
        }
        DupX2 => {
            let value1 = pop_width(stack, 1)?;
            let value2 = pop(stack)?;
            if value2.width() == 2 {
                stack.push(value1.clone());
                stack.push(value2);
                stack.push(value1);
            } else {
                let value3 = pop_width(stack, 1)?;
                stack.push(value1.clone());
                stack.push(value3);
                stack.push(value2);
                stack.push(value1);
            }
        }
        Dup2 => {
            let value1 = pop(stack)?;
            if value1.width() == 2 {
                stack.push(value1.clone());
                stack.push(value1);
            } else {
                let value2 = pop_width(stack, 1)?;
                stack.push(value2.clone());
                stack.push(value1.clone());
                stack.push(value2);
                stack.push(value1);
            }
        }
        Dup2X1 => {
            let value1 = pop(stack)?;
            if value1.width() == 2 {
                let value2 = pop_width(stack, 1)?;
                stack.push(value1.clone());
                stack.push(value2);
                stack.push(value1);
            } else {
                let value2 = pop_width(stack, 1)?;
                let value3 = pop_width(stack, 1)?;
                stack.push(value2.clone());
                stack.push(value1.clone());
                stack.push(value3);
                stack.push(value2);
                stack.push(value1);
            }
        }
        Dup2X2 => {
            let value1 = pop(stack)?;
            if value1.width() == 2 {
                let value2 = pop(stack)?;
                if value2.width() == 2 {
                    stack.push(value1.clone());
                    stack.push(value2);
                    stack.push(value1);
                } else {
                    let value3 = pop_width(stack, 1)?;
                    stack.push(value1.clone());
                    stack.push(value3);
                    stack.push(value2);
                    stack.push(value1);
                }
            } else {
                let value2 = pop_width(stack, 1)?;
                let value3 = pop(stack)?;
                if value3.width() == 2 {
                    stack.push(value2.clone());
                    stack.push(value1.clone());
                    stack.push(value3);
                    stack.push(value2);
                    stack.push(value1);
                } else {
                    let value4 = pop_width(stack, 1)?;
                    stack.push(value2.clone());
                    stack.push(value1.clone());
                    stack.push(value4);
                    stack.push(value3);
                    stack.push(value2);
                    stack.push(value1);
                }
            }
        }
        Swap => {
            let value1 = pop_width(stack, 1)?;
            let value2 = pop_width(stack, 1)?;
            stack.push(value1);
            stack.push(value2);
        }

        IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor => binary(stack, Integer)?,
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => binary(stack, Long)?,
        FAdd | FSub | FMul | FDiv | FRem => binary(stack, Float)?,
        DAdd | DSub | DMul | DDiv | DRem => binary(stack, Double)?,
        INeg => convert(stack, Integer, Integer)?,
        LNeg => convert(stack, Long, Long)?,
        FNeg => convert(stack, Float, Float)?,
        DNeg => convert(stack, Double, Double)?,
        ISh(_) => binary(stack, Integer)?,
        LSh(_) => {
            pop_expecting(stack, Integer)?;
            convert(stack, Long, Long)?;
        }
        IInc(idx, _) => {
            load_primitive(locals, *idx, Integer)?;
        }

        I2L => convert(stack, Integer, Long)?,
        I2F => convert(stack, Integer, Float)?,
        I2D => convert(stack, Integer, Double)?,
        L2I => convert(stack, Long, Integer)?,
        L2F => convert(stack, Long, Float)?,
        L2D => convert(stack, Long, Double)?,
        F2I => convert(stack, Float, Integer)?,
        F2L => convert(stack, Float, Long)?,
        F2D => convert(stack, Float, Double)?,
        D2I => convert(stack, Double, Integer)?,
        D2L => convert(stack, Double, Long)?,
        D2F => convert(stack, Double, Float)?,
        I2B | I2C | I2S => convert(stack, Integer, Integer)?,

        LCmp => compare(stack, Long)?,
        FCmp(_) => compare(stack, Float)?,
        DCmp(_) => compare(stack, Double)?,

        If(_, _) => pop_expecting(stack, Integer)?,
        IfICmp(_, _) => {
            pop_expecting(stack, Integer)?;
            pop_expecting(stack, Integer)?;
        }
        IfACmp(_, _) => {
            pop_reference(stack)?;
            pop_reference(stack)?;
        }
        IfNull(_, _) => {
            pop_reference(stack)?;
        }
        Goto(_) => (),

        // Return addresses have no verification type of their own
        Jsr(_) => stack.push(Top),
        Ret(idx) => {
            get_local(locals, *idx)?;
        }
        TableSwitch { .. } | LookupSwitch { .. } => pop_expecting(stack, Integer)?,

        IReturn => pop_expecting(stack, Integer)?,
        LReturn => pop_expecting(stack, Long)?,
        FReturn => pop_expecting(stack, Float)?,
        DReturn => pop_expecting(stack, Double)?,
        AReturn | AThrow => {
            pop_reference(stack)?;
        }
        Return => (),

        GetStatic(field) => {
            let field_type = field_type(constants, *field)?;
            stack.push(VType::from(field_type));
        }
        PutStatic(field) => {
            let field_type = field_type(constants, *field)?;
            pop_value(stack, &field_type)?;
        }
        GetField(field) => {
            let field_type = field_type(constants, *field)?;
            pop_reference(stack)?;
            stack.push(VType::from(field_type));
        }
        PutField(field) => {
            let field_type = field_type(constants, *field)?;
            pop_value(stack, &field_type)?;
            pop_reference(stack)?;
        }

        Invoke(invoke_type, method) => {
            let bad = || VerifierErrorKind::BadConstant(ConstantIndex::from(*method).0);
            let member = constants.method_ref(*method).map_err(|_| bad())?;
            let descriptor =
                MethodDescriptor::<BinaryName>::parse(member.descriptor).map_err(|_| bad())?;
            for parameter in descriptor.parameters.iter().rev() {
                pop_value(stack, parameter)?;
            }
            if *invoke_type != InvokeType::Static {
                let receiver = pop_reference(stack)?;
                if member.name == UnqualifiedName::INIT.as_ref() {
                    let initialized = match receiver {
                        UninitializedThis => Object(RefType::Object(context.this_class.clone())),
                        Uninitialized(_) => {
                            Object(RefType::from_class_name(member.class).map_err(|_| bad())?)
                        }
                        _ => return Err(invalid_type(&receiver, "uninitialized reference")),
                    };
                    replace_all(locals, &receiver, &initialized);
                    replace_all(stack, &receiver, &initialized);
                }
            }
            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }
        InvokeDynamic(call_site) => {
            let bad = || VerifierErrorKind::BadConstant(ConstantIndex::from(*call_site).0);
            let (_, descriptor) = constants.invoke_dynamic(*call_site).map_err(|_| bad())?;
            let descriptor =
                MethodDescriptor::<BinaryName>::parse(descriptor).map_err(|_| bad())?;
            for parameter in descriptor.parameters.iter().rev() {
                pop_value(stack, parameter)?;
            }
            if let Some(return_type) = descriptor.return_type {
                stack.push(VType::from(return_type));
            }
        }

        New(_) => {
            let label = context.label.ok_or(VerifierErrorKind::UnlabeledNew)?;
            stack.push(Uninitialized(label));
        }
        NewArray(base_type) => {
            pop_expecting(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(class) => {
            let element = class_type(constants, *class)?;
            pop_expecting(stack, Integer)?;
            stack.push(Object(RefType::array(FieldType::Ref(element))));
        }
        MultiANewArray(class, dimensions) => {
            let array_type = class_type(constants, *class)?;
            for _ in 0..*dimensions {
                pop_expecting(stack, Integer)?;
            }
            stack.push(Object(array_type));
        }
        ArrayLength => {
            pop_reference(stack)?;
            stack.push(Integer);
        }
        CheckCast(class) => {
            let cast_type = class_type(constants, *class)?;
            pop_reference(stack)?;
            stack.push(Object(cast_type));
        }
        InstanceOf(_) => {
            pop_reference(stack)?;
            stack.push(Integer);
        }
        MonitorEnter | MonitorExit => {
            pop_reference(stack)?;
        }
    }

    Ok(())
}

fn invalid_type(found: &VType, expected: impl Into<String>) -> VerifierErrorKind {
    VerifierErrorKind::InvalidType {
        found: found.describe(),
        expected: expected.into(),
    }
}

fn constant_type(
    constants: &ConstantPool,
    index: ConstantIndex,
    wide: bool,
) -> Result<VType, VerifierErrorKind> {
    let bad = || VerifierErrorKind::BadConstant(index.0);
    let vtype = match constants.get(index).ok_or_else(bad)? {
        Constant::Integer(_) => VType::Integer,
        Constant::Float(_) => VType::Float,
        Constant::Long(_) => VType::Long,
        Constant::Double(_) => VType::Double,
        Constant::String(_) => VType::Object(RefType::Object(BinaryName::STRING)),
        Constant::Class(_) => VType::Object(RefType::Object(BinaryName::CLASS)),
        Constant::MethodType { .. } => VType::Object(RefType::Object(BinaryName::METHODTYPE)),
        Constant::MethodHandle { .. } => VType::Object(RefType::Object(BinaryName::METHODHANDLE)),
        Constant::Dynamic { name_and_type, .. } => {
            let (_, descriptor) = constants.name_and_type(*name_and_type).map_err(|_| bad())?;
            VType::from(FieldType::<BinaryName>::parse(descriptor).map_err(|_| bad())?)
        }
        _ => return Err(bad()),
    };
    if (vtype.width() == 2) == wide {
        Ok(vtype)
    } else {
        Err(bad())
    }
}

fn class_type(
    constants: &ConstantPool,
    class: ClassConstantIndex,
) -> Result<RefType<BinaryName>, VerifierErrorKind> {
    constants
        .class_ref_type(class)
        .map_err(|_| VerifierErrorKind::BadConstant(ConstantIndex::from(class).0))
}

fn field_type(
    constants: &ConstantPool,
    field: crate::jvm::class_file::FieldRefConstantIndex,
) -> Result<FieldType<BinaryName>, VerifierErrorKind> {
    let bad = || VerifierErrorKind::BadConstant(ConstantIndex::from(field).0);
    let member = constants.field_ref(field).map_err(|_| bad())?;
    FieldType::parse(member.descriptor).map_err(|_| bad())
}

fn replace_all(types: &mut [VType], original: &VType, updated: &VType) {
    for vtype in types.iter_mut() {
        if vtype == original {
            *vtype = updated.clone();
        }
    }
}

fn get_local(locals: &[VType], index: u16) -> Result<VType, VerifierErrorKind> {
    locals
        .get(index as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidIndex(index))
}

fn load_primitive(locals: &[VType], index: u16, expected: VType) -> Result<VType, VerifierErrorKind> {
    let local = get_local(locals, index)?;
    if local == expected {
        Ok(local)
    } else {
        Err(invalid_type(&local, expected.describe()))
    }
}

/// Write a local, invalidating any two-slot value it overlaps with
fn store_local(locals: &mut Vec<VType>, index: u16, value: VType) {
    let index = index as usize;
    let width = value.width();
    if locals.len() < index + width {
        locals.resize(index + width, VType::Top);
    }
    if index > 0 && locals[index - 1].width() == 2 {
        locals[index - 1] = VType::Top;
    }
    if width == 2 {
        locals[index + 1] = VType::Top;
    }
    locals[index] = value;
}

fn pop(stack: &mut Vec<VType>) -> Result<VType, VerifierErrorKind> {
    stack.pop().ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_width(stack: &mut Vec<VType>, expected_width: usize) -> Result<VType, VerifierErrorKind> {
    let vtype = pop(stack)?;
    let found_width = vtype.width();
    if found_width == expected_width {
        Ok(vtype)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_expecting(stack: &mut Vec<VType>, expected: VType) -> Result<(), VerifierErrorKind> {
    let vtype = pop(stack)?;
    if vtype == expected {
        Ok(())
    } else {
        Err(invalid_type(&vtype, expected.describe()))
    }
}

fn pop_reference(stack: &mut Vec<VType>) -> Result<VType, VerifierErrorKind> {
    let vtype = pop(stack)?;
    if vtype.is_reference() {
        Ok(vtype)
    } else {
        Err(invalid_type(&vtype, "reference"))
    }
}

/// Pop a value of the given field type
fn pop_value(
    stack: &mut Vec<VType>,
    field_type: &FieldType<BinaryName>,
) -> Result<(), VerifierErrorKind> {
    match VType::from(field_type.clone()) {
        VType::Object(_) => pop_reference(stack).map(|_| ()),
        primitive => pop_expecting(stack, primitive),
    }
}

fn binary(stack: &mut Vec<VType>, operand: VType) -> Result<(), VerifierErrorKind> {
    pop_expecting(stack, operand.clone())?;
    pop_expecting(stack, operand.clone())?;
    stack.push(operand);
    Ok(())
}

fn convert(stack: &mut Vec<VType>, from: VType, to: VType) -> Result<(), VerifierErrorKind> {
    pop_expecting(stack, from)?;
    stack.push(to);
    Ok(())
}

fn compare(stack: &mut Vec<VType>, operand: VType) -> Result<(), VerifierErrorKind> {
    pop_expecting(stack, operand.clone())?;
    pop_expecting(stack, operand)?;
    stack.push(VType::Integer);
    Ok(())
}

fn array_load(stack: &mut Vec<VType>, element: VType) -> Result<(), VerifierErrorKind> {
    pop_expecting(stack, VType::Integer)?;
    pop_reference(stack)?;
    stack.push(element);
    Ok(())
}

fn array_store(stack: &mut Vec<VType>, element: VType) -> Result<(), VerifierErrorKind> {
    pop_expecting(stack, element)?;
    pop_expecting(stack, VType::Integer)?;
    pop_reference(stack)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LabelGenerator;
    use crate::jvm::Name;
    use VerificationType::*;

    fn run(
        frame: &mut ExecutionFrame,
        constants: &ConstantPool,
        insns: &[Instruction],
    ) -> Result<(), VerifierErrorKind> {
        let this_class = BinaryName::from_str("me/Test").unwrap();
        let context = ExecutionContext {
            constants,
            this_class: &this_class,
            label: None,
        };
        for insn in insns {
            frame.execute(insn, &context)?;
        }
        Ok(())
    }

    #[test]
    fn entry_frames() {
        let this_class = BinaryName::from_str("me/Test").unwrap();
        let descriptor = MethodDescriptor::parse("(JI)V").unwrap();
        let frame = ExecutionFrame::entry(&this_class, false, &UnqualifiedName::INIT, &descriptor);
        assert_eq!(frame.locals, vec![UninitializedThis, Long, Top, Integer]);

        let frame = ExecutionFrame::entry(
            &BinaryName::OBJECT,
            false,
            &UnqualifiedName::INIT,
            &MethodDescriptor::parse("()V").unwrap(),
        );
        assert_eq!(
            frame.locals,
            vec![Object(RefType::Object(BinaryName::OBJECT))]
        );

        let compressed = ExecutionFrame::entry(&this_class, true, &UnqualifiedName::CLINIT, &descriptor)
            .to_frame();
        assert_eq!(compressed.locals, vec![Long, Integer]);
        assert_eq!(compressed.local_slots(), 3);
    }

    #[test]
    fn compression_drops_trailing_tops() {
        let frame: ModelFrame = Frame::from_slots(&[Integer, Top, Double, Top, Top], vec![]);
        assert_eq!(frame.locals, vec![Integer, Top, Double]);
        assert_eq!(frame.expand_locals(), vec![Integer, Top, Double, Top]);
    }

    #[test]
    fn stores_invalidate_overlapping_longs() {
        let constants = ConstantPool::new();
        let mut frame = ExecutionFrame::default();
        run(&mut frame, &constants, &[Instruction::LConst0, Instruction::LStore(1)]).unwrap();
        assert_eq!(frame.locals, vec![Top, Long, Top]);

        run(&mut frame, &constants, &[Instruction::IConst0, Instruction::IStore(2)]).unwrap();
        assert_eq!(frame.locals, vec![Top, Top, Integer]);
    }

    #[test]
    fn primitive_mismatches_are_rejected() {
        let constants = ConstantPool::new();
        let mut frame = ExecutionFrame::default();
        let err = run(
            &mut frame,
            &constants,
            &[Instruction::IConst0, Instruction::FConst0, Instruction::IAdd],
        )
        .unwrap_err();
        assert_eq!(
            err,
            VerifierErrorKind::InvalidType {
                found: String::from("float"),
                expected: String::from("int"),
            }
        );

        let mut frame = ExecutionFrame::default();
        assert_eq!(
            run(&mut frame, &constants, &[Instruction::Pop]),
            Err(VerifierErrorKind::EmptyStack)
        );
    }

    #[test]
    fn dup2_x1_category_one() {
        let constants = ConstantPool::new();
        let mut frame = ExecutionFrame::default();
        run(
            &mut frame,
            &constants,
            &[
                Instruction::AConstNull,
                Instruction::FConst0,
                Instruction::IConst0,
                Instruction::Dup2X1,
            ],
        )
        .unwrap();
        assert_eq!(frame.stack, vec![Float, Integer, Null, Float, Integer]);
        assert_eq!(frame.stack_slots(), 5);
    }

    #[test]
    fn constructor_call_initializes_every_copy() {
        let mut constants = ConstantPool::new();
        let class = constants.get_class("me/Point").unwrap();
        let init = constants
            .get_method_ref("me/Point", "<init>", "()V", false)
            .unwrap();
        let this_class = BinaryName::from_str("me/Test").unwrap();
        let label = LabelGenerator::new().fresh_label();

        let mut frame = ExecutionFrame::default();
        let mut context = ExecutionContext {
            constants: &constants,
            this_class: &this_class,
            label: Some(label),
        };
        frame.execute(&Instruction::New(class), &context).unwrap();
        context.label = None;
        frame.execute(&Instruction::Dup, &context).unwrap();
        assert_eq!(frame.stack, vec![Uninitialized(label), Uninitialized(label)]);

        frame
            .execute(&Instruction::Invoke(InvokeType::Special, init), &context)
            .unwrap();
        let point = RefType::Object(BinaryName::from_str("me/Point").unwrap());
        assert_eq!(frame.stack, vec![Object(point)]);

        assert_eq!(
            frame.execute(&Instruction::New(class), &context),
            Err(VerifierErrorKind::UnlabeledNew)
        );
    }

    #[test]
    fn stack_map_frame_compression() {
        let previous: SerializableFrame = Frame {
            locals: vec![Integer, Float],
            stack: vec![],
        };
        let same = previous.clone();
        assert_eq!(
            same.stack_map_frame(3, &previous),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );

        let chopped: SerializableFrame = Frame {
            locals: vec![Integer],
            stack: vec![],
        };
        assert_eq!(
            chopped.stack_map_frame(0, &previous),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 0,
                chopped_k: 1
            }
        );

        let appended: SerializableFrame = Frame {
            locals: vec![Integer, Float, Long],
            stack: vec![],
        };
        let append_frame = appended.stack_map_frame(7, &previous);
        assert_eq!(
            append_frame,
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 7,
                locals: vec![Long]
            }
        );
        let decoded = previous
            .next_frame::<MalformedKind>(&append_frame, |t| Ok(t.clone()))
            .unwrap();
        assert_eq!(decoded, appended);

        let one_stack: SerializableFrame = Frame {
            locals: vec![Integer, Float],
            stack: vec![Null],
        };
        assert_eq!(
            one_stack.stack_map_frame(1, &previous),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 1,
                stack: Null
            }
        );

        let different: SerializableFrame = Frame {
            locals: vec![Float],
            stack: vec![Null, Null],
        };
        assert!(matches!(
            different.stack_map_frame(1, &previous),
            StackMapFrame::Full { .. }
        ));
    }
}
