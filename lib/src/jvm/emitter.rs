//! Turning class models back into class files
//!
//! Emission starts by checking that the model is something a JVM would accept: labels are all
//! placed, methods have code exactly when they should, metadata is up to date, exception ranges
//! cover something, and instructions point at constants of the right kind. Only then are labels resolved to offsets and the
//! structures serialized.
//!
//! Code that was never edited is written out exactly as it was read, frames and all, so that
//! running an empty pipeline over a class is a no-op.

use crate::jvm::class_file::{
    self, ClassFile, ConstantIndex, ConstantPool, ConstantPoolOverflow, ExceptionHandler, Field,
    LineNumber, LineNumberTable, LocalVariable, LocalVariableTable, LocalVariableTypeTable,
    Method, StackMapTable,
};
use crate::jvm::code::{encode, CodeElement, EncodedCode, Label};
use crate::jvm::model::{ClassModel, Code, FieldModel, LocalVariableEntry, MethodModel};
use crate::jvm::verifier::{ExecutionFrame, SerializableFrame};
use crate::jvm::{Error, Name, RenderDescriptor, ValidationKind};
use log::debug;
use std::collections::HashSet;
use std::convert::TryFrom;

/// Validate and serialize a class
pub fn emit(class: &ClassModel) -> Result<Vec<u8>, Error> {
    to_class_file(class)?.to_bytes()
}

/// Validate a class and lay it out as a class file
///
/// The constant pool of the model is not modified: constants needed for emission (attribute
/// names, frame types) get appended to a copy.
pub fn to_class_file(class: &ClassModel) -> Result<ClassFile, Error> {
    let mut constants = class.constants.clone();

    let this_class = constants.get_class(class.name.as_str())?;
    let super_class = match &class.superclass {
        Some(superclass) => ConstantIndex::from(constants.get_class(superclass.as_str())?).0,
        None => 0,
    };
    let interfaces = class
        .interfaces
        .iter()
        .map(|interface| constants.get_class(interface.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let fields = class
        .fields
        .iter()
        .map(|field| emit_field(&mut constants, field))
        .collect::<Result<Vec<_>, Error>>()?;

    let mut methods = vec![];
    for method in &class.methods {
        let emitted = emit_method(class, &mut constants, method).map_err(|err| match err {
            MethodError::Validation(kind) => Error::EmissionValidation {
                class: class.name.to_string(),
                member: method.member_name(),
                kind,
            },
            MethodError::Other(err) => err,
        })?;
        methods.push(emitted);
    }

    debug!(
        "Emitting {} ({} constants, {} methods)",
        class.name,
        constants.len(),
        methods.len()
    );

    Ok(ClassFile {
        version: class.version,
        constants,
        access_flags: class.access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes: class.attributes.clone(),
    })
}

/// Check a class against everything emission requires, short of laying out the code
///
/// Out of range branches and oversized code only show up once offsets are known, so a class that
/// passes validation can still fail in [`emit`]. A label that is used but not placed is reported
/// as [`Error::DanglingReference`].
pub fn validate(class: &ClassModel) -> Result<(), Error> {
    for method in &class.methods {
        if let (Some(code), false) = (&method.code, method.is_abstract_or_native()) {
            code.check_labels(&method.member_name())?;
        }
        let checked = match (&method.code, method.is_abstract_or_native()) {
            (None, false) => Err(ValidationKind::MissingCode),
            (Some(_), true) => Err(ValidationKind::UnexpectedCode),
            (None, true) => Ok(()),
            (Some(code), false) => validate_code(&class.constants, code),
        };
        checked.map_err(|kind| Error::EmissionValidation {
            class: class.name.to_string(),
            member: method.member_name(),
            kind,
        })?;
    }
    Ok(())
}

fn emit_field(constants: &mut ConstantPool, field: &FieldModel) -> Result<Field, Error> {
    Ok(Field {
        access_flags: field.access_flags,
        name_index: constants.get_utf8(field.name.as_str())?,
        descriptor_index: constants.get_utf8(field.descriptor.render())?,
        attributes: field.attributes.clone(),
    })
}

/// Either a validation failure (which gets tagged with the member) or some other error
enum MethodError {
    Validation(ValidationKind),
    Other(Error),
}

impl From<ValidationKind> for MethodError {
    fn from(kind: ValidationKind) -> MethodError {
        MethodError::Validation(kind)
    }
}

impl From<Error> for MethodError {
    fn from(err: Error) -> MethodError {
        MethodError::Other(err)
    }
}

impl From<ConstantPoolOverflow> for MethodError {
    fn from(err: ConstantPoolOverflow) -> MethodError {
        MethodError::Other(Error::from(err))
    }
}

fn emit_method(
    class: &ClassModel,
    constants: &mut ConstantPool,
    method: &MethodModel,
) -> Result<Method, MethodError> {
    let mut attributes = vec![];
    match (&method.code, method.is_abstract_or_native()) {
        (None, false) => return Err(ValidationKind::MissingCode.into()),
        (Some(_), true) => return Err(ValidationKind::UnexpectedCode.into()),
        (None, true) => (),
        (Some(code), false) => attributes.push(emit_code(class, constants, method, code)?),
    }
    attributes.extend(method.attributes.iter().cloned());

    Ok(Method {
        access_flags: method.access_flags,
        name_index: constants.get_utf8(method.name.as_str())?,
        descriptor_index: constants.get_utf8(method.descriptor.render())?,
        attributes,
    })
}

/// Check that code is fit for emission, without looking at offsets
///
/// Labels are expected to have gone through [`Code::check_labels`] already.
fn validate_code(constants: &ConstantPool, code: &Code) -> Result<(), ValidationKind> {
    if code.is_stale() {
        return Err(ValidationKind::StaleMetadata);
    }
    if code.instructions().next().is_none() {
        return Err(ValidationKind::EmptyCode);
    }

    let mut placed: HashSet<Label> = HashSet::new();
    for element in code.elements() {
        if let CodeElement::Label(label) = element {
            if !placed.insert(*label) {
                return Err(ValidationKind::DuplicateLabel(*label));
            }
        }
    }

    for (index, insn) in code.instructions().enumerate() {
        if let Some((local, width)) = insn.local_variable() {
            if local as usize + width as usize > code.max_locals() as usize {
                return Err(ValidationKind::LocalsOverflow {
                    instruction: index,
                    index: local,
                    max_locals: code.max_locals(),
                });
            }
        }
        if let Some((constant, expected)) = insn.constant_operand() {
            let raw = constant.0;
            let found = match expected {
                "loadable" => constants.check_loadable(raw, false).is_ok(),
                "two-slot loadable" => constants.check_loadable(raw, true).is_ok(),
                "Fieldref" => constants.check_field_ref(raw).is_ok(),
                "Methodref" => constants.check_method_ref(raw).is_ok(),
                "InvokeDynamic" => constants.check_invoke_dynamic(raw).is_ok(),
                _ => constants.check_class(raw).is_ok(),
            };
            if !found {
                return Err(ValidationKind::ConstantKind {
                    instruction: index,
                    index: raw,
                    expected,
                });
            }
        }
    }

    let positions = code.label_positions();
    for (index, range) in code.exception_ranges().iter().enumerate() {
        match (positions.get(&range.start), positions.get(&range.end)) {
            (Some(start), Some(end)) if start < end => (),
            _ => return Err(ValidationKind::EmptyExceptionRange(index)),
        }
    }

    Ok(())
}

fn offset(encoded: &EncodedCode, label: Label) -> Result<u16, ValidationKind> {
    let offset = encoded
        .label_offsets
        .get(&label)
        .ok_or(ValidationKind::DanglingLabel(label))?;
    u16::try_from(*offset).map_err(|_| ValidationKind::CodeTooLarge)
}

fn emit_code(
    class: &ClassModel,
    constants: &mut ConstantPool,
    method: &MethodModel,
    code: &Code,
) -> Result<class_file::Attribute, MethodError> {
    code.check_labels(&method.member_name())?;
    validate_code(constants, code)?;

    // Untouched code goes out exactly as it came in
    if let Some(original) = &code.original {
        return Ok(original.clone());
    }

    let encoded = encode(code.elements())?;

    let mut exception_table = vec![];
    for (index, range) in code.exception_ranges().iter().enumerate() {
        let start_pc = offset(&encoded, range.start)?;
        let end_pc = offset(&encoded, range.end)?;
        if start_pc >= end_pc {
            return Err(ValidationKind::EmptyExceptionRange(index).into());
        }
        exception_table.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc: offset(&encoded, range.handler)?,
            catch_type: range
                .catch_type
                .map_or(0, |catch_type| ConstantIndex::from(catch_type).0),
        });
    }

    let mut attributes = vec![];
    if class.version.needs_frames() && !code.frames().is_empty() {
        let table = stack_map_table(class, constants, method, code, &encoded)?;
        attributes.push(constants.get_attribute(table)?);
    }
    if !code.line_numbers().is_empty() {
        let mut lines = vec![];
        for entry in code.line_numbers() {
            lines.push(LineNumber {
                start_pc: offset(&encoded, entry.start)?,
                line_number: entry.line,
            });
        }
        attributes.push(constants.get_attribute(LineNumberTable(lines))?);
    }
    if !code.local_variables().is_empty() {
        let table = local_variables(&encoded, code.local_variables())?;
        attributes.push(constants.get_attribute(LocalVariableTable(table))?);
    }
    if !code.local_variable_types().is_empty() {
        let table = local_variables(&encoded, code.local_variable_types())?;
        attributes.push(constants.get_attribute(LocalVariableTypeTable(table))?);
    }
    attributes.extend(code.other_attributes().iter().cloned());

    let code_attribute = class_file::Code {
        max_stack: code.max_stack(),
        max_locals: code.max_locals(),
        code_array: encoded.bytes,
        exception_table,
        attributes,
    };
    Ok(constants.get_attribute(code_attribute)?)
}

fn local_variables(
    encoded: &EncodedCode,
    entries: &[LocalVariableEntry],
) -> Result<Vec<LocalVariable>, ValidationKind> {
    let mut table = vec![];
    for entry in entries {
        let start_pc = offset(encoded, entry.start)?;
        let end_pc = offset(encoded, entry.end)?;
        table.push(LocalVariable {
            start_pc,
            length: end_pc.saturating_sub(start_pc),
            name: entry.name,
            descriptor: entry.descriptor,
            index: entry.index,
        });
    }
    Ok(table)
}

/// Encode frames as deltas from one another, starting from the implicit entry frame
fn stack_map_table(
    class: &ClassModel,
    constants: &mut ConstantPool,
    method: &MethodModel,
    code: &Code,
    encoded: &EncodedCode,
) -> Result<StackMapTable, MethodError> {
    let mut frames: Vec<(u16, SerializableFrame)> = vec![];
    for (label, frame) in code.frames() {
        let frame_offset = offset(encoded, *label)?;
        let frame = frame.into_serializable(constants, |new_label| {
            offset(encoded, *new_label).map_err(|kind| Error::EmissionValidation {
                class: class.name.to_string(),
                member: method.member_name(),
                kind,
            })
        })?;
        frames.push((frame_offset, frame));
    }
    frames.sort_by_key(|(frame_offset, _)| *frame_offset);
    frames.dedup();
    for pair in frames.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(ValidationKind::ConflictingFrames(pair[0].0 as usize).into());
        }
    }

    let entry = ExecutionFrame::entry(
        &class.name,
        method.is_static(),
        &method.name,
        &method.descriptor,
    )
    .to_frame()
    .into_serializable(constants, |_| Ok(0))?;

    let mut stack_map_frames = vec![];
    let mut previous: (Option<u16>, SerializableFrame) = (None, entry);
    for (frame_offset, frame) in frames {
        let offset_delta = match previous.0 {
            None => frame_offset,
            Some(previous_offset) => frame_offset - previous_offset - 1,
        };
        stack_map_frames.push(frame.stack_map_frame(offset_delta, &previous.1));
        previous = (Some(frame_offset), frame);
    }
    Ok(StackMapTable(stack_map_frames))
}
