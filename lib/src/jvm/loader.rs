//! Decoding class files into [`ClassModel`]s
//!
//! Loading is pure and fails fast: the first malformed construct aborts with a
//! [`MalformedKind`] describing it. Offsets in the code array and in code attributes are all
//! turned into labels, so every one of them must fall on an instruction boundary.

use crate::jvm::class_file::{
    self, Attribute, AttributeLike, ClassFile, ConstantIndex, ConstantPool, LineNumberTable,
    LocalVariable, LocalVariableTable, LocalVariableTypeTable, StackMapTable, Version,
};
use crate::jvm::code::{DecodedCode, Instruction, Label, LabelGenerator};
use crate::jvm::model::{
    ClassModel, Code, ExceptionRange, FieldModel, LineNumberEntry, LocalVariableEntry,
    MethodModel,
};
use crate::jvm::resolver::ClassHierarchy;
use crate::jvm::verifier::{ExecutionFrame, ModelFrame, VType};
use crate::jvm::{
    BinaryName, Error, FieldType, MalformedKind, MethodDescriptor, Name, ParseDescriptor,
    UnqualifiedName,
};
use log::debug;

/// Load a class, accepting any major version up to [`Version::DEFAULT_MAX_MAJOR`]
pub fn load(bytes: &[u8]) -> Result<ClassModel, Error> {
    load_with_max(bytes, Version::DEFAULT_MAX_MAJOR)
}

/// Load a class, accepting major versions from [`Version::MIN_MAJOR`] to `max_major`
pub fn load_with_max(bytes: &[u8], max_major: u16) -> Result<ClassModel, Error> {
    from_class_file(ClassFile::parse(bytes, max_major)?)
}

/// Read just enough of a class to place it in the class hierarchy
pub fn read_hierarchy(bytes: &[u8]) -> Result<ClassHierarchy, Error> {
    let class_file = ClassFile::parse(bytes, u16::MAX)?;
    let constants = &class_file.constants;
    let superclass = match constants.check_optional_class(class_file.super_class)? {
        Some(superclass) => Some(binary_name(constants.class_name(superclass)?)?),
        None => None,
    };
    Ok(ClassHierarchy {
        name: binary_name(constants.class_name(class_file.this_class)?)?,
        superclass,
        interfaces: class_file
            .interfaces
            .iter()
            .map(|interface| Ok(binary_name(constants.class_name(*interface)?)?))
            .collect::<Result<_, Error>>()?,
        access_flags: class_file.access_flags,
    })
}

/// Build a model out of an already parsed class file
pub fn from_class_file(class_file: ClassFile) -> Result<ClassModel, Error> {
    let ClassFile {
        version,
        constants,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    } = class_file;

    let name = binary_name(constants.class_name(this_class)?)?;
    let superclass = match constants.check_optional_class(super_class)? {
        Some(superclass) => Some(binary_name(constants.class_name(superclass)?)?),
        None => None,
    };
    let interfaces = interfaces
        .into_iter()
        .map(|interface| Ok(binary_name(constants.class_name(interface)?)?))
        .collect::<Result<Vec<_>, Error>>()?;

    let fields = fields
        .into_iter()
        .map(|field| load_field(&constants, field))
        .collect::<Result<Vec<_>, Error>>()?;
    let methods = methods
        .into_iter()
        .map(|method| load_method(&constants, &name, method))
        .collect::<Result<Vec<_>, Error>>()?;

    debug!(
        "Loaded {} (version {}, {} fields, {} methods)",
        name,
        version,
        fields.len(),
        methods.len()
    );

    Ok(ClassModel {
        version,
        constants,
        access_flags,
        name,
        superclass,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn binary_name(name: &str) -> Result<BinaryName, MalformedKind> {
    BinaryName::from_str(name).map_err(MalformedKind::BadDescriptor)
}

fn unqualified_name(name: &str) -> Result<UnqualifiedName, MalformedKind> {
    UnqualifiedName::from_str(name).map_err(MalformedKind::BadDescriptor)
}

fn load_field(constants: &ConstantPool, field: class_file::Field) -> Result<FieldModel, Error> {
    Ok(FieldModel {
        access_flags: field.access_flags,
        name: unqualified_name(constants.utf8(field.name_index)?)?,
        descriptor: FieldType::parse(constants.utf8(field.descriptor_index)?)?,
        attributes: field.attributes,
    })
}

fn load_method(
    constants: &ConstantPool,
    this_class: &BinaryName,
    method: class_file::Method,
) -> Result<MethodModel, Error> {
    let mut model = MethodModel::new(
        method.access_flags,
        unqualified_name(constants.utf8(method.name_index)?)?,
        MethodDescriptor::parse(constants.utf8(method.descriptor_index)?)?,
    );

    for attribute in method.attributes {
        if attribute.name(constants)? == class_file::Code::NAME && model.code.is_none() {
            model.code = Some(load_code(constants, this_class, &model, &attribute)?);
        } else {
            model.attributes.push(attribute);
        }
    }

    Ok(model)
}

fn label_at(
    decoded: &mut DecodedCode,
    labels: &mut LabelGenerator,
    offset: usize,
    attribute: &str,
) -> Result<Label, MalformedKind> {
    decoded
        .label_at(offset, labels)
        .ok_or_else(|| MalformedKind::BadAttribute {
            name: attribute.to_owned(),
            reason: format!("offset {} is not an instruction boundary", offset),
        })
}

fn load_code(
    constants: &ConstantPool,
    this_class: &BinaryName,
    method: &MethodModel,
    attribute: &Attribute,
) -> Result<Code, Error> {
    let raw: class_file::Code = attribute.decode()?;
    let mut labels = LabelGenerator::new();
    let mut decoded = DecodedCode::decode(&raw.code_array, constants, &mut labels)?;

    let mut exception_ranges = vec![];
    for handler in &raw.exception_table {
        let code = class_file::Code::NAME;
        exception_ranges.push(ExceptionRange {
            start: label_at(&mut decoded, &mut labels, handler.start_pc as usize, code)?,
            end: label_at(&mut decoded, &mut labels, handler.end_pc as usize, code)?,
            handler: label_at(&mut decoded, &mut labels, handler.handler_pc as usize, code)?,
            catch_type: constants.check_optional_class(handler.catch_type)?,
        });
    }

    let mut line_numbers = vec![];
    let mut local_variables = vec![];
    let mut local_variable_types = vec![];
    let mut stack_map_table = None;
    let mut other_attributes = vec![];
    for code_attribute in raw.attributes {
        match code_attribute.name(constants)? {
            StackMapTable::NAME => stack_map_table = Some(code_attribute.decode()?),
            LineNumberTable::NAME => {
                let table: LineNumberTable = code_attribute.decode()?;
                for entry in table.0 {
                    line_numbers.push(LineNumberEntry {
                        start: label_at(
                            &mut decoded,
                            &mut labels,
                            entry.start_pc as usize,
                            LineNumberTable::NAME,
                        )?,
                        line: entry.line_number,
                    });
                }
            }
            LocalVariableTable::NAME => {
                let table: LocalVariableTable = code_attribute.decode()?;
                for entry in &table.0 {
                    local_variables.push(local_variable(
                        constants,
                        &mut decoded,
                        &mut labels,
                        entry,
                        LocalVariableTable::NAME,
                    )?);
                }
            }
            LocalVariableTypeTable::NAME => {
                let table: LocalVariableTypeTable = code_attribute.decode()?;
                for entry in &table.0 {
                    local_variable_types.push(local_variable(
                        constants,
                        &mut decoded,
                        &mut labels,
                        entry,
                        LocalVariableTypeTable::NAME,
                    )?);
                }
            }
            _ => other_attributes.push(code_attribute),
        }
    }

    let frames = match stack_map_table {
        Some(table) => {
            load_frames(constants, this_class, method, &table, &mut decoded, &mut labels)?
        }
        None => vec![],
    };

    Ok(Code {
        elements: decoded.into_elements(),
        exception_ranges,
        line_numbers,
        local_variables,
        local_variable_types,
        max_stack: raw.max_stack,
        max_locals: raw.max_locals,
        frames,
        other_attributes,
        stale: false,
        original: Some(attribute.clone()),
        labels,
    })
}

fn local_variable(
    constants: &ConstantPool,
    decoded: &mut DecodedCode,
    labels: &mut LabelGenerator,
    entry: &LocalVariable,
    attribute: &str,
) -> Result<LocalVariableEntry, Error> {
    let end_offset = entry.start_pc as usize + entry.length as usize;
    Ok(LocalVariableEntry {
        start: label_at(decoded, labels, entry.start_pc as usize, attribute)?,
        end: label_at(decoded, labels, end_offset, attribute)?,
        name: constants.check_utf8(ConstantIndex::from(entry.name).0)?,
        descriptor: constants.check_utf8(ConstantIndex::from(entry.descriptor).0)?,
        index: entry.index,
    })
}

/// Turn a `StackMapTable` into frames keyed by label
fn load_frames(
    constants: &ConstantPool,
    this_class: &BinaryName,
    method: &MethodModel,
    table: &StackMapTable,
    decoded: &mut DecodedCode,
    labels: &mut LabelGenerator,
) -> Result<Vec<(Label, ModelFrame)>, Error> {
    let mut previous = ExecutionFrame::entry(
        this_class,
        method.is_static(),
        &method.name,
        &method.descriptor,
    )
    .to_frame();
    let mut previous_offset: Option<usize> = None;
    let mut frames: Vec<(Label, ModelFrame)> = vec![];

    for stack_map_frame in &table.0 {
        let delta = stack_map_frame.offset_delta() as usize;
        let offset = match previous_offset {
            None => delta,
            Some(previous_offset) => previous_offset + delta + 1,
        };

        let frame = previous.next_frame(stack_map_frame, |vtype| -> Result<VType, Error> {
            vtype.try_map(
                |class| Ok(constants.class_ref_type(*class)?),
                |new_offset| {
                    let new_offset = *new_offset as usize;
                    if !matches!(decoded.instruction_at(new_offset), Some(Instruction::New(_))) {
                        return Err(MalformedKind::BadAttribute {
                            name: StackMapTable::NAME.to_owned(),
                            reason: format!("uninitialized value at {} is not a `new`", new_offset),
                        }
                        .into());
                    }
                    Ok(label_at(decoded, labels, new_offset, StackMapTable::NAME)?)
                },
            )
        })?;

        let label = label_at(decoded, labels, offset, StackMapTable::NAME)?;
        frames.push((label, frame.clone()));
        previous = frame;
        previous_offset = Some(offset);
    }

    Ok(frames)
}
