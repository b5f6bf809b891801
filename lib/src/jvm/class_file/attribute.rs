use crate::jvm::binary_format::{read_bytes, Deserialize, Serialize};
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, ConstantPool, Utf8ConstantIndex};
use crate::jvm::verifier::VerificationType;
use crate::jvm::{Error, InnerClassAccessFlags, MalformedKind};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// Attributes stay as raw bytes until something needs to look inside them. Only a handful of
/// attributes are ever decoded (see the implementors of [`AttributeLike`]), everything else is
/// written back out byte-for-byte.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Attribute {
    /// Name of the attribute
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str, MalformedKind> {
        pool.utf8(self.name_index)
    }

    /// Decode the attribute body, requiring all bytes be used
    pub fn decode<A: AttributeLike>(&self) -> Result<A, Error> {
        let bad = |reason: String| {
            Error::MalformedClass(MalformedKind::BadAttribute {
                name: A::NAME.to_owned(),
                reason,
            })
        };
        let mut reader: &[u8] = &self.info;
        let decoded = A::deserialize(&mut reader).map_err(|err| bad(err.to_string()))?;
        if !reader.is_empty() {
            return Err(bad(format!("{} unexpected trailing bytes", reader.len())));
        }
        Ok(decoded)
    }

    /// Find and decode the first attribute with the right name
    pub fn find<A: AttributeLike>(
        attributes: &[Attribute],
        pool: &ConstantPool,
    ) -> Result<Option<A>, Error> {
        for attribute in attributes {
            if attribute.name(pool)? == A::NAME {
                return attribute.decode().map(Some);
            }
        }
        Ok(None)
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        // Attribute info length is 4 bytes
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)?;

        Ok(())
    }
}

impl Deserialize for Attribute {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        let len = u32::deserialize(reader)?;
        let info = read_bytes(reader, len as usize)?;
        Ok(Attribute { name_index, info })
    }
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by things
/// which can be turned into attributes (and read back out of them).
pub trait AttributeLike: Serialize + Deserialize {
    /// Name of the attribute
    const NAME: &'static str;
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        (self.code_array.len() as u32).serialize(writer)?;
        writer.write_all(&self.code_array)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Code {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let max_stack = u16::deserialize(reader)?;
        let max_locals = u16::deserialize(reader)?;
        let code_len = u32::deserialize(reader)?;
        let code_array = read_bytes(reader, code_len as usize)?;
        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class constant for the caught type, `0` catches everything
    pub catch_type: u16,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        self.catch_type.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for ExceptionHandler {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(ExceptionHandler {
            start_pc: u16::deserialize(reader)?,
            end_pc: u16::deserialize(reader)?,
            handler_pc: u16::deserialize(reader)?,
            catch_type: u16::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for StackMapTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(StackMapTable)
    }
}

/// Serializable verification type: classes by constant, uninitialized values by code offset
pub type SerializableType = VerificationType<ClassConstantIndex, u16>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Frame has the same locals as the previous frame and number of stack items is zero
    /// Tags: 0-63 or 251
    SameLocalsNoStack { offset_delta: u16 },

    /// Frame has the same locals as the previous frame and number of stack items is one
    /// Tags: 64-127 or 247
    SameLocalsOneStack {
        offset_delta: u16,
        stack: SerializableType,
    },

    /// Frame is like the previous frame, but without the last `chopped_k` locals
    ///
    /// Note: `chopped_k` must be in the range 1 to 3 inclusive
    /// Tags: 248-250
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Frame is like the previous frame, but with extra locals
    /// Tags: 252-254
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<SerializableType>,
    },

    /// Frame has exactly the locals and stack specified
    /// Tag: 255
    Full {
        offset_delta: u16,
        locals: Vec<SerializableType>,
        stack: Vec<SerializableType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            // `same_frame` and `same_frame_extended`
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }

            // `same_locals_1_stack_item_frame` and `same_locals_1_stack_item_frame_extended`
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }

            // `chop_frame`
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }

            // `append_frame`
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                (251 + locals.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }

            // `full_frame`
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for StackMapFrame {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let frame = match u8::deserialize(reader)? {
            tag @ 0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            tag @ 64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: (tag - 64) as u16,
                stack: SerializableType::deserialize(reader)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: u16::deserialize(reader)?,
                stack: SerializableType::deserialize(reader)?,
            },
            tag @ 248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: u16::deserialize(reader)?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: u16::deserialize(reader)?,
            },
            tag @ 252..=254 => {
                let offset_delta = u16::deserialize(reader)?;
                let mut locals = vec![];
                for _ in 0..(tag - 251) {
                    locals.push(SerializableType::deserialize(reader)?);
                }
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            255 => StackMapFrame::Full {
                offset_delta: u16::deserialize(reader)?,
                locals: Vec::deserialize(reader)?,
                stack: Vec::deserialize(reader)?,
            },
            tag => {
                return Err(Error::MalformedClass(MalformedKind::BadAttribute {
                    name: StackMapTable::NAME.to_owned(),
                    reason: format!("reserved frame type {}", tag),
                }))
            }
        };
        Ok(frame)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for LineNumberTable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(LineNumberTable)
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)
    }
}

impl Deserialize for LineNumber {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LineNumber {
            start_pc: u16::deserialize(reader)?,
            line_number: u16::deserialize(reader)?,
        })
    }
}

/// Entry of both `LocalVariableTable` and `LocalVariableTypeTable` (where `descriptor` is really
/// a generic signature)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub index: u16,
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.index.serialize(writer)
    }
}

impl Deserialize for LocalVariable {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(LocalVariable {
            start_pc: u16::deserialize(reader)?,
            length: u16::deserialize(reader)?,
            name: Utf8ConstantIndex::deserialize(reader)?,
            descriptor: Utf8ConstantIndex::deserialize(reader)?,
            index: u16::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariable>);

macro_rules! local_variable_table {
    ($table:ident, $name:literal) => {
        impl AttributeLike for $table {
            const NAME: &'static str = $name;
        }

        impl Serialize for $table {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $table {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                Vec::deserialize(reader).map($table)
            }
        }
    };
}

local_variable_table!(LocalVariableTable, "LocalVariableTable");
local_variable_table!(LocalVariableTypeTable, "LocalVariableTypeTable");

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exceptions(pub Vec<ClassConstantIndex>);

impl AttributeLike for Exceptions {
    const NAME: &'static str = "Exceptions";
}

impl Serialize for Exceptions {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Exceptions {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(Exceptions)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.28
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestHost(pub ClassConstantIndex);

impl AttributeLike for NestHost {
    const NAME: &'static str = "NestHost";
}

impl Serialize for NestHost {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for NestHost {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        ClassConstantIndex::deserialize(reader).map(NestHost)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.29
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestMembers(pub Vec<ClassConstantIndex>);

impl AttributeLike for NestMembers {
    const NAME: &'static str = "NestMembers";
}

impl Serialize for NestMembers {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for NestMembers {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(NestMembers)
    }
}

/// Every inner class referenced in a class' constant pool must be included in the inner classes
/// attribute on the class.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClasses(pub Vec<InnerClass>);

impl AttributeLike for InnerClasses {
    const NAME: &'static str = "InnerClasses";
}

impl Serialize for InnerClasses {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for InnerClasses {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(InnerClasses)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class: ClassConstantIndex,

    /// `0` for local and anonymous classes
    pub outer_class: u16,

    /// `0` for anonymous classes
    pub inner_name: u16,
    pub access_flags: InnerClassAccessFlags,
}

impl Serialize for InnerClass {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.inner_class.serialize(writer)?;
        self.outer_class.serialize(writer)?;
        self.inner_name.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for InnerClass {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(InnerClass {
            inner_class: ClassConstantIndex::deserialize(reader)?,
            outer_class: u16::deserialize(reader)?,
            inner_name: u16::deserialize(reader)?,
            access_flags: InnerClassAccessFlags::deserialize(reader)?,
        })
    }
}

/// Generic signature of a class, field, or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signature: Utf8ConstantIndex,
}

impl AttributeLike for Signature {
    const NAME: &'static str = "Signature";
}

impl Serialize for Signature {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.signature.serialize(writer)
    }
}

impl Deserialize for Signature {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(Signature {
            signature: Utf8ConstantIndex::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantValue(pub ConstantIndex);

impl AttributeLike for ConstantValue {
    const NAME: &'static str = "ConstantValue";
}

impl Serialize for ConstantValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantValue {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        ConstantIndex::deserialize(reader).map(ConstantValue)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.23
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethods(pub Vec<BootstrapMethod>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// `MethodHandle` constant
    pub method: ConstantIndex,

    /// Loadable constants passed as static arguments
    pub arguments: Vec<ConstantIndex>,
}

impl AttributeLike for BootstrapMethods {
    const NAME: &'static str = "BootstrapMethods";
}

impl Serialize for BootstrapMethods {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for BootstrapMethods {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(BootstrapMethods)
    }
}

impl Serialize for BootstrapMethod {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.method.serialize(writer)?;
        self.arguments.serialize(writer)
    }
}

impl Deserialize for BootstrapMethod {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(BootstrapMethod {
            method: ConstantIndex::deserialize(reader)?,
            arguments: Vec::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.30
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(pub Vec<RecordComponent>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordComponent {
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl AttributeLike for Record {
    const NAME: &'static str = "Record";
}

impl Serialize for Record {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for Record {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Vec::deserialize(reader).map(Record)
    }
}

impl Serialize for RecordComponent {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

impl Deserialize for RecordComponent {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        Ok(RecordComponent {
            name: Utf8ConstantIndex::deserialize(reader)?,
            descriptor: Utf8ConstantIndex::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.16
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Field descriptor of the annotation interface
    pub type_descriptor: Utf8ConstantIndex,
    pub elements: Vec<(Utf8ConstantIndex, ElementValue)>,
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.16.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    /// Primitive or string constant, with the tag saying which (`B`, `C`, `D`, ..., `s`)
    Constant { tag: u8, value: ConstantIndex },

    /// Enum constant: the field descriptor of the enum and the name of the constant
    Enum {
        type_descriptor: Utf8ConstantIndex,
        name: Utf8ConstantIndex,
    },

    /// Class literal, as a return descriptor (so `V` is possible)
    Class(Utf8ConstantIndex),

    Annotation(Annotation),

    Array(Vec<ElementValue>),
}

impl Serialize for Annotation {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.type_descriptor.serialize(writer)?;
        (self.elements.len() as u16).serialize(writer)?;
        for (name, value) in &self.elements {
            name.serialize(writer)?;
            value.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for Annotation {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let type_descriptor = Utf8ConstantIndex::deserialize(reader)?;
        let len = u16::deserialize(reader)?;
        let mut elements = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let name = Utf8ConstantIndex::deserialize(reader)?;
            elements.push((name, ElementValue::deserialize(reader)?));
        }
        Ok(Annotation {
            type_descriptor,
            elements,
        })
    }
}

impl Serialize for ElementValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            ElementValue::Constant { tag, value } => {
                tag.serialize(writer)?;
                value.serialize(writer)
            }
            ElementValue::Enum {
                type_descriptor,
                name,
            } => {
                b'e'.serialize(writer)?;
                type_descriptor.serialize(writer)?;
                name.serialize(writer)
            }
            ElementValue::Class(descriptor) => {
                b'c'.serialize(writer)?;
                descriptor.serialize(writer)
            }
            ElementValue::Annotation(annotation) => {
                b'@'.serialize(writer)?;
                annotation.serialize(writer)
            }
            ElementValue::Array(values) => {
                b'['.serialize(writer)?;
                values.serialize(writer)
            }
        }
    }
}

impl Deserialize for ElementValue {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let value = match u8::deserialize(reader)? {
            tag @ (b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's') => {
                ElementValue::Constant {
                    tag,
                    value: ConstantIndex::deserialize(reader)?,
                }
            }
            b'e' => ElementValue::Enum {
                type_descriptor: Utf8ConstantIndex::deserialize(reader)?,
                name: Utf8ConstantIndex::deserialize(reader)?,
            },
            b'c' => ElementValue::Class(Utf8ConstantIndex::deserialize(reader)?),
            b'@' => ElementValue::Annotation(Annotation::deserialize(reader)?),
            b'[' => ElementValue::Array(Vec::deserialize(reader)?),
            tag => {
                return Err(Error::MalformedClass(MalformedKind::BadAttribute {
                    name: String::from("annotation"),
                    reason: format!("unknown element value tag {}", tag),
                }))
            }
        };
        Ok(value)
    }
}

/// Annotation on some use of a type, along with where that use is
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.20
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    pub target_type: u8,

    /// Raw `target_info`, whose layout depends on `target_type`
    pub target_info: Vec<u8>,

    /// Raw `type_path` entries (kind and argument index)
    pub type_path: Vec<(u8, u8)>,
    pub annotation: Annotation,
}

impl Serialize for TypeAnnotation {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.target_type.serialize(writer)?;
        writer.write_all(&self.target_info)?;
        (self.type_path.len() as u8).serialize(writer)?;
        for (kind, argument) in &self.type_path {
            kind.serialize(writer)?;
            argument.serialize(writer)?;
        }
        self.annotation.serialize(writer)
    }
}

impl Deserialize for TypeAnnotation {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let target_type = u8::deserialize(reader)?;
        let target_info = match target_type {
            0x00 | 0x01 | 0x16 => read_bytes(reader, 1)?,
            0x10 | 0x11 | 0x12 | 0x17 | 0x42..=0x46 => read_bytes(reader, 2)?,
            0x13..=0x15 => vec![],
            0x40 | 0x41 => {
                let table_length = u16::deserialize(reader)?;
                let mut info = table_length.to_be_bytes().to_vec();
                info.extend(read_bytes(reader, table_length as usize * 6)?);
                info
            }
            0x47..=0x4B => read_bytes(reader, 3)?,
            other => {
                return Err(Error::MalformedClass(MalformedKind::BadAttribute {
                    name: String::from("type annotation"),
                    reason: format!("unknown target type 0x{:02x}", other),
                }))
            }
        };
        let path_length = u8::deserialize(reader)?;
        let mut type_path = Vec::with_capacity(path_length as usize);
        for _ in 0..path_length {
            type_path.push((u8::deserialize(reader)?, u8::deserialize(reader)?));
        }
        Ok(TypeAnnotation {
            target_type,
            target_info,
            type_path,
            annotation: Annotation::deserialize(reader)?,
        })
    }
}

/// Annotations on each parameter of a method (the count is a `u8`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAnnotations(pub Vec<Vec<Annotation>>);

impl Serialize for ParameterAnnotations {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.0.len() as u8).serialize(writer)?;
        for annotations in &self.0 {
            annotations.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ParameterAnnotations {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u8::deserialize(reader)?;
        let mut parameters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parameters.push(Vec::deserialize(reader)?);
        }
        Ok(ParameterAnnotations(parameters))
    }
}

macro_rules! annotations_attribute {
    ($attribute:ident, $content:ty, $name:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $attribute(pub $content);

        impl AttributeLike for $attribute {
            const NAME: &'static str = $name;
        }

        impl Serialize for $attribute {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $attribute {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                <$content>::deserialize(reader).map($attribute)
            }
        }
    };
}

annotations_attribute!(RuntimeVisibleAnnotations, Vec<Annotation>, "RuntimeVisibleAnnotations");
annotations_attribute!(RuntimeInvisibleAnnotations, Vec<Annotation>, "RuntimeInvisibleAnnotations");
annotations_attribute!(
    RuntimeVisibleParameterAnnotations,
    ParameterAnnotations,
    "RuntimeVisibleParameterAnnotations"
);
annotations_attribute!(
    RuntimeInvisibleParameterAnnotations,
    ParameterAnnotations,
    "RuntimeInvisibleParameterAnnotations"
);
annotations_attribute!(
    RuntimeVisibleTypeAnnotations,
    Vec<TypeAnnotation>,
    "RuntimeVisibleTypeAnnotations"
);
annotations_attribute!(
    RuntimeInvisibleTypeAnnotations,
    Vec<TypeAnnotation>,
    "RuntimeInvisibleTypeAnnotations"
);

/// Every annotation in the attributes, including annotations nested in element values
///
/// Covers declaration, parameter, and type annotations, both visible and invisible.
pub fn annotations(attributes: &[Attribute], pool: &ConstantPool) -> Result<Vec<Annotation>, Error> {
    let mut found = vec![];
    for attribute in attributes {
        match attribute.name(pool)? {
            RuntimeVisibleAnnotations::NAME => {
                found.extend(attribute.decode::<RuntimeVisibleAnnotations>()?.0)
            }
            RuntimeInvisibleAnnotations::NAME => {
                found.extend(attribute.decode::<RuntimeInvisibleAnnotations>()?.0)
            }
            RuntimeVisibleParameterAnnotations::NAME => {
                let ParameterAnnotations(parameters) =
                    attribute.decode::<RuntimeVisibleParameterAnnotations>()?.0;
                found.extend(parameters.into_iter().flatten())
            }
            RuntimeInvisibleParameterAnnotations::NAME => {
                let ParameterAnnotations(parameters) =
                    attribute.decode::<RuntimeInvisibleParameterAnnotations>()?.0;
                found.extend(parameters.into_iter().flatten())
            }
            RuntimeVisibleTypeAnnotations::NAME => found.extend(
                attribute
                    .decode::<RuntimeVisibleTypeAnnotations>()?
                    .0
                    .into_iter()
                    .map(|annotation| annotation.annotation),
            ),
            RuntimeInvisibleTypeAnnotations::NAME => found.extend(
                attribute
                    .decode::<RuntimeInvisibleTypeAnnotations>()?
                    .0
                    .into_iter()
                    .map(|annotation| annotation.annotation),
            ),
            _ => (),
        }
    }

    // Nested annotations count as well
    let mut index = 0;
    while index < found.len() {
        let mut nested = vec![];
        for (_, value) in &found[index].elements {
            value.nested_annotations(&mut nested);
        }
        found.extend(nested);
        index += 1;
    }
    Ok(found)
}

impl ElementValue {
    fn nested_annotations(&self, nested: &mut Vec<Annotation>) {
        match self {
            ElementValue::Annotation(annotation) => nested.push(annotation.clone()),
            ElementValue::Array(values) => {
                for value in values {
                    value.nested_annotations(nested);
                }
            }
            _ => (),
        }
    }
}
