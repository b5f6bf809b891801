use crate::jvm::binary_format::{read_bytes, Deserialize, Serialize};
use crate::jvm::class_file::{Attribute, AttributeLike};
use crate::jvm::{BinaryName, Error, MalformedKind, RefType};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;

type Lookup<T> = Result<T, MalformedKind>;

/// Class file constants pool
///
/// The pool keeps the exact order it was loaded with and is append only: looking up a constant
/// that is already present returns the existing index, anything else is pushed at the end. This
/// keeps indices used by untouched attributes valid and keeps output diffs small.
#[derive(Clone)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    field_refs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    method_refs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
}

/// Symbolic reference to a field or a method, resolved to strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            field_refs: HashMap::new(),
            method_refs: HashMap::new(),
            method_types: HashMap::new(),
        }
    }

    /// Number of slots used, including the unusable slots after `long` and `double` entries
    pub fn slot_count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Number of constants
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    /// Look up any constant
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        if index.0 == 0 {
            return None;
        }
        self.constants.get_offset(Offset(index.0 as usize)).ok()
    }

    /// Record a constant in the deduplication maps (first occurrence wins)
    fn remember(&mut self, index: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Utf8(string) => {
                self.utf8s.entry(string.clone()).or_insert(Utf8ConstantIndex(index));
            }
            Constant::Class(name) => {
                self.classes.entry(*name).or_insert(ClassConstantIndex(index));
            }
            Constant::String(utf8) => {
                self.strings.entry(*utf8).or_insert(StringConstantIndex(index));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(index);
            }
            Constant::Float(float) => {
                self.floats.entry(float.to_bits()).or_insert(index);
            }
            Constant::Long(long) => {
                self.longs.entry(*long).or_insert(index);
            }
            Constant::Double(double) => {
                self.doubles.entry(double.to_bits()).or_insert(index);
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(index));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.field_refs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(index));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.method_refs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(index));
            }
            Constant::MethodType { descriptor } => {
                self.method_types.entry(*descriptor).or_insert(index);
            }
            _ => (),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let offset: u16 = self.slot_count();

        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(ConstantPoolOverflow { constant, offset });
        }

        let index = ConstantIndex(offset);
        self.remember(index, &constant);
        self.constants.push(constant);
        Ok(index)
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();
        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let constant = Constant::Utf8(cow.into_owned());
            self.push_constant(constant).map(Utf8ConstantIndex)
        }
    }

    /// Get or insert a class constant (the name may also be an array descriptor)
    pub fn get_class<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        name: S,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            self.push_constant(Constant::Class(name))
                .map(ClassConstantIndex)
        }
    }

    /// Get or insert the class constant for a reference type
    pub fn get_class_ref(
        &mut self,
        ref_type: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        self.get_class(ref_type.class_name())
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        string: S,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            self.push_constant(Constant::String(utf8))
                .map(StringConstantIndex)
        }
    }

    /// Get or insert an integer constant
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.integers.get(&integer) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Integer(integer)),
        }
    }

    /// Get or insert a long constant
    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.longs.get(&long) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Long(long)),
        }
    }

    /// Get or insert a float constant (compared bitwise)
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.floats.get(&float.to_bits()) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Float(float)),
        }
    }

    /// Get or insert a double constant (compared bitwise)
    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        match self.doubles.get(&double.to_bits()) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::Double(double)),
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        if let Some(idx) = self.name_and_types.get(&(name, descriptor)) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            self.push_constant(constant).map(NameAndTypeConstantIndex)
        }
    }

    /// Get or insert a field reference
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        if let Some(idx) = self.field_refs.get(&(class, name_and_type)) {
            Ok(*idx)
        } else {
            self.push_constant(Constant::FieldRef(class, name_and_type))
                .map(FieldRefConstantIndex)
        }
    }

    /// Get or insert a method reference (`Methodref` or `InterfaceMethodref`)
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        if let Some(idx) = self.method_refs.get(&(class, name_and_type, is_interface)) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            self.push_constant(constant).map(MethodRefConstantIndex)
        }
    }

    /// Get or insert a method type constant
    pub fn get_method_type(
        &mut self,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let descriptor = self.get_utf8(descriptor)?;
        match self.method_types.get(&descriptor) {
            Some(idx) => Ok(*idx),
            None => self.push_constant(Constant::MethodType { descriptor }),
        }
    }

    /// Get or insert a method handle (`member` is a field or method reference, as the kind needs)
    pub fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        self.get_uncached(Constant::MethodHandle {
            handle_kind,
            member,
        })
    }

    /// Get or insert a dynamically-computed call site
    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<InvokeDynamicConstantIndex, ConstantPoolOverflow> {
        let method_descriptor = self.get_name_and_type(name, descriptor)?;
        self.get_uncached(Constant::InvokeDynamic {
            bootstrap_method,
            method_descriptor,
        })
        .map(InvokeDynamicConstantIndex)
    }

    /// Get or insert a dynamically-computed constant
    pub fn get_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        self.get_uncached(Constant::Dynamic {
            bootstrap_method,
            name_and_type,
        })
    }

    /// Look for an equal constant by scanning the pool (for kinds that are rare enough to not
    /// deserve a lookup table)
    fn get_uncached(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let existing = self
            .iter()
            .find(|(_, existing)| **existing == constant)
            .map(|(index, _)| index);
        match existing {
            Some(index) => Ok(index),
            None => self.push_constant(constant),
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Check that a raw index points to a constant of the expected kind
    fn expect(
        &self,
        raw: u16,
        expected: &'static str,
        is_expected: impl Fn(&Constant) -> bool,
    ) -> Lookup<ConstantIndex> {
        match self.get(ConstantIndex(raw)) {
            Some(constant) if is_expected(constant) => Ok(ConstantIndex(raw)),
            _ => Err(MalformedKind::BadConstantReference {
                index: raw,
                expected,
            }),
        }
    }

    pub fn check_utf8(&self, raw: u16) -> Lookup<Utf8ConstantIndex> {
        self.expect(raw, "Utf8", |c| matches!(c, Constant::Utf8(_)))
            .map(Utf8ConstantIndex)
    }

    pub fn check_class(&self, raw: u16) -> Lookup<ClassConstantIndex> {
        self.expect(raw, "Class", |c| matches!(c, Constant::Class(_)))
            .map(ClassConstantIndex)
    }

    /// Like [`ConstantPool::check_class`], but `0` means "no class"
    pub fn check_optional_class(&self, raw: u16) -> Lookup<Option<ClassConstantIndex>> {
        if raw == 0 {
            Ok(None)
        } else {
            self.check_class(raw).map(Some)
        }
    }

    pub fn check_name_and_type(&self, raw: u16) -> Lookup<NameAndTypeConstantIndex> {
        self.expect(raw, "NameAndType", |c| {
            matches!(c, Constant::NameAndType { .. })
        })
        .map(NameAndTypeConstantIndex)
    }

    pub fn check_field_ref(&self, raw: u16) -> Lookup<FieldRefConstantIndex> {
        self.expect(raw, "Fieldref", |c| matches!(c, Constant::FieldRef(_, _)))
            .map(FieldRefConstantIndex)
    }

    pub fn check_method_ref(&self, raw: u16) -> Lookup<MethodRefConstantIndex> {
        self.expect(raw, "Methodref", |c| matches!(c, Constant::MethodRef { .. }))
            .map(MethodRefConstantIndex)
    }

    pub fn check_invoke_dynamic(&self, raw: u16) -> Lookup<InvokeDynamicConstantIndex> {
        self.expect(raw, "InvokeDynamic", |c| {
            matches!(c, Constant::InvokeDynamic { .. })
        })
        .map(InvokeDynamicConstantIndex)
    }

    /// Check a constant for `ldc`/`ldc_w` (`wide == false`) or `ldc2_w` (`wide == true`)
    pub fn check_loadable(&self, raw: u16, wide: bool) -> Lookup<ConstantIndex> {
        let expected = if wide { "two-slot loadable" } else { "loadable" };
        self.expect(raw, expected, |c| c.is_loadable() && (c.loaded_width(self) == Some(2)) == wide)
    }

    pub fn utf8(&self, index: Utf8ConstantIndex) -> Lookup<&str> {
        match self.get(index.0) {
            Some(Constant::Utf8(string)) => Ok(string),
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "Utf8",
            }),
        }
    }

    pub fn class_name(&self, index: ClassConstantIndex) -> Lookup<&str> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "Class",
            }),
        }
    }

    /// Class constant, interpreted as a type
    pub fn class_ref_type(&self, index: ClassConstantIndex) -> Lookup<RefType<BinaryName>> {
        RefType::from_class_name(self.class_name(index)?)
    }

    pub fn name_and_type(&self, index: NameAndTypeConstantIndex) -> Lookup<(&str, &str)> {
        match self.get(index.0) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "NameAndType",
            }),
        }
    }

    pub fn field_ref(&self, index: FieldRefConstantIndex) -> Lookup<MemberRef<'_>> {
        match self.get(index.0) {
            Some(Constant::FieldRef(class, name_and_type)) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                    is_interface: false,
                })
            }
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "Fieldref",
            }),
        }
    }

    pub fn method_ref(&self, index: MethodRefConstantIndex) -> Lookup<MemberRef<'_>> {
        match self.get(index.0) {
            Some(Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                    is_interface: *is_interface,
                })
            }
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "Methodref",
            }),
        }
    }

    /// Name and descriptor of the call site
    pub fn invoke_dynamic(&self, index: InvokeDynamicConstantIndex) -> Lookup<(&str, &str)> {
        match self.get(index.0) {
            Some(Constant::InvokeDynamic {
                method_descriptor, ..
            }) => self.name_and_type(*method_descriptor),
            _ => Err(MalformedKind::BadConstantReference {
                index: index.0 .0,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Check every cross reference inside the pool
    fn validate(&self) -> Lookup<()> {
        for (_, constant) in self.iter() {
            match constant {
                Constant::Class(utf8)
                | Constant::String(utf8)
                | Constant::Module(utf8)
                | Constant::Package(utf8)
                | Constant::MethodType { descriptor: utf8 } => {
                    self.utf8(*utf8)?;
                }
                Constant::FieldRef(class, name_and_type)
                | Constant::MethodRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    self.class_name(*class)?;
                    self.name_and_type(*name_and_type)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    self.utf8(*name)?;
                    self.utf8(*descriptor)?;
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => {
                    if handle_kind.is_field_access() {
                        self.check_field_ref(member.0)?;
                    } else {
                        self.check_method_ref(member.0)?;
                    }
                }
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic {
                    method_descriptor: name_and_type,
                    ..
                } => {
                    self.name_and_type(*name_and_type)?;
                }
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => (),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.constants.fmt(f)
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.slot_count().serialize(writer)?;
        for (_, constant) in self.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

impl Deserialize for ConstantPool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let count = u16::deserialize(reader)?;
        let mut pool = ConstantPool::new();
        while pool.slot_count() < count {
            let index = pool.slot_count();
            let constant = Constant::read_tagged(reader, index)?;
            if index as usize + constant.width() > count as usize {
                return Err(Error::MalformedClass(MalformedKind::BadConstantReference {
                    index,
                    expected: "constant that fits in the pool",
                }));
            }
            pool.push_constant(constant)?;
        }
        pool.validate()?;
        Ok(pool)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("constant pool overflow at index {offset} while adding {constant:?}")]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// `FieldRef` for field accessors, `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    /// Can this constant be pushed with `ldc`, `ldc_w`, or `ldc2_w`?
    pub fn is_loadable(&self) -> bool {
        matches!(
            self,
            Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_)
                | Constant::Class(_)
                | Constant::String(_)
                | Constant::MethodHandle { .. }
                | Constant::MethodType { .. }
                | Constant::Dynamic { .. }
        )
    }

    /// Number of stack slots taken when loaded (`None` if the constant is not loadable)
    pub fn loaded_width(&self, pool: &ConstantPool) -> Option<usize> {
        match self {
            Constant::Long(_) | Constant::Double(_) => Some(2),
            Constant::Dynamic { name_and_type, .. } => match pool.name_and_type(*name_and_type) {
                Ok((_, "J")) | Ok((_, "D")) => Some(2),
                Ok(_) => Some(1),
                Err(_) => None,
            },
            other if other.is_loadable() => Some(1),
            _ => None,
        }
    }

    /// Read a tag and the constant following it
    fn read_tagged<R: ReadBytesExt>(reader: &mut R, index: u16) -> Result<Constant, Error> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                Constant::Utf8(decode_modified_utf8(&bytes)?)
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => {
                let kind = u8::deserialize(reader)?;
                let handle_kind = HandleKind::from_byte(kind).ok_or_else(|| {
                    MalformedKind::BadConstantReference {
                        index,
                        expected: "method handle kind",
                    }
                })?;
                Constant::MethodHandle {
                    handle_kind,
                    member: ConstantIndex::deserialize(reader)?,
                }
            }
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            tag => return Err(MalformedKind::UnknownConstantTag { index, tag }.into()),
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                1u8.serialize(writer)?;
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.to_bits().serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.to_bits().serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for unit in string.encode_utf16() {
        let code = unit as u32;
        if code != 0 && code < 0x80 {
            buffer.push(code as u8);
        } else if code < 0x800 {
            buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        } else {
            buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
            buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
            buffer.push((code & 0x3F) as u8 | 0b1000_0000);
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Strings that are not valid UTF-16 once decoded (eg. unpaired surrogates) are rejected, since
/// they have no faithful `String` representation.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, MalformedKind> {
    let bad = |msg: &str| MalformedKind::BadModifiedUtf8(msg.to_owned());
    let continuation = |idx: usize| -> Result<u16, MalformedKind> {
        match bytes.get(idx) {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok((b & 0x3F) as u16),
            Some(_) => Err(bad("invalid continuation byte")),
            None => Err(bad("truncated multi-byte sequence")),
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == 0 {
            return Err(bad("embedded null byte"));
        } else if byte & 0b1000_0000 == 0 {
            units.push(byte as u16);
            i += 1;
        } else if byte & 0b1110_0000 == 0b1100_0000 {
            units.push(((byte & 0x1F) as u16) << 6 | continuation(i + 1)?);
            i += 2;
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            let high = ((byte & 0x0F) as u16) << 12;
            units.push(high | continuation(i + 1)? << 6 | continuation(i + 2)?);
            i += 3;
        } else {
            return Err(bad("invalid leading byte"));
        }
    }

    String::from_utf16(&units).map_err(|_| bad("unpaired surrogate"))
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct ConstantIndex(pub u16);

/// Index known to point at a `CONSTANT_Utf8_info`
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct InvokeDynamicConstantIndex(ConstantIndex);

macro_rules! typed_index {
    ($index:ident) => {
        impl From<$index> for ConstantIndex {
            fn from(index: $index) -> ConstantIndex {
                index.0
            }
        }

        impl Serialize for $index {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        /// Only checked for its kind once the whole pool is read
        impl Deserialize for $index {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
                ConstantIndex::deserialize(reader).map($index)
            }
        }
    };
}

typed_index!(Utf8ConstantIndex);
typed_index!(StringConstantIndex);
typed_index!(NameAndTypeConstantIndex);
typed_index!(ClassConstantIndex);
typed_index!(FieldRefConstantIndex);
typed_index!(MethodRefConstantIndex);
typed_index!(InvokeDynamicConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        u16::deserialize(reader).map(ConstantIndex)
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    fn from_byte(byte: u8) -> Option<HandleKind> {
        Some(match byte {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    pub fn is_field_access(&self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let text = "ĄǍǞऄअॲ";
        let bytes = encode_modified_utf8(text);
        assert_eq!(&bytes[..4], &[196, 132, 199, 141]);
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), text);
    }

    #[test]
    fn supplementary_characters() {
        let bytes = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            bytes,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "\u{10000}\u{10FFFF}");
    }

    #[test]
    fn rejects_malformed_sequences() {
        // raw null, truncated sequence, four byte form, lone high surrogate
        assert!(decode_modified_utf8(&[0]).is_err());
        assert!(decode_modified_utf8(&[0xC4]).is_err());
        assert!(decode_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]).is_err());
        assert!(decode_modified_utf8(&[237, 160, 128]).is_err());
    }
}
