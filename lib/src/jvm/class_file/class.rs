use crate::jvm::binary_format::{Deserialize, Serialize};
use crate::jvm::class_file::{Attribute, ClassConstantIndex, ConstantPool, Field, Method, Version};
use crate::jvm::{ClassAccessFlags, Error, MalformedKind};
use byteorder::WriteBytesExt;
use std::fs;
use std::path::Path;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// `0` only for `java/lang/Object` and `module-info`
    pub super_class: u16,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: u32 = 0xCAFE_BABE;

    /// Parse a class file, requiring that all of the input be consumed
    ///
    /// Versions outside of `Version::MIN_MAJOR..=max_major` are rejected before anything else is
    /// read.
    pub fn parse(bytes: &[u8], max_major: u16) -> Result<ClassFile, Error> {
        let mut reader = bytes;
        let magic = u32::deserialize(&mut reader)?;
        if magic != ClassFile::MAGIC {
            return Err(MalformedKind::BadMagic(magic).into());
        }

        let version = Version::deserialize(&mut reader)?;
        if !(Version::MIN_MAJOR..=max_major).contains(&version.major_version) {
            return Err(MalformedKind::UnsupportedVersion {
                major: version.major_version,
                minor: version.minor_version,
            }
            .into());
        }

        let constants = ConstantPool::deserialize(&mut reader)?;
        let access_flags = ClassAccessFlags::deserialize(&mut reader)?;
        let this_class = constants.check_class(u16::deserialize(&mut reader)?)?;
        let super_class = u16::deserialize(&mut reader)?;
        constants.check_optional_class(super_class)?;
        let mut interfaces = vec![];
        for _ in 0..u16::deserialize(&mut reader)? {
            interfaces.push(constants.check_class(u16::deserialize(&mut reader)?)?);
        }
        let fields = Vec::deserialize(&mut reader)?;
        let methods = Vec::deserialize(&mut reader)?;
        let attributes = Vec::deserialize(&mut reader)?;

        if !reader.is_empty() {
            return Err(MalformedKind::TrailingBytes(reader.len()).into());
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encode the class file into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Save the class file to disk
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> std::io::Result<()> {
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut class_file = fs::File::create(path)?;
        self.serialize(&mut class_file)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
