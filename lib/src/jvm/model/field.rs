use crate::jvm::class_file::Attribute;
use crate::jvm::{BinaryName, FieldAccessFlags, FieldType, UnqualifiedName};

/// In-memory representation of a field
#[derive(Debug, Clone)]
pub struct FieldModel {
    pub access_flags: FieldAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,

    /// Raw attributes (`ConstantValue`, `Signature`, annotations, ...)
    pub attributes: Vec<Attribute>,
}

impl FieldModel {
    pub fn new(
        access_flags: FieldAccessFlags,
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    ) -> FieldModel {
        FieldModel {
            access_flags,
            name,
            descriptor,
            attributes: vec![],
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}
