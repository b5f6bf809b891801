use crate::jvm::class_file::Attribute;
use crate::jvm::model::Code;
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, RenderDescriptor, UnqualifiedName};

/// In-memory representation of a method
#[derive(Debug, Clone)]
pub struct MethodModel {
    pub access_flags: MethodAccessFlags,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,

    /// Raw attributes, other than `Code`
    pub attributes: Vec<Attribute>,

    /// Method body (must be `None` exactly when the method is abstract or native)
    pub code: Option<Code>,
}

impl MethodModel {
    /// Create a new method, without any code
    pub fn new(
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> MethodModel {
        MethodModel {
            access_flags,
            name,
            descriptor,
            attributes: vec![],
            code: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Abstract and native methods are the ones without code
    pub fn is_abstract_or_native(&self) -> bool {
        self.access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
    }

    /// Does the method have this name and descriptor?
    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name.as_ref() == name && self.descriptor.render() == descriptor
    }

    /// Name followed by descriptor, as used in error messages (eg. `add(II)I`)
    pub fn member_name(&self) -> String {
        format!("{}{}", self.name, self.descriptor.render())
    }
}
