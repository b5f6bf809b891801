use crate::jvm::class_file::{Attribute, ConstantPool, Version};
use crate::jvm::model::{FieldModel, MethodModel};
use crate::jvm::{BinaryName, ClassAccessFlags};

/// In-memory representation of a class
///
/// A model is owned by one stage of a run at a time: the loader makes it, passes mutate it in
/// place, and the emitter turns it back into bytes.
#[derive(Debug, Clone)]
pub struct ClassModel {
    pub version: Version,

    /// Constant pool, in the order it was loaded (new constants only ever get appended)
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub name: BinaryName,

    /// Superclass name (`None` only for `java/lang/Object` and `module-info`)
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub fields: Vec<FieldModel>,
    pub methods: Vec<MethodModel>,

    /// Raw class attributes
    pub attributes: Vec<Attribute>,
}

/// Class-level information needed while working on one of its methods
#[derive(Debug, Clone, Copy)]
pub struct ClassContext<'a> {
    pub name: &'a BinaryName,
    pub version: Version,
    pub constants: &'a ConstantPool,
}

impl ClassModel {
    /// Create a new class with no members
    pub fn new(
        version: Version,
        access_flags: ClassAccessFlags,
        name: BinaryName,
        superclass: Option<BinaryName>,
    ) -> ClassModel {
        ClassModel {
            version,
            constants: ConstantPool::new(),
            access_flags,
            name,
            superclass,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodModel> {
        self.methods
            .iter()
            .find(|method| method.matches(name, descriptor))
    }

    pub fn find_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodModel> {
        self.methods
            .iter_mut()
            .find(|method| method.matches(name, descriptor))
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldModel> {
        self.fields
            .iter()
            .find(|field| field.name.as_ref() == name)
    }

    /// Borrow the methods mutably, alongside the class information they need
    pub fn split_methods(&mut self) -> (ClassContext<'_>, &mut [MethodModel]) {
        let ClassModel {
            version,
            constants,
            name,
            methods,
            ..
        } = self;
        let context = ClassContext {
            name,
            version: *version,
            constants,
        };
        (context, methods)
    }

    /// Class-level information, for a method that has been moved out of the class
    pub fn context(&self) -> ClassContext<'_> {
        ClassContext {
            name: &self.name,
            version: self.version,
            constants: &self.constants,
        }
    }
}
