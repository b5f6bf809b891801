use super::{signature_classes, ClassOrganizeMap, Error, PackageId};
use crate::jvm::class_file::{
    annotations, Annotation, Attribute, AttributeLike, BootstrapMethod, BootstrapMethods, Constant,
    ConstantIndex, ConstantPool, ElementValue, Exceptions, InnerClasses, Record, Signature,
};
use crate::jvm::code::Instruction;
use crate::jvm::model::{ClassModel, Code};
use crate::jvm::{
    loader, BinaryName, ClassAccessFlags, FieldType, MalformedKind, MethodDescriptor, Name,
    ParseDescriptor, RefType, RenderDescriptor, Visibility,
};
use crate::transform::engine::class_files;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Visibility of the fields and methods of one class, keyed by name and descriptor
type MemberVisibilities = HashMap<(String, String), Visibility>;

/// Group classes that have to share a package
///
/// The resulting map is compacted. Each class starts out in a package of its own, in the order
/// the classes are given.
pub fn organize(classes: &[ClassModel]) -> Result<ClassOrganizeMap, Error> {
    let mut map = ClassOrganizeMap::new();
    for class in classes {
        map.add_class(class.name.as_str());
    }

    let by_name: HashMap<&str, &ClassModel> = classes
        .iter()
        .map(|class| (class.name.as_str(), class))
        .collect();
    let members: HashMap<&str, MemberVisibilities> = classes
        .par_iter()
        .map(|class| (class.name.as_str(), member_visibilities(class)))
        .collect();

    for class in classes {
        let this_package = match map.get_package(class.name.as_str()) {
            Some(package) => package,
            None => continue,
        };
        let bootstrap_methods = match Attribute::find(&class.attributes, &class.constants)? {
            Some(BootstrapMethods(methods)) => methods,
            None => vec![],
        };
        let mut checker = Checker {
            class,
            this_package,
            classes: &by_name,
            members: &members,
            map: &mut map,
            bootstrap_methods,
            checked_bootstraps: HashSet::new(),
        };
        checker.check_class_model()?;
    }

    info!(
        "Organized {} classes into {} package(s)",
        map.class_count(),
        map.package_count()
    );
    Ok(map.compacted())
}

/// Load every class file under a directory, then [`organize`] them
pub fn organize_directory(root: &Path) -> Result<ClassOrganizeMap, Error> {
    let mut paths = class_files(root);
    paths.sort();
    let classes = paths
        .par_iter()
        .map(|path| {
            let bytes = fs::read(path).map_err(|err| Error::Io {
                path: path.clone(),
                source: err,
            })?;
            Ok(loader::load(&bytes)?)
        })
        .collect::<Result<Vec<ClassModel>, Error>>()?;
    debug!("Loaded {} classes from '{}'", classes.len(), root.display());
    organize(&classes)
}

fn member_visibilities(class: &ClassModel) -> MemberVisibilities {
    let fields = class.fields.iter().map(|field| {
        (
            (field.name.to_string(), field.descriptor.render()),
            field.access_flags.visibility(),
        )
    });
    let methods = class.methods.iter().map(|method| {
        (
            (method.name.to_string(), method.descriptor.render()),
            method.access_flags.visibility(),
        )
    });
    fields.chain(methods).collect()
}

/// Walks over one class, merging its package with the packages it depends on
struct Checker<'a> {
    class: &'a ClassModel,
    this_package: PackageId,
    classes: &'a HashMap<&'a str, &'a ClassModel>,
    members: &'a HashMap<&'a str, MemberVisibilities>,
    map: &'a mut ClassOrganizeMap,
    bootstrap_methods: Vec<BootstrapMethod>,

    /// Bootstrap methods already looked at (arguments may themselves be dynamic constants)
    checked_bootstraps: HashSet<u16>,
}

impl<'a> Checker<'a> {
    fn merge_with(&mut self, other_package: PackageId) -> Result<(), Error> {
        debug!(
            "{} pulls package {} into package {}",
            self.class.name, other_package, self.this_package
        );
        self.map.merge_package_ids(self.this_package, other_package)
    }

    /// Check a use of another class
    ///
    /// Returns `true` if there is nothing left to check about members of that class: it is this
    /// class, it is outside the analyzed set, or it is already in the same package.
    fn check_class(&mut self, other: &str) -> Result<bool, Error> {
        if other == self.class.name.as_str() {
            return Ok(true);
        }
        let other_package = match self.map.get_package(other) {
            Some(package) if package != self.this_package => package,
            _ => return Ok(true),
        };
        let is_public = self
            .classes
            .get(other)
            .map_or(true, |class| class.access_flags.contains(ClassAccessFlags::PUBLIC));
        if !is_public {
            self.merge_with(other_package)?;
        }
        Ok(false)
    }

    /// Check a class constant, which may also name an array type
    fn check_class_name(&mut self, name: &str) -> Result<(), Error> {
        if name.starts_with('[') {
            self.check_ref_type(&RefType::from_class_name(name)?)
        } else {
            self.check_class(name).map(|_| ())
        }
    }

    fn check_ref_type(&mut self, ref_type: &RefType<BinaryName>) -> Result<(), Error> {
        match ref_type {
            RefType::Object(name) => self.check_class(name.as_str()).map(|_| ()),
            RefType::ObjectArray(array) => self.check_class(array.element_type.as_str()).map(|_| ()),
            RefType::PrimitiveArray(_) => Ok(()),
        }
    }

    fn check_field_type(&mut self, field_type: &FieldType<BinaryName>) -> Result<(), Error> {
        match field_type {
            FieldType::Base(_) => Ok(()),
            FieldType::Ref(ref_type) => self.check_ref_type(ref_type),
        }
    }

    fn check_method_descriptor(&mut self, descriptor: &MethodDescriptor<BinaryName>) -> Result<(), Error> {
        for parameter in &descriptor.parameters {
            self.check_field_type(parameter)?;
        }
        if let Some(return_type) = &descriptor.return_type {
            self.check_field_type(return_type)?;
        }
        Ok(())
    }

    fn check_signature(&mut self, attributes: &[Attribute]) -> Result<(), Error> {
        let class = self.class;
        let constants = &class.constants;
        if let Some(signature) = Attribute::find::<Signature>(attributes, constants)? {
            for class in signature_classes(constants.utf8(signature.signature)?) {
                self.check_class(&class)?;
            }
        }
        Ok(())
    }

    /// Check annotation types, enum constants, and class literals used in annotations
    fn check_annotations(&mut self, attributes: &[Attribute]) -> Result<(), Error> {
        let class = self.class;
        let constants = &class.constants;
        for annotation in annotations(attributes, constants)? {
            self.check_annotation(constants, &annotation)?;
        }
        Ok(())
    }

    fn check_annotation(&mut self, constants: &ConstantPool, annotation: &Annotation) -> Result<(), Error> {
        let descriptor = constants.utf8(annotation.type_descriptor)?;
        self.check_field_type(&FieldType::<BinaryName>::parse(descriptor)?)?;
        for (_, value) in &annotation.elements {
            self.check_element_value(constants, value)?;
        }
        Ok(())
    }

    /// Nested annotations are left out, [`annotations`] already lists them
    fn check_element_value(&mut self, constants: &ConstantPool, value: &ElementValue) -> Result<(), Error> {
        match value {
            ElementValue::Enum {
                type_descriptor,
                name,
            } => {
                let descriptor = constants.utf8(*type_descriptor)?;
                match FieldType::<BinaryName>::parse(descriptor)? {
                    FieldType::Ref(RefType::Object(owner)) => {
                        self.check_member(owner.as_str(), constants.utf8(*name)?, descriptor)
                    }
                    other => self.check_field_type(&other),
                }
            }
            ElementValue::Class(descriptor) => match constants.utf8(*descriptor)? {
                "V" => Ok(()),
                descriptor => self.check_field_type(&FieldType::<BinaryName>::parse(descriptor)?),
            },
            ElementValue::Array(values) => {
                for value in values {
                    self.check_element_value(constants, value)?;
                }
                Ok(())
            }
            ElementValue::Constant { .. } | ElementValue::Annotation(_) => Ok(()),
        }
    }

    /// Check the method handle and static arguments of a bootstrap method
    fn check_bootstrap(&mut self, index: u16) -> Result<(), Error> {
        if !self.checked_bootstraps.insert(index) {
            return Ok(());
        }
        let bootstrap = match self.bootstrap_methods.get(index as usize) {
            Some(bootstrap) => bootstrap.clone(),
            None => {
                return Err(MalformedKind::BadAttribute {
                    name: BootstrapMethods::NAME.to_owned(),
                    reason: format!("no bootstrap method {}", index),
                }
                .into())
            }
        };
        self.check_constant(bootstrap.method)?;
        for argument in bootstrap.arguments {
            self.check_constant(argument)?;
        }
        Ok(())
    }

    /// Check a use of a field or method
    fn check_member(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<(), Error> {
        if owner.starts_with('[') || self.check_class(owner)? {
            return Ok(());
        }
        let visibility = match self
            .members
            .get(owner)
            .and_then(|members| members.get(&(name.to_owned(), descriptor.to_owned())))
        {
            Some(visibility) => *visibility,
            None => {
                debug!("{}: {}.{}{} is not declared there", self.class.name, owner, name, descriptor);
                return Ok(());
            }
        };
        let other_package = match self.map.get_package(owner) {
            Some(package) => package,
            None => return Ok(()),
        };
        match visibility {
            Visibility::Package => self.merge_with(other_package),
            Visibility::Protected if !self.inherits_from(owner) => self.merge_with(other_package),
            _ => Ok(()),
        }
    }

    /// Is `owner` a superclass of this class (or might it be, through classes we can't see)?
    fn inherits_from(&self, owner: &str) -> bool {
        let mut superclass = self.class.superclass.as_ref();
        let mut steps = 0;
        while let Some(name) = superclass {
            if name.as_str() == owner {
                return true;
            }
            match self.classes.get(name.as_str()) {
                Some(class) if steps <= self.classes.len() => superclass = class.superclass.as_ref(),
                None if *name == BinaryName::OBJECT => return false,
                _ => return true,
            }
            steps += 1;
        }
        false
    }

    fn check_constant(&mut self, index: ConstantIndex) -> Result<(), Error> {
        let class = self.class;
        let constants = &class.constants;
        match constants.get(index) {
            Some(Constant::Class(_)) => {
                let name = constants.class_name(constants.check_class(index.0)?)?;
                self.check_class_name(name)
            }
            Some(Constant::MethodType { descriptor }) => {
                let descriptor = MethodDescriptor::<BinaryName>::parse(constants.utf8(*descriptor)?)?;
                self.check_method_descriptor(&descriptor)
            }
            Some(Constant::MethodHandle {
                handle_kind,
                member,
            }) => {
                let member = if handle_kind.is_field_access() {
                    constants.field_ref(constants.check_field_ref(member.0)?)?
                } else {
                    constants.method_ref(constants.check_method_ref(member.0)?)?
                };
                self.check_member(member.class, member.name, member.descriptor)
            }
            Some(Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }) => {
                let (_, descriptor) = constants.name_and_type(*name_and_type)?;
                self.check_field_type(&FieldType::<BinaryName>::parse(descriptor)?)?;
                self.check_bootstrap(*bootstrap_method)
            }
            _ => Ok(()),
        }
    }

    fn check_class_model(&mut self) -> Result<(), Error> {
        let class = self.class;
        let constants = &class.constants;

        self.check_signature(&class.attributes)?;
        self.check_annotations(&class.attributes)?;
        if let Some(superclass) = &class.superclass {
            self.check_class(superclass.as_str())?;
        }
        for interface in &class.interfaces {
            self.check_class(interface.as_str())?;
        }
        if let Some(InnerClasses(inner_classes)) = Attribute::find(&class.attributes, constants)? {
            for inner_class in inner_classes {
                self.check_class_name(constants.class_name(inner_class.inner_class)?)?;
                if let Some(outer_class) = constants.check_optional_class(inner_class.outer_class)? {
                    self.check_class_name(constants.class_name(outer_class)?)?;
                }
            }
        }

        if let Some(Record(components)) = Attribute::find(&class.attributes, constants)? {
            for component in components {
                let descriptor = constants.utf8(component.descriptor)?;
                self.check_field_type(&FieldType::<BinaryName>::parse(descriptor)?)?;
                self.check_signature(&component.attributes)?;
                self.check_annotations(&component.attributes)?;
            }
        }

        for field in &class.fields {
            self.check_field_type(&field.descriptor)?;
            self.check_signature(&field.attributes)?;
            self.check_annotations(&field.attributes)?;
        }

        for method in &class.methods {
            self.check_method_descriptor(&method.descriptor)?;
            self.check_signature(&method.attributes)?;
            self.check_annotations(&method.attributes)?;
            if let Some(Exceptions(exceptions)) = Attribute::find(&method.attributes, constants)? {
                for exception in exceptions {
                    self.check_class_name(constants.class_name(exception)?)?;
                }
            }
            if let Some(code) = &method.code {
                self.check_code(constants, code)?;
            }
        }
        Ok(())
    }

    fn check_code(&mut self, constants: &ConstantPool, code: &Code) -> Result<(), Error> {
        for insn in code.instructions() {
            match insn {
                Instruction::GetStatic(field)
                | Instruction::PutStatic(field)
                | Instruction::GetField(field)
                | Instruction::PutField(field) => {
                    let member = constants.field_ref(*field)?;
                    self.check_member(member.class, member.name, member.descriptor)?;
                }
                Instruction::Invoke(_, method) => {
                    let member = constants.method_ref(*method)?;
                    self.check_member(member.class, member.name, member.descriptor)?;
                }
                Instruction::InvokeDynamic(call_site) => {
                    let (_, descriptor) = constants.invoke_dynamic(*call_site)?;
                    self.check_method_descriptor(&MethodDescriptor::<BinaryName>::parse(descriptor)?)?;
                    if let Some(Constant::InvokeDynamic {
                        bootstrap_method, ..
                    }) = constants.get(ConstantIndex::from(*call_site))
                    {
                        self.check_bootstrap(*bootstrap_method)?;
                    }
                }
                Instruction::Ldc(constant) | Instruction::Ldc2(constant) => {
                    self.check_constant(*constant)?;
                }
                Instruction::New(class)
                | Instruction::ANewArray(class)
                | Instruction::CheckCast(class)
                | Instruction::InstanceOf(class)
                | Instruction::MultiANewArray(class, _) => {
                    self.check_class_name(constants.class_name(*class)?)?;
                }
                _ => (),
            }
        }

        for range in code.exception_ranges() {
            if let Some(catch_type) = range.catch_type {
                self.check_class_name(constants.class_name(catch_type)?)?;
            }
        }
        for variable in code.local_variables() {
            self.check_field_type(&FieldType::<BinaryName>::parse(constants.utf8(variable.descriptor)?)?)?;
        }
        for variable in code.local_variable_types() {
            for class in signature_classes(constants.utf8(variable.descriptor)?) {
                self.check_class(&class)?;
            }
        }

        // Type annotations on instructions, local variables, and handlers
        self.check_annotations(code.other_attributes())?;
        Ok(())
    }
}
