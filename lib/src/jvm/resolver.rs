//! Answering subtyping questions about classes that may not be loaded
//!
//! Frame computation needs to know how classes relate to each other, most notably to find the
//! common superclass of two types meeting at a merge point. That information comes from a
//! [`ClassSource`], which can be backed by a directory of class files, by an in-memory map, or by
//! a chain of those. A [`SymbolResolver`] sits in front of a source and caches what it learns for
//! the duration of a run.
//!
//! Resolution is conservative: a class that cannot be found is treated as a direct subclass of
//! `java/lang/Object`. That is always a safe (if sometimes imprecise) answer for frame merging.

use crate::jvm::loader::read_hierarchy;
use crate::jvm::model::ClassModel;
use crate::jvm::{ArrayType, BinaryName, ClassAccessFlags, Error, Name, RefType};
use elsa::map::FrozenMap;
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Where a class sits in the class hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHierarchy {
    pub name: BinaryName,

    /// `None` only for `java/lang/Object`
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub access_flags: ClassAccessFlags,
}

impl ClassHierarchy {
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

impl From<&ClassModel> for ClassHierarchy {
    fn from(class: &ClassModel) -> ClassHierarchy {
        ClassHierarchy {
            name: class.name.clone(),
            superclass: class.superclass.clone(),
            interfaces: class.interfaces.clone(),
            access_flags: class.access_flags,
        }
    }
}

/// Source of class hierarchy information
///
/// Sources are shared between the threads of a run, so they must be safe to query concurrently.
pub trait ClassSource: Send + Sync {
    /// Find a class (`Ok(None)` means this source doesn't know about it)
    fn lookup(&self, name: &BinaryName) -> Result<Option<ClassHierarchy>, Error>;

    fn resolve_superclass(&self, name: &BinaryName) -> Result<Option<BinaryName>, Error> {
        Ok(self.lookup(name)?.and_then(|class| class.superclass))
    }

    fn resolve_interfaces(&self, name: &BinaryName) -> Result<Vec<BinaryName>, Error> {
        Ok(self
            .lookup(name)?
            .map(|class| class.interfaces)
            .unwrap_or_default())
    }
}

/// Classes held in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryClassSource {
    classes: HashMap<BinaryName, ClassHierarchy>,
}

/// Commonly used `java` types: name, superclass, interfaces, is interface
const JAVA_LIBRARY: &[(&str, Option<&str>, &[&str], bool)] = &[
    ("java/lang/Object", None, &[], false),
    ("java/lang/CharSequence", Some("java/lang/Object"), &[], true),
    ("java/lang/Comparable", Some("java/lang/Object"), &[], true),
    ("java/lang/Cloneable", Some("java/lang/Object"), &[], true),
    ("java/lang/Iterable", Some("java/lang/Object"), &[], true),
    ("java/lang/Runnable", Some("java/lang/Object"), &[], true),
    ("java/io/Serializable", Some("java/lang/Object"), &[], true),
    (
        "java/lang/String",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable", "java/lang/CharSequence"],
        false,
    ),
    ("java/lang/Class", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Number", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Integer", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Long", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Float", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Double", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Short", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Byte", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Boolean", Some("java/lang/Object"), &["java/io/Serializable", "java/lang/Comparable"], false),
    ("java/lang/Character", Some("java/lang/Object"), &["java/io/Serializable", "java/lang/Comparable"], false),
    ("java/lang/Throwable", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Exception", Some("java/lang/Throwable"), &[], false),
    ("java/lang/Error", Some("java/lang/Throwable"), &[], false),
    ("java/lang/RuntimeException", Some("java/lang/Exception"), &[], false),
    ("java/lang/IllegalArgumentException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/IllegalStateException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/ArithmeticException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/NullPointerException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/ClassCastException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/IndexOutOfBoundsException", Some("java/lang/RuntimeException"), &[], false),
    ("java/lang/AssertionError", Some("java/lang/Error"), &[], false),
    ("java/lang/System", Some("java/lang/Object"), &[], false),
    ("java/lang/StringBuilder", Some("java/lang/Object"), &["java/io/Serializable", "java/lang/CharSequence"], false),
    ("java/io/PrintStream", Some("java/lang/Object"), &[], false),
    ("java/lang/invoke/MethodHandle", Some("java/lang/Object"), &[], false),
    ("java/lang/invoke/MethodType", Some("java/lang/Object"), &["java/io/Serializable"], false),
];

impl InMemoryClassSource {
    pub fn new() -> InMemoryClassSource {
        InMemoryClassSource::default()
    }

    /// Source preloaded with the most common `java/lang` types
    pub fn with_java_library() -> InMemoryClassSource {
        let mut source = InMemoryClassSource::new();
        for (name, superclass, interfaces, is_interface) in JAVA_LIBRARY {
            let access_flags = if *is_interface {
                ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
            } else {
                ClassAccessFlags::PUBLIC
            };
            source.insert(ClassHierarchy {
                name: BinaryName::name(*name),
                superclass: superclass.map(BinaryName::name),
                interfaces: interfaces.iter().map(|i| BinaryName::name(*i)).collect(),
                access_flags,
            });
        }
        source
    }

    pub fn insert(&mut self, class: ClassHierarchy) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Add the hierarchy information of a loaded class
    pub fn insert_model(&mut self, class: &ClassModel) {
        self.insert(ClassHierarchy::from(class));
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for InMemoryClassSource {
    fn lookup(&self, name: &BinaryName) -> Result<Option<ClassHierarchy>, Error> {
        Ok(self.classes.get(name).cloned())
    }
}

/// Classes read lazily from a directory laid out by package (`a/b/C.class`)
///
/// What has been read is cached, misses included. Lookups are mostly reads, hence the `RwLock`.
#[derive(Debug)]
pub struct DirectoryClassSource {
    root: PathBuf,
    cache: RwLock<HashMap<BinaryName, Option<ClassHierarchy>>>,
}

impl DirectoryClassSource {
    pub fn new(root: impl AsRef<Path>) -> DirectoryClassSource {
        DirectoryClassSource {
            root: root.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, name: &BinaryName) -> Result<Option<ClassHierarchy>, Error> {
        let path = self.root.join(format!("{}.class", name.as_str()));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::IoError(err)),
        };
        let class = read_hierarchy(&bytes)?;
        if &class.name != name {
            warn!(
                "{} declares class {} instead of {}",
                path.display(),
                class.name,
                name
            );
            return Ok(None);
        }
        Ok(Some(class))
    }
}

impl ClassSource for DirectoryClassSource {
    fn lookup(&self, name: &BinaryName) -> Result<Option<ClassHierarchy>, Error> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(cached.clone());
        }

        let class = self.read(name)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), class.clone());
        Ok(class)
    }
}

/// Sources queried in order, the first one to know a class wins
#[derive(Default)]
pub struct ChainedClassSource {
    sources: Vec<Box<dyn ClassSource>>,
}

impl ChainedClassSource {
    pub fn new() -> ChainedClassSource {
        ChainedClassSource::default()
    }

    pub fn push(&mut self, source: impl ClassSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn with(mut self, source: impl ClassSource + 'static) -> ChainedClassSource {
        self.push(source);
        self
    }
}

impl ClassSource for ChainedClassSource {
    fn lookup(&self, name: &BinaryName) -> Result<Option<ClassHierarchy>, Error> {
        for source in &self.sources {
            if let Some(class) = source.lookup(name)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }
}

/// Cached view of a [`ClassSource`], for one thread of one run
///
/// Unknown classes (including source errors) resolve to direct subclasses of `java/lang/Object`.
pub struct SymbolResolver<'s> {
    source: &'s dyn ClassSource,
    cache: FrozenMap<BinaryName, Box<Option<ClassHierarchy>>>,
}

impl<'s> SymbolResolver<'s> {
    pub fn new(source: &'s dyn ClassSource) -> SymbolResolver<'s> {
        SymbolResolver {
            source,
            cache: FrozenMap::new(),
        }
    }

    /// Hierarchy information about a class, if the source knows it
    pub fn hierarchy(&self, name: &BinaryName) -> Option<&ClassHierarchy> {
        if let Some(cached) = self.cache.get(name) {
            return cached.as_ref();
        }
        let class = match self.source.lookup(name) {
            Ok(Some(class)) => Some(class),
            Ok(None) => {
                debug!("Class {} not found, assuming it extends java/lang/Object", name);
                None
            }
            Err(err) => {
                warn!("Failed to look up {} ({}), assuming it extends java/lang/Object", name, err);
                None
            }
        };
        self.cache.insert(name.clone(), Box::new(class)).as_ref()
    }

    pub fn is_interface(&self, name: &BinaryName) -> bool {
        self.hierarchy(name)
            .map_or(false, ClassHierarchy::is_interface)
    }

    /// Superclass of a class (unknown classes get `java/lang/Object`)
    pub fn superclass(&self, name: &BinaryName) -> Option<BinaryName> {
        if *name == BinaryName::OBJECT {
            return None;
        }
        match self.hierarchy(name) {
            Some(class) => class.superclass.clone(),
            None => Some(BinaryName::OBJECT),
        }
    }

    /// The class and its superclasses, ending with `java/lang/Object`
    pub fn superclass_chain(&self, name: &BinaryName) -> Vec<BinaryName> {
        let mut chain = vec![name.clone()];
        let mut seen: HashSet<BinaryName> = HashSet::new();
        seen.insert(name.clone());
        let mut current = name.clone();
        while let Some(superclass) = self.superclass(&current) {
            if !seen.insert(superclass.clone()) {
                warn!("Cycle in the superclasses of {}", name);
                break;
            }
            chain.push(superclass.clone());
            current = superclass;
        }
        if chain.last() != Some(&BinaryName::OBJECT) {
            chain.push(BinaryName::OBJECT);
        }
        chain
    }

    /// Is the first class a subtype of the second?
    ///
    /// This does a traversal of super types (classes and interfaces).
    pub fn is_class_assignable(&self, sub_type: &BinaryName, super_type: &BinaryName) -> bool {
        if sub_type == super_type || *super_type == BinaryName::OBJECT {
            return true;
        }

        let mut supertypes_to_visit: Vec<BinaryName> = vec![sub_type.clone()];
        let mut dont_revisit: HashSet<BinaryName> = HashSet::new();
        dont_revisit.insert(sub_type.clone());

        // If the super type is a class, then skip visiting interfaces
        let super_is_class = !self.is_interface(super_type);

        while let Some(class) = supertypes_to_visit.pop() {
            if class == *super_type {
                return true;
            }
            let class = match self.hierarchy(&class) {
                Some(class) => class,
                None => continue,
            };
            if let Some(superclass) = &class.superclass {
                if dont_revisit.insert(superclass.clone()) {
                    supertypes_to_visit.push(superclass.clone());
                }
            }
            if !super_is_class {
                for interface in &class.interfaces {
                    if dont_revisit.insert(interface.clone()) {
                        supertypes_to_visit.push(interface.clone());
                    }
                }
            }
        }

        false
    }

    /// Is the first type assignable to the second, following the JVM rules for arrays?
    pub fn is_assignable(&self, sub_type: &RefType<BinaryName>, super_type: &RefType<BinaryName>) -> bool {
        match (sub_type, super_type) {
            // Special superclass and interfaces of all arrays
            (RefType::PrimitiveArray(_) | RefType::ObjectArray(_), RefType::Object(object_type)) => {
                is_array_supertype(object_type)
            }

            // Primitive arrays must match in dimension and type
            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => arr1 == arr2,

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less | Ordering::Equal => false,
                    Ordering::Greater => is_array_supertype(&arr2.element_type),
                }
            }

            // Arrays are covariant
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less => false,
                    Ordering::Equal => {
                        self.is_class_assignable(&arr1.element_type, &arr2.element_type)
                    }
                    Ordering::Greater => is_array_supertype(&arr2.element_type),
                }
            }

            (RefType::Object(cls1), RefType::Object(cls2)) => self.is_class_assignable(cls1, cls2),

            _ => false,
        }
    }

    /// Most specific class that both classes extend
    ///
    /// Interfaces don't have a useful common superclass, so anything involving an interface
    /// gives `java/lang/Object` (the verifier treats interface types like `Object` anyway).
    pub fn common_superclass(&self, type1: &BinaryName, type2: &BinaryName) -> BinaryName {
        if type1 == type2 {
            return type1.clone();
        }
        if self.is_interface(type1) || self.is_interface(type2) {
            return BinaryName::OBJECT;
        }
        let chain2: HashSet<BinaryName> = self.superclass_chain(type2).into_iter().collect();
        self.superclass_chain(type1)
            .into_iter()
            .find(|class| chain2.contains(class))
            .unwrap_or(BinaryName::OBJECT)
    }

    /// Most specific reference type both types are assignable to
    pub fn common_supertype(
        &self,
        type1: &RefType<BinaryName>,
        type2: &RefType<BinaryName>,
    ) -> RefType<BinaryName> {
        match (type1, type2) {
            _ if type1 == type2 => type1.clone(),
            (RefType::Object(cls1), RefType::Object(cls2)) => {
                RefType::Object(self.common_superclass(cls1, cls2))
            }
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
                if arr1.additional_dimensions == arr2.additional_dimensions =>
            {
                RefType::ObjectArray(ArrayType {
                    additional_dimensions: arr1.additional_dimensions,
                    element_type: self.common_superclass(&arr1.element_type, &arr2.element_type),
                })
            }
            (RefType::Object(_), _) | (_, RefType::Object(_)) => RefType::Object(BinaryName::OBJECT),
            _ => {
                // Both are arrays: they share `Object[]...[]` up to the shallower object nesting
                let shared = object_array_depth(type1).min(object_array_depth(type2));
                if shared == 0 {
                    RefType::Object(BinaryName::OBJECT)
                } else {
                    RefType::ObjectArray(ArrayType {
                        additional_dimensions: shared - 1,
                        element_type: BinaryName::OBJECT,
                    })
                }
            }
        }
    }
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_supertype(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}

/// How many levels of the array hold object references (`int[][]` has 1, `String[][]` has 2)
fn object_array_depth(ref_type: &RefType<BinaryName>) -> usize {
    match ref_type {
        RefType::Object(_) => 0,
        RefType::PrimitiveArray(arr) => arr.additional_dimensions,
        RefType::ObjectArray(arr) => arr.additional_dimensions + 1,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{FieldType, ParseDescriptor};

    fn class(name: &str) -> BinaryName {
        BinaryName::from_str(name).unwrap()
    }

    fn source() -> InMemoryClassSource {
        let mut source = InMemoryClassSource::with_java_library();
        source.insert(ClassHierarchy {
            name: class("me/Animal"),
            superclass: Some(BinaryName::OBJECT),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
        });
        source.insert(ClassHierarchy {
            name: class("me/Dog"),
            superclass: Some(class("me/Animal")),
            interfaces: vec![BinaryName::SERIALIZABLE],
            access_flags: ClassAccessFlags::PUBLIC,
        });
        source.insert(ClassHierarchy {
            name: class("me/Cat"),
            superclass: Some(class("me/Animal")),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
        });
        source
    }

    #[test]
    fn simple_classes() {
        let source = source();
        let resolver = SymbolResolver::new(&source);

        assert!(resolver.is_class_assignable(&BinaryName::STRING, &BinaryName::OBJECT));
        assert!(!resolver.is_class_assignable(&BinaryName::OBJECT, &BinaryName::STRING));
        assert!(resolver.is_class_assignable(&class("me/Dog"), &class("me/Animal")));
        assert!(resolver.is_class_assignable(&class("me/Dog"), &BinaryName::SERIALIZABLE));
        assert!(!resolver.is_class_assignable(&class("me/Cat"), &BinaryName::SERIALIZABLE));
        assert!(resolver.is_class_assignable(&BinaryName::STRING, &BinaryName::CHARSEQUENCE));
    }

    #[test]
    fn common_superclasses() {
        let source = source();
        let resolver = SymbolResolver::new(&source);

        assert_eq!(
            resolver.common_superclass(&class("me/Dog"), &class("me/Cat")),
            class("me/Animal")
        );
        assert_eq!(
            resolver.common_superclass(&class("me/Dog"), &BinaryName::STRING),
            BinaryName::OBJECT
        );
        assert_eq!(
            resolver.common_superclass(&class("me/Dog"), &BinaryName::SERIALIZABLE),
            BinaryName::OBJECT
        );
        assert_eq!(
            resolver.common_superclass(&class("me/Dog"), &class("me/Animal")),
            class("me/Animal")
        );
    }

    #[test]
    fn unknown_classes_extend_object() {
        let source = InMemoryClassSource::new();
        let resolver = SymbolResolver::new(&source);

        assert_eq!(
            resolver.superclass_chain(&class("me/Mystery")),
            vec![class("me/Mystery"), BinaryName::OBJECT]
        );
        assert_eq!(
            resolver.common_superclass(&class("me/Mystery"), &class("me/Other")),
            BinaryName::OBJECT
        );
        assert!(resolver.hierarchy(&class("me/Mystery")).is_none());
    }

    #[test]
    fn arrays() {
        let source = source();
        let resolver = SymbolResolver::new(&source);
        let ref_type = |desc: &str| match FieldType::parse(desc).unwrap() {
            FieldType::Ref(ref_type) => ref_type,
            FieldType::Base(_) => panic!("not a reference type"),
        };

        assert!(resolver.is_assignable(&ref_type("[Lme/Dog;"), &ref_type("[Lme/Animal;")));
        assert!(resolver.is_assignable(&ref_type("[I"), &ref_type("Ljava/lang/Cloneable;")));
        assert!(resolver.is_assignable(&ref_type("[[I"), &ref_type("[Ljava/lang/Object;")));
        assert!(!resolver.is_assignable(&ref_type("[I"), &ref_type("[J")));

        assert_eq!(
            resolver.common_supertype(&ref_type("[Lme/Dog;"), &ref_type("[Lme/Cat;")),
            ref_type("[Lme/Animal;")
        );
        assert_eq!(
            resolver.common_supertype(&ref_type("[[I"), &ref_type("[Ljava/lang/String;")),
            ref_type("[Ljava/lang/Object;")
        );
        assert_eq!(
            resolver.common_supertype(&ref_type("[I"), &ref_type("[J")),
            ref_type("Ljava/lang/Object;")
        );
    }

    #[test]
    fn chained_sources() {
        let mut first = InMemoryClassSource::new();
        first.insert(ClassHierarchy {
            name: class("me/Dog"),
            superclass: Some(class("me/Wolf")),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
        });
        let chained = ChainedClassSource::new().with(first).with(source());

        assert_eq!(
            chained.resolve_superclass(&class("me/Dog")).unwrap(),
            Some(class("me/Wolf"))
        );
        assert_eq!(
            chained.resolve_superclass(&class("me/Cat")).unwrap(),
            Some(class("me/Animal"))
        );
        assert!(chained.lookup(&class("me/Nope")).unwrap().is_none());
    }
}
