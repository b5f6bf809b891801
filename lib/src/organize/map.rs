use super::Error;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Package identifier (only meaningful within one map)
///
/// Package `0` is reserved by convention for classes that can go anywhere (see
/// [`ClassOrganizeMap::single_packages_to_zero`]).
pub type PackageId = u32;

/// Assignment of classes to packages
///
/// Classes are binary names (eg. `com/example/Foo`). Every class is in exactly one package and
/// there are no empty packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassOrganizeMap {
    class_to_package: BTreeMap<String, PackageId>,
    package_to_classes: BTreeMap<PackageId, BTreeSet<String>>,
}

impl ClassOrganizeMap {
    pub fn new() -> ClassOrganizeMap {
        ClassOrganizeMap::default()
    }

    /// Add a class in a new package of its own, returning that package
    ///
    /// If the class was already in the map, it is moved.
    pub fn add_class(&mut self, class: impl Into<String>) -> PackageId {
        let package = self
            .package_to_classes
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        self.add_class_to(class, package);
        package
    }

    /// Add a class to a package (moving it if it was already in the map)
    pub fn add_class_to(&mut self, class: impl Into<String>, package: PackageId) {
        let class = class.into();
        let old_package = self.class_to_package.insert(class.clone(), package);
        if old_package == Some(package) {
            return;
        }
        self.remove_from(&class, old_package);
        self.package_to_classes
            .entry(package)
            .or_insert_with(BTreeSet::new)
            .insert(class);
    }

    /// Remove a class, returning the package it was in
    pub fn remove_class(&mut self, class: &str) -> Option<PackageId> {
        let package = self.class_to_package.remove(class);
        self.remove_from(class, package);
        package
    }

    fn remove_from(&mut self, class: &str, package: Option<PackageId>) {
        if let Some(package) = package {
            if let Some(classes) = self.package_to_classes.get_mut(&package) {
                classes.remove(class);
                if classes.is_empty() {
                    self.package_to_classes.remove(&package);
                }
            }
        }
    }

    pub fn get_package(&self, class: &str) -> Option<PackageId> {
        self.class_to_package.get(class).copied()
    }

    /// Classes in a package, in order (nothing if there is no such package)
    pub fn get_classes(&self, package: PackageId) -> impl Iterator<Item = &str> + '_ {
        self.package_to_classes
            .get(&package)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn contains_class(&self, class: &str) -> bool {
        self.class_to_package.contains_key(class)
    }

    /// Put the packages of two classes together
    pub fn merge_packages(&mut self, class1: &str, class2: &str) -> Result<(), Error> {
        let package1 = self
            .get_package(class1)
            .ok_or_else(|| Error::UnknownClass(class1.to_owned()))?;
        let package2 = self
            .get_package(class2)
            .ok_or_else(|| Error::UnknownClass(class2.to_owned()))?;
        self.merge_package_ids(package1, package2)
    }

    /// Move every class of `package2` into `package1`
    pub fn merge_package_ids(&mut self, package1: PackageId, package2: PackageId) -> Result<(), Error> {
        if package1 == package2 {
            return Ok(());
        }
        if !self.package_to_classes.contains_key(&package1) {
            return Err(Error::UnknownPackage(package1));
        }
        let moved = self
            .package_to_classes
            .remove(&package2)
            .ok_or(Error::UnknownPackage(package2))?;
        for class in &moved {
            self.class_to_package.insert(class.clone(), package1);
        }
        if let Some(classes) = self.package_to_classes.get_mut(&package1) {
            classes.extend(moved);
        }
        Ok(())
    }

    pub fn class_count(&self) -> usize {
        self.class_to_package.len()
    }

    pub fn package_count(&self) -> usize {
        self.package_to_classes.len()
    }

    /// Every class, in order
    pub fn class_set(&self) -> impl Iterator<Item = &str> + '_ {
        self.class_to_package.keys().map(String::as_str)
    }

    /// Every package, in order
    pub fn package_set(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.package_to_classes.keys().copied()
    }

    /// Same grouping, with packages renumbered `1, 2, 3, ...` in the order of their old ids
    ///
    /// Package `0` keeps its id.
    pub fn compacted(&self) -> ClassOrganizeMap {
        let mut result = ClassOrganizeMap::new();
        let mut next: PackageId = 1;
        for (package, classes) in &self.package_to_classes {
            let renumbered = if *package == 0 {
                0
            } else {
                next += 1;
                next - 1
            };
            for class in classes {
                result.class_to_package.insert(class.clone(), renumbered);
            }
            result
                .package_to_classes
                .insert(renumbered, classes.clone());
        }
        result
    }

    /// Same grouping, except that every package with a single class is folded into package `0`
    pub fn single_packages_to_zero(&self) -> ClassOrganizeMap {
        let mut result = ClassOrganizeMap::new();
        for (package, classes) in &self.package_to_classes {
            let package = if classes.len() == 1 { 0 } else { *package };
            for class in classes {
                result.add_class_to(class.clone(), package);
            }
        }
        result
    }
}

impl FromIterator<(String, PackageId)> for ClassOrganizeMap {
    fn from_iter<I: IntoIterator<Item = (String, PackageId)>>(assignments: I) -> ClassOrganizeMap {
        let mut map = ClassOrganizeMap::new();
        for (class, package) in assignments {
            map.add_class_to(class, package);
        }
        map
    }
}

/// Lists every class with the name of its package, one per line
impl fmt::Display for ClassOrganizeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (class, package) in &self.class_to_package {
            writeln!(f, "{} is in package '{}'", class, package_name(*package))?;
        }
        Ok(())
    }
}

/// Spreadsheet-column style name for a package (`1` is `a`, `26` is `z`, `27` is `aa`)
///
/// Package `0` is `standalone`.
pub fn package_name(package: PackageId) -> String {
    if package == 0 {
        return String::from("standalone");
    }
    let mut letters = vec![];
    let mut remaining = package;
    while remaining != 0 {
        let modulo = (remaining - 1) % 26;
        letters.push(char::from(b'a' + modulo as u8));
        remaining = (remaining - modulo) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn package_names() {
        assert_eq!(package_name(0), "standalone");
        assert_eq!(package_name(1), "a");
        assert_eq!(package_name(26), "z");
        assert_eq!(package_name(27), "aa");
        assert_eq!(package_name(52), "az");
        assert_eq!(package_name(53), "ba");
        assert_eq!(package_name(703), "aaa");
    }

    #[test]
    fn adding_and_removing() {
        let mut map = ClassOrganizeMap::new();
        assert_eq!(map.add_class("a/A"), 1);
        assert_eq!(map.add_class("a/B"), 2);
        map.add_class_to("a/C", 2);
        assert_eq!(map.class_count(), 3);
        assert_eq!(map.package_count(), 2);
        assert_eq!(map.get_classes(2).collect::<Vec<_>>(), vec!["a/B", "a/C"]);

        map.add_class_to("a/B", 1);
        assert_eq!(map.get_package("a/B"), Some(1));
        assert_eq!(map.get_classes(2).collect::<Vec<_>>(), vec!["a/C"]);

        assert_eq!(map.remove_class("a/C"), Some(2));
        assert_eq!(map.package_set().collect::<Vec<_>>(), vec![1]);
        assert!(!map.contains_class("a/C"));
        assert_eq!(map.remove_class("a/C"), None);
        assert_eq!(map.get_classes(2).count(), 0);
    }

    #[test]
    fn merging() {
        let mut map: ClassOrganizeMap = vec![
            (String::from("A"), 1),
            (String::from("B"), 2),
            (String::from("C"), 3),
        ]
        .into_iter()
        .collect();

        map.merge_packages("A", "C").unwrap();
        assert_eq!(map.get_package("C"), Some(1));
        assert_eq!(map.package_count(), 2);
        map.merge_packages("A", "C").unwrap();

        match map.merge_packages("A", "Z") {
            Err(Error::UnknownClass(class)) => assert_eq!(class, "Z"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            map.merge_package_ids(9, 2),
            Err(Error::UnknownPackage(9))
        ));

        map.merge_package_ids(2, 1).unwrap();
        assert_eq!(map.package_count(), 1);
        assert_eq!(map.class_set().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert!(map.class_set().all(|class| map.get_package(class) == Some(2)));
    }

    #[test]
    fn compacting() {
        let map: ClassOrganizeMap = vec![
            (String::from("A"), 4),
            (String::from("B"), 9),
            (String::from("C"), 9),
            (String::from("D"), 12),
            (String::from("E"), 12),
        ]
        .into_iter()
        .collect();

        let zeroed = map.single_packages_to_zero();
        assert_eq!(zeroed.get_package("A"), Some(0));
        assert_eq!(zeroed.get_package("B"), Some(9));

        let compacted = zeroed.compacted();
        assert_eq!(compacted.package_set().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(compacted.get_classes(2).collect::<Vec<_>>(), vec!["D", "E"]);
        assert_eq!(
            compacted.to_string(),
            "A is in package 'standalone'\n\
             B is in package 'a'\n\
             C is in package 'a'\n\
             D is in package 'b'\n\
             E is in package 'b'\n"
        );
    }
}
