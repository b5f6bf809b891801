mod common;

use classmorph::jvm::class_file::{
    Annotation, BootstrapMethod, BootstrapMethods, ElementValue, HandleKind, Record,
    RecordComponent, RuntimeInvisibleAnnotations, RuntimeVisibleAnnotations,
};
use classmorph::jvm::code::{Instruction, InvokeType};
use classmorph::jvm::model::ClassModel;
use classmorph::jvm::{BinaryName, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags, Name};
use classmorph::organize::{organize, organize_directory, ClassOrganizeMap};
use std::fs;

/// Classes exercising each way one class can pin another to its package
///
///   - `me/A` casts to the package-private class `me/Hidden`
///   - `me/B` reads a package-private field of `me/C`
///   - `me/D` extends `me/E` and calls one of its protected methods
///   - `me/F` calls the same protected method without extending `me/E`
///   - `me/G` only uses public things
fn classes() -> Vec<ClassModel> {
    let mut a = common::class("me/A", ClassAccessFlags::PUBLIC);
    let hidden_class = a.constants.get_class("me/Hidden").unwrap();
    a.methods.push(common::method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "run",
        "()V",
        vec![
            Instruction::AConstNull,
            Instruction::CheckCast(hidden_class),
            Instruction::Pop,
            Instruction::Return,
        ],
    ));

    let hidden = common::class("me/Hidden", ClassAccessFlags::empty());

    let mut b = common::class("me/B", ClassAccessFlags::PUBLIC);
    let count = b.constants.get_field_ref("me/C", "count", "I").unwrap();
    b.methods.push(common::method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "count",
        "()I",
        vec![Instruction::GetStatic(count), Instruction::IReturn],
    ));

    let mut c = common::class("me/C", ClassAccessFlags::PUBLIC);
    c.fields.push(common::field(FieldAccessFlags::STATIC, "count", "I"));

    let mut d = common::class_extending(
        "me/D",
        ClassAccessFlags::PUBLIC,
        BinaryName::from_str("me/E").unwrap(),
    );
    let helper = d.constants.get_method_ref("me/E", "helper", "()V", false).unwrap();
    d.methods.push(common::method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "run",
        "()V",
        vec![Instruction::Invoke(InvokeType::Static, helper), Instruction::Return],
    ));

    let mut e = common::class("me/E", ClassAccessFlags::PUBLIC);
    e.methods.push(common::method(
        MethodAccessFlags::PROTECTED | MethodAccessFlags::STATIC,
        "helper",
        "()V",
        vec![Instruction::Return],
    ));

    let mut f = common::class("me/F", ClassAccessFlags::PUBLIC);
    let helper = f.constants.get_method_ref("me/E", "helper", "()V", false).unwrap();
    f.methods.push(common::method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "run",
        "()V",
        vec![Instruction::Invoke(InvokeType::Static, helper), Instruction::Return],
    ));

    let mut g = common::class("me/G", ClassAccessFlags::PUBLIC);
    let hash = g
        .constants
        .get_method_ref("java/lang/Object", "hashCode", "()I", false)
        .unwrap();
    g.methods.push(common::method(
        MethodAccessFlags::PUBLIC,
        "hash",
        "()I",
        vec![
            Instruction::ALoad(0),
            Instruction::Invoke(InvokeType::Virtual, hash),
            Instruction::IReturn,
        ],
    ));

    vec![a, hidden, b, c, d, e, f, g]
}

fn assert_grouping(map: &ClassOrganizeMap) {
    let package = |class: &str| map.get_package(class).unwrap();
    assert_eq!(package("me/A"), package("me/Hidden"));
    assert_eq!(package("me/B"), package("me/C"));
    assert_eq!(package("me/E"), package("me/F"));
    assert_ne!(package("me/A"), package("me/B"));
    assert_ne!(package("me/D"), package("me/E"));
    assert_ne!(package("me/G"), package("me/A"));
    assert_eq!(map.class_count(), 8);
    assert_eq!(map.package_count(), 5);
}

#[test]
fn classes_are_grouped() {
    let map = organize(&classes()).unwrap();
    assert_grouping(&map);
    assert_eq!(map.package_set().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

    let printed = map.single_packages_to_zero().compacted().to_string();
    assert_eq!(
        printed,
        "me/A is in package 'a'\n\
         me/B is in package 'b'\n\
         me/C is in package 'b'\n\
         me/D is in package 'standalone'\n\
         me/E is in package 'c'\n\
         me/F is in package 'c'\n\
         me/G is in package 'standalone'\n\
         me/Hidden is in package 'a'\n"
    );
}

#[test]
fn class_files_are_grouped() {
    let directory = tempfile::tempdir().unwrap();
    fs::create_dir_all(directory.path().join("me")).unwrap();
    for class in classes() {
        let path = directory.path().join(format!("{}.class", class.name));
        fs::write(path, common::emit(class)).unwrap();
    }

    let map = organize_directory(directory.path()).unwrap();
    assert_grouping(&map);
}

/// Classes whose only ties are outside of plain instructions
///
///   - `me/Tagged` is annotated with the package-private `me/Marker`
///   - `me/Painted` has a field annotated with `@Paint(Color.RED)`, where `RED` is package-private
///   - the record `me/Point` has a component of the package-private type `me/Coord`
///   - `me/Lambda` has an `invokedynamic` bootstrapped by a package-private `me/Factory` method
///     with a `(Lme/Secret;)V` argument, and loads a dynamic constant made by `me/Vault`
///   - `me/Open` only uses public things
fn indirect_classes() -> Vec<ClassModel> {
    let mut tagged = common::class("me/Tagged", ClassAccessFlags::PUBLIC);
    let marker = tagged.constants.get_utf8("Lme/Marker;").unwrap();
    let attribute = tagged
        .constants
        .get_attribute(RuntimeInvisibleAnnotations(vec![Annotation {
            type_descriptor: marker,
            elements: vec![],
        }]))
        .unwrap();
    tagged.attributes.push(attribute);
    let marker = common::class("me/Marker", ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT);

    let mut painted = common::class("me/Painted", ClassAccessFlags::PUBLIC);
    let paint = painted.constants.get_utf8("Lme/Paint;").unwrap();
    let value = painted.constants.get_utf8("value").unwrap();
    let color = painted.constants.get_utf8("Lme/Color;").unwrap();
    let red = painted.constants.get_utf8("RED").unwrap();
    let attribute = painted
        .constants
        .get_attribute(RuntimeVisibleAnnotations(vec![Annotation {
            type_descriptor: paint,
            elements: vec![(
                value,
                ElementValue::Enum {
                    type_descriptor: color,
                    name: red,
                },
            )],
        }]))
        .unwrap();
    let mut shade = common::field(FieldAccessFlags::PUBLIC, "shade", "I");
    shade.attributes.push(attribute);
    painted.fields.push(shade);
    let paint = common::class("me/Paint", ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE);
    let mut color = common::class("me/Color", ClassAccessFlags::PUBLIC | ClassAccessFlags::ENUM);
    color.fields.push(common::field(FieldAccessFlags::STATIC, "RED", "Lme/Color;"));

    let mut point = common::class("me/Point", ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL);
    let x = point.constants.get_utf8("x").unwrap();
    let coord = point.constants.get_utf8("Lme/Coord;").unwrap();
    let attribute = point
        .constants
        .get_attribute(Record(vec![RecordComponent {
            name: x,
            descriptor: coord,
            attributes: vec![],
        }]))
        .unwrap();
    point.attributes.push(attribute);
    let coord = common::class("me/Coord", ClassAccessFlags::FINAL);

    let mut lambda = common::class("me/Lambda", ClassAccessFlags::PUBLIC);
    let make = lambda.constants.get_method_ref("me/Factory", "make", "()V", false).unwrap();
    let make = lambda
        .constants
        .get_method_handle(HandleKind::InvokeStatic, make.into())
        .unwrap();
    let argument = lambda.constants.get_method_type("(Lme/Secret;)V").unwrap();
    let open = lambda.constants.get_method_ref("me/Vault", "open", "()V", false).unwrap();
    let open = lambda
        .constants
        .get_method_handle(HandleKind::InvokeStatic, open.into())
        .unwrap();
    let attribute = lambda
        .constants
        .get_attribute(BootstrapMethods(vec![
            BootstrapMethod {
                method: make,
                arguments: vec![argument],
            },
            BootstrapMethod {
                method: open,
                arguments: vec![],
            },
        ]))
        .unwrap();
    lambda.attributes.push(attribute);
    let call_site = lambda
        .constants
        .get_invoke_dynamic(0, "run", "()Ljava/lang/Runnable;")
        .unwrap();
    let secret = lambda.constants.get_dynamic(1, "secret", "I").unwrap();
    lambda.methods.push(common::method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "run",
        "()V",
        vec![
            Instruction::InvokeDynamic(call_site),
            Instruction::Pop,
            Instruction::Ldc(secret),
            Instruction::Pop,
            Instruction::Return,
        ],
    ));
    let mut factory = common::class("me/Factory", ClassAccessFlags::PUBLIC);
    factory.methods.push(common::method(MethodAccessFlags::STATIC, "make", "()V", vec![Instruction::Return]));
    let secret = common::class("me/Secret", ClassAccessFlags::empty());
    let mut vault = common::class("me/Vault", ClassAccessFlags::PUBLIC);
    vault.methods.push(common::method(MethodAccessFlags::STATIC, "open", "()V", vec![Instruction::Return]));

    let mut open = common::class("me/Open", ClassAccessFlags::PUBLIC);
    let runnable = open.constants.get_utf8("Ljava/lang/Runnable;").unwrap();
    let attribute = open
        .constants
        .get_attribute(RuntimeVisibleAnnotations(vec![Annotation {
            type_descriptor: runnable,
            elements: vec![],
        }]))
        .unwrap();
    open.attributes.push(attribute);

    vec![
        tagged, marker, painted, paint, color, point, coord, lambda, factory, secret, vault, open,
    ]
}

#[test]
fn annotations_records_and_bootstraps_are_followed() {
    let map = organize(&indirect_classes()).unwrap();
    let package = |class: &str| map.get_package(class).unwrap();

    assert_eq!(package("me/Tagged"), package("me/Marker"));
    assert_eq!(package("me/Painted"), package("me/Color"));
    assert_ne!(package("me/Painted"), package("me/Paint"));
    assert_eq!(package("me/Point"), package("me/Coord"));
    assert_eq!(package("me/Lambda"), package("me/Factory"));
    assert_eq!(package("me/Lambda"), package("me/Secret"));
    assert_eq!(package("me/Lambda"), package("me/Vault"));
    assert_eq!(map.class_count(), 12);
    assert_eq!(map.package_count(), 6);
}
