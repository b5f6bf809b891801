//! Class fixtures shared by the integration tests

#![allow(dead_code)]

use classmorph::jvm::class_file::Version;
use classmorph::jvm::code::{Instruction, InvokeType, OrdComparison};
use classmorph::jvm::model::{ClassModel, Code, ExceptionRange, FieldModel, MethodModel};
use classmorph::jvm::patcher::Patcher;
use classmorph::jvm::resolver::{InMemoryClassSource, SymbolResolver};
use classmorph::jvm::{
    emitter, frames, BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};
use classmorph::settings::Settings;

pub fn class(name: &str, access_flags: ClassAccessFlags) -> ClassModel {
    class_extending(name, access_flags, BinaryName::OBJECT)
}

pub fn class_extending(name: &str, access_flags: ClassAccessFlags, superclass: BinaryName) -> ClassModel {
    ClassModel::new(
        Version::JAVA8,
        access_flags | ClassAccessFlags::SUPER,
        BinaryName::from_str(name).unwrap(),
        Some(superclass),
    )
}

pub fn method(access_flags: MethodAccessFlags, name: &str, descriptor: &str, body: Vec<Instruction>) -> MethodModel {
    let mut method = MethodModel::new(
        access_flags,
        UnqualifiedName::from_str(name).unwrap(),
        MethodDescriptor::parse(descriptor).unwrap(),
    );
    let mut code = Code::new();
    for insn in body {
        code.push_instruction(insn);
    }
    method.code = Some(code);
    method
}

pub fn field(access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> FieldModel {
    FieldModel::new(
        access_flags,
        UnqualifiedName::from_str(name).unwrap(),
        FieldType::parse(descriptor).unwrap(),
    )
}

/// `me/Calc` with a constructor, `static int add(int, int)`, and `static int max(int, int)`
pub fn calculator() -> ClassModel {
    let mut class = class("me/Calc", ClassAccessFlags::PUBLIC);

    let object_init = class
        .constants
        .get_method_ref("java/lang/Object", "<init>", "()V", false)
        .unwrap();
    class.methods.push(method(
        MethodAccessFlags::PUBLIC,
        "<init>",
        "()V",
        vec![
            Instruction::ALoad(0),
            Instruction::Invoke(InvokeType::Special, object_init),
            Instruction::Return,
        ],
    ));

    class.methods.push(method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "add",
        "(II)I",
        vec![
            Instruction::ILoad(0),
            Instruction::ILoad(1),
            Instruction::IAdd,
            Instruction::IReturn,
        ],
    ));

    let mut max = MethodModel::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        UnqualifiedName::from_str("max").unwrap(),
        MethodDescriptor::parse("(II)I").unwrap(),
    );
    let mut code = Code::new();
    let second = code.fresh_label();
    code.push_instruction(Instruction::ILoad(0));
    code.push_instruction(Instruction::ILoad(1));
    code.push_instruction(Instruction::IfICmp(OrdComparison::LT, second));
    code.push_instruction(Instruction::ILoad(0));
    code.push_instruction(Instruction::IReturn);
    code.place_label(second);
    code.push_instruction(Instruction::ILoad(1));
    code.push_instruction(Instruction::IReturn);
    max.code = Some(code);
    class.methods.push(max);

    class
}

/// `me/Flow` with `static Object mixed(int)`, covering the encodings that need care
///
/// The method has both kinds of switch, `wide` local stores, `ldc_w` and `ldc2_w` (the pool is
/// padded past 256 entries), an exception handler, and an uninitialized object on the stack
/// across a branch.
pub fn control_flow() -> ClassModel {
    use Instruction::*;

    let mut class = class("me/Flow", ClassAccessFlags::PUBLIC);
    for filler in 0..300 {
        class.constants.get_integer(100_000 + filler).unwrap();
    }
    let big = class.constants.get_integer(7_000_000).unwrap();
    let long = class.constants.get_long(1 << 40).unwrap();
    let flow = class.constants.get_class("me/Flow").unwrap();
    let flow_init = class
        .constants
        .get_method_ref("me/Flow", "<init>", "()V", false)
        .unwrap();

    let mut mixed = method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "mixed",
        "(I)Ljava/lang/Object;",
        vec![],
    );
    let code = mixed.code.as_mut().unwrap();
    let start = code.fresh_label();
    let one = code.fresh_label();
    let two = code.fresh_label();
    let other = code.fresh_label();
    let join = code.fresh_label();
    let end = code.fresh_label();
    let created = code.fresh_label();
    let skip = code.fresh_label();
    let handler = code.fresh_label();

    code.place_label(start);
    code.push_instruction(ILoad(0));
    code.push_instruction(TableSwitch {
        default: other,
        low: 0,
        targets: vec![one, two],
    });
    code.place_label(one);
    code.push_instruction(Ldc(big));
    code.push_instruction(IStore(300));
    code.push_instruction(Goto(join));
    code.place_label(two);
    code.push_instruction(Ldc2(long));
    code.push_instruction(LStore(301));
    code.push_instruction(Goto(join));
    code.place_label(other);
    code.push_instruction(ILoad(0));
    code.push_instruction(LookupSwitch {
        default: join,
        targets: vec![(-5, one), (1000, two)],
    });
    code.place_label(join);
    code.place_label(end);
    code.place_label(created);
    code.push_instruction(New(flow));
    code.push_instruction(Dup);
    code.push_instruction(ILoad(0));
    code.push_instruction(If(OrdComparison::EQ, skip));
    code.push_instruction(Nop);
    code.place_label(skip);
    code.push_instruction(Invoke(InvokeType::Special, flow_init));
    code.push_instruction(AReturn);
    code.place_label(handler);
    code.push_instruction(AStore(1));
    code.push_instruction(AConstNull);
    code.push_instruction(AReturn);

    Patcher::new(&mut mixed)
        .unwrap()
        .push_exception_range(ExceptionRange {
            start,
            end,
            handler,
            catch_type: None,
        })
        .unwrap();
    class.methods.push(mixed);
    class
}

/// Compute frames for a hand-built class and serialize it
pub fn emit(mut class: ClassModel) -> Vec<u8> {
    let source = InMemoryClassSource::with_java_library();
    let resolver = SymbolResolver::new(&source);
    frames::recompute_class(&mut class, &resolver, &Settings::new()).unwrap();
    emitter::emit(&class).unwrap()
}
