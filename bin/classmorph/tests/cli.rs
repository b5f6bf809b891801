use classmorph::jvm::class_file::Version;
use classmorph::jvm::code::Instruction;
use classmorph::jvm::model::{ClassModel, Code, MethodModel};
use classmorph::jvm::resolver::{InMemoryClassSource, SymbolResolver};
use classmorph::jvm::{
    emitter, frames, loader, BinaryName, ClassAccessFlags, MethodAccessFlags, MethodDescriptor,
    Name, ParseDescriptor, UnqualifiedName,
};
use classmorph::settings::Settings;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn adder(name: &str) -> Vec<u8> {
    let mut class = ClassModel::new(
        Version::JAVA8,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        BinaryName::from_str(name).unwrap(),
        Some(BinaryName::OBJECT),
    );
    let mut method = MethodModel::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        UnqualifiedName::from_str("add").unwrap(),
        MethodDescriptor::parse("(II)I").unwrap(),
    );
    let mut code = Code::new();
    code.push_instruction(Instruction::ILoad(0));
    code.push_instruction(Instruction::ILoad(1));
    code.push_instruction(Instruction::IAdd);
    code.push_instruction(Instruction::IReturn);
    method.code = Some(code);
    class.methods.push(method);

    let source = InMemoryClassSource::with_java_library();
    let resolver = SymbolResolver::new(&source);
    frames::recompute_class(&mut class, &resolver, &Settings::new()).unwrap();
    emitter::emit(&class).unwrap()
}

fn classmorph(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_classmorph"))
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap()
}

#[test]
fn transform_a_directory() {
    let workspace = tempfile::tempdir().unwrap();
    fs::create_dir_all(workspace.path().join("in/me")).unwrap();
    fs::write(workspace.path().join("in/me/Calc.class"), adder("me/Calc")).unwrap();

    let output = classmorph(
        &["transform", "in", "--output", "out", "--entry-hook", "me/Log.enter", "--threads", "1"],
        workspace.path(),
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let bytes = fs::read(workspace.path().join("out/me/Calc.class")).unwrap();
    let class = loader::load(&bytes).unwrap();
    let add = class.find_method("add", "(II)I").unwrap();
    assert_eq!(add.code.as_ref().unwrap().instructions().count(), 6);
}

#[test]
fn failures_set_the_exit_code() {
    let workspace = tempfile::tempdir().unwrap();
    fs::create_dir_all(workspace.path().join("in")).unwrap();
    fs::write(workspace.path().join("in/Good.class"), adder("Good")).unwrap();
    fs::write(workspace.path().join("in/Bad.class"), b"\xCA\xFE").unwrap();

    let output = classmorph(&["transform", "in", "--output", "out"], workspace.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Bad.class"), "{}", stderr);
    assert!(workspace.path().join("out/Good.class").exists());
}

#[test]
fn organize_prints_packages() {
    let workspace = tempfile::tempdir().unwrap();
    fs::write(workspace.path().join("One.class"), adder("One")).unwrap();
    fs::write(workspace.path().join("Two.class"), adder("Two")).unwrap();

    let output = classmorph(&["organize", "."], workspace.path());
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "One is in package 'standalone'\nTwo is in package 'standalone'\n"
    );
}

#[test]
fn malformed_hooks_are_rejected() {
    let workspace = tempfile::tempdir().unwrap();
    fs::write(workspace.path().join("One.class"), adder("One")).unwrap();

    let output = classmorph(
        &["transform", "One.class", "--output", "out", "--entry-hook", "nodot"],
        workspace.path(),
    );
    assert!(!output.status.success());
    assert!(!workspace.path().join("out").exists());
}
