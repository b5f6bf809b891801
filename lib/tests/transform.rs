mod common;

use classmorph::jvm::class_file::Constant;
use classmorph::jvm::code::{Instruction, InvokeType, Label, LabelGenerator, OrdComparison};
use classmorph::jvm::model::Code;
use classmorph::jvm::patcher::Patcher;
use classmorph::jvm::resolver::{InMemoryClassSource, SymbolResolver};
use classmorph::jvm::verifier::VerificationType;
use classmorph::jvm::{self, loader, BinaryName, MalformedKind, MethodAccessFlags, Name, Referrer, UnqualifiedName};
use classmorph::settings::Settings;
use classmorph::transform::engine::{self, transform, transform_with};
use classmorph::transform::passes::{EntryHookPass, StripDebugPass};
use classmorph::transform::{Error, MergePolicy, Pass, PassOutcome, Pipeline, Target};

fn entry_hook() -> EntryHookPass {
    EntryHookPass::new(
        BinaryName::from_str("me/Log").unwrap(),
        UnqualifiedName::from_str("enter").unwrap(),
    )
}

fn pipeline(passes: Vec<Box<dyn Pass>>) -> Pipeline {
    Pipeline::new(passes, MergePolicy::Reject).unwrap()
}

#[test]
fn empty_pipeline_round_trips() {
    let bytes = common::emit(common::calculator());
    let source = InMemoryClassSource::with_java_library();
    let output = transform(&bytes, &Pipeline::empty(), &source, &Settings::new()).unwrap();
    assert_eq!(output, bytes);
}

/// Instructions from `skip` on, with jump targets turned into positions relative to `skip`, and
/// the exception table in the same terms
fn layout(code: &Code, skip: usize) -> (Vec<Instruction>, Vec<(usize, usize, usize)>) {
    let positions = code.label_positions();
    let mut generator = LabelGenerator::new();
    let canonical: Vec<Label> = (0..=code.instructions().count())
        .map(|_| generator.fresh_label())
        .collect();
    let relative = |label: &Label| positions[label] - skip;

    let instructions = code
        .instructions()
        .skip(skip)
        .map(|insn| {
            let mut insn = insn.clone();
            for target in insn.jump_targets_mut() {
                *target = canonical[relative(&*target)];
            }
            insn
        })
        .collect();
    let ranges = code
        .exception_ranges()
        .iter()
        .map(|range| (relative(&range.start), relative(&range.end), relative(&range.handler)))
        .collect();
    (instructions, ranges)
}

/// Stack at the frame after the `ifeq`, in terms of instruction positions
fn uninitialized_stack(code: &Code, skip: usize) -> Vec<Option<usize>> {
    let positions = code.label_positions();
    let branch = code
        .instructions()
        .find_map(|insn| match insn {
            Instruction::If(OrdComparison::EQ, label) => Some(*label),
            _ => None,
        })
        .unwrap();
    code.frame_at(branch)
        .unwrap()
        .stack
        .iter()
        .map(|vtype| match vtype {
            VerificationType::Uninitialized(label) => Some(positions[label] - skip),
            _ => None,
        })
        .collect()
}

#[test]
fn edited_code_survives_reencoding() {
    let bytes = common::emit(common::control_flow());
    let before = loader::load(&bytes).unwrap();
    let source = InMemoryClassSource::with_java_library();
    let output = transform(&bytes, &pipeline(vec![Box::new(entry_hook())]), &source, &Settings::new()).unwrap();
    let after = loader::load(&output).unwrap();

    let original = before.find_method("mixed", "(I)Ljava/lang/Object;").unwrap().code.as_ref().unwrap();
    let hooked = after.find_method("mixed", "(I)Ljava/lang/Object;").unwrap().code.as_ref().unwrap();
    assert_eq!(hooked.instructions().count(), original.instructions().count() + 2);
    assert_eq!(layout(hooked, 2), layout(original, 0));

    let (instructions, ranges) = layout(hooked, 2);
    assert!(instructions.iter().any(|insn| matches!(insn, Instruction::TableSwitch { .. })));
    assert!(instructions.iter().any(|insn| matches!(insn, Instruction::LookupSwitch { .. })));
    assert!(instructions.contains(&Instruction::IStore(300)));
    assert!(instructions.contains(&Instruction::LStore(301)));
    assert_eq!(ranges, vec![(0, 10, 17)]);
    assert_eq!(original.max_locals(), 303);
    assert_eq!(hooked.max_locals(), 303);

    // Both `new` results still point at the `new` instruction, loaded or recomputed
    assert_eq!(uninitialized_stack(original, 0), vec![Some(10), Some(10)]);
    assert_eq!(uninitialized_stack(hooked, 2), vec![Some(10), Some(10)]);
}

#[test]
fn entry_logging_on_add() {
    let bytes = common::emit(common::calculator());
    let source = InMemoryClassSource::with_java_library();
    let resolver = SymbolResolver::new(&source);
    let pipeline = pipeline(vec![Box::new(entry_hook().select("add"))]);
    let (output, report) = transform_with(&bytes, &pipeline, &resolver, &Settings::new()).unwrap();
    assert_eq!(report.outcomes, vec![(String::from("entry-hook"), PassOutcome::Changed)]);
    assert_eq!(report.recomputed, 1);

    let class = loader::load(&output).unwrap();
    let add = class.find_method("add", "(II)I").unwrap().code.as_ref().unwrap();
    let instructions: Vec<&Instruction> = add.instructions().collect();
    assert_eq!(instructions.len(), 6);
    match instructions[0] {
        Instruction::Ldc(index) => match class.constants.get(*index) {
            Some(Constant::String(utf8)) => {
                assert_eq!(class.constants.utf8(*utf8).unwrap(), "me/Calc.add(II)I")
            }
            other => panic!("expected a string constant, got {:?}", other),
        },
        other => panic!("expected ldc, got {:?}", other),
    }
    match instructions[1] {
        Instruction::Invoke(InvokeType::Static, method_ref) => {
            let member = class.constants.method_ref(*method_ref).unwrap();
            assert_eq!(member.class, "me/Log");
            assert_eq!(member.name, "enter");
            assert_eq!(member.descriptor, "(Ljava/lang/String;)V");
        }
        other => panic!("expected invokestatic, got {:?}", other),
    }
    assert_eq!(&instructions[2..], &[
        &Instruction::ILoad(0),
        &Instruction::ILoad(1),
        &Instruction::IAdd,
        &Instruction::IReturn,
    ]);
    assert_eq!(add.max_stack(), 2);
    assert_eq!(add.max_locals(), 2);

    let max = class.find_method("max", "(II)I").unwrap().code.as_ref().unwrap();
    assert_eq!(max.instructions().count(), 7);
}

#[test]
fn hooked_branches_keep_sound_frames() {
    let bytes = common::emit(common::calculator());
    let source = InMemoryClassSource::with_java_library();
    let pipeline = pipeline(vec![Box::new(entry_hook().select_exact("max", "(II)I"))]);
    let output = transform(&bytes, &pipeline, &source, &Settings::new()).unwrap();

    let class = loader::load(&output).unwrap();
    let max = class.find_method("max", "(II)I").unwrap().code.as_ref().unwrap();
    let target = max
        .instructions()
        .find_map(|insn| match insn {
            Instruction::IfICmp(OrdComparison::LT, label) => Some(*label),
            _ => None,
        })
        .unwrap();
    let frame = max.frame_at(target).unwrap();
    assert_eq!(frame.locals, vec![VerificationType::Integer, VerificationType::Integer]);
    assert!(frame.stack.is_empty());
    assert_eq!(max.frames().len(), 1);
}

#[test]
fn transforming_twice_changes_nothing() {
    let bytes = common::emit(common::calculator());
    let source = InMemoryClassSource::with_java_library();
    let pipeline = pipeline(vec![
        Box::new(entry_hook()),
        Box::new(StripDebugPass),
    ]);
    let settings = Settings::new();
    let once = transform(&bytes, &pipeline, &source, &settings).unwrap();

    let resolver = SymbolResolver::new(&source);
    let (twice, report) = transform_with(&once, &pipeline, &resolver, &settings).unwrap();
    assert!(!report.changed());
    assert_eq!(report.recomputed, 0);
    assert_eq!(twice, once);
}

#[test]
fn conflicting_writes_on_foo() {
    let passes: Vec<Box<dyn Pass>> = vec![
        Box::new(entry_hook().select("foo")),
        Box::new(entry_hook().select("foo")),
    ];
    match Pipeline::new(passes, MergePolicy::Reject) {
        Err(Error::PassConflict { target, .. }) => assert_eq!(target, Target::method("foo")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("conflicting passes were accepted"),
    }

    let passes: Vec<Box<dyn Pass>> = vec![
        Box::new(entry_hook().select("foo")),
        Box::new(entry_hook().select("foo")),
    ];
    assert!(Pipeline::new(passes, MergePolicy::Sequential).is_ok());
}

#[test]
fn removing_a_branch_target_dangles() {
    let mut method = common::method(
        MethodAccessFlags::STATIC,
        "pick",
        "(II)I",
        vec![],
    );
    let mut code = Code::new();
    let cut = code.fresh_label();
    let target = code.fresh_label();
    let end = code.fresh_label();
    code.push_instruction(Instruction::ILoad(0));
    code.push_instruction(Instruction::ILoad(1));
    code.push_instruction(Instruction::IfICmp(OrdComparison::GE, target));
    code.push_instruction(Instruction::ILoad(1));
    code.push_instruction(Instruction::IReturn);
    code.place_label(cut);
    code.place_label(target);
    code.push_instruction(Instruction::ILoad(0));
    code.push_instruction(Instruction::IReturn);
    code.place_label(end);
    method.code = Some(code);

    let mut patcher = Patcher::new(&mut method).unwrap();
    match patcher.remove(cut, end) {
        Err(jvm::Error::DanglingReference {
            method,
            label,
            referrer,
        }) => {
            assert_eq!(method, "pick(II)I");
            assert_eq!(label, target);
            assert!(matches!(referrer, Referrer::Instruction { index: 2, .. }));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(patcher.code().instructions().count(), 7);
}

#[test]
fn malformed_input_is_rejected() {
    let source = InMemoryClassSource::with_java_library();
    let settings = Settings::new();

    let err = transform(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00], &Pipeline::empty(), &source, &settings)
        .unwrap_err();
    assert!(matches!(
        err.as_jvm(),
        Some(jvm::Error::MalformedClass(MalformedKind::Truncated))
    ));

    let err = transform(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52], &Pipeline::empty(), &source, &settings)
        .unwrap_err();
    assert!(matches!(
        err.as_jvm(),
        Some(jvm::Error::MalformedClass(MalformedKind::BadMagic(0xDEADBEEF)))
    ));
}

#[test]
fn directories_are_mirrored() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(input.path().join("me")).unwrap();
    std::fs::write(input.path().join("me/Calc.class"), common::emit(common::calculator())).unwrap();
    std::fs::write(input.path().join("me/Broken.class"), b"not a class").unwrap();
    std::fs::write(input.path().join("me/notes.txt"), b"ignored").unwrap();

    let source = InMemoryClassSource::with_java_library();
    let pipeline = pipeline(vec![Box::new(entry_hook())]);
    let mut settings = Settings::new();
    settings.threads = Some(2);
    let outcomes =
        engine::transform_path(input.path(), output.path(), &pipeline, &source, &settings).unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].input.ends_with("me/Broken.class"));
    assert!(outcomes[0].result.is_err());
    assert!(outcomes[1].result.as_ref().unwrap().changed());
    assert!(!output.path().join("me/Broken.class").exists());

    let written = std::fs::read(output.path().join("me/Calc.class")).unwrap();
    let class = loader::load(&written).unwrap();
    assert_eq!(class.name.as_str(), "me/Calc");
}
