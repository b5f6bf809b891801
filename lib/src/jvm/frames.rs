//! Recomputing stack map frames, max stack, and max locals
//!
//! After a method body is edited, the metadata the verifier relies on has to be rebuilt from the
//! instructions. This is a classic data-flow fixed point: starting from the method's entry frame,
//! the effect of every instruction is propagated to its successors (fall through, branch targets,
//! and the handlers of exception ranges covering it). Whenever two paths meet, their frames are
//! merged, using the [`SymbolResolver`] to find common supertypes of references.
//!
//! Frames are only kept where the verifier expects them: at branch targets, at the start of
//! exception handlers, and right after instructions that don't fall through. Classes older than
//! version 50 get no frames at all (but still get max stack and max locals).

use crate::jvm::class_file::ConstantPool;
use crate::jvm::code::{CodeElement, Instruction, Label};
use crate::jvm::model::{ClassContext, ClassModel, Code, ExceptionRange, MethodModel};
use crate::jvm::resolver::SymbolResolver;
use crate::jvm::verifier::{ExecutionContext, ExecutionFrame, ModelFrame, VType};
use crate::jvm::{BinaryName, EditErrorKind, Error, RefType, VerifierErrorKind};
use crate::settings::{Settings, UnreachableCode};
use crate::util::Width;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;

/// Recompute the metadata of every method with stale code
pub fn recompute_class(
    class: &mut ClassModel,
    resolver: &SymbolResolver,
    settings: &Settings,
) -> Result<(), Error> {
    let (context, methods) = class.split_methods();
    for method in methods {
        if method.code.as_ref().map_or(false, Code::is_stale) {
            recompute(method, context, resolver, settings)?;
        }
    }
    Ok(())
}

/// Recompute frames, max stack, and max locals for a method, clearing its stale flag
///
/// Depending on [`Settings::unreachable_code`], unreachable instructions may get rewritten or
/// removed in the process.
pub fn recompute(
    method: &mut MethodModel,
    class: ClassContext,
    resolver: &SymbolResolver,
    settings: &Settings,
) -> Result<(), Error> {
    let method_name = method.member_name();
    let entry = ExecutionFrame::entry(
        class.name,
        method.is_static(),
        &method.name,
        &method.descriptor,
    );
    let code = match method.code.as_mut() {
        Some(code) => code,
        None => return Ok(()),
    };
    code.check_labels(&method_name)?;

    let mut body = Body::split(code);
    body.label_allocations(code);

    let needs_frames = class.version.needs_frames();
    if needs_frames {
        for (index, insn) in body.instructions.iter().enumerate() {
            if matches!(insn, Instruction::Jsr(_) | Instruction::Ret(_)) {
                return Err(Error::UnverifiableControlFlow {
                    method: method_name,
                    index,
                    kind: VerifierErrorKind::SubroutineWithFrames,
                });
            }
        }
    }

    let mut analysis = Analysis {
        method: &method_name,
        class,
        resolver,
        body: &body,
        ranges: body.resolve_ranges(&code.exception_ranges, class.constants, &method_name)?,
        frames_in: vec![None; body.instructions.len()],
        worklist: vec![],
        queued: vec![false; body.instructions.len()],
        max_stack: 0,
        max_locals: entry.locals.len(),
    };
    analysis.run(entry)?;
    let Analysis {
        mut frames_in,
        mut max_stack,
        mut max_locals,
        ..
    } = analysis;

    // Deal with whatever the analysis did not reach
    let dead_runs = dead_runs(&frames_in);
    let mut rewritten = false;
    if !dead_runs.is_empty() {
        debug!(
            "{}: {} unreachable instruction run(s), policy {:?}",
            method_name,
            dead_runs.len(),
            settings.unreachable_code
        );
        match settings.unreachable_code {
            UnreachableCode::Preserve => (),
            UnreachableCode::Neutralize => {
                let throwable = ExecutionFrame {
                    locals: vec![],
                    stack: vec![VType::Object(RefType::Object(BinaryName::THROWABLE))],
                };
                for (start, end) in &dead_runs {
                    for index in *start..*end {
                        body.instructions[index] = if index + 1 == *end {
                            Instruction::AThrow
                        } else {
                            Instruction::Nop
                        };
                        frames_in[index] = Some(throwable.clone());
                    }
                }
                max_stack = max_stack.max(1);
                body.split_ranges(code, &dead_runs, &method_name)?;
                rewritten = true;
            }
            UnreachableCode::Strip => {
                body.strip(&dead_runs, &mut frames_in);
                body.drop_empty_ranges(code);
                rewritten = true;
            }
        }
    }

    for insn in &body.instructions {
        if let Some((index, width)) = insn.local_variable() {
            max_locals = max_locals.max(index as usize + width as usize);
        }
    }

    let mut frames: Vec<(Label, ModelFrame)> = vec![];
    if needs_frames {
        for index in body.frame_positions(code) {
            let frame = match &frames_in[index] {
                Some(frame) => frame.to_frame(),
                None => ModelFrame {
                    locals: vec![],
                    stack: vec![],
                },
            };
            let label = body.label_before(index, code);
            frames.push((label, frame));
        }
    }

    if rewritten {
        code.mark_stale();
    }
    code.elements = body.join();
    code.frames = frames;
    code.max_stack = u16::try_from(max_stack).unwrap_or(u16::MAX);
    code.max_locals = u16::try_from(max_locals).unwrap_or(u16::MAX);
    code.stale = false;

    debug!(
        "{}: recomputed {} frame(s), max stack {}, max locals {}",
        method_name,
        code.frames.len(),
        code.max_stack,
        code.max_locals
    );
    Ok(())
}

/// Merge two frames meeting at the same instruction
///
/// Returns `None` if the merged frame is the same as `existing`.
pub fn merge_frames(
    existing: &ExecutionFrame,
    incoming: &ExecutionFrame,
    resolver: &SymbolResolver,
) -> Result<Option<ExecutionFrame>, VerifierErrorKind> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(VerifierErrorKind::IncompatibleStackHeights(
            existing.stack.len(),
            incoming.stack.len(),
        ));
    }

    let mut stack = Vec::with_capacity(existing.stack.len());
    for (type1, type2) in existing.stack.iter().zip(&incoming.stack) {
        match merge_types(type1, type2, resolver) {
            VType::Top if *type1 != VType::Top || *type2 != VType::Top => {
                return Err(VerifierErrorKind::IncompatibleTypes(
                    type1.describe(),
                    type2.describe(),
                ))
            }
            merged => stack.push(merged),
        }
    }

    let locals_len = existing.locals.len().max(incoming.locals.len());
    let mut locals = Vec::with_capacity(locals_len);
    for slot in 0..locals_len {
        match (existing.locals.get(slot), incoming.locals.get(slot)) {
            (Some(type1), Some(type2)) => locals.push(merge_types(type1, type2, resolver)),
            _ => locals.push(VType::Top),
        }
    }

    // The second half of a `long` or `double` is only meaningful right after its first half
    for slot in 0..locals.len() {
        if locals[slot].width() == 2 && locals.get(slot + 1) != Some(&VType::Top) {
            locals[slot] = VType::Top;
        }
    }

    let merged = ExecutionFrame { locals, stack };
    if merged == *existing {
        Ok(None)
    } else {
        Ok(Some(merged))
    }
}

/// Most specific type both types can be used as (`Top` when they have nothing in common)
pub fn merge_types(type1: &VType, type2: &VType, resolver: &SymbolResolver) -> VType {
    match (type1, type2) {
        _ if type1 == type2 => type1.clone(),
        (VType::Null, VType::Object(_)) => type2.clone(),
        (VType::Object(_), VType::Null) => type1.clone(),
        (VType::Object(ref1), VType::Object(ref2)) => {
            VType::Object(resolver.common_supertype(ref1, ref2))
        }
        _ => VType::Top,
    }
}

/// Method body taken apart: labels are grouped by the instruction they precede
struct Body {
    /// `labels[i]` are placed right before instruction `i` (`labels[len]` are trailing labels)
    labels: Vec<Vec<Label>>,
    instructions: Vec<Instruction>,
}

/// Exception range with positions as instruction indices
struct ResolvedRange {
    start: usize,
    end: usize,
    handler: usize,
    caught: RefType<BinaryName>,
}

impl Body {
    fn split(code: &Code) -> Body {
        let mut labels = vec![vec![]];
        let mut instructions = vec![];
        for element in &code.elements {
            match element {
                CodeElement::Label(label) => {
                    if let Some(last) = labels.last_mut() {
                        last.push(*label);
                    }
                }
                CodeElement::Instruction(insn) => {
                    instructions.push(insn.clone());
                    labels.push(vec![]);
                }
            }
        }
        Body {
            labels,
            instructions,
        }
    }

    fn join(&self) -> Vec<CodeElement> {
        let mut elements = vec![];
        for (labels, insn) in self.labels.iter().zip(&self.instructions) {
            elements.extend(labels.iter().map(|label| CodeElement::Label(*label)));
            elements.push(CodeElement::Instruction(insn.clone()));
        }
        if let Some(trailing) = self.labels.last() {
            elements.extend(trailing.iter().map(|label| CodeElement::Label(*label)));
        }
        elements
    }

    /// Every `new` needs a label in front of it to name its uninitialized value
    fn label_allocations(&mut self, code: &mut Code) {
        for (index, insn) in self.instructions.iter().enumerate() {
            if matches!(insn, Instruction::New(_)) && self.labels[index].is_empty() {
                self.labels[index].push(code.fresh_label());
            }
        }
    }

    /// First label before an instruction, placing a fresh one if there is none
    fn label_before(&mut self, index: usize, code: &mut Code) -> Label {
        if let Some(label) = self.labels[index].first() {
            return *label;
        }
        let label = code.fresh_label();
        self.labels[index].push(label);
        label
    }

    fn positions(&self) -> HashMap<Label, usize> {
        let mut positions = HashMap::new();
        for (index, labels) in self.labels.iter().enumerate() {
            for label in labels {
                positions.insert(*label, index);
            }
        }
        positions
    }

    fn position(
        positions: &HashMap<Label, usize>,
        label: Label,
        method: &str,
    ) -> Result<usize, Error> {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| Error::InvalidEdit {
                method: method.to_owned(),
                kind: EditErrorKind::UnknownLabel(label),
            })
    }

    fn resolve_ranges(
        &self,
        ranges: &[ExceptionRange],
        constants: &ConstantPool,
        method: &str,
    ) -> Result<Vec<ResolvedRange>, Error> {
        let positions = self.positions();
        ranges
            .iter()
            .map(|range| {
                Ok(ResolvedRange {
                    start: Body::position(&positions, range.start, method)?,
                    end: Body::position(&positions, range.end, method)?,
                    handler: Body::position(&positions, range.handler, method)?,
                    caught: match range.catch_type {
                        None => RefType::Object(BinaryName::THROWABLE),
                        Some(class) => constants.class_ref_type(class)?,
                    },
                })
            })
            .collect()
    }

    /// Instructions that need a frame: jump targets, handlers, and those after a jump
    fn frame_positions(&self, code: &Code) -> BTreeSet<usize> {
        let positions = self.positions();
        let mut frame_positions = BTreeSet::new();
        let len = self.instructions.len();
        for (index, insn) in self.instructions.iter().enumerate() {
            for target in insn.jump_targets() {
                if let Some(position) = positions.get(&target) {
                    frame_positions.insert(*position);
                }
            }
            if !insn.falls_through() && index + 1 < len {
                frame_positions.insert(index + 1);
            }
        }
        for range in &code.exception_ranges {
            if let Some(position) = positions.get(&range.handler) {
                frame_positions.insert(*position);
            }
        }
        frame_positions.retain(|position| *position < len);
        frame_positions
    }

    /// Remove dead instructions, moving their labels onto the next surviving instruction
    fn strip(&mut self, dead_runs: &[(usize, usize)], frames_in: &mut Vec<Option<ExecutionFrame>>) {
        let mut labels = vec![vec![]];
        let mut instructions = vec![];
        let mut kept_frames = vec![];
        let mut runs = dead_runs.iter().peekable();
        for index in 0..self.instructions.len() {
            if let Some(pending) = labels.last_mut() {
                pending.extend(self.labels[index].iter().copied());
            }
            while runs.peek().map_or(false, |(_, end)| *end <= index) {
                runs.next();
            }
            let dead = runs
                .peek()
                .map_or(false, |(start, end)| *start <= index && index < *end);
            if !dead {
                instructions.push(self.instructions[index].clone());
                kept_frames.push(frames_in[index].take());
                labels.push(vec![]);
            }
        }
        if let (Some(pending), Some(trailing)) = (labels.last_mut(), self.labels.last()) {
            pending.extend(trailing.iter().copied());
        }
        self.labels = labels;
        self.instructions = instructions;
        *frames_in = kept_frames;
    }

    /// Drop exception ranges that no longer cover any instruction
    fn drop_empty_ranges(&self, code: &mut Code) {
        let positions = self.positions();
        code.exception_ranges.retain(|range| {
            match (positions.get(&range.start), positions.get(&range.end)) {
                (Some(start), Some(end)) => start < end,
                _ => false,
            }
        });
    }

    /// Carve dead runs out of exception ranges, so neutralized code isn't covered by handlers
    fn split_ranges(
        &mut self,
        code: &mut Code,
        dead_runs: &[(usize, usize)],
        method: &str,
    ) -> Result<(), Error> {
        let positions = self.positions();
        let mut ranges = vec![];
        for range in code.exception_ranges.clone() {
            let mut start = Body::position(&positions, range.start, method)?;
            let end = Body::position(&positions, range.end, method)?;
            let mut pieces = vec![];
            for (dead_start, dead_end) in dead_runs {
                if *dead_end <= start || end <= *dead_start {
                    continue;
                }
                if start < *dead_start {
                    pieces.push((start, *dead_start));
                }
                start = (*dead_end).max(start);
            }
            if start < end {
                pieces.push((start, end));
            }
            for (piece_start, piece_end) in pieces {
                ranges.push(ExceptionRange {
                    start: self.label_before(piece_start, code),
                    end: self.label_before(piece_end, code),
                    ..range
                });
            }
        }
        code.exception_ranges = ranges;
        Ok(())
    }
}

/// Dataflow state for one method
struct Analysis<'a, 'r> {
    method: &'a str,
    class: ClassContext<'a>,
    resolver: &'a SymbolResolver<'r>,
    body: &'a Body,
    ranges: Vec<ResolvedRange>,

    /// Frame on entry to each instruction (`None` for instructions not yet reached)
    frames_in: Vec<Option<ExecutionFrame>>,
    worklist: Vec<usize>,

    /// Whether each instruction is currently on the worklist
    queued: Vec<bool>,

    max_stack: usize,
    max_locals: usize,
}

impl<'a, 'r> Analysis<'a, 'r> {
    fn error(&self, index: usize, kind: VerifierErrorKind) -> Error {
        Error::UnverifiableControlFlow {
            method: self.method.to_owned(),
            index,
            kind,
        }
    }

    fn run(&mut self, entry: ExecutionFrame) -> Result<(), Error> {
        let body = self.body;
        if body.instructions.is_empty() {
            return Ok(());
        }
        let positions = body.positions();
        self.propagate(0, 0, entry)?;

        while let Some(index) = self.worklist.pop() {
            self.queued[index] = false;
            let before = match &self.frames_in[index] {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let insn = &body.instructions[index];

            let context = ExecutionContext {
                constants: self.class.constants,
                this_class: self.class.name,
                label: body.labels[index].first().copied(),
            };
            let mut after = before.clone();
            after
                .execute(insn, &context)
                .map_err(|kind| self.error(index, kind))?;
            self.max_stack = self.max_stack.max(after.stack_slots());
            self.max_locals = self.max_locals.max(after.locals.len());

            // Handlers see the locals from both before and after the instruction
            let covering: Vec<(usize, RefType<BinaryName>)> = self
                .ranges
                .iter()
                .filter(|range| range.start <= index && index < range.end)
                .map(|range| (range.handler, range.caught.clone()))
                .collect();
            for (handler, caught) in covering {
                self.propagate(index, handler, before.handler_frame(caught.clone()))?;
                self.propagate(index, handler, after.handler_frame(caught))?;
            }

            for target in insn.jump_targets() {
                let target = Body::position(&positions, target, self.method)?;
                self.propagate(index, target, after.clone())?;
            }

            // `jsr` comes back to the next instruction, as if it hadn't pushed anything
            let fall_through = match insn {
                Instruction::Jsr(_) => Some(before),
                _ if insn.falls_through() => Some(after),
                _ => None,
            };
            if let Some(frame) = fall_through {
                if index + 1 >= body.instructions.len() {
                    return Err(self.error(index, VerifierErrorKind::FallsOffEnd));
                }
                self.propagate(index, index + 1, frame)?;
            }
        }

        Ok(())
    }

    /// Flow a frame into an instruction, queueing the instruction if its frame changed
    fn propagate(&mut self, from: usize, to: usize, frame: ExecutionFrame) -> Result<(), Error> {
        if to >= self.body.instructions.len() {
            return Err(self.error(from, VerifierErrorKind::FallsOffEnd));
        }
        let updated = match &self.frames_in[to] {
            None => Some(frame),
            Some(existing) => merge_frames(existing, &frame, self.resolver)
                .map_err(|kind| self.error(to, kind))?,
        };
        if let Some(updated) = updated {
            self.max_stack = self.max_stack.max(updated.stack_slots());
            self.max_locals = self.max_locals.max(updated.locals.len());
            self.frames_in[to] = Some(updated);
            if !self.queued[to] {
                self.queued[to] = true;
                self.worklist.push(to);
            }
        }
        Ok(())
    }
}

/// Maximal runs `[start, end)` of instructions that were never reached
fn dead_runs(frames_in: &[Option<ExecutionFrame>]) -> Vec<(usize, usize)> {
    let mut runs = vec![];
    let mut start: Option<usize> = None;
    for (index, frame) in frames_in.iter().enumerate() {
        match (frame, start) {
            (None, None) => start = Some(index),
            (Some(_), Some(run_start)) => {
                runs.push((run_start, index));
                start = None;
            }
            _ => (),
        }
    }
    if let Some(run_start) = start {
        runs.push((run_start, frames_in.len()));
    }
    runs
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Version;
    use crate::jvm::code::{CodeElement, LabelGenerator, OrdComparison};
    use crate::jvm::resolver::{ClassHierarchy, InMemoryClassSource};
    use crate::jvm::verifier::VerificationType;
    use crate::jvm::{
        ClassAccessFlags, Referrer, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
        UnqualifiedName,
    };

    fn class(version: Version) -> ClassModel {
        ClassModel::new(
            version,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("me/Zoo").unwrap(),
            Some(BinaryName::OBJECT),
        )
    }

    fn static_method(name: &str, descriptor: &str, elements: Vec<CodeElement>, labels: LabelGenerator) -> MethodModel {
        let mut method = MethodModel::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
        );
        method.code = Some(Code::from_elements(elements, labels));
        method
    }

    fn animals() -> InMemoryClassSource {
        let mut source = InMemoryClassSource::with_java_library();
        for (name, superclass) in [("me/Animal", "java/lang/Object"), ("me/Dog", "me/Animal"), ("me/Cat", "me/Animal")] {
            source.insert(ClassHierarchy {
                name: BinaryName::from_str(name).unwrap(),
                superclass: Some(BinaryName::from_str(superclass).unwrap()),
                interfaces: vec![],
                access_flags: ClassAccessFlags::PUBLIC,
            });
        }
        source
    }

    fn run(class: &ClassModel, method: &mut MethodModel, settings: &Settings) -> Result<(), Error> {
        let source = animals();
        let resolver = SymbolResolver::new(&source);
        recompute(method, class.context(), &resolver, settings)
    }

    #[test]
    fn branch_gets_a_frame() {
        use Instruction::*;

        let class = class(Version::JAVA8);
        let mut labels = LabelGenerator::new();
        let second = labels.fresh_label();
        let elements = vec![
            ILoad(0).into(),
            ILoad(1).into(),
            IfICmp(OrdComparison::LT, second).into(),
            ILoad(0).into(),
            IReturn.into(),
            second.into(),
            ILoad(1).into(),
            IReturn.into(),
        ];
        let mut method = static_method("max", "(II)I", elements, labels);
        run(&class, &mut method, &Settings::new()).unwrap();

        let code = method.code.as_ref().unwrap();
        assert!(!code.is_stale());
        assert_eq!(code.max_stack(), 2);
        assert_eq!(code.max_locals(), 2);
        assert_eq!(
            code.frames(),
            &[(
                second,
                ModelFrame {
                    locals: vec![VerificationType::Integer, VerificationType::Integer],
                    stack: vec![],
                }
            )]
        );
    }

    #[test]
    fn references_merge_to_common_superclass() {
        use Instruction::*;

        let mut class = class(Version::JAVA8);
        let dog = class.constants.get_class("me/Dog").unwrap();
        let cat = class.constants.get_class("me/Cat").unwrap();
        let mut labels = LabelGenerator::new();
        let is_cat = labels.fresh_label();
        let done = labels.fresh_label();
        let elements = vec![
            ILoad(0).into(),
            If(OrdComparison::EQ, is_cat).into(),
            AConstNull.into(),
            CheckCast(dog).into(),
            Goto(done).into(),
            is_cat.into(),
            AConstNull.into(),
            CheckCast(cat).into(),
            done.into(),
            AReturn.into(),
        ];
        let mut method = static_method("pick", "(I)Lme/Animal;", elements, labels);
        run(&class, &mut method, &Settings::new()).unwrap();

        let code = method.code.as_ref().unwrap();
        let animal = RefType::Object(BinaryName::from_str("me/Animal").unwrap());
        assert_eq!(
            code.frame_at(done).map(|frame| frame.stack.clone()),
            Some(vec![VerificationType::Object(animal)])
        );
        assert!(code.frame_at(is_cat).is_some());
        assert_eq!(code.max_stack(), 1);
    }

    #[test]
    fn stack_heights_must_agree() {
        use Instruction::*;

        let class = class(Version::JAVA8);
        let mut labels = LabelGenerator::new();
        let join = labels.fresh_label();
        let elements = vec![
            ILoad(0).into(),
            If(OrdComparison::EQ, join).into(),
            IConst0.into(),
            join.into(),
            Return.into(),
        ];
        let mut method = static_method("bad", "(I)V", elements, labels);
        let err = run(&class, &mut method, &Settings::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnverifiableControlFlow {
                kind: VerifierErrorKind::IncompatibleStackHeights(_, _),
                ..
            }
        ));
    }

    #[test]
    fn subroutines_need_old_versions() {
        use Instruction::*;

        let elements = |labels: &mut LabelGenerator| {
            let subroutine = labels.fresh_label();
            vec![
                Jsr(subroutine).into(),
                Return.into(),
                subroutine.into(),
                AStore(0).into(),
                Ret(0).into(),
            ]
        };

        let mut labels = LabelGenerator::new();
        let code = elements(&mut labels);
        let mut method = static_method("sub", "()V", code, labels);
        let err = run(&class(Version::JAVA8), &mut method, &Settings::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnverifiableControlFlow {
                index: 0,
                kind: VerifierErrorKind::SubroutineWithFrames,
                ..
            }
        ));

        let old = Version {
            minor_version: 0,
            major_version: 49,
        };
        let mut labels = LabelGenerator::new();
        let code = elements(&mut labels);
        let mut method = static_method("sub", "()V", code, labels);
        run(&class(old), &mut method, &Settings::new()).unwrap();
        let code = method.code.as_ref().unwrap();
        assert!(code.frames().is_empty());
        assert_eq!(code.max_locals(), 1);
        assert_eq!(code.max_stack(), 1);
    }

    #[test]
    fn unreachable_code_policies() {
        use Instruction::*;

        let dead_code = || vec![Return.into(), IConst0.into(), Pop.into(), Return.into()];
        let instructions = |method: &MethodModel| -> Vec<Instruction> {
            method.code.as_ref().unwrap().instructions().cloned().collect()
        };

        let mut settings = Settings::new();
        let mut method = static_method("dead", "()V", dead_code(), LabelGenerator::new());
        run(&class(Version::JAVA8), &mut method, &settings).unwrap();
        assert_eq!(instructions(&method), vec![Return, IConst0, Pop, Return]);
        assert_eq!(method.code.as_ref().unwrap().frames().len(), 1);

        settings.unreachable_code = UnreachableCode::Neutralize;
        let mut method = static_method("dead", "()V", dead_code(), LabelGenerator::new());
        run(&class(Version::JAVA8), &mut method, &settings).unwrap();
        assert_eq!(instructions(&method), vec![Return, Nop, Nop, AThrow]);
        let frames = method.code.as_ref().unwrap().frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].1.stack,
            vec![VerificationType::Object(RefType::Object(BinaryName::THROWABLE))]
        );

        settings.unreachable_code = UnreachableCode::Strip;
        let mut method = static_method("dead", "()V", dead_code(), LabelGenerator::new());
        run(&class(Version::JAVA8), &mut method, &settings).unwrap();
        assert_eq!(instructions(&method), vec![Return]);
        assert!(method.code.as_ref().unwrap().frames().is_empty());
    }

    #[test]
    fn handlers_see_locals_from_both_sides() {
        use Instruction::*;

        let class = class(Version::JAVA8);
        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let handler = labels.fresh_label();
        let elements = vec![
            start.into(),
            ILoad(0).into(),
            IStore(1).into(),
            end.into(),
            Return.into(),
            handler.into(),
            AThrow.into(),
        ];
        let mut method = static_method("guarded", "(I)V", elements, labels);
        method.code.as_mut().unwrap().exception_ranges.push(ExceptionRange {
            start,
            end,
            handler,
            catch_type: None,
        });
        run(&class, &mut method, &Settings::new()).unwrap();

        // Local 1 is only set after the store, so the handler can't rely on it
        let code = method.code.as_ref().unwrap();
        assert_eq!(
            code.frame_at(handler),
            Some(&ModelFrame {
                locals: vec![VerificationType::Integer],
                stack: vec![VerificationType::Object(RefType::Object(BinaryName::THROWABLE))],
            })
        );
        assert_eq!(code.max_locals(), 2);
        assert_eq!(code.max_stack(), 1);
    }

    #[test]
    fn neutralized_code_leaves_exception_ranges() {
        use Instruction::*;

        let class = class(Version::JAVA8);
        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let live = labels.fresh_label();
        let end = labels.fresh_label();
        let handler = labels.fresh_label();
        let elements = vec![
            start.into(),
            Goto(live).into(),
            IConst0.into(),
            Pop.into(),
            live.into(),
            Return.into(),
            end.into(),
            handler.into(),
            AThrow.into(),
        ];
        let mut method = static_method("skip", "()V", elements, labels);
        method.code.as_mut().unwrap().exception_ranges.push(ExceptionRange {
            start,
            end,
            handler,
            catch_type: None,
        });
        let mut settings = Settings::new();
        settings.unreachable_code = UnreachableCode::Neutralize;
        run(&class, &mut method, &settings).unwrap();

        let code = method.code.as_ref().unwrap();
        let instructions: Vec<Instruction> = code.instructions().cloned().collect();
        assert_eq!(instructions, vec![Goto(live), Nop, AThrow, Return, AThrow]);

        let positions = code.label_positions();
        let covered: Vec<(usize, usize)> = code
            .exception_ranges()
            .iter()
            .map(|range| {
                assert_eq!(range.handler, handler);
                (positions[&range.start], positions[&range.end])
            })
            .collect();
        assert_eq!(covered, vec![(0, 1), (3, 4)]);
        assert_eq!(code.exception_ranges()[0].start, start);
        assert_eq!(code.exception_ranges()[1].start, live);
    }

    #[test]
    fn unplaced_target_is_a_dangling_reference() {
        let class = class(Version::JAVA8);
        let mut labels = LabelGenerator::new();
        let nowhere = labels.fresh_label();
        let mut method = static_method("g", "()V", vec![Instruction::Goto(nowhere).into()], labels);
        let err = run(&class, &mut method, &Settings::new()).unwrap_err();
        match err {
            Error::DanglingReference {
                method,
                label,
                referrer,
            } => {
                assert_eq!(method, "g()V");
                assert_eq!(label, nowhere);
                assert!(matches!(referrer, Referrer::Instruction { index: 0, .. }));
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn falling_off_the_end() {
        use Instruction::*;

        let mut method = static_method(
            "oops",
            "()V",
            vec![IConst0.into(), Pop.into()],
            LabelGenerator::new(),
        );
        let err = run(&class(Version::JAVA8), &mut method, &Settings::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnverifiableControlFlow {
                index: 1,
                kind: VerifierErrorKind::FallsOffEnd,
                ..
            }
        ));
    }

    #[test]
    fn locals_merge_to_top() {
        let source = animals();
        let resolver = SymbolResolver::new(&source);
        let existing = ExecutionFrame {
            locals: vec![VType::Integer, VType::Long, VType::Top],
            stack: vec![VType::Null],
        };
        let incoming = ExecutionFrame {
            locals: vec![VType::Float, VType::Long, VType::Top, VType::Integer],
            stack: vec![VType::Object(RefType::Object(BinaryName::STRING))],
        };
        let merged = merge_frames(&existing, &incoming, &resolver).unwrap().unwrap();
        assert_eq!(
            merged,
            ExecutionFrame {
                locals: vec![VType::Top, VType::Long, VType::Top, VType::Top],
                stack: vec![VType::Object(RefType::Object(BinaryName::STRING))],
            }
        );
        assert_eq!(merge_frames(&merged, &incoming, &resolver).unwrap(), None);
    }
}
