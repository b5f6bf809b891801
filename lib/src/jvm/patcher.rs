//! Editing method bodies without breaking label references
//!
//! The [`Patcher`] is the only way passes should touch instructions. Every edit is checked
//! against the labels the rest of the method relies on (branches, exception ranges) and rejected
//! if it would leave one of them dangling. Debug information (line numbers, local variable
//! ranges) is treated as disposable: entries pointing into removed code are dropped instead.
//!
//! Each successful edit marks the method metadata as stale.

use crate::jvm::code::{CodeElement, Instruction, Label};
use crate::jvm::model::{Code, ExceptionRange, MethodModel};
use crate::jvm::{EditErrorKind, Error, Referrer};
use log::debug;
use std::collections::HashSet;

/// Edits the body of one method
pub struct Patcher<'m> {
    method: String,
    code: &'m mut Code,
}

impl<'m> Patcher<'m> {
    /// Start editing a method (fails if the method has no code)
    pub fn new(method: &'m mut MethodModel) -> Result<Patcher<'m>, Error> {
        let name = method.member_name();
        match method.code.as_mut() {
            Some(code) => Ok(Patcher { method: name, code }),
            None => Err(Error::InvalidEdit {
                method: name,
                kind: EditErrorKind::NoCode,
            }),
        }
    }

    pub fn code(&self) -> &Code {
        self.code
    }

    /// Label for use in fragments passed to this patcher
    pub fn fresh_label(&mut self) -> Label {
        self.code.fresh_label()
    }

    fn invalid(&self, kind: EditErrorKind) -> Error {
        Error::InvalidEdit {
            method: self.method.clone(),
            kind,
        }
    }

    /// Position of a placed label among the elements
    fn element_position(&self, label: Label) -> Result<usize, Error> {
        self.code
            .elements
            .iter()
            .position(|element| *element == CodeElement::Label(label))
            .ok_or_else(|| self.invalid(EditErrorKind::UnknownLabel(label)))
    }

    /// Check that a fragment can be spliced in: its labels are new and its jumps land somewhere
    fn check_fragment(&self, fragment: &[CodeElement]) -> Result<(), Error> {
        let placed = self.placed_labels();
        let mut defined: HashSet<Label> = HashSet::new();
        for element in fragment {
            if let CodeElement::Label(label) = element {
                if placed.contains(label) || !defined.insert(*label) {
                    return Err(self.invalid(EditErrorKind::DuplicateLabel(*label)));
                }
            }
        }
        for element in fragment {
            if let CodeElement::Instruction(insn) = element {
                for target in insn.jump_targets() {
                    if !placed.contains(&target) && !defined.contains(&target) {
                        return Err(self.invalid(EditErrorKind::UnknownLabel(target)));
                    }
                }
            }
        }
        Ok(())
    }

    fn placed_labels(&self) -> HashSet<Label> {
        self.code
            .elements
            .iter()
            .filter_map(|element| match element {
                CodeElement::Label(label) => Some(*label),
                CodeElement::Instruction(_) => None,
            })
            .collect()
    }

    fn splice(&mut self, position: usize, fragment: Vec<CodeElement>) {
        self.code.mark_stale();
        let _ = self.code.elements.splice(position..position, fragment);
    }

    /// Insert elements right before a label (jumps to the label skip the new code)
    pub fn insert_before(&mut self, label: Label, fragment: Vec<CodeElement>) -> Result<(), Error> {
        self.check_fragment(&fragment)?;
        let position = self.element_position(label)?;
        self.splice(position, fragment);
        Ok(())
    }

    /// Insert elements right after a label (jumps to the label run the new code)
    pub fn insert_after(&mut self, label: Label, fragment: Vec<CodeElement>) -> Result<(), Error> {
        self.check_fragment(&fragment)?;
        let position = self.element_position(label)?;
        self.splice(position + 1, fragment);
        Ok(())
    }

    /// Insert elements at the very start of the method, before any label
    pub fn insert_at_start(&mut self, fragment: Vec<CodeElement>) -> Result<(), Error> {
        self.check_fragment(&fragment)?;
        self.splice(0, fragment);
        Ok(())
    }

    /// Remove everything between the `start` and `end` labels (which both stay in place)
    ///
    /// Labels placed inside the range go with it, so this fails with
    /// [`Error::DanglingReference`] if one of them is still used by an instruction outside the
    /// range or by an exception range. Line numbers and local variable entries using them are
    /// dropped, as are exception ranges left covering no instructions.
    pub fn remove(&mut self, start: Label, end: Label) -> Result<Vec<CodeElement>, Error> {
        let start_position = self.element_position(start)?;
        let end_position = self.element_position(end)?;
        if end_position < start_position {
            return Err(self.invalid(EditErrorKind::InvertedRange { start, end }));
        }

        let removed_range = start_position + 1..end_position;
        let removed_labels: HashSet<Label> = self.code.elements[removed_range.clone()]
            .iter()
            .filter_map(|element| match element {
                CodeElement::Label(label) => Some(*label),
                CodeElement::Instruction(_) => None,
            })
            .collect();

        // Anything left behind must not refer to the labels going away
        let mut insn_index = 0;
        for (position, element) in self.code.elements.iter().enumerate() {
            if let CodeElement::Instruction(insn) = element {
                if !removed_range.contains(&position) {
                    if let Some(label) = insn
                        .jump_targets()
                        .into_iter()
                        .find(|target| removed_labels.contains(target))
                    {
                        return Err(self.dangling(
                            label,
                            Referrer::Instruction {
                                index: insn_index,
                                rendered: format!("{:?}", insn),
                            },
                        ));
                    }
                }
                insn_index += 1;
            }
        }
        for (index, range) in self.code.exception_ranges.iter().enumerate() {
            for label in [range.start, range.end, range.handler] {
                if removed_labels.contains(&label) {
                    return Err(self.dangling(label, Referrer::ExceptionRange { index }));
                }
            }
        }

        self.code.mark_stale();
        let removed: Vec<CodeElement> = self.code.elements.drain(removed_range).collect();
        self.drop_debug_info(&removed_labels);
        self.drop_empty_ranges();
        debug!(
            "{}: removed {} element(s) between {:?} and {:?}",
            self.method,
            removed.len(),
            start,
            end
        );
        Ok(removed)
    }

    fn dangling(&self, label: Label, referrer: Referrer) -> Error {
        Error::DanglingReference {
            method: self.method.clone(),
            label,
            referrer,
        }
    }

    fn drop_empty_ranges(&mut self) {
        let positions = self.code.label_positions();
        let before = self.code.exception_ranges.len();
        self.code.exception_ranges.retain(|range| {
            match (positions.get(&range.start), positions.get(&range.end)) {
                (Some(start), Some(end)) => start < end,
                _ => false,
            }
        });
        let dropped = before - self.code.exception_ranges.len();
        if dropped > 0 {
            debug!("{}: dropped {} emptied exception range(s)", self.method, dropped);
        }
    }

    fn drop_debug_info(&mut self, removed_labels: &HashSet<Label>) {
        let code = &mut *self.code;
        code.line_numbers
            .retain(|entry| !removed_labels.contains(&entry.start));
        code.local_variables.retain(|entry| {
            !removed_labels.contains(&entry.start) && !removed_labels.contains(&entry.end)
        });
        code.local_variable_types.retain(|entry| {
            !removed_labels.contains(&entry.start) && !removed_labels.contains(&entry.end)
        });
    }

    /// Mutable access to the instruction at `index` (counting instructions only)
    fn instruction_mut(&mut self, index: usize) -> Result<&mut Instruction, Error> {
        let found = self
            .code
            .elements
            .iter_mut()
            .filter_map(|element| match element {
                CodeElement::Instruction(insn) => Some(insn),
                CodeElement::Label(_) => None,
            })
            .nth(index);
        match found {
            Some(insn) => Ok(insn),
            None => Err(Error::InvalidEdit {
                method: self.method.clone(),
                kind: EditErrorKind::NoSuchInstruction(index),
            }),
        }
    }

    /// Replace the instruction at `index` (counting instructions only)
    pub fn replace(&mut self, index: usize, insn: Instruction) -> Result<Instruction, Error> {
        self.check_fragment(&[CodeElement::Instruction(insn.clone())])?;
        let old = std::mem::replace(self.instruction_mut(index)?, insn);
        self.code.mark_stale();
        Ok(old)
    }

    /// Make the instruction at `index` jump to `to` wherever it jumped to `from`
    pub fn retarget(&mut self, index: usize, from: Label, to: Label) -> Result<(), Error> {
        self.element_position(to)?;
        let method = self.method.clone();
        let insn = self.instruction_mut(index)?;
        let mut found = false;
        for target in insn.jump_targets_mut() {
            if *target == from {
                *target = to;
                found = true;
            }
        }
        if !found {
            return Err(Error::InvalidEdit {
                method,
                kind: EditErrorKind::NotATarget { index, label: from },
            });
        }
        self.code.mark_stale();
        Ok(())
    }

    /// Point every branch and exception range using `from` at `to` instead
    ///
    /// Returns how many references were updated.
    pub fn redirect(&mut self, from: Label, to: Label) -> Result<usize, Error> {
        self.element_position(to)?;
        let mut updated = 0;
        for element in &mut self.code.elements {
            if let CodeElement::Instruction(insn) = element {
                for target in insn.jump_targets_mut() {
                    if *target == from {
                        *target = to;
                        updated += 1;
                    }
                }
            }
        }
        for range in &mut self.code.exception_ranges {
            for label in [&mut range.start, &mut range.end, &mut range.handler] {
                if *label == from {
                    *label = to;
                    updated += 1;
                }
            }
        }
        if updated > 0 {
            self.code.mark_stale();
        }
        Ok(updated)
    }

    /// Add an exception range, at `index` in the exception table (earlier ranges take priority)
    pub fn insert_exception_range(&mut self, index: usize, range: ExceptionRange) -> Result<(), Error> {
        let start = self.element_position(range.start)?;
        let end = self.element_position(range.end)?;
        self.element_position(range.handler)?;
        if end < start {
            return Err(self.invalid(EditErrorKind::InvertedRange {
                start: range.start,
                end: range.end,
            }));
        }
        let index = index.min(self.code.exception_ranges.len());
        self.code.mark_stale();
        self.code.exception_ranges.insert(index, range);
        Ok(())
    }

    /// Add an exception range with the lowest priority
    pub fn push_exception_range(&mut self, range: ExceptionRange) -> Result<(), Error> {
        let index = self.code.exception_ranges.len();
        self.insert_exception_range(index, range)
    }

    pub fn remove_exception_range(&mut self, index: usize) -> Result<ExceptionRange, Error> {
        if index >= self.code.exception_ranges.len() {
            return Err(self.invalid(EditErrorKind::NoSuchExceptionRange(index)));
        }
        self.code.mark_stale();
        Ok(self.code.exception_ranges.remove(index))
    }

    /// Drop line numbers and local variable tables
    ///
    /// This doesn't change any instruction, so it leaves the metadata alone. Returns whether
    /// anything was dropped.
    pub fn clear_debug_info(&mut self) -> bool {
        let code = &mut *self.code;
        let had_any = !code.line_numbers.is_empty()
            || !code.local_variables.is_empty()
            || !code.local_variable_types.is_empty();
        if had_any {
            code.line_numbers.clear();
            code.local_variables.clear();
            code.local_variable_types.clear();
            code.original = None;
        }
        had_any
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::LabelGenerator;
    use crate::jvm::code::OrdComparison;
    use crate::jvm::model::{ClassModel, LineNumberEntry};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};

    /// `static void loop(int)` with a backwards branch, and labels `[start, body, exit, end]`
    fn looping_method() -> (MethodModel, [Label; 4]) {
        use Instruction::*;

        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let body = labels.fresh_label();
        let exit = labels.fresh_label();
        let end = labels.fresh_label();
        let elements = vec![
            start.into(),
            ILoad(0).into(),
            If(OrdComparison::LE, exit).into(),
            body.into(),
            IInc(0, -1).into(),
            Goto(start).into(),
            exit.into(),
            Return.into(),
            end.into(),
        ];
        let mut method = MethodModel::new(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_str("loop").unwrap(),
            MethodDescriptor::parse("(I)V").unwrap(),
        );
        let mut code = Code::from_elements(elements, labels);
        code.stale = false;
        code.line_numbers.push(LineNumberEntry { start: body, line: 7 });
        method.code = Some(code);
        (method, [start, body, exit, end])
    }

    #[test]
    fn removing_a_branch_target_fails() {
        let (mut method, [_, body, exit, end]) = looping_method();
        let mut patcher = Patcher::new(&mut method).unwrap();

        // `exit` is used by the `if` at instruction #1, which stays
        match patcher.remove(body, end).unwrap_err() {
            Error::DanglingReference {
                method,
                label,
                referrer,
            } => {
                assert_eq!(method, "loop(I)V");
                assert_eq!(label, exit);
                assert!(matches!(referrer, Referrer::Instruction { index: 1, .. }));
            }
            other => panic!("unexpected error {}", other),
        }

        // Nothing changed
        assert!(!method.code.as_ref().unwrap().is_stale());
    }

    #[test]
    fn removal_drops_debug_info() {
        let (mut method, [start, body, exit, _]) = looping_method();
        let mut patcher = Patcher::new(&mut method).unwrap();

        // The loop body: `iinc` and a `goto` whose target stays
        let removed = patcher.remove(body, exit).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(patcher.code().is_stale());
        assert_eq!(patcher.code().instructions().count(), 3);
        assert_eq!(patcher.code().line_numbers().len(), 1);

        // The loop header, taking the `body` label and its line number with it
        let removed = patcher.remove(start, exit).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(patcher.code().line_numbers().is_empty());
        assert_eq!(
            patcher.code().instructions().cloned().collect::<Vec<_>>(),
            vec![Instruction::Return]
        );

        // Empty ranges are fine
        assert!(patcher.remove(exit, exit).unwrap().is_empty());
    }

    #[test]
    fn exception_ranges_are_referrers() {
        let (mut method, [start, body, exit, end]) = looping_method();
        let mut patcher = Patcher::new(&mut method).unwrap();
        patcher
            .push_exception_range(ExceptionRange {
                start: body,
                end: exit,
                handler: exit,
                catch_type: None,
            })
            .unwrap();

        match patcher.remove(start, end).unwrap_err() {
            Error::DanglingReference { label, referrer, .. } => {
                assert_eq!(label, body);
                assert_eq!(referrer, Referrer::ExceptionRange { index: 0 });
            }
            other => panic!("unexpected error {}", other),
        }

        let removed = patcher.remove_exception_range(0).unwrap();
        assert_eq!(removed.handler, exit);
        assert!(patcher.remove_exception_range(0).is_err());
    }

    #[test]
    fn emptied_exception_ranges_are_dropped() {
        use crate::jvm::class_file::Version;
        use crate::jvm::resolver::{InMemoryClassSource, SymbolResolver};
        use crate::jvm::{emitter, frames, loader, BinaryName, ClassAccessFlags};
        use crate::settings::Settings;
        use Instruction::*;

        let mut labels = LabelGenerator::new();
        let start = labels.fresh_label();
        let end = labels.fresh_label();
        let handler = labels.fresh_label();
        let elements = vec![
            start.into(),
            Nop.into(),
            end.into(),
            Return.into(),
            handler.into(),
            AThrow.into(),
        ];
        let mut method = MethodModel::new(
            MethodAccessFlags::STATIC,
            UnqualifiedName::from_str("guarded").unwrap(),
            MethodDescriptor::parse("()V").unwrap(),
        );
        let mut code = Code::from_elements(elements, labels);
        code.exception_ranges.push(ExceptionRange {
            start,
            end,
            handler,
            catch_type: None,
        });
        method.code = Some(code);

        let mut patcher = Patcher::new(&mut method).unwrap();
        assert_eq!(patcher.remove(start, end).unwrap(), vec![CodeElement::Instruction(Nop)]);
        assert!(patcher.code().exception_ranges().is_empty());

        let mut class = ClassModel::new(
            Version::JAVA8,
            ClassAccessFlags::PUBLIC,
            BinaryName::from_str("me/Guarded").unwrap(),
            Some(BinaryName::OBJECT),
        );
        let source = InMemoryClassSource::with_java_library();
        let resolver = SymbolResolver::new(&source);
        frames::recompute(&mut method, class.context(), &resolver, &Settings::new()).unwrap();
        class.methods.push(method);

        let reloaded = loader::load(&emitter::emit(&class).unwrap()).unwrap();
        let code = reloaded.methods[0].code.as_ref().unwrap();
        assert!(code.exception_ranges().is_empty());
        assert_eq!(code.instructions().cloned().collect::<Vec<_>>(), vec![Return, AThrow]);
    }

    #[test]
    fn fragments_are_checked() {
        use Instruction::*;

        let (mut method, [start, body, _, _]) = looping_method();
        let mut patcher = Patcher::new(&mut method).unwrap();

        // Label already placed
        let err = patcher.insert_before(body, vec![start.into(), Nop.into()]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEdit {
                kind: EditErrorKind::DuplicateLabel(_),
                ..
            }
        ));

        // Jump to a label placed nowhere
        let nowhere = patcher.fresh_label();
        let err = patcher.insert_before(body, vec![Goto(nowhere).into()]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEdit {
                kind: EditErrorKind::UnknownLabel(_),
                ..
            }
        ));

        // Jump to a label the fragment itself places
        let skip = patcher.fresh_label();
        patcher
            .insert_at_start(vec![Goto(skip).into(), Nop.into(), skip.into()])
            .unwrap();
        let instructions: Vec<Instruction> = patcher.code().instructions().cloned().collect();
        assert_eq!(instructions[0], Goto(skip));
        assert_eq!(instructions[1], Nop);
        assert_eq!(instructions[2], ILoad(0));
    }

    #[test]
    fn retargeting_and_redirecting() {
        use Instruction::*;

        let (mut method, [start, body, exit, end]) = looping_method();
        let mut patcher = Patcher::new(&mut method).unwrap();

        patcher.retarget(3, start, body).unwrap();
        assert!(patcher.retarget(3, start, body).is_err());
        assert!(patcher.retarget(9, start, body).is_err());

        assert_eq!(patcher.redirect(exit, end).unwrap(), 1);
        let instructions: Vec<Instruction> = patcher.code().instructions().cloned().collect();
        assert_eq!(instructions[1], If(OrdComparison::LE, end));
        assert_eq!(instructions[3], Goto(body));

        assert!(patcher.clear_debug_info());
        assert!(!patcher.clear_debug_info());
    }

    #[test]
    fn methods_without_code() {
        let mut method = MethodModel::new(
            MethodAccessFlags::ABSTRACT,
            UnqualifiedName::from_str("run").unwrap(),
            MethodDescriptor::parse("()V").unwrap(),
        );
        assert!(matches!(
            Patcher::new(&mut method),
            Err(Error::InvalidEdit {
                kind: EditErrorKind::NoCode,
                ..
            })
        ));
    }
}
