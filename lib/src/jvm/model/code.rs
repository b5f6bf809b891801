use crate::jvm::class_file::{Attribute, ClassConstantIndex, Utf8ConstantIndex};
use crate::jvm::code::{CodeElement, Instruction, Label, LabelGenerator};
use crate::jvm::verifier::{ModelFrame, VerificationType};
use crate::jvm::{Error, Referrer};
use log::warn;
use std::collections::HashMap;

/// Method body, with branch targets and ranges expressed as labels
///
/// Besides the instructions themselves, the body carries metadata computed from them: the stack
/// map frames, max stack, and max locals. Any edit marks that metadata as stale (see
/// [`Code::is_stale`]) and it then has to be recomputed before the class can be emitted.
///
/// Code that has never been edited keeps the raw `Code` attribute it was loaded from, so that it
/// can be written back out unchanged.
#[derive(Debug, Clone)]
pub struct Code {
    pub(crate) elements: Vec<CodeElement>,
    pub(crate) exception_ranges: Vec<ExceptionRange>,
    pub(crate) line_numbers: Vec<LineNumberEntry>,
    pub(crate) local_variables: Vec<LocalVariableEntry>,
    pub(crate) local_variable_types: Vec<LocalVariableEntry>,

    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,

    /// Frames in code order, at most one per label position
    pub(crate) frames: Vec<(Label, ModelFrame)>,

    /// Code attributes that are not interpreted
    pub(crate) other_attributes: Vec<Attribute>,

    pub(crate) stale: bool,
    pub(crate) original: Option<Attribute>,
    pub(crate) labels: LabelGenerator,
}

/// Entry in the exception table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRange {
    /// Start of the covered range (inclusive)
    pub start: Label,

    /// End of the covered range (exclusive)
    pub end: Label,

    pub handler: Label,

    /// `None` catches everything
    pub catch_type: Option<ClassConstantIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start: Label,
    pub line: u16,
}

/// Entry from a `LocalVariableTable` or `LocalVariableTypeTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start: Label,
    pub end: Label,
    pub name: Utf8ConstantIndex,

    /// Descriptor or generic signature, depending on the table
    pub descriptor: Utf8ConstantIndex,
    pub index: u16,
}

impl Default for Code {
    fn default() -> Self {
        Code::new()
    }
}

impl Code {
    /// Empty method body, with stale metadata
    pub fn new() -> Code {
        Code {
            elements: vec![],
            exception_ranges: vec![],
            line_numbers: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            max_stack: 0,
            max_locals: 0,
            frames: vec![],
            other_attributes: vec![],
            stale: true,
            original: None,
            labels: LabelGenerator::new(),
        }
    }

    /// Method body made of the given elements (labels must come from `labels`)
    pub fn from_elements(elements: Vec<CodeElement>, labels: LabelGenerator) -> Code {
        Code {
            elements,
            labels,
            ..Code::new()
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Append an instruction at the end of the body
    pub fn push_instruction(&mut self, insn: Instruction) {
        self.mark_stale();
        self.elements.push(CodeElement::Instruction(insn));
    }

    /// Place a label at the end of the body
    pub fn place_label(&mut self, label: Label) {
        self.mark_stale();
        self.elements.push(CodeElement::Label(label));
    }

    pub fn elements(&self) -> &[CodeElement] {
        &self.elements
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.elements.iter().filter_map(|element| match element {
            CodeElement::Instruction(insn) => Some(insn),
            CodeElement::Label(_) => None,
        })
    }

    /// Labels placed right before instruction `index` (or trailing labels, if `index` is past
    /// the last instruction)
    pub fn labels_before(&self, index: usize) -> Vec<Label> {
        let mut seen = 0;
        let mut labels = vec![];
        for element in &self.elements {
            match element {
                CodeElement::Label(label) => labels.push(*label),
                CodeElement::Instruction(_) if seen == index => return labels,
                CodeElement::Instruction(_) => {
                    seen += 1;
                    labels.clear();
                }
            }
        }
        labels
    }

    pub fn exception_ranges(&self) -> &[ExceptionRange] {
        &self.exception_ranges
    }

    pub fn line_numbers(&self) -> &[LineNumberEntry] {
        &self.line_numbers
    }

    pub fn local_variables(&self) -> &[LocalVariableEntry] {
        &self.local_variables
    }

    pub fn local_variable_types(&self) -> &[LocalVariableEntry] {
        &self.local_variable_types
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn frames(&self) -> &[(Label, ModelFrame)] {
        &self.frames
    }

    /// Frame at a label, if there is one
    pub fn frame_at(&self, label: Label) -> Option<&ModelFrame> {
        self.frames
            .iter()
            .find(|(frame_label, _)| *frame_label == label)
            .map(|(_, frame)| frame)
    }

    /// Code attributes that are not interpreted (dropped once the code is edited)
    pub fn other_attributes(&self) -> &[Attribute] {
        &self.other_attributes
    }

    /// Have there been edits since the frames, max stack, and max locals were computed?
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Is this still the body that was loaded, byte for byte?
    pub fn is_original(&self) -> bool {
        self.original.is_some()
    }

    /// Record that the instructions changed
    ///
    /// Frames are dropped right away since they may refer to labels that are about to go.
    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.original = None;
        self.frames.clear();
        if !self.other_attributes.is_empty() {
            warn!(
                "Dropping {} unrecognized code attribute(s) from edited code",
                self.other_attributes.len()
            );
            self.other_attributes.clear();
        }
    }

    /// Is this label placed somewhere in the body?
    pub fn has_label(&self, label: Label) -> bool {
        self.elements
            .iter()
            .any(|element| *element == CodeElement::Label(label))
    }

    /// Placed labels, each with the number of instructions before it
    pub fn label_positions(&self) -> HashMap<Label, usize> {
        let mut positions = HashMap::new();
        let mut seen = 0;
        for element in &self.elements {
            match element {
                CodeElement::Label(label) => {
                    positions.insert(*label, seen);
                }
                CodeElement::Instruction(_) => seen += 1,
            }
        }
        positions
    }

    /// Check that every label used by the body is placed in it
    ///
    /// Fails with [`Error::DanglingReference`] naming the first thing that still uses a missing
    /// label.
    pub fn check_labels(&self, method: &str) -> Result<(), Error> {
        let placed = self.label_positions();
        let dangling = |label: Label, referrer: Referrer| -> Result<(), Error> {
            if placed.contains_key(&label) {
                Ok(())
            } else {
                Err(Error::DanglingReference {
                    method: method.to_owned(),
                    label,
                    referrer,
                })
            }
        };

        for (index, insn) in self.instructions().enumerate() {
            for target in insn.jump_targets() {
                dangling(
                    target,
                    Referrer::Instruction {
                        index,
                        rendered: format!("{:?}", insn),
                    },
                )?;
            }
        }
        for (index, range) in self.exception_ranges.iter().enumerate() {
            for label in [range.start, range.end, range.handler] {
                dangling(label, Referrer::ExceptionRange { index })?;
            }
        }
        for (index, (label, frame)) in self.frames.iter().enumerate() {
            dangling(*label, Referrer::Frame { index })?;
            for vtype in frame.locals.iter().chain(&frame.stack) {
                if let VerificationType::Uninitialized(new_label) = vtype {
                    dangling(*new_label, Referrer::Frame { index })?;
                }
            }
        }
        for (index, entry) in self.line_numbers.iter().enumerate() {
            dangling(entry.start, Referrer::LineNumber { index })?;
        }
        for (index, entry) in self.local_variables.iter().enumerate() {
            dangling(entry.start, Referrer::LocalVariable { index })?;
            dangling(entry.end, Referrer::LocalVariable { index })?;
        }
        for (index, entry) in self.local_variable_types.iter().enumerate() {
            dangling(entry.start, Referrer::LocalVariableType { index })?;
            dangling(entry.end, Referrer::LocalVariableType { index })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_before_instructions() {
        let mut code = Code::new();
        let start = code.fresh_label();
        let end = code.fresh_label();
        code.place_label(start);
        code.push_instruction(Instruction::IConst0);
        code.push_instruction(Instruction::IReturn);
        code.place_label(end);

        assert_eq!(code.labels_before(0), vec![start]);
        assert_eq!(code.labels_before(1), vec![]);
        assert_eq!(code.labels_before(2), vec![end]);
        assert!(code.has_label(end));
        assert!(code.is_stale());
        assert!(!code.is_original());
        assert_eq!(code.instructions().count(), 2);
    }

    #[test]
    fn unplaced_labels_are_reported_with_their_user() {
        let mut code = Code::new();
        let start = code.fresh_label();
        let nowhere = code.fresh_label();
        code.place_label(start);
        code.push_instruction(Instruction::IConst0);
        code.push_instruction(Instruction::Return);
        assert_eq!(code.label_positions().get(&start), Some(&0));
        assert!(code.check_labels("run()V").is_ok());

        code.line_numbers.push(LineNumberEntry {
            start: nowhere,
            line: 3,
        });
        match code.check_labels("run()V").unwrap_err() {
            Error::DanglingReference {
                method,
                label,
                referrer,
            } => {
                assert_eq!(method, "run()V");
                assert_eq!(label, nowhere);
                assert_eq!(referrer, Referrer::LineNumber { index: 0 });
            }
            other => panic!("unexpected error {}", other),
        }
    }
}
