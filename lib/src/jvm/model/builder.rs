use crate::jvm::code::{Code, Insn, InsnBuilder, SynLabelGenerator};
use crate::jvm::model::MethodEntity;
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};

/// Builds generated methods
///
/// Local slots start right after the parameters (and `this`, for instance methods). Labels for
/// the body come from the builder so that they stay fresh within the finished method.
pub struct MethodBuilder {
    access_flags: MethodAccessFlags,
    name: UnqualifiedName,
    descriptor: MethodDescriptor<BinaryName>,
    labels: SynLabelGenerator,
    next_slot: u16,
}

impl MethodBuilder {
    pub fn new(
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
    ) -> MethodBuilder {
        let has_this = !access_flags.contains(MethodAccessFlags::STATIC);
        let next_slot = descriptor.parameter_length(has_this) as u16;
        MethodBuilder {
            access_flags,
            name,
            descriptor,
            labels: SynLabelGenerator::default(),
            next_slot,
        }
    }

    /// Reserve a one-slot local (`int`, `float`, references)
    pub fn alloc_slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Reserve a two-slot local (`long`, `double`)
    pub fn alloc_wide_slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 2;
        slot
    }

    /// Instruction builder sharing this method's labels
    pub fn code(&self) -> InsnBuilder<'_> {
        InsnBuilder::new(&self.labels)
    }

    /// Finish the method with the given body
    ///
    /// `max_stack` is left at zero; the verifier computes it before the class is written.
    pub fn finish(self, instructions: Vec<Insn>) -> MethodEntity {
        let mut code = Code::new(instructions, self.labels);
        code.max_locals = self.next_slot;
        let mut method = MethodEntity::new(self.access_flags, self.name, self.descriptor);
        method.code = Some(code);
        method
    }
}
