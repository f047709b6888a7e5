use crate::jvm::code::{
    Frame, Insn, InsnList, LabelGenerator, LocalVariable, SynLabel, SynLabelGenerator, TryCatchBlock,
};

/// Semantic representation of a method body
#[derive(Clone, Debug, Default)]
pub struct Code {
    /// Maximum size of stack through the method
    pub max_stack: u16,

    /// Maximum size of locals through the method
    pub max_locals: u16,

    /// Instruction stream, including label and line number markers
    pub instructions: InsnList,

    /// Exception handlers, in priority order
    pub try_catch_blocks: Vec<TryCatchBlock>,

    /// Debug information about local variables
    pub local_variables: Vec<LocalVariable>,

    /// Generator for labels that are fresh within this method
    pub labels: SynLabelGenerator,

    /// Stack map frames, in stream order
    ///
    /// Computed by the verifier and written as the `StackMapTable`. Editing the instructions
    /// afterwards invalidates them.
    pub frames: Option<Vec<Frame>>,
}

impl Code {
    /// Make a method body from an instruction sequence built against `labels`
    pub fn new(instructions: Vec<Insn>, labels: SynLabelGenerator) -> Code {
        Code {
            max_stack: 0,
            max_locals: 0,
            instructions: instructions.into_iter().collect(),
            try_catch_blocks: vec![],
            local_variables: vec![],
            labels,
            frames: None,
        }
    }

    /// Generate a label that is fresh within this method
    pub fn fresh_label(&self) -> SynLabel {
        self.labels.fresh_label()
    }
}
