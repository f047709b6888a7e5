use std::cell::Cell;
use std::fmt;

/// Opaque label marking a position in a method's instruction stream
///
/// Labels are only meaningful within the method whose [`LabelGenerator`] produced them.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SynLabel(u32);

impl SynLabel {
    /// First label handed out by a fresh generator
    pub const START: SynLabel = SynLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> SynLabel {
        SynLabel(self.0 + 1)
    }
}

/// Generates new labels
///
/// Generation goes through a shared reference so that new code can be built while the existing
/// instructions of the same method are being iterated.
pub trait LabelGenerator {
    /// Generate a fresh label
    fn fresh_label(&self) -> SynLabel;
}

/// Label generator for [`SynLabel`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct SynLabelGenerator(Cell<SynLabel>);

impl SynLabelGenerator {
    pub fn new(start: SynLabel) -> SynLabelGenerator {
        SynLabelGenerator(Cell::new(start))
    }
}

impl Default for SynLabelGenerator {
    fn default() -> Self {
        SynLabelGenerator::new(SynLabel::START)
    }
}

impl LabelGenerator for SynLabelGenerator {
    fn fresh_label(&self) -> SynLabel {
        let to_return = self.0.get();
        self.0.set(to_return.next());
        to_return
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
