use crate::jvm::Name;
use crate::rename::{MemberRename, RenameAssignment, Remapper};
use std::fmt;

/// Render the human readable mapping report
///
/// Every class with a new name, or with at least one renamed member, gets a block:
///
/// ```text
/// com/example/Foo ---> a
///   Fields:
///     I count ---> I b
///   Methods:
///     (Lcom/example/Foo;)V merge ---> (La;)V c
///
/// ```
///
/// Members that keep their names are not listed. Descriptors on the right are remapped.
pub fn render_mapping<R: Remapper + ?Sized>(assignment: &RenameAssignment, remapper: &R) -> String {
    MappingReport {
        assignment,
        remapper,
    }
    .to_string()
}

/// See [`render_mapping`]
pub struct MappingReport<'a, R: ?Sized> {
    pub assignment: &'a RenameAssignment,
    pub remapper: &'a R,
}

impl<R: Remapper + ?Sized> fmt::Display for MappingReport<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in self.assignment.touched_classes() {
            let new_name = self.assignment.class_name(class.as_str()).unwrap_or(class);
            writeln!(f, "{} ---> {}", class, new_name)?;
            self.members(f, "Fields", self.assignment.fields_of(class.as_str()))?;
            self.members(f, "Methods", self.assignment.methods_of(class.as_str()))?;
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<R: Remapper + ?Sized> MappingReport<'_, R> {
    fn members(
        &self,
        f: &mut fmt::Formatter<'_>,
        title: &str,
        members: &[MemberRename],
    ) -> fmt::Result {
        if members.is_empty() {
            return Ok(());
        }
        writeln!(f, "  {}:", title)?;
        for member in members {
            writeln!(
                f,
                "    {} {} ---> {} {}",
                member.key.descriptor,
                member.key.name,
                self.remapper.map_descriptor_str(&member.key.descriptor),
                member.new_name
            )?;
        }
        Ok(())
    }
}
