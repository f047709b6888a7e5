use crate::jvm::code::VerificationType;
use crate::jvm::{ArrayType, BinaryName, RefType};
use std::collections::HashSet;

/// What frame computation needs to know about classes it did not see
///
/// Merging two reference types at a join point requires their closest common superclass, which
/// depends on classes outside the method being analyzed.
pub trait TypeHierarchy {
    /// Superclass of a class, and whether it is an interface
    ///
    /// `None` when the class is unknown, in which case merges fall back to `java/lang/Object`.
    fn class_info(&self, name: &BinaryName) -> Option<(Option<BinaryName>, bool)>;
}

/// Hierarchy that knows no classes (every merge of distinct classes is `java/lang/Object`)
pub struct OpaqueHierarchy;

impl TypeHierarchy for OpaqueHierarchy {
    fn class_info(&self, _name: &BinaryName) -> Option<(Option<BinaryName>, bool)> {
        None
    }
}

/// Most specific type both arguments are assignable to
///
/// Primitive types only merge with themselves, anything else merges to `Top`.
pub fn merge_types(
    hierarchy: &dyn TypeHierarchy,
    left: &VerificationType,
    right: &VerificationType,
) -> VerificationType {
    use VerificationType::*;
    match (left, right) {
        _ if left == right => left.clone(),
        (Null, Object(_)) => right.clone(),
        (Object(_), Null) => left.clone(),
        (Object(left), Object(right)) => Object(merge_ref_types(hierarchy, left, right)),
        _ => Top,
    }
}

fn merge_ref_types(
    hierarchy: &dyn TypeHierarchy,
    left: &RefType<BinaryName>,
    right: &RefType<BinaryName>,
) -> RefType<BinaryName> {
    match (left, right) {
        (RefType::Object(left), RefType::Object(right)) => {
            RefType::Object(common_superclass(hierarchy, left, right))
        }
        (RefType::ObjectArray(left), RefType::ObjectArray(right))
            if left.additional_dimensions == right.additional_dimensions =>
        {
            RefType::ObjectArray(ArrayType {
                additional_dimensions: left.additional_dimensions,
                element_type: common_superclass(hierarchy, &left.element_type, &right.element_type),
            })
        }
        _ => RefType::Object(BinaryName::OBJECT),
    }
}

/// Closest common superclass, treating interfaces like `java/lang/Object` as the JVM does
pub fn common_superclass(
    hierarchy: &dyn TypeHierarchy,
    left: &BinaryName,
    right: &BinaryName,
) -> BinaryName {
    if left == right {
        return left.clone();
    }
    let left_chain = match superclass_chain(hierarchy, left) {
        Some(chain) => chain,
        None => return BinaryName::OBJECT,
    };
    let right_chain = match superclass_chain(hierarchy, right) {
        Some(chain) => chain,
        None => return BinaryName::OBJECT,
    };
    let left_set: HashSet<&BinaryName> = left_chain.iter().collect();
    right_chain
        .into_iter()
        .find(|class| left_set.contains(class))
        .unwrap_or(BinaryName::OBJECT)
}

/// The class followed by its superclasses, or `None` for interfaces and unknown classes
fn superclass_chain(hierarchy: &dyn TypeHierarchy, class: &BinaryName) -> Option<Vec<BinaryName>> {
    let mut chain = vec![];
    let mut current = Some(class.clone());
    while let Some(class) = current {
        if chain.contains(&class) {
            break;
        }
        let (superclass, is_interface) = hierarchy.class_info(&class)?;
        if is_interface {
            return None;
        }
        current = superclass;
        chain.push(class);
    }
    Some(chain)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;
    use std::collections::HashMap;

    struct Classes(HashMap<&'static str, (Option<&'static str>, bool)>);

    impl TypeHierarchy for Classes {
        fn class_info(&self, name: &BinaryName) -> Option<(Option<BinaryName>, bool)> {
            self.0.get(name.as_str()).map(|(superclass, is_interface)| {
                let superclass =
                    superclass.map(|name| BinaryName::from_string(name.to_owned()).unwrap());
                (superclass, *is_interface)
            })
        }
    }

    fn object(name: &str) -> VerificationType {
        VerificationType::object(BinaryName::from_string(name.to_owned()).unwrap())
    }

    #[test]
    fn merges() {
        let classes = Classes(HashMap::from([
            ("java/lang/Object", (None, false)),
            ("a/Shape", (Some("java/lang/Object"), false)),
            ("a/Square", (Some("a/Shape"), false)),
            ("a/Circle", (Some("a/Shape"), false)),
            ("a/Round", (Some("java/lang/Object"), true)),
        ]));

        let square = object("a/Square");
        let circle = object("a/Circle");
        assert_eq!(merge_types(&classes, &square, &circle), object("a/Shape"));
        assert_eq!(merge_types(&classes, &square, &VerificationType::Null), square);
        assert_eq!(
            merge_types(&classes, &square, &object("a/Round")),
            object("java/lang/Object")
        );
        assert_eq!(
            merge_types(&classes, &square, &object("a/Unknown")),
            object("java/lang/Object")
        );
        assert_eq!(
            merge_types(&classes, &VerificationType::Integer, &VerificationType::Float),
            VerificationType::Top
        );
        assert_eq!(
            merge_types(&OpaqueHierarchy, &square, &circle),
            object("java/lang/Object")
        );
    }
}
