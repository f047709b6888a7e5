mod common;

use common::*;
use jarcloak::config::{DictionaryKind, DictionarySetting};
use jarcloak::hierarchy::ClassHierarchy;
use jarcloak::jvm::code::Insn;
use jarcloak::jvm::model::{ClassEntity, FieldEntity, MemberKey};
use jarcloak::jvm::*;
use jarcloak::obfuscator::verify_classes;
use jarcloak::rename::{RenameAssignment, RenameSettings};
use jarcloak::repository::ClassRepository;
use jarcloak::transform::{NameObfuscation, TransformContext, Transformer};
use std::collections::HashSet;
use std::fs;

fn no_report() -> RenameSettings {
    RenameSettings {
        mapping_path: None,
        ..RenameSettings::default()
    }
}

fn obfuscate_names(
    repository: ClassRepository,
    settings: RenameSettings,
) -> (ClassRepository, RenameAssignment) {
    let mut context = TransformContext::new(repository, DictionarySetting::default(), Some(5));
    NameObfuscation::new(settings).run(&mut context).unwrap();
    let assignment = context.artifacts.rename_assignment.take().unwrap();
    (context.into_repository(), assignment)
}

#[test]
fn virtual_call_follows_the_override() {
    let repository = repository(base_sub_main(), vec![]);
    let (mut repository, assignment) = obfuscate_names(repository, no_report());

    let base = assignment.class_name("app/Base").unwrap().clone();
    let sub = assignment.class_name("app/Sub").unwrap().clone();
    assert!(assignment.class_name("app/Main").is_none(), "main class was renamed");

    let base_foo = assignment.method_name("app/Base", "foo", "()V").unwrap().clone();
    let sub_foo = assignment.method_name("app/Sub", "foo", "()V").unwrap();
    assert_eq!(&base_foo, sub_foo);
    assert_ne!(base_foo.as_str(), "foo");

    let main = repository.target.get("app/Main").unwrap();
    let code = main.methods[0].code.as_ref().unwrap();
    let calls: Vec<(&RefType<BinaryName>, &UnqualifiedName)> = code
        .instructions
        .insns()
        .filter_map(|insn| match insn {
            Insn::Method { owner, name, .. } => Some((owner, name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        calls,
        vec![
            (&RefType::Object(sub.clone()), &UnqualifiedName::INIT),
            (&RefType::Object(base.clone()), &base_foo),
        ]
    );

    let renamed_sub = repository.target.get(sub.as_str()).unwrap();
    assert_eq!(renamed_sub.superclass.as_ref(), Some(&base));
    assert!(renamed_sub.get_method(base_foo.as_str(), "()V").is_some());

    assert_eq!(verify_classes(&mut repository).unwrap(), 5);
}

/// ```text
/// interface app/Shape { double area(); }
/// class app/Square implements Shape { double area() }
/// class app/Tile extends lib/Figure implements Shape    // area() inherited from the library
/// ```
#[test]
fn library_implementor_pins_the_whole_diamond() {
    let area = || abstract_method("area", "()D");
    let interface =
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
    let abstract_class = ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT;

    let mut figure = class("lib/Figure", "java/lang/Object", abstract_class);
    figure.add_method(area()).unwrap();

    let mut shape = class("app/Shape", "java/lang/Object", interface);
    shape.add_method(area()).unwrap();

    let mut square = class("app/Square", "java/lang/Object", abstract_class);
    square.interfaces.push(binary("app/Shape"));
    square.add_method(area()).unwrap();

    let mut tile = class("app/Tile", "lib/Figure", abstract_class);
    tile.interfaces.push(binary("app/Shape"));

    let repository = repository(vec![shape, square, tile], vec![figure]);
    let settings = RenameSettings {
        rename_class: false,
        ..no_report()
    };
    let (repository, assignment) = obfuscate_names(repository, settings);

    assert_eq!(assignment.counts(), (0, 0, 0));
    for name in ["app/Shape", "app/Square"] {
        let class = repository.target.get(name).unwrap();
        assert!(class.get_method("area", "()D").is_some());
    }
}

#[test]
fn override_closures_are_symmetric() {
    let mut classes = base_sub_main();

    let mut runnable = class(
        "app/Task",
        "java/lang/Object",
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
    );
    runnable.add_method(abstract_method("foo", "()V")).unwrap();
    runnable.add_method(abstract_method("bar", "()V")).unwrap();
    classes.push(runnable);

    let mut worker = class("app/Worker", "app/Sub", ClassAccessFlags::PUBLIC);
    worker.interfaces.push(binary("app/Task"));
    worker.add_method(empty_method("bar")).unwrap();
    classes.push(worker);

    let repository = repository(classes, vec![]);
    let hierarchy = ClassHierarchy::build(&repository).unwrap();

    let mut all_methods = vec![];
    for (id, _) in hierarchy.nodes() {
        all_methods.extend(hierarchy.methods_of(id));
    }
    let closures = hierarchy.override_closures(&all_methods);
    for (method, closure) in all_methods.iter().zip(&closures) {
        assert!(closure.contains(method));
        for other in closure.iter() {
            assert_eq!(&hierarchy.override_closure(*other), closure);
        }
    }

    // Task.foo ties Base.foo and Sub.foo together through Worker
    let task = hierarchy.lookup("app/Task").unwrap();
    let base = hierarchy.lookup("app/Base").unwrap();
    let foo = MemberKey::new(unqualified("foo"), "()V");
    let task_foo = hierarchy.get_method(task, &foo).unwrap();
    let base_foo = hierarchy.get_method(base, &foo).unwrap();
    assert!(hierarchy.override_closure(task_foo).contains(&base_foo));
}

#[test]
fn mapping_report_lists_each_rename_once() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = dir.path().join("mapping.txt");
    let settings = RenameSettings {
        mapping_path: Some(mapping.clone()),
        ..RenameSettings::default()
    };
    let (_, assignment) = obfuscate_names(repository(base_sub_main(), vec![]), settings);
    let report = fs::read_to_string(&mapping).unwrap();

    for original in ["app/Base", "app/Sub"] {
        let new_name = assignment.class_name(original).unwrap();
        let header = format!("{} ---> {}", original, new_name);
        assert_eq!(report.lines().filter(|line| *line == header).count(), 1);
    }
    assert!(!report.lines().any(|line| line.starts_with("app/Main ")));

    let new_foo = assignment.method_name("app/Base", "foo", "()V").unwrap();
    let entry = format!("    ()V foo ---> ()V {}", new_foo);
    assert_eq!(report.lines().filter(|line| *line == entry).count(), 2);
    assert_eq!(report.matches("  Methods:").count(), 2);
    assert!(!report.contains("  Fields:"));
}

fn field(flags: FieldAccessFlags, name: &str, desc: &str) -> FieldEntity {
    FieldEntity::new(flags, unqualified(name), FieldType::parse(desc).unwrap())
}

fn assert_unique_members(class: &ClassEntity) {
    let methods: HashSet<(String, String)> = class
        .methods
        .iter()
        .map(|method| (method.name.as_str().to_owned(), method.descriptor.render()))
        .collect();
    assert_eq!(methods.len(), class.methods.len(), "clashing methods in {}", class.name);
    let fields: HashSet<(String, String)> = class
        .fields
        .iter()
        .map(|field| (field.name.as_str().to_owned(), field.descriptor.render()))
        .collect();
    assert_eq!(fields.len(), class.fields.len(), "clashing fields in {}", class.name);
}

/// ```text
/// class app/Base {
///     int value; long value;
///     void run(); void run(int); void run(String); static int make();
/// }
/// class app/Sub extends Base {
///     int value;
///     void run(int); static int make(); int hashCode();
/// }
/// ```
#[test]
fn members_stay_unique_per_class() {
    let public = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
    let void = |name: &str, desc: &str| {
        method(MethodAccessFlags::PUBLIC, name, desc, |code| {
            code.return_(None);
        })
    };
    let int = |flags: MethodAccessFlags, name: &str| {
        method(flags, name, "()I", |code| {
            code.const_int(3).return_(Some(&FieldType::int()));
        })
    };
    let static_ = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;

    let mut base = class("app/Base", "java/lang/Object", public);
    base.add_field(field(FieldAccessFlags::PUBLIC, "value", "I")).unwrap();
    base.add_field(field(FieldAccessFlags::PUBLIC, "value", "J")).unwrap();
    base.add_method(constructor("java/lang/Object")).unwrap();
    for desc in ["()V", "(I)V", "(Ljava/lang/String;)V"] {
        base.add_method(void("run", desc)).unwrap();
    }
    base.add_method(int(static_, "make")).unwrap();

    let mut sub = class("app/Sub", "app/Base", public);
    sub.add_field(field(FieldAccessFlags::PUBLIC, "value", "I")).unwrap();
    sub.add_method(constructor("app/Base")).unwrap();
    sub.add_method(void("run", "(I)V")).unwrap();
    sub.add_method(int(static_, "make")).unwrap();
    sub.add_method(int(MethodAccessFlags::PUBLIC, "hashCode")).unwrap();

    // Two letters run out right away, so names of several lengths get mixed
    let dictionary = DictionarySetting {
        value_type: DictionaryKind::Chars,
        value: String::from("ab"),
        base_length: 1,
        blacklist: vec![],
    };
    let mut context =
        TransformContext::new(repository(vec![base, sub], vec![]), dictionary, Some(11));
    NameObfuscation::new(no_report()).run(&mut context).unwrap();
    let assignment = context.artifacts.rename_assignment.take().unwrap();
    let mut repository = context.into_repository();

    assert_eq!(assignment.counts(), (2, 3, 6));
    for class in repository.program_classes() {
        assert_unique_members(class);
    }

    let overridden = assignment.method_name("app/Base", "run", "(I)V").unwrap();
    assert_eq!(assignment.method_name("app/Sub", "run", "(I)V"), Some(overridden));
    assert_ne!(
        assignment.method_name("app/Base", "run", "()V"),
        Some(overridden)
    );
    assert!(assignment.method_name("app/Sub", "hashCode", "()I").is_none());
    assert_eq!(verify_classes(&mut repository).unwrap(), 9);
}
