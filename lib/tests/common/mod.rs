#![allow(dead_code)]

use jarcloak::archive::ArchiveWriter;
use jarcloak::jvm::code::opcode::*;
use jarcloak::jvm::code::InsnBuilder;
use jarcloak::jvm::model::{ClassEntity, ClassOrigin, MethodBuilder, MethodEntity};
use jarcloak::jvm::*;
use jarcloak::repository::ClassRepository;
use std::path::Path;

pub fn binary(name: &str) -> BinaryName {
    BinaryName::from_string(name.to_owned()).unwrap()
}

pub fn unqualified(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(name.to_owned()).unwrap()
}

pub fn descriptor(descriptor: &str) -> MethodDescriptor<BinaryName> {
    MethodDescriptor::parse(descriptor).unwrap()
}

/// Class as it would be read from the input archive
pub fn class(name: &str, superclass: &str, flags: ClassAccessFlags) -> ClassEntity {
    let origin = ClassOrigin::Target {
        entry: format!("{}.class", name),
    };
    ClassEntity::new(binary(name), Some(binary(superclass)), flags, origin)
}

pub fn abstract_method(name: &str, desc: &str) -> MethodEntity {
    MethodEntity::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        unqualified(name),
        descriptor(desc),
    )
}

/// Method whose body is produced by `body`
pub fn method(
    flags: MethodAccessFlags,
    name: &str,
    desc: &str,
    body: impl FnOnce(&mut InsnBuilder<'_>),
) -> MethodEntity {
    let builder = MethodBuilder::new(flags, unqualified(name), descriptor(desc));
    let insns = {
        let mut code = builder.code();
        body(&mut code);
        code.build()
    };
    builder.finish(insns)
}

/// `public void <init>() { super(); }`
pub fn constructor(superclass: &str) -> MethodEntity {
    let superclass = binary(superclass);
    method(MethodAccessFlags::PUBLIC, "<init>", "()V", |code| {
        code.get_local(0, &FieldType::object(BinaryName::OBJECT))
            .invoke(
                INVOKESPECIAL,
                superclass,
                UnqualifiedName::INIT,
                descriptor("()V"),
            )
            .return_(None);
    })
}

/// `public void name() { }`
pub fn empty_method(name: &str) -> MethodEntity {
    method(MethodAccessFlags::PUBLIC, name, "()V", |code| {
        code.return_(None);
    })
}

/// Minimal `java/lang/Object`
pub fn object() -> ClassEntity {
    let mut object = ClassEntity::new(
        BinaryName::OBJECT,
        None,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        ClassOrigin::Synthetic,
    );
    object
        .add_method(method(MethodAccessFlags::PUBLIC, "<init>", "()V", |code| {
            code.return_(None);
        }))
        .unwrap();
    object
        .add_method(MethodEntity::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE,
            unqualified("hashCode"),
            descriptor("()I"),
        ))
        .unwrap();
    object
}

/// Repository over the given program classes, with `java/lang/Object` and `libraries` external
pub fn repository(classes: Vec<ClassEntity>, libraries: Vec<ClassEntity>) -> ClassRepository {
    let mut repository = ClassRepository::default();
    repository.external.insert(object());
    for library in libraries {
        repository.external.insert(library);
    }
    for class in classes {
        repository.target.insert(class);
    }
    repository
}

/// The `Base`/`Sub`/`Main` program
///
/// ```java
/// public class Base { public void foo() {} }
/// public class Sub extends Base { public void foo() {} }
/// public class Main {
///     public static void main(String[] args) { Base b = new Sub(); b.foo(); }
/// }
/// ```
pub fn base_sub_main() -> Vec<ClassEntity> {
    let public = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;

    let mut base = class("app/Base", "java/lang/Object", public);
    base.add_method(constructor("java/lang/Object")).unwrap();
    base.add_method(empty_method("foo")).unwrap();

    let mut sub = class("app/Sub", "app/Base", public);
    sub.add_method(constructor("app/Base")).unwrap();
    sub.add_method(empty_method("foo")).unwrap();

    let mut main = class("app/Main", "java/lang/Object", public);
    main.add_method(method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "main",
        "([Ljava/lang/String;)V",
        |code| {
            let base = FieldType::object(binary("app/Base"));
            code.new_object(binary("app/Sub"))
                .simple(DUP)
                .invoke(INVOKESPECIAL, binary("app/Sub"), UnqualifiedName::INIT, descriptor("()V"))
                .set_local(1, &base)
                .get_local(1, &base)
                .invoke(INVOKEVIRTUAL, binary("app/Base"), unqualified("foo"), descriptor("()V"))
                .return_(None);
        },
    ))
    .unwrap();

    vec![base, sub, main]
}

/// Write a jar with the given entries
pub fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut writer = ArchiveWriter::create(path).unwrap();
    for (name, data) in entries {
        writer.add(name, data).unwrap();
    }
    writer.finish().unwrap();
}
