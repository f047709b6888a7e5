mod common;

use common::*;
use jarcloak::jvm::class_file::{read_class, write_class, Version};
use jarcloak::jvm::code::opcode::*;
use jarcloak::jvm::code::{Insn, VerificationType};
use jarcloak::jvm::model::{ClassEntity, ClassOrigin, MethodEntity};
use jarcloak::jvm::verifier::{verify_method, OpaqueHierarchy};
use jarcloak::jvm::*;

/// `static int countdown(int n) { while (n > 0) n--; return n; }`
fn countdown() -> MethodEntity {
    method(MethodAccessFlags::STATIC, "countdown", "(I)I", |code| {
        let head = code.fresh_label();
        let done = code.fresh_label();
        code.place_label(head)
            .get_local(0, &FieldType::int())
            .jump(IFLE, done)
            .iinc(0, -1)
            .goto(head)
            .place_label(done)
            .get_local(0, &FieldType::int())
            .return_(Some(&FieldType::int()));
    })
}

fn verified(mut class: ClassEntity, methods: Vec<MethodEntity>) -> ClassEntity {
    for mut method in methods {
        verify_method(&class, &mut method, &OpaqueHierarchy).unwrap();
        class.add_method(method).unwrap();
    }
    class
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn loops_get_stack_map_frames() {
    let class = class("app/Loop", "java/lang/Object", ClassAccessFlags::PUBLIC);
    let class = verified(class, vec![countdown()]);
    let frames = class.methods[0].code.as_ref().unwrap().frames.as_ref().unwrap();
    assert_eq!(frames.len(), 2);
    assert!(frames
        .iter()
        .all(|frame| frame.locals == vec![VerificationType::Integer] && frame.stack.is_empty()));

    let bytes = write_class(&class).unwrap();
    assert!(contains(&bytes, b"StackMapTable"));

    // Two `same_frame`s: the loop head at offset 0, the exit at offset 10
    let attribute = [0, 0, 0, 4, 0, 2, 0, 9];
    assert!(contains(&bytes, &attribute));

    let read = read_class(&bytes, ClassOrigin::Synthetic).unwrap();
    assert_eq!(read.methods[0].code.as_ref().unwrap().frames, None);
}

#[test]
fn old_class_files_have_no_frames() {
    let mut class = class("app/Legacy", "java/lang/Object", ClassAccessFlags::PUBLIC);
    class.version = Version {
        minor_version: 0,
        major_version: 49,
    };
    let class = verified(class, vec![countdown()]);
    assert!(class.methods[0].code.as_ref().unwrap().frames.is_none());
    assert!(!contains(&write_class(&class).unwrap(), b"StackMapTable"));
}

#[test]
fn dead_code_is_removed_before_frames() {
    let class = class("app/Dead", "java/lang/Object", ClassAccessFlags::PUBLIC);
    let dead = method(MethodAccessFlags::STATIC, "dead", "()I", |code| {
        let end = code.fresh_label();
        code.const_int(1)
            .goto(end)
            .const_string("never")
            .simple(POP)
            .place_label(end)
            .return_(Some(&FieldType::int()));
    });
    let class = verified(class, vec![dead]);

    let insns: Vec<&Insn> = class.methods[0]
        .code
        .as_ref()
        .unwrap()
        .instructions
        .insns()
        .collect();
    assert!(!insns.iter().any(|insn| matches!(insn, Insn::Ldc(_))));
    assert!(!insns.iter().any(|insn| *insn == &Insn::Simple(POP)));

    // One `same_locals_1_stack_item_frame` at the join, holding the int
    let bytes = write_class(&class).unwrap();
    assert!(contains(&bytes, &[0, 0, 0, 4, 0, 1, 64 + 4, 1]));
}
