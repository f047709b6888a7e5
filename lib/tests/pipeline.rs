mod common;

use common::*;
use jarcloak::archive::read_archive;
use jarcloak::config::Config;
use jarcloak::jvm::class_file::{read_class, write_class};
use jarcloak::jvm::code::opcode::*;
use jarcloak::jvm::code::{Constant, Insn};
use jarcloak::jvm::model::{ClassEntity, ClassOrigin};
use jarcloak::jvm::verifier::StackVerifier;
use jarcloak::jvm::*;
use jarcloak::obfuscator::Obfuscator;
use jarcloak::Error;
use serde_json::json;
use std::fs;
use std::path::Path;

const MANIFEST: &[u8] = b"Manifest-Version: 1.0\nMain-Class: app.Main\n";

/// `static int spin(int n) { while (n > 0) n--; float f = 2.5f; String s = "spun"; return 1234; }`
fn spin() -> jarcloak::jvm::model::MethodEntity {
    method(MethodAccessFlags::STATIC, "spin", "(I)I", |code| {
        let head = code.fresh_label();
        let done = code.fresh_label();
        code.place_label(head)
            .get_local(0, &FieldType::int())
            .jump(IFLE, done)
            .iinc(0, -1)
            .goto(head)
            .place_label(done)
            .const_float(2.5)
            .simple(POP)
            .const_string("spun")
            .simple(POP)
            .const_int(1234)
            .return_(Some(&FieldType::int()));
    })
}

fn bytes(class: &ClassEntity) -> Vec<u8> {
    write_class(class).unwrap()
}

/// Lay out a platform module directory, an input jar, and an extra jar under `root`
fn fixture(root: &Path, program: Vec<ClassEntity>) -> Config {
    let object_path = root.join("modules/java.base/java/lang/Object.class");
    fs::create_dir_all(object_path.parent().unwrap()).unwrap();
    fs::write(&object_path, bytes(&object())).unwrap();

    let helper = class("vendor/Helper", "java/lang/Object", ClassAccessFlags::PUBLIC);
    let trace = class("debug/Trace", "java/lang/Object", ClassAccessFlags::PUBLIC);
    let mut entries = vec![("META-INF/MANIFEST.MF".to_owned(), MANIFEST.to_vec())];
    for class in program.iter().chain([&helper, &trace]) {
        entries.push((class.entry_name(), bytes(class)));
    }
    let entries: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.clone()))
        .collect();
    write_jar(&root.join("in.jar"), &entries);

    write_jar(
        &root.join("extra.jar"),
        &[
            ("extra/notes.txt", b"hello".to_vec()),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
        ],
    );

    let document = json!({
        "inputPath": root.join("in.jar"),
        "outputPath": root.join("out.jar"),
        "platformModules": root.join("modules"),
        "skipClasses": ["debug/**"],
        "libraryClasses": ["vendor/*"],
        "extractJars": [root.join("extra.jar")],
        "seed": 1234,
        "transformers": [
            { "name": "NameObfuscation", "mappingPath": root.join("mapping.txt") },
            { "name": "NumberEncryption" },
            { "name": "StringEncryption" },
            { "name": "InvokeProxy" },
            { "name": "FlowObfuscation" },
            { "name": "GotoReplacer" }
        ]
    });
    Config::from_json(&document.to_string()).unwrap()
}

#[test]
fn archive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut program = base_sub_main();
    program[2].add_method(spin()).unwrap();
    let config = fixture(dir.path(), program);

    let artifacts = Obfuscator::new(config).run().unwrap();
    let assignment = artifacts.rename_assignment.unwrap();
    assert_eq!(assignment.counts().0, 2);
    assert!(dir.path().join("mapping.txt").is_file());

    let output = read_archive(&dir.path().join("out.jar")).unwrap();
    let names: Vec<&str> = output.iter().map(|entry| entry.name.as_str()).collect();
    for expected in ["app/Main.class", "vendor/Helper.class", "extra/notes.txt"] {
        assert!(names.contains(&expected), "{} is missing", expected);
    }
    for gone in ["app/Base.class", "app/Sub.class", "debug/Trace.class"] {
        assert!(!names.contains(&gone), "{} is still there", gone);
    }
    let manifests: Vec<_> = output
        .iter()
        .filter(|entry| entry.name == "META-INF/MANIFEST.MF")
        .collect();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].data, MANIFEST);
    assert_eq!(output.iter().filter(|entry| entry.is_class()).count(), 4);

    for entry in output.iter().filter(|entry| entry.is_class()) {
        let class = read_class(&entry.data, ClassOrigin::Synthetic).unwrap();
        for method in &class.methods {
            assert!(StackVerifier::verify(method).is_ok(), "{} fails", method.name);
        }
    }

    let main_entry = output
        .iter()
        .find(|entry| entry.name == "app/Main.class")
        .unwrap();
    let main = read_class(&main_entry.data, ClassOrigin::Synthetic).unwrap();
    let spin = main
        .methods
        .iter()
        .find(|method| method.descriptor.render() == "(I)I")
        .unwrap();
    let insns: Vec<&Insn> = spin.code.as_ref().unwrap().instructions.insns().collect();
    assert!(insns
        .iter()
        .any(|insn| matches!(insn, Insn::TableSwitch { .. })));
    assert!(!insns
        .iter()
        .any(|insn| matches!(insn, Insn::Ldc(Constant::Float(_)))));
    assert!(!insns
        .iter()
        .any(|insn| matches!(insn, Insn::Ldc(Constant::String(_)))));
    assert!(main
        .methods
        .iter()
        .any(|method| method.descriptor.render() == "(II)Ljava/lang/String;"));
    let initializer = main.get_method("<clinit>", "()V").unwrap();
    assert!(!initializer
        .code
        .as_ref()
        .unwrap()
        .instructions
        .insns()
        .any(|insn| *insn == Insn::Ldc(Constant::String(String::from("spun")))));
}

#[test]
fn unknown_transformer_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture(dir.path(), base_sub_main());
    config.transformers = serde_json::from_value(json!([{ "name": "StringEncrypt" }])).unwrap();

    match Obfuscator::new(config).run() {
        Err(Error::InvalidConfig(message)) => assert!(message.contains("StringEncrypt")),
        other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
    }
    assert!(!dir.path().join("out.jar").exists());
}

#[test]
fn verification_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = class("app/Broken", "java/lang/Object", ClassAccessFlags::PUBLIC);
    broken
        .add_method(method(MethodAccessFlags::STATIC, "fall", "()V", |code| {
            code.const_int(1).simple(POP);
        }))
        .unwrap();
    let config = fixture(dir.path(), vec![broken]);

    match Obfuscator::new(config).run() {
        Err(Error::Verification { method, .. }) => assert!(method.ends_with("()V")),
        other => panic!("expected a verification failure, got {:?}", other.map(|_| ())),
    }
    assert!(!dir.path().join("out.jar").exists());
}

#[test]
fn missing_library_class_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let orphan = class("app/Orphan", "lib/Gone", ClassAccessFlags::PUBLIC);
    let config = fixture(dir.path(), vec![orphan]);

    match Obfuscator::new(config).run() {
        Err(Error::ClassNotFound { name, needed_by }) => {
            assert_eq!(name, "lib/Gone");
            assert_eq!(needed_by, "app/Orphan");
        }
        other => panic!("expected a missing class, got {:?}", other.map(|_| ())),
    }
    assert!(!dir.path().join("out.jar").exists());
}

#[test]
fn failed_write_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture(dir.path(), base_sub_main());
    config.extract_jars.push(dir.path().join("missing.jar"));

    assert!(Obfuscator::new(config).run().is_err());
    assert!(!dir.path().join("out.jar").exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.ends_with(".tmp") || name.starts_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "left behind {:?}", leftovers);
}
