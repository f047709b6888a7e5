use crate::jvm::code::opcode::*;
use crate::jvm::code::{Constant, EditBuffer, Insn, InsnBuilder};
use crate::jvm::model::{ClassEntity, FieldEntity, MethodBuilder, MethodEntity};
use crate::jvm::{
    BinaryName, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name, RefType,
    UnqualifiedName,
};
use crate::rename::Dictionary;
use crate::transform::{member_dictionary, TransformContext, Transformer};
use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::Rng;

/// `newarray` operand for `char[]`
const CHAR_ARRAY: i32 = 5;

/// `newarray` operand for `byte[]`
const BYTE_ARRAY: i32 = 8;

/// Longest string constant the class file format allows, in modified UTF-8 bytes
const MAX_CONSTANT_BYTES: usize = u16::MAX as usize;

/// Per-class keys
///
/// Every character key stays below `0x400`. Flipping only the low ten bits keeps a UTF-16 unit
/// inside its 1024-unit block, so surrogate halves stay surrogate halves of the same kind and the
/// encrypted text is still valid Unicode.
#[derive(Clone, Debug)]
pub struct StringCipher {
    pub class_key: i32,
    pub keys: [i32; 256],
}

impl StringCipher {
    pub fn random(rng: &mut SmallRng) -> StringCipher {
        let mut keys = [0; 256];
        for key in &mut keys {
            *key = rng.random_range(1..0x400);
        }
        StringCipher {
            class_key: rng.random_range(0xFF_FFFF..i32::MAX),
            keys,
        }
    }

    /// The two `int` arguments a call site passes for the string at `index`
    pub fn call_operands(&self, index: i32) -> (i32, i32) {
        let mixed = (index ^ self.class_key) as u32;
        ((mixed >> 16) as i32, (mixed & 0xFFFF) as i32)
    }

    fn key_at(&self, position: usize, index: i32) -> i32 {
        self.keys[((position as i32 ^ index ^ self.class_key) & 0xFF) as usize]
    }

    /// Encrypt (or decrypt, the cipher is its own inverse) the string stored at `index`
    pub fn apply(&self, text: &str, index: i32) -> Result<String> {
        let units: Vec<u16> = text
            .encode_utf16()
            .enumerate()
            .map(|(position, unit)| unit ^ self.key_at(position, index) as u16)
            .collect();
        String::from_utf16(&units)
            .map_err(|err| Error::InvalidConfig(format!("string key broke UTF-16: {}", err)))
    }
}

fn modified_utf8_len(text: &str) -> usize {
    text.encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Members added to a class holding encrypted strings
struct Storage {
    owner: BinaryName,
    is_interface: bool,
    strings: UnqualifiedName,
    marks: UnqualifiedName,
    decrypt: UnqualifiedName,
}

impl Storage {
    fn decrypt_descriptor() -> MethodDescriptor<BinaryName> {
        MethodDescriptor {
            parameters: vec![FieldType::int(), FieldType::int()],
            return_type: Some(FieldType::object(BinaryName::STRING)),
        }
    }

    fn strings_type() -> FieldType<BinaryName> {
        FieldType::array(FieldType::object(BinaryName::STRING))
    }

    fn marks_type() -> FieldType<BinaryName> {
        FieldType::array(FieldType::byte())
    }

    fn get_strings(&self, builder: &mut InsnBuilder<'_>) {
        builder.access_field(
            GETSTATIC,
            self.owner.clone(),
            self.strings.clone(),
            Self::strings_type(),
        );
    }

    fn get_marks(&self, builder: &mut InsnBuilder<'_>) {
        builder.access_field(
            GETSTATIC,
            self.owner.clone(),
            self.marks.clone(),
            Self::marks_type(),
        );
    }

    fn call_decrypt(&self, builder: &mut InsnBuilder<'_>) {
        builder.push(Insn::Method {
            opcode: INVOKESTATIC,
            owner: RefType::Object(self.owner.clone()),
            name: self.decrypt.clone(),
            descriptor: Self::decrypt_descriptor(),
            is_interface: self.is_interface,
        });
    }

    fn fields(&self) -> [FieldEntity; 2] {
        let flags = FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        [
            FieldEntity::new(flags, self.strings.clone(), Self::strings_type()),
            FieldEntity::new(flags, self.marks.clone(), Self::marks_type()),
        ]
    }

    /// `static String decrypt(int high, int low)`
    ///
    /// Decrypts the string on first use and caches it in the string array; the mark array records
    /// which entries are already plain. The character key is picked by a 256-way `tableswitch`
    /// instead of an array lookup.
    fn decrypt_method(&self, cipher: &StringCipher) -> MethodEntity {
        let mut method = MethodBuilder::new(
            MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC,
            self.decrypt.clone(),
            Self::decrypt_descriptor(),
        );
        let index = method.alloc_slot();
        let string = method.alloc_slot();
        let buffer = method.alloc_slot();
        let position = method.alloc_slot();
        let key = method.alloc_slot();

        let int = FieldType::int();
        let string_type = FieldType::object(BinaryName::STRING);
        let length = || MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::int()),
        };

        let insns = {
            let mut code = method.code();
            let head = code.fresh_label();
            let decode = code.fresh_label();
            let done = code.fresh_label();
            let cached = code.fresh_label();

            code.get_local(0, &int)
                .const_int(16)
                .simple(ISHL)
                .get_local(1, &int)
                .simple(IOR)
                .const_int(cipher.class_key)
                .simple(IXOR)
                .set_local(index, &int);
            self.get_marks(&mut code);
            code.get_local(index, &int).simple(BALOAD).jump(IFNE, cached);

            self.get_strings(&mut code);
            code.get_local(index, &int)
                .simple(AALOAD)
                .set_local(string, &string_type)
                .get_local(string, &string_type)
                .invoke(INVOKEVIRTUAL, BinaryName::STRING, UnqualifiedName::LENGTH, length())
                .push(Insn::Int {
                    opcode: NEWARRAY,
                    operand: CHAR_ARRAY,
                })
                .set_local(buffer, &FieldType::array(FieldType::char()))
                .const_int(0)
                .set_local(position, &int);

            code.place_label(head)
                .get_local(position, &int)
                .get_local(string, &string_type)
                .invoke(INVOKEVIRTUAL, BinaryName::STRING, UnqualifiedName::LENGTH, length())
                .jump(IF_ICMPGE, done)
                .get_local(position, &int)
                .get_local(index, &int)
                .simple(IXOR)
                .const_int(cipher.class_key)
                .simple(IXOR)
                .const_int(0xFF)
                .simple(IAND)
                .table_switch(
                    0,
                    254,
                    |default| {
                        default.const_int(cipher.keys[255]).set_local(key, &int);
                    },
                    |case, value| {
                        case.const_int(cipher.keys[value as usize])
                            .set_local(key, &int)
                            .goto(decode);
                    },
                );

            code.place_label(decode)
                .get_local(buffer, &FieldType::array(FieldType::char()))
                .get_local(position, &int)
                .get_local(string, &string_type)
                .get_local(position, &int)
                .invoke(
                    INVOKEVIRTUAL,
                    BinaryName::STRING,
                    UnqualifiedName::CHAR_AT,
                    MethodDescriptor {
                        parameters: vec![FieldType::int()],
                        return_type: Some(FieldType::char()),
                    },
                )
                .get_local(key, &int)
                .simple(IXOR)
                .simple(I2C)
                .simple(CASTORE)
                .iinc(position, 1)
                .goto(head);

            code.place_label(done);
            self.get_strings(&mut code);
            code.get_local(index, &int)
                .new_object(BinaryName::STRING)
                .simple(DUP)
                .get_local(buffer, &FieldType::array(FieldType::char()))
                .invoke(
                    INVOKESPECIAL,
                    BinaryName::STRING,
                    UnqualifiedName::INIT,
                    MethodDescriptor {
                        parameters: vec![FieldType::array(FieldType::char())],
                        return_type: None,
                    },
                )
                .simple(AASTORE);
            self.get_marks(&mut code);
            code.get_local(index, &int).const_int(66).simple(BASTORE);

            code.place_label(cached);
            self.get_strings(&mut code);
            code.get_local(index, &int)
                .simple(AALOAD)
                .return_(Some(&string_type));
            code.build()
        };
        method.finish(insns)
    }

    /// Static initializer prologue filling the string and mark arrays
    fn initializer(&self, builder: &mut InsnBuilder<'_>, encrypted: &[String]) {
        builder
            .const_int(encrypted.len() as i32)
            .type_insn(ANEWARRAY, RefType::Object(BinaryName::STRING));
        for (index, text) in encrypted.iter().enumerate() {
            builder
                .simple(DUP)
                .const_int(index as i32)
                .const_string(text.as_str())
                .simple(AASTORE);
        }
        builder
            .access_field(
                PUTSTATIC,
                self.owner.clone(),
                self.strings.clone(),
                Self::strings_type(),
            )
            .const_int(encrypted.len() as i32)
            .push(Insn::Int {
                opcode: NEWARRAY,
                operand: BYTE_ARRAY,
            })
            .access_field(
                PUTSTATIC,
                self.owner.clone(),
                self.marks.clone(),
                Self::marks_type(),
            );
    }
}

/// Replaces string literals with calls to a per-class decryption method
///
/// Each class that loads string constants gets a `String[]` of encrypted strings, a `byte[]` of
/// "already decrypted" marks, both filled at the start of the static initializer, and a private
/// static `decrypt(int, int)` method. A literal becomes the two halves of its scrambled index
/// followed by a call to that method.
#[derive(Default)]
pub struct StringEncryption;

impl StringEncryption {
    pub const NAME: &'static str = "StringEncryption";

    /// Encrypt the string literals of one class, returning how many were replaced
    ///
    /// New member names come from `dictionary`, which must not hand out names the class
    /// already uses.
    pub fn encrypt_class(
        class: &mut ClassEntity,
        dictionary: &mut Dictionary,
        rng: &mut SmallRng,
    ) -> Result<usize> {
        // Private static interface methods need Java 8 class files
        if class.is_module() || (class.is_interface() && class.version.major_version < 52) {
            return Ok(0);
        }
        let has_strings = class
            .methods
            .iter()
            .filter_map(|method| method.code.as_ref())
            .any(|code| code.instructions.insns().any(is_string));
        if !has_strings {
            return Ok(0);
        }

        let mut fresh_name = || {
            UnqualifiedName::from_string(dictionary.next_name()).map_err(Error::InvalidDictionary)
        };
        let storage = Storage {
            owner: class.name.clone(),
            is_interface: class.is_interface(),
            strings: fresh_name()?,
            marks: fresh_name()?,
            decrypt: fresh_name()?,
        };
        let cipher = StringCipher::random(rng);

        let mut encrypted = vec![];
        for method in &mut class.methods {
            let code = match &mut method.code {
                Some(code) => code,
                None => continue,
            };
            let mut edits = EditBuffer::new();
            for (id, insn) in code.instructions.iter() {
                let text = match insn {
                    Insn::Ldc(Constant::String(text)) => text,
                    _ => continue,
                };
                let index = encrypted.len() as i32;
                let cipher_text = cipher.apply(text, index)?;
                if modified_utf8_len(&cipher_text) > MAX_CONSTANT_BYTES {
                    log::debug!("{}: string of {} bytes left as is", storage.owner, text.len());
                    continue;
                }
                let (high, low) = cipher.call_operands(index);
                let mut builder = InsnBuilder::new(&code.labels);
                builder.const_int(high).const_int(low);
                storage.call_decrypt(&mut builder);
                edits.replace(id, builder.build());
                encrypted.push(cipher_text);
            }
            edits.commit(&mut code.instructions)?;
        }
        if encrypted.is_empty() {
            return Ok(0);
        }

        for field in storage.fields() {
            class.add_field(field)?;
        }
        class.add_method(storage.decrypt_method(&cipher))?;

        let clinit = class.get_or_create_clinit();
        let code = clinit
            .code
            .as_mut()
            .ok_or_else(|| Error::malformed(storage.owner.to_string(), "<clinit> without code"))?;
        let mut builder = InsnBuilder::new(&code.labels);
        storage.initializer(&mut builder, &encrypted);
        let mut edits = EditBuffer::new();
        edits.insert_first(builder.build());
        edits.commit(&mut code.instructions)?;

        Ok(encrypted.len())
    }
}

fn is_string(insn: &Insn) -> bool {
    matches!(insn, Insn::Ldc(Constant::String(_)))
}

impl Transformer for StringEncryption {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, context: &mut TransformContext) -> Result<()> {
        let TransformContext {
            repository,
            dictionary: setting,
            rng,
            ..
        } = context;
        let mut strings = 0;
        let mut classes = 0;
        for class in repository.program_classes_mut() {
            let mut dictionary = member_dictionary(setting, rng, class)?;
            let encrypted = Self::encrypt_class(class, &mut dictionary, rng)?;
            if encrypted > 0 {
                strings += encrypted;
                classes += 1;
            }
        }
        log::info!("Encrypted {} strings in {} classes", strings, classes);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DictionarySetting;
    use crate::jvm::model::ClassOrigin;
    use crate::jvm::verifier::{verify_method, OpaqueHierarchy};
    use crate::jvm::{ClassAccessFlags, ParseDescriptor};
    use rand::SeedableRng;
    use std::mem;

    fn greeter(texts: &[&str]) -> ClassEntity {
        let mut class = ClassEntity::new(
            BinaryName::from_string(String::from("app/Greeter")).unwrap(),
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        );
        for (index, text) in texts.iter().enumerate() {
            let method = MethodBuilder::new(
                MethodAccessFlags::STATIC,
                UnqualifiedName::from_string(format!("greet{}", index)).unwrap(),
                MethodDescriptor::parse("()Ljava/lang/String;").unwrap(),
            );
            let insns = {
                let mut code = method.code();
                code.const_string(*text)
                    .return_(Some(&FieldType::object(BinaryName::STRING)));
                code.build()
            };
            class.add_method(method.finish(insns)).unwrap();
        }
        class
    }

    fn encrypt(class: &mut ClassEntity) -> usize {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut dictionary = DictionarySetting::default()
            .build(SmallRng::seed_from_u64(6))
            .unwrap();
        dictionary.add_blacklist(class.methods.iter().map(|method| method.name.as_str()));
        StringEncryption::encrypt_class(class, &mut dictionary, &mut rng).unwrap()
    }

    fn int_value(insn: &Insn) -> Option<i32> {
        match insn {
            Insn::Simple(opcode @ ICONST_M1..=ICONST_5) => Some(*opcode as i32 - ICONST_0 as i32),
            Insn::Int {
                opcode: BIPUSH | SIPUSH,
                operand,
            } => Some(*operand),
            Insn::Ldc(Constant::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    /// Recover the cipher from the generated decryption method
    fn cipher_of(decrypt: &MethodEntity) -> StringCipher {
        let insns: Vec<&Insn> = decrypt.code.as_ref().unwrap().instructions.insns().collect();
        let class_key = insns.iter().find_map(|insn| match insn {
            Insn::Ldc(Constant::Integer(value)) => Some(*value),
            _ => None,
        });
        let stored: Vec<i32> = insns
            .windows(2)
            .filter_map(|pair| match pair[1] {
                Insn::Var {
                    opcode: ISTORE,
                    index: 6,
                } => int_value(pair[0]),
                _ => None,
            })
            .collect();
        assert_eq!(stored.len(), 256);

        // Cases come in switch order, with the default (255) placed last
        let mut keys = [0; 256];
        keys.copy_from_slice(&stored);
        StringCipher {
            class_key: class_key.unwrap(),
            keys,
        }
    }

    #[test]
    fn literals_decrypt_to_themselves() {
        let texts = ["hello", "", "π ≈ 3.14159 \u{1F600}"];
        let mut class = greeter(&texts);
        assert_eq!(encrypt(&mut class), 3);
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.methods.len(), 5);

        let decrypt = class
            .methods
            .iter()
            .find(|method| method.descriptor.parameters.len() == 2)
            .unwrap();
        let cipher = cipher_of(decrypt);

        let clinit = class.get_method("<clinit>", "()V").unwrap();
        let stored: Vec<String> = clinit
            .code
            .as_ref()
            .unwrap()
            .instructions
            .insns()
            .filter_map(|insn| match insn {
                Insn::Ldc(Constant::String(text)) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(stored.len(), 3);

        for (index, text) in texts.iter().enumerate() {
            let greet = class
                .get_method(&format!("greet{}", index), "()Ljava/lang/String;")
                .unwrap();
            let insns: Vec<&Insn> = greet.code.as_ref().unwrap().instructions.insns().collect();
            assert!(!insns.iter().any(|insn| is_string(insn)));
            let high = int_value(insns[0]).unwrap();
            let low = int_value(insns[1]).unwrap();
            let slot = ((high << 16) | low) ^ cipher.class_key;
            assert_eq!(slot, index as i32);
            assert_eq!(cipher.apply(&stored[index], slot).unwrap(), *text);
        }
        assert_ne!(stored[0], "hello");
    }

    #[test]
    fn encrypted_class_verifies() {
        let mut class = greeter(&["one", "two"]);
        encrypt(&mut class);

        let mut methods = mem::take(&mut class.methods);
        for method in &mut methods {
            verify_method(&class, method, &OpaqueHierarchy).unwrap();
        }
        let decrypt = methods
            .iter()
            .find(|method| method.descriptor.parameters.len() == 2)
            .unwrap();
        let code = decrypt.code.as_ref().unwrap();
        assert!(code.max_stack >= 5);
        assert!(code.frames.as_ref().is_some_and(|frames| frames.len() > 256));
    }

    #[test]
    fn classes_without_strings_are_untouched() {
        let mut class = greeter(&[]);
        assert_eq!(encrypt(&mut class), 0);
        assert!(class.fields.is_empty());
        assert!(class.get_method("<clinit>", "()V").is_none());
    }

    #[test]
    fn surrogates_survive() {
        let mut rng = SmallRng::seed_from_u64(9);
        let cipher = StringCipher::random(&mut rng);
        let text = "\u{10400}\u{1F600}z\u{D7FF}\u{E000}";
        for index in [0, 7, 300] {
            let encrypted = cipher.apply(text, index).unwrap();
            assert_eq!(encrypted.encode_utf16().count(), text.encode_utf16().count());
            assert_eq!(cipher.apply(&encrypted, index).unwrap(), text);
        }
    }
}
