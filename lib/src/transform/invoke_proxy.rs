use crate::jvm::code::opcode::*;
use crate::jvm::code::{EditBuffer, Insn, InsnId};
use crate::jvm::model::{ClassEntity, MethodBuilder, MethodEntity};
use crate::jvm::{
    BinaryName, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor, Name, RefType,
    RenderDescriptor, UnqualifiedName,
};
use crate::rename::Dictionary;
use crate::repository::ClassRepository;
use crate::transform::{member_dictionary, TransformContext, Transformer};
use crate::{Error, Result};
use indexmap::IndexMap;
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvokeProxySettings {
    /// Proxy `invokestatic`, `invokevirtual`, and `invokeinterface`
    pub invoke: bool,

    /// Proxy field reads and writes
    pub field: bool,

    /// Leave each eligible site alone with probability one half
    pub random: bool,
}

impl Default for InvokeProxySettings {
    fn default() -> Self {
        InvokeProxySettings {
            invoke: true,
            field: true,
            random: false,
        }
    }
}

/// How many sites were routed through proxies
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct ProxyCounts {
    pub invokes: usize,
    pub fields: usize,
}

/// Routes method calls and field accesses through private static methods of the calling class
///
/// `a.foo(b)` becomes `proxy(a, b)` where `proxy` is a generated method whose whole body is the
/// original instruction. Sites with the same instruction share a proxy.
///
/// Protected members declared in another package are left alone: the receiver of a protected
/// access has to be the calling class, which a proxy taking the declared owner type can't
/// guarantee. Targets that can't be resolved are left alone too.
pub struct InvokeProxy {
    settings: InvokeProxySettings,
}

impl InvokeProxy {
    pub const NAME: &'static str = "InvokeProxy";

    pub fn new(settings: InvokeProxySettings) -> InvokeProxy {
        InvokeProxy { settings }
    }

    /// Pick the sites of one class that will be proxied
    fn plan(
        &self,
        repository: &ClassRepository,
        class: &ClassEntity,
        rng: &mut impl Rng,
    ) -> Vec<(usize, InsnId)> {
        if class.is_module() || (class.is_interface() && class.version.major_version < 52) {
            return vec![];
        }
        let mut sites = vec![];
        for (index, method) in class.methods.iter().enumerate() {
            let code = match &method.code {
                Some(code) => code,
                None => continue,
            };
            for (id, insn) in code.instructions.iter() {
                if !self.eligible(method, insn) {
                    continue;
                }
                if self.settings.random && rng.random_bool(0.5) {
                    continue;
                }
                if !keeps_access(repository, &class.name, insn) {
                    log::trace!("{}: {:?} keeps its direct access", class.name, insn);
                    continue;
                }
                sites.push((index, id));
            }
        }
        sites
    }

    fn eligible(&self, method: &MethodEntity, insn: &Insn) -> bool {
        match insn {
            Insn::Method { opcode, .. } => {
                self.settings.invoke
                    && matches!(*opcode, INVOKESTATIC | INVOKEVIRTUAL | INVOKEINTERFACE)
            }
            Insn::Field { opcode, .. } => {
                // Final fields can only be assigned from the initializers themselves
                let is_put = matches!(*opcode, PUTFIELD | PUTSTATIC);
                self.settings.field && !(is_put && method.name.is_special())
            }
            _ => false,
        }
    }

    /// Rewrite the planned sites of a class, adding the proxies it needs
    pub fn proxy_sites(
        class: &mut ClassEntity,
        sites: &[(usize, InsnId)],
        dictionary: &mut Dictionary,
    ) -> Result<ProxyCounts> {
        let mut counts = ProxyCounts::default();
        let mut proxies: IndexMap<String, MethodEntity> = IndexMap::new();
        let mut edits: Vec<EditBuffer> = class.methods.iter().map(|_| EditBuffer::new()).collect();

        for (method, id) in sites {
            let insn = match class.methods[*method]
                .code
                .as_ref()
                .and_then(|code| code.instructions.get(*id))
            {
                Some(insn) => insn.clone(),
                None => continue,
            };
            let descriptor = match proxy_descriptor(&insn) {
                Some(descriptor) => descriptor,
                None => continue,
            };
            let key = format!("{:?}|{}", insn, descriptor.render());
            if !proxies.contains_key(&key) {
                let name = UnqualifiedName::from_string(dictionary.next_name())
                    .map_err(Error::InvalidDictionary)?;
                proxies.insert(key.clone(), proxy_method(name, descriptor, insn.clone()));
            }
            let proxy = &proxies[&key];
            edits[*method].replace(
                *id,
                Insn::Method {
                    opcode: INVOKESTATIC,
                    owner: RefType::Object(class.name.clone()),
                    name: proxy.name.clone(),
                    descriptor: proxy.descriptor.clone(),
                    is_interface: class.is_interface(),
                },
            );
            match insn {
                Insn::Method { .. } => counts.invokes += 1,
                _ => counts.fields += 1,
            }
        }

        for (method, edits) in class.methods.iter_mut().zip(edits) {
            if let Some(code) = &mut method.code {
                edits.commit(&mut code.instructions)?;
            }
        }
        for (_, proxy) in proxies {
            class.add_method(proxy)?;
        }
        Ok(counts)
    }
}

/// Descriptor of the static method that can stand in for the instruction
fn proxy_descriptor(insn: &Insn) -> Option<MethodDescriptor<BinaryName>> {
    Some(match insn {
        Insn::Method {
            opcode,
            owner,
            descriptor,
            ..
        } => {
            let mut descriptor = descriptor.clone();
            if *opcode != INVOKESTATIC {
                descriptor
                    .parameters
                    .insert(0, FieldType::Ref(owner.clone()));
            }
            descriptor
        }
        Insn::Field {
            opcode,
            owner,
            descriptor,
            ..
        } => {
            let receiver = FieldType::object(owner.clone());
            let (parameters, return_type) = match *opcode {
                GETSTATIC => (vec![], Some(descriptor.clone())),
                GETFIELD => (vec![receiver], Some(descriptor.clone())),
                PUTSTATIC => (vec![descriptor.clone()], None),
                PUTFIELD => (vec![receiver, descriptor.clone()], None),
                _ => return None,
            };
            MethodDescriptor {
                parameters,
                return_type,
            }
        }
        _ => return None,
    })
}

/// `private static R proxy(P0 p0, P1 p1, ...) { <target>; return; }`
fn proxy_method(
    name: UnqualifiedName,
    descriptor: MethodDescriptor<BinaryName>,
    target: Insn,
) -> MethodEntity {
    let parameters = descriptor.parameters.clone();
    let return_type = descriptor.return_type.clone();
    let builder = MethodBuilder::new(
        MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC,
        name,
        descriptor,
    );
    let insns = {
        let mut code = builder.code();
        let mut slot = 0;
        for parameter in &parameters {
            code.get_local(slot, parameter);
            slot += parameter.width() as u16;
        }
        code.push(target).return_(return_type.as_ref());
        code.build()
    };
    builder.finish(insns)
}

/// Can a static method of `caller` perform the access of `insn` as well as the original site?
fn keeps_access(repository: &ClassRepository, caller: &BinaryName, insn: &Insn) -> bool {
    let (owner, name, descriptor, is_method) = match insn {
        Insn::Method {
            owner: RefType::Object(owner),
            name,
            descriptor,
            ..
        } => (owner, name, descriptor.render(), true),
        // Methods of array types are public
        Insn::Method { .. } => return true,
        Insn::Field {
            owner,
            name,
            descriptor,
            ..
        } => (owner, name, descriptor.render(), false),
        _ => return false,
    };
    if owner == caller {
        return true;
    }
    match find_member(repository, owner, name, &descriptor, is_method) {
        Some((declaring, is_protected)) => !is_protected || declaring.package() == caller.package(),
        None => false,
    }
}

/// Class declaring the member as seen from `owner`, and whether it is protected
///
/// Superclasses and superinterfaces are searched breadth first.
fn find_member(
    repository: &ClassRepository,
    owner: &BinaryName,
    name: &UnqualifiedName,
    descriptor: &str,
    is_method: bool,
) -> Option<(BinaryName, bool)> {
    let mut queue = VecDeque::from([owner.clone()]);
    let mut seen = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let class = repository.resolve(current.as_str())?;
        let found = if is_method {
            class
                .get_method(name.as_str(), descriptor)
                .map(|method| method.access_flags.contains(MethodAccessFlags::PROTECTED))
        } else {
            class
                .get_field(name.as_str(), descriptor)
                .map(|field| field.access_flags.contains(FieldAccessFlags::PROTECTED))
        };
        if let Some(is_protected) = found {
            return Some((class.name.clone(), is_protected));
        }
        queue.extend(class.superclass.iter().cloned());
        queue.extend(class.interfaces.iter().cloned());
    }
    None
}

impl Transformer for InvokeProxy {
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

        let mut plans: HashMap<BinaryName, Vec<(usize, InsnId)>> = HashMap::new();
        for class in repository.program_classes() {
            let sites = self.plan(repository, class, rng);
            if !sites.is_empty() {
                plans.insert(class.name.clone(), sites);
            }
        }

        let mut total = ProxyCounts::default();
        for class in repository.program_classes_mut() {
            let sites = match plans.remove(class.name.as_str()) {
                Some(sites) => sites,
                None => continue,
            };
            let mut dictionary = member_dictionary(setting, rng, class)?;
            let counts = Self::proxy_sites(class, &sites, &mut dictionary)?;
            total.invokes += counts.invokes;
            total.fields += counts.fields;
        }
        log::info!(
            "Proxied {} invocations and {} field accesses",
            total.invokes,
            total.fields
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DictionarySetting;
    use crate::jvm::model::{ClassOrigin, FieldEntity};
    use crate::jvm::verifier::{verify_method, OpaqueHierarchy};
    use crate::jvm::code::InsnBuilder;
    use crate::jvm::{ClassAccessFlags, ParseDescriptor};
    use std::mem;

    fn binary(name: &str) -> BinaryName {
        BinaryName::from_string(name.to_owned()).unwrap()
    }

    fn unqualified(name: &str) -> UnqualifiedName {
        UnqualifiedName::from_string(name.to_owned()).unwrap()
    }

    fn class(name: &str, superclass: &BinaryName) -> ClassEntity {
        ClassEntity::new(
            binary(name),
            Some(superclass.clone()),
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Target {
                entry: format!("{}.class", name),
            },
        )
    }

    fn no_args() -> MethodDescriptor<BinaryName> {
        MethodDescriptor::parse("()V").unwrap()
    }

    fn method(
        flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut InsnBuilder<'_>),
    ) -> MethodEntity {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let builder = MethodBuilder::new(flags, unqualified(name), descriptor);
        let insns = {
            let mut code = builder.code();
            body(&mut code);
            code.build()
        };
        builder.finish(insns)
    }

    /// `lib/Base` with a public `size()` and a protected `grow(I)V`, and `app/Counter extends
    /// lib/Base` calling both, plus a static helper and its own field
    fn repository() -> ClassRepository {
        let mut repository = ClassRepository::default();
        repository.external.insert(ClassEntity::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
            ClassOrigin::Synthetic,
        ));

        let mut base = class("lib/Base", &BinaryName::OBJECT);
        base.add_method(method(MethodAccessFlags::PUBLIC, "size", "()I", |code| {
            code.const_int(0).return_(Some(&FieldType::int()));
        }))
        .unwrap();
        base.add_method(method(MethodAccessFlags::PROTECTED, "grow", "(I)V", |code| {
            code.return_(None);
        }))
        .unwrap();
        repository.target.insert(base);

        let base = binary("lib/Base");
        let counter_name = binary("app/Counter");
        let mut counter = class("app/Counter", &base);
        counter
            .add_field(FieldEntity::new(
                FieldAccessFlags::PRIVATE,
                unqualified("count"),
                FieldType::int(),
            ))
            .unwrap();
        counter
            .add_method(method(MethodAccessFlags::PUBLIC, "<init>", "()V", |code| {
                let this = FieldType::object(counter_name.clone());
                let count = unqualified("count");
                code.get_local(0, &this)
                    .invoke(INVOKESPECIAL, base.clone(), UnqualifiedName::INIT, no_args())
                    .get_local(0, &this)
                    .const_int(0)
                    .access_field(PUTFIELD, counter_name.clone(), count, FieldType::int())
                    .return_(None);
            }))
            .unwrap();
        counter
            .add_method(method(MethodAccessFlags::PUBLIC, "total", "()I", |code| {
                let this = FieldType::object(counter_name.clone());
                let size = MethodDescriptor::parse("()I").unwrap();
                let grow = MethodDescriptor::parse("(I)V").unwrap();
                let count = unqualified("count");
                code.get_local(0, &this)
                    .invoke(INVOKEVIRTUAL, base.clone(), unqualified("size"), size.clone())
                    .get_local(0, &this)
                    .invoke(INVOKEVIRTUAL, base.clone(), unqualified("size"), size)
                    .simple(IADD)
                    .get_local(0, &this)
                    .access_field(GETFIELD, counter_name.clone(), count, FieldType::int())
                    .simple(IADD)
                    .get_local(0, &this)
                    .const_int(1)
                    .invoke(INVOKEVIRTUAL, base.clone(), unqualified("grow"), grow)
                    .return_(Some(&FieldType::int()));
            }))
            .unwrap();
        repository.target.insert(counter);
        repository
    }

    fn proxy(settings: InvokeProxySettings) -> ClassEntity {
        let mut context =
            TransformContext::new(repository(), DictionarySetting::default(), Some(4));
        InvokeProxy::new(settings).run(&mut context).unwrap();
        context.repository.target.get("app/Counter").unwrap().clone()
    }

    #[test]
    fn calls_and_fields_go_through_proxies() {
        let counter = proxy(InvokeProxySettings::default());

        // one proxy for both `size` calls, one for the `count` read
        assert_eq!(counter.methods.len(), 4);
        let total = counter.get_method("total", "()I").unwrap();
        let calls: Vec<&Insn> = total
            .code
            .as_ref()
            .unwrap()
            .instructions
            .insns()
            .filter(|insn| matches!(insn, Insn::Method { .. }))
            .collect();
        assert_eq!(calls.len(), 4);
        match (calls[0], calls[1]) {
            (
                Insn::Method {
                    opcode: INVOKESTATIC,
                    owner,
                    name: first,
                    descriptor,
                    ..
                },
                Insn::Method { name: second, .. },
            ) => {
                assert_eq!(*owner, RefType::Object(binary("app/Counter")));
                assert_eq!(first, second);
                assert_eq!(descriptor.render(), "(Llib/Base;)I");
            }
            other => panic!("unexpected {:?}", other),
        }

        // protected `grow` from another package stays a direct call
        assert!(matches!(
            calls[3],
            Insn::Method { opcode: INVOKEVIRTUAL, name, .. } if name.as_str() == "grow"
        ));

        // the constructor still assigns its field directly
        let init = counter.get_method("<init>", "()V").unwrap();
        assert!(init
            .code
            .as_ref()
            .unwrap()
            .instructions
            .insns()
            .any(|insn| matches!(insn, Insn::Field { opcode: PUTFIELD, .. })));

        let proxy = counter
            .methods
            .iter()
            .find(|method| method.descriptor.render() == "(Lapp/Counter;)I")
            .unwrap();
        assert!(proxy.is_private() && proxy.is_static());

        let mut counter = counter;
        let mut methods = mem::take(&mut counter.methods);
        for method in &mut methods {
            verify_method(&counter, method, &OpaqueHierarchy).unwrap();
        }
    }

    #[test]
    fn kinds_can_be_turned_off() {
        let counter = proxy(InvokeProxySettings {
            field: false,
            ..InvokeProxySettings::default()
        });
        assert_eq!(counter.methods.len(), 3);

        let counter = proxy(InvokeProxySettings {
            invoke: false,
            field: false,
            random: false,
        });
        assert_eq!(counter.methods.len(), 2);
    }

    #[test]
    fn descriptors_take_the_receiver_first() {
        let put = Insn::Field {
            opcode: PUTFIELD,
            owner: binary("app/Point"),
            name: unqualified("x"),
            descriptor: FieldType::long(),
        };
        assert_eq!(proxy_descriptor(&put).unwrap().render(), "(Lapp/Point;J)V");

        let clone = Insn::Method {
            opcode: INVOKEVIRTUAL,
            owner: RefType::array(FieldType::int()),
            name: unqualified("clone"),
            descriptor: MethodDescriptor::parse("()Ljava/lang/Object;").unwrap(),
            is_interface: false,
        };
        assert_eq!(
            proxy_descriptor(&clone).unwrap().render(),
            "([I)Ljava/lang/Object;"
        );

        let method = proxy_method(
            unqualified("p"),
            proxy_descriptor(&put).unwrap(),
            put.clone(),
        );
        let code = method.code.as_ref().unwrap();
        assert_eq!(code.max_locals, 3);
        let insns: Vec<&Insn> = code.instructions.insns().collect();
        assert_eq!(insns[1], &Insn::Var { opcode: LLOAD, index: 1 });
        assert_eq!(insns[2], &put);
    }
}
