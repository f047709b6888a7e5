//! Symbolic reference rewriting
//!
//! A [`Remapper`] answers "what is this class/field/method called now?" for references written
//! against the original names. [`remap_class`] walks every place a class file mentions a class or
//! member and substitutes the answers in place.
//!
//! Member lookups always use the *original* owner and descriptor, so a class is remapped by
//! reading its old identities before overwriting them.

use crate::hierarchy::ClassHierarchy;
use crate::jvm::code::{BootstrapMethod, Code, Constant, Handle, Insn, MemberDescriptor};
use crate::jvm::model::{
    Annotation, ClassEntity, ElementValue, EnclosingMethod, FieldEntity, InnerClassEntry,
    MemberKey, MethodEntity,
};
use crate::jvm::{
    BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType, RenderDescriptor,
    UnqualifiedName,
};
use crate::rename::remap_signature;

pub trait Remapper {
    /// New name of a class, `None` if it keeps its name
    fn map_class_name(&self, name: &str) -> Option<BinaryName>;

    /// New name of the field a `owner.name:descriptor` reference resolves to
    fn map_field_name(
        &self,
        owner: &str,
        name: &UnqualifiedName,
        descriptor: &str,
    ) -> Option<UnqualifiedName>;

    /// New name of the method a `owner.name descriptor` reference resolves to
    fn map_method_name(
        &self,
        owner: &RefType<BinaryName>,
        name: &UnqualifiedName,
        descriptor: &str,
    ) -> Option<UnqualifiedName>;

    /// New name of the interface method an `invokedynamic` call site implements
    fn map_invoke_dynamic_name(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<UnqualifiedName>;

    /// New name of an annotation element
    fn map_annotation_element(&self, annotation: &BinaryName, name: &str) -> Option<String>;

    fn map_binary_name(&self, name: &BinaryName) -> BinaryName {
        self.map_class_name(name.as_str())
            .unwrap_or_else(|| name.clone())
    }

    fn map_ref_type(&self, ref_type: &RefType<BinaryName>) -> RefType<BinaryName> {
        ref_type.map(|class| self.map_binary_name(class))
    }

    fn map_field_type(&self, field_type: &FieldType<BinaryName>) -> FieldType<BinaryName> {
        field_type.map(|class| self.map_binary_name(class))
    }

    fn map_method_descriptor(
        &self,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> MethodDescriptor<BinaryName> {
        descriptor.map(|class| self.map_binary_name(class))
    }

    /// Remap a rendered field or method descriptor
    ///
    /// Unparseable descriptors are returned unchanged.
    fn map_descriptor_str(&self, descriptor: &str) -> String {
        if descriptor.starts_with('(') {
            match MethodDescriptor::<BinaryName>::parse(descriptor) {
                Ok(parsed) => self.map_method_descriptor(&parsed).render(),
                Err(_) => descriptor.to_owned(),
            }
        } else {
            match FieldType::<BinaryName>::parse(descriptor) {
                Ok(parsed) => self.map_field_type(&parsed).render(),
                Err(_) => descriptor.to_owned(),
            }
        }
    }

    fn map_signature(&self, signature: &str) -> String {
        let mapped = remap_signature(signature, |class| {
            self.map_class_name(class)
                .map(|name| name.as_str().to_owned())
        });
        match mapped {
            Some(mapped) => mapped,
            None => {
                log::debug!("Leaving malformed signature untouched: {}", signature);
                signature.to_owned()
            }
        }
    }

    fn map_handle(&self, handle: &Handle) -> Handle {
        let descriptor = handle.descriptor.render();
        let name = if handle.kind.is_field() {
            self.map_field_name(handle.owner.as_str(), &handle.name, &descriptor)
        } else {
            let owner = RefType::Object(handle.owner.clone());
            self.map_method_name(&owner, &handle.name, &descriptor)
        };
        Handle {
            kind: handle.kind,
            owner: self.map_binary_name(&handle.owner),
            name: name.unwrap_or_else(|| handle.name.clone()),
            descriptor: match &handle.descriptor {
                MemberDescriptor::Field(field) => MemberDescriptor::Field(self.map_field_type(field)),
                MemberDescriptor::Method(method) => {
                    MemberDescriptor::Method(self.map_method_descriptor(method))
                }
            },
            is_interface: handle.is_interface,
        }
    }

    fn map_constant(&self, constant: &Constant) -> Constant {
        match constant {
            Constant::Class(class) => Constant::Class(self.map_ref_type(class)),
            Constant::MethodType(method_type) => {
                Constant::MethodType(self.map_method_descriptor(method_type))
            }
            Constant::MethodHandle(handle) => Constant::MethodHandle(self.map_handle(handle)),
            other => other.clone(),
        }
    }
}

/// Remapper backed by the rename decisions recorded in a class hierarchy
pub struct HierarchyRemapper<'h> {
    hierarchy: &'h ClassHierarchy,
}

impl<'h> HierarchyRemapper<'h> {
    pub fn new(hierarchy: &'h ClassHierarchy) -> HierarchyRemapper<'h> {
        HierarchyRemapper { hierarchy }
    }
}

impl<'h> Remapper for HierarchyRemapper<'h> {
    fn map_class_name(&self, name: &str) -> Option<BinaryName> {
        self.hierarchy.mapped_class_name(name).cloned()
    }

    fn map_field_name(
        &self,
        owner: &str,
        name: &UnqualifiedName,
        descriptor: &str,
    ) -> Option<UnqualifiedName> {
        let owner = self.hierarchy.lookup(owner)?;
        let key = MemberKey::new(name.clone(), descriptor);
        let field = self.hierarchy.search_field(owner, &key)?;
        self.hierarchy.field(field).new_name().cloned()
    }

    fn map_method_name(
        &self,
        owner: &RefType<BinaryName>,
        name: &UnqualifiedName,
        descriptor: &str,
    ) -> Option<UnqualifiedName> {
        // Methods called on arrays are inherited from `Object`
        let owner = match owner {
            RefType::Object(owner) => self.hierarchy.lookup(owner.as_str())?,
            _ => return None,
        };
        let key = MemberKey::new(name.clone(), descriptor);
        let method = self.hierarchy.search_method(owner, &key)?;
        self.hierarchy.method(method).new_name().cloned()
    }

    fn map_invoke_dynamic_name(
        &self,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<UnqualifiedName> {
        let interface = match &descriptor.return_type {
            Some(FieldType::Ref(RefType::Object(class))) => self.hierarchy.lookup(class.as_str())?,
            _ => return None,
        };
        let method = self
            .hierarchy
            .search_abstract_method(interface, name.as_str())?;
        self.hierarchy.method(method).new_name().cloned()
    }

    fn map_annotation_element(&self, annotation: &BinaryName, name: &str) -> Option<String> {
        let id = self.hierarchy.lookup(annotation.as_str())?;
        self.hierarchy
            .node(id)
            .methods
            .values()
            .find(|method| {
                method.key.name.as_str() == name && method.key.descriptor.starts_with("()")
            })
            .and_then(|method| method.new_name())
            .map(|new_name| new_name.as_str().to_owned())
    }
}

/// Rewrite every symbolic reference of a class in place
pub fn remap_class<R: Remapper + ?Sized>(class: &mut ClassEntity, remapper: &R) {
    let owner = class.name.clone();

    for field in &mut class.fields {
        remap_field(&owner, field, remapper);
    }
    for method in &mut class.methods {
        remap_method(&owner, method, remapper);
    }

    class.name = remapper.map_binary_name(&class.name);
    class.superclass = class
        .superclass
        .as_ref()
        .map(|superclass| remapper.map_binary_name(superclass));
    for interface in &mut class.interfaces {
        *interface = remapper.map_binary_name(interface);
    }
    if let Some(signature) = &mut class.signature {
        *signature = remapper.map_signature(signature);
    }
    for inner_class in &mut class.inner_classes {
        remap_inner_class(inner_class, remapper);
    }
    if let Some(enclosing) = &mut class.enclosing_method {
        remap_enclosing_method(enclosing, remapper);
    }
    if let Some(nest_host) = &mut class.nest_host {
        *nest_host = remapper.map_binary_name(nest_host);
    }
    for member in &mut class.nest_members {
        *member = remapper.map_binary_name(member);
    }
    remap_annotations(&mut class.visible_annotations, remapper);
    remap_annotations(&mut class.invisible_annotations, remapper);
}

fn remap_field<R: Remapper + ?Sized>(owner: &BinaryName, field: &mut FieldEntity, remapper: &R) {
    let descriptor = field.descriptor.render();
    if let Some(name) = remapper.map_field_name(owner.as_str(), &field.name, &descriptor) {
        field.name = name;
    }
    field.descriptor = remapper.map_field_type(&field.descriptor);
    if let Some(signature) = &mut field.signature {
        *signature = remapper.map_signature(signature);
    }
    remap_annotations(&mut field.visible_annotations, remapper);
    remap_annotations(&mut field.invisible_annotations, remapper);
}

fn remap_method<R: Remapper + ?Sized>(
    owner: &BinaryName,
    method: &mut MethodEntity,
    remapper: &R,
) {
    let descriptor = method.descriptor.render();
    let owner_type = RefType::Object(owner.clone());
    if let Some(name) = remapper.map_method_name(&owner_type, &method.name, &descriptor) {
        method.name = name;
    }
    method.descriptor = remapper.map_method_descriptor(&method.descriptor);
    if let Some(signature) = &mut method.signature {
        *signature = remapper.map_signature(signature);
    }
    for exception in &mut method.exceptions {
        *exception = remapper.map_binary_name(exception);
    }
    if let Some(default) = &mut method.annotation_default {
        remap_element_value(default, remapper);
    }
    remap_annotations(&mut method.visible_annotations, remapper);
    remap_annotations(&mut method.invisible_annotations, remapper);
    if let Some(code) = &mut method.code {
        remap_code(code, remapper);
    }
}

fn remap_code<R: Remapper + ?Sized>(code: &mut Code, remapper: &R) {
    for id in code.instructions.ids() {
        if let Some(insn) = code.instructions.get_mut(id) {
            remap_insn(insn, remapper);
        }
    }
    for block in &mut code.try_catch_blocks {
        if let Some(catch_type) = &mut block.catch_type {
            *catch_type = remapper.map_binary_name(catch_type);
        }
    }
    for local in &mut code.local_variables {
        local.descriptor = remapper.map_field_type(&local.descriptor);
    }
}

/// Rewrite the symbolic operands of one instruction
pub fn remap_insn<R: Remapper + ?Sized>(insn: &mut Insn, remapper: &R) {
    match insn {
        Insn::Type { class, .. } | Insn::MultiANewArray { class, .. } => {
            *class = remapper.map_ref_type(class);
        }
        Insn::Field {
            owner,
            name,
            descriptor,
            ..
        } => {
            if let Some(new_name) =
                remapper.map_field_name(owner.as_str(), name, &descriptor.render())
            {
                *name = new_name;
            }
            *owner = remapper.map_binary_name(owner);
            *descriptor = remapper.map_field_type(descriptor);
        }
        Insn::Method {
            owner,
            name,
            descriptor,
            ..
        } => {
            if let Some(new_name) = remapper.map_method_name(owner, name, &descriptor.render()) {
                *name = new_name;
            }
            *owner = remapper.map_ref_type(owner);
            *descriptor = remapper.map_method_descriptor(descriptor);
        }
        Insn::InvokeDynamic {
            name,
            descriptor,
            bootstrap,
        } => {
            if let Some(new_name) = remapper.map_invoke_dynamic_name(name, descriptor) {
                *name = new_name;
            }
            *descriptor = remapper.map_method_descriptor(descriptor);
            remap_bootstrap(bootstrap, remapper);
        }
        Insn::Ldc(constant) => *constant = remapper.map_constant(constant),
        _ => (),
    }
}

fn remap_bootstrap<R: Remapper + ?Sized>(bootstrap: &mut BootstrapMethod, remapper: &R) {
    bootstrap.handle = remapper.map_handle(&bootstrap.handle);
    for argument in &mut bootstrap.arguments {
        *argument = remapper.map_constant(argument);
    }
}

fn remap_inner_class<R: Remapper + ?Sized>(entry: &mut InnerClassEntry, remapper: &R) {
    let mapped = remapper.map_class_name(entry.inner_class.as_str());
    let mapped_outer = entry
        .outer_class
        .as_ref()
        .map(|outer| remapper.map_binary_name(outer));

    if let (Some(mapped), Some(_)) = (&mapped, &entry.inner_name) {
        let prefix = mapped_outer.as_ref().map(|outer| format!("{}$", outer));
        let stripped = prefix
            .as_deref()
            .and_then(|prefix| mapped.as_str().strip_prefix(prefix));
        let simple = match stripped {
            Some(simple) => simple,
            None => mapped
                .as_str()
                .rsplit(|c: char| c == '$' || c == '/')
                .next()
                .unwrap_or(mapped.as_str()),
        };
        if let Ok(simple) = UnqualifiedName::from_string(simple.to_owned()) {
            entry.inner_name = Some(simple);
        }
    }
    if let Some(mapped) = mapped {
        entry.inner_class = mapped;
    }
    entry.outer_class = mapped_outer;
}

fn remap_enclosing_method<R: Remapper + ?Sized>(enclosing: &mut EnclosingMethod, remapper: &R) {
    if let Some((name, descriptor)) = &mut enclosing.method {
        let owner = RefType::Object(enclosing.class.clone());
        if let Some(new_name) = remapper.map_method_name(&owner, name, &descriptor.render()) {
            *name = new_name;
        }
        *descriptor = remapper.map_method_descriptor(descriptor);
    }
    enclosing.class = remapper.map_binary_name(&enclosing.class);
}

fn remap_annotations<R: Remapper + ?Sized>(annotations: &mut [Annotation], remapper: &R) {
    for annotation in annotations {
        remap_annotation(annotation, remapper);
    }
}

fn remap_annotation<R: Remapper + ?Sized>(annotation: &mut Annotation, remapper: &R) {
    if let Some(class) = annotation.class().cloned() {
        for (name, _) in &mut annotation.elements {
            if let Some(new_name) = remapper.map_annotation_element(&class, name) {
                *name = new_name;
            }
        }
    }
    annotation.type_descriptor = remapper.map_field_type(&annotation.type_descriptor);
    for (_, value) in &mut annotation.elements {
        remap_element_value(value, remapper);
    }
}

fn remap_element_value<R: Remapper + ?Sized>(value: &mut ElementValue, remapper: &R) {
    match value {
        ElementValue::Const { .. } => (),
        ElementValue::Enum {
            type_descriptor,
            const_name,
        } => {
            if let Some(class) = type_descriptor.class() {
                let descriptor = type_descriptor.render();
                let name = UnqualifiedName::from_string(const_name.clone());
                if let Ok(name) = name {
                    let new_name = remapper.map_field_name(class.as_str(), &name, &descriptor);
                    if let Some(new_name) = new_name {
                        *const_name = new_name.as_str().to_owned();
                    }
                }
            }
            *type_descriptor = remapper.map_field_type(type_descriptor);
        }
        ElementValue::Class(Some(class)) => *class = remapper.map_field_type(class),
        ElementValue::Class(None) => (),
        ElementValue::Annotation(annotation) => remap_annotation(annotation, remapper),
        ElementValue::Array(values) => {
            for value in values {
                remap_element_value(value, remapper);
            }
        }
    }
}
