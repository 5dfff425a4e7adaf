//! Pass 2: member merge.
//!
//! Every patch type is merged into the output type of the same target name: properties,
//! events, the remaining methods, optional enum pruning and fields, then nested types.
//! Overwritten methods keep their previous body in a captured original (`orig_Foo`)
//! so patches can call through to it.

use std::collections::{HashMap, HashSet};

use crate::{
    metadata::{
        attributes::{has_attribute, CustomAttribute},
        body::{Instruction, OpCode},
        flags::MethodAttributes,
        image::{
            Declaration, EventDef, EventId, FieldId, Image, MethodId, PropertyDef, PropertyId,
            TypeId,
        },
        members::{findable_id, MemberReference, CCTOR, CTOR},
    },
    patcher::{
        directives::{Directive, DirectiveSet},
        markers::{marker_attribute, original_name_attribute, Marker},
        names::{
            allowed_special_name, backing_field, is_directive_namespace, original_method_name,
            target_member_name, target_type_name, ORIGINAL_PREFIX,
        },
        MergeContext,
    },
    Result,
};

/// Directives a property or event hands down to its backing field
struct Inherited {
    directives: DirectiveSet,
    attributes: Vec<CustomAttribute>,
}

/// Per type state of the member merge
struct TypeMerge {
    source: TypeId,
    target: TypeId,
    type_added: bool,
    consumed: HashSet<MethodId>,
    inherited: HashMap<FieldId, Inherited>,
}

fn push_unique(attributes: &mut Vec<CustomAttribute>, added: impl IntoIterator<Item = CustomAttribute>) {
    for attribute in added {
        if !attributes.contains(&attribute) {
            attributes.push(attribute);
        }
    }
}

/// Attribute types of the directive library namespace go first, so attribute handling
/// declarations exist before anything uses them
fn is_attribute_declaration(patch: &Image, id: TypeId) -> bool {
    patch.type_def(id).is_ok_and(|def| {
        is_directive_namespace(&def.namespace)
            && def
                .base_type
                .as_ref()
                .is_some_and(|base| base.full_name() == "System.Attribute")
    })
}

impl MergeContext<'_> {
    /// Runs the member merge for one patch image
    pub(crate) fn patch_image(&mut self, patch: &Image) -> Result<()> {
        let (attributes, others): (Vec<TypeId>, Vec<TypeId>) = patch
            .top_level_types()
            .iter()
            .partition(|&&id| is_attribute_declaration(patch, id));

        for id in attributes.into_iter().chain(others) {
            self.patch_type(patch, id)?;
        }
        Ok(())
    }

    fn copy_bound_attributes(
        &mut self,
        declaration: Declaration,
        attributes: &[CustomAttribute],
    ) -> Result<()> {
        let bound = self.handlers.bound_attributes(attributes);
        if !bound.is_empty() {
            push_unique(self.output.custom_attributes_mut(declaration)?, bound);
        }
        Ok(())
    }

    fn patch_type(&mut self, patch: &Image, id: TypeId) -> Result<()> {
        let def = patch.type_def(id)?;
        let directives = DirectiveSet::parse(&def.custom_attributes);
        let name = target_type_name(patch, id)?;

        let Some(target) = self.output.find_type(&name) else {
            return Ok(());
        };

        if (directives.has(Directive::Ignore) && !is_directive_namespace(&def.namespace))
            || self.config.is_skipped(&name)
        {
            if directives.has(Directive::Ignore) {
                self.copy_bound_attributes(Declaration::Type(target), &def.custom_attributes)?;
            }
            for &nested in &def.nested {
                self.patch_type(patch, nested)?;
            }
            return Ok(());
        }

        verbose!(self.config, "[PatchType] Patching {}", name);
        {
            let target_attributes = &mut self.output.type_def_mut(target)?.custom_attributes;
            for attribute in &def.custom_attributes {
                if !has_attribute(target_attributes, &attribute.type_name()) {
                    target_attributes.push(attribute.clone());
                }
            }
        }

        let type_added = directives.has(Directive::Added)
            || DirectiveSet::parse(&self.output.type_def(target)?.custom_attributes)
                .has(Directive::Added);
        let mut merge = TypeMerge {
            source: id,
            target,
            type_added,
            consumed: HashSet::new(),
            inherited: HashMap::new(),
        };

        for &property in &def.properties {
            self.patch_property(patch, &mut merge, property)?;
        }
        for &event in &def.events {
            self.patch_event(patch, &mut merge, event)?;
        }
        for &method in &def.methods {
            if !merge.consumed.contains(&method) {
                self.patch_method(patch, &merge, method, false)?;
            }
        }

        if directives.has(Directive::EnumReplace) {
            let fields = self.output.type_def(target)?.fields.clone();
            for field in fields {
                if self.output.field_def(field)?.name != "value__" {
                    self.output.remove_field(field)?;
                }
            }
        }

        if directives.has(Directive::Public) {
            let target_def = self.output.type_def_mut(target)?;
            let nested = target_def.declaring.is_some();
            target_def.attributes.set_public(nested);
        }

        for &field in &def.fields {
            self.patch_field(patch, &merge, field)?;
        }

        for &nested in &def.nested {
            self.patch_type(patch, nested)?;
        }
        Ok(())
    }

    /// Deletes a property or event with its accessors and backing field
    fn remove_accessor_member(
        &mut self,
        target: TypeId,
        name: &str,
        accessors: Vec<MethodId>,
    ) -> Result<()> {
        for accessor in accessors {
            self.output.remove_method(accessor)?;
        }
        if let Some(field) = backing_field(self.output, target, name) {
            self.output.remove_field(field)?;
        }
        Ok(())
    }

    /// Copies the backing field of a new property or event unless the output has one
    fn add_backing_field(
        &mut self,
        patch: &Image,
        merge: &TypeMerge,
        source_name: &str,
        name: &str,
    ) -> Result<()> {
        let Some(field) = backing_field(patch, merge.source, source_name) else {
            return Ok(());
        };
        if backing_field(self.output, merge.target, name).is_some() {
            return Ok(());
        }

        let mut def = patch.field_def(field)?.clone();
        def.token = Default::default();
        def.name = def.name.replacen(source_name, name, 1);
        self.output.add_field(merge.target, def)?;
        Ok(())
    }

    fn remember_backing_field(
        patch: &Image,
        merge: &mut TypeMerge,
        source_name: &str,
        directives: &DirectiveSet,
        attributes: &[CustomAttribute],
    ) {
        if let Some(field) = backing_field(patch, merge.source, source_name) {
            merge.inherited.insert(
                field,
                Inherited {
                    directives: directives.clone(),
                    attributes: attributes.to_vec(),
                },
            );
        }
    }

    fn patch_property(
        &mut self,
        patch: &Image,
        merge: &mut TypeMerge,
        id: PropertyId,
    ) -> Result<()> {
        let source = patch.property_def(id)?;
        let directives = DirectiveSet::parse(&source.custom_attributes);
        let name = target_member_name(&source.name, &directives);
        let existing = self.output.find_property(merge.target, &name);
        Self::remember_backing_field(
            patch,
            merge,
            &source.name,
            &directives,
            &source.custom_attributes,
        );

        if directives.has(Directive::Ignore) {
            if let Some(existing) = existing {
                self.copy_bound_attributes(Declaration::Property(existing), &source.custom_attributes)?;
            }
            merge.consumed.extend(source.accessors());
            return Ok(());
        }

        if directives.removes() {
            if let Some(existing) = existing {
                verbose!(self.config, "[PatchProperty] Removing {}", name);
                let accessors = self.output.property_def(existing)?.accessors();
                self.output.remove_property(existing)?;
                self.remove_accessor_member(merge.target, &name, accessors)?;
            }
            if directives.has(Directive::Remove) {
                merge.consumed.extend(source.accessors());
                return Ok(());
            }
        }

        let target = match existing.filter(|_| !directives.removes()) {
            Some(existing) => existing,
            None => {
                verbose!(self.config, "[PatchProperty] Adding {}", name);
                let mut def = PropertyDef::new(name.clone(), source.property_type.clone());
                def.attributes = source.attributes;
                def.custom_attributes
                    .push(marker_attribute(self.output, Marker::Added)?);
                self.add_backing_field(patch, merge, &source.name, &name)?;
                self.output.add_property(merge.target, def)?
            }
        };

        let public = directives.has(Directive::Public);
        push_unique(
            &mut self.output.property_def_mut(target)?.custom_attributes,
            source.custom_attributes.iter().cloned(),
        );

        if let Some(getter) = source.getter {
            merge.consumed.insert(getter);
            if let Some(merged) = self.patch_method(patch, merge, getter, public)? {
                self.output.property_def_mut(target)?.getter = Some(merged);
            }
        }
        if let Some(setter) = source.setter {
            merge.consumed.insert(setter);
            if let Some(merged) = self.patch_method(patch, merge, setter, public)? {
                self.output.property_def_mut(target)?.setter = Some(merged);
            }
        }
        for &other in &source.others {
            merge.consumed.insert(other);
            if let Some(merged) = self.patch_method(patch, merge, other, public)? {
                let def = self.output.property_def_mut(target)?;
                if !def.others.contains(&merged) {
                    def.others.push(merged);
                }
            }
        }
        Ok(())
    }

    fn patch_event(
        &mut self,
        patch: &Image,
        merge: &mut TypeMerge,
        id: EventId,
    ) -> Result<()> {
        let source = patch.event_def(id)?;
        let directives = DirectiveSet::parse(&source.custom_attributes);
        let name = target_member_name(&source.name, &directives);
        let existing = self.output.find_event(merge.target, &name);
        Self::remember_backing_field(
            patch,
            merge,
            &source.name,
            &directives,
            &source.custom_attributes,
        );

        if directives.has(Directive::Ignore) {
            if let Some(existing) = existing {
                self.copy_bound_attributes(Declaration::Event(existing), &source.custom_attributes)?;
            }
            merge.consumed.extend(source.accessors());
            return Ok(());
        }

        if directives.removes() {
            if let Some(existing) = existing {
                verbose!(self.config, "[PatchEvent] Removing {}", name);
                let accessors = self.output.event_def(existing)?.accessors();
                self.output.remove_event(existing)?;
                self.remove_accessor_member(merge.target, &name, accessors)?;
            }
            if directives.has(Directive::Remove) {
                merge.consumed.extend(source.accessors());
                return Ok(());
            }
        }

        let target = match existing.filter(|_| !directives.removes()) {
            Some(existing) => existing,
            None => {
                verbose!(self.config, "[PatchEvent] Adding {}", name);
                let mut def = EventDef::new(name.clone(), source.event_type.clone());
                def.attributes = source.attributes;
                def.custom_attributes
                    .push(marker_attribute(self.output, Marker::Added)?);
                self.add_backing_field(patch, merge, &source.name, &name)?;
                self.output.add_event(merge.target, def)?
            }
        };

        let public = directives.has(Directive::Public);
        push_unique(
            &mut self.output.event_def_mut(target)?.custom_attributes,
            source.custom_attributes.iter().cloned(),
        );

        let slots = [
            (source.add, EventSlot::Add),
            (source.remove, EventSlot::Remove),
            (source.invoke, EventSlot::Invoke),
        ];
        for (accessor, slot) in slots {
            let Some(accessor) = accessor else {
                continue;
            };
            merge.consumed.insert(accessor);
            if let Some(merged) = self.patch_method(patch, merge, accessor, public)? {
                let def = self.output.event_def_mut(target)?;
                match slot {
                    EventSlot::Add => def.add = Some(merged),
                    EventSlot::Remove => def.remove = Some(merged),
                    EventSlot::Invoke => def.invoke = Some(merged),
                }
            }
        }
        for &other in &source.others {
            merge.consumed.insert(other);
            if let Some(merged) = self.patch_method(patch, merge, other, public)? {
                let def = self.output.event_def_mut(target)?;
                if !def.others.contains(&merged) {
                    def.others.push(merged);
                }
            }
        }
        Ok(())
    }

    fn patch_field(&mut self, patch: &Image, merge: &TypeMerge, id: FieldId) -> Result<()> {
        let source = patch.field_def(id)?;
        let mut directives = DirectiveSet::parse(&source.custom_attributes);
        let mut attributes = source.custom_attributes.clone();
        if let Some(inherited) = merge.inherited.get(&id) {
            if inherited.directives.has(Directive::Ignore) {
                return Ok(());
            }
            directives.inherit(&inherited.directives);
            push_unique(&mut attributes, inherited.attributes.iter().cloned());
        }

        let name = target_member_name(&source.name, &directives);
        let type_name = self.output.type_full_name(merge.target)?;
        if directives.has(Directive::NoNew) || self.config.is_skipped(&format!("{type_name}::{name}")) {
            return Ok(());
        }

        if directives.removes() {
            if let Some(existing) = self.output.find_field(merge.target, &name) {
                verbose!(self.config, "[PatchField] Removing {}::{}", type_name, name);
                self.output.remove_field(existing)?;
            }
            if directives.has(Directive::Remove) {
                return Ok(());
            }
        }

        if let Some(existing) = self.output.find_field(merge.target, &name) {
            if directives.has(Directive::Ignore) {
                self.copy_bound_attributes(Declaration::Field(existing), &attributes)?;
            } else if directives.has(Directive::Public) {
                self.output.field_def_mut(existing)?.attributes.set_public();
            }
            return Ok(());
        }
        if directives.has(Directive::Ignore) {
            return Ok(());
        }

        verbose!(self.config, "[PatchField] Adding {}::{}", type_name, name);
        let mut def = source.clone();
        def.token = Default::default();
        def.name = name;
        def.custom_attributes = attributes;
        if directives.has(Directive::Public) {
            def.attributes.set_public();
        }
        def.custom_attributes
            .push(marker_attribute(self.output, Marker::Added)?);
        self.output.add_field(merge.target, def)?;
        Ok(())
    }

    /// Merges one method and returns the output method it ended up in.
    ///
    /// # Arguments
    /// * `patch` - The patch image
    /// * `merge` - State of the enclosing type merge
    /// * `id` - The patch method
    /// * `force_public` - Set when the owning property or event carries `Public`
    fn patch_method(
        &mut self,
        patch: &Image,
        merge: &TypeMerge,
        id: MethodId,
        force_public: bool,
    ) -> Result<Option<MethodId>> {
        let source = patch.method_def(id)?;
        let directives = DirectiveSet::parse(&source.custom_attributes);

        if source.name.starts_with(ORIGINAL_PREFIX) || directives.has(Directive::Original) {
            return Ok(None);
        }
        if !allowed_special_name(source, &directives, merge.type_added) {
            return Ok(None);
        }

        let mut method = source.clone();
        method.token = Default::default();
        method.name = target_member_name(&source.name, &directives);
        if directives.has(Directive::Constructor) {
            let ctor = if method.is_static() { CCTOR } else { CTOR };
            method.name = ctor.to_string();
            method.attributes |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        }

        let target_sig = self.output.type_sig(merge.target)?;
        let full_id = findable_id(Some(&target_sig), &method.name, &method.sig);
        if self.config.is_skipped(&full_id) {
            return Ok(None);
        }

        let type_name = self.output.type_def(merge.target)?.name.clone();
        let existing = self.output.find_method(merge.target, &method.local_id());
        let original_name = original_method_name(&method.name, &type_name);
        let mut original = self
            .output
            .find_method(merge.target, &findable_id(None, &original_name, &method.sig));

        if directives.has(Directive::Public) || force_public {
            method.attributes.set_public();
        }

        if directives.has(Directive::Ignore) {
            if let Some(existing) = existing {
                self.copy_bound_attributes(Declaration::Method(existing), &source.custom_attributes)?;
            }
            return Ok(None);
        }
        if existing.is_none() && directives.has(Directive::NoNew) {
            return Ok(None);
        }

        if directives.has(Directive::Replace) {
            if let Some(existing) = existing {
                let def = self.output.method_def_mut(existing)?;
                def.custom_attributes.clear();
                def.attributes = method.attributes;
                def.impl_attributes = method.impl_attributes;
            }
        } else if let (Some(existing), None) = (existing, original) {
            original = Some(self.capture_original(merge.target, existing, &original_name)?);
        }

        if let Some(original) = original {
            if method.is_static_constructor() && !directives.has(Directive::Constructor) {
                let call = Instruction::reference(
                    OpCode::Call,
                    MemberReference::Method(self.output.method_ref(original)?),
                );
                if let Some(body) = method.body.as_mut() {
                    let at = body.instructions.len().saturating_sub(1);
                    body.insert(at, call);
                }
            }
        }

        let merged = match existing {
            Some(existing) => {
                verbose!(self.config, "[PatchMethod] Patching {}", full_id);
                let def = self.output.method_def_mut(existing)?;
                def.body = method.body;
                def.impl_attributes = method.impl_attributes;
                def.pinvoke = method.pinvoke;
                def.attributes.set(
                    MethodAttributes::PINVOKE_IMPL,
                    method.attributes.contains(MethodAttributes::PINVOKE_IMPL),
                );
                if directives.has(Directive::Public) || force_public {
                    def.attributes.set_public();
                }
                push_unique(&mut def.custom_attributes, method.custom_attributes);
                existing
            }
            None => {
                verbose!(self.config, "[PatchMethod] Adding {}", full_id);
                method
                    .custom_attributes
                    .push(marker_attribute(self.output, Marker::Added)?);
                self.output.add_method(merge.target, method)?
            }
        };

        if let Some(original) = original {
            let name = self.output.method_def(original)?.name.clone();
            let marker = original_name_attribute(self.output, &name)?;
            push_unique(
                &mut self.output.method_def_mut(merged)?.custom_attributes,
                [marker],
            );
        }
        Ok(Some(merged))
    }

    /// Clones `existing` into a new, non-virtual, non-special method named `name`
    fn capture_original(&mut self, target: TypeId, existing: MethodId, name: &str) -> Result<MethodId> {
        let mut original = self.output.method_def(existing)?.clone();
        original.token = Default::default();
        original.name = name.to_string();
        original.attributes.remove(
            MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME
                | MethodAttributes::VIRTUAL,
        );
        original
            .custom_attributes
            .push(marker_attribute(self.output, Marker::Original)?);

        verbose!(self.config, "[PatchMethod] Capturing original {}", name);
        self.output.add_method(target, original)
    }
}

#[derive(Clone, Copy)]
enum EventSlot {
    Add,
    Remove,
    Invoke,
}
