//! Rule parsing: the relink map entries and handler bindings declared by a patch image.

use crate::{
    metadata::{
        image::{FieldId, Image, MethodId, PropertyId, TypeId},
        members::{findable_id, MemberReference, CCTOR, CTOR},
    },
    patcher::{
        directives::{Directive, DirectiveSet, HandlerRegistry},
        names::{target_member_name, target_type_name},
    },
    relink::{RelinkMap, RelinkTarget},
    Result,
};

/// Collects the rules of one patch image
pub(crate) struct RuleParser<'a> {
    patch: &'a Image,
    map: &'a mut RelinkMap,
    handlers: &'a mut HandlerRegistry,
}

impl<'a> RuleParser<'a> {
    pub(crate) fn new(
        patch: &'a Image,
        map: &'a mut RelinkMap,
        handlers: &'a mut HandlerRegistry,
    ) -> Self {
        Self {
            patch,
            map,
            handlers,
        }
    }

    pub(crate) fn parse(&mut self) -> Result<()> {
        for &id in self.patch.top_level_types() {
            self.parse_type(id)?;
        }
        Ok(())
    }

    /// Registers a link-to target under the key of `reference`
    fn link(&mut self, reference: &MemberReference, target: RelinkTarget) {
        self.map.link_to(reference.patch_relink_key(), target);
    }

    fn parse_type(&mut self, id: TypeId) -> Result<()> {
        let patch = self.patch;
        let def = patch.type_def(id)?;
        let directives = DirectiveSet::parse(&def.custom_attributes);
        let named = patch.named_type(id)?;
        let target = target_type_name(patch, id)?;

        if named.patch_full_name() != target {
            self.map
                .insert(named.patch_full_name(), RelinkTarget::TypeName(target.clone()));
        }

        for name in [&target, &named.full_name()] {
            if let Some(handler) = &directives.handler {
                self.handlers.bind_type(name.clone(), handler.clone());
            }
            if let Some(handler) = &directives.method_handler {
                self.handlers.bind_method(name.clone(), handler.clone());
            }
        }

        for hook in &directives.hooks {
            self.map.insert(hook.clone(), RelinkTarget::TypeName(target.clone()));
        }
        if let Some((type_name, _)) = &directives.link_to {
            self.link(
                &MemberReference::Type(patch.type_sig(id)?),
                RelinkTarget::TypeName(type_name.clone()),
            );
        }

        if !directives.has(Directive::Ignore) {
            for &method in &def.methods {
                self.parse_method(method, &target)?;
            }
            for &field in &def.fields {
                self.parse_field(field, &target)?;
            }
            for &property in &def.properties {
                self.parse_property(property, &target)?;
            }
        }

        for &nested in &def.nested {
            self.parse_type(nested)?;
        }
        Ok(())
    }

    fn parse_method(&mut self, id: MethodId, target: &str) -> Result<()> {
        let patch = self.patch;
        let method = patch.method_def(id)?;
        let directives = DirectiveSet::parse(&method.custom_attributes);
        let name = if directives.has(Directive::Constructor) {
            let ctor = if method.is_static() { CCTOR } else { CTOR };
            ctor.to_string()
        } else {
            target_member_name(&method.name, &directives)
        };
        let member_id = findable_id(None, &name, &method.sig);
        let reference = MemberReference::Method(patch.method_ref(id)?);

        if name != method.name {
            self.map.insert(
                reference.patch_relink_key(),
                RelinkTarget::member(target, member_id.clone()),
            );
        }
        for hook in &directives.hooks {
            self.map
                .insert(hook.clone(), RelinkTarget::member(target, member_id.clone()));
        }
        if let Some((type_name, member)) = &directives.link_to {
            let linked = match member {
                Some(member) if member.contains('(') => RelinkTarget::member(type_name, member),
                Some(member) => {
                    RelinkTarget::member(type_name, findable_id(None, member, &method.sig))
                }
                None => RelinkTarget::TypeName(type_name.clone()),
            };
            self.link(&reference, linked);
        }
        Ok(())
    }

    fn parse_field(&mut self, id: FieldId, target: &str) -> Result<()> {
        let patch = self.patch;
        let field = patch.field_def(id)?;
        let directives = DirectiveSet::parse(&field.custom_attributes);
        let reference = MemberReference::Field(patch.field_ref(id)?);
        self.parse_named_member(&reference, &field.name, &directives, target);
        Ok(())
    }

    fn parse_property(&mut self, id: PropertyId, target: &str) -> Result<()> {
        let patch = self.patch;
        let property = patch.property_def(id)?;
        let directives = DirectiveSet::parse(&property.custom_attributes);
        let reference = MemberReference::Property(patch.property_ref(id)?);
        self.parse_named_member(&reference, &property.name, &directives, target);
        Ok(())
    }

    /// Fields and properties are looked up by plain name
    fn parse_named_member(
        &mut self,
        reference: &MemberReference,
        raw_name: &str,
        directives: &DirectiveSet,
        target: &str,
    ) {
        let name = target_member_name(raw_name, directives);
        if name != raw_name {
            self.map.insert(
                reference.patch_relink_key(),
                RelinkTarget::member(target, name.clone()),
            );
        }
        for hook in &directives.hooks {
            self.map
                .insert(hook.clone(), RelinkTarget::member(target, name.clone()));
        }
        if let Some((type_name, member)) = &directives.link_to {
            let linked = match member {
                Some(member) => RelinkTarget::member(type_name, member),
                None => RelinkTarget::TypeName(type_name.clone()),
            };
            self.link(reference, linked);
        }
    }
}
