//! Pass 3: reference rewrite.
//!
//! Every reference reachable from the output image is relinked: type shapes, member
//! signatures, attributes and method bodies. Body instructions get structural fixups when a
//! relink changed the kind of their operand, then every operand is imported into the output
//! reference table.

use std::collections::{BTreeSet, HashMap};

use crate::{
    loader::DependencyMapper,
    metadata::{
        body::{Instruction, MethodBody, OpCode, Operand},
        identity::AssemblyIdentity,
        image::{Declaration, EventId, FieldId, Image, MethodId, PropertyId, TypeId},
        members::{findable_id, MemberReference, MethodRef, CTOR},
        typesig::TypeSig,
    },
    patcher::{
        config::PatcherConfig,
        hooks::PatchHooks,
        names::original_method_name,
        relinker::{Relinker, MAX_BASE_DEPTH},
    },
    relink::Resolver,
    Error, Result,
};

/// What the instruction fixups need to know about the method being rewritten
struct MethodFrame<'c> {
    context: &'c str,
    owner: String,
    bases: Vec<String>,
    local_id: String,
    is_instance_ctor: bool,
    original_ctor: Option<MethodRef>,
}

/// `callvirt` for instance methods of reference types, `call` otherwise
fn dispatch(method: &MethodRef) -> OpCode {
    if method.sig.has_this && !method.declaring.is_value_type() {
        OpCode::Callvirt
    } else {
        OpCode::Call
    }
}

/// Patch full names of every base type of `owner`, nearest first.
///
/// The walk follows bases declared in `output` and ends at the first external one.
fn base_chain(output: &Image, owner: TypeId) -> Result<Vec<String>> {
    let mut bases = Vec::new();
    let mut current = output.type_def(owner)?.base_type.clone();
    while let Some(base) = current.as_ref().and_then(TypeSig::definition) {
        if bases.len() >= MAX_BASE_DEPTH {
            return Err(Error::RecursionLimit(MAX_BASE_DEPTH));
        }
        bases.push(base.patch_full_name());
        if base.scope != output.scope_name() {
            break;
        }
        current = match output.find_type(&base.full_name()) {
            Some(id) => output.type_def(id)?.base_type.clone(),
            None => None,
        };
    }
    Ok(bases)
}

/// One temporary per type holds values whose address an instruction used to take
fn temp_local(
    body: &mut MethodBody,
    temps: &mut HashMap<TypeSig, u16>,
    ty: TypeSig,
) -> Result<u16> {
    if let Some(&local) = temps.get(&ty) {
        return Ok(local);
    }
    let local = body.add_local(ty.clone())?;
    temps.insert(ty, local);
    Ok(local)
}

/// Adjusts an instruction to the kind of its relinked operand.
///
/// Returns the new opcode, the operand and, for address loads that became calls, the type of
/// the value whose address has to be materialized.
fn fixup(
    frame: &MethodFrame<'_>,
    opcode: OpCode,
    original: &MemberReference,
    relinked: MemberReference,
) -> Result<(OpCode, MemberReference, Option<TypeSig>)> {
    Ok(match relinked {
        MemberReference::Method(method) if opcode == OpCode::Newobj => {
            if method.is_constructor() {
                (opcode, MemberReference::Method(method), None)
            } else {
                (dispatch(&method), MemberReference::Method(method), None)
            }
        }
        MemberReference::Property(property) if opcode.is_field_access() => {
            let accessor = if opcode.is_field_store() {
                property.setter.clone()
            } else {
                property.getter.clone()
            };
            let Some(accessor) = accessor else {
                return Err(structural_error!(
                    "Property {}::{} has no accessor for {} in {}",
                    property.declaring,
                    property.name,
                    opcode,
                    frame.context
                ));
            };
            let address = opcode.is_field_address().then(|| accessor.sig.ret.clone());
            (dispatch(&accessor), MemberReference::Method(accessor), address)
        }
        MemberReference::Method(method) if opcode.is_field_access() => {
            let address = opcode.is_field_address().then(|| method.sig.ret.clone());
            (dispatch(&method), MemberReference::Method(method), address)
        }
        MemberReference::Field(field) if opcode.is_call() => {
            let MemberReference::Method(call) = original else {
                return Ok((opcode, MemberReference::Field(field), None));
            };
            let instance = call.sig.has_this;
            let opcode = match (call.sig.ret.is_void(), call.sig.ret.is_by_ref(), instance) {
                (true, _, true) => OpCode::Stfld,
                (true, _, false) => OpCode::Stsfld,
                (false, true, true) => OpCode::Ldflda,
                (false, true, false) => OpCode::Ldsflda,
                (false, false, true) => OpCode::Ldfld,
                (false, false, false) => OpCode::Ldsfld,
            };
            (opcode, MemberReference::Field(field), None)
        }
        MemberReference::Method(method) if opcode.is_call() => {
            if frame.is_instance_ctor
                && opcode == OpCode::Call
                && method.is_constructor()
                && method.declaring.full_name() == frame.owner
                && method.findable_id(false) == frame.local_id
            {
                if let Some(original) = &frame.original_ctor {
                    return Ok((OpCode::Call, MemberReference::Method(original.clone()), None));
                }
            }

            let base_call = opcode == OpCode::Call
                && method.sig.has_this
                && method.findable_id(false) == frame.local_id
                && method
                    .declaring
                    .definition()
                    .is_some_and(|declaring| frame.bases.contains(&declaring.patch_full_name()));
            if method.is_constructor() || base_call {
                (opcode, MemberReference::Method(method), None)
            } else {
                (dispatch(&method), MemberReference::Method(method), None)
            }
        }
        other => (opcode, other, None),
    })
}

/// State of one reference-rewrite pass
pub(crate) struct RefPass<'a> {
    pub(crate) resolver: &'a mut Resolver,
    pub(crate) mapper: &'a DependencyMapper,
    pub(crate) mods: &'a [Image],
    pub(crate) config: &'a PatcherConfig,
    pub(crate) hooks: &'a mut [Box<dyn PatchHooks>],
}

impl RefPass<'_> {
    /// Relinks every reference of `output` and adds the assembly references they need
    pub(crate) fn run(&mut self, output: &mut Image) -> Result<()> {
        log::info!("[PatchRefs] Relinking references of {}", output.identity.name);

        let attributes = {
            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            relinker.relink_attributes(&output.custom_attributes, "<assembly>")?
        };
        output.custom_attributes = attributes;

        for id in output.types() {
            self.patch_type_refs(output, id)?;
        }
        self.add_assembly_refs(output)
    }

    fn patch_type_refs(&mut self, output: &mut Image, id: TypeId) -> Result<()> {
        let context = output.type_full_name(id)?;
        verbose!(self.config, "[PatchRefs] Relinking {}", context);

        let (base_type, interfaces, generic_params, attributes) = {
            let def = output.type_def(id)?;
            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            (
                def.base_type
                    .as_ref()
                    .map(|base| relinker.relink_type(base, &context))
                    .transpose()?,
                def.interfaces
                    .iter()
                    .map(|interface| relinker.relink_type(interface, &context))
                    .collect::<Result<Vec<_>>>()?,
                relinker.relink_generic_params(&def.generic_params, &context)?,
                relinker.relink_attributes(&def.custom_attributes, &context)?,
            )
        };
        let def = output.type_def_mut(id)?;
        def.base_type = base_type;
        def.interfaces = interfaces;
        def.generic_params = generic_params;
        def.custom_attributes = attributes;

        let def = output.type_def(id)?;
        let fields = def.fields.clone();
        let properties = def.properties.clone();
        let events = def.events.clone();
        let methods = def.methods.clone();

        for field in fields {
            self.patch_field_refs(output, &context, field)?;
        }
        for property in properties {
            self.patch_property_refs(output, &context, property)?;
        }
        for event in events {
            self.patch_event_refs(output, &context, event)?;
        }
        for method in methods {
            self.patch_method_refs(output, id, method)?;
        }
        Ok(())
    }

    fn patch_field_refs(&mut self, output: &mut Image, owner: &str, id: FieldId) -> Result<()> {
        let (field_type, attributes) = {
            let field = output.field_def(id)?;
            let context = format!("{owner}::{}", field.name);
            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            (
                relinker.relink_type(&field.field_type, &context)?,
                relinker.relink_attributes(&field.custom_attributes, &context)?,
            )
        };
        let field = output.field_def_mut(id)?;
        field.field_type = field_type;
        field.custom_attributes = attributes;
        Ok(())
    }

    fn patch_property_refs(&mut self, output: &mut Image, owner: &str, id: PropertyId) -> Result<()> {
        let (property_type, attributes) = {
            let property = output.property_def(id)?;
            let context = format!("{owner}::{}", property.name);
            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            (
                relinker.relink_type(&property.property_type, &context)?,
                relinker.relink_attributes(&property.custom_attributes, &context)?,
            )
        };
        let property = output.property_def_mut(id)?;
        property.property_type = property_type;
        property.custom_attributes = attributes;
        Ok(())
    }

    fn patch_event_refs(&mut self, output: &mut Image, owner: &str, id: EventId) -> Result<()> {
        let (event_type, attributes) = {
            let event = output.event_def(id)?;
            let context = format!("{owner}::{}", event.name);
            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            (
                relinker.relink_type(&event.event_type, &context)?,
                relinker.relink_attributes(&event.custom_attributes, &context)?,
            )
        };
        let event = output.event_def_mut(id)?;
        event.event_type = event_type;
        event.custom_attributes = attributes;
        Ok(())
    }

    fn patch_method_refs(&mut self, output: &mut Image, owner: TypeId, id: MethodId) -> Result<()> {
        let context = output.method_findable_id(id, true)?;
        if self.config.is_skipped(&context) {
            verbose!(self.config, "[PatchRefs] Skipping {}", context);
            return Ok(());
        }

        let mut method = output.method_def(id)?.clone();
        {
            let owner_def = output.type_def(owner)?;
            let is_instance_ctor = method.is_constructor() && !method.is_static();
            let original_ctor = if is_instance_ctor {
                let name = original_method_name(CTOR, &owner_def.name);
                output
                    .find_method(owner, &findable_id(None, &name, &method.sig))
                    .map(|original| output.method_ref(original))
                    .transpose()?
            } else {
                None
            };

            let mut relinker = Relinker::new(
                &mut *self.resolver,
                self.mapper,
                output,
                self.mods,
                self.config.strict,
            );
            method.sig = relinker.relink_sig(&method.sig, &context)?;
            method.generic_params = relinker.relink_generic_params(&method.generic_params, &context)?;
            method.custom_attributes = relinker.relink_attributes(&method.custom_attributes, &context)?;
            method.overrides = method
                .overrides
                .iter()
                .map(|overridden| relinker.relink_method(overridden, &context))
                .collect::<Result<Vec<_>>>()?;

            for hook in self.hooks.iter_mut() {
                hook.rewrite_method(&mut method)?;
            }

            if let Some(mut body) = method.body.take() {
                let frame = MethodFrame {
                    context: &context,
                    owner: output.type_full_name(owner)?,
                    bases: base_chain(output, owner)?,
                    local_id: method.local_id(),
                    is_instance_ctor,
                    original_ctor,
                };
                rewrite_body(&mut relinker, self.hooks, &frame, &mut body)?;
                method.body = Some(body);
            }
        }

        if let Some(body) = &method.body {
            for instruction in &body.instructions {
                if let Some(reference) = instruction.operand.reference() {
                    output.import_reference(reference);
                }
            }
        }
        *output.method_def_mut(id)? = method;
        Ok(())
    }

    /// Adds an assembly reference for every external scope the output mentions
    fn add_assembly_refs(&self, output: &mut Image) -> Result<()> {
        let mut scopes = BTreeSet::new();
        {
            let mut collect = |sig: &TypeSig| {
                sig.for_each_named(&mut |named| {
                    scopes.insert(named.scope.clone());
                });
            };
            for entry in output.references.iter() {
                for sig in entry.reference.type_sigs() {
                    collect(sig);
                }
            }
            for declaration in output.declarations() {
                match declaration {
                    Declaration::Type(id) => output.type_def(id)?.type_sigs().into_iter().for_each(&mut collect),
                    Declaration::Method(id) => output.method_def(id)?.type_sigs().into_iter().for_each(&mut collect),
                    Declaration::Field(id) => collect(&output.field_def(id)?.field_type),
                    Declaration::Property(id) => collect(&output.property_def(id)?.property_type),
                    Declaration::Event(id) => collect(&output.event_def(id)?.event_type),
                }
                for attribute in output.custom_attributes(declaration)? {
                    attribute.ctor.type_sigs().for_each(&mut collect);
                }
            }
        }

        let known: Vec<&AssemblyIdentity> = self
            .mods
            .iter()
            .flat_map(|image| std::iter::once(&image.identity).chain(image.assembly_refs.iter()))
            .chain(self.mapper.dependencies().iter().map(|image| &image.identity))
            .chain(self.resolver.imported_assemblies().iter())
            .collect();

        for scope in scopes {
            if scope == output.scope_name() || output.has_assembly_ref(&scope) {
                continue;
            }
            match known.iter().find(|identity| identity.name == scope) {
                Some(identity) => {
                    verbose!(self.config, "[PatchRefs] Adding assembly reference {}", identity);
                    output.ensure_assembly_ref((*identity).clone());
                }
                None => log::warn!("[PatchRefs] No identity known for scope {scope}"),
            }
        }
        Ok(())
    }
}

fn rewrite_body(
    relinker: &mut Relinker<'_, '_>,
    hooks: &mut [Box<dyn PatchHooks>],
    frame: &MethodFrame<'_>,
    body: &mut MethodBody,
) -> Result<()> {
    body.locals = body
        .locals
        .iter()
        .map(|local| relinker.relink_type(local, frame.context))
        .collect::<Result<Vec<_>>>()?;
    for handler in &mut body.exception_handlers {
        if let Some(catch_type) = handler.catch_type.take() {
            handler.catch_type = Some(relinker.relink_type(&catch_type, frame.context)?);
        }
    }

    let mut temps = HashMap::new();
    let mut index = 0;
    while index < body.instructions.len() {
        let mut next = index + 1;
        if let Some(original) = body.instructions[index].operand.reference().cloned() {
            let opcode = body.instructions[index].opcode;
            let relinked = relinker.relink_member(&original, frame.context)?;
            let (opcode, relinked, address) = fixup(frame, opcode, &original, relinked)?;
            body.instructions[index] = Instruction::reference(opcode, relinked);

            if let Some(ty) = address {
                let local = temp_local(body, &mut temps, ty)?;
                body.insert(next, Instruction::new(OpCode::Stloc, Operand::Local(local)));
                body.insert(next + 1, Instruction::new(OpCode::Ldloca, Operand::Local(local)));
                next += 2;
            }
        }

        for hook in hooks.iter_mut() {
            hook.rewrite_instruction(body, index)?;
        }
        index = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        members::{FieldRef, MethodSig, PropertyRef},
        typesig::{NamedType, TypeSig},
    };

    fn frame(context: &str) -> MethodFrame<'_> {
        frame_in(context, "System.Void .ctor()")
    }

    fn frame_in<'c>(context: &'c str, local_id: &str) -> MethodFrame<'c> {
        MethodFrame {
            context,
            owner: "Game.B".to_string(),
            bases: vec!["Game.A".to_string(), "Game.Root".to_string()],
            local_id: local_id.to_string(),
            is_instance_ctor: true,
            original_ctor: Some(MethodRef::new(
                TypeSig::named("Game", "Game", "B"),
                "orig_ctor_B",
                MethodSig::instance(TypeSig::void(), vec![]),
            )),
        }
    }

    fn method(declaring: &str, name: &str, sig: MethodSig) -> MethodRef {
        MethodRef::new(TypeSig::named("Game", "Game", declaring), name, sig)
    }

    #[test]
    fn test_newobj_of_plain_method_becomes_call() {
        let factory = method("A", "Create", MethodSig::static_(TypeSig::object(), vec![]));
        let original = MemberReference::Method(factory.clone());
        let (opcode, _, address) = fixup(
            &frame("ctx"),
            OpCode::Newobj,
            &original,
            MemberReference::Method(factory),
        )
        .unwrap();
        assert_eq!(opcode, OpCode::Call);
        assert!(address.is_none());
    }

    #[test]
    fn test_field_mapped_to_property_calls_accessor() {
        let declaring = TypeSig::named("Game", "Game", "A");
        let getter = method("A", "get_Value", MethodSig::instance(TypeSig::int32(), vec![]));
        let property = PropertyRef {
            declaring: declaring.clone(),
            name: "Value".to_string(),
            property_type: TypeSig::int32(),
            getter: Some(getter.clone()),
            setter: None,
        };
        let original = MemberReference::Field(FieldRef::new(declaring, "value", TypeSig::int32()));

        let (opcode, operand, address) = fixup(
            &frame("ctx"),
            OpCode::Ldflda,
            &original,
            MemberReference::Property(property.clone()),
        )
        .unwrap();
        assert_eq!(opcode, OpCode::Callvirt);
        assert_eq!(operand, MemberReference::Method(getter));
        assert_eq!(address, Some(TypeSig::int32()));

        assert!(fixup(
            &frame("ctx"),
            OpCode::Stfld,
            &original,
            MemberReference::Property(property),
        )
        .is_err());
    }

    #[test]
    fn test_call_mapped_to_field_loads_or_stores() {
        let field = FieldRef::new(TypeSig::named("Game", "Game", "A"), "count", TypeSig::int32());
        let getter = method("A", "GetCount", MethodSig::instance(TypeSig::int32(), vec![]));
        let setter = method("A", "SetCount", MethodSig::static_(TypeSig::void(), vec![TypeSig::int32()]));

        let (load, _, _) = fixup(
            &frame("ctx"),
            OpCode::Callvirt,
            &MemberReference::Method(getter),
            MemberReference::Field(field.clone()),
        )
        .unwrap();
        let (store, _, _) = fixup(
            &frame("ctx"),
            OpCode::Call,
            &MemberReference::Method(setter),
            MemberReference::Field(field),
        )
        .unwrap();
        assert_eq!(load, OpCode::Ldfld);
        assert_eq!(store, OpCode::Stsfld);
    }

    fn call_opcode(frame: &MethodFrame<'_>, target: MethodRef) -> OpCode {
        let original = MemberReference::Method(target.clone());
        fixup(frame, OpCode::Call, &original, MemberReference::Method(target))
            .unwrap()
            .0
    }

    #[test]
    fn test_base_calls_stay_non_virtual() {
        let update = || MethodSig::instance(TypeSig::void(), vec![]);
        let frame = frame_in("ctx", "System.Void Update()");

        assert_eq!(call_opcode(&frame, method("A", "Update", update())), OpCode::Call);
        assert_eq!(call_opcode(&frame, method("Root", "Update", update())), OpCode::Call);
        assert_eq!(call_opcode(&frame, method("patch_A", "Update", update())), OpCode::Call);
        assert_eq!(call_opcode(&frame, method("C", "Update", update())), OpCode::Callvirt);
        assert_eq!(call_opcode(&frame, method("A", "Draw", update())), OpCode::Callvirt);
    }

    #[test]
    fn test_generic_base_call_stays_non_virtual() {
        let declaring = TypeSig::GenericInstance {
            definition: NamedType::new("Game", "Game", "Root`1"),
            args: vec![TypeSig::int32()],
        };
        let update = MethodRef::new(declaring, "Update", MethodSig::instance(TypeSig::void(), vec![]));
        let mut frame = frame_in("ctx", "System.Void Update()");
        frame.bases = vec!["Game.Root`1".to_string()];
        assert_eq!(call_opcode(&frame, update), OpCode::Call);
    }

    #[test]
    fn test_self_constructor_call_targets_original() {
        let ctor = method("B", CTOR, MethodSig::instance(TypeSig::void(), vec![]));
        let (opcode, operand, _) = fixup(
            &frame("ctx"),
            OpCode::Call,
            &MemberReference::Method(ctor.clone()),
            MemberReference::Method(ctor),
        )
        .unwrap();
        assert_eq!(opcode, OpCode::Call);
        let MemberReference::Method(target) = operand else {
            panic!("expected a method");
        };
        assert_eq!(target.name, "orig_ctor_B");
    }

    #[test]
    fn test_temp_locals_are_shared_per_type() {
        let mut body = MethodBody::new();
        let mut temps = HashMap::new();
        let first = temp_local(&mut body, &mut temps, TypeSig::int32()).unwrap();
        let second = temp_local(&mut body, &mut temps, TypeSig::int32()).unwrap();
        let third = temp_local(&mut body, &mut temps, TypeSig::string()).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(body.locals.len(), 2);
    }
}
