//! Rewrites symbolic references so they point into the output image.

use crate::{
    loader::{DependencyMapper, WorkingSet},
    metadata::{
        attributes::{AttributeArgument, CustomAttribute},
        image::{GenericParamDef, Image},
        members::{FieldRef, MemberReference, MethodRef, MethodSig, PropertyRef},
        typesig::{NamedType, TypeSig},
    },
    relink::{Resolution, ResolveScope, Resolver},
    Error, Result,
};

/// Base types followed when checking whether a member exists on a type
pub(crate) const MAX_BASE_DEPTH: usize = 64;

/// Relinks references against one state of the output image
pub(crate) struct Relinker<'r, 'a> {
    resolver: &'r mut Resolver,
    mapper: &'a DependencyMapper,
    scope: ResolveScope<'a>,
    strict: bool,
}

impl<'r, 'a> Relinker<'r, 'a> {
    pub(crate) fn new(
        resolver: &'r mut Resolver,
        mapper: &'a DependencyMapper,
        output: &'a Image,
        mods: &'a [Image],
        strict: bool,
    ) -> Self {
        Self {
            resolver,
            mapper,
            scope: ResolveScope {
                output,
                dependencies: mapper.dependencies(),
                mods,
            },
            strict,
        }
    }

    fn output(&self) -> &'a Image {
        self.scope.output
    }

    fn is_patch_scope(&self, scope: &str) -> bool {
        self.scope.mods.iter().any(|image| image.scope_name() == scope)
    }

    fn missing(&self, target: String, context: &str) -> Result<()> {
        if self.strict {
            return Err(Error::RelinkTargetNotFound {
                target,
                context: context.to_string(),
            });
        }
        log::warn!("[Relink] {target} not found in {context}, keeping the original reference");
        Ok(())
    }

    /// Relinks a type reference.
    ///
    /// # Errors
    /// Returns [`Error::RelinkFailed`] wrapping the cause when a target is missing in strict
    /// mode or a type was mapped onto a member.
    pub(crate) fn relink_type(&mut self, sig: &TypeSig, context: &str) -> Result<TypeSig> {
        self.relink_type_inner(sig, context)
            .map_err(|error| error.relink_failed(sig.to_string(), context))
    }

    fn relink_type_inner(&mut self, sig: &TypeSig, context: &str) -> Result<TypeSig> {
        Ok(match sig {
            TypeSig::Named(named) => self
                .relink_named(sig, named, context)?
                .unwrap_or_else(|| sig.clone()),
            TypeSig::GenericInstance { definition, args } => {
                let open = TypeSig::Named(definition.clone());
                let definition = match self.relink_named(&open, definition, context)? {
                    Some(relinked) => relinked.definition().cloned().unwrap_or_else(|| definition.clone()),
                    None => definition.clone(),
                };
                let args = args
                    .iter()
                    .map(|arg| self.relink_type_inner(arg, context))
                    .collect::<Result<Vec<_>>>()?;
                TypeSig::GenericInstance { definition, args }
            }
            TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(self.relink_type_inner(inner, context)?)),
            TypeSig::Pointer(inner) => {
                TypeSig::Pointer(Box::new(self.relink_type_inner(inner, context)?))
            }
            TypeSig::Array { element, rank } => TypeSig::Array {
                element: Box::new(self.relink_type_inner(element, context)?),
                rank: *rank,
            },
            TypeSig::Primitive(_) | TypeSig::GenericParam { .. } => sig.clone(),
        })
    }

    /// `None` keeps the reference as it is
    fn relink_named(
        &mut self,
        sig: &TypeSig,
        named: &NamedType,
        context: &str,
    ) -> Result<Option<TypeSig>> {
        let reference = MemberReference::Type(sig.clone());
        match self.resolver.resolve(&reference, &self.scope, true, true)? {
            Resolution::Remapped(MemberReference::Type(found)) => return Ok(Some(found)),
            Resolution::Remapped(other) => {
                return Err(Error::UnsupportedReference(format!(
                    "type {} was mapped onto the member {}",
                    named.full_name(),
                    other
                )))
            }
            Resolution::Unresolved => return Ok(None),
            Resolution::NoRemap => {}
        }

        let output = self.output();
        let from_patch = self.is_patch_scope(&named.scope);
        if named.scope != output.scope_name() && !from_patch {
            return Ok(None);
        }

        let name = named.patch_full_name();
        if let Some(id) = output.find_type(&name) {
            let mut found = output.named_type(id)?;
            found.value_type |= named.value_type;
            return Ok(Some(TypeSig::Named(found)));
        }
        if from_patch {
            let set = WorkingSet {
                base: output,
                mods: self.scope.mods,
            };
            if let Some(found) = self.mapper.find_type_deep(set, &name) {
                return Ok(Some(found));
            }
        }

        self.missing(format!("[{}]{}", output.scope_name(), name), context)?;
        Ok(None)
    }

    /// Relinks a member or type reference. The result may be of another kind than the input,
    /// for example a field mapped onto a property.
    ///
    /// # Errors
    /// Returns [`Error::RelinkFailed`] wrapping the cause when a target is missing in strict
    /// mode.
    pub(crate) fn relink_member(
        &mut self,
        reference: &MemberReference,
        context: &str,
    ) -> Result<MemberReference> {
        self.relink_member_inner(reference, context)
            .map_err(|error| error.relink_failed(reference.to_string(), context))
    }

    fn relink_member_inner(
        &mut self,
        reference: &MemberReference,
        context: &str,
    ) -> Result<MemberReference> {
        if let MemberReference::Type(sig) = reference {
            return Ok(MemberReference::Type(self.relink_type_inner(sig, context)?));
        }

        match self.resolver.resolve(reference, &self.scope, true, false)? {
            Resolution::Remapped(target) => return self.relink_parts(&target, context),
            Resolution::Unresolved => return Ok(reference.clone()),
            Resolution::NoRemap => {}
        }

        let relinked = self.relink_parts(reference, context)?;
        if self.member_exists(&relinked)? {
            return Ok(relinked);
        }
        self.missing(relinked.to_string(), context)?;
        Ok(reference.clone())
    }

    fn relink_parts(&mut self, reference: &MemberReference, context: &str) -> Result<MemberReference> {
        Ok(match reference {
            MemberReference::Type(sig) => MemberReference::Type(self.relink_type_inner(sig, context)?),
            MemberReference::Method(method) => {
                MemberReference::Method(self.relink_method_parts(method, context)?)
            }
            MemberReference::Field(field) => MemberReference::Field(FieldRef {
                declaring: self.relink_type_inner(&field.declaring, context)?,
                name: field.name.clone(),
                field_type: self.relink_type_inner(&field.field_type, context)?,
            }),
            MemberReference::Property(property) => MemberReference::Property(PropertyRef {
                declaring: self.relink_type_inner(&property.declaring, context)?,
                name: property.name.clone(),
                property_type: self.relink_type_inner(&property.property_type, context)?,
                getter: property
                    .getter
                    .as_ref()
                    .map(|getter| self.relink_method_parts(getter, context))
                    .transpose()?,
                setter: property
                    .setter
                    .as_ref()
                    .map(|setter| self.relink_method_parts(setter, context))
                    .transpose()?,
            }),
        })
    }

    fn relink_method_parts(&mut self, method: &MethodRef, context: &str) -> Result<MethodRef> {
        Ok(MethodRef {
            declaring: self.relink_type_inner(&method.declaring, context)?,
            name: method.name.clone(),
            sig: self.relink_sig_inner(&method.sig, context)?,
            generic_args: method
                .generic_args
                .iter()
                .map(|arg| self.relink_type_inner(arg, context))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn relink_sig_inner(&mut self, sig: &MethodSig, context: &str) -> Result<MethodSig> {
        Ok(MethodSig {
            ret: self.relink_type_inner(&sig.ret, context)?,
            params: sig
                .params
                .iter()
                .map(|param| self.relink_type_inner(param, context))
                .collect::<Result<Vec<_>>>()?,
            ..sig.clone()
        })
    }

    /// Whether a member of an output type exists there or on one of its base types.
    /// Members of external types, and of types deriving from one, are taken on trust.
    fn member_exists(&self, reference: &MemberReference) -> Result<bool> {
        let output = self.output();
        let Some(named) = reference.declaring().definition() else {
            return Ok(true);
        };
        if named.scope != output.scope_name() {
            return Ok(true);
        }

        let mut owner = output.find_type(&named.full_name());
        let mut depth = 0;
        while let Some(current) = owner {
            let found = match reference {
                MemberReference::Type(_) => true,
                MemberReference::Method(method) => output
                    .find_method(current, &method.findable_id(false))
                    .is_some(),
                MemberReference::Field(field) => output.find_field(current, &field.name).is_some(),
                MemberReference::Property(property) => {
                    output.find_property(current, &property.name).is_some()
                }
            };
            if found {
                return Ok(true);
            }

            depth += 1;
            if depth > MAX_BASE_DEPTH {
                return Err(Error::RecursionLimit(MAX_BASE_DEPTH));
            }
            owner = match output.type_def(current)?.base_type.as_ref().and_then(TypeSig::definition) {
                Some(base) if base.scope == output.scope_name() => output.find_type(&base.full_name()),
                Some(_) => return Ok(true),
                None => None,
            };
        }
        Ok(false)
    }

    /// Relinks a method signature
    ///
    /// # Errors
    /// Returns [`Error::RelinkFailed`] when one of its types cannot be relinked.
    pub(crate) fn relink_sig(&mut self, sig: &MethodSig, context: &str) -> Result<MethodSig> {
        self.relink_sig_inner(sig, context)
            .map_err(|error| error.relink_failed(format!("signature of {context}"), context))
    }

    /// Relinks a reference that has to stay a method, such as an override or an
    /// attribute constructor
    pub(crate) fn relink_method(&mut self, method: &MethodRef, context: &str) -> Result<MethodRef> {
        let reference = MemberReference::Method(method.clone());
        match self.relink_member(&reference, context)? {
            MemberReference::Method(relinked) => Ok(relinked),
            other => Err(Error::RelinkFailed {
                reference: reference.to_string(),
                context: context.to_string(),
                source: Box::new(Error::UnsupportedReference(format!(
                    "method reference relinked to {other}"
                ))),
            }),
        }
    }

    pub(crate) fn relink_generic_params(
        &mut self,
        params: &[GenericParamDef],
        context: &str,
    ) -> Result<Vec<GenericParamDef>> {
        params
            .iter()
            .map(|param| {
                Ok(GenericParamDef {
                    name: param.name.clone(),
                    constraints: param
                        .constraints
                        .iter()
                        .map(|constraint| self.relink_type(constraint, context))
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect()
    }

    pub(crate) fn relink_attributes(
        &mut self,
        attributes: &[CustomAttribute],
        context: &str,
    ) -> Result<Vec<CustomAttribute>> {
        attributes
            .iter()
            .map(|attribute| {
                let args = attribute
                    .args
                    .iter()
                    .map(|arg| match arg {
                        AttributeArgument::Type(ty) => {
                            Ok(AttributeArgument::Type(self.relink_type(ty, context)?))
                        }
                        other => Ok(other.clone()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CustomAttribute {
                    ctor: self.relink_method(&attribute.ctor, context)?,
                    args,
                })
            })
            .collect()
    }
}
