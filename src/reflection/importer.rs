//! Conversion of runtime descriptors into symbolic references.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    metadata::{
        identity::AssemblyIdentity,
        image::Image,
        members::{CallingConvention, FieldRef, MemberReference, MethodRef, MethodSig},
        token::Token,
        typesig::{GenericOwner, NamedType, TypeSig},
    },
    reflection::descriptor::{
        RuntimeCallingConventions, RuntimeFieldRc, RuntimeMember, RuntimeMethod,
        RuntimeMethodGenerics, RuntimeMethodRc, RuntimeType, RuntimeTypeRc,
    },
    Error, Result,
};

/// Generic parameters visible at the point of import.
///
/// The method context, when present, binds method parameters. Type parameters bind against
/// the chain of enclosing types, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericContext {
    method: Option<(String, u32)>,
    types: Vec<(String, u32)>,
}

impl GenericContext {
    /// A context without generic parameters
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds an enclosing type with `arity` generic parameters
    #[must_use]
    pub fn with_type(mut self, full_name: impl Into<String>, arity: u32) -> Self {
        self.types.push((full_name.into(), arity));
        self
    }

    /// Sets the generic method whose parameters are in scope
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, arity: u32) -> Self {
        self.method = Some((name.into(), arity));
        self
    }

    /// Context of a runtime type and all its enclosing types
    #[must_use]
    pub fn for_type(ty: &RuntimeType) -> Self {
        let mut context = Self::none();
        let mut current = ty.definition();
        while let Some(def) = current {
            context = context.with_type(def.full_name(), def.generic_params.len() as u32);
            current = def.declaring.as_deref().and_then(RuntimeType::definition);
        }
        context
    }

    /// Context of a runtime method: its own parameters plus its declaring type's
    #[must_use]
    pub fn for_method(method: &RuntimeMethod) -> Self {
        let context = Self::for_type(&method.declaring);
        match &method.generics {
            RuntimeMethodGenerics::Definition(params) => {
                context.with_method(method.name.clone(), params.len() as u32)
            }
            RuntimeMethodGenerics::Instance { definition, .. } => match &definition.generics {
                RuntimeMethodGenerics::Definition(params) => {
                    context.with_method(method.name.clone(), params.len() as u32)
                }
                _ => context,
            },
            RuntimeMethodGenerics::None => context,
        }
    }

    fn key(&self) -> String {
        let mut key = String::new();
        if let Some((name, arity)) = &self.method {
            key.push_str(&format!("M:{name}`{arity};"));
        }
        for (name, arity) in &self.types {
            key.push_str(&format!("T:{name}`{arity};"));
        }
        key
    }

    fn describe(&self) -> String {
        if self.method.is_none() && self.types.is_empty() {
            "no generic context".to_string()
        } else {
            self.key()
        }
    }
}

/// Converts runtime descriptors into [`TypeSig`] and member references.
///
/// Results are cached per descriptor allocation and generic context; importing the same
/// descriptor again returns the same shared reference. Every assembly a result points into
/// is recorded and can be added to an image with [`ReflectionImporter::import_into`].
#[derive(Debug, Default)]
pub struct ReflectionImporter {
    types: HashMap<(usize, String), (RuntimeTypeRc, Arc<TypeSig>)>,
    fields: HashMap<usize, (RuntimeFieldRc, Arc<FieldRef>)>,
    methods: HashMap<(usize, String), (RuntimeMethodRc, Arc<MethodRef>)>,
    assemblies: Vec<AssemblyIdentity>,
}

impl ReflectionImporter {
    /// Creates an importer with empty caches
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemblies referenced by everything imported so far, in first-seen order
    #[must_use]
    pub fn assemblies(&self) -> &[AssemblyIdentity] {
        &self.assemblies
    }

    /// Drops every cached result
    pub fn clear(&mut self) {
        self.types.clear();
        self.fields.clear();
        self.methods.clear();
    }

    fn note_assembly(&mut self, identity: &AssemblyIdentity) {
        if !self.assemblies.iter().any(|a| a.name == identity.name) {
            self.assemblies.push(identity.clone());
        }
    }

    /// Imports a runtime type.
    ///
    /// # Arguments
    /// * `ty` - The runtime descriptor
    /// * `context` - Generic parameters visible at the point of use
    ///
    /// # Errors
    /// Returns [`Error::ContextNotSupported`] for a generic parameter without a matching
    /// context and [`Error::UnsupportedReference`] for shapes without an import rule.
    pub fn import_type(
        &mut self,
        ty: &RuntimeTypeRc,
        context: &GenericContext,
    ) -> Result<Arc<TypeSig>> {
        let key = (Arc::as_ptr(ty) as usize, context.key());
        if let Some((_, cached)) = self.types.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let imported = Arc::new(self.build_type(ty, context)?);
        self.types
            .insert(key, (Arc::clone(ty), Arc::clone(&imported)));
        Ok(imported)
    }

    fn build_type(&mut self, ty: &RuntimeTypeRc, context: &GenericContext) -> Result<TypeSig> {
        Ok(match ty.as_ref() {
            RuntimeType::Primitive(kind) => TypeSig::Primitive(*kind),
            RuntimeType::ByRef(inner) => self.import_type(inner, context)?.as_ref().clone().by_ref(),
            RuntimeType::Pointer(inner) => {
                TypeSig::Pointer(Box::new(self.import_type(inner, context)?.as_ref().clone()))
            }
            RuntimeType::Array { element, rank } => TypeSig::Array {
                element: Box::new(self.import_type(element, context)?.as_ref().clone()),
                rank: *rank,
            },
            RuntimeType::GenericInstance { definition, args } => {
                let TypeSig::Named(named) = self.import_type(definition, context)?.as_ref().clone()
                else {
                    return Err(Error::UnsupportedReference(format!(
                        "generic instance over {}",
                        definition.full_name()
                    )));
                };
                let args = args
                    .iter()
                    .map(|arg| Ok(self.import_type(arg, context)?.as_ref().clone()))
                    .collect::<Result<Vec<_>>>()?;
                TypeSig::GenericInstance {
                    definition: named,
                    args,
                }
            }
            RuntimeType::GenericParam {
                declaring_type,
                declaring_method,
                position,
                name,
            } => Self::bind_generic_param(
                declaring_type.as_deref(),
                declaring_method.is_some(),
                *position,
                name,
                context,
            )?,
            RuntimeType::Definition(def) => {
                self.note_assembly(&def.assembly);
                let mut named = match &def.declaring {
                    Some(declaring) => {
                        let TypeSig::Named(outer) =
                            self.import_type(declaring, context)?.as_ref().clone()
                        else {
                            return Err(Error::UnsupportedReference(format!(
                                "nested type {} inside {}",
                                def.name,
                                declaring.full_name()
                            )));
                        };
                        NamedType::nested(outer, def.name.clone())
                    }
                    None => NamedType::new(
                        def.assembly.name.clone(),
                        def.namespace.clone().unwrap_or_default(),
                        def.name.clone(),
                    ),
                };
                named.value_type = def.value_type;
                TypeSig::Named(named)
            }
            RuntimeType::Unsupported(description) => {
                return Err(Error::UnsupportedReference(description.clone()))
            }
        })
    }

    fn bind_generic_param(
        declaring_type: Option<&RuntimeType>,
        method_param: bool,
        position: u32,
        name: &str,
        context: &GenericContext,
    ) -> Result<TypeSig> {
        let unsupported = || Error::ContextNotSupported {
            parameter: name.to_string(),
            context: context.describe(),
        };

        if method_param {
            return match &context.method {
                Some((_, arity)) if position < *arity => Ok(TypeSig::GenericParam {
                    owner: GenericOwner::Method,
                    position,
                    name: name.to_string(),
                }),
                _ => Err(unsupported()),
            };
        }

        let owner = declaring_type
            .and_then(RuntimeType::definition)
            .ok_or_else(unsupported)?
            .full_name();
        context
            .types
            .iter()
            .find(|(full_name, _)| *full_name == owner)
            .filter(|(_, arity)| position < *arity)
            .map(|_| TypeSig::GenericParam {
                owner: GenericOwner::Type,
                position,
                name: name.to_string(),
            })
            .ok_or_else(unsupported)
    }

    /// Imports a runtime field; its type is imported in the context of its declaring type.
    ///
    /// # Errors
    /// See [`ReflectionImporter::import_type`].
    pub fn import_field(&mut self, field: &RuntimeFieldRc) -> Result<Arc<FieldRef>> {
        let key = Arc::as_ptr(field) as usize;
        if let Some((_, cached)) = self.fields.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let context = GenericContext::for_type(&field.declaring);
        let declaring = self.import_type(&field.declaring, &context)?;
        let field_type = self.import_type(&field.field_type, &context)?;
        let imported = Arc::new(FieldRef::new(
            declaring.as_ref().clone(),
            field.name.clone(),
            field_type.as_ref().clone(),
        ));
        self.fields
            .insert(key, (Arc::clone(field), Arc::clone(&imported)));
        Ok(imported)
    }

    /// Imports a runtime method or constructor.
    ///
    /// Generic method instances import their definition first and then each type argument
    /// in `context`; generic method definitions get fresh parameter placeholders.
    ///
    /// # Errors
    /// See [`ReflectionImporter::import_type`].
    pub fn import_method(
        &mut self,
        method: &RuntimeMethodRc,
        context: &GenericContext,
    ) -> Result<Arc<MethodRef>> {
        let key = (Arc::as_ptr(method) as usize, context.key());
        if let Some((_, cached)) = self.methods.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let imported = match &method.generics {
            RuntimeMethodGenerics::Instance { definition, args } => {
                let mut instance = self.import_method(definition, context)?.as_ref().clone();
                instance.generic_args = args
                    .iter()
                    .map(|arg| Ok(self.import_type(arg, context)?.as_ref().clone()))
                    .collect::<Result<Vec<_>>>()?;
                instance
            }
            RuntimeMethodGenerics::None | RuntimeMethodGenerics::Definition(_) => {
                let own = GenericContext::for_method(method);
                let declaring = self.import_type(&method.declaring, &own)?;
                let ret = match &method.return_type {
                    Some(ret) => self.import_type(ret, &own)?.as_ref().clone(),
                    None => TypeSig::void(),
                };
                let params = method
                    .params
                    .iter()
                    .map(|param| Ok(self.import_type(param, &own)?.as_ref().clone()))
                    .collect::<Result<Vec<_>>>()?;

                let conventions = method.conventions;
                let sig = MethodSig {
                    has_this: conventions.contains(RuntimeCallingConventions::HAS_THIS),
                    explicit_this: conventions.contains(RuntimeCallingConventions::EXPLICIT_THIS),
                    conv: if conventions.contains(RuntimeCallingConventions::VAR_ARGS) {
                        CallingConvention::VarArg
                    } else {
                        CallingConvention::Default
                    },
                    ret,
                    params,
                    generic_params: match &method.generics {
                        RuntimeMethodGenerics::Definition(names) => names.len() as u32,
                        _ => 0,
                    },
                };
                MethodRef::new(declaring.as_ref().clone(), method.name.clone(), sig)
            }
        };

        let imported = Arc::new(imported);
        self.methods
            .insert(key, (Arc::clone(method), Arc::clone(&imported)));
        Ok(imported)
    }

    /// Imports any runtime member with the member's own generic context.
    ///
    /// # Errors
    /// See [`ReflectionImporter::import_type`].
    pub fn import_member(&mut self, member: &RuntimeMember) -> Result<MemberReference> {
        Ok(match member {
            RuntimeMember::Type(ty) => {
                let context = GenericContext::for_type(ty);
                MemberReference::Type(self.import_type(ty, &context)?.as_ref().clone())
            }
            RuntimeMember::Field(field) => {
                MemberReference::Field(self.import_field(field)?.as_ref().clone())
            }
            RuntimeMember::Method(method) => {
                let context = GenericContext::for_method(method);
                MemberReference::Method(self.import_method(method, &context)?.as_ref().clone())
            }
        })
    }

    /// Imports a runtime member into `image`: registers it in the reference table and adds
    /// assembly references for every scope it mentions.
    ///
    /// # Errors
    /// See [`ReflectionImporter::import_type`].
    pub fn import_into(
        &mut self,
        image: &mut Image,
        member: &RuntimeMember,
    ) -> Result<(MemberReference, Token)> {
        let reference = self.import_member(member)?;
        for identity in &self.assemblies {
            image.ensure_assembly_ref(identity.clone());
        }
        let token = image.import_reference(&reference);
        Ok((reference, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{identity::AssemblyVersion, typesig::PrimitiveKind};
    use crate::reflection::descriptor::RuntimeTypeDef;

    fn corlib() -> AssemblyIdentity {
        AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
    }

    fn definition(ns: &str, name: &str, params: &[&str]) -> RuntimeTypeRc {
        Arc::new(RuntimeType::Definition(RuntimeTypeDef {
            assembly: corlib(),
            namespace: Some(ns.to_string()),
            name: name.to_string(),
            declaring: None,
            value_type: false,
            generic_params: params.iter().map(ToString::to_string).collect(),
        }))
    }

    #[test]
    fn test_primitive_and_composites() {
        let mut importer = ReflectionImporter::new();
        let int = Arc::new(RuntimeType::Primitive(PrimitiveKind::I4));
        let array = Arc::new(RuntimeType::Array {
            element: Arc::clone(&int),
            rank: 2,
        });
        let byref = Arc::new(RuntimeType::ByRef(Arc::clone(&array)));

        let sig = importer.import_type(&byref, &GenericContext::none()).unwrap();
        assert_eq!(sig.full_name(), "System.Int32[,]&");
    }

    #[test]
    fn test_cache_shares_results() {
        let mut importer = ReflectionImporter::new();
        let console = definition("System", "Console", &[]);
        let first = importer.import_type(&console, &GenericContext::none()).unwrap();
        let second = importer.import_type(&console, &GenericContext::none()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(importer.assemblies().len(), 1);
    }

    #[test]
    fn test_nested_type_imports_declaring_first() {
        let mut importer = ReflectionImporter::new();
        let outer = definition("System", "Environment", &[]);
        let inner = Arc::new(RuntimeType::Definition(RuntimeTypeDef {
            assembly: corlib(),
            namespace: None,
            name: "SpecialFolder".to_string(),
            declaring: Some(outer),
            value_type: true,
            generic_params: Vec::new(),
        }));
        let sig = importer.import_type(&inner, &GenericContext::none()).unwrap();
        assert_eq!(sig.full_name(), "System.Environment/SpecialFolder");
        assert!(sig.is_value_type());
    }

    #[test]
    fn test_generic_param_binds_type_context() {
        let mut importer = ReflectionImporter::new();
        let list = definition("System.Collections.Generic", "List`1", &["T"]);
        let param = Arc::new(RuntimeType::GenericParam {
            declaring_type: Some(Arc::clone(&list)),
            declaring_method: None,
            position: 0,
            name: "T".to_string(),
        });

        let context = GenericContext::for_type(&list);
        let sig = importer.import_type(&param, &context).unwrap();
        assert_eq!(sig.full_name(), "!0");

        let err = importer
            .import_type(&param, &GenericContext::none())
            .unwrap_err();
        assert!(matches!(err, Error::ContextNotSupported { .. }));
    }

    #[test]
    fn test_method_param_prefers_method_context() {
        let mut importer = ReflectionImporter::new();
        let array = definition("System", "Array", &[]);
        let t = Arc::new(RuntimeType::GenericParam {
            declaring_type: Some(Arc::clone(&array)),
            declaring_method: Some("Empty".to_string()),
            position: 0,
            name: "T".to_string(),
        });
        let empty = Arc::new(RuntimeMethod {
            declaring: Arc::clone(&array),
            name: "Empty".to_string(),
            conventions: RuntimeCallingConventions::STANDARD,
            return_type: Some(Arc::new(RuntimeType::Array {
                element: Arc::clone(&t),
                rank: 1,
            })),
            params: Vec::new(),
            generics: RuntimeMethodGenerics::Definition(vec!["T".to_string()]),
        });

        let method = importer
            .import_method(&empty, &GenericContext::none())
            .unwrap();
        assert_eq!(method.findable_id(true), "!!0[] System.Array::Empty<1>()");
        assert!(!method.sig.has_this);

        let instance = Arc::new(RuntimeMethod {
            generics: RuntimeMethodGenerics::Instance {
                definition: Arc::clone(&empty),
                args: vec![Arc::new(RuntimeType::Primitive(PrimitiveKind::String))],
            },
            ..empty.as_ref().clone()
        });
        let imported = importer
            .import_method(&instance, &GenericContext::none())
            .unwrap();
        assert_eq!(imported.generic_args, vec![TypeSig::string()]);
    }

    #[test]
    fn test_method_instance_cached_per_context() {
        let mut importer = ReflectionImporter::new();
        let list = definition("System.Collections.Generic", "List`1", &["T"]);
        let array = definition("System", "Array", &[]);
        let empty = Arc::new(RuntimeMethod {
            declaring: array,
            name: "Empty".to_string(),
            conventions: RuntimeCallingConventions::STANDARD,
            return_type: None,
            params: Vec::new(),
            generics: RuntimeMethodGenerics::Definition(vec!["U".to_string()]),
        });
        let with_list_param = Arc::new(RuntimeMethod {
            generics: RuntimeMethodGenerics::Instance {
                definition: Arc::clone(&empty),
                args: vec![Arc::new(RuntimeType::GenericParam {
                    declaring_type: Some(Arc::clone(&list)),
                    declaring_method: None,
                    position: 0,
                    name: "T".to_string(),
                })],
            },
            ..empty.as_ref().clone()
        });

        let inside = importer
            .import_method(&with_list_param, &GenericContext::for_type(&list))
            .unwrap();
        assert_eq!(inside.generic_args[0].full_name(), "!0");

        let outside = importer.import_method(&with_list_param, &GenericContext::none());
        assert!(matches!(outside, Err(Error::ContextNotSupported { .. })));
    }

    #[test]
    fn test_unsupported_shape() {
        let mut importer = ReflectionImporter::new();
        let fnptr = Arc::new(RuntimeType::Unsupported("method *".to_string()));
        assert!(matches!(
            importer.import_type(&fnptr, &GenericContext::none()),
            Err(Error::UnsupportedReference(_))
        ));
    }

    #[test]
    fn test_import_into_image() {
        let mut importer = ReflectionImporter::new();
        let mut image = Image::new(AssemblyIdentity::new("Base", AssemblyVersion::default()));
        let console = definition("System", "Console", &[]);
        let write_line = Arc::new(RuntimeMethod {
            declaring: console,
            name: "WriteLine".to_string(),
            conventions: RuntimeCallingConventions::STANDARD,
            return_type: None,
            params: vec![Arc::new(RuntimeType::Primitive(PrimitiveKind::String))],
            generics: RuntimeMethodGenerics::None,
        });

        let (reference, token) = importer
            .import_into(&mut image, &RuntimeMember::Method(write_line))
            .unwrap();
        assert_eq!(
            reference.relink_key(),
            "System.Void System.Console::WriteLine(System.String)"
        );
        assert!(image.references.contains_token(token));
        assert!(image.has_assembly_ref("mscorlib"));
    }
}
