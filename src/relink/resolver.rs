//! Resolution of references through the relink map.

use std::collections::HashMap;

use crate::{
    metadata::{
        identity::AssemblyIdentity,
        image::{Image, TypeId},
        members::MemberReference,
        typesig::{NamedType, TypeSig},
    },
    reflection::ReflectionImporter,
    relink::map::{RelinkMap, RelinkTarget},
    Error, Result,
};

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference maps to this target
    Remapped(MemberReference),
    /// Nothing in the map applies; the caller imports the reference unchanged
    NoRemap,
    /// A mapped target does not exist and strict mode is off; the caller keeps the
    /// original reference
    Unresolved,
}

/// Images a resolution may look into
#[derive(Debug, Clone, Copy)]
pub struct ResolveScope<'a> {
    /// The output image
    pub output: &'a Image,
    /// Loaded dependencies
    pub dependencies: &'a [Image],
    /// Patch images
    pub mods: &'a [Image],
}

impl<'a> ResolveScope<'a> {
    /// A scope containing only the output image
    #[must_use]
    pub fn output_only(output: &'a Image) -> Self {
        Self {
            output,
            dependencies: &[],
            mods: &[],
        }
    }

    /// Image whose assembly name is `name`
    #[must_use]
    pub fn image_named(&self, name: &str) -> Option<&'a Image> {
        std::iter::once(self.output)
            .chain(self.dependencies.iter())
            .chain(self.mods.iter())
            .find(|image| image.identity.name == name)
    }

    /// Finds a type by full name in the output image, then in the dependencies
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<(&'a Image, TypeId)> {
        std::iter::once(self.output)
            .chain(self.dependencies.iter())
            .find_map(|image| image.find_type(full_name).map(|id| (image, id)))
    }
}

/// Resolves references through a [`RelinkMap`], caching direct hits.
///
/// The lookup order is: explicit link-to targets, the resolution cache, the relink map
/// (by raw key, patch-name key and then the alternate method key) and finally module
/// redirects for type references.
#[derive(Debug, Default)]
pub struct Resolver {
    /// The relink map
    pub map: RelinkMap,
    cache: HashMap<String, MemberReference>,
    importer: ReflectionImporter,
    /// Missing targets are errors instead of [`Resolution::Unresolved`]
    pub strict: bool,
    /// Cache direct-map results
    pub use_cache: bool,
}

fn lookup_keys(reference: &MemberReference) -> Vec<String> {
    let mut keys = vec![reference.relink_key()];
    let patch_key = reference.patch_relink_key();
    if !keys.contains(&patch_key) {
        keys.push(patch_key);
    }
    if let Some(alternate) = reference.alternate_key() {
        keys.push(alternate);
    }
    keys
}

/// Replaces the definition behind `original` with `found`, keeping generic arguments
fn rebind(original: &TypeSig, found: NamedType) -> TypeSig {
    match original {
        TypeSig::GenericInstance { args, .. } => TypeSig::GenericInstance {
            definition: found,
            args: args.clone(),
        },
        _ => TypeSig::Named(found),
    }
}

fn with_declaring(reference: &MemberReference, declaring: TypeSig) -> MemberReference {
    let mut moved = reference.clone();
    match &mut moved {
        MemberReference::Type(ty) => *ty = declaring,
        MemberReference::Method(method) => method.declaring = declaring,
        MemberReference::Field(field) => field.declaring = declaring,
        MemberReference::Property(property) => property.declaring = declaring,
    }
    moved
}

impl Resolver {
    /// Creates a resolver around `map`
    #[must_use]
    pub fn new(map: RelinkMap) -> Self {
        Self {
            map,
            use_cache: true,
            ..Self::default()
        }
    }

    /// Assemblies referenced by runtime targets imported so far
    #[must_use]
    pub fn imported_assemblies(&self) -> &[AssemblyIdentity] {
        self.importer.assemblies()
    }

    /// Number of cached resolutions
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drops the resolution cache and the importer caches; the map itself stays
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.importer.clear();
    }

    /// Resolves `reference`.
    ///
    /// # Arguments
    /// * `reference` - The reference to resolve
    /// * `scope` - The images to search
    /// * `allow_direct` - Consult the relink map
    /// * `allow_module` - Consult module redirects for type references
    ///
    /// # Errors
    /// Returns [`Error::RelinkTargetNotFound`] in strict mode when a mapped target does not
    /// exist, and importer errors for runtime targets.
    pub fn resolve(
        &mut self,
        reference: &MemberReference,
        scope: &ResolveScope<'_>,
        allow_direct: bool,
        allow_module: bool,
    ) -> Result<Resolution> {
        let keys = lookup_keys(reference);

        let linked = keys.iter().find_map(|key| self.map.linked(key).cloned());
        if let Some(target) = linked {
            return self.resolve_target(reference, &target, scope);
        }

        if allow_direct {
            for key in &keys {
                if self.use_cache {
                    if let Some(hit) = self.cache.get(key) {
                        return Ok(Resolution::Remapped(hit.clone()));
                    }
                }
                let Some(target) = self.map.get(key).cloned() else {
                    continue;
                };
                let resolution = self.resolve_target(reference, &target, scope)?;
                if let (true, Resolution::Remapped(resolved)) = (self.use_cache, &resolution) {
                    self.cache.insert(key.clone(), resolved.clone());
                }
                return Ok(resolution);
            }
        }

        if allow_module {
            if let MemberReference::Type(ty) = reference {
                if let Some(named) = ty.definition() {
                    if let Some(image_name) = self.map.module_redirect(&named.scope) {
                        let found = scope.image_named(image_name).and_then(|image| {
                            let id = image.find_type(&named.full_name())?;
                            image.named_type(id).ok()
                        });
                        return match found {
                            Some(found) => {
                                Ok(Resolution::Remapped(MemberReference::Type(rebind(ty, found))))
                            }
                            None => self.missing(
                                format!("[{}]{}", image_name, named.full_name()),
                                reference,
                            ),
                        };
                    }
                }
            }
        }

        Ok(Resolution::NoRemap)
    }

    fn missing(&self, target: String, reference: &MemberReference) -> Result<Resolution> {
        if self.strict {
            return Err(Error::RelinkTargetNotFound {
                target,
                context: reference.to_string(),
            });
        }
        log::warn!("[Relink] Target {target} for {reference} not found, leaving it unresolved");
        Ok(Resolution::Unresolved)
    }

    fn resolve_target(
        &mut self,
        reference: &MemberReference,
        target: &RelinkTarget,
        scope: &ResolveScope<'_>,
    ) -> Result<Resolution> {
        match target {
            RelinkTarget::Resolved(resolved) => Ok(Resolution::Remapped(resolved.clone())),
            RelinkTarget::Runtime(member) => Ok(Resolution::Remapped(
                self.importer.import_member(member)?,
            )),
            RelinkTarget::TypeName(type_name) => {
                let Some((image, id)) = scope.find_type(type_name) else {
                    return self.missing(type_name.clone(), reference);
                };
                let found = rebind(reference.declaring(), image.named_type(id)?);
                Ok(Resolution::Remapped(with_declaring(reference, found)))
            }
            RelinkTarget::Member {
                type_name,
                member_id,
            } => {
                let target_name = format!("{type_name}::{member_id}");
                let Some((image, owner)) = scope.find_type(type_name) else {
                    return self.missing(target_name, reference);
                };

                let found = if let Some(method) = image.find_method(owner, member_id) {
                    Some(MemberReference::Method(image.method_ref(method)?))
                } else if let Some(field) = image.find_field(owner, member_id) {
                    Some(MemberReference::Field(image.field_ref(field)?))
                } else if let Some(property) = image.find_property(owner, member_id) {
                    Some(MemberReference::Property(image.property_ref(property)?))
                } else {
                    None
                };

                match found {
                    Some(found) => {
                        let declaring = match found.declaring().definition() {
                            Some(named) => rebind(reference.declaring(), named.clone()),
                            None => found.declaring().clone(),
                        };
                        Ok(Resolution::Remapped(with_declaring(&found, declaring)))
                    }
                    None => self.missing(target_name, reference),
                }
            }
        }
    }
}
