//! Naming conventions shared by the passes.

use crate::{
    metadata::{
        flags::MethodAttributes,
        image::{FieldId, Image, MethodDef, TypeId},
        members::{CCTOR, CTOR},
        typesig::strip_patch_prefix,
    },
    patcher::directives::{Directive, DirectiveSet, DIRECTIVE_NAMESPACE},
    Result,
};

/// Prefix of captured original methods
pub const ORIGINAL_PREFIX: &str = "orig_";

/// Suffix of compiler generated backing fields
pub const BACKING_FIELD_SUFFIX: &str = "__BackingField";

/// Full name of the output type a patch type targets.
///
/// A `Name` directive replaces the simple name, or the whole name when it contains a
/// namespace. Otherwise the `patch_` prefix is stripped. Nested types are resolved through
/// their enclosing type.
///
/// # Errors
/// Returns an error if the handle or one of its enclosing types is stale.
pub fn target_type_name(patch: &Image, id: TypeId) -> Result<String> {
    let def = patch.type_def(id)?;
    let directives = DirectiveSet::parse(&def.custom_attributes);
    let own = directives
        .name
        .unwrap_or_else(|| strip_patch_prefix(&def.name).to_string());

    Ok(match def.declaring {
        Some(parent) => format!("{}/{}", target_type_name(patch, parent)?, own),
        None if own.contains('.') || def.namespace.is_empty() => own,
        None => format!("{}.{}", def.namespace, own),
    })
}

/// Splits a target type name into namespace and simple name.
///
/// Nested names keep an empty namespace.
#[must_use]
pub fn split_type_name(full_name: &str) -> (&str, &str) {
    if let Some((_, nested)) = full_name.rsplit_once('/') {
        return ("", nested);
    }
    full_name.rsplit_once('.').unwrap_or(("", full_name))
}

/// Name of a patch member in the output: the `Name` directive or the name without prefix
#[must_use]
pub fn target_member_name(name: &str, directives: &DirectiveSet) -> String {
    directives
        .name
        .clone()
        .unwrap_or_else(|| strip_patch_prefix(name).to_string())
}

/// Name under which the original of `method` is captured.
///
/// Constructors embed the simple name of their type, since every type has one.
#[must_use]
pub fn original_method_name(method: &str, type_name: &str) -> String {
    match method {
        CTOR => format!("{ORIGINAL_PREFIX}ctor_{type_name}"),
        CCTOR => format!("{ORIGINAL_PREFIX}cctor_{type_name}"),
        _ => format!("{ORIGINAL_PREFIX}{method}"),
    }
}

/// Returns true for the directive library namespace and its children
#[must_use]
pub fn is_directive_namespace(namespace: &str) -> bool {
    namespace == DIRECTIVE_NAMESPACE
        || namespace
            .strip_prefix(DIRECTIVE_NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Backing field of the property or event `member` of `owner`
#[must_use]
pub fn backing_field(image: &Image, owner: TypeId, member: &str) -> Option<FieldId> {
    let prefix = format!("<{member}>");
    let def = image.type_def(owner).ok()?;
    def.fields.iter().copied().find(|&id| {
        image.field_def(id).is_ok_and(|field| {
            field.name.starts_with(&prefix) && field.name.ends_with(BACKING_FIELD_SUFFIX)
        })
    })
}

/// Decides whether a special-named patch method may be merged.
///
/// # Arguments
/// * `method` - The patch method
/// * `directives` - Its directives
/// * `type_added` - Whether the patch or output type carries the `Added` directive
#[must_use]
pub fn allowed_special_name(method: &MethodDef, directives: &DirectiveSet, type_added: bool) -> bool {
    if directives.has(Directive::Added) || type_added {
        return true;
    }

    if method.is_constructor() && (method.is_static() || directives.has(Directive::Constructor)) {
        return true;
    }

    let accessor = method.attributes.contains(MethodAttributes::SPECIAL_NAME)
        && (method.name.starts_with("get_") || method.name.starts_with("set_"));
    if accessor || method.name.starts_with("op_") {
        return true;
    }

    !method.is_rt_special_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builder::{FieldBuilder, ImageBuilder, MethodBuilder, TypeBuilder},
        identity::AssemblyVersion,
        typesig::TypeSig,
    };

    #[test]
    fn test_target_type_names() {
        let mut builder = ImageBuilder::new("Game.Mod.mm", AssemblyVersion::new(1, 0, 0, 0));
        let outer = builder.add_type(TypeBuilder::class("Game", "patch_Outer")).unwrap();
        let inner = builder
            .add_nested(outer, TypeBuilder::nested("patch_Inner"))
            .unwrap();
        let renamed = builder
            .add_type(
                TypeBuilder::class("Game", "Anything")
                    .custom_attribute(Directive::Name.attribute_with(&["Player"])),
            )
            .unwrap();
        let moved = builder
            .add_type(
                TypeBuilder::class("Game", "Other")
                    .custom_attribute(Directive::Name.attribute_with(&["Engine.Core"])),
            )
            .unwrap();
        let patch = builder.build();

        assert_eq!(target_type_name(&patch, outer).unwrap(), "Game.Outer");
        assert_eq!(target_type_name(&patch, inner).unwrap(), "Game.Outer/Inner");
        assert_eq!(target_type_name(&patch, renamed).unwrap(), "Game.Player");
        assert_eq!(target_type_name(&patch, moved).unwrap(), "Engine.Core");

        assert_eq!(split_type_name("Game.Outer/Inner"), ("", "Inner"));
        assert_eq!(split_type_name("Game.Sub.A"), ("Game.Sub", "A"));
        assert_eq!(split_type_name("Global"), ("", "Global"));
    }

    #[test]
    fn test_original_names() {
        assert_eq!(original_method_name("Foo", "A"), "orig_Foo");
        assert_eq!(original_method_name(CTOR, "A"), "orig_ctor_A");
        assert_eq!(original_method_name(CCTOR, "A"), "orig_cctor_A");
    }

    #[test]
    fn test_directive_namespace() {
        assert!(is_directive_namespace("DotPatch"));
        assert!(is_directive_namespace("DotPatch.Markers"));
        assert!(!is_directive_namespace("DotPatcher"));
        assert!(!is_directive_namespace("Game"));
    }

    #[test]
    fn test_backing_field_lookup() {
        let mut builder = ImageBuilder::new("Game", AssemblyVersion::new(1, 0, 0, 0));
        let a = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
        builder
            .add_field(a, FieldBuilder::new("<Value>__BackingField", TypeSig::int32()))
            .unwrap();
        builder
            .add_field(a, FieldBuilder::new("<Other>k__BackingField", TypeSig::int32()))
            .unwrap();
        let image = builder.build();

        assert!(backing_field(&image, a, "Value").is_some());
        assert!(backing_field(&image, a, "Other").is_some());
        assert!(backing_field(&image, a, "Missing").is_none());
    }

    #[test]
    fn test_special_name_admission() {
        let none = DirectiveSet::default();
        let ctor = MethodBuilder::ctor().build();
        let cctor = MethodBuilder::cctor().build();
        let getter = MethodBuilder::new("get_Value")
            .attributes(MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME)
            .build();
        let plain = MethodBuilder::new("Run").build();

        assert!(!allowed_special_name(&ctor, &none, false));
        assert!(allowed_special_name(&ctor, &none, true));
        assert!(allowed_special_name(&cctor, &none, false));
        assert!(allowed_special_name(&getter, &none, false));
        assert!(allowed_special_name(&plain, &none, false));

        let added = DirectiveSet::parse(&[Directive::Added.attribute()]);
        assert!(allowed_special_name(&ctor, &added, false));
    }
}
