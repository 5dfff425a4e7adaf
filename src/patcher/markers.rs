//! Provenance marker types written into the output.
//!
//! The merge tags what it did with attributes whose types live in the output image
//! itself, so the output does not depend on the directive library:
//!
//! - `DotPatch.Markers.Added` on declarations a patch introduced
//! - `DotPatch.Markers.Original` on captured original methods
//! - `DotPatch.Markers.OriginalName("orig_...")` on methods whose original was captured
//!
//! `DotPatch.WasHere` is an empty type added before writing so a patched image can be
//! recognized.

use crate::{
    metadata::{
        attributes::{has_attribute, AttributeArgument, CustomAttribute},
        builder::{BodyBuilder, MethodBuilder, TypeBuilder, CORE_LIBRARY},
        image::{Image, TypeId},
        members::{MemberReference, MethodRef, MethodSig, CTOR},
        typesig::TypeSig,
    },
    patcher::directives::MARKER_NAMESPACE,
    Result,
};

/// Full name of the type that flags an image as patched
pub const WAS_HERE: &str = "DotPatch.WasHere";

/// A provenance marker kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Marker {
    /// Added by a patch
    Added,
    /// Captured original of a patched method
    Original,
    /// Names the captured original of a patched method
    OriginalName,
}

impl Marker {
    /// Full name of the marker type
    #[must_use]
    pub fn type_name(self) -> String {
        format!("{MARKER_NAMESPACE}.{self}")
    }

    /// Returns true when `attributes` carry this marker
    #[must_use]
    pub fn is_on(self, attributes: &[CustomAttribute]) -> bool {
        has_attribute(attributes, &self.type_name())
    }
}

fn attribute_base() -> TypeSig {
    TypeSig::named(CORE_LIBRARY, "System", "Attribute")
}

fn ensure_marker_type(image: &mut Image, marker: Marker) -> Result<TypeId> {
    if let Some(id) = image.find_type(&marker.type_name()) {
        return Ok(id);
    }

    let id = image.add_type(
        TypeBuilder::class(MARKER_NAMESPACE, &marker.to_string())
            .base(attribute_base())
            .build(),
        None,
    )?;

    let base_ctor = MethodRef::new(
        attribute_base(),
        CTOR,
        MethodSig::instance(TypeSig::void(), vec![]),
    );
    let body = BodyBuilder::new().ldarg(0).call(base_ctor.clone()).ret();
    let mut ctor = MethodBuilder::ctor();
    if marker == Marker::OriginalName {
        ctor = ctor.param("name", TypeSig::string());
    }
    image.add_method(id, ctor.body(body).build())?;
    image.import_reference(&MemberReference::Method(base_ctor));
    Ok(id)
}

/// Builds a marker attribute, creating the marker type in `image` on first use.
///
/// # Errors
/// Returns an error if the marker type cannot be added.
pub fn marker_attribute(image: &mut Image, marker: Marker) -> Result<CustomAttribute> {
    let id = ensure_marker_type(image, marker)?;
    Ok(CustomAttribute::new(image.named_type(id)?, Vec::new()))
}

/// Builds the marker naming a captured original method.
///
/// # Errors
/// Returns an error if the marker type cannot be added.
pub fn original_name_attribute(image: &mut Image, original: &str) -> Result<CustomAttribute> {
    let id = ensure_marker_type(image, Marker::OriginalName)?;
    Ok(CustomAttribute::new(
        image.named_type(id)?,
        vec![AttributeArgument::String(original.to_string())],
    ))
}

/// Name of the captured original recorded on a method, if any
#[must_use]
pub fn recorded_original(attributes: &[CustomAttribute]) -> Option<&str> {
    let name = Marker::OriginalName.type_name();
    attributes
        .iter()
        .find(|attr| attr.type_name() == name)
        .and_then(|attr| attr.string_arg(0))
}

/// Adds the `DotPatch.WasHere` type unless present.
///
/// # Errors
/// Returns an error if the type cannot be added.
pub fn ensure_was_here(image: &mut Image) -> Result<TypeId> {
    if let Some(id) = image.find_type(WAS_HERE) {
        return Ok(id);
    }
    let (namespace, name) = WAS_HERE.rsplit_once('.').unwrap_or(("", WAS_HERE));
    image.add_type(TypeBuilder::class(namespace, name).build(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::factories::image;

    #[test]
    fn test_marker_types_created_once() {
        let mut output = image("Game");
        let first = marker_attribute(&mut output, Marker::Added).unwrap();
        let second = marker_attribute(&mut output, Marker::Added).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.type_name(), "DotPatch.Markers.Added");
        assert_eq!(first.attribute_type().unwrap().scope, "Game");

        let id = output.find_type("DotPatch.Markers.Added").unwrap();
        assert_eq!(output.type_def(id).unwrap().methods.len(), 1);
        assert_eq!(output.references.len(), 1);
    }

    #[test]
    fn test_original_name_roundtrip() {
        let mut output = image("Game");
        let attr = original_name_attribute(&mut output, "orig_Foo").unwrap();
        assert!(Marker::OriginalName.is_on(std::slice::from_ref(&attr)));
        assert_eq!(recorded_original(&[attr.clone()]), Some("orig_Foo"));

        let id = output.find_type("DotPatch.Markers.OriginalName").unwrap();
        let ctor = output.type_def(id).unwrap().methods[0];
        assert_eq!(
            output.method_def(ctor).unwrap().local_id(),
            attr.ctor.findable_id(false)
        );
    }

    #[test]
    fn test_was_here() {
        let mut output = image("Game");
        let id = ensure_was_here(&mut output).unwrap();
        assert_eq!(ensure_was_here(&mut output).unwrap(), id);
        assert_eq!(output.type_full_name(id).unwrap(), WAS_HERE);
    }
}
