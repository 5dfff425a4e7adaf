//! Dangling-reference verification.
//!
//! A reference dangles when an instruction operand was never imported into the image's
//! reference table, when it names a scope the image does not reference, or when it points
//! into the image itself at a declaration that does not exist.

use std::fmt;

use crate::{
    metadata::{
        attributes::CustomAttribute,
        image::{Declaration, Image},
        members::MemberReference,
        typesig::{NamedType, TypeSig},
    },
    Result,
};

/// Why a reference is dangling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DanglingReason {
    /// An instruction operand missing from the reference table
    NotImported,
    /// A reference into this image whose declaration does not exist
    MissingDefinition,
    /// A reference into an assembly the image does not reference
    UnknownScope,
}

/// A dangling reference and where it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Declaration (and instruction) holding the reference
    pub location: String,
    /// The reference, rendered
    pub reference: String,
    /// Why it dangles
    pub reason: DanglingReason,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.location, self.reference, self.reason)
    }
}

struct Verifier<'a> {
    image: &'a Image,
    found: Vec<DanglingReference>,
}

impl Verifier<'_> {
    fn report(&mut self, location: &str, reference: String, reason: DanglingReason) {
        self.found.push(DanglingReference {
            location: location.to_string(),
            reference,
            reason,
        });
    }

    fn scope_known(&self, named: &NamedType) -> bool {
        named.scope == self.image.scope_name() || self.image.has_assembly_ref(&named.scope)
    }

    fn local(&self, named: &NamedType) -> bool {
        named.scope == self.image.scope_name()
    }

    fn check_type(&mut self, location: &str, sig: &TypeSig) {
        let mut problems = Vec::new();
        sig.for_each_named(&mut |named| {
            if !self.scope_known(named) {
                problems.push((format!("[{}]{}", named.scope, named.full_name()), DanglingReason::UnknownScope));
            } else if self.local(named) && self.image.find_type(&named.full_name()).is_none() {
                problems.push((named.full_name(), DanglingReason::MissingDefinition));
            }
        });
        for (reference, reason) in problems {
            self.report(location, reference, reason);
        }
    }

    fn check_member(&mut self, location: &str, reference: &MemberReference) {
        for sig in reference.type_sigs() {
            self.check_type(location, sig);
        }

        let Some(named) = reference.declaring().definition() else {
            return;
        };
        if !self.local(named) {
            return;
        }
        let Some(owner) = self.image.find_type(&named.full_name()) else {
            return;
        };
        let exists = match reference {
            MemberReference::Type(_) => true,
            MemberReference::Method(method) => self
                .image
                .find_method(owner, &method.findable_id(false))
                .is_some(),
            MemberReference::Field(field) => self.image.find_field(owner, &field.name).is_some(),
            MemberReference::Property(property) => {
                self.image.find_property(owner, &property.name).is_some()
            }
        };
        if !exists {
            self.report(location, reference.to_string(), DanglingReason::MissingDefinition);
        }
    }

    fn check_attributes(&mut self, location: &str, attributes: &[CustomAttribute]) {
        for attribute in attributes {
            self.check_member(location, &MemberReference::Method(attribute.ctor.clone()));
        }
    }

    fn run(&mut self) -> Result<()> {
        let image = self.image;
        self.check_attributes("<assembly>", &image.custom_attributes);

        for declaration in image.declarations() {
            match declaration {
                Declaration::Type(id) => {
                    let def = image.type_def(id)?;
                    let location = image.type_full_name(id)?;
                    for sig in def.type_sigs() {
                        self.check_type(&location, sig);
                    }
                    self.check_attributes(&location, &def.custom_attributes);
                }
                Declaration::Field(id) => {
                    let field = image.field_def(id)?;
                    let location = format!("{}::{}", image.field_ref(id)?.declaring, field.name);
                    self.check_type(&location, &field.field_type);
                    self.check_attributes(&location, &field.custom_attributes);
                }
                Declaration::Property(id) => {
                    let property = image.property_def(id)?;
                    let location =
                        format!("{}::{}", image.property_ref(id)?.declaring, property.name);
                    self.check_type(&location, &property.property_type);
                    self.check_attributes(&location, &property.custom_attributes);
                }
                Declaration::Event(id) => {
                    let event = image.event_def(id)?;
                    self.check_type(&event.name, &event.event_type);
                    self.check_attributes(&event.name, &event.custom_attributes);
                }
                Declaration::Method(id) => {
                    let method = image.method_def(id)?;
                    let location = image.method_findable_id(id, true)?;
                    for sig in method.type_sigs() {
                        self.check_type(&location, sig);
                    }
                    for overridden in &method.overrides {
                        self.check_member(&location, &MemberReference::Method(overridden.clone()));
                    }
                    self.check_attributes(&location, &method.custom_attributes);

                    let Some(body) = &method.body else {
                        continue;
                    };
                    for (index, instruction) in body.instructions.iter().enumerate() {
                        let Some(reference) = instruction.operand.reference() else {
                            continue;
                        };
                        let at = format!("{location} IL_{index:04}");
                        if !image.references.contains(reference) {
                            self.report(&at, reference.to_string(), DanglingReason::NotImported);
                        }
                        self.check_member(&at, reference);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reports every dangling reference of `image`, in declaration order.
///
/// # Errors
/// Returns an error if the image holds a stale handle.
pub fn verify_references(image: &Image) -> Result<Vec<DanglingReference>> {
    let mut verifier = Verifier {
        image,
        found: Vec::new(),
    };
    verifier.run()?;
    Ok(verifier.found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builder::{BodyBuilder, ImageBuilder, MethodBuilder, TypeBuilder},
        identity::AssemblyVersion,
        members::{FieldRef, MethodRef, MethodSig},
    };

    #[test]
    fn test_clean_image() {
        let mut builder = ImageBuilder::new("Base", AssemblyVersion::new(1, 0, 0, 0));
        let ty = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
        let foo = builder
            .add_method(
                ty,
                MethodBuilder::new("Foo")
                    .returns(TypeSig::int32())
                    .body(BodyBuilder::new().ldc_i4(1).ret()),
            )
            .unwrap();
        let foo_ref = builder.method_ref(foo).unwrap();
        builder
            .add_method(
                ty,
                MethodBuilder::new("Bar").body(BodyBuilder::new().ldarg(0).call(foo_ref.clone()).pop().ret()),
            )
            .unwrap();
        let mut image = builder.build();
        image.import_reference(&MemberReference::Method(foo_ref));

        assert!(verify_references(&image).unwrap().is_empty());
    }

    #[test]
    fn test_reports_each_reason() {
        let mut builder = ImageBuilder::new("Base", AssemblyVersion::new(1, 0, 0, 0));
        let ty = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
        let missing_field = FieldRef::new(TypeSig::named("Base", "Game", "A"), "gone", TypeSig::int32());
        let foreign = MethodRef::new(
            TypeSig::named("Other", "Lib", "Util"),
            "Run",
            MethodSig::static_(TypeSig::void(), vec![]),
        );
        builder
            .add_method(
                ty,
                MethodBuilder::new("Bar").body(
                    BodyBuilder::new()
                        .ldarg(0)
                        .ldfld(missing_field.clone())
                        .pop()
                        .call(foreign)
                        .ret(),
                ),
            )
            .unwrap();
        let mut image = builder.build();
        image.import_reference(&MemberReference::Field(missing_field));

        let found = verify_references(&image).unwrap();
        let reasons: Vec<DanglingReason> = found.iter().map(|d| d.reason).collect();
        assert!(reasons.contains(&DanglingReason::MissingDefinition));
        assert!(reasons.contains(&DanglingReason::NotImported));
        assert!(reasons.contains(&DanglingReason::UnknownScope));
        assert!(found
            .iter()
            .any(|d| d.reason == DanglingReason::MissingDefinition && d.reference.contains("gone")));
    }
}
