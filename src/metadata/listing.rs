//! Canonical textual listing of an image and its SHA-1 fingerprint.
//!
//! The listing walks the image in declaration order and prints every declaration, its
//! token, signature, custom attributes and instructions. Two images with equal listings are
//! interchangeable for every purpose of this crate; comparing fingerprints is how
//! determinism of a patch run is checked.

use std::fmt::Write;

use sha1::{Digest, Sha1};

use crate::{
    metadata::{
        attributes::{AttributeArgument, CustomAttribute},
        body::MethodBody,
        image::{Image, TypeId},
        members::MethodSig,
    },
    Result,
};

fn write_attributes(out: &mut String, indent: &str, attributes: &[CustomAttribute]) {
    for attribute in attributes {
        let args: Vec<String> = attribute
            .args
            .iter()
            .map(|arg| match arg {
                AttributeArgument::String(value) => format!("{value:?}"),
                AttributeArgument::Int(value) => value.to_string(),
                AttributeArgument::Bool(value) => value.to_string(),
                AttributeArgument::Type(ty) => format!("typeof({ty})"),
            })
            .collect();
        let _ = writeln!(
            out,
            "{indent}[{}]{}({})",
            attribute.ctor.declaring.definition().map(|d| d.scope.as_str()).unwrap_or_default(),
            attribute.type_name(),
            args.join(", ")
        );
    }
}

fn write_sig(out: &mut String, name: &str, sig: &MethodSig) {
    let params: Vec<String> = sig.params.iter().map(ToString::to_string).collect();
    let _ = write!(
        out,
        "{}{} {}({})",
        if sig.has_this { "instance " } else { "" },
        sig.ret,
        name,
        params.join(", ")
    );
}

fn write_body(out: &mut String, body: &MethodBody) {
    for (index, local) in body.locals.iter().enumerate() {
        let _ = writeln!(out, "      .local V_{index} {local}");
    }
    for handler in &body.exception_handlers {
        let _ = writeln!(
            out,
            "      .try IL_{:04}..IL_{:04} handler IL_{:04}..IL_{:04} {:?} {}",
            handler.try_start,
            handler.try_end,
            handler.handler_start,
            handler.handler_end,
            handler.flags,
            handler
                .catch_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
    }
    for (index, instruction) in body.instructions.iter().enumerate() {
        match instruction.operand.as_string() {
            Some(operand) => {
                let _ = writeln!(out, "      IL_{index:04}: {} {operand}", instruction.opcode);
            }
            None => {
                let _ = writeln!(out, "      IL_{index:04}: {}", instruction.opcode);
            }
        }
    }
}

fn write_type(out: &mut String, image: &Image, id: TypeId) -> Result<()> {
    let def = image.type_def(id)?;
    let _ = writeln!(
        out,
        ".class {} {} 0x{:08x}",
        def.token,
        image.type_full_name(id)?,
        def.attributes.bits()
    );
    if let Some(base) = &def.base_type {
        let _ = writeln!(out, "  extends {base}");
    }
    for interface in &def.interfaces {
        let _ = writeln!(out, "  implements {interface}");
    }
    for param in &def.generic_params {
        let constraints: Vec<String> = param.constraints.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "  .generic {} ({})", param.name, constraints.join(", "));
    }
    write_attributes(out, "  ", &def.custom_attributes);

    for &field_id in &def.fields {
        let field = image.field_def(field_id)?;
        let _ = write!(
            out,
            "  .field {} 0x{:04x} {} {}",
            field.token,
            field.attributes.bits(),
            field.field_type,
            field.name
        );
        if let Some(constant) = field.constant {
            let _ = write!(out, " = {constant}");
        }
        out.push('\n');
        write_attributes(out, "    ", &field.custom_attributes);
    }

    for &property_id in &def.properties {
        let property = image.property_def(property_id)?;
        let _ = writeln!(
            out,
            "  .property {} {} {}",
            property.token, property.property_type, property.name
        );
        for accessor in property.accessors() {
            let _ = writeln!(out, "    .accessor {}", image.method_def(accessor)?.name);
        }
        write_attributes(out, "    ", &property.custom_attributes);
    }

    for &event_id in &def.events {
        let event = image.event_def(event_id)?;
        let _ = writeln!(out, "  .event {} {} {}", event.token, event.event_type, event.name);
        for accessor in event.accessors() {
            let _ = writeln!(out, "    .accessor {}", image.method_def(accessor)?.name);
        }
        write_attributes(out, "    ", &event.custom_attributes);
    }

    for &method_id in &def.methods {
        let method = image.method_def(method_id)?;
        let _ = write!(
            out,
            "  .method {} 0x{:04x} 0x{:04x} ",
            method.token,
            method.attributes.bits(),
            method.impl_attributes.bits()
        );
        write_sig(out, &method.name, &method.sig);
        out.push('\n');
        for param in &method.generic_params {
            let _ = writeln!(out, "    .generic {}", param.name);
        }
        for overridden in &method.overrides {
            let _ = writeln!(out, "    .override {}", overridden.findable_id(true));
        }
        if let Some(pinvoke) = &method.pinvoke {
            let _ = writeln!(out, "    .pinvoke {}!{}", pinvoke.module, pinvoke.entry_point);
        }
        write_attributes(out, "    ", &method.custom_attributes);
        if let Some(body) = &method.body {
            write_body(out, body);
        }
    }
    Ok(())
}

/// Renders the canonical listing of `image`.
///
/// # Errors
/// Returns an error if the image holds a stale handle.
pub fn listing(image: &Image) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, ".module {}", image.name);
    let _ = writeln!(
        out,
        ".assembly {} ({})",
        image.identity.display_name(),
        image.runtime_version
    );
    write_attributes(&mut out, "  ", &image.custom_attributes);
    for reference in &image.assembly_refs {
        let _ = writeln!(out, ".assembly extern {}", reference.display_name());
    }
    for module in &image.module_refs {
        let _ = writeln!(out, ".module extern {module}");
    }
    for resource in &image.resources {
        let digest = Sha1::digest(&resource.data);
        let _ = writeln!(
            out,
            ".mresource {} {} {}",
            if resource.public { "public" } else { "private" },
            resource.name,
            hex(&digest)
        );
    }
    for id in image.types() {
        write_type(&mut out, image, id)?;
    }
    for entry in image.references.iter() {
        let _ = writeln!(out, ".ref {} {}", entry.token, entry.reference.canonical_key());
    }
    Ok(out)
}

/// SHA-1 over the canonical listing, as lowercase hex.
///
/// # Errors
/// Returns an error if the image holds a stale handle.
pub fn fingerprint(image: &Image) -> Result<String> {
    let mut hasher = Sha1::new();
    hasher.update(listing(image)?.as_bytes());
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builder::{BodyBuilder, ImageBuilder, MethodBuilder, TypeBuilder},
        identity::AssemblyVersion,
        typesig::TypeSig,
    };

    fn sample(value: i32) -> Image {
        let mut builder = ImageBuilder::new("Base", AssemblyVersion::new(1, 0, 0, 0));
        let ty = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
        builder
            .add_method(
                ty,
                MethodBuilder::new("Foo")
                    .returns(TypeSig::int32())
                    .body(BodyBuilder::new().ldc_i4(value).ret()),
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_listing_contents() {
        let text = listing(&sample(1)).unwrap();
        assert!(text.contains(".class 0x02000001 Game.A"));
        assert!(text.contains("instance System.Int32 Foo()"));
        assert!(text.contains("IL_0000: ldc.i4 1"));
        assert!(text.contains("IL_0001: ret"));
        assert!(text.contains(".assembly extern mscorlib"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let first = fingerprint(&sample(1)).unwrap();
        assert_eq!(first, fingerprint(&sample(1)).unwrap());
        assert_eq!(first.len(), 40);
        assert_ne!(first, fingerprint(&sample(2)).unwrap());
    }
}
