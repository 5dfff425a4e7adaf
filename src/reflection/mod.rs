//! Reference importer for runtime descriptors.
//!
//! Relink targets are not always declarations of a loaded image: a caller may point a
//! reference at code described by a reflection-like API over an already running program.
//! The [`ReflectionImporter`] turns such [`RuntimeType`], [`RuntimeField`] and
//! [`RuntimeMethod`] descriptors into the crate's symbolic references.
//!
//! # Generic parameters
//!
//! Generic parameters are bound positionally against the nearest enclosing
//! [`GenericContext`]. Method parameters require a method context; type parameters walk the
//! chain of enclosing types until one with the declaring type's name is found. A parameter
//! without a matching context is a contract violation reported as
//! [`crate::Error::ContextNotSupported`].

mod descriptor;
mod importer;

pub use descriptor::{
    RuntimeCallingConventions, RuntimeField, RuntimeFieldRc, RuntimeMember, RuntimeMethod,
    RuntimeMethodGenerics, RuntimeMethodRc, RuntimeType, RuntimeTypeDef, RuntimeTypeRc,
};
pub use importer::{GenericContext, ReflectionImporter};
