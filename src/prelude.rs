//! # dotpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the dotpatch library. Import it to get quick access to everything a patch run needs.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

// ================================================================================================
// Patch Pipeline
// ================================================================================================

/// The pipeline driver, its configuration, stages and extension points
pub use crate::patcher::{
    AttributeHandler, Directive, Marker, PatchHooks, PatchStage, Patcher, PatcherConfig,
};

// ================================================================================================
// Loading and Writing
// ================================================================================================

/// Collaborators that read, resolve and write images
pub use crate::loader::{
    AssemblyResolver, ImageSink, ImageSource, MemorySink, MemorySource, SymbolFormat,
};

// ================================================================================================
// Image Model
// ================================================================================================

/// Images, declarations and their handles
pub use crate::metadata::image::{
    Declaration, EventId, FieldId, Image, MethodId, PropertyId, TypeId,
};

/// Assembly identities
pub use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

/// Symbolic references
pub use crate::metadata::{
    members::{FieldRef, MemberReference, MethodRef, MethodSig, PropertyRef},
    typesig::{NamedType, TypeSig},
};

/// Method bodies
pub use crate::metadata::body::{Instruction, MethodBody, OpCode, Operand};

/// Image construction
pub use crate::metadata::builder::{
    BodyBuilder, FieldBuilder, ImageBuilder, MethodBuilder, TypeBuilder,
};

/// Output inspection
pub use crate::metadata::{
    listing::{fingerprint, listing},
    verify::{verify_references, DanglingReference},
};

// ================================================================================================
// Relinking
// ================================================================================================

/// Relink rules
pub use crate::relink::{RelinkMap, RelinkTarget};
