//! Image loading and dependency mapping.
//!
//! The [`source`] module defines how images enter and leave the patcher: an [`ImageSource`]
//! reads them, an optional [`AssemblyResolver`] finds installed assemblies and an
//! [`ImageSink`] receives the result. The [`mapper`] module builds the dependency graph of
//! the working set on top of those collaborators.

pub mod mapper;
pub mod source;

pub use mapper::{
    is_mod_file, DependencyMapper, ImageKey, MissingDependencyResolver, WorkingSet,
    PATCH_ASSEMBLY_SUFFIX,
};
pub use source::{AssemblyResolver, ImageSink, ImageSource, MemorySink, MemorySource, SymbolFormat};
