//! Relink map and resolver.
//!
//! Relinking rewrites a symbolic reference so that it points at the right declaration in the
//! merged output. The [`RelinkMap`] is filled while parsing the directives of the patch
//! images and maps reference keys to [`RelinkTarget`]s; the [`Resolver`] looks references up
//! in it and reports a [`Resolution`]:
//!
//! - [`Resolution::Remapped`] when an explicit link-to target, a map entry or a module
//!   redirect applies
//! - [`Resolution::NoRemap`] when nothing applies and the reference should be imported as is
//! - [`Resolution::Unresolved`] when a mapped target is missing and strict mode is off
//!
//! Deferred member targets are resolved against the output image at lookup time, so map
//! entries may name members that are only created by a later pass.

mod map;
mod resolver;

pub use map::{RelinkMap, RelinkTarget};
pub use resolver::{Resolution, ResolveScope, Resolver};
