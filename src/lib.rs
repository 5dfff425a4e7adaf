// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # dotpatch
//!
//! [![Crates.io](https://img.shields.io/crates/v/dotpatch.svg)](https://crates.io/crates/dotpatch)
//! [![Documentation](https://docs.rs/dotpatch/badge.svg)](https://docs.rs/dotpatch)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/dotpatch/blob/main/LICENSE-APACHE)
//!
//! A patch and relink engine for .NET assemblies. `dotpatch` merges patch assemblies
//! (`Game.Mod.mm.dll`) into a base assembly (`Game.dll`): new types and members are added,
//! existing ones are replaced while their previous implementation stays callable, and every
//! reference in the result is rewritten to point at the merged declarations.
//!
//! ## Features
//!
//! - **🧩 Attribute directives** - Patch authors steer the merge with `DotPatch.Patch*`
//!   attributes: ignore, remove, replace, rename, hook, link-to, force public and more
//! - **🔗 Relinking** - Member references are rewritten across images, including kind
//!   changes such as a field access redirected to a property accessor
//! - **📦 Dependency mapping** - Referenced assemblies are located through directories,
//!   shared library roots and caller supplied resolvers
//! - **🔍 Verification** - A reference check and a deterministic listing of the output
//!   make patch runs testable
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! dotpatch = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,ignore
//! use dotpatch::prelude::*;
//!
//! let mut patcher = Patcher::new(
//!     PatcherConfig::default().dependency_dir("/game/Managed"),
//!     Box::new(source),
//! );
//! patcher.read("/game/Managed/Game.dll")?;
//! patcher.read_mod_dir("/game/mods")?;
//! patcher.run(&mut sink)?;
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! Decoding and encoding the binary assembly format is left to the caller: images enter
//! through an [`loader::ImageSource`] and leave through an [`loader::ImageSink`]. Tests and
//! tools that already hold images use [`loader::MemorySource`] and [`loader::MemorySink`].
//!
//! ## Architecture
//!
//! - [`metadata`] - The in-memory image model: declarations, signatures, method bodies,
//!   tokens and the reference table, plus a builder, a listing and a reference check
//! - [`reflection`] - Imports symbolic member descriptors into an image
//! - [`loader`] - Image sources, sinks and the dependency mapper
//! - [`relink`] - The relink map and the resolver that consults it
//! - [`patcher`] - The patch pipeline driven by [`Patcher`]
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Relink failures surface as
//! [`Error::RelinkFailed`] in strict mode and are logged as warnings otherwise.
//!
//! ```rust,ignore
//! use dotpatch::{Error, Patcher, PatcherConfig};
//!
//! match patcher.auto_patch() {
//!     Ok(()) => println!("patched"),
//!     Err(Error::UnresolvedDependency { name, requester, .. }) => {
//!         eprintln!("{requester} needs {name}");
//!     }
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! ```
//!
//! ## Logging
//!
//! Progress is reported through the [`log`](https://docs.rs/log) facade with a bracketed
//! stage tag such as `[PatchRefs]`. Per-declaration decisions are logged at debug level
//! when `verbose` is set in [`PatcherConfig`].
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,ignore
/// use dotpatch::prelude::*;
///
/// let config = PatcherConfig::default().strict(true);
/// let mut patcher = Patcher::new(config, Box::new(MemorySource::new()));
/// ```
pub mod prelude;

/// The in-memory image model.
///
/// # Key Components
///
/// - [`metadata::image::Image`] - Declaration arenas with stable handles and lookups
/// - [`metadata::typesig::TypeSig`] and [`metadata::members::MemberReference`] - Symbolic
///   references by scope and name
/// - [`metadata::body::MethodBody`] - Instructions, locals and exception handlers
/// - [`metadata::token::TokenAllocator`] - Per-table token assignment
/// - [`metadata::builder::ImageBuilder`] - Fluent construction of images
/// - [`metadata::listing`] and [`metadata::verify`] - Output inspection
pub mod metadata;

/// Symbolic member descriptors and their import into an image
pub mod reflection;

/// Image sources and sinks, and dependency mapping
pub mod loader;

/// Relink rules and their resolution
pub mod relink;

/// The patch pipeline
pub mod patcher;

/// `dotpatch` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the variants.
pub use error::Error;

/// Drives a patch run
pub use patcher::{PatchHooks, PatchStage, Patcher, PatcherConfig};
