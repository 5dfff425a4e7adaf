//! In-memory metadata model for program images.
//!
//! This module holds everything the patch pipeline operates on: the arena-backed
//! [`image::Image`], the symbolic reference vocabulary ([`typesig`], [`members`]), method
//! bodies, custom attributes, tokens, and the tooling built on top of them (builders,
//! canonical listings, reference verification).
//!
//! # Key Components
//!
//! - [`image`] - Declarations addressed by stable handles, lookups, add/remove
//! - [`typesig`] - Symbolic type references and full-name formatting
//! - [`members`] - Method/field/property references and findable ids
//! - [`body`] - Instructions with index-based branch targets
//! - [`reftable`] - The per-image table of imported references
//! - [`token`] - Metadata tokens and the allocator for new declarations
//! - [`listing`] - Deterministic text listing and SHA-1 fingerprint
//! - [`verify`] - Dangling-reference detection
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotpatch::prelude::*;
//!
//! let mut builder = ImageBuilder::new("Game", AssemblyVersion::new(1, 0, 0, 0));
//! builder.add_type(TypeBuilder::class("Game", "Player"))?;
//! let image = builder.build();
//! println!("{}", listing(&image)?);
//! # Ok::<(), dotpatch::Error>(())
//! ```

/// Custom attributes attached to declarations
pub mod attributes;
/// Method bodies, instructions and exception handlers
pub mod body;
/// Fluent builders for images and declarations
pub mod builder;
/// Attribute bitflags for types and members
pub mod flags;
/// Assembly identities and display names
pub mod identity;
/// The arena-backed image model
pub mod image;
/// Canonical listing and fingerprint
pub mod listing;
/// Member references and findable ids
pub mod members;
/// The per-image reference table
pub mod reftable;
/// Metadata tokens and token allocation
pub mod token;
/// Symbolic type references
pub mod typesig;
/// Dangling-reference verification
pub mod verify;
