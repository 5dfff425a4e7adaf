//! The relink map and module redirects.

use std::collections::HashMap;

use crate::{metadata::members::MemberReference, reflection::RuntimeMember};

/// Where a relink map entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelinkTarget {
    /// A type of the output image, by full name. A member reference mapped to a type keeps
    /// its name and signature and moves to that type.
    TypeName(String),
    /// A member resolved lazily against the output image. `member_id` is the findable id
    /// without type for methods and the plain name for fields and properties.
    Member {
        /// Full name of the declaring type in the output image
        type_name: String,
        /// Member id inside that type
        member_id: String,
    },
    /// An already resolved reference
    Resolved(MemberReference),
    /// A runtime descriptor imported through the reflection importer
    Runtime(RuntimeMember),
}

impl RelinkTarget {
    /// Creates a deferred member target
    #[must_use]
    pub fn member(type_name: impl Into<String>, member_id: impl Into<String>) -> Self {
        RelinkTarget::Member {
            type_name: type_name.into(),
            member_id: member_id.into(),
        }
    }
}

/// Maps relink keys to targets.
///
/// Keys are type full names, method findable ids (with return and declaring type) or
/// `Type::member` for fields and properties. A second table holds the explicit link-to
/// targets, which take precedence over everything else.
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::relink::{RelinkMap, RelinkTarget};
///
/// let mut map = RelinkMap::new();
/// map.insert("Game.OldPlayer", RelinkTarget::TypeName("Game.Player".into()));
/// map.redirect_module("FNA", "Microsoft.Xna.Framework");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RelinkMap {
    entries: HashMap<String, RelinkTarget>,
    link_to: HashMap<String, RelinkTarget>,
    modules: HashMap<String, String>,
}

impl RelinkMap {
    /// Creates an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `key`
    pub fn insert(&mut self, key: impl Into<String>, target: RelinkTarget) {
        self.entries.insert(key.into(), target);
    }

    /// Entry for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RelinkTarget> {
        self.entries.get(key)
    }

    /// Returns true when `key` has an entry
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registers an explicit link-to target for `key`
    pub fn link_to(&mut self, key: impl Into<String>, target: RelinkTarget) {
        self.link_to.insert(key.into(), target);
    }

    /// Explicit link-to target for `key`
    #[must_use]
    pub fn linked(&self, key: &str) -> Option<&RelinkTarget> {
        self.link_to.get(key)
    }

    /// Redirects every type reference scoped to `scope` into the image named `image`
    pub fn redirect_module(&mut self, scope: impl Into<String>, image: impl Into<String>) {
        self.modules.insert(scope.into(), image.into());
    }

    /// Image a scope is redirected to
    #[must_use]
    pub fn module_redirect(&self, scope: &str) -> Option<&str> {
        self.modules.get(scope).map(String::as_str)
    }

    /// Number of map entries, link-to targets excluded
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when there are no entries, link-to targets and redirects
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.link_to.is_empty() && self.modules.is_empty()
    }

    /// Drops every entry, link-to target and redirect
    pub fn clear(&mut self) {
        self.entries.clear();
        self.link_to.clear();
        self.modules.clear();
    }
}
