//! The reference table of an image.
//!
//! Instruction operands name their targets symbolically. Importing an operand registers it
//! here under a canonical key and gives it a `TypeRef`, `TypeSpec`, `MemberRef` or
//! `MethodSpec` token, so an output image lists every reference its code depends on.
//! Importing the same reference twice returns the same token.

use std::collections::{HashMap, HashSet};

use crate::metadata::{
    members::MemberReference,
    token::{TableId, Token},
    typesig::TypeSig,
};

/// A registered reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    /// Token issued for the reference
    pub token: Token,
    /// The reference itself
    pub reference: MemberReference,
}

/// Reference table of a single image, in import order
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: Vec<ReferenceEntry>,
    by_key: HashMap<String, usize>,
    tokens: HashSet<Token>,
}

impl ReferenceTable {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table a reference is issued from
    #[must_use]
    pub fn table_for(reference: &MemberReference) -> u8 {
        match reference {
            MemberReference::Type(TypeSig::Named(_)) => TableId::TYPE_REF,
            MemberReference::Type(_) => TableId::TYPE_SPEC,
            MemberReference::Method(method) if !method.generic_args.is_empty() => {
                TableId::METHOD_SPEC
            }
            MemberReference::Method(_)
            | MemberReference::Field(_)
            | MemberReference::Property(_) => TableId::MEMBER_REF,
        }
    }

    /// Registers `reference`, issuing a token through `allocate` on first sight
    pub fn import(
        &mut self,
        reference: &MemberReference,
        allocate: impl FnOnce(u8) -> Token,
    ) -> Token {
        let key = reference.canonical_key();
        if let Some(&index) = self.by_key.get(&key) {
            return self.entries[index].token;
        }

        let token = allocate(Self::table_for(reference));
        self.by_key.insert(key, self.entries.len());
        self.tokens.insert(token);
        self.entries.push(ReferenceEntry {
            token,
            reference: reference.clone(),
        });
        token
    }

    /// Token of an already registered reference
    #[must_use]
    pub fn token_of(&self, reference: &MemberReference) -> Option<Token> {
        self.by_key
            .get(&reference.canonical_key())
            .map(|&index| self.entries[index].token)
    }

    /// Returns true when `reference` is registered
    #[must_use]
    pub fn contains(&self, reference: &MemberReference) -> bool {
        self.by_key.contains_key(&reference.canonical_key())
    }

    /// Returns true when `token` was issued by this table
    #[must_use]
    pub fn contains_token(&self, token: Token) -> bool {
        self.tokens.contains(&token)
    }

    /// Entries in import order
    pub fn iter(&self) -> impl Iterator<Item = &ReferenceEntry> {
        self.entries.iter()
    }

    /// Number of registered references
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keeps only the entries for which `keep` returns true, preserving import order
    pub fn retain(&mut self, mut keep: impl FnMut(&ReferenceEntry) -> bool) {
        self.entries.retain(|entry| keep(entry));
        self.by_key = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.reference.canonical_key(), index))
            .collect();
        self.tokens = self.entries.iter().map(|entry| entry.token).collect();
    }

    /// Returns true when nothing has been imported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
