//! Metadata tokens and the allocator that hands out fresh ones.
//!
//! Every declaration and every imported reference in an [`crate::metadata::image::Image`]
//! carries a [`Token`]. Declarations created by the patch pipeline receive theirs from the
//! image's [`TokenAllocator`], which never reuses a row already present in the image.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Table identifiers for the metadata tables this crate issues tokens for.
pub struct TableId;

impl TableId {
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table
    pub const MEMBER_REF: u8 = 0x0A;
    /// `Event` table
    pub const EVENT: u8 = 0x14;
    /// `Property` table
    pub const PROPERTY: u8 = 0x17;
    /// `ModuleRef` table
    pub const MODULE_REF: u8 = 0x1A;
    /// `TypeSpec` table
    pub const TYPE_SPEC: u8 = 0x1B;
    /// `AssemblyRef` table
    pub const ASSEMBLY_REF: u8 = 0x23;
    /// `MethodSpec` table
    pub const METHOD_SPEC: u8 = 0x2B;
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Issues tokens for newly created declarations and references.
///
/// The allocator tracks the highest row seen per table. Allocation starts one past that
/// row and keeps probing while the caller reports the candidate as taken, so tokens that
/// were assigned out of band (for example by a cloned declaration) are never handed out twice.
#[derive(Debug, Clone, Default)]
pub struct TokenAllocator {
    next_rows: BTreeMap<u8, u32>,
}

impl TokenAllocator {
    /// Creates an empty allocator; the first token of every table has row 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an existing token so later allocations skip past it
    pub fn observe(&mut self, token: Token) {
        if token.is_null() {
            return;
        }
        let next = self.next_rows.entry(token.table()).or_insert(1);
        if token.row() >= *next {
            *next = token.row() + 1;
        }
    }

    /// Allocates the next free token of `table`.
    ///
    /// # Arguments
    /// * `table` - The table id, see [`TableId`]
    /// * `taken` - Returns true when a candidate token is already in use
    pub fn allocate(&mut self, table: u8, taken: impl Fn(Token) -> bool) -> Token {
        let next = self.next_rows.entry(table).or_insert(1);
        loop {
            let candidate = Token::from_parts(table, *next);
            *next += 1;
            if !taken(candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_new() {
        let token = Token::new(0x06000001);
        assert_eq!(token.value(), 0x06000001);
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TableId::METHOD_DEF, 5);
        assert_eq!(token.value(), 0x06000005);
        assert_eq!(token.table(), TableId::METHOD_DEF);
        assert_eq!(token.row(), 5);
    }

    #[test]
    fn test_token_table_row() {
        let token = Token(0x02000005);
        assert_eq!(token.table(), 0x02);
        assert_eq!(token.row(), 5);

        let token2 = Token(0x06FFFFFF);
        assert_eq!(token2.row(), 0x00FFFFFF);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(Token::default().is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x06000001)), "0x06000001");
        assert_eq!(format!("{}", Token(0)), "0x00000000");
    }

    #[test]
    fn test_token_debug() {
        let debug = format!("{:?}", Token(0x06000001));
        assert!(debug.contains("table: 0x06"));
        assert!(debug.contains("row: 1"));
    }

    #[test]
    fn test_token_hash() {
        let mut map = HashMap::new();
        map.insert(Token(0x06000001), "method");
        assert_eq!(map.get(&Token(0x06000001)), Some(&"method"));
    }

    #[test]
    fn test_allocator_starts_at_row_one() {
        let mut alloc = TokenAllocator::new();
        let token = alloc.allocate(TableId::TYPE_DEF, |_| false);
        assert_eq!(token, Token(0x02000001));
    }

    #[test]
    fn test_allocator_skips_observed_rows() {
        let mut alloc = TokenAllocator::new();
        alloc.observe(Token(0x06000007));
        alloc.observe(Token(0x06000003));
        let token = alloc.allocate(TableId::METHOD_DEF, |_| false);
        assert_eq!(token.row(), 8);
    }

    #[test]
    fn test_allocator_probes_taken_tokens() {
        let mut alloc = TokenAllocator::new();
        let taken = [Token(0x04000001), Token(0x04000002)];
        let token = alloc.allocate(TableId::FIELD, |t| taken.contains(&t));
        assert_eq!(token, Token(0x04000003));
        let next = alloc.allocate(TableId::FIELD, |_| false);
        assert_eq!(next, Token(0x04000004));
    }

    #[test]
    fn test_allocator_tables_are_independent() {
        let mut alloc = TokenAllocator::new();
        alloc.observe(Token(0x02000010));
        let field = alloc.allocate(TableId::FIELD, |_| false);
        assert_eq!(field.row(), 1);
    }
}
