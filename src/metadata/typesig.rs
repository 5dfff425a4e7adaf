//! Symbolic type references.
//!
//! A [`TypeSig`] names a type without binding it to a declaration. Named types carry the
//! *scope* they were resolved from (the simple name of the declaring assembly) so the
//! relinker can tell references into patch images apart from references into the output
//! image or into external libraries.
//!
//! # Full names
//!
//! Full names follow the usual metadata conventions:
//! - `Namespace.Name` for top-level types
//! - `Namespace.Outer/Inner` for nested types
//! - `Name<Arg1,Arg2>` for generic instances
//! - `!0` / `!!0` for type / method generic parameters
//! - `T&`, `T*`, `T[]`, `T[,]` for composites
//!
//! The *patch* full name additionally strips the `patch_` prefix from every type name
//! segment, which is how patch declarations name the base declaration they target.

use std::fmt;

use strum::{EnumIter, IntoEnumIterator};

/// Prefix a patch declaration may carry to name the base declaration it targets
pub const PATCH_PREFIX: &str = "patch_";

/// Element types that map through a fixed table instead of general construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum PrimitiveKind {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.TypedReference`
    TypedReference,
}

impl PrimitiveKind {
    /// Fully qualified name of the primitive
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            PrimitiveKind::Void => "System.Void",
            PrimitiveKind::Boolean => "System.Boolean",
            PrimitiveKind::Char => "System.Char",
            PrimitiveKind::I1 => "System.SByte",
            PrimitiveKind::U1 => "System.Byte",
            PrimitiveKind::I2 => "System.Int16",
            PrimitiveKind::U2 => "System.UInt16",
            PrimitiveKind::I4 => "System.Int32",
            PrimitiveKind::U4 => "System.UInt32",
            PrimitiveKind::I8 => "System.Int64",
            PrimitiveKind::U8 => "System.UInt64",
            PrimitiveKind::R4 => "System.Single",
            PrimitiveKind::R8 => "System.Double",
            PrimitiveKind::I => "System.IntPtr",
            PrimitiveKind::U => "System.UIntPtr",
            PrimitiveKind::String => "System.String",
            PrimitiveKind::Object => "System.Object",
            PrimitiveKind::TypedReference => "System.TypedReference",
        }
    }

    /// Looks a primitive up by its fully qualified name
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        PrimitiveKind::iter().find(|kind| kind.full_name() == name)
    }

    /// Returns true for primitives that are value types
    #[must_use]
    pub fn is_value_type(self) -> bool {
        !matches!(
            self,
            PrimitiveKind::String | PrimitiveKind::Object | PrimitiveKind::Void
        )
    }
}

/// A reference to a named (non-composite, non-primitive) type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedType {
    /// Simple name of the assembly the type is declared in
    pub scope: String,
    /// Namespace; empty for nested types
    pub namespace: String,
    /// Type name, including the generic arity suffix if any
    pub name: String,
    /// Enclosing type for nested types
    pub declaring: Option<Box<NamedType>>,
    /// Whether the type is a value type
    pub value_type: bool,
}

impl NamedType {
    /// Creates a reference to a top-level reference type
    #[must_use]
    pub fn new(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            namespace: namespace.into(),
            name: name.into(),
            declaring: None,
            value_type: false,
        }
    }

    /// Creates a reference to a type nested in `declaring`
    #[must_use]
    pub fn nested(declaring: NamedType, name: impl Into<String>) -> Self {
        Self {
            scope: declaring.scope.clone(),
            namespace: String::new(),
            name: name.into(),
            declaring: Some(Box::new(declaring)),
            value_type: false,
        }
    }

    /// Full name, using `/` between enclosing and nested types
    #[must_use]
    pub fn full_name(&self) -> String {
        self.format_name(false)
    }

    /// Full name with the `patch_` prefix removed from every segment
    #[must_use]
    pub fn patch_full_name(&self) -> String {
        self.format_name(true)
    }

    fn format_name(&self, patch: bool) -> String {
        let name = if patch {
            strip_patch_prefix(&self.name)
        } else {
            self.name.as_str()
        };

        match &self.declaring {
            Some(declaring) => format!("{}/{}", declaring.format_name(patch), name),
            None if self.namespace.is_empty() => name.to_string(),
            None => format!("{}.{}", self.namespace, name),
        }
    }

    /// Returns the same reference rebound to another scope, including enclosing types
    #[must_use]
    pub fn with_scope(&self, scope: &str) -> Self {
        let mut copy = self.clone();
        let mut current = Some(&mut copy);
        while let Some(named) = current {
            named.scope = scope.to_string();
            current = named.declaring.as_deref_mut();
        }
        copy
    }
}

/// Which declaration owns a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenericOwner {
    /// Declared on a type (`!n`)
    Type,
    /// Declared on a method (`!!n`)
    Method,
}

/// A symbolic type reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// A primitive from the fixed element type table
    Primitive(PrimitiveKind),
    /// A named class, struct, interface, enum or delegate
    Named(NamedType),
    /// An instantiation of a generic type definition
    GenericInstance {
        /// The open generic definition
        definition: NamedType,
        /// Type arguments, in order
        args: Vec<TypeSig>,
    },
    /// A generic parameter, bound positionally to its owner
    GenericParam {
        /// Owner kind
        owner: GenericOwner,
        /// Zero based position in the owner's parameter list
        position: u32,
        /// Declared name, kept for display only
        name: String,
    },
    /// A managed pointer (`T&`)
    ByRef(Box<TypeSig>),
    /// An unmanaged pointer (`T*`)
    Pointer(Box<TypeSig>),
    /// An array of the given rank
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Number of dimensions
        rank: u32,
    },
}

impl TypeSig {
    /// `System.Void`
    #[must_use]
    pub fn void() -> Self {
        TypeSig::Primitive(PrimitiveKind::Void)
    }

    /// `System.Int32`
    #[must_use]
    pub fn int32() -> Self {
        TypeSig::Primitive(PrimitiveKind::I4)
    }

    /// `System.Boolean`
    #[must_use]
    pub fn boolean() -> Self {
        TypeSig::Primitive(PrimitiveKind::Boolean)
    }

    /// `System.String`
    #[must_use]
    pub fn string() -> Self {
        TypeSig::Primitive(PrimitiveKind::String)
    }

    /// `System.Object`
    #[must_use]
    pub fn object() -> Self {
        TypeSig::Primitive(PrimitiveKind::Object)
    }

    /// A top-level reference type in `scope`
    #[must_use]
    pub fn named(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        TypeSig::Named(NamedType::new(scope, namespace, name))
    }

    /// A top-level value type in `scope`
    #[must_use]
    pub fn value_type(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut named = NamedType::new(scope, namespace, name);
        named.value_type = true;
        TypeSig::Named(named)
    }

    /// Wraps this type into a managed pointer
    #[must_use]
    pub fn by_ref(self) -> Self {
        TypeSig::ByRef(Box::new(self))
    }

    /// Wraps this type into a single dimension array
    #[must_use]
    pub fn array(self) -> Self {
        TypeSig::Array {
            element: Box::new(self),
            rank: 1,
        }
    }

    /// Returns true for `System.Void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Primitive(PrimitiveKind::Void))
    }

    /// Returns true for managed pointers
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeSig::ByRef(_))
    }

    /// Returns true when values of this type are stored inline
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSig::Primitive(kind) => kind.is_value_type(),
            TypeSig::Named(named) => named.value_type,
            TypeSig::GenericInstance { definition, .. } => definition.value_type,
            TypeSig::Pointer(_) => true,
            TypeSig::GenericParam { .. } | TypeSig::ByRef(_) | TypeSig::Array { .. } => false,
        }
    }

    /// The named definition behind a named type or a generic instance
    #[must_use]
    pub fn definition(&self) -> Option<&NamedType> {
        match self {
            TypeSig::Named(named) => Some(named),
            TypeSig::GenericInstance { definition, .. } => Some(definition),
            _ => None,
        }
    }

    /// Full name of the referenced type
    #[must_use]
    pub fn full_name(&self) -> String {
        self.format_name(false)
    }

    /// Full name with the `patch_` prefix stripped from every named segment
    #[must_use]
    pub fn patch_full_name(&self) -> String {
        self.format_name(true)
    }

    fn format_name(&self, patch: bool) -> String {
        match self {
            TypeSig::Primitive(kind) => kind.full_name().to_string(),
            TypeSig::Named(named) => named.format_name(patch),
            TypeSig::GenericInstance { definition, args } => {
                let args: Vec<String> = args.iter().map(|arg| arg.format_name(patch)).collect();
                format!("{}<{}>", definition.format_name(patch), args.join(","))
            }
            TypeSig::GenericParam {
                owner: GenericOwner::Type,
                position,
                ..
            } => format!("!{position}"),
            TypeSig::GenericParam {
                owner: GenericOwner::Method,
                position,
                ..
            } => format!("!!{position}"),
            TypeSig::ByRef(inner) => format!("{}&", inner.format_name(patch)),
            TypeSig::Pointer(inner) => format!("{}*", inner.format_name(patch)),
            TypeSig::Array { element, rank } => {
                let commas = ",".repeat(rank.saturating_sub(1) as usize);
                format!("{}[{}]", element.format_name(patch), commas)
            }
        }
    }

    /// Visits every named type reachable from this signature, definitions first
    pub fn for_each_named<'a>(&'a self, f: &mut impl FnMut(&'a NamedType)) {
        match self {
            TypeSig::Named(named) => f(named),
            TypeSig::GenericInstance { definition, args } => {
                f(definition);
                for arg in args {
                    arg.for_each_named(f);
                }
            }
            TypeSig::ByRef(inner) | TypeSig::Pointer(inner) => inner.for_each_named(f),
            TypeSig::Array { element, .. } => element.for_each_named(f),
            TypeSig::Primitive(_) | TypeSig::GenericParam { .. } => {}
        }
    }
}

impl From<PrimitiveKind> for TypeSig {
    fn from(kind: PrimitiveKind) -> Self {
        TypeSig::Primitive(kind)
    }
}

impl From<NamedType> for TypeSig {
    fn from(named: NamedType) -> Self {
        TypeSig::Named(named)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Removes the patch prefix from a single name segment
#[must_use]
pub fn strip_patch_prefix(name: &str) -> &str {
    name.strip_prefix(PATCH_PREFIX).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_table() {
        assert_eq!(PrimitiveKind::I4.full_name(), "System.Int32");
        assert_eq!(
            PrimitiveKind::from_full_name("System.IntPtr"),
            Some(PrimitiveKind::I)
        );
        assert_eq!(PrimitiveKind::from_full_name("Game.A"), None);
        assert!(PrimitiveKind::R8.is_value_type());
        assert!(!PrimitiveKind::String.is_value_type());
    }

    #[test]
    fn test_named_full_name() {
        let sig = TypeSig::named("Base", "Game", "A");
        assert_eq!(sig.full_name(), "Game.A");

        let global = TypeSig::named("Base", "", "Program");
        assert_eq!(global.full_name(), "Program");
    }

    #[test]
    fn test_nested_full_name() {
        let outer = NamedType::new("Base", "Game", "Outer");
        let inner = NamedType::nested(outer, "Inner");
        assert_eq!(inner.full_name(), "Game.Outer/Inner");
        assert_eq!(inner.scope, "Base");
    }

    #[test]
    fn test_patch_full_name_strips_every_segment() {
        let outer = NamedType::new("Mod.mm", "Game", "patch_Outer");
        let inner = NamedType::nested(outer, "patch_Inner");
        assert_eq!(inner.full_name(), "Game.patch_Outer/patch_Inner");
        assert_eq!(inner.patch_full_name(), "Game.Outer/Inner");
    }

    #[test]
    fn test_composite_names() {
        let list = TypeSig::GenericInstance {
            definition: NamedType::new("mscorlib", "System.Collections.Generic", "List`1"),
            args: vec![TypeSig::int32()],
        };
        assert_eq!(
            list.full_name(),
            "System.Collections.Generic.List`1<System.Int32>"
        );
        assert_eq!(TypeSig::int32().by_ref().full_name(), "System.Int32&");
        assert_eq!(TypeSig::string().array().full_name(), "System.String[]");

        let matrix = TypeSig::Array {
            element: Box::new(TypeSig::Primitive(PrimitiveKind::R4)),
            rank: 2,
        };
        assert_eq!(matrix.full_name(), "System.Single[,]");

        let param = TypeSig::GenericParam {
            owner: GenericOwner::Method,
            position: 1,
            name: "U".to_string(),
        };
        assert_eq!(param.full_name(), "!!1");
    }

    #[test]
    fn test_with_scope_rebinds_declaring_chain() {
        let outer = NamedType::new("Mod.mm", "Game", "Outer");
        let inner = NamedType::nested(outer, "Inner").with_scope("Base");
        assert_eq!(inner.scope, "Base");
        assert_eq!(inner.declaring.as_ref().map(|d| d.scope.as_str()), Some("Base"));
    }

    #[test]
    fn test_for_each_named_visits_arguments() {
        let sig = TypeSig::GenericInstance {
            definition: NamedType::new("mscorlib", "System", "Nullable`1"),
            args: vec![TypeSig::value_type("Base", "Game", "Point")],
        }
        .by_ref();

        let mut names = Vec::new();
        sig.for_each_named(&mut |named| names.push(named.full_name()));
        assert_eq!(names, vec!["System.Nullable`1", "Game.Point"]);
    }

    #[test]
    fn test_value_type_detection() {
        assert!(TypeSig::value_type("Base", "Game", "Point").is_value_type());
        assert!(!TypeSig::named("Base", "Game", "A").is_value_type());
        assert!(TypeSig::int32().is_value_type());
        assert!(!TypeSig::int32().by_ref().is_value_type());
    }
}
