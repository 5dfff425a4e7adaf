//! Runtime descriptors of types, fields and methods.
//!
//! These mirror what a reflection API reports about code that is already loaded. They are
//! shared through `Arc`, and the importer treats two descriptors as the same one only when
//! they are the same allocation.

use std::sync::Arc;

use bitflags::bitflags;

use crate::metadata::{identity::AssemblyIdentity, typesig::PrimitiveKind};

/// Shared runtime type descriptor
pub type RuntimeTypeRc = Arc<RuntimeType>;
/// Shared runtime field descriptor
pub type RuntimeFieldRc = Arc<RuntimeField>;
/// Shared runtime method descriptor
pub type RuntimeMethodRc = Arc<RuntimeMethod>;

/// A named type definition as seen at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTypeDef {
    /// Declaring assembly
    pub assembly: AssemblyIdentity,
    /// Namespace; `None` for the global namespace and nested types
    pub namespace: Option<String>,
    /// Name including the arity suffix
    pub name: String,
    /// Enclosing type of nested types
    pub declaring: Option<RuntimeTypeRc>,
    /// Value type flag
    pub value_type: bool,
    /// Names of the declared generic parameters
    pub generic_params: Vec<String>,
}

impl RuntimeTypeDef {
    /// Full name, using `/` between enclosing and nested types
    #[must_use]
    pub fn full_name(&self) -> String {
        match (&self.declaring, &self.namespace) {
            (Some(declaring), _) => format!("{}/{}", declaring.full_name(), self.name),
            (None, Some(ns)) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            (None, _) => self.name.clone(),
        }
    }
}

/// A runtime type descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeType {
    /// A built-in element type
    Primitive(PrimitiveKind),
    /// A named type definition
    Definition(RuntimeTypeDef),
    /// A closed or partially closed generic instantiation
    GenericInstance {
        /// The generic type definition
        definition: RuntimeTypeRc,
        /// Type arguments
        args: Vec<RuntimeTypeRc>,
    },
    /// A generic parameter
    GenericParam {
        /// Declaring type; always set for type parameters, set to the method's type otherwise
        declaring_type: Option<RuntimeTypeRc>,
        /// Declaring method name for method parameters
        declaring_method: Option<String>,
        /// Position in the owner's list
        position: u32,
        /// Declared name
        name: String,
    },
    /// A managed pointer
    ByRef(RuntimeTypeRc),
    /// An unmanaged pointer
    Pointer(RuntimeTypeRc),
    /// An array
    Array {
        /// Element type
        element: RuntimeTypeRc,
        /// Rank
        rank: u32,
    },
    /// A shape the importer has no rule for (function pointers, modifiers, ...)
    Unsupported(String),
}

impl RuntimeType {
    /// Full name in the same format as [`crate::metadata::typesig::TypeSig::full_name`]
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            RuntimeType::Primitive(kind) => kind.full_name().to_string(),
            RuntimeType::Definition(def) => def.full_name(),
            RuntimeType::GenericInstance { definition, args } => {
                let args: Vec<String> = args.iter().map(|a| a.full_name()).collect();
                format!("{}<{}>", definition.full_name(), args.join(","))
            }
            RuntimeType::GenericParam { name, .. } => name.clone(),
            RuntimeType::ByRef(inner) => format!("{}&", inner.full_name()),
            RuntimeType::Pointer(inner) => format!("{}*", inner.full_name()),
            RuntimeType::Array { element, rank } => format!(
                "{}[{}]",
                element.full_name(),
                ",".repeat(rank.saturating_sub(1) as usize)
            ),
            RuntimeType::Unsupported(description) => description.clone(),
        }
    }

    /// The type definition behind a definition or generic instance
    #[must_use]
    pub fn definition(&self) -> Option<&RuntimeTypeDef> {
        match self {
            RuntimeType::Definition(def) => Some(def),
            RuntimeType::GenericInstance { definition, .. } => definition.definition(),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Calling convention bits reported for a runtime method
    pub struct RuntimeCallingConventions: u8 {
        /// Managed default convention
        const STANDARD = 0x01;
        /// Variable arguments
        const VAR_ARGS = 0x02;
        /// Instance method
        const HAS_THIS = 0x20;
        /// `this` passed explicitly
        const EXPLICIT_THIS = 0x40;
    }
}

/// Generic shape of a runtime method
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuntimeMethodGenerics {
    /// Not generic
    #[default]
    None,
    /// A generic method definition with these parameter names
    Definition(Vec<String>),
    /// An instantiation of a generic method definition
    Instance {
        /// The generic method definition
        definition: RuntimeMethodRc,
        /// Type arguments
        args: Vec<RuntimeTypeRc>,
    },
}

/// A runtime field descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeField {
    /// Declaring type
    pub declaring: RuntimeTypeRc,
    /// Name
    pub name: String,
    /// Field type
    pub field_type: RuntimeTypeRc,
}

/// A runtime method or constructor descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeMethod {
    /// Declaring type
    pub declaring: RuntimeTypeRc,
    /// Name
    pub name: String,
    /// Calling convention bits
    pub conventions: RuntimeCallingConventions,
    /// Return type; `None` for constructors
    pub return_type: Option<RuntimeTypeRc>,
    /// Parameter types
    pub params: Vec<RuntimeTypeRc>,
    /// Generic shape
    pub generics: RuntimeMethodGenerics,
}

/// Any runtime member descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeMember {
    /// A type
    Type(RuntimeTypeRc),
    /// A field
    Field(RuntimeFieldRc),
    /// A method or constructor
    Method(RuntimeMethodRc),
}
