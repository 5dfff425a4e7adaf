//! Custom attributes attached to declarations.

use crate::metadata::{
    members::{MethodRef, MethodSig, CTOR},
    typesig::{NamedType, PrimitiveKind, TypeSig},
};

/// A fixed argument of a custom attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeArgument {
    /// A string value
    String(String),
    /// An integral value of any width
    Int(i64),
    /// A boolean value
    Bool(bool),
    /// A `System.Type` value
    Type(TypeSig),
}

/// A custom attribute instance: the constructor that builds it plus its fixed arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomAttribute {
    /// Attribute constructor
    pub ctor: MethodRef,
    /// Fixed arguments, in constructor parameter order
    pub args: Vec<AttributeArgument>,
}

impl CustomAttribute {
    /// Creates an attribute of type `attribute_type` whose constructor takes `args`
    #[must_use]
    pub fn new(attribute_type: NamedType, args: Vec<AttributeArgument>) -> Self {
        let params = args
            .iter()
            .map(|arg| match arg {
                AttributeArgument::String(_) => TypeSig::string(),
                AttributeArgument::Int(_) => TypeSig::Primitive(PrimitiveKind::I8),
                AttributeArgument::Bool(_) => TypeSig::boolean(),
                AttributeArgument::Type(_) => TypeSig::named("mscorlib", "System", "Type"),
            })
            .collect();

        Self {
            ctor: MethodRef::new(
                TypeSig::Named(attribute_type),
                CTOR,
                MethodSig::instance(TypeSig::void(), params),
            ),
            args,
        }
    }

    /// The attribute type, if it is a named type
    #[must_use]
    pub fn attribute_type(&self) -> Option<&NamedType> {
        self.ctor.declaring.definition()
    }

    /// Full name of the attribute type
    #[must_use]
    pub fn type_name(&self) -> String {
        self.ctor.declaring.full_name()
    }

    /// String argument at `index`
    #[must_use]
    pub fn string_arg(&self, index: usize) -> Option<&str> {
        match self.args.get(index) {
            Some(AttributeArgument::String(value)) => Some(value),
            _ => None,
        }
    }
}

/// Returns true when `attributes` contains an attribute of the given full name
#[must_use]
pub fn has_attribute(attributes: &[CustomAttribute], full_name: &str) -> bool {
    attributes.iter().any(|attr| attr.type_name() == full_name)
}
