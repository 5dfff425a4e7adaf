//! Symbolic member references and findable ids.
//!
//! A *findable id* is the canonical string used to locate a method inside a type:
//! `ReturnType DeclaringType::Name<arity>(Param1,Param2)`. Ids are built from patch full
//! names (see [`crate::metadata::typesig::TypeSig::patch_full_name`]) so that a method
//! declared on `patch_A` finds its counterpart on `A`. Relink keys use the raw names.

use std::fmt;

use crate::metadata::typesig::TypeSig;

/// Name of instance constructors
pub const CTOR: &str = ".ctor";
/// Name of static constructors
pub const CCTOR: &str = ".cctor";

/// Calling convention of a method signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// Standard managed calling convention
    #[default]
    Default,
    /// Variable argument list
    VarArg,
}

/// A method signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method (implicit `this`)
    pub has_this: bool,
    /// `this` is passed explicitly as the first parameter
    pub explicit_this: bool,
    /// Calling convention
    pub conv: CallingConvention,
    /// Return type
    pub ret: TypeSig,
    /// Parameter types
    pub params: Vec<TypeSig>,
    /// Number of generic parameters declared by the method
    pub generic_params: u32,
}

impl MethodSig {
    /// An instance signature
    #[must_use]
    pub fn instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self {
            has_this: true,
            explicit_this: false,
            conv: CallingConvention::Default,
            ret,
            params,
            generic_params: 0,
        }
    }

    /// A static signature
    #[must_use]
    pub fn static_(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        Self {
            has_this: false,
            ..Self::instance(ret, params)
        }
    }

    /// Every type mentioned by the signature
    pub fn type_sigs(&self) -> impl Iterator<Item = &TypeSig> {
        std::iter::once(&self.ret).chain(self.params.iter())
    }
}

fn format_id(
    declaring: Option<&TypeSig>,
    name: &str,
    sig: &MethodSig,
    patch: bool,
    with_return: bool,
) -> String {
    let render = |ty: &TypeSig| {
        if patch {
            ty.patch_full_name()
        } else {
            ty.full_name()
        }
    };

    let mut id = String::new();
    if with_return {
        id.push_str(&render(&sig.ret));
        id.push(' ');
    }
    if let Some(declaring) = declaring {
        id.push_str(&render(declaring));
        id.push_str("::");
    }
    id.push_str(name);
    if sig.generic_params > 0 {
        id.push_str(&format!("<{}>", sig.generic_params));
    }
    id.push('(');
    let params: Vec<String> = sig.params.iter().map(render).collect();
    id.push_str(&params.join(","));
    id.push(')');
    id
}

/// Findable id of a method given its parts.
///
/// # Arguments
/// * `declaring` - Declaring type, or `None` to build the id without the type
/// * `name` - Method name
/// * `sig` - Method signature
#[must_use]
pub fn findable_id(declaring: Option<&TypeSig>, name: &str, sig: &MethodSig) -> String {
    format_id(declaring, name, sig, true, true)
}

/// A reference to a method, optionally instantiated with generic arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Method name
    pub name: String,
    /// Signature
    pub sig: MethodSig,
    /// Generic arguments when this reference instantiates a generic method
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Creates a non-generic method reference
    #[must_use]
    pub fn new(declaring: TypeSig, name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            declaring,
            name: name.into(),
            sig,
            generic_args: Vec::new(),
        }
    }

    /// Findable id, with or without the declaring type
    #[must_use]
    pub fn findable_id(&self, with_type: bool) -> String {
        findable_id(with_type.then_some(&self.declaring), &self.name, &self.sig)
    }

    /// Alternate relink key: `DeclaringType::Name(Params)` without the return type
    #[must_use]
    pub fn simple_id(&self) -> String {
        format_id(Some(&self.declaring), &self.name, &self.sig, false, false)
    }

    /// Returns true for instance and static constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CTOR || self.name == CCTOR
    }

    /// Every type mentioned by the reference
    pub fn type_sigs(&self) -> impl Iterator<Item = &TypeSig> {
        std::iter::once(&self.declaring)
            .chain(self.sig.type_sigs())
            .chain(self.generic_args.iter())
    }
}

/// A reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: TypeSig,
}

impl FieldRef {
    /// Creates a field reference
    #[must_use]
    pub fn new(declaring: TypeSig, name: impl Into<String>, field_type: TypeSig) -> Self {
        Self {
            declaring,
            name: name.into(),
            field_type,
        }
    }
}

/// A reference to a property, carrying its accessors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Property name
    pub name: String,
    /// Property type
    pub property_type: TypeSig,
    /// Getter, if any
    pub getter: Option<MethodRef>,
    /// Setter, if any
    pub setter: Option<MethodRef>,
}

/// Any symbolic reference an instruction, signature or relink map can hold.
///
/// Relinking may change the kind of a reference (a field reference can become a property
/// reference), so the relinker operates on this closed union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberReference {
    /// A type
    Type(TypeSig),
    /// A method
    Method(MethodRef),
    /// A field
    Field(FieldRef),
    /// A property
    Property(PropertyRef),
}

impl MemberReference {
    /// Declaring type of a member, or the type itself
    #[must_use]
    pub fn declaring(&self) -> &TypeSig {
        match self {
            MemberReference::Type(ty) => ty,
            MemberReference::Method(method) => &method.declaring,
            MemberReference::Field(field) => &field.declaring,
            MemberReference::Property(property) => &property.declaring,
        }
    }

    /// Key used to look the reference up in a relink map.
    ///
    /// Types use their full name, methods their findable id (raw names) and fields and
    /// properties `DeclaringType::Name`.
    #[must_use]
    pub fn relink_key(&self) -> String {
        match self {
            MemberReference::Type(ty) => ty.full_name(),
            MemberReference::Method(method) => format_id(
                Some(&method.declaring),
                &method.name,
                &method.sig,
                false,
                true,
            ),
            MemberReference::Field(field) => {
                format!("{}::{}", field.declaring.full_name(), field.name)
            }
            MemberReference::Property(property) => {
                format!("{}::{}", property.declaring.full_name(), property.name)
            }
        }
    }

    /// Relink key built from patch names, so `Game.patch_A::Foo` keys as `Game.A::Foo`
    #[must_use]
    pub fn patch_relink_key(&self) -> String {
        match self {
            MemberReference::Type(ty) => ty.patch_full_name(),
            MemberReference::Method(method) => method.findable_id(true),
            MemberReference::Field(field) => {
                format!("{}::{}", field.declaring.patch_full_name(), field.name)
            }
            MemberReference::Property(property) => {
                format!("{}::{}", property.declaring.patch_full_name(), property.name)
            }
        }
    }

    /// Alternate relink key, only defined for methods
    #[must_use]
    pub fn alternate_key(&self) -> Option<String> {
        match self {
            MemberReference::Method(method) => Some(method.simple_id()),
            _ => None,
        }
    }

    /// Key that identifies the reference inside an image's reference table
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let scope = self
            .declaring()
            .definition()
            .map(|named| named.scope.as_str())
            .unwrap_or_default();
        match self {
            MemberReference::Type(ty) => format!("T:[{scope}]{ty}"),
            MemberReference::Method(method) if method.generic_args.is_empty() => {
                format!("M:[{scope}]{}", self.relink_key())
            }
            MemberReference::Method(method) => {
                let args: Vec<String> = method.generic_args.iter().map(TypeSig::full_name).collect();
                format!("MS:[{scope}]{}<{}>", self.relink_key(), args.join(","))
            }
            MemberReference::Field(field) => {
                format!("F:[{scope}]{} {}", field.field_type, self.relink_key())
            }
            MemberReference::Property(property) => {
                format!("P:[{scope}]{} {}", property.property_type, self.relink_key())
            }
        }
    }

    /// Every type mentioned by the reference
    #[must_use]
    pub fn type_sigs(&self) -> Vec<&TypeSig> {
        match self {
            MemberReference::Type(ty) => vec![ty],
            MemberReference::Method(method) => method.type_sigs().collect(),
            MemberReference::Field(field) => vec![&field.declaring, &field.field_type],
            MemberReference::Property(property) => {
                let mut sigs = vec![&property.declaring, &property.property_type];
                for accessor in property.getter.iter().chain(property.setter.iter()) {
                    sigs.extend(accessor.type_sigs());
                }
                sigs
            }
        }
    }
}

impl fmt::Display for MemberReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberReference::Type(ty) => write!(f, "{ty}"),
            MemberReference::Method(_) => write!(f, "{}", self.relink_key()),
            MemberReference::Field(field) => {
                write!(f, "{} {}", field.field_type, self.relink_key())
            }
            MemberReference::Property(property) => {
                write!(f, "{} {}", property.property_type, self.relink_key())
            }
        }
    }
}
