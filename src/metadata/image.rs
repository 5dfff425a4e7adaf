//! The in-memory program image.
//!
//! Declarations live in per-kind arenas and refer to each other through copyable handles
//! ([`TypeId`], [`MethodId`], [`FieldId`], [`PropertyId`], [`EventId`]). A type owns its
//! members through handle lists; members point back at their type through `declaring`.
//! Removing a declaration empties its arena slot and unlinks it from its owner; slots are
//! never reused, so a handle stays valid (or is reported stale) for the lifetime of a run.
//!
//! References across images are always symbolic ([`crate::metadata::typesig::TypeSig`],
//! [`crate::metadata::members::MemberReference`]), never handles.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotpatch::metadata::identity::{AssemblyIdentity, AssemblyVersion};
//! use dotpatch::metadata::image::{Image, TypeDef};
//! use dotpatch::metadata::flags::TypeAttributes;
//!
//! let mut image = Image::new(AssemblyIdentity::new("Game", AssemblyVersion::new(1, 0, 0, 0)));
//! let player = image.add_type(TypeDef::new("Game", "Player", TypeAttributes::PUBLIC), None)?;
//! assert_eq!(image.find_type("Game.Player"), Some(player));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    metadata::{
        attributes::CustomAttribute,
        body::MethodBody,
        flags::{
            FieldAttributes, MemberAttributes, MethodAttributes, MethodImplAttributes,
            TypeAttributes,
        },
        identity::AssemblyIdentity,
        members::{findable_id, FieldRef, MemberReference, MethodRef, MethodSig, PropertyRef, CCTOR, CTOR},
        reftable::ReferenceTable,
        token::{TableId, Token, TokenAllocator},
        typesig::{NamedType, TypeSig},
    },
    Result,
};

macro_rules! handle {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            /// Raw arena index
            #[must_use]
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

handle!(TypeId, "Handle of a type declaration");
handle!(MethodId, "Handle of a method declaration");
handle!(FieldId, "Handle of a field declaration");
handle!(PropertyId, "Handle of a property declaration");
handle!(EventId, "Handle of an event declaration");

/// Any declaration of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Declaration {
    /// A type
    Type(TypeId),
    /// A method
    Method(MethodId),
    /// A field
    Field(FieldId),
    /// A property
    Property(PropertyId),
    /// An event
    Event(EventId),
}

/// A generic parameter declared by a type or method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericParamDef {
    /// Parameter name
    pub name: String,
    /// Constraint types
    pub constraints: Vec<TypeSig>,
}

impl GenericParamDef {
    /// An unconstrained parameter
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
        }
    }
}

/// A type declaration
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Metadata token
    pub token: Token,
    /// Namespace; empty for nested types
    pub namespace: String,
    /// Name
    pub name: String,
    /// Attributes
    pub attributes: TypeAttributes,
    /// Base type
    pub base_type: Option<TypeSig>,
    /// Generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeSig>,
    /// Whether this is a value type
    pub value_type: bool,
    /// Enclosing type for nested types
    pub declaring: Option<TypeId>,
    /// Nested types
    pub nested: Vec<TypeId>,
    /// Fields
    pub fields: Vec<FieldId>,
    /// Properties
    pub properties: Vec<PropertyId>,
    /// Events
    pub events: Vec<EventId>,
    /// Methods
    pub methods: Vec<MethodId>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl TypeDef {
    /// Creates a member-less type; the token is assigned when it is added to an image
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        attributes: TypeAttributes,
    ) -> Self {
        Self {
            token: Token::default(),
            namespace: namespace.into(),
            name: name.into(),
            attributes,
            base_type: None,
            generic_params: Vec::new(),
            interfaces: Vec::new(),
            value_type: false,
            declaring: None,
            nested: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            methods: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// Copies the shape of `self` without members or nesting
    #[must_use]
    pub fn shell(&self) -> Self {
        Self {
            token: Token::default(),
            declaring: None,
            nested: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            methods: Vec::new(),
            custom_attributes: Vec::new(),
            ..self.clone()
        }
    }

    /// Types mentioned by the declaration itself (not its members)
    #[must_use]
    pub fn type_sigs(&self) -> Vec<&TypeSig> {
        let mut sigs: Vec<&TypeSig> = self.base_type.iter().collect();
        sigs.extend(self.interfaces.iter());
        for param in &self.generic_params {
            sigs.extend(param.constraints.iter());
        }
        sigs
    }
}

/// P/Invoke import data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PInvokeInfo {
    /// Native module name
    pub module: String,
    /// Entry point name
    pub entry_point: String,
    /// Raw P/Invoke attributes
    pub flags: u16,
}

/// A method declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Metadata token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub attributes: MethodAttributes,
    /// Implementation attributes
    pub impl_attributes: MethodImplAttributes,
    /// Signature
    pub sig: MethodSig,
    /// Parameter names
    pub param_names: Vec<String>,
    /// Generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Body, absent for abstract, runtime and P/Invoke methods
    pub body: Option<MethodBody>,
    /// Explicitly overridden methods
    pub overrides: Vec<MethodRef>,
    /// P/Invoke data
    pub pinvoke: Option<PInvokeInfo>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Owning type
    pub declaring: Option<TypeId>,
}

impl MethodDef {
    /// Creates a method without a body
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: MethodAttributes, sig: MethodSig) -> Self {
        Self {
            token: Token::default(),
            name: name.into(),
            attributes,
            impl_attributes: MethodImplAttributes::empty(),
            sig,
            param_names: Vec::new(),
            generic_params: Vec::new(),
            body: None,
            overrides: Vec::new(),
            pinvoke: None,
            custom_attributes: Vec::new(),
            declaring: None,
        }
    }

    /// Static method
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Virtual method
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes.contains(MethodAttributes::VIRTUAL)
    }

    /// Instance or static constructor
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        (self.name == CTOR || self.name == CCTOR)
            && self.attributes.contains(MethodAttributes::RT_SPECIAL_NAME)
    }

    /// Static constructor
    #[must_use]
    pub fn is_static_constructor(&self) -> bool {
        self.name == CCTOR && self.is_static()
    }

    /// Runtime-special name
    #[must_use]
    pub fn is_rt_special_name(&self) -> bool {
        self.attributes.contains(MethodAttributes::RT_SPECIAL_NAME)
    }

    /// Findable id without the declaring type
    #[must_use]
    pub fn local_id(&self) -> String {
        findable_id(None, &self.name, &self.sig)
    }

    /// Types mentioned by the signature, overrides and body
    #[must_use]
    pub fn type_sigs(&self) -> Vec<&TypeSig> {
        let mut sigs: Vec<&TypeSig> = self.sig.type_sigs().collect();
        for param in &self.generic_params {
            sigs.extend(param.constraints.iter());
        }
        for overridden in &self.overrides {
            sigs.extend(overridden.type_sigs());
        }
        if let Some(body) = &self.body {
            sigs.extend(body.type_sigs());
        }
        sigs
    }
}

/// A field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Metadata token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub attributes: FieldAttributes,
    /// Field type
    pub field_type: TypeSig,
    /// Constant value of literal fields
    pub constant: Option<i64>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Owning type
    pub declaring: Option<TypeId>,
}

impl FieldDef {
    /// Creates a field
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: FieldAttributes, field_type: TypeSig) -> Self {
        Self {
            token: Token::default(),
            name: name.into(),
            attributes,
            field_type,
            constant: None,
            custom_attributes: Vec::new(),
            declaring: None,
        }
    }

    /// Static field
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(FieldAttributes::STATIC)
    }
}

/// A property declaration
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    /// Metadata token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub attributes: MemberAttributes,
    /// Property type
    pub property_type: TypeSig,
    /// Getter
    pub getter: Option<MethodId>,
    /// Setter
    pub setter: Option<MethodId>,
    /// Other accessor methods
    pub others: Vec<MethodId>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Owning type
    pub declaring: Option<TypeId>,
}

impl PropertyDef {
    /// Creates a property without accessors
    #[must_use]
    pub fn new(name: impl Into<String>, property_type: TypeSig) -> Self {
        Self {
            token: Token::default(),
            name: name.into(),
            attributes: MemberAttributes::empty(),
            property_type,
            getter: None,
            setter: None,
            others: Vec::new(),
            custom_attributes: Vec::new(),
            declaring: None,
        }
    }

    /// Getter, setter and other accessors, in that order
    #[must_use]
    pub fn accessors(&self) -> Vec<MethodId> {
        self.getter
            .iter()
            .chain(self.setter.iter())
            .chain(self.others.iter())
            .copied()
            .collect()
    }
}

/// An event declaration
#[derive(Debug, Clone, PartialEq)]
pub struct EventDef {
    /// Metadata token
    pub token: Token,
    /// Name
    pub name: String,
    /// Attributes
    pub attributes: MemberAttributes,
    /// Delegate type
    pub event_type: TypeSig,
    /// Add accessor
    pub add: Option<MethodId>,
    /// Remove accessor
    pub remove: Option<MethodId>,
    /// Raise accessor
    pub invoke: Option<MethodId>,
    /// Other accessor methods
    pub others: Vec<MethodId>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Owning type
    pub declaring: Option<TypeId>,
}

impl EventDef {
    /// Creates an event without accessors
    #[must_use]
    pub fn new(name: impl Into<String>, event_type: TypeSig) -> Self {
        Self {
            token: Token::default(),
            name: name.into(),
            attributes: MemberAttributes::empty(),
            event_type,
            add: None,
            remove: None,
            invoke: None,
            others: Vec::new(),
            custom_attributes: Vec::new(),
            declaring: None,
        }
    }

    /// Add, remove, raise and other accessors, in that order
    #[must_use]
    pub fn accessors(&self) -> Vec<MethodId> {
        self.add
            .iter()
            .chain(self.remove.iter())
            .chain(self.invoke.iter())
            .chain(self.others.iter())
            .copied()
            .collect()
    }
}

/// An embedded resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Manifest resource name
    pub name: String,
    /// Publicly visible
    pub public: bool,
    /// Raw content
    pub data: Vec<u8>,
}

/// A loaded program image
#[derive(Debug, Clone)]
pub struct Image {
    /// Module file name, e.g. `Game.dll`
    pub name: String,
    /// Assembly identity
    pub identity: AssemblyIdentity,
    /// Targeted runtime version string
    pub runtime_version: String,
    /// Referenced assemblies, in declaration order
    pub assembly_refs: Vec<AssemblyIdentity>,
    /// Referenced native modules
    pub module_refs: Vec<String>,
    /// Embedded resources
    pub resources: Vec<Resource>,
    /// Assembly-level custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Imported references used by instruction operands
    pub references: ReferenceTable,
    types: Vec<Option<TypeDef>>,
    methods: Vec<Option<MethodDef>>,
    fields: Vec<Option<FieldDef>>,
    properties: Vec<Option<PropertyDef>>,
    events: Vec<Option<EventDef>>,
    top_level: Vec<TypeId>,
    token_index: HashMap<Token, Declaration>,
    tokens: TokenAllocator,
}

fn slot<'a, T>(arena: &'a [Option<T>], index: usize, kind: &str) -> Result<&'a T> {
    arena
        .get(index)
        .and_then(Option::as_ref)
        .ok_or_else(|| structural_error!("Stale {} handle {}", kind, index))
}

fn slot_mut<'a, T>(arena: &'a mut [Option<T>], index: usize, kind: &str) -> Result<&'a mut T> {
    arena
        .get_mut(index)
        .and_then(Option::as_mut)
        .ok_or_else(|| structural_error!("Stale {} handle {}", kind, index))
}

impl Image {
    /// Creates an empty image for the given assembly
    #[must_use]
    pub fn new(identity: AssemblyIdentity) -> Self {
        Self {
            name: format!("{}.dll", identity.name),
            identity,
            runtime_version: "v4.0.30319".to_string(),
            assembly_refs: Vec::new(),
            module_refs: Vec::new(),
            resources: Vec::new(),
            custom_attributes: Vec::new(),
            references: ReferenceTable::new(),
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            top_level: Vec::new(),
            token_index: HashMap::new(),
            tokens: TokenAllocator::new(),
        }
    }

    /// Simple assembly name, used as the scope of references into this image
    #[must_use]
    pub fn scope_name(&self) -> &str {
        &self.identity.name
    }

    /// Allocates a fresh token of `table` that collides with nothing in this image
    pub fn allocate_token(&mut self, table: u8) -> Token {
        let index = &self.token_index;
        let references = &self.references;
        self.tokens.allocate(table, |token| {
            index.contains_key(&token) || references.contains_token(token)
        })
    }

    /// Looks a declaration up by token
    #[must_use]
    pub fn lookup_token(&self, token: Token) -> Option<Declaration> {
        self.token_index.get(&token).copied()
    }

    fn claim_token(&mut self, token: &mut Token, table: u8, declaration: Declaration) {
        if token.is_null() || self.token_index.contains_key(&*token) {
            *token = self.allocate_token(table);
        } else {
            self.tokens.observe(*token);
        }
        self.token_index.insert(*token, declaration);
    }

    /// Adds a type, nested in `declaring` when given.
    ///
    /// # Errors
    /// Returns an error if `declaring` is stale.
    pub fn add_type(&mut self, mut def: TypeDef, declaring: Option<TypeId>) -> Result<TypeId> {
        let id = TypeId(self.types.len());
        if let Some(parent) = declaring {
            slot_mut(&mut self.types, parent.0, "type")?.nested.push(id);
        } else {
            self.top_level.push(id);
        }

        self.claim_token(&mut def.token, TableId::TYPE_DEF, Declaration::Type(id));
        def.declaring = declaring;
        self.types.push(Some(def));
        Ok(id)
    }

    /// Adds a method to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_method(&mut self, owner: TypeId, mut def: MethodDef) -> Result<MethodId> {
        let id = MethodId(self.methods.len());
        slot_mut(&mut self.types, owner.0, "type")?.methods.push(id);
        self.claim_token(&mut def.token, TableId::METHOD_DEF, Declaration::Method(id));
        def.declaring = Some(owner);
        self.methods.push(Some(def));
        Ok(id)
    }

    /// Adds a field to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_field(&mut self, owner: TypeId, mut def: FieldDef) -> Result<FieldId> {
        let id = FieldId(self.fields.len());
        slot_mut(&mut self.types, owner.0, "type")?.fields.push(id);
        self.claim_token(&mut def.token, TableId::FIELD, Declaration::Field(id));
        def.declaring = Some(owner);
        self.fields.push(Some(def));
        Ok(id)
    }

    /// Adds a property to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_property(&mut self, owner: TypeId, mut def: PropertyDef) -> Result<PropertyId> {
        let id = PropertyId(self.properties.len());
        slot_mut(&mut self.types, owner.0, "type")?.properties.push(id);
        self.claim_token(&mut def.token, TableId::PROPERTY, Declaration::Property(id));
        def.declaring = Some(owner);
        self.properties.push(Some(def));
        Ok(id)
    }

    /// Adds an event to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_event(&mut self, owner: TypeId, mut def: EventDef) -> Result<EventId> {
        let id = EventId(self.events.len());
        slot_mut(&mut self.types, owner.0, "type")?.events.push(id);
        self.claim_token(&mut def.token, TableId::EVENT, Declaration::Event(id));
        def.declaring = Some(owner);
        self.events.push(Some(def));
        Ok(id)
    }

    /// Type declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn type_def(&self, id: TypeId) -> Result<&TypeDef> {
        slot(&self.types, id.0, "type")
    }

    /// Mutable type declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn type_def_mut(&mut self, id: TypeId) -> Result<&mut TypeDef> {
        slot_mut(&mut self.types, id.0, "type")
    }

    /// Method declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn method_def(&self, id: MethodId) -> Result<&MethodDef> {
        slot(&self.methods, id.0, "method")
    }

    /// Mutable method declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn method_def_mut(&mut self, id: MethodId) -> Result<&mut MethodDef> {
        slot_mut(&mut self.methods, id.0, "method")
    }

    /// Field declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn field_def(&self, id: FieldId) -> Result<&FieldDef> {
        slot(&self.fields, id.0, "field")
    }

    /// Mutable field declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn field_def_mut(&mut self, id: FieldId) -> Result<&mut FieldDef> {
        slot_mut(&mut self.fields, id.0, "field")
    }

    /// Property declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn property_def(&self, id: PropertyId) -> Result<&PropertyDef> {
        slot(&self.properties, id.0, "property")
    }

    /// Mutable property declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn property_def_mut(&mut self, id: PropertyId) -> Result<&mut PropertyDef> {
        slot_mut(&mut self.properties, id.0, "property")
    }

    /// Event declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn event_def(&self, id: EventId) -> Result<&EventDef> {
        slot(&self.events, id.0, "event")
    }

    /// Mutable event declaration behind `id`.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn event_def_mut(&mut self, id: EventId) -> Result<&mut EventDef> {
        slot_mut(&mut self.events, id.0, "event")
    }

    /// Top-level types in declaration order
    #[must_use]
    pub fn top_level_types(&self) -> &[TypeId] {
        &self.top_level
    }

    /// Every live type, depth first in declaration order
    #[must_use]
    pub fn types(&self) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut stack: Vec<TypeId> = self.top_level.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Ok(def) = self.type_def(id) {
                result.push(id);
                stack.extend(def.nested.iter().rev().copied());
            }
        }
        result
    }

    /// Every live declaration: each type followed by its fields, properties, events and methods
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        let mut result = Vec::new();
        for id in self.types() {
            let Ok(def) = self.type_def(id) else {
                continue;
            };
            result.push(Declaration::Type(id));
            result.extend(def.fields.iter().map(|&f| Declaration::Field(f)));
            result.extend(def.properties.iter().map(|&p| Declaration::Property(p)));
            result.extend(def.events.iter().map(|&e| Declaration::Event(e)));
            result.extend(def.methods.iter().map(|&m| Declaration::Method(m)));
        }
        result
    }

    /// Full name of a type (`Namespace.Outer/Inner`)
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn type_full_name(&self, id: TypeId) -> Result<String> {
        Ok(self.named_type(id)?.full_name())
    }

    /// Symbolic reference to a type of this image
    ///
    /// # Errors
    /// Returns an error if the handle or one of its enclosing types is stale.
    pub fn named_type(&self, id: TypeId) -> Result<NamedType> {
        let def = self.type_def(id)?;
        let mut named = match def.declaring {
            Some(parent) => NamedType::nested(self.named_type(parent)?, def.name.clone()),
            None => NamedType::new(self.scope_name(), def.namespace.clone(), def.name.clone()),
        };
        named.value_type = def.value_type;
        Ok(named)
    }

    /// Symbolic reference to a type of this image
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn type_sig(&self, id: TypeId) -> Result<TypeSig> {
        Ok(TypeSig::Named(self.named_type(id)?))
    }

    /// Finds a type by full name
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.types()
            .into_iter()
            .find(|&id| self.type_full_name(id).is_ok_and(|name| name == full_name))
    }

    /// Finds a method of `owner` by findable id without type
    #[must_use]
    pub fn find_method(&self, owner: TypeId, local_id: &str) -> Option<MethodId> {
        let def = self.type_def(owner).ok()?;
        def.methods.iter().copied().find(|&id| {
            self.method_def(id)
                .is_ok_and(|method| method.local_id() == local_id)
        })
    }

    /// Finds a field of `owner` by name
    #[must_use]
    pub fn find_field(&self, owner: TypeId, name: &str) -> Option<FieldId> {
        let def = self.type_def(owner).ok()?;
        def.fields
            .iter()
            .copied()
            .find(|&id| self.field_def(id).is_ok_and(|field| field.name == name))
    }

    /// Finds a property of `owner` by name
    #[must_use]
    pub fn find_property(&self, owner: TypeId, name: &str) -> Option<PropertyId> {
        let def = self.type_def(owner).ok()?;
        def.properties
            .iter()
            .copied()
            .find(|&id| self.property_def(id).is_ok_and(|prop| prop.name == name))
    }

    /// Finds an event of `owner` by name
    #[must_use]
    pub fn find_event(&self, owner: TypeId, name: &str) -> Option<EventId> {
        let def = self.type_def(owner).ok()?;
        def.events
            .iter()
            .copied()
            .find(|&id| self.event_def(id).is_ok_and(|event| event.name == name))
    }

    fn owner(declaring: Option<TypeId>) -> Result<TypeId> {
        declaring.ok_or_else(|| structural_error!("Member is not attached to a type"))
    }

    /// Symbolic reference to a method of this image
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn method_ref(&self, id: MethodId) -> Result<MethodRef> {
        let def = self.method_def(id)?;
        let declaring = self.type_sig(Self::owner(def.declaring)?)?;
        Ok(MethodRef::new(declaring, def.name.clone(), def.sig.clone()))
    }

    /// Findable id of a method, with or without its declaring type
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn method_findable_id(&self, id: MethodId, with_type: bool) -> Result<String> {
        Ok(self.method_ref(id)?.findable_id(with_type))
    }

    /// Symbolic reference to a field of this image
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn field_ref(&self, id: FieldId) -> Result<FieldRef> {
        let def = self.field_def(id)?;
        let declaring = self.type_sig(Self::owner(def.declaring)?)?;
        Ok(FieldRef::new(declaring, def.name.clone(), def.field_type.clone()))
    }

    /// Symbolic reference to a property of this image, including its accessors
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn property_ref(&self, id: PropertyId) -> Result<PropertyRef> {
        let def = self.property_def(id)?;
        Ok(PropertyRef {
            declaring: self.type_sig(Self::owner(def.declaring)?)?,
            name: def.name.clone(),
            property_type: def.property_type.clone(),
            getter: def.getter.map(|m| self.method_ref(m)).transpose()?,
            setter: def.setter.map(|m| self.method_ref(m)).transpose()?,
        })
    }

    /// Custom attributes of a declaration
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn custom_attributes(&self, declaration: Declaration) -> Result<&[CustomAttribute]> {
        Ok(match declaration {
            Declaration::Type(id) => &self.type_def(id)?.custom_attributes,
            Declaration::Method(id) => &self.method_def(id)?.custom_attributes,
            Declaration::Field(id) => &self.field_def(id)?.custom_attributes,
            Declaration::Property(id) => &self.property_def(id)?.custom_attributes,
            Declaration::Event(id) => &self.event_def(id)?.custom_attributes,
        })
    }

    /// Mutable custom attributes of a declaration
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn custom_attributes_mut(
        &mut self,
        declaration: Declaration,
    ) -> Result<&mut Vec<CustomAttribute>> {
        Ok(match declaration {
            Declaration::Type(id) => &mut self.type_def_mut(id)?.custom_attributes,
            Declaration::Method(id) => &mut self.method_def_mut(id)?.custom_attributes,
            Declaration::Field(id) => &mut self.field_def_mut(id)?.custom_attributes,
            Declaration::Property(id) => &mut self.property_def_mut(id)?.custom_attributes,
            Declaration::Event(id) => &mut self.event_def_mut(id)?.custom_attributes,
        })
    }

    /// Removes a type with all its members and nested types.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn remove_type(&mut self, id: TypeId) -> Result<()> {
        let def = self.type_def(id)?.clone();
        for nested in def.nested {
            self.remove_type(nested)?;
        }
        for method in def.methods {
            self.remove_method(method)?;
        }
        for field in def.fields {
            self.remove_field(field)?;
        }
        for property in def.properties {
            self.remove_property(property)?;
        }
        for event in def.events {
            self.remove_event(event)?;
        }

        match def.declaring {
            Some(parent) => {
                if let Ok(parent) = self.type_def_mut(parent) {
                    parent.nested.retain(|&n| n != id);
                }
            }
            None => self.top_level.retain(|&t| t != id),
        }
        self.token_index.remove(&def.token);
        self.types[id.0] = None;
        Ok(())
    }

    /// Removes a method and unlinks it from its type and any property or event using it.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn remove_method(&mut self, id: MethodId) -> Result<()> {
        let def = self.method_def(id)?;
        let (token, declaring) = (def.token, def.declaring);
        if let Some(owner) = declaring {
            let owner_def = self.type_def(owner)?.clone();
            for property in owner_def.properties {
                if let Ok(prop) = self.property_def_mut(property) {
                    prop.getter = prop.getter.filter(|&m| m != id);
                    prop.setter = prop.setter.filter(|&m| m != id);
                    prop.others.retain(|&m| m != id);
                }
            }
            for event in owner_def.events {
                if let Ok(ev) = self.event_def_mut(event) {
                    ev.add = ev.add.filter(|&m| m != id);
                    ev.remove = ev.remove.filter(|&m| m != id);
                    ev.invoke = ev.invoke.filter(|&m| m != id);
                    ev.others.retain(|&m| m != id);
                }
            }
            self.type_def_mut(owner)?.methods.retain(|&m| m != id);
        }
        self.token_index.remove(&token);
        self.methods[id.0] = None;
        Ok(())
    }

    /// Removes a field.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn remove_field(&mut self, id: FieldId) -> Result<()> {
        let def = self.field_def(id)?;
        let (token, declaring) = (def.token, def.declaring);
        if let Some(owner) = declaring {
            self.type_def_mut(owner)?.fields.retain(|&f| f != id);
        }
        self.token_index.remove(&token);
        self.fields[id.0] = None;
        Ok(())
    }

    /// Removes a property; its accessor methods stay.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn remove_property(&mut self, id: PropertyId) -> Result<()> {
        let def = self.property_def(id)?;
        let (token, declaring) = (def.token, def.declaring);
        if let Some(owner) = declaring {
            self.type_def_mut(owner)?.properties.retain(|&p| p != id);
        }
        self.token_index.remove(&token);
        self.properties[id.0] = None;
        Ok(())
    }

    /// Removes an event; its accessor methods stay.
    ///
    /// # Errors
    /// Returns an error if the handle is stale.
    pub fn remove_event(&mut self, id: EventId) -> Result<()> {
        let def = self.event_def(id)?;
        let (token, declaring) = (def.token, def.declaring);
        if let Some(owner) = declaring {
            self.type_def_mut(owner)?.events.retain(|&e| e != id);
        }
        self.token_index.remove(&token);
        self.events[id.0] = None;
        Ok(())
    }

    /// Imports a reference into this image's reference table
    pub fn import_reference(&mut self, reference: &MemberReference) -> Token {
        let index = &self.token_index;
        let tokens = &mut self.tokens;
        self.references.import(reference, |table| {
            tokens.allocate(table, |token| index.contains_key(&token))
        })
    }

    /// Returns true when an assembly reference with this simple name exists
    #[must_use]
    pub fn has_assembly_ref(&self, name: &str) -> bool {
        self.assembly_refs.iter().any(|r| r.name == name)
    }

    /// Adds an assembly reference unless one with the same simple name exists
    pub fn ensure_assembly_ref(&mut self, identity: AssemblyIdentity) {
        if identity.name != self.identity.name && !self.has_assembly_ref(&identity.name) {
            self.assembly_refs.push(identity);
        }
    }
}
