//! Fluent construction of images, declarations and method bodies.
//!
//! Loaders, markers and test fixtures all assemble declarations through these builders
//! instead of filling [`crate::metadata::image`] structs by hand.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotpatch::prelude::*;
//!
//! let mut builder = ImageBuilder::new("Game", AssemblyVersion::new(1, 0, 0, 0));
//! let player = builder.add_type(TypeBuilder::class("Game", "Player"))?;
//! builder.add_method(
//!     player,
//!     MethodBuilder::new("GetHealth")
//!         .returns(TypeSig::int32())
//!         .body(BodyBuilder::new().ldc_i4(100).ret()),
//! )?;
//! let image = builder.build();
//! ```

use crate::{
    metadata::{
        attributes::CustomAttribute,
        body::{ExceptionHandler, Instruction, MethodBody, OpCode, Operand},
        flags::{FieldAttributes, MethodAttributes, MethodImplAttributes, TypeAttributes},
        identity::{AssemblyIdentity, AssemblyVersion},
        image::{
            EventDef, EventId, FieldDef, FieldId, GenericParamDef, Image, MethodDef, MethodId,
            PInvokeInfo, PropertyDef, PropertyId, Resource, TypeDef, TypeId,
        },
        members::{FieldRef, MemberReference, MethodRef, MethodSig, CCTOR, CTOR},
        typesig::{GenericOwner, TypeSig},
    },
    Result,
};

/// Simple name of the core library
pub const CORE_LIBRARY: &str = "mscorlib";

/// Version used for the core library reference of built images
pub const CORE_LIBRARY_VERSION: AssemblyVersion = AssemblyVersion::new(4, 0, 0, 0);

/// `System.Object` in the core library
#[must_use]
pub fn object_type() -> TypeSig {
    TypeSig::named(CORE_LIBRARY, "System", "Object")
}

/// Builder for method bodies.
///
/// Branch targets are instruction indices; [`BodyBuilder::len`] returns the index the next
/// instruction will get.
#[derive(Debug, Clone)]
pub struct BodyBuilder {
    body: MethodBody,
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyBuilder {
    /// Create an empty body builder with zero-initialized locals
    #[must_use]
    pub fn new() -> Self {
        Self {
            body: MethodBody::new(),
        }
    }

    /// Index of the next instruction
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.instructions.len()
    }

    /// Returns true when no instruction was emitted yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.instructions.is_empty()
    }

    /// Declare a local variable
    #[must_use]
    pub fn local(mut self, local_type: TypeSig) -> Self {
        self.body.locals.push(local_type);
        self
    }

    /// Set the maximum stack depth
    #[must_use]
    pub fn max_stack(mut self, stack_size: u16) -> Self {
        self.body.max_stack = stack_size;
        self
    }

    /// Set whether locals are zero-initialized
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.body.init_locals = init;
        self
    }

    /// Add an exception handler
    #[must_use]
    pub fn handler(mut self, handler: ExceptionHandler) -> Self {
        self.body.exception_handlers.push(handler);
        self
    }

    /// Emit an arbitrary instruction
    #[must_use]
    pub fn emit(mut self, opcode: OpCode, operand: Operand) -> Self {
        self.body.push(Instruction::new(opcode, operand));
        self
    }

    /// Emit an instruction without operand
    #[must_use]
    pub fn op(self, opcode: OpCode) -> Self {
        self.emit(opcode, Operand::None)
    }

    /// `nop`
    #[must_use]
    pub fn nop(self) -> Self {
        self.op(OpCode::Nop)
    }

    /// `ret`
    #[must_use]
    pub fn ret(self) -> Self {
        self.op(OpCode::Ret)
    }

    /// `pop`
    #[must_use]
    pub fn pop(self) -> Self {
        self.op(OpCode::Pop)
    }

    /// `dup`
    #[must_use]
    pub fn dup(self) -> Self {
        self.op(OpCode::Dup)
    }

    /// `add`
    #[must_use]
    pub fn add(self) -> Self {
        self.op(OpCode::Add)
    }

    /// `ldnull`
    #[must_use]
    pub fn ldnull(self) -> Self {
        self.op(OpCode::Ldnull)
    }

    /// `throw`
    #[must_use]
    pub fn throw(self) -> Self {
        self.op(OpCode::Throw)
    }

    /// `ldarg <index>`
    #[must_use]
    pub fn ldarg(self, index: u16) -> Self {
        self.emit(OpCode::Ldarg, Operand::Argument(index))
    }

    /// `starg <index>`
    #[must_use]
    pub fn starg(self, index: u16) -> Self {
        self.emit(OpCode::Starg, Operand::Argument(index))
    }

    /// `ldloc <index>`
    #[must_use]
    pub fn ldloc(self, index: u16) -> Self {
        self.emit(OpCode::Ldloc, Operand::Local(index))
    }

    /// `stloc <index>`
    #[must_use]
    pub fn stloc(self, index: u16) -> Self {
        self.emit(OpCode::Stloc, Operand::Local(index))
    }

    /// `ldc.i4 <value>`
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        self.emit(OpCode::LdcI4, Operand::Int32(value))
    }

    /// `ldc.i8 <value>`
    #[must_use]
    pub fn ldc_i8(self, value: i64) -> Self {
        self.emit(OpCode::LdcI8, Operand::Int64(value))
    }

    /// `ldstr <value>`
    #[must_use]
    pub fn ldstr(self, value: &str) -> Self {
        self.emit(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    /// `br <target>`
    #[must_use]
    pub fn br(self, target: usize) -> Self {
        self.emit(OpCode::Br, Operand::Target(target))
    }

    /// `brtrue <target>`
    #[must_use]
    pub fn brtrue(self, target: usize) -> Self {
        self.emit(OpCode::Brtrue, Operand::Target(target))
    }

    /// `brfalse <target>`
    #[must_use]
    pub fn brfalse(self, target: usize) -> Self {
        self.emit(OpCode::Brfalse, Operand::Target(target))
    }

    /// Emit an instruction whose operand is a type or member reference
    #[must_use]
    pub fn reference(self, opcode: OpCode, reference: MemberReference) -> Self {
        self.emit(opcode, Operand::Reference(reference))
    }

    /// `call <method>`
    #[must_use]
    pub fn call(self, method: MethodRef) -> Self {
        self.reference(OpCode::Call, MemberReference::Method(method))
    }

    /// `callvirt <method>`
    #[must_use]
    pub fn callvirt(self, method: MethodRef) -> Self {
        self.reference(OpCode::Callvirt, MemberReference::Method(method))
    }

    /// `newobj <ctor>`
    #[must_use]
    pub fn newobj(self, ctor: MethodRef) -> Self {
        self.reference(OpCode::Newobj, MemberReference::Method(ctor))
    }

    /// `ldfld <field>`
    #[must_use]
    pub fn ldfld(self, field: FieldRef) -> Self {
        self.reference(OpCode::Ldfld, MemberReference::Field(field))
    }

    /// `ldflda <field>`
    #[must_use]
    pub fn ldflda(self, field: FieldRef) -> Self {
        self.reference(OpCode::Ldflda, MemberReference::Field(field))
    }

    /// `stfld <field>`
    #[must_use]
    pub fn stfld(self, field: FieldRef) -> Self {
        self.reference(OpCode::Stfld, MemberReference::Field(field))
    }

    /// `ldsfld <field>`
    #[must_use]
    pub fn ldsfld(self, field: FieldRef) -> Self {
        self.reference(OpCode::Ldsfld, MemberReference::Field(field))
    }

    /// `stsfld <field>`
    #[must_use]
    pub fn stsfld(self, field: FieldRef) -> Self {
        self.reference(OpCode::Stsfld, MemberReference::Field(field))
    }

    /// `ldtoken <type>`
    #[must_use]
    pub fn ldtoken(self, ty: TypeSig) -> Self {
        self.reference(OpCode::Ldtoken, MemberReference::Type(ty))
    }

    /// `castclass <type>`
    #[must_use]
    pub fn castclass(self, ty: TypeSig) -> Self {
        self.reference(OpCode::Castclass, MemberReference::Type(ty))
    }

    /// Finish the body
    #[must_use]
    pub fn build(self) -> MethodBody {
        self.body
    }
}

/// Builder for type declarations
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    def: TypeDef,
}

impl TypeBuilder {
    /// A public class deriving from `System.Object`
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> Self {
        let mut def = TypeDef::new(
            namespace,
            name,
            TypeAttributes::PUBLIC | TypeAttributes::BEFORE_FIELD_INIT,
        );
        def.base_type = Some(object_type());
        Self { def }
    }

    /// A public value type deriving from `System.ValueType`
    #[must_use]
    pub fn value_type(namespace: &str, name: &str) -> Self {
        let mut builder = Self::class(namespace, name).sealed();
        builder.def.base_type = Some(TypeSig::named(CORE_LIBRARY, "System", "ValueType"));
        builder.def.value_type = true;
        builder
    }

    /// A public enum with an `Int32` underlying type
    #[must_use]
    pub fn enumeration(namespace: &str, name: &str) -> Self {
        let mut builder = Self::value_type(namespace, name);
        builder.def.base_type = Some(TypeSig::named(CORE_LIBRARY, "System", "Enum"));
        builder
    }

    /// A public interface
    #[must_use]
    pub fn interface(namespace: &str, name: &str) -> Self {
        let def = TypeDef::new(
            namespace,
            name,
            TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        );
        Self { def }
    }

    /// A nested class; visibility is nested-public
    #[must_use]
    pub fn nested(name: &str) -> Self {
        let mut builder = Self::class("", name);
        builder.def.attributes = TypeAttributes::NESTED_PUBLIC;
        builder
    }

    /// Set the base type
    #[must_use]
    pub fn base(mut self, base: TypeSig) -> Self {
        self.def.base_type = Some(base);
        self
    }

    /// Add an implemented interface
    #[must_use]
    pub fn implements(mut self, interface: TypeSig) -> Self {
        self.def.interfaces.push(interface);
        self
    }

    /// Replace the attribute flags
    #[must_use]
    pub fn attributes(mut self, attributes: TypeAttributes) -> Self {
        self.def.attributes = attributes;
        self
    }

    /// Mark the type sealed
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.def.attributes |= TypeAttributes::SEALED;
        self
    }

    /// Mark the type abstract
    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.def.attributes |= TypeAttributes::ABSTRACT;
        self
    }

    /// Declare a generic parameter
    #[must_use]
    pub fn generic_param(mut self, name: &str) -> Self {
        self.def.generic_params.push(GenericParamDef::new(name));
        self
    }

    /// Attach a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.def.custom_attributes.push(attribute);
        self
    }

    /// Finish the declaration
    #[must_use]
    pub fn build(self) -> TypeDef {
        self.def
    }
}

/// Builder for method declarations; defaults to a public instance method returning `void`
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    def: MethodDef,
}

impl MethodBuilder {
    /// Start a method named `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            def: MethodDef::new(
                name,
                MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
                MethodSig::instance(TypeSig::void(), Vec::new()),
            ),
        }
    }

    /// An instance constructor with an empty body that returns immediately
    #[must_use]
    pub fn ctor() -> Self {
        let mut builder = Self::new(CTOR).body(BodyBuilder::new().ret());
        builder.def.attributes |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME;
        builder
    }

    /// A static constructor; give it a body with [`MethodBuilder::body`]
    #[must_use]
    pub fn cctor() -> Self {
        let mut builder = Self::new(CCTOR).static_();
        builder.def.attributes = MethodAttributes::PRIVATE
            | MethodAttributes::STATIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME
            | MethodAttributes::RT_SPECIAL_NAME;
        builder
    }

    /// Make the method static
    #[must_use]
    pub fn static_(mut self) -> Self {
        self.def.attributes |= MethodAttributes::STATIC;
        self.def.sig.has_this = false;
        self
    }

    /// Make the method virtual
    #[must_use]
    pub fn virtual_(mut self) -> Self {
        self.def.attributes |= MethodAttributes::VIRTUAL;
        self
    }

    /// Make the method private
    #[must_use]
    pub fn private(mut self) -> Self {
        self.def.attributes = MethodAttributes::from_bits_retain(
            (self.def.attributes.bits() & !crate::metadata::flags::MEMBER_ACCESS_MASK)
                | MethodAttributes::PRIVATE.bits(),
        );
        self
    }

    /// Replace the attribute flags
    #[must_use]
    pub fn attributes(mut self, attributes: MethodAttributes) -> Self {
        self.def.sig.has_this = !attributes.contains(MethodAttributes::STATIC);
        self.def.attributes = attributes;
        self
    }

    /// Set implementation flags
    #[must_use]
    pub fn impl_attributes(mut self, attributes: MethodImplAttributes) -> Self {
        self.def.impl_attributes = attributes;
        self
    }

    /// Set the return type
    #[must_use]
    pub fn returns(mut self, ret: TypeSig) -> Self {
        self.def.sig.ret = ret;
        self
    }

    /// Append a parameter
    #[must_use]
    pub fn param(mut self, name: &str, param_type: TypeSig) -> Self {
        self.def.sig.params.push(param_type);
        self.def.param_names.push(name.to_string());
        self
    }

    /// Declare a method generic parameter
    #[must_use]
    pub fn generic_param(mut self, name: &str) -> Self {
        self.def.generic_params.push(GenericParamDef::new(name));
        self.def.sig.generic_params += 1;
        self
    }

    /// Signature reference to the method generic parameter at `position`
    #[must_use]
    pub fn generic_arg(&self, position: u32) -> TypeSig {
        TypeSig::GenericParam {
            owner: GenericOwner::Method,
            position,
            name: self
                .def
                .generic_params
                .get(position as usize)
                .map(|p| p.name.clone())
                .unwrap_or_default(),
        }
    }

    /// Add an explicit override
    #[must_use]
    pub fn overrides(mut self, method: MethodRef) -> Self {
        self.def.overrides.push(method);
        self
    }

    /// Turn the method into a P/Invoke import
    #[must_use]
    pub fn pinvoke(mut self, module: &str, entry_point: &str) -> Self {
        self.def.attributes |= MethodAttributes::PINVOKE_IMPL | MethodAttributes::STATIC;
        self.def.sig.has_this = false;
        self.def.impl_attributes |= MethodImplAttributes::PRESERVE_SIG;
        self.def.pinvoke = Some(PInvokeInfo {
            module: module.to_string(),
            entry_point: entry_point.to_string(),
            flags: 0,
        });
        self.def.body = None;
        self
    }

    /// Attach a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.def.custom_attributes.push(attribute);
        self
    }

    /// Set the body
    #[must_use]
    pub fn body(mut self, body: BodyBuilder) -> Self {
        self.def.body = Some(body.build());
        self
    }

    /// Current signature
    #[must_use]
    pub fn sig(&self) -> &MethodSig {
        &self.def.sig
    }

    /// Finish the declaration
    #[must_use]
    pub fn build(self) -> MethodDef {
        self.def
    }
}

/// Builder for field declarations; defaults to a private instance field
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    def: FieldDef,
}

impl FieldBuilder {
    /// Start a field named `name`
    #[must_use]
    pub fn new(name: &str, field_type: TypeSig) -> Self {
        Self {
            def: FieldDef::new(name, FieldAttributes::PRIVATE, field_type),
        }
    }

    /// Make the field public
    #[must_use]
    pub fn public(mut self) -> Self {
        self.def.attributes.set_public();
        self
    }

    /// Make the field static
    #[must_use]
    pub fn static_(mut self) -> Self {
        self.def.attributes |= FieldAttributes::STATIC;
        self
    }

    /// Turn the field into a literal constant
    #[must_use]
    pub fn constant(mut self, value: i64) -> Self {
        self.def.attributes |= FieldAttributes::STATIC | FieldAttributes::LITERAL;
        self.def.constant = Some(value);
        self
    }

    /// Replace the attribute flags
    #[must_use]
    pub fn attributes(mut self, attributes: FieldAttributes) -> Self {
        self.def.attributes = attributes;
        self
    }

    /// Attach a custom attribute
    #[must_use]
    pub fn custom_attribute(mut self, attribute: CustomAttribute) -> Self {
        self.def.custom_attributes.push(attribute);
        self
    }

    /// Finish the declaration
    #[must_use]
    pub fn build(self) -> FieldDef {
        self.def
    }
}

/// Assembles an [`Image`] declaration by declaration
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    image: Image,
}

impl ImageBuilder {
    /// Start an image for assembly `name`; a core library reference is added up front
    #[must_use]
    pub fn new(name: &str, version: AssemblyVersion) -> Self {
        let mut image = Image::new(AssemblyIdentity::new(name, version));
        image.ensure_assembly_ref(AssemblyIdentity::new(CORE_LIBRARY, CORE_LIBRARY_VERSION));
        Self { image }
    }

    /// Override the module file name
    #[must_use]
    pub fn module_name(mut self, name: &str) -> Self {
        self.image.name = name.to_string();
        self
    }

    /// Add an assembly reference
    pub fn reference(&mut self, identity: AssemblyIdentity) -> &mut Self {
        self.image.ensure_assembly_ref(identity);
        self
    }

    /// Add a native module reference
    pub fn module_ref(&mut self, name: &str) -> &mut Self {
        if !self.image.module_refs.iter().any(|m| m == name) {
            self.image.module_refs.push(name.to_string());
        }
        self
    }

    /// Embed a resource
    pub fn resource(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.image.resources.push(Resource {
            name: name.to_string(),
            public: true,
            data: data.to_vec(),
        });
        self
    }

    /// Attach an assembly-level custom attribute
    pub fn custom_attribute(&mut self, attribute: CustomAttribute) -> &mut Self {
        self.image.custom_attributes.push(attribute);
        self
    }

    /// Add a top-level type.
    ///
    /// # Errors
    /// Never fails for top-level types; the signature matches [`ImageBuilder::add_nested`].
    pub fn add_type(&mut self, ty: TypeBuilder) -> Result<TypeId> {
        self.image.add_type(ty.build(), None)
    }

    /// Add a type nested in `parent`.
    ///
    /// # Errors
    /// Returns an error if `parent` is stale.
    pub fn add_nested(&mut self, parent: TypeId, ty: TypeBuilder) -> Result<TypeId> {
        let mut def = ty.build();
        def.namespace.clear();
        self.image.add_type(def, Some(parent))
    }

    /// Add a method to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_method(&mut self, owner: TypeId, method: MethodBuilder) -> Result<MethodId> {
        self.image.add_method(owner, method.build())
    }

    /// Add a field to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_field(&mut self, owner: TypeId, field: FieldBuilder) -> Result<FieldId> {
        self.image.add_field(owner, field.build())
    }

    /// Add an instance constructor that chains to the base type's parameterless constructor.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_default_ctor(&mut self, owner: TypeId) -> Result<MethodId> {
        let base = self
            .image
            .type_def(owner)?
            .base_type
            .clone()
            .unwrap_or_else(object_type);
        let base_ctor = MethodRef::new(base, CTOR, MethodSig::instance(TypeSig::void(), vec![]));
        let ctor = MethodBuilder::ctor().body(BodyBuilder::new().ldarg(0).call(base_ctor).ret());
        self.add_method(owner, ctor)
    }

    /// Add a property backed by a field, with a `get_` and optionally a `set_` accessor.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_auto_property(
        &mut self,
        owner: TypeId,
        name: &str,
        property_type: TypeSig,
        with_setter: bool,
    ) -> Result<PropertyId> {
        let field = self.add_field(
            owner,
            FieldBuilder::new(&format!("<{name}>k__BackingField"), property_type.clone()),
        )?;
        let field_ref = self.image.field_ref(field)?;

        let accessor_flags = MethodAttributes::PUBLIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME;
        let getter = self.add_method(
            owner,
            MethodBuilder::new(&format!("get_{name}"))
                .attributes(accessor_flags)
                .returns(property_type.clone())
                .body(BodyBuilder::new().ldarg(0).ldfld(field_ref.clone()).ret()),
        )?;
        let setter = if with_setter {
            Some(
                self.add_method(
                    owner,
                    MethodBuilder::new(&format!("set_{name}"))
                        .attributes(accessor_flags)
                        .param("value", property_type.clone())
                        .body(BodyBuilder::new().ldarg(0).ldarg(1).stfld(field_ref).ret()),
                )?,
            )
        } else {
            None
        };

        let mut property = PropertyDef::new(name, property_type);
        property.getter = Some(getter);
        property.setter = setter;
        self.image.add_property(owner, property)
    }

    /// Add an event with `add_` and `remove_` accessors that do nothing.
    ///
    /// # Errors
    /// Returns an error if `owner` is stale.
    pub fn add_event(&mut self, owner: TypeId, name: &str, event_type: TypeSig) -> Result<EventId> {
        let accessor_flags = MethodAttributes::PUBLIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME;
        let add = self.add_method(
            owner,
            MethodBuilder::new(&format!("add_{name}"))
                .attributes(accessor_flags)
                .param("value", event_type.clone())
                .body(BodyBuilder::new().ret()),
        )?;
        let remove = self.add_method(
            owner,
            MethodBuilder::new(&format!("remove_{name}"))
                .attributes(accessor_flags)
                .param("value", event_type.clone())
                .body(BodyBuilder::new().ret()),
        )?;

        let mut event = EventDef::new(name, event_type);
        event.add = Some(add);
        event.remove = Some(remove);
        self.image.add_event(owner, event)
    }

    /// Symbolic reference to a type added earlier.
    ///
    /// # Errors
    /// Returns an error if `id` is stale.
    pub fn type_sig(&self, id: TypeId) -> Result<TypeSig> {
        self.image.type_sig(id)
    }

    /// Symbolic reference to a method added earlier.
    ///
    /// # Errors
    /// Returns an error if `id` is stale.
    pub fn method_ref(&self, id: MethodId) -> Result<MethodRef> {
        self.image.method_ref(id)
    }

    /// Symbolic reference to a field added earlier.
    ///
    /// # Errors
    /// Returns an error if `id` is stale.
    pub fn field_ref(&self, id: FieldId) -> Result<FieldRef> {
        self.image.field_ref(id)
    }

    /// The image under construction
    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    /// Finish the image
    #[must_use]
    pub fn build(self) -> Image {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_builder() {
        let body = BodyBuilder::new()
            .local(TypeSig::int32())
            .ldc_i4(7)
            .stloc(0)
            .ldloc(0)
            .ret()
            .build();
        assert_eq!(body.instructions.len(), 4);
        assert_eq!(body.locals, vec![TypeSig::int32()]);
        assert_eq!(body.instructions[0].operand, Operand::Int32(7));
        assert!(body.init_locals);
    }

    #[test]
    fn test_method_builder_defaults() {
        let method = MethodBuilder::new("Foo")
            .returns(TypeSig::int32())
            .param("x", TypeSig::string())
            .build();
        assert!(method.sig.has_this);
        assert!(method.attributes.contains(MethodAttributes::PUBLIC));
        assert_eq!(method.param_names, vec!["x".to_string()]);
        assert!(method.body.is_none());

        let stat = MethodBuilder::new("Bar").static_().build();
        assert!(!stat.sig.has_this);
        assert!(stat.is_static());
    }

    #[test]
    fn test_ctor_and_cctor() {
        let ctor = MethodBuilder::ctor().build();
        assert!(ctor.is_constructor());
        assert!(!ctor.is_static());

        let cctor = MethodBuilder::cctor().body(BodyBuilder::new().ret()).build();
        assert!(cctor.is_static_constructor());
        assert!(!cctor.sig.has_this);
    }

    #[test]
    fn test_private_keeps_other_flags() {
        let method = MethodBuilder::new("Foo").virtual_().private().build();
        assert!(method.is_virtual());
        assert_eq!(
            method.attributes.bits() & crate::metadata::flags::MEMBER_ACCESS_MASK,
            MethodAttributes::PRIVATE.bits()
        );
    }

    #[test]
    fn test_image_builder() {
        let mut builder = ImageBuilder::new("Base", AssemblyVersion::new(1, 0, 0, 0));
        let ty = builder.add_type(TypeBuilder::class("Game", "A")).unwrap();
        let nested = builder.add_nested(ty, TypeBuilder::nested("Inner")).unwrap();
        builder.add_default_ctor(ty).unwrap();
        let prop = builder
            .add_auto_property(ty, "Health", TypeSig::int32(), true)
            .unwrap();
        let image = builder.build();

        assert!(image.has_assembly_ref(CORE_LIBRARY));
        assert_eq!(image.type_full_name(nested).unwrap(), "Game.A/Inner");
        let prop = image.property_def(prop).unwrap();
        assert!(prop.getter.is_some());
        assert!(prop.setter.is_some());
        assert_eq!(image.type_def(ty).unwrap().methods.len(), 3);
        assert!(image.find_field(ty, "<Health>k__BackingField").is_some());
    }

    #[test]
    fn test_generic_method_builder() {
        let builder = MethodBuilder::new("Make").generic_param("T");
        let arg = builder.generic_arg(0);
        let method = builder.returns(arg).build();
        assert_eq!(method.sig.generic_params, 1);
        assert_eq!(method.local_id(), "!!0 Make<1>()");
    }
}
