//! Attribute flags for type and member declarations.
//!
//! Only the bits the patch pipeline reads or writes are named; every other bit is carried
//! through untouched via `from_bits_retain`.

use bitflags::bitflags;

/// Bitmask for visibility extraction on types
pub const TYPE_VISIBILITY_MASK: u32 = 0x0007;
/// Bitmask for access extraction on methods and fields
pub const MEMBER_ACCESS_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Type attributes
    pub struct TypeAttributes: u32 {
        /// Type is public
        const PUBLIC = 0x0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0003;
        /// Type is an interface
        const INTERFACE = 0x0020;
        /// Type is abstract
        const ABSTRACT = 0x0080;
        /// Type is sealed
        const SEALED = 0x0100;
        /// Name is special
        const SPECIAL_NAME = 0x0400;
        /// Runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0800;
        /// Initialize the type before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

impl TypeAttributes {
    /// Makes the type public, using the nested form when `nested` is set
    pub fn set_public(&mut self, nested: bool) {
        *self = Self::from_bits_retain(self.bits() & !TYPE_VISIBILITY_MASK);
        if nested {
            self.insert(Self::NESTED_PUBLIC);
        } else {
            self.insert(Self::PUBLIC);
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Method attributes
    pub struct MethodAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method may not be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodAttributes {
    /// Replaces the access bits with public
    pub fn set_public(&mut self) {
        *self = Self::from_bits_retain(self.bits() & !MEMBER_ACCESS_MASK);
        self.insert(Self::PUBLIC);
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Method implementation attributes
    pub struct MethodImplAttributes: u32 {
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method impl is unmanaged, otherwise managed
        const UNMANAGED = 0x0004;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is a synchronized method
        const SYNCHRONIZED = 0x0020;
        /// Signature is exported exactly as declared
        const PRESERVE_SIG = 0x0080;
        /// Method should be inlined if possible
        const AGGRESSIVE_INLINING = 0x0100;
        /// Method is implemented by the runtime itself
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Field attributes
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized
        const INIT_ONLY = 0x0020;
        /// Value is a compile time constant
        const LITERAL = 0x0040;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
        /// Runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0400;
    }
}

impl FieldAttributes {
    /// Replaces the access bits with public
    pub fn set_public(&mut self) {
        *self = Self::from_bits_retain(self.bits() & !MEMBER_ACCESS_MASK);
        self.insert(Self::PUBLIC);
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Property and event attributes
    pub struct MemberAttributes: u32 {
        /// Member is special
        const SPECIAL_NAME = 0x0200;
        /// Runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0400;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_set_public() {
        let mut attrs = TypeAttributes::NESTED_PRIVATE | TypeAttributes::SEALED;
        attrs.set_public(false);
        assert_eq!(attrs.bits() & TYPE_VISIBILITY_MASK, 0x0001);
        assert!(attrs.contains(TypeAttributes::SEALED));

        attrs.set_public(true);
        assert_eq!(attrs.bits() & TYPE_VISIBILITY_MASK, 0x0002);
    }

    #[test]
    fn test_method_set_public_keeps_other_bits() {
        let mut attrs = MethodAttributes::PRIVATE | MethodAttributes::STATIC;
        attrs.set_public();
        assert_eq!(attrs.bits() & MEMBER_ACCESS_MASK, 0x0006);
        assert!(attrs.contains(MethodAttributes::STATIC));
    }

    #[test]
    fn test_unknown_bits_retained() {
        let attrs = FieldAttributes::from_bits_retain(0x8000 | 0x0001);
        let mut copy = attrs;
        copy.set_public();
        assert_eq!(copy.bits() & 0x8000, 0x8000);
    }
}
