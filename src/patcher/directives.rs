//! The directive vocabulary of patch images.
//!
//! Patch authors steer the merge with attributes from the `DotPatch` directive library,
//! named `DotPatch.Patch<Kind>`. Each declaration's attributes are parsed once into a
//! [`DirectiveSet`], so the passes match on a closed [`Directive`] enumeration instead of
//! comparing attribute names over and over. The provenance markers written by the
//! pipeline (`DotPatch.Markers.*`) parse into the same set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    metadata::{
        attributes::{AttributeArgument, CustomAttribute},
        image::{Declaration, Image},
        typesig::NamedType,
    },
    Error, Result,
};

/// Assembly and namespace of the directive library
pub const DIRECTIVE_NAMESPACE: &str = "DotPatch";

/// Name prefix of every directive attribute type
pub const DIRECTIVE_PREFIX: &str = "DotPatch.Patch";

/// Namespace of the provenance marker types the pipeline adds to the output
pub const MARKER_NAMESPACE: &str = "DotPatch.Markers";

/// A directive kind.
///
/// The display form is the suffix of the attribute type name, so `Directive::Ignore`
/// is carried by `DotPatch.PatchIgnore`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
)]
pub enum Directive {
    /// Leave the target untouched
    Ignore,
    /// Delete the target and do not recreate it
    Remove,
    /// Delete the target and recreate it from the patch
    Replace,
    /// Force public visibility
    Public,
    /// Only patch existing members, never add new ones
    NoNew,
    /// Turn the method into a constructor
    Constructor,
    /// Drop the target enum's values before merging
    EnumReplace,
    /// Relink references keyed by the argument to this declaration
    Hook,
    /// Link references to this declaration to an explicit target
    LinkTo,
    /// Target the declaration with this name instead of the patch name
    Name,
    /// The declaration was added by a patch
    Added,
    /// The method is a captured original
    Original,
    /// The method's original was captured under the given name
    OriginalName,
    /// Binds a type-level attribute handler to the attribute type
    CustomAttribute,
    /// Binds a method-level attribute handler to the attribute type
    CustomMethodAttribute,
}

impl Directive {
    /// Parses a directive or marker attribute type name
    #[must_use]
    pub fn from_attribute_name(full_name: &str) -> Option<Self> {
        if let Some(kind) = full_name.strip_prefix(DIRECTIVE_PREFIX) {
            return kind.parse().ok();
        }

        match full_name.strip_prefix(MARKER_NAMESPACE)?.strip_prefix('.')? {
            "Added" => Some(Directive::Added),
            "Original" => Some(Directive::Original),
            "OriginalName" => Some(Directive::OriginalName),
            _ => None,
        }
    }

    /// Full name of the attribute type carrying this directive
    #[must_use]
    pub fn attribute_name(self) -> String {
        format!("{DIRECTIVE_PREFIX}{self}")
    }

    /// Builds the directive attribute as a patch author would apply it
    #[must_use]
    pub fn attribute(self) -> CustomAttribute {
        self.attribute_with(&[])
    }

    /// Builds the directive attribute with string arguments
    #[must_use]
    pub fn attribute_with(self, args: &[&str]) -> CustomAttribute {
        CustomAttribute::new(
            NamedType::new(DIRECTIVE_NAMESPACE, DIRECTIVE_NAMESPACE, format!("Patch{self}")),
            args.iter()
                .map(|arg| AttributeArgument::String((*arg).to_string()))
                .collect(),
        )
    }
}

/// Returns true when the attribute exists only to carry a pipeline directive
#[must_use]
pub fn is_directive_attribute(attribute: &CustomAttribute) -> bool {
    attribute.type_name().starts_with(DIRECTIVE_PREFIX)
        || attribute
            .attribute_type()
            .is_some_and(|ty| ty.scope == DIRECTIVE_NAMESPACE)
}

fn text_arg(attribute: &CustomAttribute, index: usize) -> Option<String> {
    match attribute.args.get(index)? {
        AttributeArgument::String(value) => Some(value.clone()),
        AttributeArgument::Type(ty) => Some(ty.patch_full_name()),
        _ => None,
    }
}

/// The directives found on one declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    kinds: BTreeSet<Directive>,
    /// Keys registered by `Hook` directives
    pub hooks: Vec<String>,
    /// Explicit link-to target: type full name and optional member id
    pub link_to: Option<(String, Option<String>)>,
    /// Target name given by a `Name` directive
    pub name: Option<String>,
    /// Handler bound by `CustomAttribute`
    pub handler: Option<String>,
    /// Handler bound by `CustomMethodAttribute`
    pub method_handler: Option<String>,
    /// Name recorded by an `OriginalName` marker
    pub original_name: Option<String>,
}

impl DirectiveSet {
    /// Parses the directives among `attributes`; other attributes are ignored
    #[must_use]
    pub fn parse(attributes: &[CustomAttribute]) -> Self {
        let mut set = Self::default();
        for attribute in attributes {
            let Some(kind) = Directive::from_attribute_name(&attribute.type_name()) else {
                continue;
            };
            set.kinds.insert(kind);

            match kind {
                Directive::Hook => set.hooks.extend(text_arg(attribute, 0)),
                Directive::LinkTo => {
                    if let Some(type_name) = text_arg(attribute, 0) {
                        set.link_to = Some((type_name, text_arg(attribute, 1)));
                    }
                }
                Directive::Name => set.name = text_arg(attribute, 0),
                Directive::CustomAttribute => set.handler = text_arg(attribute, 0),
                Directive::CustomMethodAttribute => set.method_handler = text_arg(attribute, 0),
                Directive::OriginalName => set.original_name = text_arg(attribute, 0),
                _ => {}
            }
        }
        set
    }

    /// Returns true when the directive is present
    #[must_use]
    pub fn has(&self, kind: Directive) -> bool {
        self.kinds.contains(&kind)
    }

    /// Returns true when either `Remove` or `Replace` is present
    #[must_use]
    pub fn removes(&self) -> bool {
        self.has(Directive::Remove) || self.has(Directive::Replace)
    }

    /// Adds the directive kinds of `other`
    pub fn inherit(&mut self, other: &DirectiveSet) {
        self.kinds.extend(other.kinds.iter().copied());
    }

    /// Returns true when no directive is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// A caller supplied custom attribute handler.
///
/// It receives the output image, the declaration carrying the attribute and the attribute.
pub type AttributeHandler = Box<dyn Fn(&mut Image, Declaration, &CustomAttribute) -> Result<()>>;

/// Named attribute handlers and the attribute types bound to them.
///
/// Handlers are registered by name by the caller; patch images bind attribute types to
/// those names with the `CustomAttribute` (type level) and `CustomMethodAttribute`
/// (method level) directives.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, AttributeHandler>,
    type_level: BTreeMap<String, String>,
    method_level: BTreeMap<String, String>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .field("type_level", &self.type_level)
            .field("method_level", &self.method_level)
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`
    pub fn register(&mut self, name: impl Into<String>, handler: AttributeHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Binds the attribute type `attribute` to the type-level handler `handler`
    pub fn bind_type(&mut self, attribute: impl Into<String>, handler: impl Into<String>) {
        self.type_level.insert(attribute.into(), handler.into());
    }

    /// Binds the attribute type `attribute` to the method-level handler `handler`
    pub fn bind_method(&mut self, attribute: impl Into<String>, handler: impl Into<String>) {
        self.method_level.insert(attribute.into(), handler.into());
    }

    /// Returns true when the attribute type is bound at either level
    #[must_use]
    pub fn is_bound(&self, attribute: &str) -> bool {
        self.type_level.contains_key(attribute) || self.method_level.contains_key(attribute)
    }

    /// Copies of the attributes among `attributes` that have a bound handler
    #[must_use]
    pub fn bound_attributes(&self, attributes: &[CustomAttribute]) -> Vec<CustomAttribute> {
        attributes
            .iter()
            .filter(|attr| self.is_bound(&attr.type_name()))
            .cloned()
            .collect()
    }

    /// Drops the attribute bindings; registered handlers stay
    pub fn clear_bindings(&mut self) {
        self.type_level.clear();
        self.method_level.clear();
    }

    fn invoke(
        &self,
        name: &str,
        image: &mut Image,
        declaration: Declaration,
        attribute: &CustomAttribute,
    ) -> Result<()> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::Error(format!("No attribute handler named {name}")))?;
        handler(image, declaration, attribute)
    }

    /// Runs the bound handlers over every declaration of `image`.
    ///
    /// Type-level handlers apply to attributes on any declaration, method-level handlers
    /// only to attributes on methods.
    ///
    /// # Errors
    /// Returns an error if a bound handler was never registered or a handler fails.
    pub fn run(&self, image: &mut Image) -> Result<()> {
        if self.type_level.is_empty() && self.method_level.is_empty() {
            return Ok(());
        }

        for declaration in image.declarations() {
            let attributes = image.custom_attributes(declaration)?.to_vec();
            for attribute in &attributes {
                let type_name = attribute.type_name();
                if let Some(name) = self.type_level.get(&type_name) {
                    self.invoke(name, image, declaration, attribute)?;
                }
                if let (Declaration::Method(_), Some(name)) =
                    (declaration, self.method_level.get(&type_name))
                {
                    self.invoke(name, image, declaration, attribute)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builder::{ImageBuilder, MethodBuilder, TypeBuilder},
        identity::AssemblyVersion,
    };
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_parse_directives() {
        let attributes = vec![
            Directive::Ignore.attribute(),
            Directive::Hook.attribute_with(&["Game.Old"]),
            Directive::Hook.attribute_with(&["Game.Older"]),
            Directive::LinkTo.attribute_with(&["Game.Target", "Run"]),
            Directive::Name.attribute_with(&["Player"]),
            CustomAttribute::new(NamedType::new("mscorlib", "System", "ObsoleteAttribute"), vec![]),
        ];

        let set = DirectiveSet::parse(&attributes);
        assert!(set.has(Directive::Ignore));
        assert!(!set.has(Directive::Remove));
        assert_eq!(set.hooks, vec!["Game.Old", "Game.Older"]);
        assert_eq!(
            set.link_to,
            Some(("Game.Target".to_string(), Some("Run".to_string())))
        );
        assert_eq!(set.name.as_deref(), Some("Player"));
    }

    #[test]
    fn test_marker_names_parse() {
        assert_eq!(
            Directive::from_attribute_name("DotPatch.Markers.OriginalName"),
            Some(Directive::OriginalName)
        );
        assert_eq!(
            Directive::from_attribute_name("DotPatch.PatchReplace"),
            Some(Directive::Replace)
        );
        assert_eq!(Directive::from_attribute_name("DotPatch.PatchUnknown"), None);
        assert_eq!(Directive::from_attribute_name("Game.Markers.Added"), None);
        assert_eq!(Directive::Public.attribute_name(), "DotPatch.PatchPublic");
    }

    #[test]
    fn test_directive_attribute_detection() {
        assert!(is_directive_attribute(&Directive::NoNew.attribute()));
        let other = CustomAttribute::new(NamedType::new("Game", "Game", "Note"), vec![]);
        assert!(!is_directive_attribute(&other));
    }

    #[test]
    fn test_handlers_run_per_level() {
        let mut builder = ImageBuilder::new("Game", AssemblyVersion::new(1, 0, 0, 0));
        let note = CustomAttribute::new(NamedType::new("Game", "Game", "Note"), vec![]);
        let a = builder
            .add_type(TypeBuilder::class("Game", "A").custom_attribute(note.clone()))
            .unwrap();
        builder
            .add_method(a, MethodBuilder::new("Run").custom_attribute(note.clone()))
            .unwrap();
        let mut image = builder.build();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        let sink = Rc::clone(&seen);
        registry.register(
            "count",
            Box::new(move |_, declaration, _| {
                sink.borrow_mut().push(declaration);
                Ok(())
            }),
        );
        registry.bind_method("Game.Note", "count");
        registry.run(&mut image).unwrap();

        assert_eq!(seen.borrow().len(), 1);
        assert!(matches!(seen.borrow()[0], Declaration::Method(_)));

        registry.bind_type("Game.Note", "missing");
        assert!(registry.run(&mut image).is_err());
    }
}
