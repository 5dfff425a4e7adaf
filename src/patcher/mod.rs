//! The patch pipeline.
//!
//! A [`Patcher`] merges patch images (`*.mm.dll`) into a base image in a fixed sequence of
//! stages:
//!
//! 1. **Dependency mapping** - every image of the working set gets its dependencies loaded
//! 2. **Rule parsing** - `Hook`, `LinkTo`, renames and attribute handler bindings fill the
//!    relink map and the handler tables
//! 3. **Pre-patch** - type shells for new types, removal of `Remove`/`Replace` targets,
//!    module references and resources
//! 4. **Patch** - member merge: properties, events, methods with captured originals, enum
//!    pruning, fields, nested types
//! 5. **Patch-refs** - every reference of the output is relinked and imported, with
//!    instruction fixups where a relink changed the kind of an operand
//! 6. **Post-process** - attribute handlers, inlining prevention, cleanup and caller hooks
//!
//! Each stage runs once and only after the previous one; [`Patcher::auto_patch`] runs them
//! all. Patch images steer the merge through directive attributes in the `DotPatch`
//! namespace, see [`directives::Directive`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotpatch::prelude::*;
//!
//! let mut patcher = Patcher::new(PatcherConfig::default(), Box::new(source));
//! patcher.read("/game/Game.dll")?;
//! patcher.read_mod_dir("/game/mods")?;
//!
//! let mut sink = MemorySink::new();
//! patcher.run(&mut sink)?;
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod cleanup;
pub mod config;
pub mod directives;
pub mod hooks;
pub mod markers;
pub mod names;
mod patch;
mod patchrefs;
mod prepatch;
mod relinker;
mod rules;

use std::{fmt, path::Path};

use crate::{
    loader::{
        is_mod_file, AssemblyResolver, DependencyMapper, ImageKey, ImageSink, ImageSource,
        MissingDependencyResolver,
    },
    metadata::{
        builder::{CORE_LIBRARY, CORE_LIBRARY_VERSION},
        flags::MethodImplAttributes,
        identity::AssemblyIdentity,
        image::{Declaration, Image},
    },
    relink::{RelinkMap, Resolver},
    Result,
};

pub use config::PatcherConfig;
pub use directives::{AttributeHandler, Directive, DirectiveSet, HandlerRegistry};
pub use hooks::PatchHooks;
pub use markers::{Marker, WAS_HERE};

use patchrefs::RefPass;
use rules::RuleParser;

/// Pipeline position of a [`Patcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum PatchStage {
    /// Images are being loaded
    Loading,
    /// Dependencies of the working set are mapped
    DependenciesMapped,
    /// Directives were turned into relink rules
    RulesParsed,
    /// Type shells exist
    PrePatched,
    /// Members are merged
    Patched,
    /// References are relinked
    RefsPatched,
    /// Handlers, cleanup and hooks ran
    PostProcessed,
}

/// Output image and settings shared by the merge passes
pub(crate) struct MergeContext<'a> {
    pub(crate) output: &'a mut Image,
    pub(crate) config: &'a PatcherConfig,
    pub(crate) handlers: &'a HandlerRegistry,
}

/// Drives a patch run over one base image and its patch images
pub struct Patcher {
    config: PatcherConfig,
    module: Option<Image>,
    mods: Vec<Image>,
    mapper: DependencyMapper,
    resolver: Resolver,
    handlers: HandlerRegistry,
    hooks: Vec<Box<dyn PatchHooks>>,
    stage: PatchStage,
}

impl fmt::Debug for Patcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patcher")
            .field("module", &self.module.as_ref().map(|m| &m.name))
            .field("mods", &self.mods.iter().map(|m| &m.name).collect::<Vec<_>>())
            .field("stage", &self.stage)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Patcher {
    /// Creates a patcher reading images through `source`.
    ///
    /// # Arguments
    /// * `config` - Behavior flags and search paths
    /// * `source` - Reads the base image, patch images and dependencies
    #[must_use]
    pub fn new(config: PatcherConfig, source: Box<dyn ImageSource>) -> Self {
        let mut mapper = DependencyMapper::new(source);
        mapper.throw_on_missing = config.missing_dependency_throw || config.strict;
        mapper.shared_library_dirs = config.shared_library_dirs.clone();
        for dir in &config.dependency_dirs {
            mapper.add_dependency_dir(dir.clone());
        }

        let mut resolver = Resolver::new(RelinkMap::new());
        resolver.strict = config.strict;
        resolver.use_cache = config.relinker_cache;

        Self {
            config,
            module: None,
            mods: Vec::new(),
            mapper,
            resolver,
            handlers: HandlerRegistry::new(),
            hooks: Vec::new(),
            stage: PatchStage::Loading,
        }
    }

    /// The configuration of this run
    #[must_use]
    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    /// The stage reached so far
    #[must_use]
    pub fn stage(&self) -> PatchStage {
        self.stage
    }

    /// The output image, which is the base image being patched
    #[must_use]
    pub fn output(&self) -> Option<&Image> {
        self.module.as_ref()
    }

    /// Mutable access to the output image
    pub fn output_mut(&mut self) -> Option<&mut Image> {
        self.module.as_mut()
    }

    /// Consumes the patcher and returns the output image
    #[must_use]
    pub fn into_output(self) -> Option<Image> {
        self.module
    }

    /// Loaded patch images, in load order
    #[must_use]
    pub fn mods(&self) -> &[Image] {
        &self.mods
    }

    /// The dependency mapper
    #[must_use]
    pub fn mapper(&self) -> &DependencyMapper {
        &self.mapper
    }

    /// The resolver and its relink map
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The relink map, for entries registered by the caller before the run
    pub fn relink_map_mut(&mut self) -> &mut RelinkMap {
        &mut self.resolver.map
    }

    /// Installs the assembly resolver consulted by dependency mapping
    pub fn set_resolver(&mut self, resolver: Box<dyn AssemblyResolver>) {
        self.mapper.set_resolver(resolver);
    }

    /// Installs the callback consulted when a dependency cannot be found
    pub fn set_missing_dependency_resolver(&mut self, missing: MissingDependencyResolver) {
        self.mapper.set_missing_resolver(missing);
    }

    /// Registers a named custom attribute handler.
    ///
    /// Patch types bind handlers to their attribute type with the `CustomAttribute` and
    /// `CustomMethodAttribute` directives.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: AttributeHandler) {
        self.handlers.register(name, handler);
    }

    /// Installs a set of pipeline hooks; hooks run in installation order
    pub fn add_hooks(&mut self, hooks: Box<dyn PatchHooks>) {
        self.hooks.push(hooks);
    }

    fn advance(&mut self, from: PatchStage, to: PatchStage) -> Result<()> {
        if self.stage != from {
            return Err(structural_error!(
                "Stage {} needs stage {}, the patcher is at {}",
                to,
                from,
                self.stage
            ));
        }
        self.stage = to;
        Ok(())
    }

    fn expect_stage(&self, stage: PatchStage, action: &str) -> Result<()> {
        if self.stage != stage {
            return Err(structural_error!(
                "Cannot {} at stage {}, expected {}",
                action,
                self.stage,
                stage
            ));
        }
        Ok(())
    }

    /// Sets the base image
    ///
    /// # Errors
    /// Returns an error once the run has started.
    pub fn set_module(&mut self, image: Image) -> Result<()> {
        self.expect_stage(PatchStage::Loading, "replace the base image")?;
        self.mapper.register_working_image(ImageKey::Base, &image);
        log::info!("[ReadModule] Loaded {}", image.name);
        self.module = Some(image);
        Ok(())
    }

    /// Reads the base image from `path` and adds its directory to the dependency search.
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or the run has started.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let image = self.mapper.source().read(path)?;
        if let Some(dir) = path.parent() {
            self.mapper.add_dependency_dir(dir);
        }
        self.set_module(image)
    }

    /// Adds a patch image. The read-mod hooks see it first.
    ///
    /// # Errors
    /// Returns an error if a hook fails or the run has started.
    pub fn add_mod(&mut self, mut image: Image) -> Result<()> {
        self.expect_stage(PatchStage::Loading, "add a patch image")?;
        for hooks in &mut self.hooks {
            hooks.on_read_mod(&mut image)?;
        }
        self.mapper
            .register_working_image(ImageKey::Mod(self.mods.len()), &image);
        log::info!("[ReadMod] Loaded {}", image.name);
        self.mods.push(image);
        Ok(())
    }

    /// Reads a patch image from `path`.
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or [`Patcher::add_mod`] fails.
    pub fn read_mod(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let image = self.mapper.source().read(path.as_ref())?;
        self.add_mod(image)
    }

    /// Reads every patch image of the base module found directly in `dir`: file names
    /// start with the module name, with or without spaces, and end in `.mm.dll`. The
    /// directory joins the dependency search.
    ///
    /// Returns the number of patch images read.
    ///
    /// # Errors
    /// Returns an error if no base image is set, the directory cannot be listed or an
    /// image cannot be read.
    pub fn read_mod_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let base_name = self
            .module
            .as_ref()
            .map(|module| module.name.clone())
            .ok_or_else(|| structural_error!("Read the base image before its patch images"))?;

        self.mapper.add_dependency_dir(dir);
        let mut count = 0;
        for file in self.mapper.source().list_files(dir)? {
            let Some(file_name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if is_mod_file(&base_name, &file_name) {
                self.read_mod(&file)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Maps the dependencies of the base image and of every patch image.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedDependency`] for missing dependencies when
    /// throwing on them, or a stage error.
    pub fn map_dependencies(&mut self) -> Result<()> {
        self.advance(PatchStage::Loading, PatchStage::DependenciesMapped)?;
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| structural_error!("No base image loaded"))?;

        log::info!("[MapDependency] Mapping dependencies of {}", module.name);
        self.mapper.map_dependencies(ImageKey::Base, module)?;
        for (index, image) in self.mods.iter().enumerate() {
            self.mapper.map_dependencies(ImageKey::Mod(index), image)?;
        }
        Ok(())
    }

    /// Turns the directives of every patch image into relink map entries and handler
    /// bindings.
    ///
    /// # Errors
    /// Returns an error on a stage violation or a stale handle.
    pub fn parse_rules(&mut self) -> Result<()> {
        self.advance(PatchStage::DependenciesMapped, PatchStage::RulesParsed)?;
        for patch in &self.mods {
            verbose!(self.config, "[ParseRules] Parsing {}", patch.name);
            RuleParser::new(patch, &mut self.resolver.map, &mut self.handlers).parse()?;
        }
        log::info!("[ParseRules] {} relink rules", self.resolver.map.len());
        Ok(())
    }

    fn merge_context(&mut self) -> Result<(MergeContext<'_>, &[Image])> {
        let output = self
            .module
            .as_mut()
            .ok_or_else(|| structural_error!("No base image loaded"))?;
        Ok((
            MergeContext {
                output,
                config: &self.config,
                handlers: &self.handlers,
            },
            &self.mods,
        ))
    }

    /// Creates type shells and merges module references and resources.
    ///
    /// # Errors
    /// Returns an error on a stage violation or a structural conflict.
    pub fn pre_patch(&mut self) -> Result<()> {
        self.advance(PatchStage::RulesParsed, PatchStage::PrePatched)?;
        let (mut context, mods) = self.merge_context()?;
        for patch in mods {
            log::info!("[PrePatch] Pre-patching with {}", patch.name);
            context.pre_patch_image(patch)?;
        }
        Ok(())
    }

    /// Merges the members of every patch image.
    ///
    /// # Errors
    /// Returns an error on a stage violation or a structural conflict.
    pub fn patch(&mut self) -> Result<()> {
        self.advance(PatchStage::PrePatched, PatchStage::Patched)?;
        let (mut context, mods) = self.merge_context()?;
        for patch in mods {
            log::info!("[Patch] Patching with {}", patch.name);
            context.patch_image(patch)?;
        }
        Ok(())
    }

    /// Relinks every reference of the output image.
    ///
    /// # Errors
    /// Returns [`crate::Error::RelinkFailed`] in strict mode when a target is missing.
    pub fn patch_refs(&mut self) -> Result<()> {
        self.advance(PatchStage::Patched, PatchStage::RefsPatched)?;
        let output = self
            .module
            .as_mut()
            .ok_or_else(|| structural_error!("No base image loaded"))?;
        RefPass {
            resolver: &mut self.resolver,
            mapper: &self.mapper,
            mods: &self.mods,
            config: &self.config,
            hooks: self.hooks.as_mut_slice(),
        }
        .run(output)
    }

    /// Runs attribute handlers, inlining prevention, the cleanup pass when configured and
    /// the post-process hooks.
    ///
    /// # Errors
    /// Returns an error if a handler or hook fails, or on a stage violation.
    pub fn post_process(&mut self) -> Result<()> {
        self.advance(PatchStage::RefsPatched, PatchStage::PostProcessed)?;
        let output = self
            .module
            .as_mut()
            .ok_or_else(|| structural_error!("No base image loaded"))?;

        self.handlers.run(output)?;

        if self.config.prevent_inline {
            for declaration in output.declarations() {
                let Declaration::Method(id) = declaration else {
                    continue;
                };
                let method = output.method_def_mut(id)?;
                if method.body.is_some() {
                    method.impl_attributes.insert(MethodImplAttributes::NO_INLINING);
                    method.impl_attributes.remove(MethodImplAttributes::AGGRESSIVE_INLINING);
                }
            }
        }

        if self.config.cleanup {
            cleanup::cleanup(output, &self.config, self.config.cleanup_all)?;
        }

        for hooks in &mut self.hooks {
            hooks.post_process(output)?;
        }
        Ok(())
    }

    /// Runs the cleanup pass on the output image. Running it again changes nothing.
    ///
    /// # Arguments
    /// * `all` - Also remove provenance markers and directive library references
    ///
    /// # Errors
    /// Returns an error if no base image is loaded.
    pub fn cleanup(&mut self, all: bool) -> Result<()> {
        let output = self
            .module
            .as_mut()
            .ok_or_else(|| structural_error!("No base image loaded"))?;
        cleanup::cleanup(output, &self.config, all)
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    /// Returns the first error of any stage.
    pub fn auto_patch(&mut self) -> Result<()> {
        let name = self
            .module
            .as_ref()
            .map(|module| module.name.clone())
            .unwrap_or_default();
        log::info!("[AutoPatch] Patching {} with {} patch images", name, self.mods.len());

        self.map_dependencies()?;
        self.parse_rules()?;
        self.pre_patch()?;
        self.patch()?;
        self.patch_refs()?;
        self.post_process()?;

        log::info!("[AutoPatch] Done");
        Ok(())
    }

    /// Marks the output as patched and hands it to `sink`.
    ///
    /// # Errors
    /// Returns an error if no base image is loaded or the sink fails.
    pub fn write(&mut self, sink: &mut dyn ImageSink) -> Result<()> {
        let output = self
            .module
            .as_mut()
            .ok_or_else(|| structural_error!("No base image loaded"))?;
        markers::ensure_was_here(output)?;
        output.ensure_assembly_ref(AssemblyIdentity::new(CORE_LIBRARY, CORE_LIBRARY_VERSION));

        log::info!("[Write] Writing {} ({} symbols)", output.name, self.config.symbol_format);
        sink.write(output, self.config.symbol_format)
    }

    /// Patches and writes in one go.
    ///
    /// # Errors
    /// Returns the first error of [`Patcher::auto_patch`] or [`Patcher::write`].
    pub fn run(&mut self, sink: &mut dyn ImageSink) -> Result<()> {
        self.auto_patch()?;
        self.write(sink)
    }

    /// Drops cached state.
    ///
    /// # Arguments
    /// * `all` - Everything below, plus the relink rules and handler bindings
    /// * `shareable` - Loaded dependencies and the dependency graph
    /// * `module_specific` - Relink and import caches
    pub fn clear_caches(&mut self, all: bool, shareable: bool, module_specific: bool) {
        if all || shareable {
            self.mapper.clear();
            if let Some(module) = &self.module {
                self.mapper.register_working_image(ImageKey::Base, module);
            }
            for (index, image) in self.mods.iter().enumerate() {
                self.mapper.register_working_image(ImageKey::Mod(index), image);
            }
        }
        if all || module_specific {
            self.resolver.clear_cache();
        }
        if all {
            self.resolver.map.clear();
            self.handlers.clear_bindings();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        loader::{MemorySink, MemorySource},
        metadata::{
            attributes::CustomAttribute,
            body::MethodBody,
            builder::TypeBuilder,
            image::MethodDef,
            typesig::TypeSig,
        },
        test::factories::{base_image, game_source, patch_builder, GAME_DIR},
        Error,
    };
    use std::{cell::RefCell, path::PathBuf, rc::Rc};

    fn patcher(config: PatcherConfig) -> Patcher {
        Patcher::new(config.dependency_dir(GAME_DIR), Box::new(game_source()))
    }

    #[derive(Default)]
    struct Counts {
        mods: usize,
        methods: usize,
        instructions: usize,
        post: usize,
    }

    struct Counting(Rc<RefCell<Counts>>);

    impl PatchHooks for Counting {
        fn on_read_mod(&mut self, _image: &mut Image) -> Result<()> {
            self.0.borrow_mut().mods += 1;
            Ok(())
        }

        fn rewrite_method(&mut self, _method: &mut MethodDef) -> Result<()> {
            self.0.borrow_mut().methods += 1;
            Ok(())
        }

        fn rewrite_instruction(&mut self, _body: &mut MethodBody, _index: usize) -> Result<()> {
            self.0.borrow_mut().instructions += 1;
            Ok(())
        }

        fn post_process(&mut self, _output: &mut Image) -> Result<()> {
            self.0.borrow_mut().post += 1;
            Ok(())
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut patcher = patcher(PatcherConfig::default());
        patcher.set_module(base_image()).unwrap();

        assert!(matches!(
            patcher.pre_patch(),
            Err(Error::StructuralConflict { .. })
        ));
        patcher.map_dependencies().unwrap();
        patcher.parse_rules().unwrap();
        assert!(patcher.map_dependencies().is_err());
        assert_eq!(patcher.stage(), PatchStage::RulesParsed);
        assert!(patcher.add_mod(patch_builder().build()).is_err());
    }

    #[test]
    fn test_missing_dependency_fails_mapping() {
        let mut patcher = Patcher::new(PatcherConfig::default(), Box::new(MemorySource::new()));
        patcher.set_module(base_image()).unwrap();
        assert!(matches!(
            patcher.map_dependencies(),
            Err(Error::UnresolvedDependency { .. })
        ));

        let mut lenient = Patcher::new(
            PatcherConfig::default().missing_dependency_throw(false),
            Box::new(MemorySource::new()),
        );
        lenient.set_module(base_image()).unwrap();
        lenient.map_dependencies().unwrap();
        assert!(lenient.mapper().dependencies().is_empty());
    }

    #[test]
    fn test_strict_makes_missing_dependency_fatal() {
        let config = PatcherConfig::default()
            .strict(true)
            .missing_dependency_throw(false);
        let mut patcher = Patcher::new(config, Box::new(MemorySource::new()));
        patcher.set_module(base_image()).unwrap();
        assert!(matches!(
            patcher.map_dependencies(),
            Err(Error::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn test_hooks_are_called() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut patcher = patcher(PatcherConfig::default());
        patcher.add_hooks(Box::new(Counting(Rc::clone(&counts))));
        patcher.set_module(base_image()).unwrap();
        patcher.add_mod(patch_builder().build()).unwrap();
        patcher.auto_patch().unwrap();

        let counts = counts.borrow();
        assert_eq!(counts.mods, 1);
        assert!(counts.methods > 0);
        assert!(counts.instructions > 0);
        assert_eq!(counts.post, 1);
    }

    #[test]
    fn test_read_mod_dir_filters_by_module_name() {
        let mut source = game_source();
        source.insert_in("/game/mods", patch_builder().build());
        let mut other = patch_builder().build();
        other.name = "Engine.Mod.mm.dll".to_string();
        source.insert("/game/mods/Engine.Mod.mm.dll", other);

        let mut patcher = Patcher::new(PatcherConfig::default(), Box::new(source));
        patcher.read("/game/Game.dll").unwrap();
        assert_eq!(patcher.read_mod_dir("/game/mods").unwrap(), 1);
        assert_eq!(patcher.mods().len(), 1);

        let dirs = &patcher.mapper().dependency_dirs;
        assert!(dirs.contains(&PathBuf::from(GAME_DIR)));
        assert!(dirs.contains(&PathBuf::from("/game/mods")));
    }

    #[test]
    fn test_prevent_inline_and_write() {
        let mut patcher = patcher(PatcherConfig::default().prevent_inline(true));
        patcher.set_module(base_image()).unwrap();
        let mut sink = MemorySink::new();
        patcher.run(&mut sink).unwrap();

        let output = sink.last().unwrap();
        assert!(output.find_type(WAS_HERE).is_some());
        let a = output.find_type("Game.A").unwrap();
        let foo = output.find_method(a, "System.Int32 Foo()").unwrap();
        assert!(output
            .method_def(foo)
            .unwrap()
            .impl_attributes
            .contains(MethodImplAttributes::NO_INLINING));
    }

    #[test]
    fn test_attribute_handlers_run_on_bound_attributes() {
        let mut builder = patch_builder();
        let note = builder
            .add_type(
                TypeBuilder::class("Game", "NoteAttribute")
                    .base(TypeSig::named(CORE_LIBRARY, "System", "Attribute"))
                    .custom_attribute(Directive::CustomAttribute.attribute_with(&["Note"])),
            )
            .unwrap();
        builder.add_default_ctor(note).unwrap();
        let note_type = builder.type_sig(note).unwrap().definition().cloned().unwrap();
        builder
            .add_type(
                TypeBuilder::class("Game", "C")
                    .custom_attribute(CustomAttribute::new(note_type, vec![])),
            )
            .unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&seen);
        let mut patcher = patcher(PatcherConfig::default());
        patcher.register_handler(
            "Note",
            Box::new(move |image, declaration, _| {
                if let Declaration::Type(id) = declaration {
                    record.borrow_mut().push(image.type_full_name(id)?);
                }
                Ok(())
            }),
        );
        patcher.set_module(base_image()).unwrap();
        patcher.add_mod(builder.build()).unwrap();
        patcher.auto_patch().unwrap();

        assert_eq!(*seen.borrow(), vec!["Game.C".to_string()]);
    }

    #[test]
    fn test_clear_caches() {
        let mut patcher = patcher(PatcherConfig::default());
        patcher.set_module(base_image()).unwrap();
        patcher.add_mod(patch_builder().build()).unwrap();
        patcher.auto_patch().unwrap();
        assert!(!patcher.mapper().graph().is_empty());
        assert!(!patcher.mapper().dependencies().is_empty());

        patcher.clear_caches(false, true, false);
        assert!(patcher.mapper().graph().is_empty());
        assert!(patcher.mapper().dependencies().is_empty());
        assert_eq!(patcher.mapper().cached("Game"), Some(ImageKey::Base));
        assert_eq!(patcher.mapper().cached("Game.Mod.mm"), Some(ImageKey::Mod(0)));

        patcher.clear_caches(true, false, false);
        assert_eq!(patcher.resolver().cached(), 0);
        assert!(patcher.resolver().map.is_empty());
    }
}
