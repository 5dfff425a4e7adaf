//! The dependency mapper.
//!
//! For every image in the working set (the base and each patch image) the mapper finds the
//! images it references, loads each of them at most once and records the edges in a
//! dependency graph. The graph may contain cycles; traversal guards against revisiting.
//!
//! # Resolution order
//!
//! A reference is resolved by the first step that succeeds:
//!
//! 1. The load cache, by full name, then by simple name. Each key is also tried
//!    qualified with the requesting image's runtime version.
//! 2. Every dependency directory, trying `<name>.dll`, `<name>.exe` and the bare name. The
//!    bare name is skipped for names ending in `.pdb` or `.mdb`, so a symbol file is never
//!    mistaken for the image.
//! 3. The [`AssemblyResolver`] with the original reference.
//! 4. The shared library directories: `<dir>/<name>/<highest numeric version>/<name>.dll`.
//! 5. The [`AssemblyResolver`] with an identity built from the full name alone.
//! 6. A reflection-only load of the full name.
//! 7. The missing-dependency callback. If it returns nothing the dependency is dropped, or
//!    reported as [`Error::UnresolvedDependency`] when throwing on missing dependencies.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use crate::{
    loader::source::{AssemblyResolver, ImageSource},
    metadata::{
        identity::{AssemblyIdentity, AssemblyVersion},
        image::Image,
        typesig::TypeSig,
    },
    Error, Result,
};

/// Suffix of patch image assembly names
pub const PATCH_ASSEMBLY_SUFFIX: &str = ".mm";

/// Identifies an image of the working set or a loaded dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageKey {
    /// The base image
    Base,
    /// The patch image at this index
    Mod(usize),
    /// The dependency at this index
    Dependency(usize),
}

/// Callback consulted when every resolution step failed: `(requester, name, full_name)`
pub type MissingDependencyResolver = Box<dyn FnMut(&str, &str, Option<&str>) -> Option<Image>>;

/// Borrowed view of the working set, so the mapper can search images it does not own
#[derive(Debug, Clone, Copy)]
pub struct WorkingSet<'a> {
    /// The base image
    pub base: &'a Image,
    /// Patch images, in load order
    pub mods: &'a [Image],
}

/// Loads and caches dependencies and keeps the dependency graph
pub struct DependencyMapper {
    source: Box<dyn ImageSource>,
    resolver: Option<Box<dyn AssemblyResolver>>,
    missing: Option<MissingDependencyResolver>,
    dependencies: Vec<Image>,
    cache: HashMap<String, ImageKey>,
    graph: BTreeMap<ImageKey, Vec<ImageKey>>,
    /// Directories searched by name
    pub dependency_dirs: Vec<PathBuf>,
    /// Shared library install locations, one subdirectory per assembly and version
    pub shared_library_dirs: Vec<PathBuf>,
    /// Fail with [`Error::UnresolvedDependency`] when a dependency stays missing
    pub throw_on_missing: bool,
    /// Skip `.mm` dependencies during deep type search
    pub skip_patch_dependencies: bool,
}

impl std::fmt::Debug for DependencyMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyMapper")
            .field("dependencies", &self.dependencies.len())
            .field("graph", &self.graph)
            .field("dependency_dirs", &self.dependency_dirs)
            .finish_non_exhaustive()
    }
}

impl DependencyMapper {
    /// Creates a mapper reading images through `source`
    #[must_use]
    pub fn new(source: Box<dyn ImageSource>) -> Self {
        Self {
            source,
            resolver: None,
            missing: None,
            dependencies: Vec::new(),
            cache: HashMap::new(),
            graph: BTreeMap::new(),
            dependency_dirs: Vec::new(),
            shared_library_dirs: Vec::new(),
            throw_on_missing: true,
            skip_patch_dependencies: true,
        }
    }

    /// Installs the assembly resolver used by steps 3 and 5
    pub fn set_resolver(&mut self, resolver: Box<dyn AssemblyResolver>) {
        self.resolver = Some(resolver);
    }

    /// Installs the missing-dependency callback used by step 7
    pub fn set_missing_resolver(&mut self, missing: MissingDependencyResolver) {
        self.missing = Some(missing);
    }

    /// The image source
    #[must_use]
    pub fn source(&self) -> &dyn ImageSource {
        self.source.as_ref()
    }

    /// Adds a dependency directory unless it is already known
    pub fn add_dependency_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.dependency_dirs.contains(&dir) {
            self.dependency_dirs.push(dir);
        }
    }

    /// Registers a working-set image in the load cache so references to it are not
    /// loaded a second time
    pub fn register_working_image(&mut self, key: ImageKey, image: &Image) {
        self.cache.insert(image.identity.display_name(), key);
        self.cache.insert(image.identity.name.clone(), key);
    }

    /// Loaded dependency images
    #[must_use]
    pub fn dependencies(&self) -> &[Image] {
        &self.dependencies
    }

    /// Direct dependencies of `key`, if it was mapped
    #[must_use]
    pub fn dependencies_of(&self, key: ImageKey) -> Option<&[ImageKey]> {
        self.graph.get(&key).map(Vec::as_slice)
    }

    /// Every mapped image and its direct dependencies
    #[must_use]
    pub fn graph(&self) -> &BTreeMap<ImageKey, Vec<ImageKey>> {
        &self.graph
    }

    /// Looks an image up in the load cache by simple or full name
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<ImageKey> {
        self.cache.get(name).copied()
    }

    /// Resolves a key to its image
    #[must_use]
    pub fn image<'a>(&'a self, set: WorkingSet<'a>, key: ImageKey) -> Option<&'a Image> {
        match key {
            ImageKey::Base => Some(set.base),
            ImageKey::Mod(index) => set.mods.get(index),
            ImageKey::Dependency(index) => self.dependencies.get(index),
        }
    }

    /// Drops every loaded dependency and the whole graph
    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.cache.clear();
        self.graph.clear();
    }

    /// Maps the dependencies of a working-set image, recursing into every newly loaded one.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedDependency`] when a dependency cannot be found and
    /// throwing on missing dependencies is enabled, or any error raised while reading.
    pub fn map_dependencies(&mut self, key: ImageKey, image: &Image) -> Result<()> {
        if self.graph.contains_key(&key) {
            return Ok(());
        }
        self.graph.insert(key, Vec::new());
        self.map_references(
            key,
            &image.name,
            &image.runtime_version,
            &image.assembly_refs,
        )
    }

    fn map_loaded(&mut self, index: usize) -> Result<()> {
        let key = ImageKey::Dependency(index);
        if self.graph.contains_key(&key) {
            return Ok(());
        }
        self.graph.insert(key, Vec::new());
        let Some(image) = self.dependencies.get(index) else {
            return Err(structural_error!("Unknown dependency index {}", index));
        };
        let (name, runtime, refs) = (
            image.name.clone(),
            image.runtime_version.clone(),
            image.assembly_refs.clone(),
        );
        self.map_references(key, &name, &runtime, &refs)
    }

    fn map_references(
        &mut self,
        key: ImageKey,
        requester: &str,
        runtime: &str,
        refs: &[AssemblyIdentity],
    ) -> Result<()> {
        for reference in refs {
            self.map_dependency(key, requester, runtime, reference)?;
        }
        Ok(())
    }

    fn link(&mut self, from: ImageKey, to: ImageKey) {
        let edges = self.graph.entry(from).or_default();
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    fn lookup_cache(&self, key: &str, runtime: &str) -> Option<ImageKey> {
        self.cache
            .get(key)
            .or_else(|| self.cache.get(&format!("{key} [RT:{runtime}]")))
            .copied()
    }

    fn search_dirs(&self, name: &str) -> Option<PathBuf> {
        let lower = name.to_ascii_lowercase();
        let risky = lower.ends_with(".pdb") || lower.ends_with(".mdb");
        for dir in &self.dependency_dirs {
            let mut candidates = vec![
                dir.join(format!("{name}.dll")),
                dir.join(format!("{name}.exe")),
            ];
            if !risky {
                candidates.push(dir.join(name));
            }
            if let Some(found) = candidates.into_iter().find(|path| self.source.exists(path)) {
                return Some(found);
            }
        }
        None
    }

    fn search_shared(&self, name: &str) -> Result<Option<PathBuf>> {
        for root in &self.shared_library_dirs {
            let dir = root.join(name);
            if !self.source.dir_exists(&dir) {
                continue;
            }
            let versions = self.source.list_dirs(&dir)?;
            let highest = versions
                .iter()
                .filter_map(|path| {
                    let file_name = path.file_name()?.to_string_lossy().into_owned();
                    leading_number(&file_name).map(|number| (number, path))
                })
                .max_by_key(|(number, _)| *number)
                .map(|(_, path)| path)
                .or_else(|| versions.first());
            return Ok(highest.map(|version| version.join(format!("{name}.dll"))));
        }
        Ok(None)
    }

    fn resolve(&mut self, requester: &str, reference: &AssemblyIdentity) -> Result<Option<Image>> {
        let name = reference.name.as_str();
        let full_name = reference.display_name();

        if let Some(path) = self.search_dirs(name) {
            log::debug!("[MapDependency] {requester} -> {name} found at {}", path.display());
            return self.source.read(&path).map(Some);
        }

        if let Some(image) = self.resolver.as_ref().and_then(|r| r.resolve(reference)) {
            return Ok(Some(image));
        }

        if let Some(path) = self.search_shared(name)? {
            if self.source.exists(&path) {
                log::debug!("[MapDependency] {requester} -> {name} found in shared libraries");
                return self.source.read(&path).map(Some);
            }
        }

        let synthesized = AssemblyIdentity::parse(&full_name).map_or_else(
            |_| AssemblyIdentity::new(name, AssemblyVersion::default()),
            |mut parsed| {
                parsed.version = AssemblyVersion::default();
                parsed
            },
        );
        if let Some(image) = self.resolver.as_ref().and_then(|r| r.resolve(&synthesized)) {
            return Ok(Some(image));
        }

        if let Some(path) = self
            .resolver
            .as_ref()
            .and_then(|r| r.reflection_only_load(&full_name))
        {
            if self.source.exists(&path) {
                return self.source.read(&path).map(Some);
            }
        }

        Ok(self
            .missing
            .as_mut()
            .and_then(|missing| missing(requester, name, Some(&full_name))))
    }

    fn map_dependency(
        &mut self,
        from: ImageKey,
        requester: &str,
        runtime: &str,
        reference: &AssemblyIdentity,
    ) -> Result<()> {
        let name = reference.name.as_str();
        let full_name = reference.display_name();

        if let Some(key) = self
            .lookup_cache(&full_name, runtime)
            .or_else(|| self.lookup_cache(name, runtime))
        {
            log::debug!("[MapDependency] {requester} -> {name} from cache");
            self.link(from, key);
            if let ImageKey::Dependency(index) = key {
                self.map_loaded(index)?;
            }
            return Ok(());
        }

        let Some(image) = self.resolve(requester, reference)? else {
            if self.throw_on_missing {
                return Err(Error::UnresolvedDependency {
                    requester: requester.to_string(),
                    name: name.to_string(),
                    full_name,
                });
            }
            log::warn!("[MapDependency] {requester} -> {full_name} not found, skipping");
            return Ok(());
        };

        let index = self.dependencies.len();
        let key = ImageKey::Dependency(index);
        log::debug!("[MapDependency] {requester} -> {} loaded", image.name);
        self.cache.insert(full_name, key);
        self.cache.insert(name.to_string(), key);
        self.cache.insert(image.identity.display_name(), key);
        self.cache.insert(
            image.identity.runtime_qualified_name(&image.runtime_version),
            key,
        );
        self.dependencies.push(image);
        self.link(from, key);
        self.map_loaded(index)
    }

    fn find_in(
        &self,
        set: WorkingSet<'_>,
        key: ImageKey,
        full_name: &str,
        crawled: &mut HashSet<ImageKey>,
    ) -> Option<TypeSig> {
        let image = self.image(set, key)?;
        if let Some(found) = image.find_type(full_name) {
            return image.type_sig(found).ok();
        }
        if full_name.starts_with("<PrivateImplementationDetails>/") || !crawled.insert(key) {
            return None;
        }
        for &dependency in self.graph.get(&key)? {
            let Some(dep_image) = self.image(set, dependency) else {
                continue;
            };
            if self.skip_patch_dependencies
                && dep_image.identity.name.ends_with(PATCH_ASSEMBLY_SUFFIX)
            {
                continue;
            }
            if let Some(found) = self.find_in(set, dependency, full_name, crawled) {
                return Some(found);
            }
        }
        None
    }

    /// Finds a type by full name in the base image and its dependency graph, then in the
    /// dependencies of every patch image.
    ///
    /// Returns the type reference, scoped to the image that declares it.
    #[must_use]
    pub fn find_type_deep(&self, set: WorkingSet<'_>, full_name: &str) -> Option<TypeSig> {
        let mut crawled = HashSet::new();
        if let Some(found) = self.find_in(set, ImageKey::Base, full_name, &mut crawled) {
            return Some(found);
        }

        let mut crawled = HashSet::new();
        for index in 0..set.mods.len() {
            for &dependency in self.graph.get(&ImageKey::Mod(index)).into_iter().flatten() {
                if let Some(found) = self.find_in(set, dependency, full_name, &mut crawled) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Identity of the image that owns `scope`, searching the working set and dependencies
    #[must_use]
    pub fn identity_of(&self, set: WorkingSet<'_>, scope: &str) -> Option<AssemblyIdentity> {
        let key = self.cached(scope)?;
        self.image(set, key).map(|image| image.identity.clone())
    }
}

fn leading_number(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Returns true when `file_name` is a patch image of the module `base_name` (`Game.exe`):
/// it starts with the module name, with or without spaces, and ends in `.mm.dll`
#[must_use]
pub fn is_mod_file(base_name: &str, file_name: &str) -> bool {
    let stem = Path::new(base_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let spaceless = stem.replace(' ', "");
    (file_name.starts_with(&stem) || file_name.starts_with(&spaceless))
        && file_name.to_ascii_lowercase().ends_with(".mm.dll")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::source::MemorySource;
    use crate::metadata::builder::{ImageBuilder, TypeBuilder};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn lib(name: &str, refs: &[&str]) -> Image {
        let mut builder = ImageBuilder::new(name, AssemblyVersion::new(1, 0, 0, 0));
        for r in refs {
            builder.reference(AssemblyIdentity::new(*r, AssemblyVersion::new(1, 0, 0, 0)));
        }
        builder.add_type(TypeBuilder::class(name, "Api")).unwrap();
        let mut image = builder.build();
        image.assembly_refs.retain(|r| r.name != "mscorlib");
        image
    }

    #[test]
    fn test_maps_transitively_and_once() {
        let mut source = MemorySource::new();
        source.insert_in("/deps", lib("A", &["B"]));
        source.insert_in("/deps", lib("B", &["A"]));
        let mut mapper = DependencyMapper::new(Box::new(source));
        mapper.add_dependency_dir("/deps");

        let base = lib("Game", &["A", "B"]);
        mapper.register_working_image(ImageKey::Base, &base);
        mapper.map_dependencies(ImageKey::Base, &base).unwrap();

        assert_eq!(mapper.dependencies().len(), 2);
        assert_eq!(
            mapper.dependencies_of(ImageKey::Base),
            Some(&[ImageKey::Dependency(0), ImageKey::Dependency(1)][..])
        );
        assert_eq!(
            mapper.dependencies_of(ImageKey::Dependency(1)),
            Some(&[ImageKey::Dependency(0)][..])
        );
    }

    #[test]
    fn test_missing_dependency_policy() {
        let base = lib("Game", &["Nowhere"]);

        let mut strict = DependencyMapper::new(Box::new(MemorySource::new()));
        let err = strict.map_dependencies(ImageKey::Base, &base).unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency { ref name, .. } if name == "Nowhere"));

        let mut lenient = DependencyMapper::new(Box::new(MemorySource::new()));
        lenient.throw_on_missing = false;
        lenient.map_dependencies(ImageKey::Base, &base).unwrap();
        assert_eq!(lenient.dependencies_of(ImageKey::Base), Some(&[][..]));
    }

    #[test]
    fn test_missing_callback_supplies_image() {
        let asked = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&asked);
        let mut mapper = DependencyMapper::new(Box::new(MemorySource::new()));
        mapper.set_missing_resolver(Box::new(move |requester, name, _| {
            seen.borrow_mut().push(format!("{requester}:{name}"));
            Some(lib(name, &[]))
        }));

        let base = lib("Game", &["Extra"]);
        mapper.map_dependencies(ImageKey::Base, &base).unwrap();
        assert_eq!(asked.borrow().as_slice(), &["Game.dll:Extra".to_string()]);
        assert_eq!(mapper.cached("Extra"), Some(ImageKey::Dependency(0)));
    }

    #[test]
    fn test_shared_dirs_pick_highest_version() {
        let mut source = MemorySource::new();
        let mut old = lib("Shared", &[]);
        old.identity.version = AssemblyVersion::new(2, 0, 0, 0);
        source.insert("/gac/Shared/2.0_abc/Shared.dll", old);
        source.insert("/gac/Shared/10.0_abc/Shared.dll", lib("Shared", &[]));
        let mut mapper = DependencyMapper::new(Box::new(source));
        mapper.shared_library_dirs.push(PathBuf::from("/gac"));

        let base = lib("Game", &["Shared"]);
        mapper.map_dependencies(ImageKey::Base, &base).unwrap();
        assert_eq!(
            mapper.dependencies()[0].identity.version,
            AssemblyVersion::new(1, 0, 0, 0)
        );
    }

    #[test]
    fn test_find_type_deep_skips_patch_images() {
        let mut source = MemorySource::new();
        source.insert_in("/deps", lib("Lib", &[]));
        source.insert_in("/deps", lib("Helper.mm", &[]));
        let mut mapper = DependencyMapper::new(Box::new(source));
        mapper.add_dependency_dir("/deps");

        let base = lib("Game", &["Lib", "Helper.mm"]);
        mapper.map_dependencies(ImageKey::Base, &base).unwrap();
        let set = WorkingSet {
            base: &base,
            mods: &[],
        };

        let found = mapper.find_type_deep(set, "Lib.Api").unwrap();
        assert_eq!(found.definition().map(|d| d.scope.as_str()), Some("Lib"));
        assert!(mapper.find_type_deep(set, "Helper.mm.Api").is_none());
        assert!(mapper.find_type_deep(set, "Game.Api").is_some());
    }

    #[test]
    fn test_is_mod_file() {
        assert!(is_mod_file("Celeste.exe", "Celeste.Everest.mm.dll"));
        assert!(is_mod_file("My Game.exe", "MyGame.Fix.mm.dll"));
        assert!(!is_mod_file("Celeste.exe", "Other.mm.dll"));
        assert!(!is_mod_file("Celeste.exe", "Celeste.Everest.dll"));
    }
}
