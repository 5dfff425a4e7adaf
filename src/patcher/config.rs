//! Configuration of a patch run.

use std::{collections::HashSet, path::PathBuf};

use crate::loader::SymbolFormat;

/// Behavior flags and search paths of a [`crate::patcher::Patcher`].
///
/// All setters consume and return the configuration so it can be assembled in one
/// expression. The defaults are lenient about relink targets but fail on missing
/// dependencies, and clean the directive attributes out of the output.
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::PatcherConfig;
///
/// let config = PatcherConfig::default()
///     .strict(true)
///     .dependency_dir("/game/Managed")
///     .prevent_inline(true)
///     .skip("Game.Secret");
/// ```
#[derive(Debug, Clone)]
pub struct PatcherConfig {
    /// Unresolved relink targets abort the run instead of being left untouched
    pub strict: bool,
    /// Missing dependencies abort the run
    pub missing_dependency_throw: bool,
    /// Run the cleanup pass during post-processing
    pub cleanup: bool,
    /// Cleanup also removes the marker types and every reference to the directive library
    pub cleanup_all: bool,
    /// Mark every method with a body as not inlinable
    pub prevent_inline: bool,
    /// Debug-level tracing of every merge decision
    pub verbose: bool,
    /// Drop assembly references to patch images from the output
    pub remove_patch_references: bool,
    /// Keep only the highest versioned core library reference
    pub dedupe_core_library: bool,
    /// Cache relink map hits
    pub relinker_cache: bool,
    /// Directories searched for dependencies
    pub dependency_dirs: Vec<PathBuf>,
    /// Shared library install roots, laid out as `<root>/<name>/<version>/<name>.dll`
    pub shared_library_dirs: Vec<PathBuf>,
    /// Debug symbol format handed to the image sink
    pub symbol_format: SymbolFormat,
    /// Type full names, `Type::field` keys and method findable ids that are never merged
    pub skip_list: HashSet<String>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            strict: false,
            missing_dependency_throw: true,
            cleanup: true,
            cleanup_all: false,
            prevent_inline: false,
            verbose: false,
            remove_patch_references: true,
            dedupe_core_library: true,
            relinker_cache: true,
            dependency_dirs: Vec::new(),
            shared_library_dirs: Vec::new(),
            symbol_format: SymbolFormat::Auto,
            skip_list: HashSet::new(),
        }
    }
}

impl PatcherConfig {
    /// Creates the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes unresolved relink targets fatal
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Makes missing dependencies fatal
    #[must_use]
    pub fn missing_dependency_throw(mut self, throw: bool) -> Self {
        self.missing_dependency_throw = throw;
        self
    }

    /// Enables the cleanup pass
    #[must_use]
    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Makes cleanup remove the marker types as well
    #[must_use]
    pub fn cleanup_all(mut self, all: bool) -> Self {
        self.cleanup_all = all;
        self
    }

    /// Forbids inlining of every method with a body
    #[must_use]
    pub fn prevent_inline(mut self, prevent: bool) -> Self {
        self.prevent_inline = prevent;
        self
    }

    /// Enables debug-level tracing
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Controls whether references to patch images are dropped from the output
    #[must_use]
    pub fn remove_patch_references(mut self, remove: bool) -> Self {
        self.remove_patch_references = remove;
        self
    }

    /// Controls duplicate core library reference removal
    #[must_use]
    pub fn dedupe_core_library(mut self, dedupe: bool) -> Self {
        self.dedupe_core_library = dedupe;
        self
    }

    /// Controls the relink cache
    #[must_use]
    pub fn relinker_cache(mut self, cache: bool) -> Self {
        self.relinker_cache = cache;
        self
    }

    /// Adds a dependency search directory
    #[must_use]
    pub fn dependency_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dependency_dirs.push(dir.into());
        self
    }

    /// Adds a shared library install root
    #[must_use]
    pub fn shared_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_library_dirs.push(dir.into());
        self
    }

    /// Sets the debug symbol format
    #[must_use]
    pub fn symbol_format(mut self, format: SymbolFormat) -> Self {
        self.symbol_format = format;
        self
    }

    /// Adds an entry to the skip list
    #[must_use]
    pub fn skip(mut self, key: impl Into<String>) -> Self {
        self.skip_list.insert(key.into());
        self
    }

    /// Returns true when `key` is on the skip list
    #[must_use]
    pub fn is_skipped(&self, key: &str) -> bool {
        self.skip_list.contains(key)
    }
}
