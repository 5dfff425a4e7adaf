//! Collaborators that read, resolve and write images.
//!
//! Decoding and encoding the binary container is not done by this crate. Callers plug in
//! an [`ImageSource`] that turns a path into an [`Image`], optionally an
//! [`AssemblyResolver`], and an [`ImageSink`] that receives the patched output. The
//! in-memory implementations here back the tests and any caller that already holds images.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    metadata::{identity::AssemblyIdentity, image::Image},
    Error, Result,
};

/// Debug symbol format written next to an output image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
pub enum SymbolFormat {
    /// Whatever the input carried
    #[default]
    Auto,
    /// Mono symbol files
    Mdb,
    /// Portable or Windows PDB
    Pdb,
}

/// Reads images from paths and answers file system queries for dependency search.
///
/// The file system queries default to `std::fs`; only [`ImageSource::read`] is required.
pub trait ImageSource {
    /// Reads the image stored at `path`.
    ///
    /// # Errors
    /// Returns an error if the file is missing or is not a valid image.
    fn read(&self, path: &Path) -> Result<Image>;

    /// Returns true when `path` names an existing file
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Returns true when `path` names an existing directory
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    /// Immediate subdirectories of `path`, sorted.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Files directly inside `path`, sorted.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Locates assemblies the directory search could not find
pub trait AssemblyResolver {
    /// Resolves an assembly reference to a loaded image
    fn resolve(&self, reference: &AssemblyIdentity) -> Option<Image>;

    /// Locates an installed assembly by full display name without loading it
    fn reflection_only_load(&self, _full_name: &str) -> Option<PathBuf> {
        None
    }
}

/// Receives the patched output image
pub trait ImageSink {
    /// Writes `image` with the requested symbol format.
    ///
    /// # Errors
    /// Returns an error if the image cannot be written.
    fn write(&mut self, image: &Image, symbols: SymbolFormat) -> Result<()>;
}

/// An [`ImageSource`] over images held in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    images: BTreeMap<PathBuf, Image>,
}

impl MemorySource {
    /// Creates an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `image` at `path`
    pub fn insert(&mut self, path: impl Into<PathBuf>, image: Image) -> &mut Self {
        self.images.insert(path.into(), image);
        self
    }

    /// Stores `image` as `<dir>/<image.name>` and returns the full path
    pub fn insert_in(&mut self, dir: impl AsRef<Path>, image: Image) -> PathBuf {
        let path = dir.as_ref().join(&image.name);
        self.images.insert(path.clone(), image);
        path
    }
}

impl ImageSource for MemorySource {
    fn read(&self, path: &Path) -> Result<Image> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Error(format!("No image at {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.images.contains_key(path)
    }

    fn dir_exists(&self, path: &Path) -> bool {
        self.images.keys().any(|file| file.starts_with(path) && file != path)
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs: Vec<PathBuf> = self
            .images
            .keys()
            .filter_map(|file| {
                let relative = file.strip_prefix(path).ok()?;
                let mut components = relative.components();
                let first = components.next()?;
                components.next().map(|_| path.join(first))
            })
            .collect();
        dirs.dedup();
        Ok(dirs)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .images
            .keys()
            .filter(|file| file.parent() == Some(path))
            .cloned()
            .collect())
    }
}

/// An [`ImageSink`] that keeps every written image
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Written images with the symbol format they were written with
    pub written: Vec<(Image, SymbolFormat)>,
}

impl MemorySink {
    /// Creates an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently written image
    #[must_use]
    pub fn last(&self) -> Option<&Image> {
        self.written.last().map(|(image, _)| image)
    }
}

impl ImageSink for MemorySink {
    fn write(&mut self, image: &Image, symbols: SymbolFormat) -> Result<()> {
        self.written.push((image.clone(), symbols));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::AssemblyVersion;

    fn image(name: &str) -> Image {
        Image::new(AssemblyIdentity::new(name, AssemblyVersion::new(1, 0, 0, 0)))
    }

    #[test]
    fn test_memory_source_queries() {
        let mut source = MemorySource::new();
        source.insert("/gac/Lib/1.0/Lib.dll", image("Lib"));
        source.insert("/gac/Lib/2.0/Lib.dll", image("Lib"));
        let path = source.insert_in("/game", image("Game"));

        assert_eq!(path, PathBuf::from("/game/Game.dll"));
        assert!(source.exists(&path));
        assert!(!source.exists(Path::new("/game/Other.dll")));
        assert!(source.dir_exists(Path::new("/gac/Lib")));
        assert!(!source.dir_exists(Path::new("/gac/Missing")));
        assert_eq!(
            source.list_dirs(Path::new("/gac/Lib")).unwrap(),
            vec![PathBuf::from("/gac/Lib/1.0"), PathBuf::from("/gac/Lib/2.0")]
        );
        assert_eq!(source.list_files(Path::new("/game")).unwrap(), vec![path]);
        assert!(source.read(Path::new("/nowhere.dll")).is_err());
    }

    #[test]
    fn test_memory_sink_keeps_images() {
        let mut sink = MemorySink::new();
        sink.write(&image("Game"), SymbolFormat::Pdb).unwrap();
        assert_eq!(sink.last().map(|i| i.name.as_str()), Some("Game.dll"));
        assert_eq!(sink.written[0].1, SymbolFormat::Pdb);
    }
}
