//! Explicit training manifests.
//!
//! A manifest lists every training image together with its class index. It is
//! built from a directory tree with one subdirectory per class, or from explicit
//! `(path, class name)` pairs, and has to pass [`Manifest::validate`] before any
//! training starts.
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// File extensions picked up when scanning class directories.
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// The classifier is binary.
pub const NUM_CLASSES: usize = 2;

/// Reasons a dataset is rejected.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("dataset directory does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("class directory name is not valid UTF-8: {0}")]
    InvalidClassName(PathBuf),

    #[error("expected exactly {expected} classes, found {found}: {names:?}")]
    ClassCount {
        expected: usize,
        found: usize,
        names: Vec<String>,
    },

    #[error("class '{0}' contains no images")]
    EmptyClass(String),

    #[error("image file does not exist: {0}")]
    MissingFile(PathBuf),
}

/// One labeled image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub label: usize,
}

/// Labeled image list with its class index mapping.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    classes: Vec<String>,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from a directory holding one subdirectory per class.
    ///
    /// Classes are visited in sorted name order and numbered in that order.
    pub fn from_directory(root: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ManifestError::MissingRoot(root.to_path_buf()));
        }

        let mut class_dirs = Vec::new();
        for entry in read_dir(root)? {
            let path = entry.path();
            if path.is_dir() {
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| ManifestError::InvalidClassName(path.clone()))?
                    .to_owned();
                class_dirs.push((name, path));
            }
        }
        class_dirs.sort();

        let mut classes = Vec::with_capacity(class_dirs.len());
        let mut entries = Vec::new();
        for (label, (name, dir)) in class_dirs.into_iter().enumerate() {
            let mut images: Vec<PathBuf> = read_dir(&dir)?
                .into_iter()
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && is_image(path))
                .collect();
            images.sort();

            log::debug!("Class {} ({}): {} images", label, &name, images.len());
            entries.extend(images.into_iter().map(|path| ManifestEntry { path, label }));
            classes.push(name);
        }

        Ok(Self { classes, entries })
    }

    /// Build a manifest from explicit `(path, class name)` pairs.
    ///
    /// Class indices follow the sorted order of the class names.
    pub fn from_entries<P, S>(pairs: impl IntoIterator<Item = (P, S)>) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        let pairs: Vec<(PathBuf, String)> = pairs
            .into_iter()
            .map(|(path, class)| (path.into(), class.into()))
            .collect();

        let classes: Vec<String> = pairs
            .iter()
            .map(|(_, class)| class.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let entries = pairs
            .into_iter()
            .filter_map(|(path, class)| {
                classes
                    .iter()
                    .position(|name| *name == class)
                    .map(|label| ManifestEntry { path, label })
            })
            .collect();

        Self { classes, entries }
    }

    /// Check that the manifest describes a usable binary dataset.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.classes.len() != NUM_CLASSES {
            return Err(ManifestError::ClassCount {
                expected: NUM_CLASSES,
                found: self.classes.len(),
                names: self.classes.clone(),
            });
        }

        let counts = self.class_counts();
        if let Some((name, _)) = counts.iter().find(|(_, count)| *count == 0) {
            return Err(ManifestError::EmptyClass(name.clone()));
        }

        if let Some(entry) = self.entries.iter().find(|entry| !entry.path.is_file()) {
            return Err(ManifestError::MissingFile(entry.path.clone()));
        }

        Ok(())
    }

    /// Mapping from class name to class index.
    pub fn class_indices(&self) -> BTreeMap<String, usize> {
        self.classes
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect()
    }

    /// Number of images per class, in class index order.
    pub fn class_counts(&self) -> Vec<(String, usize)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let count = self.entries.iter().filter(|e| e.label == index).count();
                (name.clone(), count)
            })
            .collect()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
