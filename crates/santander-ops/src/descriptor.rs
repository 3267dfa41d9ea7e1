//! The closed set of privileged mutations the helper understands.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rendition::RenditionRef;

/// Discriminator for [`OperationDescriptor`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Write renditions into a new directory.
    ExtractCatalog,
    /// Create one directory.
    CreateDirectory,
    /// Recursive copy.
    Copy,
    /// Rename or relocate.
    Move,
    /// Delete a file or tree.
    Remove,
}

impl OperationKind {
    /// Wire tag and metric label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExtractCatalog => "extract_catalog",
            Self::CreateDirectory => "create_directory",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Remove => "remove",
        }
    }

    /// Short progress title shown while the operation runs.
    #[must_use]
    pub const fn progress_title(self) -> &'static str {
        match self {
            Self::ExtractCatalog => "Extracting..",
            Self::CreateDirectory => "Creating..",
            Self::Copy => "Copying..",
            Self::Move => "Moving..",
            Self::Remove => "Removing..",
        }
    }
}

/// Immutable description of one privileged filesystem mutation.
///
/// Descriptors are values: once handed to a channel they are moved, never
/// mutated, and carry everything the helper needs without access to the
/// caller's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum OperationDescriptor {
    /// Write every rendition as one file inside a newly created directory.
    ExtractCatalog {
        /// Renditions to write, in order.
        renditions: Vec<RenditionRef>,
        /// Directory to create. Must not exist yet.
        destination: PathBuf,
    },
    /// Create a single directory whose parent already exists.
    CreateDirectory {
        /// Directory to create.
        path: PathBuf,
    },
    /// Copy a file or tree to a path that does not exist yet.
    Copy {
        /// Existing file or directory.
        source: PathBuf,
        /// New path.
        destination: PathBuf,
    },
    /// Move a file or tree to a path that does not exist yet.
    Move {
        /// Existing file or directory.
        source: PathBuf,
        /// New path.
        destination: PathBuf,
    },
    /// Remove a file or a directory tree.
    Remove {
        /// Path to delete.
        path: PathBuf,
    },
}

impl OperationDescriptor {
    /// Extraction of `renditions` into `destination`.
    #[must_use]
    pub fn extract_catalog(renditions: Vec<RenditionRef>, destination: impl Into<PathBuf>) -> Self {
        Self::ExtractCatalog {
            renditions,
            destination: destination.into(),
        }
    }

    /// Creation of the directory at `path`.
    #[must_use]
    pub fn create_directory(path: impl Into<PathBuf>) -> Self {
        Self::CreateDirectory { path: path.into() }
    }

    /// Copy from `source` to `destination`.
    #[must_use]
    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Copy {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Move from `source` to `destination`.
    #[must_use]
    pub fn relocate(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::Move {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Removal of `path`.
    #[must_use]
    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self::Remove { path: path.into() }
    }

    /// Variant discriminator.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::ExtractCatalog { .. } => OperationKind::ExtractCatalog,
            Self::CreateDirectory { .. } => OperationKind::CreateDirectory,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
            Self::Remove { .. } => OperationKind::Remove,
        }
    }

    /// Every path the operation reads from or writes to.
    ///
    /// The helper serialises operations whose touched paths are equal or
    /// nested, so copies lock their source as well as their destination.
    #[must_use]
    pub fn touched_paths(&self) -> Vec<&Path> {
        match self {
            Self::ExtractCatalog { destination, .. } => vec![destination.as_path()],
            Self::CreateDirectory { path } | Self::Remove { path } => vec![path.as_path()],
            Self::Copy {
                source,
                destination,
            }
            | Self::Move {
                source,
                destination,
            } => vec![source.as_path(), destination.as_path()],
        }
    }

    /// Path reported back to the caller when the operation succeeds.
    #[must_use]
    pub fn artifact(&self) -> Option<&Path> {
        match self {
            Self::ExtractCatalog { destination, .. }
            | Self::Copy { destination, .. }
            | Self::Move { destination, .. } => Some(destination.as_path()),
            Self::CreateDirectory { path } => Some(path.as_path()),
            Self::Remove { .. } => None,
        }
    }
}
