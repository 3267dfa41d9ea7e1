//! Filesystem executors, one per descriptor variant.
//!
//! Executors run on the blocking pool after validation and after the
//! dispatcher has claimed every touched path. Extraction is all-or-nothing:
//! files are written into a hidden staging directory beside the destination
//! and renamed into place only once every rendition has been written.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use santander_config::OutputPermissions;
use santander_ops::{OperationDescriptor, RenditionContent, RenditionRef};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{HelperError, HelperResult};
use crate::permissions::apply_permissions;

#[derive(Serialize)]
struct ColorFile {
    red: f64,
    green: f64,
    blue: f64,
    alpha: f64,
}

pub(crate) struct Executor {
    permissions: OutputPermissions,
}

impl Executor {
    pub(crate) const fn new(permissions: OutputPermissions) -> Self {
        Self { permissions }
    }

    /// Perform `descriptor`, returning the artifact path on success.
    pub(crate) fn run(&self, descriptor: &OperationDescriptor) -> HelperResult<Option<PathBuf>> {
        match descriptor {
            OperationDescriptor::ExtractCatalog {
                renditions,
                destination,
            } => self.extract_catalog(renditions, destination),
            OperationDescriptor::CreateDirectory { path } => {
                fs::create_dir(path)
                    .map_err(|source| HelperError::io("create_directory", path, source))?;
                apply_permissions(path, &self.permissions)?;
                Ok(Some(path.clone()))
            }
            OperationDescriptor::Copy {
                source,
                destination,
            } => {
                ensure_absent(destination)?;
                ensure_present(source)?;
                if let Err(err) = copy_tree(source, destination) {
                    discard(destination);
                    return Err(err);
                }
                apply_permissions(destination, &self.permissions)?;
                Ok(Some(destination.clone()))
            }
            OperationDescriptor::Move {
                source,
                destination,
            } => {
                ensure_absent(destination)?;
                ensure_present(source)?;
                move_tree(source, destination)?;
                Ok(Some(destination.clone()))
            }
            OperationDescriptor::Remove { path } => {
                remove_path(path)?;
                Ok(None)
            }
            _ => Err(HelperError::invalid(
                "operation",
                "unsupported_operation",
                Some(descriptor.kind().as_str().to_string()),
            )),
        }
    }

    fn extract_catalog(
        &self,
        renditions: &[RenditionRef],
        destination: &Path,
    ) -> HelperResult<Option<PathBuf>> {
        ensure_absent(destination)?;
        let staging = staging_path(destination)?;
        fs::create_dir(&staging)
            .map_err(|source| HelperError::io("extract.create_staging", &staging, source))?;

        let staged = renditions
            .iter()
            .try_for_each(|rendition| write_rendition(&staging, rendition))
            .and_then(|()| apply_permissions(&staging, &self.permissions))
            .and_then(|()| {
                fs::rename(&staging, destination)
                    .map_err(|source| HelperError::io("extract.publish", destination, source))
            });

        match staged {
            Ok(()) => {
                debug!(
                    destination = %destination.display(),
                    count = renditions.len(),
                    "renditions extracted"
                );
                Ok(Some(destination.to_path_buf()))
            }
            Err(err) => {
                discard(&staging);
                Err(err)
            }
        }
    }
}

fn staging_path(destination: &Path) -> HelperResult<PathBuf> {
    let parent = destination.parent().ok_or_else(|| {
        HelperError::invalid(
            "destination",
            "filesystem_root",
            Some(destination.display().to_string()),
        )
    })?;
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parent.join(format!(".{name}.partial-{}", Uuid::new_v4().simple())))
}

fn write_rendition(dir: &Path, rendition: &RenditionRef) -> HelperResult<()> {
    let path = dir.join(rendition.file_name());
    let bytes = match &rendition.content {
        RenditionContent::Image { data } | RenditionContent::Raw { data, .. } => data.clone(),
        RenditionContent::Color {
            red,
            green,
            blue,
            alpha,
        } => serde_json::to_vec_pretty(&ColorFile {
            red: *red,
            green: *green,
            blue: *blue,
            alpha: *alpha,
        })
        .map_err(|source| HelperError::Json {
            operation: "extract.encode_color",
            path: path.clone(),
            source,
        })?,
    };
    let mut file = File::create_new(&path)
        .map_err(|source| HelperError::io("extract.create_file", &path, source))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|source| HelperError::io("extract.write_file", &path, source))
}

fn ensure_absent(path: &Path) -> HelperResult<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Err(HelperError::io(
            "destination.check",
            path,
            io::Error::from(io::ErrorKind::AlreadyExists),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HelperError::io("destination.check", path, source)),
    }
}

fn ensure_present(path: &Path) -> HelperResult<()> {
    fs::symlink_metadata(path)
        .map(|_| ())
        .map_err(|source| HelperError::io("source.check", path, source))
}

fn copy_tree(source: &Path, destination: &Path) -> HelperResult<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|err| HelperError::walkdir("copy.walk", source, err))?;
        let relative = entry.path().strip_prefix(source).unwrap_or_else(|_| Path::new(""));
        let target = if relative.as_os_str().is_empty() {
            destination.to_path_buf()
        } else {
            destination.join(relative)
        };
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|err| HelperError::io("copy.read_link", entry.path(), err))?;
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|err| HelperError::io("copy.symlink", &target, err))?;
        } else if file_type.is_dir() {
            fs::create_dir(&target).map_err(|err| HelperError::io("copy.create_dir", &target, err))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|err| HelperError::io("copy.file", &target, err))?;
        }
    }
    Ok(())
}

fn move_tree(source: &Path, destination: &Path) -> HelperResult<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                "rename crosses devices; copying instead"
            );
            if let Err(copy_err) = copy_tree(source, destination) {
                discard(destination);
                return Err(copy_err);
            }
            remove_path(source)
        }
        Err(err) => Err(HelperError::io("move.rename", source, err)),
    }
}

fn remove_path(path: &Path) -> HelperResult<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|source| HelperError::io("remove.stat", path, source))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|source| HelperError::io("remove", path, source))
}

/// Best-effort removal of a partially written path.
fn discard(path: &Path) {
    if let Err(err) = remove_path(path)
        && err.error_kind() != santander_ops::ErrorKind::NotFound
    {
        warn!(
            path = %path.display(),
            error = %err.failure_message(),
            "failed to discard partial output"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use santander_ops::ErrorKind;
    use santander_test_support::fixtures::{Sandbox, entry_names};
    use santander_test_support::renditions;

    type TestResult<T> = anyhow::Result<T>;

    fn executor() -> Executor {
        Executor::new(OutputPermissions::default())
    }

    #[test]
    fn extraction_creates_destination_with_every_rendition() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        let destination = sandbox.path("Assets-Extracted");
        let descriptor = OperationDescriptor::extract_catalog(renditions::mixed(), &destination);

        let artifact = executor().run(&descriptor)?;
        assert_eq!(artifact.as_deref(), Some(destination.as_path()));
        assert_eq!(
            entry_names(&destination)?,
            vec!["AccentColor.json", "AppIcon.png", "Glyph.svg"]
        );
        assert_eq!(fs::read(destination.join("AppIcon.png"))?, renditions::PIXEL_PNG);

        let color: serde_json::Value =
            serde_json::from_slice(&fs::read(destination.join("AccentColor.json"))?)?;
        assert_eq!(color["blue"], 1.0);
        assert_eq!(entry_names(sandbox.root())?, vec!["Assets-Extracted"]);
        Ok(())
    }

    #[test]
    fn extraction_into_existing_destination_leaves_no_staging() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        let destination = sandbox.create_dir("taken")?;
        let descriptor = OperationDescriptor::extract_catalog(renditions::pair(), &destination);

        let err = executor()
            .run(&descriptor)
            .err()
            .ok_or_else(|| anyhow::anyhow!("existing destination must fail"))?;
        assert_eq!(err.error_kind(), ErrorKind::AlreadyExists);
        assert_eq!(entry_names(sandbox.root())?, vec!["taken"]);
        assert!(entry_names(&destination)?.is_empty());
        Ok(())
    }

    #[test]
    fn failed_extraction_discards_staging() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        let destination = sandbox.path("out");
        // Duplicate output names only reach the executor when validation is skipped.
        let descriptor = OperationDescriptor::extract_catalog(
            vec![renditions::image("A"), renditions::image("A")],
            &destination,
        );

        let err = executor()
            .run(&descriptor)
            .err()
            .ok_or_else(|| anyhow::anyhow!("duplicate file must fail"))?;
        assert_eq!(err.error_kind(), ErrorKind::AlreadyExists);
        assert!(entry_names(sandbox.root())?.is_empty());
        Ok(())
    }

    #[test]
    fn copy_preserves_tree_and_symlinks() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        sandbox.write_file("src/a.txt", b"alpha")?;
        sandbox.write_file("src/nested/b.txt", b"beta")?;
        std::os::unix::fs::symlink("a.txt", sandbox.path("src/link"))?;

        let descriptor = OperationDescriptor::copy(sandbox.path("src"), sandbox.path("dst"));
        executor().run(&descriptor)?;

        assert_eq!(fs::read(sandbox.path("dst/nested/b.txt"))?, b"beta");
        assert_eq!(fs::read_link(sandbox.path("dst/link"))?, PathBuf::from("a.txt"));
        assert_eq!(fs::read(sandbox.path("src/a.txt"))?, b"alpha");
        Ok(())
    }

    #[test]
    fn move_and_remove() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        sandbox.write_file("from/file.txt", b"x")?;

        executor().run(&OperationDescriptor::relocate(
            sandbox.path("from"),
            sandbox.path("to"),
        ))?;
        assert!(!sandbox.path("from").exists());
        assert_eq!(fs::read(sandbox.path("to/file.txt"))?, b"x");

        let removed = executor().run(&OperationDescriptor::remove(sandbox.path("to")))?;
        assert_eq!(removed, None);
        assert!(entry_names(sandbox.root())?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_sources_and_existing_targets_are_classified() -> TestResult<()> {
        let sandbox = Sandbox::new()?;
        let missing = executor()
            .run(&OperationDescriptor::copy(sandbox.path("nope"), sandbox.path("dst")))
            .err()
            .map(|err| err.error_kind());
        assert_eq!(missing, Some(ErrorKind::NotFound));

        sandbox.create_dir("dir")?;
        let exists = executor()
            .run(&OperationDescriptor::create_directory(sandbox.path("dir")))
            .err()
            .map(|err| err.error_kind());
        assert_eq!(exists, Some(ErrorKind::AlreadyExists));
        Ok(())
    }
}
