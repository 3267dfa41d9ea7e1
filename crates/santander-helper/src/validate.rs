//! Request checks performed before any filesystem mutation.
//!
//! # Design
//! - Validation only reads metadata; it never creates, moves or deletes.
//! - Paths must be absolute, free of `..`, and inside an allowed root both
//!   lexically and after resolving symlinks in their existing ancestors.
//! - An empty root list allows nothing.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use santander_ops::{OperationDescriptor, RenditionContent, RenditionRef};

use crate::error::{HelperError, HelperResult};

pub(crate) fn validate(descriptor: &OperationDescriptor, roots: &[PathBuf]) -> HelperResult<()> {
    if roots.is_empty() {
        return Err(HelperError::invalid(
            "allowed_roots",
            "no_roots_configured",
            None,
        ));
    }
    match descriptor {
        OperationDescriptor::ExtractCatalog {
            renditions,
            destination,
        } => {
            check_path("destination", destination, roots)?;
            check_renditions(renditions)
        }
        OperationDescriptor::CreateDirectory { path } => check_path("path", path, roots),
        OperationDescriptor::Copy {
            source,
            destination,
        } => check_transfer(source, destination, roots),
        OperationDescriptor::Move {
            source,
            destination,
        } => {
            check_not_root("source", source, roots)?;
            check_transfer(source, destination, roots)
        }
        OperationDescriptor::Remove { path } => {
            check_not_root("path", path, roots)?;
            check_path("path", path, roots)
        }
        _ => Err(HelperError::invalid(
            "operation",
            "unsupported_operation",
            Some(descriptor.kind().as_str().to_string()),
        )),
    }
}

fn check_path(field: &'static str, path: &Path, roots: &[PathBuf]) -> HelperResult<()> {
    let shown = || Some(path.display().to_string());
    if !path.is_absolute() {
        return Err(HelperError::invalid(field, "not_absolute", shown()));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir | Component::CurDir))
    {
        return Err(HelperError::invalid(field, "path_traversal", shown()));
    }
    if path.file_name().is_none() {
        return Err(HelperError::invalid(field, "filesystem_root", shown()));
    }
    if !roots.iter().any(|root| path.starts_with(root)) {
        return Err(HelperError::invalid(field, "outside_allowed_roots", shown()));
    }

    // The final component is not resolved so links themselves can be removed
    // or renamed; everything above it must still land inside a root.
    let parent = path.parent().unwrap_or(path);
    let resolved = resolve_existing(parent);
    let inside = roots.iter().any(|root| {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        resolved.starts_with(&canonical_root)
    });
    if !inside {
        return Err(HelperError::invalid(field, "escapes_allowed_roots", shown()));
    }
    Ok(())
}

/// Key a touched path is locked under: the resolved parent joined with the
/// unresolved final component, so symlinked aliases of one directory collide.
pub(crate) fn lock_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => resolve_existing(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Canonical form of the nearest existing ancestor, with the missing tail
/// re-appended.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, part| resolved.join(part));
        }
        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name);
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn check_transfer(source: &Path, destination: &Path, roots: &[PathBuf]) -> HelperResult<()> {
    check_path("source", source, roots)?;
    check_path("destination", destination, roots)?;
    if source == destination {
        return Err(HelperError::invalid(
            "destination",
            "same_as_source",
            Some(destination.display().to_string()),
        ));
    }
    if destination.starts_with(source) {
        return Err(HelperError::invalid(
            "destination",
            "inside_source",
            Some(destination.display().to_string()),
        ));
    }
    Ok(())
}

fn check_not_root(field: &'static str, path: &Path, roots: &[PathBuf]) -> HelperResult<()> {
    if roots.iter().any(|root| root == path) {
        return Err(HelperError::invalid(
            field,
            "allowed_root",
            Some(path.display().to_string()),
        ));
    }
    Ok(())
}

fn check_renditions(renditions: &[RenditionRef]) -> HelperResult<()> {
    if renditions.is_empty() {
        return Err(HelperError::invalid("renditions", "empty", None));
    }
    let mut seen = HashSet::with_capacity(renditions.len());
    for rendition in renditions {
        check_component("renditions.name", &rendition.name)?;
        match &rendition.content {
            RenditionContent::Color {
                red,
                green,
                blue,
                alpha,
            } => {
                let in_range = [red, green, blue, alpha]
                    .iter()
                    .all(|component| component.is_finite() && (0.0..=1.0).contains(*component));
                if !in_range {
                    return Err(HelperError::invalid(
                        "renditions.content",
                        "color_out_of_range",
                        Some(rendition.name.clone()),
                    ));
                }
            }
            RenditionContent::Raw {
                extension: Some(extension),
                ..
            } => check_component("renditions.extension", extension)?,
            RenditionContent::Image { .. } | RenditionContent::Raw { extension: None, .. } => {}
        }
        let file_name = rendition.file_name();
        // Catalog volumes are case-insensitive by default.
        if !seen.insert(file_name.to_lowercase()) {
            return Err(HelperError::invalid(
                "renditions.name",
                "duplicate_output",
                Some(file_name),
            ));
        }
    }
    Ok(())
}

fn check_component(field: &'static str, value: &str) -> HelperResult<()> {
    let mut components = Path::new(value).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(part)) if part == value)
        && components.next().is_none();
    if value.is_empty() || value.contains('\0') || !single_normal {
        return Err(HelperError::invalid(
            field,
            "not_a_file_name",
            Some(value.to_string()),
        ));
    }
    Ok(())
}
