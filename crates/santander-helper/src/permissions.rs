//! Mode and ownership post-processing for created paths.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::unistd::{Gid, Group, Uid, User, chown};
use santander_config::OutputPermissions;
use walkdir::WalkDir;

use crate::error::{HelperError, HelperResult};

/// Apply `permissions` to `root` and everything below it. Symlinks are left
/// alone because chmod and chown would follow them.
pub(crate) fn apply_permissions(root: &Path, permissions: &OutputPermissions) -> HelperResult<()> {
    if permissions.is_empty() {
        return Ok(());
    }
    let uid = permissions.owner.as_deref().map(resolve_owner).transpose()?;
    let gid = permissions.group.as_deref().map(resolve_group).transpose()?;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|source| HelperError::walkdir("permissions.walk", root, source))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        let mode = if file_type.is_dir() {
            permissions.dir_mode
        } else {
            permissions.file_mode
        };
        if let Some(mode) = mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .map_err(|source| HelperError::io("permissions.chmod", path, source))?;
        }
        if uid.is_some() || gid.is_some() {
            chown(path, uid, gid).map_err(|source| HelperError::nix("permissions.chown", path, source))?;
        }
    }
    Ok(())
}

fn resolve_owner(spec: &str) -> HelperResult<Uid> {
    let trimmed = spec.trim();
    if let Ok(id) = trimmed.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    match User::from_name(trimmed) {
        Ok(Some(user)) => Ok(user.uid),
        Ok(None) => Err(HelperError::UserLookup {
            user: trimmed.to_string(),
            source: None,
        }),
        Err(source) => Err(HelperError::UserLookup {
            user: trimmed.to_string(),
            source: Some(source),
        }),
    }
}

fn resolve_group(spec: &str) -> HelperResult<Gid> {
    let trimmed = spec.trim();
    if let Ok(id) = trimmed.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    match Group::from_name(trimmed) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(HelperError::GroupLookup {
            group: trimmed.to_string(),
            source: None,
        }),
        Err(source) => Err(HelperError::GroupLookup {
            group: trimmed.to_string(),
            source: Some(source),
        }),
    }
}
