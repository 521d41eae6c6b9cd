use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path is not absolute")]
    NotAbsolute,
    #[error("path contains unsupported component")]
    UnsupportedComponent,
    #[error("path is outside the folder root")]
    OutsideRoot,
}

/// Maps an absolute local path to its `/`-joined path below `local_root`.
pub fn relative_path_for(local_root: &Path, path: &Path) -> Result<String, PathError> {
    if path.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    if !path.is_absolute() {
        return Err(PathError::NotAbsolute);
    }
    let rest = path
        .strip_prefix(local_root)
        .map_err(|_| PathError::OutsideRoot)?;

    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => {
                parts.push(part.to_str().ok_or(PathError::UnsupportedComponent)?);
            }
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Remote paths carry no leading slash: `Photos/2024/a.jpg`.
pub fn remote_path_for(remote_prefix: &str, relative: &str) -> String {
    let prefix = remote_prefix.trim_matches('/');
    let relative = relative.trim_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

/// Parent collection of a remote path, `/` for items at the remote root.
pub fn collection_path_for(remote_path: &str) -> String {
    let mut parts: Vec<&str> = remote_path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 {
        parts.pop();
        parts.join("/")
    } else {
        "/".to_string()
    }
}

/// Inverse of [`remote_path_for`]; `None` when `remote_path` lies outside the prefix.
pub fn relative_from_remote(remote_prefix: &str, remote_path: &str) -> Option<String> {
    let prefix = remote_prefix.trim_matches('/');
    let remote = remote_path.trim_matches('/');
    if prefix.is_empty() {
        return Some(remote.to_string());
    }
    if remote == prefix {
        return Some(String::new());
    }
    remote
        .strip_prefix(prefix)?
        .strip_prefix('/')
        .map(str::to_string)
}

pub fn parent_of(relative: &str) -> &str {
    relative
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}
