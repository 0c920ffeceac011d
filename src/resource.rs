//! Resource-root file resolution for SETUP (spec.md §4.3).
//!
//! The request-URI names a file that must live under the server's
//! configured resource root. Both an escape attempt (`..` components) and
//! a nonexistent file surface as a `404` to the RTSP peer (spec.md §7), but
//! are distinguished internally so logs show which one happened.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::url::RtspUrl;

/// Resolve a request-URI to a file under `root`.
pub fn resolve(root: &Path, request_uri: &str) -> Result<PathBuf> {
    let relative = request_path(request_uri);

    let mut candidate = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        match Path::new(segment).components().next() {
            Some(Component::ParentDir) | Some(Component::RootDir) | Some(Component::Prefix(_)) => {
                return Err(Error::PathEscape(request_uri.to_string()));
            }
            _ => candidate.push(segment),
        }
    }

    if !candidate.starts_with(root) {
        return Err(Error::PathEscape(request_uri.to_string()));
    }
    if !candidate.is_file() {
        return Err(Error::ResourceNotFound(request_uri.to_string()));
    }
    Ok(candidate)
}

/// Extract the path component of a request-URI, tolerating bare paths
/// (`*` or relative paths some clients send instead of a full URL).
fn request_path(uri: &str) -> String {
    match RtspUrl::parse(uri) {
        Ok(url) => url.path,
        Err(_) => uri.to_string(),
    }
}
