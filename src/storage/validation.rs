//! Path validation
//!
//! Maps a user and a logical path to a location inside that user's storage
//! root. Every path the store touches goes through [`PathResolver::resolve`].

use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

use crate::config::USER_PLACEHOLDER;
use crate::error::PathError;

/// Directory inside each user root that holds in-flight uploads.
pub const STAGING_DIR: &str = ".rax-staging";

/// Maximum nesting accepted for logical paths
pub const MAX_DIRECTORY_DEPTH: usize = 64;

const MAX_USER_ID_LENGTH: usize = 64;

/// A logical path that has been normalized and mapped onto disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    owner: String,
    logical: String,
    absolute: PathBuf,
}

impl ResolvedPath {
    /// User whose storage root contains this path
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Normalized logical path, always starting with `/`
    pub fn logical(&self) -> &str {
        &self.logical
    }

    /// On-disk location
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.logical == "/"
    }

    /// Logical path of the parent directory, `None` for the root
    pub fn parent_logical(&self) -> Option<String> {
        parent_of(&self.logical)
    }

    /// Last path segment, empty for the root
    pub fn name(&self) -> &str {
        self.logical.rsplit('/').next().unwrap_or("")
    }
}

/// Resolves user-relative logical paths against the storage path template.
#[derive(Debug, Clone)]
pub struct PathResolver {
    template: String,
}

impl PathResolver {
    /// Builds a resolver, validating the template once.
    pub fn new(template: &str) -> Result<Self, PathError> {
        if template.matches(USER_PLACEHOLDER).count() != 1 {
            return Err(PathError::InvalidTemplate(format!(
                "{template:?} must contain exactly one {USER_PLACEHOLDER}"
            )));
        }

        if template.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(PathError::InvalidTemplate(format!(
                "{template:?} contains a parent directory segment"
            )));
        }

        let resolver = Self {
            template: template.to_string(),
        };

        // Hostile identifiers must never map to a root.
        for hostile in ["..", ".", "../etc", "a/b", ""] {
            if resolver.storage_root_for(hostile).is_ok() {
                return Err(PathError::InvalidTemplate(format!(
                    "{template:?} accepted hostile user id {hostile:?}"
                )));
            }
        }

        Ok(resolver)
    }

    /// Storage root directory for a user
    pub fn storage_root_for(&self, user_id: &str) -> Result<PathBuf, PathError> {
        validate_user_id(user_id)?;
        Ok(PathBuf::from(self.template.replacen(USER_PLACEHOLDER, user_id, 1)))
    }

    /// Staging directory for a user's in-flight uploads
    pub fn staging_dir_for(&self, user_id: &str) -> Result<PathBuf, PathError> {
        Ok(self.storage_root_for(user_id)?.join(STAGING_DIR))
    }

    /// Resolves a percent-encoded logical path for a user.
    pub fn resolve(&self, user_id: &str, logical_path: &str) -> Result<ResolvedPath, PathError> {
        let root = self.storage_root_for(user_id)?;
        let logical = normalize_logical_path(logical_path)?;

        let mut absolute = root;
        for segment in logical.split('/').filter(|s| !s.is_empty()) {
            absolute.push(segment);
        }

        Ok(ResolvedPath {
            owner: user_id.to_string(),
            logical,
            absolute,
        })
    }

    /// Checks that the nearest existing ancestor of `path` still lies inside
    /// the user's canonical root, catching symlinks that point elsewhere.
    pub fn verify_on_disk(&self, path: &ResolvedPath) -> Result<(), PathError> {
        let root = self.storage_root_for(path.owner())?;
        let canonical_root = match root.canonicalize() {
            Ok(root) => root,
            // Nothing on disk yet, so nothing can point outside it.
            Err(_) => return Ok(()),
        };

        let mut candidate = path.absolute().to_path_buf();
        loop {
            match candidate.canonicalize() {
                Ok(canonical) => {
                    if canonical.starts_with(&canonical_root) {
                        return Ok(());
                    }
                    return Err(PathError::EscapesRoot(path.logical().to_string()));
                }
                Err(_) => {
                    if !candidate.pop() {
                        return Err(PathError::EscapesRoot(path.logical().to_string()));
                    }
                }
            }
        }
    }
}

/// Percent-decodes and normalizes a logical path into `/a/b` form.
pub fn normalize_logical_path(raw: &str) -> Result<String, PathError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| PathError::Malformed(format!("{raw:?} is not valid UTF-8")))?;

    if decoded.chars().any(char::is_control) {
        return Err(PathError::Malformed(format!(
            "{raw:?} contains control characters"
        )));
    }

    if decoded.contains('\\') {
        return Err(PathError::Malformed(format!("{raw:?} contains a backslash")));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::Traversal(raw.to_string()));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.first() == Some(&STAGING_DIR) {
        return Err(PathError::Reserved(STAGING_DIR.to_string()));
    }

    if segments.len() > MAX_DIRECTORY_DEPTH {
        return Err(PathError::Malformed(format!(
            "{raw:?} is nested deeper than {MAX_DIRECTORY_DEPTH} levels"
        )));
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Parent of a normalized logical path
pub fn parent_of(logical: &str) -> Option<String> {
    if logical == "/" {
        return None;
    }
    match logical.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(logical[..idx].to_string()),
        None => Some("/".to_string()),
    }
}

/// Joins a child name onto a normalized logical directory path
pub fn join_logical(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// True when `path` equals `ancestor` or lies beneath it
pub fn is_within(ancestor: &str, path: &str) -> bool {
    ancestor == "/"
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Performs basic sanitation on a user identifier before it is substituted into the template.
pub fn validate_user_id(user_id: &str) -> Result<(), PathError> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LENGTH
        && user_id != "."
        && user_id != ".."
        && !user_id.starts_with('.')
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(PathError::InvalidUserId(user_id.to_string()))
    }
}
