//! Path validation and blob key conversion.
//!
//! Blob names arrive from listings and, indirectly, from trigger payloads.
//! Every backend validates them so nothing escapes the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use aptblob_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("packages/foo_1.0_amd64.deb").is_ok());
/// assert!(validate_path("Packages.xz").is_ok());
/// assert!(validate_path("a/../Packages").is_ok()); // (never leaves root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("/packages//./foo.deb/").unwrap(),
///     Path::new("packages/foo.deb")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates a storage path and renders it as a `/`-separated blob key.
///
/// Blob names must be UTF-8; anything else is rejected as
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath) rather than being
/// converted lossily, since a lossy key would name a different blob.
///
/// ```
/// use aptblob_storage::to_key;
/// assert_eq!(to_key("packages/./foo.deb").unwrap(), "packages/foo.deb");
/// ```
pub fn to_key(path: impl AsRef<Path>) -> Result<String> {
    let validated = validate(path)?;
    let mut parts = Vec::new();
    for component in validated.components() {
        match component.as_os_str().to_str() {
            Some(part) => parts.push(part),
            None => exn::bail!(ErrorKind::InvalidPath(validated.clone())),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("packages/foo.deb")).unwrap(), Path::new("packages/foo.deb"));
        assert_eq!(validate(Path::new("a/b/c/foo.deb.package")).unwrap(), Path::new("a/b/c/foo.deb.package"));
        assert_eq!(validate(Path::new("Packages")).unwrap(), Path::new("Packages"));
    }

    #[test]
    fn test_path_normalization() {
        // Double slashes are normalized
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        // Current directory references removed
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
        // Leading slashes (as found in event subjects) are dropped
        assert_eq!(validate(Path::new("/packages/foo.deb")).unwrap(), Path::new("packages/foo.deb"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
        // Traversal that stays within the root is resolved
        assert_eq!(validate(Path::new("a/b/..")).unwrap(), Path::new("a"));
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_to_key() {
        assert_eq!(to_key("packages/foo.deb").unwrap(), "packages/foo.deb");
        assert_eq!(to_key("/packages//foo.deb/").unwrap(), "packages/foo.deb");
        assert!(to_key("../foo.deb").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_to_key_rejects_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let path = Path::new(OsStr::from_bytes(b"packages/\xFF.deb"));
        assert!(to_key(path).is_err());
    }
}
