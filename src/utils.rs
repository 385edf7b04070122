//! Utility functions for strongbox
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Atomic file writing for the file storage backend
//!
//! ### Path Manipulation
//! - Splitting repository paths into validated name components
//! - Rebuilding absolute repository paths from components
//!
//! ### Data Processing
//! - Byte formatting (human-readable sizes) for log lines

use crate::error::{Result, StrongboxError};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Split an absolute repository path into its name components
///
/// Repository paths are absolute and `/`-separated. `.` components and
/// repeated or trailing separators are ignored. The root itself yields an
/// empty list.
///
/// # Errors
///
/// - [`StrongboxError::InvalidInput`] if the path is relative, contains
///   `..`, or has a component that is not valid UTF-8
///
/// # Examples
///
/// ```rust,ignore
/// assert_eq!(path_components(Path::new("/a/./b/"))?, vec!["a", "b"]);
/// assert!(path_components(Path::new("a/b")).is_err());
/// ```
pub fn path_components(path: &Path) -> Result<Vec<String>> {
    if !path.has_root() {
        return Err(StrongboxError::invalid_input(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }

    let mut names = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    StrongboxError::invalid_input(format!("path is not UTF-8: {}", path.display()))
                })?;
                names.push(name.to_string());
            }
            Component::ParentDir => {
                return Err(StrongboxError::invalid_input(format!(
                    "parent components are not allowed: {}",
                    path.display()
                )));
            }
            Component::Prefix(_) => {
                return Err(StrongboxError::invalid_input(format!(
                    "path prefixes are not allowed: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(names)
}

/// Build an absolute repository path from name components
pub fn components_to_path<S: AsRef<str>>(names: &[S]) -> PathBuf {
    let mut path = PathBuf::from("/");
    for name in names {
        path.push(name.as_ref());
    }
    path
}

/// Write a file atomically
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new file
/// and never a partial write. The temporary file is removed on failure.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StrongboxError::backend(format!("no parent directory: {}", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StrongboxError::Io(e.error))?;
    Ok(())
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
