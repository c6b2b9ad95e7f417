//! Path validation and symlink-escape detection for scheduled removals.
//!
//! A cleanup target must be absolute, free of `..` segments, and resolve
//! strictly beneath one of the allowed roots. The final component is not
//! followed: removing a symlink deletes the link, never its target.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Validate that `candidate` is a removable path beneath one of `roots`.
///
/// Returns the canonical key for the path: the canonicalized parent joined
/// with the final component. Missing parents fall back to the lexically
/// normalized path.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - The candidate is relative or has no final component.
/// - The candidate contains `..` traversal segments.
/// - No root can be canonicalized.
/// - The resolved path is not strictly inside a root (a root itself is
///   never removable).
pub fn validate_cleanup_path(roots: &[PathBuf], candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let candidate = candidate.as_ref();

    if !candidate.is_absolute() {
        return Err(AppError::PathViolation(format!(
            "cleanup path must be absolute: {}",
            candidate.display()
        )));
    }

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                return Err(AppError::PathViolation(format!(
                    "cleanup path contains traversal: {}",
                    candidate.display()
                )));
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    let Some(file_name) = normalized.file_name().map(ToOwned::to_owned) else {
        return Err(AppError::PathViolation("cleanup path has no file name".into()));
    };

    let canonical_roots: Vec<PathBuf> = roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .collect();
    if canonical_roots.is_empty() {
        return Err(AppError::PathViolation("no valid cleanup root".into()));
    }

    // Intermediate symlinks are resolved so an in-root link cannot redirect
    // the removal elsewhere.
    let resolved = match normalized.parent().map(Path::canonicalize) {
        Some(Ok(parent)) => parent.join(file_name),
        _ => normalized,
    };

    let inside = canonical_roots
        .iter()
        .chain(roots.iter())
        .any(|root| resolved.starts_with(root) && resolved != *root);

    if inside {
        Ok(resolved)
    } else {
        Err(AppError::PathViolation(format!(
            "cleanup path outside allowed roots: {}",
            resolved.display()
        )))
    }
}
