use std::path::{Path, PathBuf};

use macgo_relaunch::cleanup::validate_cleanup_path;
use macgo_relaunch::AppError;

fn roots(dir: &Path) -> Vec<PathBuf> {
    vec![dir.to_path_buf()]
}

#[test]
fn allows_path_inside_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let candidate = temp.path().join("macgo-1-abc");

    let validated = validate_cleanup_path(&roots(temp.path()), &candidate).expect("path valid");

    let canonical_root = temp.path().canonicalize().expect("canonicalize root");
    assert_eq!(validated, canonical_root.join("macgo-1-abc"));
}

#[test]
fn allows_missing_nested_path_inside_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let candidate = temp.path().join("not-yet").join("fifo");

    let validated = validate_cleanup_path(&roots(temp.path()), &candidate).expect("path valid");

    assert!(validated.ends_with("not-yet/fifo"));
}

#[test]
fn rejects_relative_path() {
    let temp = tempfile::tempdir().expect("tempdir");

    let result = validate_cleanup_path(&roots(temp.path()), Path::new("macgo/fifo"));

    assert!(matches!(result, Err(AppError::PathViolation(_))));
}

#[test]
fn rejects_traversal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let candidate = temp.path().join("inner/../../escape");

    let result = validate_cleanup_path(&roots(temp.path()), &candidate);

    assert!(matches!(result, Err(AppError::PathViolation(msg)) if msg.contains("traversal")));
}

#[test]
fn rejects_root_itself() {
    let temp = tempfile::tempdir().expect("tempdir");

    let result = validate_cleanup_path(&roots(temp.path()), temp.path());

    assert!(result.is_err());
}

#[test]
fn rejects_path_outside_roots() {
    let allowed = tempfile::tempdir().expect("tempdir");
    let other = tempfile::tempdir().expect("tempdir");

    let result = validate_cleanup_path(&roots(allowed.path()), other.path().join("file"));

    assert!(matches!(result, Err(AppError::PathViolation(msg)) if msg.contains("outside")));
}

#[test]
fn rejects_when_no_root_exists() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing_root = temp.path().join("missing");

    let result = validate_cleanup_path(&[missing_root.clone()], missing_root.join("file"));

    assert!(matches!(result, Err(AppError::PathViolation(msg)) if msg.contains("no valid cleanup root")));
}

#[test]
fn rejects_escape_through_intermediate_symlink() {
    let allowed = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    let link = allowed.path().join("link");
    std::os::unix::fs::symlink(outside.path(), &link).expect("create symlink");

    let result = validate_cleanup_path(&roots(allowed.path()), link.join("victim"));

    assert!(result.is_err());
}

#[test]
fn final_symlink_component_is_not_followed() {
    let allowed = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    let link = allowed.path().join("link");
    std::os::unix::fs::symlink(outside.path(), &link).expect("create symlink");

    let validated = validate_cleanup_path(&roots(allowed.path()), &link).expect("link itself valid");

    assert!(validated.ends_with("link"));
    let canonical_root = allowed.path().canonicalize().expect("canonicalize root");
    assert!(validated.starts_with(canonical_root));
}
