use std::path::{Component, Path, PathBuf};

use super::ArtifactError;

fn invalid(path: &str, reason: &str) -> ArtifactError {
    ArtifactError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Join `relative` onto `root`, refusing anything that could leave `root`.
///
/// Rejects absolute paths and `..` components up front, then canonicalises
/// the candidate so symlinks pointing outside `root` are caught as well.
/// The result is guaranteed to be an existing regular file.
pub fn secure_join(root: &Path, relative: &str) -> Result<PathBuf, ArtifactError> {
    let trimmed = relative.trim();
    if trimmed.is_empty() {
        return Err(invalid(relative, "path is empty"));
    }
    let rel = Path::new(trimmed);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(invalid(relative, "path escapes the artifact root"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(relative, "path must be relative"));
            }
        }
    }

    let root = root.canonicalize().map_err(|e| ArtifactError::Read {
        path: root.display().to_string(),
        message: e.to_string(),
    })?;
    let candidate = root.join(rel);
    let resolved = candidate.canonicalize().map_err(|e| ArtifactError::Read {
        path: relative.to_string(),
        message: e.to_string(),
    })?;
    if !resolved.starts_with(&root) {
        return Err(invalid(relative, "path escapes the artifact root"));
    }
    if !resolved.is_file() {
        return Err(invalid(relative, "path is not a regular file"));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("templates/nested")).unwrap();
        fs::write(dir.path().join("templates/stack.yaml"), "Resources: {}").unwrap();
        dir
    }

    #[test]
    fn joins_plain_relative_paths() {
        let dir = root();
        let p = secure_join(dir.path(), "templates/stack.yaml").unwrap();
        assert!(p.ends_with("templates/stack.yaml"));
        let p = secure_join(dir.path(), "./templates/stack.yaml").unwrap();
        assert!(p.ends_with("templates/stack.yaml"));
    }

    #[test]
    fn rejects_traversal_absolute_and_directories() {
        let dir = root();
        for bad in ["../../usr/bin/ls", "templates/../../etc/passwd", "/etc/passwd", ""] {
            let err = secure_join(dir.path(), bad).unwrap_err();
            assert!(matches!(err, ArtifactError::InvalidPath { .. }), "{bad}: {err}");
        }
        let err = secure_join(dir.path(), "templates/nested").unwrap_err();
        assert!(err.to_string().contains("templates/nested"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = root();
        let err = secure_join(dir.path(), "templates/missing.yaml").unwrap_err();
        assert!(matches!(err, ArtifactError::Read { .. }));
        assert!(err.to_string().contains("templates/missing.yaml"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_out_of_root() {
        let dir = root();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret"),
            dir.path().join("templates/link.yaml"),
        )
        .unwrap();
        let err = secure_join(dir.path(), "templates/link.yaml").unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPath { .. }));
    }
}
