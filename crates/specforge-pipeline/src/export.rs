//! Write a job's artifacts to a directory tree.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use specforge_core::domain::ArtifactBag;
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("artifact path escapes the output directory: {0}")]
    UnsafePath(String),

    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve `relative` under `root`, rejecting absolute paths and `..`.
fn resolve(root: &Path, relative: &str) -> Result<PathBuf, ExportError> {
    let rel = Path::new(relative);
    let safe = !relative.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(ExportError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(rel))
}

/// Write every artifact under `root`. Returns the written paths in bag order.
///
/// Each file is written to a temp file in its target directory, then renamed.
pub fn write_artifacts(root: &Path, bag: &ArtifactBag) -> Result<Vec<PathBuf>, ExportError> {
    let mut written = Vec::with_capacity(bag.len());
    for (_, artifact) in bag.iter() {
        let path = resolve(root, &artifact.path)?;
        let dir = path.parent().unwrap_or(root);
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(artifact.content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::domain::{ArtifactCategory, GeneratedFile};

    #[test]
    fn writes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut bag = ArtifactBag::new();
        bag.append(
            ArtifactCategory::Schema,
            [GeneratedFile::new("schema/001_init.sql", "CREATE TABLE t ();", "sql")],
        );
        bag.append(
            ArtifactCategory::Documentation,
            [GeneratedFile::new("README.md", "# hi", "markdown")],
        );

        let written = write_artifacts(dir.path(), &bag).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("schema/001_init.sql")).unwrap(),
            "CREATE TABLE t ();"
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["../evil.sh", "/etc/passwd", ""] {
            let mut bag = ArtifactBag::new();
            bag.append(
                ArtifactCategory::Backend,
                [GeneratedFile::new(bad, "x", "sh")],
            );
            assert!(matches!(
                write_artifacts(dir.path(), &bag),
                Err(ExportError::UnsafePath(_))
            ));
        }
    }
}
