use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

/// Create `path` at once with `data`, failing with `ErrorKind::AlreadyExists`
/// if something is already there.
///
/// The bytes are written to a tempfile inside `staging` first, then linked
/// into place, so readers of `path`'s directory never see a partial file.
/// `staging` must be on the same filesystem as `path`.
pub fn write_new(staging: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(staging)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Rename `from` to `to` without replacing an existing `to`.
///
/// Fails with `ErrorKind::AlreadyExists` when `to` exists and with
/// `ErrorKind::NotFound` when `from` is gone.
pub fn move_noclobber(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::hard_link(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        // Leave exactly one copy behind.
        let _ = std::fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Regular files directly under `dir`, sorted by file name.
pub fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// True if `dir` holds no regular files. A missing directory counts as empty.
pub fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => {
            for entry in entries.by_ref() {
                if entry?.file_type()?.is_file() {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_new_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("item");
        write_new(dir.path(), &path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn write_new_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("item");
        std::fs::write(&path, b"original").unwrap();

        let err = write_new(dir.path(), &path, b"second").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
        // The staging tempfile is cleaned up on failure.
        assert_eq!(list_files(dir.path()).unwrap(), vec![path]);
    }

    #[test]
    fn move_noclobber_moves_and_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"one").unwrap();

        move_noclobber(&a, &b).unwrap();
        assert!(!a.exists());
        assert_eq!(std::fs::read(&b).unwrap(), b"one");

        std::fs::write(&a, b"two").unwrap();
        let err = move_noclobber(&a, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&b).unwrap(), b"one");
        assert!(a.exists());
    }

    #[test]
    fn move_noclobber_missing_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = move_noclobber(&dir.path().join("nope"), &dir.path().join("b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_files_is_sorted_and_skips_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names: Vec<_> = list_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a", "b"]);
        assert!(!is_empty_dir(dir.path()).unwrap());
        assert!(is_empty_dir(&dir.path().join("sub")).unwrap());
        assert!(is_empty_dir(&dir.path().join("missing")).unwrap());
    }
}
