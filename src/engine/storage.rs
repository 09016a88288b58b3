//! Save-root confinement and destination file creation

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, warn};

/// Upper bound on `name (n).ext` candidates tried before giving up
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SavePathError {
    #[error("save_path must be relative to the save root")]
    Absolute,
    #[error("save_path must not contain '..'")]
    Traversal,
}

/// Join the optional caller supplied sub path onto the save root.
///
/// Only plain relative components are accepted, so the result always stays
/// inside `root`.
pub fn resolve_save_dir(root: &Path, save_path: Option<&str>) -> Result<PathBuf, SavePathError> {
    let Some(sub) = save_path.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(root.to_path_buf());
    };

    let mut dir = root.to_path_buf();
    for component in Path::new(sub).components() {
        match component {
            Component::Normal(part) => dir.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(SavePathError::Traversal),
            Component::RootDir | Component::Prefix(_) => return Err(SavePathError::Absolute),
        }
    }
    Ok(dir)
}

/// Create the destination directory and everything above it, if missing
pub async fn prepare_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir).await?;
    debug!(dir = ?dir, "Destination directory ready");
    Ok(())
}

/// Create a brand new file for `file_name` inside `dir`.
///
/// An existing file is never truncated: when the name is taken, `name (1).ext`,
/// `name (2).ext`, ... are tried instead.
pub async fn create_unique_file(dir: &Path, file_name: &str) -> io::Result<(File, PathBuf)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(numbered_name(file_name, attempt));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {file_name} in {}", dir.display()),
    ))
}

/// Delete a partially written file. Failures are logged, never raised.
pub async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = ?path, "Removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove partial file"),
    }
}

fn numbered_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &file_name[..dot], &file_name[dot..]),
        _ => format!("{file_name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_save_dir() {
        let root = Path::new("/srv/dl");
        assert_eq!(resolve_save_dir(root, None).unwrap(), root);
        assert_eq!(resolve_save_dir(root, Some("  ")).unwrap(), root);
        assert_eq!(
            resolve_save_dir(root, Some("books/2024")).unwrap(),
            Path::new("/srv/dl/books/2024")
        );
        assert_eq!(
            resolve_save_dir(root, Some("./books/./x")).unwrap(),
            Path::new("/srv/dl/books/x")
        );
    }

    #[test]
    fn test_resolve_save_dir_rejects_escapes() {
        let root = Path::new("/srv/dl");
        assert_eq!(resolve_save_dir(root, Some("../etc")), Err(SavePathError::Traversal));
        assert_eq!(resolve_save_dir(root, Some("a/../../b")), Err(SavePathError::Traversal));
        assert_eq!(resolve_save_dir(root, Some("/etc")), Err(SavePathError::Absolute));
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("book.pdf", 0), "book.pdf");
        assert_eq!(numbered_name("book.pdf", 2), "book (2).pdf");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name(".env", 1), ".env (1)");
    }

    #[tokio::test]
    async fn test_existing_files_are_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/dir");
        prepare_dir(&dir).await.unwrap();
        // idempotent
        prepare_dir(&dir).await.unwrap();

        let (_, first) = create_unique_file(&dir, "book.pdf").await.unwrap();
        let (_, second) = create_unique_file(&dir, "book.pdf").await.unwrap();
        assert_eq!(first, dir.join("book.pdf"));
        assert_eq!(second, dir.join("book (1).pdf"));
    }

    #[tokio::test]
    async fn test_remove_partial_tolerates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gone.bin");
        remove_partial(&path).await;

        tokio::fs::write(&path, b"partial").await.unwrap();
        remove_partial(&path).await;
        assert!(!path.exists());
    }
}
