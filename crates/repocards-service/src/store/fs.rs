use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{KeyValueStore, StoreError};

/// A [`KeyValueStore`] keeping one file per key inside a directory.
///
/// Values are written to a temporary file in the same directory and renamed into place, so a
/// concurrent reader sees either the old or the new value, never a partial one.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Opens the store at `dir`, creating the directory if necessary.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FilesystemStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let mut temp_file = NamedTempFile::new_in(&self.dir)?;
        temp_file.write_all(value.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = FilesystemStore::open(dir.path().join("store")).unwrap();
        let second = FilesystemStore::open(dir.path().join("store")).unwrap();

        first.set("github_repos_cache", "{}").unwrap();
        assert_eq!(
            second.get("github_repos_cache").unwrap().as_deref(),
            Some("{}")
        );

        second.remove("github_repos_cache").unwrap();
        assert_eq!(first.get("github_repos_cache").unwrap(), None);
        // removing twice is fine
        first.remove("github_repos_cache").unwrap();
    }

    #[test]
    fn test_no_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::open(dir.path()).unwrap();
        store.set("lock", "a").unwrap();
        store.set("lock", "b").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["lock"]);
    }

    #[test]
    fn test_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::open(dir.path()).unwrap();

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                store.set(key, "x"),
                Err(StoreError::InvalidKey(_))
            ));
        }
    }
}
