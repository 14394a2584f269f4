//! Durable storage for the job store snapshot.
//!
//! File writes are atomic: the data lands in a temporary sibling named after
//! the full target file name, which is then renamed over the target, so a
//! crash mid-write leaves the previous snapshot intact.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::PersistenceError;

/// Key-value storage for one serialized snapshot.
pub trait SnapshotStorage: Send + Sync {
    /// Read the stored snapshot text, `None` if nothing has been stored yet.
    fn read(&self) -> Result<Option<String>, PersistenceError>;

    /// Replace the stored snapshot text.
    fn write(&self, data: &str) -> Result<(), PersistenceError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Atomically write raw bytes to a file, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    let failed = |e: std::io::Error| PersistenceError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, data).map_err(failed)?;
    std::fs::rename(&tmp, path).map_err(failed)?;
    Ok(())
}

/// `Title.md` becomes `Title.md.<pid>.tmp`, so `Title.md` and `Title.docx`
/// written side by side never share a temporary file, nor do two processes.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Atomically write pretty-printed JSON to a file.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(data).map_err(|e| PersistenceError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    atomic_write(path, json.as_bytes())
}

/// Snapshot stored in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub const DEFAULT_FILE_NAME: &'static str = "research_store.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the default file name inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(Self::DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for FileStorage {
    fn read(&self) -> Result<Option<String>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                location: self.location(),
                message: e.to_string(),
            })
    }

    fn write(&self, data: &str) -> Result<(), PersistenceError> {
        atomic_write(&self.path, data.as_bytes())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Snapshot held in memory. Used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with raw text, which need not be valid.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            data: Mutex::new(Some(raw.into())),
        }
    }

    /// The last written snapshot text.
    pub fn contents(&self) -> Option<String> {
        self.data.lock().ok().and_then(|guard| guard.clone())
    }
}

impl SnapshotStorage for MemoryStorage {
    fn read(&self) -> Result<Option<String>, PersistenceError> {
        self.data
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| PersistenceError::Corrupt {
                location: self.location(),
                message: e.to_string(),
            })
    }

    fn write(&self, data: &str) -> Result<(), PersistenceError> {
        let mut guard = self.data.lock().map_err(|e| PersistenceError::WriteFailed {
            path: PathBuf::from("memory"),
            message: e.to_string(),
        })?;
        *guard = Some(data.to_string());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Shared in-memory storage, so a test can reopen a store over the same data.
impl<S: SnapshotStorage> SnapshotStorage for std::sync::Arc<S> {
    fn read(&self) -> Result<Option<String>, PersistenceError> {
        (**self).read()
    }

    fn write(&self, data: &str) -> Result<(), PersistenceError> {
        (**self).write(data)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        assert_eq!(storage.read().unwrap(), None);

        storage.write("{\"version\":1}").unwrap();
        assert_eq!(storage.read().unwrap().as_deref(), Some("{\"version\":1}"));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("store.json");
        atomic_write_json(&path, &vec![1, 2, 3]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_atomic_write_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.json");
        atomic_write(&path, b"data").unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "clean.json")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[test]
    fn test_atomic_write_same_stem_different_extension() {
        let dir = TempDir::new().unwrap();
        let unrelated = dir.path().join("Title.tmp");
        std::fs::write(&unrelated, b"keep me").unwrap();

        atomic_write(&dir.path().join("Title.md"), b"markdown").unwrap();
        atomic_write(&dir.path().join("Title.docx"), b"docx").unwrap();

        assert_eq!(std::fs::read(dir.path().join("Title.md")).unwrap(), b"markdown");
        assert_eq!(std::fs::read(dir.path().join("Title.docx")).unwrap(), b"docx");
        assert_eq!(std::fs::read(&unrelated).unwrap(), b"keep me");
        assert_ne!(temp_sibling(&dir.path().join("Title.md")), temp_sibling(&dir.path().join("Title.docx")));
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.read().unwrap(), None);
        storage.write("abc").unwrap();
        assert_eq!(storage.contents().as_deref(), Some("abc"));

        let seeded = MemoryStorage::with_raw("not json");
        assert_eq!(seeded.read().unwrap().as_deref(), Some("not json"));
    }

    #[test]
    fn test_write_into_file_path_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let storage = FileStorage::new(blocker.join("store.json"));
        let err = storage.write("{}").unwrap_err();
        assert!(matches!(err, PersistenceError::WriteFailed { .. }));
    }
}
