//! File-backed persistence for the authoritative document.
//!
//! Two on-disk layouts, picked from the file extension:
//! ```text
//! *.rdb   ─► bincode(Document) ─► LZ4 (size-prefixed)
//! other   ─► pretty-printed JSON object (bytes tagged, see crate::value)
//! ```
//!
//! Every save rewrites the whole file: the snapshot is written to a
//! sibling `*.tmp` file and renamed over the target, so a crash mid-write
//! leaves the previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::value::{document_from_json, document_to_json, Document};

/// Extension selecting the compressed binary layout.
pub const BINARY_EXTENSION: &str = "rdb";

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Encode(String),
    #[error("Deserialization error: {0}")]
    Decode(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

/// On-disk layout of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// bincode snapshot, LZ4-compressed
    Binary,
    /// Human-readable JSON, pretty-printed
    Json,
}

impl FileFormat {
    /// Pick the layout from the file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(BINARY_EXTENSION) => FileFormat::Binary,
            _ => FileFormat::Json,
        }
    }

    /// Serialize a document in this layout.
    pub fn encode(self, doc: &Document) -> Result<Vec<u8>, StoreError> {
        match self {
            FileFormat::Binary => {
                let raw = bincode::serde::encode_to_vec(doc, bincode::config::standard())
                    .map_err(|e| StoreError::Encode(e.to_string()))?;
                Ok(lz4_flex::compress_prepend_size(&raw))
            }
            FileFormat::Json => {
                let json = serde_json::Value::Object(document_to_json(doc.clone()));
                serde_json::to_vec_pretty(&json).map_err(|e| StoreError::Encode(e.to_string()))
            }
        }
    }

    /// Deserialize a document from this layout.
    pub fn decode(self, bytes: &[u8]) -> Result<Document, StoreError> {
        match self {
            FileFormat::Binary => {
                let raw = lz4_flex::decompress_size_prepended(bytes)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                let (doc, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                Ok(doc)
            }
            FileFormat::Json => {
                let json: serde_json::Value = serde_json::from_slice(bytes)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                document_from_json(json)
                    .ok_or_else(|| StoreError::Decode("root is not an object".into()))
            }
        }
    }
}

/// The authoritative document plus its backing file.
#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    format: FileFormat,
    data: Document,
}

impl DocumentStore {
    /// Open the store at `path`, loading any existing snapshot.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is
    /// logged and also starts empty; it will be overwritten by the next
    /// successful save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        let data = match Self::load(&path, format) {
            Ok(Some(doc)) => {
                log::info!("Loaded document from {} ({} keys)", path.display(), doc.len());
                doc
            }
            Ok(None) => {
                log::debug!("No document at {}, starting empty", path.display());
                Document::new()
            }
            Err(e) => {
                log::error!("Error loading document from {}: {e}", path.display());
                Document::new()
            }
        };
        Self { path, format, data }
    }

    /// In-memory store that still knows where it would save to.
    pub fn with_document(path: impl Into<PathBuf>, data: Document) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        Self { path, format, data }
    }

    /// Read and decode the backing file. `Ok(None)` if it does not exist.
    pub fn load(path: &Path, format: FileFormat) -> Result<Option<Document>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        format.decode(&bytes).map(Some)
    }

    /// Write the full document to disk (write-then-rename).
    pub fn save(&self) -> Result<(), StoreError> {
        self.prepare_save()?.write()
    }

    /// Encode the current document without touching the disk. The
    /// returned snapshot can be written from a blocking thread.
    pub fn prepare_save(&self) -> Result<PreparedSave, StoreError> {
        Ok(PreparedSave {
            bytes: self.format.encode(&self.data)?,
            path: self.path.clone(),
        })
    }

    pub fn document(&self) -> &Document {
        &self.data
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.data
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

/// An encoded snapshot waiting to be written to its backing file.
#[derive(Debug)]
pub struct PreparedSave {
    bytes: Vec<u8>,
    path: PathBuf,
}

impl PreparedSave {
    /// Write to `<file>.tmp`, then rename over the target.
    pub fn write(self) -> Result<(), StoreError> {
        let tmp = self.tmp_path();
        fs::write(&tmp, &self.bytes)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::trace!("Saved {} bytes to {}", self.bytes.len(), self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::value::{path, Value};
    use tempfile::tempdir;

    fn sample() -> Document {
        let mut doc = Document::new();
        engine::put(&mut doc, &path(&["array", "key"]), Value::from("nested_value")).unwrap();
        engine::put(&mut doc, &path(&["key"]), Value::from("root_value")).unwrap();
        engine::put(&mut doc, &path(&["blob"]), Value::Bytes(vec![0, 1, 2])).unwrap();
        doc
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("db.rdb")), FileFormat::Binary);
        assert_eq!(FileFormat::from_path(Path::new("db.RDB")), FileFormat::Binary);
        assert_eq!(FileFormat::from_path(Path::new("db.json")), FileFormat::Json);
        assert_eq!(FileFormat::from_path(Path::new("db")), FileFormat::Json);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("absent.json"));
        assert!(store.document().is_empty());
    }

    #[test]
    fn test_binary_save_and_reload() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.rdb");

        let store = DocumentStore::with_document(&file, sample());
        store.save().unwrap();

        let reopened = DocumentStore::open(&file);
        assert_eq!(reopened.format(), FileFormat::Binary);
        assert_eq!(reopened.document(), &sample());
    }

    #[test]
    fn test_json_save_is_pretty_and_reloads() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.json");

        DocumentStore::with_document(&file, sample()).save().unwrap();

        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains('\n'), "JSON layout should be pretty-printed");
        assert!(text.contains("\"nested_value\""));
        assert_eq!(DocumentStore::open(&file).document(), &sample());
    }

    #[test]
    fn test_json_reload_keeps_bytes_and_lists_apart() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.json");

        let mut doc = Document::new();
        doc.insert("blob".into(), Value::Bytes(vec![0, 1, 2]));
        doc.insert(
            "list".into(),
            Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)]),
        );
        doc.insert("empty".into(), Value::Bytes(Vec::new()));
        DocumentStore::with_document(&file, doc.clone()).save().unwrap();

        let reopened = DocumentStore::open(&file);
        assert_eq!(reopened.document(), &doc);
        assert_eq!(reopened.document()["blob"], Value::Bytes(vec![0, 1, 2]));
    }

    #[test]
    fn test_prepared_save_is_a_snapshot() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.rdb");
        let mut store = DocumentStore::with_document(&file, sample());

        let prepared = store.prepare_save().unwrap();
        store.document_mut().clear();
        prepared.write().unwrap();

        assert_eq!(DocumentStore::open(&file).document(), &sample());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.rdb");
        fs::write(&file, [0xFF, 0xFE, 0xFD]).unwrap();

        let store = DocumentStore::open(&file);
        assert!(store.document().is_empty());
    }

    #[test]
    fn test_save_leaves_no_tmp_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.json");
        DocumentStore::with_document(&file, sample()).save().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("db.json")]);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("no_such_dir").join("db.json");
        let store = DocumentStore::with_document(&file, sample());
        assert!(matches!(store.save(), Err(StoreError::Io(_))));
    }
}
