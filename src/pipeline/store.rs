//! Document store collaborators.
//!
//! Keys are opaque strings. Writes overwrite, there is no versioning.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Content type of PDF artifacts.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Sidecar directory under an [`FsStore`] root.
const META_DIR: &str = ".meta";

/// Longest encoded key; leaves room under the usual 255-byte file name limit
/// for the sidecar and temp-file suffixes.
const MAX_ENCODED_KEY: usize = 200;

/// Byte-level blob storage addressed by key.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a blob; [`Error::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store a blob, replacing any previous value.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Whether a key is present.
    async fn exists(&self, key: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, StoredBlob>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded for a key.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().ok()?.get(key).map(|blob| blob.content_type.clone())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.lock() {
            Ok(blobs) => blobs.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredBlob>>> {
        self.blobs.lock().map_err(|_| Error::StoreIo {
            key: String::new(),
            reason: "memory store lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(key)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.lock()?.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(key))
    }
}

/// Metadata written next to each blob of an [`FsStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Unsanitised store key
    pub key: String,
    /// Content type given to `put`
    pub content_type: String,
    /// Blob length in bytes
    pub size: u64,
}

/// Directory-backed store.
///
/// A key maps to `<root>/<encoded key>` with metadata in
/// `<root>/.meta/<encoded key>.json`. Encoded names never contain `.`, so no
/// key can reach a sidecar, a temp file or the `.meta` directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Use `root`, creating it on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for `key`.
    pub fn blob_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(encode_key(key)?))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(META_DIR).join(format!("{}.json", encode_key(key)?)))
    }

    /// Read the metadata sidecar of `key`.
    pub async fn metadata(&self, key: &str) -> Result<BlobMetadata> {
        let path = self.meta_path(key)?;
        let json = tokio::fs::read(&path).await.map_err(|e| io_error(key, e))?;
        serde_json::from_slice(&json).map_err(|e| Error::StoreIo {
            key: key.to_string(),
            reason: format!("corrupt metadata: {}", e),
        })
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_error(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        let meta_path = self.meta_path(key)?;
        tokio::fs::create_dir_all(self.root.join(META_DIR))
            .await
            .map_err(|e| io_error(key, e))?;

        let meta = BlobMetadata {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        };

        // Write then rename so readers never see a partial blob.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))?;

        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| Error::StoreIo {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(meta_path, meta_json)
            .await
            .map_err(|e| io_error(key, e))?;

        log::debug!("Stored {} ({} bytes, {})", key, meta.size, content_type);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(key, e))
    }
}

fn io_error(key: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(key.to_string())
    } else {
        Error::StoreIo {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Map a store key to a file name, one-to-one.
///
/// Percent-encodes everything outside `[A-Za-z0-9_~-]`, `.` included.
pub fn encode_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::StoreIo {
            key: key.to_string(),
            reason: "empty store key".to_string(),
        });
    }
    let encoded = urlencoding::encode(key).replace('.', "%2E");
    if encoded.len() > MAX_ENCODED_KEY {
        return Err(Error::StoreIo {
            key: key.to_string(),
            reason: format!("encoded key exceeds {} bytes", MAX_ENCODED_KEY),
        });
    }
    Ok(encoded)
}
