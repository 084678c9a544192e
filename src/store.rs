//! C2: Store — append-safe JSON documents on a local filesystem, laid out
//! directory-per-batch under a configured root.
//!
//! ```text
//! <root>/data/<batch_id>.json
//! <root>/exports/<batch_id>/results.csv
//! <root>/exports/<batch_id>/pending_urls.json
//! <root>/exports/<batch_id>/pending_files.json
//! <root>/exports/<batch_id>/pending_files/<local-name>
//! <root>/temp_uploads/...
//! ```
//!
//! Every write to a batch document or a ledger goes through
//! [`Store::write_json_atomic`]: write to a sibling temp file, fsync, then
//! rename over the destination. Renames within the same directory are
//! atomic on the filesystems this is meant to run on, so a reader never
//! observes a partial document.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document corrupt at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("document not found at {path}")]
    NotFound { path: PathBuf },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn exports_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join("exports").join(batch_id)
    }

    pub fn pending_files_dir(&self, batch_id: &str) -> PathBuf {
        self.exports_dir(batch_id).join("pending_files")
    }

    pub fn temp_uploads_dir(&self) -> PathBuf {
        self.root.join("temp_uploads")
    }

    pub fn batch_doc_path(&self, batch_id: &str) -> PathBuf {
        self.data_dir().join(format!("{batch_id}.json"))
    }

    pub fn pending_urls_path(&self, batch_id: &str) -> PathBuf {
        self.exports_dir(batch_id).join("pending_urls.json")
    }

    pub fn pending_files_manifest_path(&self, batch_id: &str) -> PathBuf {
        self.exports_dir(batch_id).join("pending_files.json")
    }

    pub fn csv_path(&self, batch_id: &str) -> PathBuf {
        self.exports_dir(batch_id).join("results.csv")
    }

    /// Creates the root directory skeleton. Called once at startup.
    pub fn ensure_directories(&self) -> StoreResult<()> {
        for dir in [self.data_dir(), self.root.join("exports"), self.temp_uploads_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        }
        Ok(())
    }

    pub fn ensure_batch_dirs(&self, batch_id: &str) -> StoreResult<()> {
        let dir = self.pending_files_dir(batch_id);
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })
    }

    /// Writes `value` as pretty JSON to `path` via write-temp / fsync / rename.
    /// The temp file lives alongside `path` so the rename stays within one
    /// filesystem (cross-device renames are not atomic).
    pub fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp_path = sibling_temp_path(path);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        {
            let mut f = std::fs::File::create(&tmp_path).map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            f.write_all(&bytes).map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            f.sync_all().map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        }

        std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "wrote document atomically");
        Ok(())
    }

    /// Reads and deserializes a JSON document. Returns [`StoreError::NotFound`]
    /// when the file does not exist yet (e.g. a batch never initialized).
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<T> {
        let contents = std::fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound { path: path.to_path_buf() }
            } else {
                StoreError::Io { path: path.to_path_buf(), source }
            }
        })?;
        serde_json::from_slice(&contents).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_json_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> StoreResult<T> {
        match self.read_json(path) {
            Ok(v) => Ok(v),
            Err(StoreError::NotFound { .. }) => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    pub fn document_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Recursively removes everything under `path`, tolerating a missing path.
    pub fn remove_dir_all_lenient(&self, path: &Path) {
        if let Err(err) = std::fs::remove_dir_all(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %err, "failed to remove directory during cleanup");
            }
        }
    }

    pub fn remove_file_lenient(&self, path: &Path) {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %err, "failed to remove file during cleanup");
            }
        }
    }

    /// Lists entries directly under `dir`, empty vec if the directory does
    /// not exist.
    pub fn list_entries(&self, dir: &Path) -> StoreResult<Vec<PathBuf>> {
        match std::fs::read_dir(dir) {
            Ok(rd) => {
                let mut out = Vec::new();
                for entry in rd {
                    let entry = entry.map_err(|source| StoreError::Io { path: dir.to_path_buf(), source })?;
                    out.push(entry.path());
                }
                Ok(out)
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::Io { path: dir.to_path_buf(), source }),
        }
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("doc");
    let tmp_name = format!(".{file_name}.{}.tmp", std::process::id());
    path.with_file_name(tmp_name)
}
