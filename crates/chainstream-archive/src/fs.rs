//! Read-only filesystem / object-store abstraction.
//!
//! The archive layer never writes; chunks are created by an external writer
//! path and only listed and read here.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LayoutError;

/// Minimal storage interface consumed by the chunk walker and validator.
#[async_trait]
pub trait Fs: Send + Sync {
    /// List the entry names (not paths) directly under `dir`.
    /// A missing directory lists as empty.
    async fn ls(&self, dir: &str) -> Result<Vec<String>, LayoutError>;

    /// Read a file's contents.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, LayoutError>;
}

// ─── LocalFs ──────────────────────────────────────────────────────────────────

/// Local-filesystem backend rooted at a directory.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl Fs for LocalFs {
    async fn ls(&self, dir: &str) -> Result<Vec<String>, LayoutError> {
        let full = self.resolve(dir);
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(LayoutError::Storage {
                    path: full.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
                Ok(None) => break,
                Err(e) => {
                    return Err(LayoutError::Storage {
                        path: full.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(names)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, LayoutError> {
        let full = self.resolve(path);
        tokio::fs::read(&full).await.map_err(|e| LayoutError::Storage {
            path: full.display().to_string(),
            reason: e.to_string(),
        })
    }
}

// ─── MemFs ────────────────────────────────────────────────────────────────────

/// In-memory backend for tests and ephemeral fixtures.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file; intermediate directories are implied by the path.
    pub fn put(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.into(), contents.into());
    }
}

#[async_trait]
impl Fs for MemFs {
    async fn ls(&self, dir: &str) -> Result<Vec<String>, LayoutError> {
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let files = self.files.lock().unwrap();
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((first, _)) => first.to_string(),
                None => rest.to_string(),
            })
            .collect();
        names.dedup();
        Ok(names)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, LayoutError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| LayoutError::Storage {
                path: path.to_string(),
                reason: "not found".into(),
            })
    }
}
