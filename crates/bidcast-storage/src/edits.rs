//! Persistence for user edits (`user_inputs`), keyed by record key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bidcast_core::BidEdit;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::write_atomic;

#[async_trait]
pub trait EditStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<BTreeMap<Uuid, BidEdit>>;

    /// Persist the full, already-layered edit for one record.
    async fn save(&self, key: Uuid, edit: BidEdit) -> anyhow::Result<()>;
}

/// Edits as one JSON object on disk. A missing file is an empty edit set.
#[derive(Debug)]
pub struct JsonEditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonEditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> anyhow::Result<BTreeMap<Uuid, BidEdit>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", self.path.display()))
    }
}

#[async_trait]
impl EditStore for JsonEditStore {
    async fn load(&self) -> anyhow::Result<BTreeMap<Uuid, BidEdit>> {
        self.read().await
    }

    async fn save(&self, key: Uuid, edit: BidEdit) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut edits = self.read().await?;
        if edit.is_empty() {
            edits.remove(&key);
        } else {
            edits.insert(key, edit);
        }
        let body = serde_json::to_vec_pretty(&edits).context("encoding edits")?;
        write_atomic(&self.path, &body).await
    }
}
