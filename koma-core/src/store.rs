use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::appearance::{AppearanceIndex, IndexSnapshot};

pub trait IndexStore: Send + Sync {
    fn load(&self) -> Result<Option<AppearanceIndex>>;
    fn save(&self, index: &AppearanceIndex) -> Result<()>;
}

/// Keeps the index as a single JSON document, written atomically.
pub struct FileIndexStore {
    path: PathBuf,
}

impl FileIndexStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create index directory at {:?}", root))?;
        Ok(Self {
            path: root.join("vocabulary.json"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl IndexStore for FileIndexStore {
    fn load(&self) -> Result<Option<AppearanceIndex>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open index file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let snapshot: IndexSnapshot = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode index file {:?}", self.path))?;
        Ok(Some(AppearanceIndex::from_snapshot(snapshot)))
    }

    fn save(&self, index: &AppearanceIndex) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&index.snapshot())?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp index file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIndexStore {
    inner: Mutex<Option<IndexSnapshot>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self) -> Result<Option<AppearanceIndex>> {
        Ok(self.inner.lock().clone().map(AppearanceIndex::from_snapshot))
    }

    fn save(&self, index: &AppearanceIndex) -> Result<()> {
        *self.inner.lock() = Some(index.snapshot());
        Ok(())
    }
}
