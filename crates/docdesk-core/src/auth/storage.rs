use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use super::session::SessionData;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Durable home of the session between runs.
///
/// Implementations are synchronous; the store calls them while holding its
/// state lock so storage and memory never disagree.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionData>>;
    fn save(&self, data: &SessionData) -> Result<()>;
    /// Remove any stored session. Removing nothing is not an error.
    fn clear(&self) -> Result<()>;
}

/// JSON file in the cache directory.
pub struct FileStorage {
    cache_dir: PathBuf,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn write_atomically(path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, path).context("Failed to replace session file")?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let contents = serde_json::to_string_pretty(data)?;
        Self::write_atomically(&self.path(), &contents)
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Process-local storage. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<SessionData>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SessionData) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(data))),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SessionData>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        Ok(self.slot().clone())
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        *self.slot() = Some(data.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
