//! Origin-scoped key-value persistence for tokens and session snapshots
//!
//! Stands in for the browser's `localStorage`: string values under fixed keys,
//! plus change notifications that other handles on the same store observe
//! (the way a `storage` event reaches every tab except the one that wrote).

use crate::error::{ClientError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_CAPACITY: usize = 64;

/// A change made to the store by some handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Durable string store shared by the token store and the session snapshot
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Changes made through *other* handles. `None` if the backend cannot observe them.
    fn subscribe(&self) -> Option<StorageEvents> {
        None
    }
}

/// Stream of changes originating from other handles
pub struct StorageEvents {
    rx: broadcast::Receiver<(u64, StorageEvent)>,
    handle_id: u64,
}

impl StorageEvents {
    /// Next foreign change, or `None` once every writer is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok((origin, event)) if origin != self.handle_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "Storage listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct SharedMemory {
    values: papaya::HashMap<String, String>,
    events: broadcast::Sender<(u64, StorageEvent)>,
    next_handle: AtomicU64,
}

/// In-process storage backed by a concurrent map
///
/// Clones share the same handle id. Use [`MemoryStorage::handle`] to open a
/// second "tab" that sees this one's writes as external changes.
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<SharedMemory>,
    handle_id: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(SharedMemory {
                values: papaya::HashMap::new(),
                events,
                next_handle: AtomicU64::new(1),
            }),
            handle_id: 0,
        }
    }

    /// Open another handle on the same underlying store.
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handle_id: self.shared.next_handle.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No subscribers is fine.
        let _ = self.shared.events.send((
            self.handle_id,
            StorageEvent {
                key: key.to_string(),
                new_value,
            },
        ));
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.shared.values.pin().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.shared
            .values
            .pin()
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.shared.values.pin().remove(key).is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<StorageEvents> {
        Some(StorageEvents {
            rx: self.shared.events.subscribe(),
            handle_id: self.handle_id,
        })
    }
}

/// JSON-file storage that survives process restarts
pub struct FileStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Per-user data directory location, e.g. `~/.local/share/crm-rs-client/storage.json`.
    pub fn default_location() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("crm-rs-client").join("storage.json"))
            .ok_or_else(|| ClientError::Storage("No data directory on this platform".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut values = self
            .values
            .lock()
            .map_err(|_| ClientError::Storage("Storage lock poisoned".to_string()))?;

        // Memory only changes once the file has the new contents.
        let mut updated = values.clone();
        if !apply(&mut updated) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let contents = serde_json::to_string_pretty(&updated)?;
        std::fs::write(&self.path, contents).map_err(|e| {
            ClientError::Storage(format!("Failed to write {}: {e}", self.path.display()))
        })?;

        *values = updated;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| values.remove(key).is_some())
    }
}

/// Storage for environments without a persistence medium: reads miss, writes vanish
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl Storage for NoopStorage {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}
