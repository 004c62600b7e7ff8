//! Session store: access token, refresh token, and the last active chat id.
//!
//! Values live in a small key/value storage under fixed keys. The store is a cheap
//! clonable handle that is passed explicitly to the gateway client and the chat
//! controller; nothing else reads the storage.

use fs2::FileExt;
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::api::ChatId;

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const ACTIVE_CHAT_KEY: &str = "currentChatId";

/// Durable string key/value storage (the client's equivalent of browser local storage).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Process-local storage; used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "session storage poisoned"))?;
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "session storage poisoned"))?;
        g.remove(key);
        Ok(())
    }
}

/// JSON object file (e.g. ~/.qhub/session.json). Every read goes to disk so the CLI and
/// desktop see each other's logins; writes hold an exclusive lock on `<file>.lock` and
/// replace the file through a temp file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> BTreeMap<String, String> {
        let Ok(s) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&s) {
            Ok(map) => map,
            Err(e) => {
                log::warn!("ignoring unreadable session file {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()?;

        let result = (|| {
            let mut map = self.read_map();
            f(&mut map);
            let bytes = serde_json::to_vec_pretty(&map)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let tmp = self.path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &self.path)
        })();

        let _ = lock.unlock();
        result
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.read_map().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|map| {
            map.remove(key);
        })
    }
}

/// Credentials and the remembered chat, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub active_chat_id: Option<ChatId>,
}

/// Handle to the persisted session. Clones share the same storage.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by a JSON file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStorage::new(path)))
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            log::warn!("session: failed to store {}: {}", key, e);
        }
    }

    fn erase(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            log::warn!("session: failed to remove {}: {}", key, e);
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        self.storage
            .get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Persist the token pair returned by a successful login.
    pub fn save(&self, access: &str, refresh: &str) {
        self.write(TOKEN_KEY, access);
        self.write(REFRESH_TOKEN_KEY, refresh);
    }

    /// Replace only the access token (after an explicit refresh).
    pub fn save_access_token(&self, access: &str) {
        self.write(TOKEN_KEY, access);
    }

    /// Remove all three session fields. Safe to call when already cleared.
    pub fn clear(&self) {
        self.erase(TOKEN_KEY);
        self.erase(REFRESH_TOKEN_KEY);
        self.erase(ACTIVE_CHAT_KEY);
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Remembered chat id; malformed values read as none.
    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.read(ACTIVE_CHAT_KEY)?.parse().ok()
    }

    pub fn set_active_chat_id(&self, id: Option<ChatId>) {
        match id {
            Some(id) => self.write(ACTIVE_CHAT_KEY, &id.to_string()),
            None => self.erase(ACTIVE_CHAT_KEY),
        }
    }

    /// Current session, or None when no access token is stored.
    pub fn snapshot(&self) -> Option<Session> {
        Some(Session {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token().unwrap_or_default(),
            active_chat_id: self.active_chat_id(),
        })
    }
}
