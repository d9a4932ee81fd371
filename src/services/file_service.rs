use std::fs;
use std::path::{Path, PathBuf};
use serde_json::{Map, Value};
use uuid::Uuid;
use log::{debug, warn};
use crate::error::{ChatError, Result};

/// Key the conversation id is stored under in the session file.
pub const CONVERSATION_ID_KEY: &str = "docchat.conversationId";

const SESSION_FILE: &str = "session.json";

pub fn get_app_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ChatError::Storage("Could not find data directory".to_string()))?
        .join("DocChat");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

pub fn get_exports_dir() -> Result<PathBuf> {
    let exports_dir = get_app_data_dir()?.join("exports");

    if !exports_dir.exists() {
        fs::create_dir_all(&exports_dir)?;
    }

    Ok(exports_dir)
}

/// Small string key-value file that survives restarts. Only the
/// conversation id lives here; values never expire.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SESSION_FILE),
        }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(&get_app_data_dir()?))
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(ChatError::Storage(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .load()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.load().unwrap_or_default();
        map.insert(key.to_string(), Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Returns the stored conversation id, creating and persisting one on
    /// first use. A readable existing value is never replaced. An unreadable
    /// store counts as empty, and failing to persist the new id only costs
    /// continuity across restarts.
    pub fn load_or_create_conversation_id(&self) -> String {
        match self.get(CONVERSATION_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("Ignoring unreadable session store: {}", e),
        }

        let id = Uuid::new_v4().to_string();
        match self.set(CONVERSATION_ID_KEY, &id) {
            Ok(()) => debug!("Created conversation id {}", id),
            Err(e) => warn!("Conversation id {} will not survive a restart: {}", id, e),
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn conversation_id_survives_reload() {
        let dir = tempdir().unwrap();

        let first = SessionStore::new(dir.path())
            .load_or_create_conversation_id();
        let second = SessionStore::new(dir.path())
            .load_or_create_conversation_id();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn existing_value_is_reused() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.set(CONVERSATION_ID_KEY, "conv-42").unwrap();

        assert_eq!(store.load_or_create_conversation_id(), "conv-42");
    }

    #[test]
    fn other_keys_are_preserved() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.set("theme", "dark").unwrap();
        let id = store.load_or_create_conversation_id();

        assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(store.get(CONVERSATION_ID_KEY).unwrap(), Some(id));
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "[1, 2]").unwrap();

        let err = SessionStore::new(dir.path()).get("x").unwrap_err();
        assert!(matches!(err, ChatError::Storage(_)));
    }

    #[test]
    fn truncated_file_gets_a_fresh_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        fs::write(&path, r#"{"docchat.conversationId": "abc""#).unwrap();

        let store = SessionStore::new(dir.path());
        let id = store.load_or_create_conversation_id();

        assert!(!id.is_empty());
        assert_ne!(id, "abc");
        assert_eq!(store.get(CONVERSATION_ID_KEY).unwrap(), Some(id));
    }

    #[test]
    fn non_utf8_file_gets_a_fresh_id() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), [0xff, 0xfe]).unwrap();

        let store = SessionStore::new(dir.path());
        let id = store.load_or_create_conversation_id();

        assert_eq!(store.load_or_create_conversation_id(), id);
    }
}
