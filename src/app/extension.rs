use std::sync::mpsc::Sender;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::db::Database;

/// Browser extension facilities a plugin may call once loaded: key/value storage and broadcast.
pub(crate) trait ExtensionApi {
    fn storage_get(&mut self, key: &str) -> Result<Option<Value>>;
    fn storage_set(&mut self, key: &str, value: &Value) -> Result<()>;
    fn storage_remove(&mut self, key: &str) -> Result<bool>;
    fn send_message(&mut self, message: &Value) -> Result<()>;
}

/// Storage backed by the local SQLite file; broadcasts go to whoever holds the receiver.
pub(crate) struct SqliteExtensionApi {
    db: Database,
    broadcast: Option<Sender<Value>>,
}

impl SqliteExtensionApi {
    pub(crate) fn new(db: Database, broadcast: Option<Sender<Value>>) -> Self {
        Self { db, broadcast }
    }
}

impl ExtensionApi for SqliteExtensionApi {
    fn storage_get(&mut self, key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.db.get(key)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("stored value for `{key}` is not valid JSON"))?;
        Ok(Some(value))
    }

    fn storage_set(&mut self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.db
            .set(key, &raw)
            .with_context(|| format!("failed to store `{key}`"))
    }

    fn storage_remove(&mut self, key: &str) -> Result<bool> {
        self.db.remove(key)
    }

    fn send_message(&mut self, message: &Value) -> Result<()> {
        let Some(sender) = &self.broadcast else {
            return Ok(());
        };
        sender
            .send(message.clone())
            .map_err(|_| anyhow!("broadcast receiver is gone"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use serde_json::json;

    use super::*;

    #[test]
    fn values_round_trip_through_sqlite() {
        let db = Database::open_in_memory().expect("db");
        let mut api = SqliteExtensionApi::new(db, None);
        api.storage_set("demo_progress_Show_1", &json!({"progress": 42.0}))
            .expect("set");
        let value = api
            .storage_get("demo_progress_Show_1")
            .expect("get")
            .expect("value should exist");
        assert_eq!(value["progress"], 42.0);
        assert!(api.storage_remove("demo_progress_Show_1").expect("remove"));
        assert!(api.storage_get("demo_progress_Show_1").expect("get").is_none());
    }

    #[test]
    fn corrupt_stored_value_is_an_error() {
        let db = Database::open_in_memory().expect("db");
        db.set("broken", "{not json").expect("raw set");
        let mut api = SqliteExtensionApi::new(db, None);
        assert!(api.storage_get("broken").is_err());
    }

    #[test]
    fn broadcast_reaches_receiver_and_fails_once_dropped() {
        let (tx, rx) = mpsc::channel();
        let mut api = SqliteExtensionApi::new(Database::open_in_memory().expect("db"), Some(tx));
        api.send_message(&json!({"type": "progress"})).expect("send");
        assert_eq!(rx.try_recv().expect("message")["type"], "progress");
        drop(rx);
        assert!(api.send_message(&json!({})).is_err());
    }
}
