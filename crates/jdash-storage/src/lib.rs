use chrono::{DateTime, Utc};
use jdash_core::store::Credential;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

pub const SETTINGS_SCHEMA_VERSION: i64 = 1;

pub const ADDITIONAL_CONTROLLERS_KEY: &str = "additionalControllers";
pub const DISABLE_ANALYTICS_KEY: &str = "disableAnalytics";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// A controller the user registered in addition to the configured one.
/// Persisted as `[url, {user, password}, identityProviderAvailable,
/// isAdditionalController]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredController {
    pub ws_controller_url: String,
    pub credential: Option<Credential>,
    pub identity_provider_available: bool,
    pub additional_controller: bool,
}

impl StoredController {
    fn to_value(&self) -> Value {
        let credential = match &self.credential {
            Some(credential) => json!({"user": credential.user, "password": credential.password}),
            None => Value::Null,
        };
        json!([
            self.ws_controller_url,
            credential,
            self.identity_provider_available,
            self.additional_controller,
        ])
    }

    fn from_value(value: &Value) -> Result<Self, StorageError> {
        let items = value
            .as_array()
            .ok_or_else(|| StorageError::Serialization("controller entry is not a list".to_string()))?;
        let url = items
            .first()
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StorageError::Serialization("controller entry has no url".to_string()))?;
        let credential = match items.get(1) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<Credential>(raw.clone())
                    .map_err(|err| StorageError::Serialization(err.to_string()))?,
            ),
        };
        let flag = |index: usize| items.get(index).and_then(Value::as_bool).unwrap_or(false);
        Ok(Self {
            ws_controller_url: url.to_string(),
            credential,
            identity_provider_available: flag(2),
            additional_controller: flag(3),
        })
    }
}

/// Local key/value settings. Values are stored as JSON text.
pub struct SettingsStore {
    conn: Connection,
}

impl SettingsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SETTINGS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SETTINGS_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_settings.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|err| StorageError::Serialization(err.to_string()))
        })
        .transpose()
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let text =
            serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, text, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(changes > 0)
    }

    pub fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| {
            DateTime::parse_from_rfc3339(&text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| StorageError::Timestamp(err.to_string()))
        })
        .transpose()
    }

    /// Fails with `Serialization` when the stored list cannot be parsed;
    /// callers decide whether to ignore it.
    pub fn additional_controllers(&self) -> Result<Vec<StoredController>, StorageError> {
        match self.get(ADDITIONAL_CONTROLLERS_KEY)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(StoredController::from_value).collect(),
            Some(_) => Err(StorageError::Serialization(
                "additional controllers is not a list".to_string(),
            )),
        }
    }

    pub fn set_additional_controllers(
        &self,
        controllers: &[StoredController],
    ) -> Result<(), StorageError> {
        let value = Value::Array(controllers.iter().map(StoredController::to_value).collect());
        self.set(ADDITIONAL_CONTROLLERS_KEY, &value)
    }

    /// Adds a controller, replacing any entry with the same url. An
    /// unparseable stored list is an error and is left untouched.
    pub fn add_additional_controller(&self, controller: StoredController) -> Result<(), StorageError> {
        let mut controllers = self.additional_controllers()?;
        controllers.retain(|existing| existing.ws_controller_url != controller.ws_controller_url);
        controllers.push(controller);
        self.set_additional_controllers(&controllers)
    }

    pub fn clear_additional_controllers(&self) -> Result<(), StorageError> {
        self.remove(ADDITIONAL_CONTROLLERS_KEY).map(|_| ())
    }

    pub fn analytics_disabled(&self) -> Result<bool, StorageError> {
        Ok(self
            .get(DISABLE_ANALYTICS_KEY)?
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    pub fn set_analytics_disabled(&self, disabled: bool) -> Result<(), StorageError> {
        self.set(DISABLE_ANALYTICS_KEY, &Value::Bool(disabled))
    }
}
