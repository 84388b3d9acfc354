//! Persistence for this device's push registration.
//!
//! A single row records the install id, the owning user, the current push
//! token, and whether notification permission was denied; a companion table
//! records topic memberships so they survive restarts.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use courrier_shared::{DeviceId, UserId};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::Result;

/// The persisted registration state of this install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Stable install identifier.
    pub device_id: DeviceId,
    /// User this device is registered against, once logged in.
    pub user_id: Option<UserId>,
    /// Push token, `None` until the gateway hands one out.
    pub push_token: Option<String>,
    /// Platform tag (e.g. "android", "ios", "desktop").
    pub platform: String,
    /// Whether the user denied notification permission.
    pub permission_denied: bool,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Fresh record for a first launch.
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            device_id: DeviceId::new(),
            user_id: None,
            push_token: None,
            platform: platform.into(),
            permission_denied: false,
            updated_at: Utc::now(),
        }
    }
}

impl Database {
    /// Load the registration row, if one was ever saved.
    pub fn load_device(&self) -> Result<Option<DeviceRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT device_id, user_id, push_token, platform, permission_denied, updated_at
                 FROM device_registration LIMIT 1",
                [],
                row_to_device,
            )
            .optional()?;
        Ok(record)
    }

    /// Save (or replace) the registration row.
    pub fn save_device(&self, record: &DeviceRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO device_registration
                 (device_id, user_id, push_token, platform, permission_denied, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.device_id.to_string(),
                record.user_id.as_ref().map(|u| u.as_str().to_string()),
                record.push_token,
                record.platform,
                record.permission_denied,
                ts_to_sql(record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Record a topic membership. Returns `true` if it was newly added.
    pub fn add_topic(&self, topic: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO device_topics (topic, subscribed_at) VALUES (?1, ?2)",
            params![topic, ts_to_sql(Utc::now())],
        )?;
        Ok(affected > 0)
    }

    /// Remove a topic membership. Returns `true` if it existed.
    pub fn remove_topic(&self, topic: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM device_topics WHERE topic = ?1", params![topic])?;
        Ok(affected > 0)
    }

    /// All persisted topic memberships.
    pub fn topics(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT topic FROM device_topics ORDER BY topic ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut topics = Vec::new();
        for row in rows {
            topics.push(row?);
        }
        Ok(topics)
    }
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    let device_str: String = row.get(0)?;
    let user_id: Option<String> = row.get(1)?;
    let push_token: Option<String> = row.get(2)?;
    let platform: String = row.get(3)?;
    let permission_denied: bool = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let device_id = uuid::Uuid::parse_str(&device_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let updated_at = ts_from_sql(&updated_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DeviceRecord {
        device_id: DeviceId(device_id),
        user_id: user_id.map(UserId::new),
        push_token,
        platform,
        permission_denied,
        updated_at,
    })
}
