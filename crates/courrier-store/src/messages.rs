use std::collections::BTreeSet;

use rusqlite::params;

use courrier_shared::{ConversationId, LogPosition, Message, MessageBody, MessageId, UserId};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or refresh one cached message.
    ///
    /// Re-upserting the same id is the normal case: live snapshots redeliver
    /// messages whose `read_by` set has grown.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO messages
                 (id, conversation_id, sender_id, sender_name, body, timestamp, read_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.as_str(),
                message.sender_name,
                serde_json::to_string(&message.body)?,
                ts_to_sql(message.timestamp),
                serde_json::to_string(&message.read_by)?,
            ],
        )?;
        Ok(())
    }

    /// Upsert a whole batch inside one transaction.
    pub fn upsert_messages(&mut self, messages: &[Message]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        for message in messages {
            tx.execute(
                "INSERT OR REPLACE INTO messages
                     (id, conversation_id, sender_id, sender_name, body, timestamp, read_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.sender_id.as_str(),
                    message.sender_name,
                    serde_json::to_string(&message.body)?,
                    ts_to_sql(message.timestamp),
                    serde_json::to_string(&message.read_by)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cached messages for one conversation, newest first, optionally
    /// strictly older than `before`.
    pub fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        before: Option<&LogPosition>,
    ) -> Result<Vec<Message>> {
        let mut stmt;
        let rows = match before {
            Some(cursor) => {
                stmt = self.conn().prepare(
                    "SELECT id, conversation_id, sender_id, sender_name, body, timestamp, read_by
                     FROM messages
                     WHERE conversation_id = ?1
                       AND (timestamp < ?2 OR (timestamp = ?2 AND id < ?3))
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?4",
                )?;
                stmt.query_map(
                    params![
                        conversation_id.to_string(),
                        ts_to_sql(cursor.timestamp),
                        cursor.message_id.to_string(),
                        limit,
                    ],
                    row_to_message,
                )?
            }
            None => {
                stmt = self.conn().prepare(
                    "SELECT id, conversation_id, sender_id, sender_name, body, timestamp, read_by
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2",
                )?;
                stmt.query_map(params![conversation_id.to_string(), limit], row_to_message)?
            }
        };

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, sender_name, body, timestamp, read_by
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let sender_name: String = row.get(3)?;
    let body_json: String = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let read_by_json: String = row.get(6)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conversation_id = uuid::Uuid::parse_str(&conversation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let body: MessageBody = serde_json::from_str(&body_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let timestamp = ts_from_sql(&ts_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let read_by: BTreeSet<UserId> = serde_json::from_str(&read_by_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId::new(sender_id),
        sender_name,
        body,
        timestamp,
        read_by,
    })
}
