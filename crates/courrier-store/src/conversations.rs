use std::collections::BTreeSet;

use rusqlite::params;

use courrier_shared::{Conversation, ConversationId, LastMessage, UserId};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or refresh one conversation row, preview included.
    pub fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let (preview_text, preview_sender, preview_at) = match &conversation.last_message {
            Some(preview) => (
                Some(preview.text.clone()),
                Some(preview.sender_name.clone()),
                Some(ts_to_sql(preview.timestamp)),
            ),
            None => (None, None, None),
        };

        self.conn().execute(
            "INSERT OR REPLACE INTO conversations
                 (id, participants, is_group, preview_text, preview_sender, preview_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conversation.id.to_string(),
                serde_json::to_string(&conversation.participants)?,
                conversation.is_group,
                preview_text,
                preview_sender,
                preview_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, participants, is_group, preview_text, preview_sender, preview_at
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All cached conversations, most recently active first.
    pub fn conversation_previews(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participants, is_group, preview_text, preview_sender, preview_at
             FROM conversations
             ORDER BY preview_at DESC NULLS LAST",
        )?;

        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let participants_json: String = row.get(1)?;
    let is_group: bool = row.get(2)?;
    let preview_text: Option<String> = row.get(3)?;
    let preview_sender: Option<String> = row.get(4)?;
    let preview_at: Option<String> = row.get(5)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let participants: BTreeSet<UserId> = serde_json::from_str(&participants_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_message = match (preview_text, preview_sender, preview_at) {
        (Some(text), Some(sender_name), Some(at)) => {
            let timestamp = ts_from_sql(&at).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Some(LastMessage {
                text,
                sender_name,
                timestamp,
            })
        }
        _ => None,
    };

    Ok(Conversation {
        id: ConversationId(id),
        participants,
        is_group,
        last_message,
    })
}
