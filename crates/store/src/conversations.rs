//! Conversations and their ordered messages.
//!
//! `add_message` is the single write path for messages: it inserts the row,
//! touches the conversation, and bumps the unobserved-token counter in one
//! transaction so the counter can never drift from the message log.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use bs_domain::tokens::estimate_tokens;
use bs_domain::Result;

use crate::{db_err, now_iso, ConversationRow, MessageRow, Store};

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get("id")?,
        title: row.get("title")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: row.get("role")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_conversation(&self, title: Option<&str>) -> Result<ConversationRow> {
        let row = ConversationRow {
            id: Uuid::new_v4().to_string(),
            title: title.map(|t| t.to_string()),
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.title, row.created_at, row.updated_at],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO memory_state (conversation_id) VALUES (?1)",
                params![row.id],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        Ok(row)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM conversations WHERE id = ?1",
                params![id],
                row_to_conversation,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn list_recent_conversations(&self, limit: usize) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM conversations ORDER BY updated_at DESC LIMIT ?1")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_conversation)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// Conversations whose `updated_at` is at or after `cutoff_iso`
    /// (lexicographic comparison is valid for ISO-8601 UTC strings).
    pub fn conversations_updated_since(&self, cutoff_iso: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM conversations WHERE updated_at >= ?1
                     ORDER BY updated_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![cutoff_iso], row_to_conversation)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// Atomic message insert: message row + conversation touch + unobserved
    /// token bump, using the shared estimator.
    pub fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<MessageRow> {
        let created_at = now_iso();
        let tokens = estimate_tokens(content) as i64;
        let id = self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role, content, created_at],
            )
            .map_err(db_err)?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, created_at],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO memory_state (conversation_id, unobserved_token_count)
                 VALUES (?1, ?2)
                 ON CONFLICT(conversation_id)
                 DO UPDATE SET unobserved_token_count = unobserved_token_count + ?2",
                params![conversation_id, tokens],
            )
            .map_err(db_err)?;
            Ok(id)
        })?;
        Ok(MessageRow {
            id,
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages WHERE conversation_id = ?1
                     ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id], row_to_message)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// Messages strictly after `after_id` (all messages when `None`).
    pub fn messages_after(
        &self,
        conversation_id: &str,
        after_id: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM messages
                     WHERE conversation_id = ?1 AND id > ?2
                     ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id, after_id.unwrap_or(0)], row_to_message)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    /// The last `n` messages in order.
    pub fn last_messages(&self, conversation_id: &str, n: usize) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM (
                         SELECT * FROM messages WHERE conversation_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT ?2
                     ) ORDER BY created_at, id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![conversation_id, n as i64], row_to_message)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_message_bumps_counters() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();

        let m1 = store.add_message(&conv.id, "user", "hello there").unwrap();
        let state = store.memory_state(&conv.id).unwrap().unwrap();
        assert_eq!(
            state.unobserved_token_count,
            estimate_tokens("hello there") as i64
        );
        assert!(m1.id > 0);

        store.add_message(&conv.id, "assistant", "hi!").unwrap();
        let state = store.memory_state(&conv.id).unwrap().unwrap();
        assert_eq!(
            state.unobserved_token_count,
            (estimate_tokens("hello there") + estimate_tokens("hi!")) as i64
        );
    }

    #[test]
    fn messages_after_respects_cursor() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        let m1 = store.add_message(&conv.id, "user", "one").unwrap();
        store.add_message(&conv.id, "assistant", "two").unwrap();
        store.add_message(&conv.id, "user", "three").unwrap();

        let all = store.messages_after(&conv.id, None).unwrap();
        assert_eq!(all.len(), 3);

        let tail = store.messages_after(&conv.id, Some(m1.id)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "two");
    }

    #[test]
    fn last_messages_returns_ordered_tail() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        for i in 0..5 {
            store
                .add_message(&conv.id, "user", &format!("msg {i}"))
                .unwrap();
        }
        let tail = store.last_messages(&conv.id, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "msg 3");
        assert_eq!(tail[1].content, "msg 4");
    }

    #[test]
    fn message_insert_touches_conversation() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(Some("t")).unwrap();
        store.add_message(&conv.id, "user", "x").unwrap();
        let got = store.get_conversation(&conv.id).unwrap().unwrap();
        assert!(got.updated_at >= conv.updated_at);
    }
}
