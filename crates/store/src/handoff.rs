//! Handoff notes, written by a draining brain and read by its successor.
//! Append-only.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use bs_domain::Result;

use crate::{db_err, now_iso, HandoffNoteRow, Store};

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<HandoffNoteRow> {
    let active: String = row.get("active_conversations")?;
    let pending: String = row.get("pending_schedules")?;
    Ok(HandoffNoteRow {
        id: row.get("id")?,
        from_version: row.get("from_version")?,
        to_version: row.get("to_version")?,
        active_conversations: serde_json::from_str(&active).unwrap_or(serde_json::json!([])),
        pending_schedules: serde_json::from_str(&pending).unwrap_or(serde_json::json!([])),
        agent_notes: row.get("agent_notes")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_handoff_note(
        &self,
        from_version: &str,
        to_version: Option<&str>,
        active_conversations: &serde_json::Value,
        pending_schedules: &serde_json::Value,
        agent_notes: Option<&str>,
    ) -> Result<HandoffNoteRow> {
        let note = HandoffNoteRow {
            id: Uuid::new_v4().to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.map(|v| v.to_string()),
            active_conversations: active_conversations.clone(),
            pending_schedules: pending_schedules.clone(),
            agent_notes: agent_notes.map(|n| n.to_string()),
            created_at: now_iso(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handoff_notes (id, from_version, to_version,
                                            active_conversations, pending_schedules,
                                            agent_notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    note.id,
                    note.from_version,
                    note.to_version,
                    note.active_conversations.to_string(),
                    note.pending_schedules.to_string(),
                    note.agent_notes,
                    note.created_at,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        Ok(note)
    }

    pub fn get_handoff_note(&self, id: &str) -> Result<Option<HandoffNoteRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM handoff_notes WHERE id = ?1",
                params![id],
                row_to_note,
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn latest_handoff_note(&self) -> Result<Option<HandoffNoteRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM handoff_notes ORDER BY created_at DESC LIMIT 1",
                [],
                row_to_note,
            )
            .optional()
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let note = store
            .insert_handoff_note(
                "v1",
                Some("v2"),
                &serde_json::json!([{"id": "c1"}]),
                &serde_json::json!([]),
                Some("mid-deploy"),
            )
            .unwrap();

        let got = store.get_handoff_note(&note.id).unwrap().unwrap();
        assert_eq!(got.from_version, "v1");
        assert_eq!(got.to_version.as_deref(), Some("v2"));
        assert_eq!(got.active_conversations[0]["id"], "c1");
        assert_eq!(got.agent_notes.as_deref(), Some("mid-deploy"));

        let latest = store.latest_handoff_note().unwrap().unwrap();
        assert_eq!(latest.id, note.id);
    }
}
