//! Named secrets. Values go in and are consumed internally; the API layer
//! only ever lists names.

use rusqlite::params;

use bs_domain::Result;

use crate::{db_err, now_iso, Store};

impl Store {
    pub fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO secrets (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value,
                                                 updated_at = excluded.updated_at",
                params![name, value, now_iso()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_secret(&self, name: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM secrets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn delete_secret(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM secrets WHERE name = ?1", params![name])
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }

    pub fn list_secret_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM secrets ORDER BY name")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_overwrite_delete() {
        let store = Store::open_in_memory().unwrap();
        store.set_secret("api-key", "one").unwrap();
        store.set_secret("api-key", "two").unwrap();
        assert_eq!(store.get_secret("api-key").unwrap().as_deref(), Some("two"));
        assert_eq!(store.list_secret_names().unwrap(), vec!["api-key"]);
        assert!(store.delete_secret("api-key").unwrap());
        assert!(store.get_secret("api-key").unwrap().is_none());
    }
}
