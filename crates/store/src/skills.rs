//! Skill metadata rows.

use rusqlite::{params, OptionalExtension, Row};

use bs_domain::{Error, Result};

use crate::{db_err, SkillRow, Store};

fn row_to_skill(row: &Row<'_>) -> rusqlite::Result<SkillRow> {
    let config: String = row.get("config")?;
    let stdio_args: String = row.get("stdio_args")?;
    Ok(SkillRow {
        id: row.get("id")?,
        name: row.get("name")?,
        version: row.get("version")?,
        description: row.get("description")?,
        tier: row.get("tier")?,
        transport: row.get("transport")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        config: serde_json::from_str(&config).unwrap_or(serde_json::json!({})),
        stdio_command: row.get("stdio_command")?,
        stdio_args: serde_json::from_str(&stdio_args).unwrap_or_default(),
        http_url: row.get("http_url")?,
        instruction_path: row.get("instruction_path")?,
        instruction_content: row.get("instruction_content")?,
        owner: row.get("owner")?,
        tags: row.get("tags")?,
    })
}

impl Store {
    pub fn upsert_skill(&self, skill: &SkillRow) -> Result<()> {
        skill.validate().map_err(Error::Validation)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO skills (id, name, version, description, tier, transport,
                                     enabled, config, stdio_command, stdio_args, http_url,
                                     instruction_path, instruction_content, owner, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     version = excluded.version,
                     description = excluded.description,
                     tier = excluded.tier,
                     transport = excluded.transport,
                     enabled = excluded.enabled,
                     config = excluded.config,
                     stdio_command = excluded.stdio_command,
                     stdio_args = excluded.stdio_args,
                     http_url = excluded.http_url,
                     instruction_path = excluded.instruction_path,
                     instruction_content = excluded.instruction_content,
                     owner = excluded.owner,
                     tags = excluded.tags",
                params![
                    skill.id,
                    skill.name,
                    skill.version,
                    skill.description,
                    skill.tier,
                    skill.transport,
                    skill.enabled as i64,
                    skill.config.to_string(),
                    skill.stdio_command,
                    serde_json::to_string(&skill.stdio_args)?,
                    skill.http_url,
                    skill.instruction_path,
                    skill.instruction_content,
                    skill.owner,
                    skill.tags,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_skill(&self, id: &str) -> Result<Option<SkillRow>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT * FROM skills WHERE id = ?1", params![id], row_to_skill)
                .optional()
                .map_err(db_err)
        })
    }

    pub fn list_skills(&self, enabled_only: bool) -> Result<Vec<SkillRow>> {
        self.with_conn(|conn| {
            let sql = if enabled_only {
                "SELECT * FROM skills WHERE enabled = 1 ORDER BY name"
            } else {
                "SELECT * FROM skills ORDER BY name"
            };
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let rows = stmt.query_map([], row_to_skill).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    pub fn delete_skill(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM skills WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(changed == 1)
        })
    }
}
