use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::schema;

const SCHEMA_VERSION_KEY: &str = "schema_version";
const LATEST_SCHEMA_VERSION: u32 = 1;

/// Brings the archive schema up to [`LATEST_SCHEMA_VERSION`]. Each step
/// runs in its own transaction together with its version bump.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    ensure_sync_state_table(conn)?;

    let current_version = current_schema_version(conn)?;
    if current_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "archive schema version {current_version} is newer than supported version {LATEST_SCHEMA_VERSION}"
        ));
    }

    if current_version < 1 {
        let tx = conn.transaction().context("begin schema migration v1")?;
        apply_v1(&tx)?;
        tx.commit().context("commit schema migration v1")?;
    }

    Ok(())
}

fn ensure_sync_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("ensure sync_state table for migration tracking")?;

    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1 LIMIT 1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read current schema version from sync_state")?;

    match raw {
        None => Ok(0),
        Some(version) => version
            .parse::<u32>()
            .with_context(|| format!("invalid schema version in archive: {version}")),
    }
}

fn set_schema_version(tx: &Transaction<'_>, version: u32) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![SCHEMA_VERSION_KEY, version.to_string()],
    )
    .with_context(|| format!("set schema version to {version}"))?;

    Ok(())
}

fn apply_v1(tx: &Transaction<'_>) -> Result<()> {
    schema::create_schema(tx).context("apply schema migration v1")?;
    set_schema_version(tx, 1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rusqlite::Connection;

    use super::{current_schema_version, migrate};

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'index') AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count == 1)
    }

    #[test]
    fn migrate_creates_archive_tables_on_fresh_database() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;

        migrate(&mut conn)?;
        assert_eq!(current_schema_version(&conn)?, 1);
        for table in [
            "accounts",
            "messages",
            "message_flags",
            "message_addresses",
            "attachments",
            "files",
            "sync_runs",
            "idx_messages_fingerprint",
        ] {
            assert!(table_exists(&conn, table)?, "{table} should exist");
        }
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;

        migrate(&mut conn)?;
        migrate(&mut conn)?;
        assert_eq!(current_schema_version(&conn)?, 1);
        Ok(())
    }

    #[test]
    fn migrate_refuses_newer_schema() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        conn.execute(
            "UPDATE sync_state SET value = '99' WHERE key = 'schema_version'",
            [],
        )?;

        let err = migrate(&mut conn).expect_err("newer schema must be rejected");
        assert!(err.to_string().contains("newer than supported"));
        Ok(())
    }
}
