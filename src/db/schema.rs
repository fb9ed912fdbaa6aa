use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL CHECK(port BETWEEN 1 AND 65535),
            enabled BOOLEAN NOT NULL DEFAULT true,
            last_sync TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
            folder TEXT NOT NULL,
            received_at TEXT,
            sent_at TEXT,
            size INTEGER NOT NULL CHECK(size >= 0),
            subject TEXT NOT NULL DEFAULT '',
            uid INTEGER NOT NULL,
            message_id TEXT NOT NULL DEFAULT '',
            body_text TEXT NOT NULL DEFAULT '',
            body_html TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS message_flags (
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            idx INTEGER NOT NULL CHECK(idx >= 0),
            flag TEXT NOT NULL,
            PRIMARY KEY (message_id, idx)
        );

        CREATE TABLE IF NOT EXISTS message_addresses (
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK(role IN ('from', 'to', 'reply_to', 'cc', 'bcc')),
            position INTEGER NOT NULL CHECK(position >= 0),
            address TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (message_id, role, position)
        );

        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            original_name TEXT NOT NULL,
            storage_name TEXT NOT NULL UNIQUE,
            size INTEGER NOT NULL CHECK(size >= 0),
            content BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            idx INTEGER NOT NULL CHECK(idx >= 0),
            name TEXT NOT NULL DEFAULT '',
            mime_type TEXT NOT NULL DEFAULT '',
            file_id TEXT NOT NULL REFERENCES files(id),
            UNIQUE (message_id, idx)
        );

        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
            accounts_total INTEGER NOT NULL DEFAULT 0,
            accounts_failed INTEGER NOT NULL DEFAULT 0,
            imported INTEGER NOT NULL DEFAULT 0,
            moved INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_fingerprint
            ON messages(account_id, message_id, size, subject);
        CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(account_id, folder);
        CREATE INDEX IF NOT EXISTS idx_messages_received_at ON messages(received_at);
        CREATE INDEX IF NOT EXISTS idx_attachments_file_id ON attachments(file_id);
        CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs(started_at);
        "#,
    )?;

    Ok(())
}
