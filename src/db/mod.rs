use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, ToSql, Transaction, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_FILE_SIZE;

use self::files::StoredFile;
use self::models::{
    format_timestamp, parse_timestamp, Account, AddressEntry, Attachment, Flag, Message,
    MessageRef, NewMessage, RunStatus, RunTotals, SyncRun,
};

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("file '{name}' is {size} bytes, above the {max} byte limit")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub mod files;
pub mod migrations;
pub mod models;
pub mod schema;

const MESSAGE_COLUMNS: &str = "id, account_id, folder, received_at, sent_at, size, subject, uid, \
     message_id, body_text, body_html, created_at";

/// `sync_state` row naming the run that currently owns the archive.
const RUN_LEASE_KEY: &str = "run_lease";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, accounts_total, accounts_failed, \
     imported, moved, failed, error";

#[derive(Debug, Clone, Default)]
pub struct MessageFilters {
    pub account_id: Option<String>,
    pub folder: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountMessageCount {
    pub account_id: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_accounts: i64,
    pub total_messages: i64,
    pub total_attachments: i64,
    pub attachment_bytes: i64,
    pub messages_by_account: Vec<AccountMessageCount>,
    pub last_run: Option<SyncRun>,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
    max_file_size: u64,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Result<Self, DbError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let mut db = Self {
            conn,
            path,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&mut self) -> Result<(), DbError> {
        migrations::migrate(&mut self.conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e}")))
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".imapbackup").join("imapbackup.db"))
    }

    /// Attachments larger than this are refused inside the message transaction.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Accounts ────────────────────────────────────────────────────

    pub fn insert_account(&self, account: &Account) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO accounts (account_id, username, password, host, port, enabled, last_sync)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                username = excluded.username,
                password = excluded.password,
                host = excluded.host,
                port = excluded.port,
                enabled = excluded.enabled
            "#,
            params![
                account.account_id,
                account.username,
                account.password,
                account.host,
                account.port,
                account.enabled,
                account.last_sync,
            ],
        )?;

        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, DbError> {
        let account = self
            .conn
            .query_row(
                r#"
                SELECT account_id, username, password, host, port, enabled, last_sync
                FROM accounts
                WHERE account_id = ?
                "#,
                [account_id],
                Account::from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, DbError> {
        self.query_accounts(false)
    }

    pub fn list_enabled_accounts(&self) -> Result<Vec<Account>, DbError> {
        self.query_accounts(true)
    }

    fn query_accounts(&self, enabled_only: bool) -> Result<Vec<Account>, DbError> {
        let mut sql = String::from(
            "SELECT account_id, username, password, host, port, enabled, last_sync FROM accounts",
        );
        if enabled_only {
            sql.push_str(" WHERE enabled = true");
        }
        sql.push_str(" ORDER BY account_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], Account::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Messages cascade with the account; attachment files no longer
    /// referenced are dropped in the same transaction.
    pub fn remove_account(&self, account_id: &str) -> Result<usize, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM accounts WHERE account_id = ?", [account_id])?;
        if deleted > 0 {
            tx.execute(
                "DELETE FROM files WHERE id NOT IN (SELECT file_id FROM attachments)",
                [],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn set_account_enabled(&self, account_id: &str, enabled: bool) -> Result<usize, DbError> {
        let updated = self.conn.execute(
            "UPDATE accounts SET enabled = ? WHERE account_id = ?",
            params![enabled, account_id],
        )?;
        Ok(updated)
    }

    pub fn touch_last_sync(&self, account_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE accounts SET last_sync = ? WHERE account_id = ?",
            params![format_timestamp(&Utc::now()), account_id],
        )?;
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Messages of `account_id` whose message-id, size and subject all match.
    pub fn find_by_fingerprint(
        &self,
        account_id: &str,
        message_id: &str,
        size: u64,
        subject: &str,
    ) -> Result<Vec<MessageRef>, DbError> {
        let size = to_sql_int(size, "size")?;
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, folder, uid, received_at, sent_at
            FROM messages
            WHERE account_id = ? AND message_id = ? AND size = ? AND subject = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let candidates = stmt
            .query_map(
                params![account_id, message_id, size, subject],
                MessageRef::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    pub fn set_message_folder(&self, id: &str, folder: &str) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE messages SET folder = ? WHERE id = ?",
            params![folder, id],
        )?;
        if updated == 0 {
            return Err(DbError::InvalidRecord(format!("message {id} does not exist")));
        }
        Ok(())
    }

    /// Writes the message and every sub-entity in one transaction. Nothing
    /// is visible unless all rows, including attachment files, were saved.
    pub fn insert_message(&self, message: &NewMessage) -> Result<String, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let id = Uuid::new_v4().to_string();

        tx.execute(
            r#"
            INSERT INTO messages (
                id, account_id, folder, received_at, sent_at, size, subject, uid,
                message_id, body_text, body_html
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                id,
                message.account_id,
                message.folder,
                message.received_at.as_ref().map(format_timestamp),
                message.sent_at.as_ref().map(format_timestamp),
                to_sql_int(message.size, "size")?,
                message.subject,
                message.uid,
                message.message_id,
                message.body_text,
                message.body_html,
            ],
        )?;

        for (idx, flag) in message.flags.iter().enumerate() {
            tx.execute(
                "INSERT INTO message_flags (message_id, idx, flag) VALUES (?, ?, ?)",
                params![id, idx as i64, flag],
            )?;
        }

        for entry in &message.addresses {
            tx.execute(
                r#"
                INSERT INTO message_addresses (message_id, role, position, address, display_name)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    entry.role.as_str(),
                    entry.position as i64,
                    entry.address,
                    entry.display_name,
                ],
            )?;
        }

        for (idx, attachment) in message.attachments.iter().enumerate() {
            let file =
                StoredFile::from_bytes(&attachment.content, &attachment.name, self.max_file_size)?;
            tx.execute(
                r#"
                INSERT INTO files (id, original_name, storage_name, size, content)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    file.id,
                    file.original_name,
                    file.storage_name,
                    file.size(),
                    file.content,
                ],
            )?;
            tx.execute(
                r#"
                INSERT INTO attachments (id, message_id, idx, name, mime_type, file_id)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    idx as i64,
                    attachment.name,
                    attachment.mime_type,
                    file.id,
                ],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, DbError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let message = self
            .conn
            .query_row(&sql, [id], Message::from_row)
            .optional()?;
        Ok(message)
    }

    pub fn list_messages(&self, mut filters: MessageFilters) -> Result<Vec<Message>, DbError> {
        if filters.limit == 0 {
            filters.limit = 50;
        }

        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(account_id) = filters.account_id {
            sql.push_str(" AND account_id = ?");
            params_vec.push(Box::new(account_id));
        }

        if let Some(folder) = filters.folder {
            sql.push_str(" AND folder = ?");
            params_vec.push(Box::new(folder));
        }

        sql.push_str(" ORDER BY received_at DESC, uid DESC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(filters.limit as i64));
        params_vec.push(Box::new(filters.offset as i64));

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_refs.as_slice(), Message::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn message_flags(&self, message_id: &str) -> Result<Vec<Flag>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, idx, flag FROM message_flags WHERE message_id = ? ORDER BY idx ASC",
        )?;
        let flags = stmt
            .query_map([message_id], Flag::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(flags)
    }

    /// Address entries grouped by role in from, to, reply-to, cc, bcc order.
    pub fn message_addresses(&self, message_id: &str) -> Result<Vec<AddressEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, role, position, address, display_name
            FROM message_addresses
            WHERE message_id = ?
            ORDER BY CASE role
                WHEN 'from' THEN 0
                WHEN 'to' THEN 1
                WHEN 'reply_to' THEN 2
                WHEN 'cc' THEN 3
                ELSE 4
            END, position ASC
            "#,
        )?;
        let entries = stmt
            .query_map([message_id], AddressEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn message_attachments(&self, message_id: &str) -> Result<Vec<Attachment>, DbError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.message_id, a.idx, a.name, a.mime_type, a.file_id, f.size
            FROM attachments a
            JOIN files f ON f.id = a.file_id
            WHERE a.message_id = ?
            ORDER BY a.idx ASC
            "#,
        )?;
        let attachments = stmt
            .query_map([message_id], Attachment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    pub fn file_content(&self, file_id: &str) -> Result<Option<Vec<u8>>, DbError> {
        let content = self
            .conn
            .query_row("SELECT content FROM files WHERE id = ?", [file_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(content)
    }

    // ── Sync runs ───────────────────────────────────────────────────

    /// Claims the archive-wide run lease and records a new `running` run.
    ///
    /// Returns `None` while another run holds a lease whose heartbeat is
    /// younger than `stale_after`, whichever process it lives in. A stale
    /// lease is taken over and the runs it left behind are closed as failed.
    pub fn claim_run(&self, stale_after: Duration) -> Result<Option<SyncRun>, DbError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let holder: Option<(Option<String>, String)> = tx
            .query_row(
                "SELECT value, updated_at FROM sync_state WHERE key = ?",
                [RUN_LEASE_KEY],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((Some(holder), heartbeat)) = holder {
            let fresh = parse_timestamp(&heartbeat)
                .map(|at| match now.signed_duration_since(at).to_std() {
                    Ok(age) => age < stale_after,
                    // Heartbeat ahead of our clock.
                    Err(_) => true,
                })
                .unwrap_or(false);
            if fresh {
                debug!(run = %holder, "run lease held");
                return Ok(None);
            }
            warn!(run = %holder, %heartbeat, "taking over stale run lease");
        }

        let abandoned = tx.execute(
            "UPDATE sync_runs SET status = ?, finished_at = ?, error = ? WHERE status = ?",
            params![
                RunStatus::Failed.to_string(),
                format_timestamp(&now),
                "abandoned",
                RunStatus::Running.to_string(),
            ],
        )?;
        if abandoned > 0 {
            warn!(abandoned, "closed runs left running by a previous process");
        }

        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            started_at: format_timestamp(&now),
            finished_at: None,
            status: RunStatus::Running,
            accounts_total: 0,
            accounts_failed: 0,
            imported: 0,
            moved: 0,
            failed: 0,
            error: None,
        };
        tx.execute(
            "INSERT INTO sync_runs (id, started_at, status) VALUES (?, ?, ?)",
            params![run.id, run.started_at, run.status.to_string()],
        )?;
        tx.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![RUN_LEASE_KEY, run.id, run.started_at],
        )?;
        tx.commit()?;
        Ok(Some(run))
    }

    /// Keeps the lease of `run_id` fresh. Returns false if the lease was lost.
    pub fn heartbeat_run(&self, run_id: &str) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE sync_state SET updated_at = ? WHERE key = ? AND value = ?",
            params![format_timestamp(&Utc::now()), RUN_LEASE_KEY, run_id],
        )?;
        Ok(updated > 0)
    }

    /// Records the outcome of `run_id` and releases its lease.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        totals: &RunTotals,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            r#"
            UPDATE sync_runs SET
                finished_at = ?,
                status = ?,
                accounts_total = ?,
                accounts_failed = ?,
                imported = ?,
                moved = ?,
                failed = ?,
                error = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![
                format_timestamp(&Utc::now()),
                status.to_string(),
                totals.accounts_total as i64,
                totals.accounts_failed as i64,
                totals.imported as i64,
                totals.moved as i64,
                totals.failed as i64,
                error,
                run_id,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::InvalidRecord(format!(
                "sync run {run_id} is not running"
            )));
        }
        tx.execute(
            "DELETE FROM sync_state WHERE key = ? AND value = ?",
            params![RUN_LEASE_KEY, run_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>, DbError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map([limit.max(1) as i64], SyncRun::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats, DbError> {
        let total_accounts: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        let total_messages: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let total_attachments: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))?;
        let attachment_bytes: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM files",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT account_id, COUNT(*) AS count FROM messages GROUP BY account_id ORDER BY count DESC",
        )?;
        let messages_by_account = stmt
            .query_map([], |row| {
                Ok(AccountMessageCount {
                    account_id: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let last_run = self.list_runs(1)?.into_iter().next();

        Ok(DatabaseStats {
            total_accounts,
            total_messages,
            total_attachments,
            attachment_bytes,
            messages_by_account,
            last_run,
        })
    }
}

fn to_sql_int(value: u64, field: &str) -> Result<i64, DbError> {
    i64::try_from(value)
        .map_err(|_| DbError::InvalidRecord(format!("{field} {value} does not fit in INTEGER")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{Database, DbError, MessageFilters};
    use crate::db::models::{
        Account, AddressRole, NewAddress, NewAttachment, NewMessage, RunStatus, RunTotals,
    };

    fn sample_account() -> Account {
        Account {
            account_id: "acc-1".to_string(),
            username: "owner@example.com".to_string(),
            password: "secret".to_string(),
            host: "imap.example.com".to_string(),
            port: 993,
            enabled: true,
            last_sync: None,
        }
    }

    fn sample_message() -> NewMessage {
        NewMessage {
            account_id: "acc-1".to_string(),
            folder: "INBOX".to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 1, 18, 10, 0, 0).single(),
            sent_at: Utc.with_ymd_and_hms(2025, 1, 18, 9, 59, 0).single(),
            size: 2048,
            subject: "Project kickoff".to_string(),
            uid: 101,
            message_id: "kickoff@example.com".to_string(),
            body_text: "Let us meet tomorrow".to_string(),
            body_html: "<p>Let us meet tomorrow</p>".to_string(),
            flags: vec!["\\Seen".to_string(), "\\Flagged".to_string()],
            addresses: vec![
                NewAddress {
                    role: AddressRole::From,
                    position: 0,
                    address: "alice@example.com".to_string(),
                    display_name: "Alice".to_string(),
                },
                NewAddress {
                    role: AddressRole::To,
                    position: 0,
                    address: "owner@example.com".to_string(),
                    display_name: String::new(),
                },
            ],
            attachments: vec![NewAttachment {
                name: "agenda.txt".to_string(),
                mime_type: "text/plain".to_string(),
                content: b"1. intro".to_vec(),
            }],
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    }

    #[test]
    fn insert_message_writes_all_sub_entities() {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&sample_account()).expect("insert account");

        let id = db.insert_message(&sample_message()).expect("insert message");

        let message = db.get_message(&id).expect("get message").expect("exists");
        assert_eq!(message.folder, "INBOX");
        assert_eq!(message.received_at.as_deref(), Some("2025-01-18T10:00:00Z"));

        let flags = db.message_flags(&id).expect("flags");
        assert_eq!(
            flags.iter().map(|f| (f.idx, f.flag.as_str())).collect::<Vec<_>>(),
            vec![(0, "\\Seen"), (1, "\\Flagged")]
        );

        let addresses = db.message_addresses(&id).expect("addresses");
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].role, AddressRole::From);

        let attachments = db.message_attachments(&id).expect("attachments");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].size, 8);
        let content = db
            .file_content(&attachments[0].file_id)
            .expect("file content")
            .expect("file exists");
        assert_eq!(content, b"1. intro");
    }

    #[test]
    fn oversize_attachment_rolls_back_whole_message() {
        let db = Database::open_in_memory()
            .expect("open db")
            .with_max_file_size(4);
        db.insert_account(&sample_account()).expect("insert account");

        let err = db
            .insert_message(&sample_message())
            .expect_err("attachment above limit");
        assert!(matches!(err, DbError::FileTooLarge { .. }));

        for table in ["messages", "message_flags", "message_addresses", "attachments", "files"] {
            assert_eq!(count(&db, table), 0, "{table} should be empty after rollback");
        }
    }

    #[test]
    fn message_for_unknown_account_is_rejected() {
        let db = Database::open_in_memory().expect("open db");
        assert!(db.insert_message(&sample_message()).is_err());
        assert_eq!(count(&db, "messages"), 0);
    }

    #[test]
    fn fingerprint_lookup_and_folder_update() {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&sample_account()).expect("insert account");
        let id = db.insert_message(&sample_message()).expect("insert message");

        let hits = db
            .find_by_fingerprint("acc-1", "kickoff@example.com", 2048, "Project kickoff")
            .expect("fingerprint query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        let misses = db
            .find_by_fingerprint("acc-1", "kickoff@example.com", 2049, "Project kickoff")
            .expect("fingerprint query");
        assert!(misses.is_empty());

        db.set_message_folder(&id, "Archive").expect("move");
        let listed = db
            .list_messages(MessageFilters {
                folder: Some("Archive".to_string()),
                ..MessageFilters::default()
            })
            .expect("list messages");
        assert_eq!(listed.len(), 1);
        assert!(db.set_message_folder("missing", "Archive").is_err());
    }

    #[test]
    fn run_lifecycle_and_stats() {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&sample_account()).expect("insert account");
        db.insert_message(&sample_message()).expect("insert message");

        let run = db
            .claim_run(Duration::from_secs(60))
            .expect("claim run")
            .expect("lease free");
        assert_eq!(run.status, RunStatus::Running);
        let totals = RunTotals {
            accounts_total: 1,
            imported: 1,
            ..RunTotals::default()
        };
        db.finish_run(&run.id, RunStatus::Completed, &totals, None)
            .expect("finish run");
        assert!(db
            .finish_run(&run.id, RunStatus::Failed, &totals, Some("again"))
            .is_err());

        let stats = db.get_stats().expect("stats");
        assert_eq!(stats.total_accounts, 1);
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.total_attachments, 1);
        assert_eq!(stats.attachment_bytes, 8);
        let last_run = stats.last_run.expect("last run");
        assert_eq!(last_run.status, RunStatus::Completed);
        assert_eq!(last_run.imported, 1);
    }

    #[test]
    fn run_lease_is_exclusive_until_released() {
        let db = Database::open_in_memory().expect("open db");
        let lease = Duration::from_secs(600);

        let first = db.claim_run(lease).expect("claim").expect("lease free");
        assert!(db.claim_run(lease).expect("second claim").is_none());
        assert!(db.heartbeat_run(&first.id).expect("heartbeat"));

        db.finish_run(&first.id, RunStatus::Completed, &RunTotals::default(), None)
            .expect("finish run");
        assert!(!db.heartbeat_run(&first.id).expect("heartbeat after finish"));
        let second = db.claim_run(lease).expect("claim").expect("lease released");
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn stale_lease_is_taken_over_and_its_run_closed() {
        let db = Database::open_in_memory().expect("open db");
        let lease = Duration::from_secs(600);
        let crashed = db.claim_run(lease).expect("claim").expect("lease free");
        db.conn()
            .execute(
                "UPDATE sync_state SET updated_at = '2020-01-01T00:00:00Z' WHERE key = 'run_lease'",
                [],
            )
            .expect("age lease");

        let next = db.claim_run(lease).expect("claim").expect("stale lease taken");
        let runs = db.list_runs(10).expect("runs");
        let old = runs
            .iter()
            .find(|run| run.id == crashed.id)
            .expect("crashed run kept");
        assert_eq!(old.status, RunStatus::Failed);
        assert_eq!(old.error.as_deref(), Some("abandoned"));
        assert!(old.finished_at.is_some());
        let current = runs.iter().find(|run| run.id == next.id).expect("new run");
        assert_eq!(current.status, RunStatus::Running);
    }

    #[test]
    fn account_enable_and_last_sync() {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&sample_account()).expect("insert account");

        assert_eq!(db.list_enabled_accounts().expect("enabled").len(), 1);
        db.set_account_enabled("acc-1", false).expect("disable");
        assert!(db.list_enabled_accounts().expect("enabled").is_empty());

        db.touch_last_sync("acc-1").expect("touch");
        let account = db.get_account("acc-1").expect("get").expect("exists");
        assert!(account.last_sync.is_some());
        assert!(!account.enabled);
    }
}
