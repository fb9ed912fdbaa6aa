use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub enabled: bool,
    pub last_sync: Option<String>,
}

impl Account {
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub account_id: String,
    pub folder: String,
    pub received_at: Option<String>,
    pub sent_at: Option<String>,
    pub size: i64,
    pub subject: String,
    pub uid: i64,
    pub message_id: String,
    pub body_text: String,
    pub body_html: String,
    pub created_at: String,
}

/// The columns needed to confirm a fingerprint candidate and detect moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub folder: String,
    pub uid: i64,
    pub received_at: Option<String>,
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flag {
    pub message_id: String,
    pub idx: i64,
    pub flag: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AddressRole {
    From,
    To,
    ReplyTo,
    Cc,
    Bcc,
}

impl AddressRole {
    pub const ALL: [AddressRole; 5] = [
        AddressRole::From,
        AddressRole::To,
        AddressRole::ReplyTo,
        AddressRole::Cc,
        AddressRole::Bcc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::ReplyTo => "reply_to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }
}

impl Display for AddressRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "from" => Ok(Self::From),
            "to" => Ok(Self::To),
            "reply_to" => Ok(Self::ReplyTo),
            "cc" => Ok(Self::Cc),
            "bcc" => Ok(Self::Bcc),
            other => Err(format!("invalid address role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressEntry {
    pub message_id: String,
    pub role: AddressRole,
    pub position: i64,
    pub address: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub idx: i64,
    pub name: String,
    pub mime_type: String,
    pub file_id: String,
    pub size: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRun {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub accounts_total: i64,
    pub accounts_failed: i64,
    pub imported: i64,
    pub moved: i64,
    pub failed: i64,
    pub error: Option<String>,
}

/// Counters recorded on a finished sync run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunTotals {
    pub accounts_total: usize,
    pub accounts_failed: usize,
    pub imported: usize,
    pub moved: usize,
    pub failed: usize,
}

/// A message and its sub-entities, written together in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub account_id: String,
    pub folder: String,
    pub received_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub size: u64,
    pub subject: String,
    pub uid: u32,
    pub message_id: String,
    pub body_text: String,
    pub body_html: String,
    /// Flags in fetch order; the position becomes the stored index.
    pub flags: Vec<String>,
    pub addresses: Vec<NewAddress>,
    /// Attachments in fetch order; the position becomes the stored index.
    pub attachments: Vec<NewAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAddress {
    pub role: AddressRole,
    pub position: usize,
    pub address: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Stored timestamps are RFC 3339 with whole seconds in UTC.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

fn invalid_text(raw: &str, error: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        raw.len(),
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error)),
    )
}

impl Account {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            account_id: row.get("account_id")?,
            username: row.get("username")?,
            password: row.get("password")?,
            host: row.get("host")?,
            port: row.get("port")?,
            enabled: row.get("enabled")?,
            last_sync: row.get("last_sync")?,
        })
    }
}

impl Message {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            folder: row.get("folder")?,
            received_at: row.get("received_at")?,
            sent_at: row.get("sent_at")?,
            size: row.get("size")?,
            subject: row.get("subject")?,
            uid: row.get("uid")?,
            message_id: row.get("message_id")?,
            body_text: row.get("body_text")?,
            body_html: row.get("body_html")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl MessageRef {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            folder: row.get("folder")?,
            uid: row.get("uid")?,
            received_at: row.get("received_at")?,
            sent_at: row.get("sent_at")?,
        })
    }
}

impl Flag {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            message_id: row.get("message_id")?,
            idx: row.get("idx")?,
            flag: row.get("flag")?,
        })
    }
}

impl AddressEntry {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let role_raw: String = row.get("role")?;
        let role = AddressRole::from_str(&role_raw).map_err(|e| invalid_text(&role_raw, e))?;

        Ok(Self {
            message_id: row.get("message_id")?,
            role,
            position: row.get("position")?,
            address: row.get("address")?,
            display_name: row.get("display_name")?,
        })
    }
}

impl Attachment {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            idx: row.get("idx")?,
            name: row.get("name")?,
            mime_type: row.get("mime_type")?,
            file_id: row.get("file_id")?,
            size: row.get("size")?,
        })
    }
}

impl SyncRun {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let status_raw: String = row.get("status")?;
        let status = RunStatus::from_str(&status_raw).map_err(|e| invalid_text(&status_raw, e))?;

        Ok(Self {
            id: row.get("id")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            status,
            accounts_total: row.get("accounts_total")?,
            accounts_failed: row.get("accounts_failed")?,
            imported: row.get("imported")?,
            moved: row.get("moved")?,
            failed: row.get("failed")?,
            error: row.get("error")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_timestamp, Account, AddressRole, RunStatus};

    #[test]
    fn address_role_display_and_parse() {
        for role in AddressRole::ALL {
            assert_eq!(role.to_string().parse::<AddressRole>(), Ok(role));
        }
        assert_eq!("Reply-To".parse::<AddressRole>(), Ok(AddressRole::ReplyTo));
        assert!("sender".parse::<AddressRole>().is_err());
    }

    #[test]
    fn run_status_display_and_parse() {
        assert_eq!(RunStatus::Completed.to_string(), "completed");
        assert_eq!("FAILED".parse::<RunStatus>(), Ok(RunStatus::Failed));
    }

    #[test]
    fn timestamps_are_stored_at_second_precision() {
        let value = Utc
            .with_ymd_and_hms(2025, 1, 18, 22, 9, 43)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::milliseconds(750);
        let stored = format_timestamp(&value);
        assert_eq!(stored, "2025-01-18T22:09:43Z");
        let parsed = parse_timestamp(&stored).expect("parse stored timestamp");
        assert_eq!(parsed.timestamp(), value.timestamp());
    }

    #[test]
    fn account_serialization_hides_password() {
        let account = Account {
            account_id: "acc-1".to_string(),
            username: "owner@example.com".to_string(),
            password: "hunter2".to_string(),
            host: "imap.example.com".to_string(),
            port: 993,
            enabled: true,
            last_sync: None,
        };
        let json = serde_json::to_string(&account).expect("serialize account");
        assert!(!json.contains("hunter2"));
        assert_eq!(account.label(), "owner@example.com@imap.example.com:993");
    }
}
