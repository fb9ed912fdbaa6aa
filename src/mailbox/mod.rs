//! Remote mailbox seam. The reconciliation engine only talks to
//! [`MailboxConnector`] and [`MailboxSession`]; the IMAP wire protocol lives
//! behind [`ImapConnector`], and [`MemoryMailbox`] serves tests.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::models::{Account, AddressRole};

pub mod imap;
pub mod memory;

pub use self::imap::ImapConnector;
pub use self::memory::MemoryMailbox;

/// Query that lists every message of the selected folder.
pub const ALL_UIDS: &str = "ALL";

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("connect to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("login as {username} failed: {reason}")]
    Auth { username: String, reason: String },

    #[error("tls: {0}")]
    Tls(String),

    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("unparsable message uid={uid}: {reason}")]
    Parse { uid: u32, reason: String },
}

impl MailboxError {
    pub fn command(command: &'static str, reason: impl ToString) -> Self {
        Self::Command {
            command,
            reason: reason.to_string(),
        }
    }
}

/// Cheap per-message metadata used to classify a remote message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overview {
    pub uid: u32,
    pub message_id: String,
    pub size: u64,
    pub subject: String,
    pub received: Option<DateTime<Utc>>,
    pub sent: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddress {
    pub address: String,
    pub display_name: String,
}

impl MailAddress {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
        }
    }
}

/// The five address roles of a message, each in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addresses {
    pub from: Vec<MailAddress>,
    pub to: Vec<MailAddress>,
    pub reply_to: Vec<MailAddress>,
    pub cc: Vec<MailAddress>,
    pub bcc: Vec<MailAddress>,
}

impl Addresses {
    pub fn role_mut(&mut self, role: AddressRole) -> &mut Vec<MailAddress> {
        match role {
            AddressRole::From => &mut self.from,
            AddressRole::To => &mut self.to,
            AddressRole::ReplyTo => &mut self.reply_to,
            AddressRole::Cc => &mut self.cc,
            AddressRole::Bcc => &mut self.bcc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAttachment {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Full message content as returned by a full fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub overview: Overview,
    pub text: String,
    pub html: String,
    pub flags: Vec<String>,
    pub addresses: Addresses,
    pub attachments: Vec<FetchedAttachment>,
}

/// Opens one authenticated session per account.
pub trait MailboxConnector {
    fn connect(&self, account: &Account) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

pub trait MailboxSession {
    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError>;

    /// Fails when the folder does not exist.
    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError>;

    /// UIDs of the selected folder in ascending order.
    fn list_uids(&mut self, query: &str) -> Result<Vec<u32>, MailboxError>;

    fn fetch_overviews(&mut self, uids: &[u32]) -> Result<Vec<Overview>, MailboxError>;

    fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, MailboxError>;

    fn logout(&mut self) {}
}
