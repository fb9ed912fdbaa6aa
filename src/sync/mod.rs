//! Mailbox reconciliation engine: account iteration, folder classification,
//! atomic persistence and the run lifecycle around them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::db::models::RunTotals;
use crate::db::DbError;
use crate::mailbox::MailboxError;

pub mod fingerprint;
pub mod persister;
pub mod reconciler;
pub mod runner;
pub mod store;

pub use fingerprint::Fingerprint;
pub use runner::SyncRunner;
pub use store::MessageStore;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connecting, logging in or listing folders failed; the account is skipped.
    #[error("connection: {0}")]
    Connection(#[source] MailboxError),

    /// A folder-level command failed; the folder is skipped.
    #[error("protocol: {0}")]
    Protocol(#[source] MailboxError),

    #[error("store: {0}")]
    Store(#[from] DbError),

    #[error("sync cancelled")]
    Cancelled,

    #[error("account deadline exceeded")]
    DeadlineExceeded,

    #[error("a sync run is already in progress")]
    AlreadyRunning,
}

impl SyncError {
    /// Errors that end the whole account rather than a single folder.
    pub fn is_account_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Cancelled | Self::DeadlineExceeded | Self::AlreadyRunning
        )
    }
}

/// Counters accumulated over a run. Failures are reported here and in the
/// logs, never as an error return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub accounts_total: usize,
    pub accounts_failed: usize,
    pub folders_scanned: usize,
    pub folders_failed: usize,
    pub imported: usize,
    pub moved: usize,
    pub failed: usize,
    pub collisions: usize,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            accounts_total: self.accounts_total,
            accounts_failed: self.accounts_failed,
            imported: self.imported,
            moved: self.moved,
            failed: self.failed,
        }
    }
}

/// Shared cancellation flag, set from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Checked between batches and between messages of one account.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Checkpoint {
    pub fn new(cancel: CancelToken, account_timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: account_timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    pub fn check(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SyncError::DeadlineExceeded);
        }
        Ok(())
    }
}
