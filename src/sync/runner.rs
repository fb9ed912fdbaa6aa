use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::SyncSettings;
use crate::db::models::{Account, RunStatus};
use crate::db::Database;
use crate::mailbox::{MailboxConnector, MailboxSession};

use super::persister::{persist_messages, PersistOutcome};
use super::reconciler::reconcile_folder;
use super::{CancelToken, Checkpoint, SyncError, SyncReport};

/// Released on drop, so a panicking or failing run never wedges the guard.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self, SyncError> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Drives sync runs over every enabled account. At most one run is active
/// per archive: a second [`SyncRunner::run_once`], from this runner or from
/// another process on the same database, fails with
/// [`SyncError::AlreadyRunning`] until the first returns or its lease goes stale.
pub struct SyncRunner<C> {
    connector: C,
    settings: SyncSettings,
    running: AtomicBool,
    cancel: CancelToken,
}

impl<C: MailboxConnector> SyncRunner<C> {
    pub fn new(connector: C, settings: SyncSettings) -> Self {
        Self {
            connector,
            settings,
            running: AtomicBool::new(false),
            cancel: CancelToken::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One full run, recorded in `sync_runs`. `only_account` narrows the
    /// run to one enabled account.
    pub fn run_once(
        &self,
        db: &Database,
        only_account: Option<&str>,
    ) -> Result<SyncReport, SyncError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let run = db
            .claim_run(self.settings.run_lease)?
            .ok_or(SyncError::AlreadyRunning)?;
        info!(run = %run.id, "sync run started");

        let outcome = self.sync_accounts(db, &run.id, only_account);
        match &outcome {
            Ok(report) => {
                let (status, error) = if report.cancelled {
                    (RunStatus::Failed, Some("cancelled"))
                } else {
                    (RunStatus::Completed, None)
                };
                if let Err(finish_error) = db.finish_run(&run.id, status, &report.totals(), error)
                {
                    warn!(run = %run.id, error = %finish_error, "failed to record run outcome");
                }
                info!(
                    run = %run.id,
                    %status,
                    accounts = report.accounts_total,
                    accounts_failed = report.accounts_failed,
                    imported = report.imported,
                    moved = report.moved,
                    failed = report.failed,
                    collisions = report.collisions,
                    "sync run finished"
                );
            }
            Err(error) => {
                let message = error.to_string();
                if let Err(finish_error) =
                    db.finish_run(&run.id, RunStatus::Failed, &Default::default(), Some(&message))
                {
                    warn!(run = %run.id, error = %finish_error, "failed to record run failure");
                }
            }
        }
        outcome
    }

    fn sync_accounts(
        &self,
        db: &Database,
        run_id: &str,
        only_account: Option<&str>,
    ) -> Result<SyncReport, SyncError> {
        let mut accounts = db.list_enabled_accounts()?;
        if let Some(account_id) = only_account {
            accounts.retain(|account| account.account_id == account_id);
        }

        let mut report = SyncReport::default();
        if accounts.is_empty() {
            info!("no enabled accounts to sync");
            return Ok(report);
        }

        for account in &accounts {
            if self.cancel.is_cancelled() {
                info!("sync cancelled, remaining accounts left for the next run");
                report.cancelled = true;
                break;
            }

            report.accounts_total += 1;
            info!(account = %account.account_id, remote = %account.label(), "syncing account");
            if let Err(error) = self.sync_account(db, run_id, account, &mut report) {
                report.accounts_failed += 1;
                if matches!(error, SyncError::Cancelled) {
                    report.cancelled = true;
                }
                warn!(account = %account.account_id, %error, "account skipped");
            }

            if let Err(error) = db.touch_last_sync(&account.account_id) {
                warn!(account = %account.account_id, %error, "failed to record last sync");
            }
            heartbeat(db, run_id);
        }

        Ok(report)
    }

    fn sync_account(
        &self,
        db: &Database,
        run_id: &str,
        account: &Account,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let checkpoint = Checkpoint::new(self.cancel.clone(), self.settings.account_timeout);
        checkpoint.check()?;

        let mut session = self
            .connector
            .connect(account)
            .map_err(SyncError::Connection)?;
        let result = self.sync_folders(session.as_mut(), db, run_id, account, &checkpoint, report);
        session.logout();
        result
    }

    fn sync_folders(
        &self,
        session: &mut dyn MailboxSession,
        db: &Database,
        run_id: &str,
        account: &Account,
        checkpoint: &Checkpoint,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let folders = session.list_folders().map_err(SyncError::Connection)?;

        for folder in &folders {
            report.folders_scanned += 1;
            match self.sync_folder(session, db, account, folder, checkpoint, report) {
                Ok(()) => {}
                Err(error) if error.is_account_fatal() => return Err(error),
                Err(error) => {
                    report.folders_failed += 1;
                    warn!(account = %account.account_id, folder, %error, "folder skipped");
                }
            }
            heartbeat(db, run_id);
        }
        Ok(())
    }

    fn sync_folder(
        &self,
        session: &mut dyn MailboxSession,
        db: &Database,
        account: &Account,
        folder: &str,
        checkpoint: &Checkpoint,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let batch_size = self.settings.batch_size;
        let plan = reconcile_folder(
            session,
            db,
            &account.account_id,
            folder,
            batch_size,
            checkpoint,
        )?;
        report.moved += plan.moved;
        report.collisions += plan.collisions;

        let mut outcome = PersistOutcome::default();
        let result = persist_messages(
            session,
            db,
            &account.account_id,
            folder,
            &plan.to_import,
            batch_size,
            checkpoint,
            &mut outcome,
        );
        report.imported += outcome.imported;
        report.failed += outcome.failed;

        info!(
            account = %account.account_id,
            folder,
            present = plan.present,
            moved = plan.moved,
            imported = outcome.imported,
            failed = outcome.failed,
            "folder reconciled"
        );
        result
    }
}

fn heartbeat(db: &Database, run_id: &str) {
    match db.heartbeat_run(run_id) {
        Ok(true) => {}
        Ok(false) => warn!(run = %run_id, "run lease lost to another process"),
        Err(error) => warn!(run = %run_id, %error, "failed to refresh run lease"),
    }
}
