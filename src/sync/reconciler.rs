use tracing::{debug, info, warn};

use crate::mailbox::{MailboxSession, Overview, ALL_UIDS};

use super::{Checkpoint, Fingerprint, MessageStore, SyncError};

/// Outcome of classifying one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderPlan {
    /// UIDs with no confirmed local copy, in ascending order.
    pub to_import: Vec<u32>,
    pub present: usize,
    pub moved: usize,
    pub collisions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    New,
    Present { moved: usize },
}

/// Selects `folder`, lists its UIDs and classifies them batch by batch
/// using overviews only. Local copies found under another folder are
/// re-homed to `folder` on the way.
pub fn reconcile_folder(
    session: &mut dyn MailboxSession,
    store: &dyn MessageStore,
    account_id: &str,
    folder: &str,
    batch_size: usize,
    checkpoint: &Checkpoint,
) -> Result<FolderPlan, SyncError> {
    session.select_folder(folder).map_err(SyncError::Protocol)?;
    let uids = session.list_uids(ALL_UIDS).map_err(SyncError::Protocol)?;

    let mut plan = FolderPlan::default();
    if uids.is_empty() {
        debug!(account = account_id, folder, "folder is empty");
        return Ok(plan);
    }

    for batch in uids.chunks(batch_size.max(1)) {
        checkpoint.check()?;
        let overviews = session
            .fetch_overviews(batch)
            .map_err(SyncError::Protocol)?;
        debug!(
            account = account_id,
            folder,
            requested = batch.len(),
            received = overviews.len(),
            "fetched overviews"
        );

        for overview in &overviews {
            match classify(store, account_id, folder, overview, &mut plan.collisions)? {
                Classification::New => plan.to_import.push(overview.uid),
                Classification::Present { moved } => {
                    plan.present += 1;
                    plan.moved += moved;
                }
            }
        }
    }

    plan.to_import.sort_unstable();
    Ok(plan)
}

fn classify(
    store: &dyn MessageStore,
    account_id: &str,
    folder: &str,
    overview: &Overview,
    collisions: &mut usize,
) -> Result<Classification, SyncError> {
    let fingerprint = Fingerprint::from_overview(account_id, overview);
    let candidates = store.find_by_fingerprint(&fingerprint)?;

    let mut confirmed = 0;
    let mut moved = 0;
    for candidate in candidates {
        if !fingerprint.confirms(&candidate, overview) {
            *collisions += 1;
            warn!(
                account = account_id,
                folder,
                uid = overview.uid,
                message_id = %overview.message_id,
                candidate = %candidate.id,
                "fingerprint collision: time mismatch"
            );
            continue;
        }

        confirmed += 1;
        if candidate.folder != folder {
            store.set_folder(&candidate.id, folder)?;
            moved += 1;
            info!(
                account = account_id,
                uid = overview.uid,
                id = %candidate.id,
                from = %candidate.folder,
                to = folder,
                "message moved"
            );
        }
    }

    if confirmed == 0 {
        Ok(Classification::New)
    } else {
        Ok(Classification::Present { moved })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::reconcile_folder;
    use crate::db::models::{Account, MessageRef, NewMessage};
    use crate::db::Database;
    use crate::mailbox::{Addresses, FetchedMessage, MailboxConnector, MemoryMailbox, Overview};
    use crate::sync::{CancelToken, Checkpoint, Fingerprint, MessageStore, SyncError};

    fn account() -> Account {
        Account {
            account_id: "acc".to_string(),
            username: "owner@example.com".to_string(),
            password: "secret".to_string(),
            host: "imap.example.com".to_string(),
            port: 993,
            enabled: true,
            last_sync: None,
        }
    }

    fn fetched(uid: u32, message_id: &str, subject: &str) -> FetchedMessage {
        FetchedMessage {
            overview: Overview {
                uid,
                message_id: message_id.to_string(),
                size: 10,
                subject: subject.to_string(),
                received: Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).single(),
                sent: Utc.with_ymd_and_hms(2025, 2, 1, 11, 59, 0).single(),
            },
            text: "body".to_string(),
            html: String::new(),
            flags: Vec::new(),
            addresses: Addresses::default(),
            attachments: Vec::new(),
        }
    }

    fn stored(folder: &str, message: &FetchedMessage) -> NewMessage {
        NewMessage {
            account_id: "acc".to_string(),
            folder: folder.to_string(),
            received_at: message.overview.received,
            sent_at: message.overview.sent,
            size: message.overview.size,
            subject: message.overview.subject.clone(),
            uid: 1,
            message_id: message.overview.message_id.clone(),
            body_text: String::new(),
            body_html: String::new(),
            flags: Vec::new(),
            addresses: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn setup() -> (Database, MemoryMailbox) {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&account()).expect("insert account");
        (db, MemoryMailbox::new())
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(CancelToken::new(), None)
    }

    #[test]
    fn empty_store_marks_everything_new() {
        let (db, mailbox) = setup();
        mailbox.put_message("acc", "INBOX", fetched(101, "abc", "hi"));
        mailbox.put_message("acc", "INBOX", fetched(102, "", "hi"));

        let mut session = mailbox.connect(&account()).expect("connect");
        let plan = reconcile_folder(session.as_mut(), &db, "acc", "INBOX", 50, &checkpoint())
            .expect("reconcile");
        assert_eq!(plan.to_import, vec![101, 102]);
        assert_eq!(plan.present, 0);
    }

    #[test]
    fn confirmed_copy_elsewhere_is_moved_not_imported() {
        let (db, mailbox) = setup();
        let message = fetched(101, "abc", "hi");
        let id = db
            .insert_message(&stored("Archive", &message))
            .expect("seed message");
        mailbox.put_message("acc", "INBOX", message);
        mailbox.put_message("acc", "INBOX", fetched(102, "", "hi"));

        let mut session = mailbox.connect(&account()).expect("connect");
        let plan = reconcile_folder(session.as_mut(), &db, "acc", "INBOX", 1, &checkpoint())
            .expect("reconcile");
        assert_eq!(plan.to_import, vec![102]);
        assert_eq!(plan.moved, 1);
        assert_eq!(
            db.get_message(&id).expect("get").expect("exists").folder,
            "INBOX"
        );
    }

    #[test]
    fn time_mismatch_counts_as_collision_and_imports() {
        let (db, mailbox) = setup();
        let message = fetched(101, "abc", "hi");
        let mut seeded = stored("INBOX", &message);
        seeded.sent_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        db.insert_message(&seeded).expect("seed message");
        mailbox.put_message("acc", "INBOX", message);

        let mut session = mailbox.connect(&account()).expect("connect");
        let plan = reconcile_folder(session.as_mut(), &db, "acc", "INBOX", 50, &checkpoint())
            .expect("reconcile");
        assert_eq!(plan.collisions, 1);
        assert_eq!(plan.to_import, vec![101]);
    }

    #[test]
    fn missing_folder_is_a_protocol_error() {
        let (db, mailbox) = setup();
        mailbox.add_folder("acc", "INBOX");

        let mut session = mailbox.connect(&account()).expect("connect");
        let err = reconcile_folder(session.as_mut(), &db, "acc", "Nope", 50, &checkpoint())
            .expect_err("unknown folder");
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn store_errors_abort_the_folder() {
        struct BrokenStore;

        impl MessageStore for BrokenStore {
            fn find_by_fingerprint(
                &self,
                _fingerprint: &Fingerprint<'_>,
            ) -> Result<Vec<MessageRef>, crate::db::DbError> {
                Err(crate::db::DbError::Config("database is locked".to_string()))
            }

            fn set_folder(&self, _id: &str, _folder: &str) -> Result<(), crate::db::DbError> {
                Ok(())
            }

            fn insert_message(&self, _message: &NewMessage) -> Result<String, crate::db::DbError> {
                Ok(String::new())
            }
        }

        let mailbox = MemoryMailbox::new();
        mailbox.put_message("acc", "INBOX", fetched(1, "abc", "hi"));
        let mut session = mailbox.connect(&account()).expect("connect");
        let err = reconcile_folder(session.as_mut(), &BrokenStore, "acc", "INBOX", 50, &checkpoint())
            .expect_err("store failure");
        assert!(matches!(err, SyncError::Store(_)));
    }
}
