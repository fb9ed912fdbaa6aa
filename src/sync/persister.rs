use tracing::{debug, warn};

use crate::db::models::{AddressRole, NewAddress, NewAttachment, NewMessage};
use crate::mailbox::{FetchedMessage, MailboxSession};

use super::{Checkpoint, MessageStore, SyncError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub imported: usize,
    pub failed: usize,
}

/// Fetches full content for `uids` in batches and stores each message in
/// its own transaction. A message that fails to store is logged and
/// skipped; a failed fetch aborts the folder.
///
/// Counts gathered before an abort are added to `outcome` so the caller can
/// report partial progress.
#[allow(clippy::too_many_arguments)]
pub fn persist_messages(
    session: &mut dyn MailboxSession,
    store: &dyn MessageStore,
    account_id: &str,
    folder: &str,
    uids: &[u32],
    batch_size: usize,
    checkpoint: &Checkpoint,
    outcome: &mut PersistOutcome,
) -> Result<(), SyncError> {
    for batch in uids.chunks(batch_size.max(1)) {
        checkpoint.check()?;
        let messages = session.fetch_messages(batch).map_err(SyncError::Protocol)?;

        let missing = batch
            .iter()
            .filter(|uid| !messages.iter().any(|message| message.overview.uid == **uid))
            .count();
        if missing > 0 {
            warn!(
                account = account_id,
                folder,
                missing,
                "messages vanished before full fetch"
            );
            outcome.failed += missing;
        }

        for fetched in messages {
            checkpoint.check()?;
            let uid = fetched.overview.uid;
            let message = build_message(account_id, folder, fetched);
            match store.insert_message(&message) {
                Ok(id) => {
                    outcome.imported += 1;
                    debug!(account = account_id, folder, uid, %id, "message stored");
                }
                Err(error) => {
                    outcome.failed += 1;
                    warn!(account = account_id, folder, uid, %error, "failed to store message");
                }
            }
        }
    }
    Ok(())
}

/// Moves the fetched content into a store record. Flag and attachment
/// indices follow fetch order; address positions follow header order per role.
pub fn build_message(account_id: &str, folder: &str, fetched: FetchedMessage) -> NewMessage {
    let FetchedMessage {
        overview,
        text,
        html,
        flags,
        mut addresses,
        attachments,
    } = fetched;

    let addresses = AddressRole::ALL
        .into_iter()
        .flat_map(|role| {
            std::mem::take(addresses.role_mut(role))
                .into_iter()
                .enumerate()
                .map(move |(position, entry)| NewAddress {
                    role,
                    position,
                    address: entry.address,
                    display_name: entry.display_name,
                })
        })
        .collect();

    let attachments = attachments
        .into_iter()
        .map(|attachment| NewAttachment {
            name: attachment.name,
            mime_type: attachment.mime_type,
            content: attachment.content,
        })
        .collect();

    NewMessage {
        account_id: account_id.to_string(),
        folder: folder.to_string(),
        received_at: overview.received,
        sent_at: overview.sent,
        size: overview.size,
        subject: overview.subject,
        uid: overview.uid,
        message_id: overview.message_id,
        body_text: text,
        body_html: html,
        flags,
        addresses,
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_message, persist_messages, PersistOutcome};
    use crate::db::models::{Account, AddressRole, MessageRef, NewMessage};
    use crate::db::{Database, DbError};
    use crate::mailbox::{
        Addresses, FetchedAttachment, FetchedMessage, MailAddress, MailboxConnector,
        MemoryMailbox, Overview,
    };
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

    fn fetched(uid: u32) -> FetchedMessage {
        let mut addresses = Addresses::default();
        addresses.from.push(MailAddress::new("alice@example.com", "Alice"));
        addresses.cc.push(MailAddress::new("bob@example.com", ""));
        addresses.cc.push(MailAddress::new("carol@example.com", "Carol"));

        FetchedMessage {
            overview: Overview {
                uid,
                message_id: format!("{uid}@example.com"),
                size: 120,
                subject: format!("message {uid}"),
                received: None,
                sent: None,
            },
            text: "plain".to_string(),
            html: "<p>plain</p>".to_string(),
            flags: vec!["\\Seen".to_string(), "\\Answered".to_string()],
            addresses,
            attachments: vec![
                FetchedAttachment {
                    name: "a.txt".to_string(),
                    mime_type: "text/plain".to_string(),
                    content: b"first".to_vec(),
                },
                FetchedAttachment {
                    name: "b.bin".to_string(),
                    mime_type: "application/octet-stream".to_string(),
                    content: Vec::new(),
                },
            ],
        }
    }

    fn setup() -> (Database, MemoryMailbox) {
        let db = Database::open_in_memory().expect("open db");
        db.insert_account(&account()).expect("insert account");
        (db, MemoryMailbox::new())
    }

    #[test]
    fn build_message_orders_addresses_by_role_then_position() {
        let message = build_message("acc", "INBOX", fetched(5));
        let roles: Vec<(AddressRole, usize)> = message
            .addresses
            .iter()
            .map(|entry| (entry.role, entry.position))
            .collect();
        assert_eq!(
            roles,
            vec![
                (AddressRole::From, 0),
                (AddressRole::Cc, 0),
                (AddressRole::Cc, 1)
            ]
        );
        assert_eq!(message.uid, 5);
        assert_eq!(message.attachments.len(), 2);
    }

    #[test]
    fn persists_each_message_with_sub_entities() {
        let (db, mailbox) = setup();
        mailbox.put_message("acc", "INBOX", fetched(1));
        mailbox.put_message("acc", "INBOX", fetched(2));

        let mut session = mailbox.connect(&account()).expect("connect");
        session.select_folder("INBOX").expect("select");
        let mut outcome = PersistOutcome::default();
        persist_messages(
            session.as_mut(),
            &db,
            "acc",
            "INBOX",
            &[1, 2],
            1,
            &Checkpoint::new(CancelToken::new(), None),
            &mut outcome,
        )
        .expect("persist");

        assert_eq!(outcome, PersistOutcome { imported: 2, failed: 0 });
        let hit = db
            .find_by_fingerprint("acc", "2@example.com", 120, "message 2")
            .expect("lookup");
        assert_eq!(hit.len(), 1);
        let attachments = db.message_attachments(&hit[0].id).expect("attachments");
        assert_eq!(
            attachments.iter().map(|a| a.idx).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(attachments[1].size, 0);
    }

    #[test]
    fn one_failing_message_does_not_stop_the_batch() {
        struct RejectUid<'a> {
            inner: &'a Database,
            reject: u32,
        }

        impl MessageStore for RejectUid<'_> {
            fn find_by_fingerprint(
                &self,
                fingerprint: &Fingerprint<'_>,
            ) -> Result<Vec<MessageRef>, DbError> {
                MessageStore::find_by_fingerprint(self.inner, fingerprint)
            }

            fn set_folder(&self, id: &str, folder: &str) -> Result<(), DbError> {
                self.inner.set_message_folder(id, folder)
            }

            fn insert_message(&self, message: &NewMessage) -> Result<String, DbError> {
                if message.uid == self.reject {
                    return Err(DbError::InvalidRecord("rejected".to_string()));
                }
                self.inner.insert_message(message)
            }
        }

        let (db, mailbox) = setup();
        for uid in 1..=3 {
            mailbox.put_message("acc", "INBOX", fetched(uid));
        }
        let store = RejectUid {
            inner: &db,
            reject: 2,
        };

        let mut session = mailbox.connect(&account()).expect("connect");
        session.select_folder("INBOX").expect("select");
        let mut outcome = PersistOutcome::default();
        persist_messages(
            session.as_mut(),
            &store,
            "acc",
            "INBOX",
            &[1, 2, 3],
            50,
            &Checkpoint::new(CancelToken::new(), None),
            &mut outcome,
        )
        .expect("persist");

        assert_eq!(outcome, PersistOutcome { imported: 2, failed: 1 });
        assert!(db
            .find_by_fingerprint("acc", "2@example.com", 120, "message 2")
            .expect("lookup")
            .is_empty());
    }

    #[test]
    fn cancellation_stops_before_the_next_message() {
        let (db, mailbox) = setup();
        mailbox.put_message("acc", "INBOX", fetched(1));

        let token = CancelToken::new();
        token.cancel();
        let mut session = mailbox.connect(&account()).expect("connect");
        session.select_folder("INBOX").expect("select");
        let mut outcome = PersistOutcome::default();
        let err = persist_messages(
            session.as_mut(),
            &db,
            "acc",
            "INBOX",
            &[1],
            50,
            &Checkpoint::new(token, None),
            &mut outcome,
        )
        .expect_err("cancelled");

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(outcome.imported, 0);
        assert!(mailbox.calls().is_empty());
    }
}
