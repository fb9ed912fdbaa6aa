use crate::db::models::{MessageRef, NewMessage};
use crate::db::{Database, DbError};

use super::Fingerprint;

/// The slice of the local store the reconciliation engine depends on.
pub trait MessageStore {
    fn find_by_fingerprint(&self, fingerprint: &Fingerprint<'_>)
        -> Result<Vec<MessageRef>, DbError>;

    fn set_folder(&self, id: &str, folder: &str) -> Result<(), DbError>;

    /// All-or-nothing: either the message and every sub-entity are stored or nothing is.
    fn insert_message(&self, message: &NewMessage) -> Result<String, DbError>;
}

impl MessageStore for Database {
    fn find_by_fingerprint(
        &self,
        fingerprint: &Fingerprint<'_>,
    ) -> Result<Vec<MessageRef>, DbError> {
        Database::find_by_fingerprint(
            self,
            fingerprint.account_id,
            fingerprint.message_id,
            fingerprint.size,
            fingerprint.subject,
        )
    }

    fn set_folder(&self, id: &str, folder: &str) -> Result<(), DbError> {
        self.set_message_folder(id, folder)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<String, DbError> {
        Database::insert_message(self, message)
    }
}
