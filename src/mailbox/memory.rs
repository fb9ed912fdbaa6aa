use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    FetchedMessage, MailboxConnector, MailboxError, MailboxSession, Overview, ALL_UIDS,
};
use crate::db::models::Account;

/// A remote fetch observed by [`MemoryMailbox`], used to assert what was downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxCall {
    Overviews {
        account: String,
        folder: String,
        uids: Vec<u32>,
    },
    Messages {
        account: String,
        folder: String,
        uids: Vec<u32>,
    },
}

#[derive(Debug, Default)]
struct MemoryFolder {
    name: String,
    messages: Vec<FetchedMessage>,
}

#[derive(Debug, Default)]
struct MemoryAccount {
    folders: Vec<MemoryFolder>,
    unreachable: bool,
    broken_listing: bool,
    broken_folders: HashSet<String>,
}

impl MemoryAccount {
    fn folder(&self, name: &str) -> Option<&MemoryFolder> {
        self.folders.iter().find(|folder| folder.name == name)
    }

    fn folder_mut(&mut self, name: &str) -> &mut MemoryFolder {
        if let Some(pos) = self.folders.iter().position(|folder| folder.name == name) {
            return &mut self.folders[pos];
        }
        self.folders.push(MemoryFolder {
            name: name.to_string(),
            messages: Vec::new(),
        });
        let last = self.folders.len() - 1;
        &mut self.folders[last]
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<String, MemoryAccount>,
    calls: Vec<MailboxCall>,
}

/// In-process mailbox keyed by account id. Clones share state, so a test
/// can rearrange folders between runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_folder(&self, account_id: &str, folder: &str) {
        let mut state = self.lock();
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .folder_mut(folder);
    }

    pub fn put_message(&self, account_id: &str, folder: &str, message: FetchedMessage) {
        let mut state = self.lock();
        let folder = state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .folder_mut(folder);
        folder
            .messages
            .retain(|existing| existing.overview.uid != message.overview.uid);
        folder.messages.push(message);
        folder.messages.sort_by_key(|existing| existing.overview.uid);
    }

    /// Moves a message between folders, assigning the UID the target
    /// folder would hand out. Returns false when the message is unknown.
    pub fn move_message(
        &self,
        account_id: &str,
        from: &str,
        to: &str,
        uid: u32,
        new_uid: u32,
    ) -> bool {
        let mut state = self.lock();
        let Some(account) = state.accounts.get_mut(account_id) else {
            return false;
        };
        let source = account.folder_mut(from);
        let Some(pos) = source
            .messages
            .iter()
            .position(|message| message.overview.uid == uid)
        else {
            return false;
        };
        let mut message = source.messages.remove(pos);
        message.overview.uid = new_uid;

        let target = account.folder_mut(to);
        target.messages.push(message);
        target.messages.sort_by_key(|existing| existing.overview.uid);
        true
    }

    pub fn set_unreachable(&self, account_id: &str, unreachable: bool) {
        let mut state = self.lock();
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .unreachable = unreachable;
    }

    /// Connecting still works but `LIST` fails from now on.
    pub fn break_listing(&self, account_id: &str) {
        let mut state = self.lock();
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .broken_listing = true;
    }

    /// Every fetch against `folder` fails from now on.
    pub fn break_folder(&self, account_id: &str, folder: &str) {
        let mut state = self.lock();
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .broken_folders
            .insert(folder.to_string());
    }

    pub fn calls(&self) -> Vec<MailboxCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl MailboxConnector for MemoryMailbox {
    fn connect(&self, account: &Account) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let state = self.lock();
        match state.accounts.get(&account.account_id) {
            Some(remote) if !remote.unreachable => Ok(Box::new(MemorySession {
                mailbox: self.clone(),
                account_id: account.account_id.clone(),
                selected: None,
            })),
            _ => Err(MailboxError::Connect {
                host: account.host.clone(),
                port: account.port,
                reason: "mailbox unreachable".to_string(),
            }),
        }
    }
}

struct MemorySession {
    mailbox: MemoryMailbox,
    account_id: String,
    selected: Option<String>,
}

impl MemorySession {
    fn selected(&self) -> Result<&str, MailboxError> {
        self.selected
            .as_deref()
            .ok_or_else(|| MailboxError::command("UID FETCH", "no folder selected"))
    }

    fn with_folder<T>(
        &self,
        command: &'static str,
        f: impl FnOnce(&[FetchedMessage]) -> T,
    ) -> Result<T, MailboxError> {
        let folder = self.selected()?;
        let state = self.mailbox.lock();
        let account = state
            .accounts
            .get(&self.account_id)
            .ok_or_else(|| MailboxError::command(command, "account vanished"))?;
        if account.broken_folders.contains(folder) {
            return Err(MailboxError::command(command, format!("{folder}: server error")));
        }
        let messages = account
            .folder(folder)
            .map(|folder| folder.messages.as_slice())
            .unwrap_or_default();
        Ok(f(messages))
    }

    fn record(&self, call: MailboxCall) {
        self.mailbox.lock().calls.push(call);
    }
}

impl MailboxSession for MemorySession {
    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let state = self.mailbox.lock();
        let account = state
            .accounts
            .get(&self.account_id)
            .ok_or_else(|| MailboxError::command("LIST", "account vanished"))?;
        if account.broken_listing {
            return Err(MailboxError::command("LIST", "server error"));
        }
        Ok(account
            .folders
            .iter()
            .map(|folder| folder.name.clone())
            .collect())
    }

    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let exists = {
            let state = self.mailbox.lock();
            state
                .accounts
                .get(&self.account_id)
                .and_then(|account| account.folder(folder))
                .is_some()
        };
        if !exists {
            return Err(MailboxError::command("SELECT", format!("{folder}: no such folder")));
        }
        self.selected = Some(folder.to_string());
        Ok(())
    }

    fn list_uids(&mut self, query: &str) -> Result<Vec<u32>, MailboxError> {
        if query != ALL_UIDS {
            return Err(MailboxError::command(
                "UID SEARCH",
                format!("unsupported query {query}"),
            ));
        }
        self.with_folder("UID SEARCH", |messages| {
            messages.iter().map(|message| message.overview.uid).collect()
        })
    }

    fn fetch_overviews(&mut self, uids: &[u32]) -> Result<Vec<Overview>, MailboxError> {
        let overviews = self.with_folder("UID FETCH", |messages| {
            messages
                .iter()
                .filter(|message| uids.contains(&message.overview.uid))
                .map(|message| message.overview.clone())
                .collect()
        })?;
        self.record(MailboxCall::Overviews {
            account: self.account_id.clone(),
            folder: self.selected()?.to_string(),
            uids: uids.to_vec(),
        });
        Ok(overviews)
    }

    fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, MailboxError> {
        let fetched = self.with_folder("UID FETCH", |messages| {
            messages
                .iter()
                .filter(|message| uids.contains(&message.overview.uid))
                .cloned()
                .collect()
        })?;
        self.record(MailboxCall::Messages {
            account: self.account_id.clone(),
            folder: self.selected()?.to_string(),
            uids: uids.to_vec(),
        });
        Ok(fetched)
    }
}
