use std::collections::HashSet;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ::imap::types::{Fetch, NameAttribute};
use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

use super::{
    Addresses, FetchedAttachment, FetchedMessage, MailAddress, MailboxConnector, MailboxError,
    MailboxSession, Overview,
};
use crate::config::SyncSettings;
use crate::db::models::Account;

type ImapSession = ::imap::Session<TlsStream<TcpStream>>;

/// Header-only fetch: enough to build a fingerprint without downloading bodies.
const OVERVIEW_QUERY: &str = "(UID RFC822.SIZE INTERNALDATE BODY.PEEK[HEADER])";
/// Full fetch; `PEEK` keeps the remote `\Seen` flag untouched.
const MESSAGE_QUERY: &str = "(UID FLAGS RFC822.SIZE INTERNALDATE BODY.PEEK[])";
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Connects to IMAP over implicit TLS and logs in with the account password.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    connect_retries: u32,
    io_timeout: Duration,
}

impl ImapConnector {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            connect_retries: settings.connect_retries,
            io_timeout: settings.io_timeout,
        }
    }

    fn open(&self, account: &Account) -> Result<ImapSession, MailboxError> {
        let connect_error = |reason: String| MailboxError::Connect {
            host: account.host.clone(),
            port: account.port,
            reason,
        };

        let addr = (account.host.as_str(), account.port)
            .to_socket_addrs()
            .map_err(|e| connect_error(format!("resolve: {e}")))?
            .next()
            .ok_or_else(|| connect_error("host resolved to no addresses".to_string()))?;

        let tcp = TcpStream::connect_timeout(&addr, self.io_timeout)
            .map_err(|e| connect_error(e.to_string()))?;
        tcp.set_read_timeout(Some(self.io_timeout))
            .map_err(|e| connect_error(e.to_string()))?;
        tcp.set_write_timeout(Some(self.io_timeout))
            .map_err(|e| connect_error(e.to_string()))?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let stream = tls
            .connect(&account.host, tcp)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        let mut client = ::imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| connect_error(format!("greeting: {e}")))?;

        client
            .login(&account.username, &account.password)
            .map_err(|(error, _client)| MailboxError::Auth {
                username: account.username.clone(),
                reason: error.to_string(),
            })
    }
}

impl MailboxConnector for ImapConnector {
    fn connect(&self, account: &Account) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let attempts = self.connect_retries + 1;
        let mut attempt = 1;

        loop {
            match self.open(account) {
                Ok(session) => {
                    return Ok(Box::new(ImapMailbox {
                        session,
                        selected: None,
                    }))
                }
                // Wrong credentials do not get better on retry.
                Err(error @ MailboxError::Auth { .. }) => return Err(error),
                Err(error) if attempt < attempts => {
                    warn!(
                        account = %account.account_id,
                        attempt,
                        attempts,
                        %error,
                        "imap connect failed, retrying"
                    );
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

struct ImapMailbox {
    session: ImapSession,
    selected: Option<String>,
}

impl MailboxSession for ImapMailbox {
    fn list_folders(&mut self) -> Result<Vec<String>, MailboxError> {
        let names = self
            .session
            .list(None, Some("*"))
            .map_err(|e| MailboxError::command("LIST", e))?;

        let folders = names
            .iter()
            .filter(|name| {
                !name
                    .attributes()
                    .iter()
                    .any(|attribute| matches!(attribute, NameAttribute::NoSelect))
            })
            .map(|name| name.name().to_string())
            .collect();
        Ok(folders)
    }

    fn select_folder(&mut self, folder: &str) -> Result<(), MailboxError> {
        let mailbox = self
            .session
            .select(folder)
            .map_err(|e| MailboxError::command("SELECT", format!("{folder}: {e}")))?;
        debug!(folder, exists = mailbox.exists, "selected folder");
        self.selected = Some(folder.to_string());
        Ok(())
    }

    fn list_uids(&mut self, query: &str) -> Result<Vec<u32>, MailboxError> {
        let uids: HashSet<u32> = self
            .session
            .uid_search(query)
            .map_err(|e| MailboxError::command("UID SEARCH", e))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch_overviews(&mut self, uids: &[u32]) -> Result<Vec<Overview>, MailboxError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = self
            .session
            .uid_fetch(uid_set(uids), OVERVIEW_QUERY)
            .map_err(|e| MailboxError::command("UID FETCH", e))?;

        let mut overviews = Vec::with_capacity(fetches.len());
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else {
                warn!(folder = ?self.selected, "overview fetch without uid, skipping");
                continue;
            };
            overviews.push(parse_overview(uid, fetch));
        }
        overviews.sort_by_key(|overview| overview.uid);
        Ok(overviews)
    }

    fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, MailboxError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = self
            .session
            .uid_fetch(uid_set(uids), MESSAGE_QUERY)
            .map_err(|e| MailboxError::command("UID FETCH", e))?;

        let mut raws = Vec::with_capacity(fetches.len());
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else {
                warn!(folder = ?self.selected, "message fetch without uid, skipping");
                continue;
            };
            let Some(body) = fetch.body() else {
                warn!(folder = ?self.selected, uid, "message fetch without body, skipping");
                continue;
            };
            raws.push(RawMessage {
                uid,
                size: fetch.size,
                received: received_at(fetch),
                flags: fetch.flags().iter().map(|flag| flag.to_string()).collect(),
                body,
            });
        }
        Ok(parse_batch(self.selected.as_deref(), raws))
    }

    fn logout(&mut self) {
        if let Err(error) = self.session.logout() {
            debug!(%error, "imap logout failed");
        }
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn received_at(fetch: &Fetch) -> Option<DateTime<Utc>> {
    fetch.internal_date().map(|date| date.with_timezone(&Utc))
}

fn parse_overview(uid: u32, fetch: &Fetch) -> Overview {
    let parsed = fetch
        .header()
        .and_then(|header| MessageParser::default().parse(header));

    Overview {
        uid,
        message_id: parsed
            .as_ref()
            .and_then(|message| message.message_id())
            .unwrap_or_default()
            .to_string(),
        size: fetch.size.map(u64::from).unwrap_or(0),
        subject: parsed
            .as_ref()
            .and_then(|message| message.subject())
            .unwrap_or_default()
            .to_string(),
        received: received_at(fetch),
        sent: parsed
            .as_ref()
            .and_then(|message| message.date())
            .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0)),
    }
}

/// The parts of a full fetch response the parser needs.
struct RawMessage<'a> {
    uid: u32,
    size: Option<u32>,
    received: Option<DateTime<Utc>>,
    flags: Vec<String>,
    body: &'a [u8],
}

/// Parses a fetched batch. A message the parser rejects is logged and left
/// out so the rest of the batch still lands; the persister counts it as failed.
fn parse_batch<'a>(
    folder: Option<&str>,
    raws: impl IntoIterator<Item = RawMessage<'a>>,
) -> Vec<FetchedMessage> {
    let mut messages: Vec<FetchedMessage> = raws
        .into_iter()
        .filter_map(|raw| {
            let uid = raw.uid;
            match parse_message(raw) {
                Ok(message) => Some(message),
                Err(error) => {
                    warn!(folder = ?folder, uid, %error, "unparsable message, skipping");
                    None
                }
            }
        })
        .collect();
    messages.sort_by_key(|message| message.overview.uid);
    messages
}

fn parse_message(raw: RawMessage<'_>) -> Result<FetchedMessage, MailboxError> {
    let uid = raw.uid;
    let message = MessageParser::default()
        .parse(raw.body)
        .ok_or_else(|| MailboxError::Parse {
            uid,
            reason: "not an RFC 5322 message".to_string(),
        })?;

    let overview = Overview {
        uid,
        message_id: message.message_id().unwrap_or_default().to_string(),
        size: raw.size.map(u64::from).unwrap_or(raw.body.len() as u64),
        subject: message.subject().unwrap_or_default().to_string(),
        received: raw.received,
        sent: message
            .date()
            .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0)),
    };

    let text = match message.text_part(0).map(|part| &part.body) {
        Some(PartType::Text(text)) => text.to_string(),
        _ => String::new(),
    };
    let html = match message.html_part(0).map(|part| &part.body) {
        Some(PartType::Html(html)) => html.to_string(),
        _ => String::new(),
    };

    let addresses = Addresses {
        from: collect_addresses(message.from()),
        to: collect_addresses(message.to()),
        reply_to: collect_addresses(message.reply_to()),
        cc: collect_addresses(message.cc()),
        bcc: collect_addresses(message.bcc()),
    };

    let attachments = message
        .attachments()
        .map(|part| FetchedAttachment {
            name: part.attachment_name().unwrap_or_default().to_string(),
            mime_type: part
                .content_type()
                .map(|content_type| match content_type.subtype() {
                    Some(subtype) => format!("{}/{}", content_type.ctype(), subtype),
                    None => content_type.ctype().to_string(),
                })
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            content: part.contents().to_vec(),
        })
        .collect();

    Ok(FetchedMessage {
        overview,
        text,
        html,
        flags: raw.flags,
        addresses,
        attachments,
    })
}

fn collect_addresses(address: Option<&Address<'_>>) -> Vec<MailAddress> {
    let Some(address) = address else {
        return Vec::new();
    };

    let entries: Vec<(Option<&str>, Option<&str>)> = match address {
        Address::List(list) => list
            .iter()
            .map(|addr| (addr.address.as_deref(), addr.name.as_deref()))
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .map(|addr| (addr.address.as_deref(), addr.name.as_deref()))
            .collect(),
    };

    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|(address, name)| {
            let address = address?.trim();
            if address.is_empty() || !seen.insert(address.to_ascii_lowercase()) {
                return None;
            }
            Some(MailAddress::new(address, name.unwrap_or_default().trim()))
        })
        .collect()
}
