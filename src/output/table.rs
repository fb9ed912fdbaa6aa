use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::{Account, Message, SyncRun};
use crate::db::DatabaseStats;
use crate::output::MessageDetail;
use crate::sync::SyncReport;

const ID_WIDTH: usize = 36;
const FOLDER_WIDTH: usize = 18;
const SUBJECT_WIDTH: usize = 48;
const DATE_WIDTH: usize = 12;

pub fn format_messages(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<id$}  {:<folder$}  {:<subject$}  {:<date$}\n",
        "ID",
        "Folder",
        "Subject",
        "Received",
        id = ID_WIDTH,
        folder = FOLDER_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(ID_WIDTH),
        "-".repeat(FOLDER_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH)
    ));

    for message in messages {
        let subject = if message.subject.is_empty() {
            "(no subject)"
        } else {
            message.subject.as_str()
        };
        let date = message
            .received_at
            .as_deref()
            .map(relative_date)
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!(
            "{:<id$}  {}  {}  {:<date$}\n",
            message.id,
            pad_to_width(&truncate_for_width(&message.folder, FOLDER_WIDTH), FOLDER_WIDTH),
            pad_to_width(&truncate_for_width(subject, SUBJECT_WIDTH), SUBJECT_WIDTH),
            truncate_for_width(&date, DATE_WIDTH),
            id = ID_WIDTH,
            date = DATE_WIDTH
        ));
    }

    out
}

pub fn format_message(detail: &MessageDetail) -> String {
    let message = &detail.message;
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", message.id));
    out.push_str(&format!("Account: {}\n", message.account_id));
    out.push_str(&format!("Folder: {} (uid {})\n", message.folder, message.uid));
    out.push_str(&format!(
        "Subject: {}\n",
        if message.subject.is_empty() {
            "(no subject)"
        } else {
            message.subject.as_str()
        }
    ));
    if !message.message_id.is_empty() {
        out.push_str(&format!("Message-ID: {}\n", message.message_id));
    }

    for entry in &detail.addresses {
        let label = if entry.display_name.is_empty() {
            entry.address.clone()
        } else {
            format!("{} <{}>", entry.display_name, entry.address)
        };
        out.push_str(&format!("{}: {label}\n", role_label(entry.role.as_str())));
    }

    if let Some(received_at) = &message.received_at {
        out.push_str(&format!(
            "Received: {received_at} ({})\n",
            relative_date(received_at)
        ));
    }
    if let Some(sent_at) = &message.sent_at {
        out.push_str(&format!("Sent: {sent_at}\n"));
    }
    out.push_str(&format!("Size: {} bytes\n", message.size));
    if !detail.flags.is_empty() {
        let flags: Vec<&str> = detail.flags.iter().map(|flag| flag.flag.as_str()).collect();
        out.push_str(&format!("Flags: {}\n", flags.join(" ")));
    }

    if !detail.attachments.is_empty() {
        out.push('\n');
        out.push_str("Attachments\n");
        out.push_str("-----------\n");
        for attachment in &detail.attachments {
            out.push_str(&format!(
                "{:>2}. {}  {}  {} bytes\n",
                attachment.idx,
                if attachment.name.is_empty() {
                    "(unnamed)"
                } else {
                    attachment.name.as_str()
                },
                attachment.mime_type,
                attachment.size
            ));
        }
    }

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    let body = if !message.body_text.is_empty() {
        message.body_text.as_str()
    } else if !message.body_html.is_empty() {
        message.body_html.as_str()
    } else {
        "(empty)"
    };
    out.push_str(body);
    out.push('\n');
    out
}

pub fn format_accounts(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No accounts configured.".to_string();
    }

    let mut out = String::new();
    out.push_str("Account               Remote                                    Enabled  Last Sync\n");
    out.push_str("--------------------  ----------------------------------------  -------  --------------------\n");
    for account in accounts {
        out.push_str(&format!(
            "{}  {}  {:<7}  {}\n",
            pad_to_width(&truncate_for_width(&account.account_id, 20), 20),
            pad_to_width(&truncate_for_width(&account.label(), 40), 40),
            if account.enabled { "yes" } else { "no" },
            account.last_sync.as_deref().unwrap_or("never")
        ));
    }
    out
}

pub fn format_runs(runs: &[SyncRun]) -> String {
    if runs.is_empty() {
        return "No sync runs recorded.".to_string();
    }

    let mut out = String::new();
    out.push_str("Started               Status     Accounts  Failed  Imported  Moved  Errors\n");
    out.push_str("--------------------  ---------  --------  ------  --------  -----  ------\n");
    for run in runs {
        out.push_str(&format!(
            "{:<20}  {:<9}  {:>8}  {:>6}  {:>8}  {:>5}  {:>6}\n",
            run.started_at,
            run.status.to_string(),
            run.accounts_total,
            run.accounts_failed,
            run.imported,
            run.moved,
            run.failed
        ));
        if let Some(error) = &run.error {
            out.push_str(&format!("  error: {error}\n"));
        }
    }
    out
}

pub fn format_report(report: &SyncReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Sync {}\n",
        if report.cancelled {
            "cancelled"
        } else {
            "complete"
        }
    ));
    out.push_str(&format!(
        "Accounts: {} ({} failed)\n",
        report.accounts_total, report.accounts_failed
    ));
    out.push_str(&format!(
        "Folders:  {} ({} skipped)\n",
        report.folders_scanned, report.folders_failed
    ));
    out.push_str(&format!("Imported: {}\n", report.imported));
    out.push_str(&format!("Moved:    {}\n", report.moved));
    out.push_str(&format!("Failed:   {}\n", report.failed));
    if report.collisions > 0 {
        out.push_str(&format!("Fingerprint collisions: {}\n", report.collisions));
    }
    out
}

pub fn format_stats(stats: &DatabaseStats) -> String {
    let mut out = String::new();
    out.push_str("Archive Stats\n");
    out.push_str("=============\n");
    out.push_str(&format!("Accounts:    {}\n", stats.total_accounts));
    out.push_str(&format!("Messages:    {}\n", stats.total_messages));
    out.push_str(&format!(
        "Attachments: {} ({} bytes)\n",
        stats.total_attachments, stats.attachment_bytes
    ));

    if !stats.messages_by_account.is_empty() {
        out.push('\n');
        out.push_str("Messages by account\n");
        out.push_str("-------------------\n");
        for row in &stats.messages_by_account {
            out.push_str(&format!("{:<24} {:>8}\n", row.account_id, row.count));
        }
    }

    if let Some(run) = &stats.last_run {
        out.push('\n');
        out.push_str(&format!(
            "Last run: {} {} (imported={} moved={} failed={})\n",
            run.started_at, run.status, run.imported, run.moved, run.failed
        ));
    }

    out
}

fn role_label(role: &str) -> &'static str {
    match role {
        "from" => "From",
        "to" => "To",
        "reply_to" => "Reply-To",
        "cc" => "CC",
        _ => "BCC",
    }
}

fn relative_date(input: &str) -> String {
    let parsed = match DateTime::parse_from_rfc3339(input) {
        Ok(value) => value.with_timezone(&Utc),
        Err(_) => return input.to_string(),
    };

    let delta = Utc::now().signed_duration_since(parsed);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    parsed.format("%Y-%m-%d").to_string()
}

/// `format!` pads by char count; wide glyphs need padding by display width.
fn pad_to_width(value: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    format!("{value}{}", " ".repeat(width - current))
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::db::models::{AddressEntry, AddressRole, Attachment, Flag, Message};
    use crate::output::MessageDetail;
    use crate::sync::SyncReport;

    use super::{format_message, format_messages, format_report, truncate_for_width};

    fn sample_message() -> Message {
        Message {
            id: "7f0c6a52-0000-4000-8000-000000000001".to_string(),
            account_id: "acc-1".to_string(),
            folder: "INBOX".to_string(),
            received_at: Some((Utc::now() - Duration::hours(2)).to_rfc3339()),
            sent_at: None,
            size: 2048,
            subject: "A very long subject line that should be truncated in table output because it exceeds width".to_string(),
            uid: 101,
            message_id: "kickoff@example.com".to_string(),
            body_text: "Body".to_string(),
            body_html: String::new(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn message_list_has_headers_and_truncates() {
        let rendered = format_messages(&[sample_message()]);
        assert!(rendered.contains("Folder"));
        assert!(rendered.contains("Subject"));
        assert!(rendered.contains("2h ago"));
        assert!(rendered.contains('…'));
    }

    #[test]
    fn message_detail_lists_addresses_and_attachments() {
        let message = sample_message();
        let detail = MessageDetail {
            flags: vec![Flag {
                message_id: message.id.clone(),
                idx: 0,
                flag: "\\Seen".to_string(),
            }],
            addresses: vec![AddressEntry {
                message_id: message.id.clone(),
                role: AddressRole::ReplyTo,
                position: 0,
                address: "help@example.com".to_string(),
                display_name: "Help Desk".to_string(),
            }],
            attachments: vec![Attachment {
                id: "att-1".to_string(),
                message_id: message.id.clone(),
                idx: 0,
                name: "agenda.txt".to_string(),
                mime_type: "text/plain".to_string(),
                file_id: "file-1".to_string(),
                size: 8,
            }],
            message,
        };

        let rendered = format_message(&detail);
        assert!(rendered.contains("Reply-To: Help Desk <help@example.com>"));
        assert!(rendered.contains("agenda.txt"));
        assert!(rendered.contains("Flags: \\Seen"));
        assert!(rendered.contains("Body"));
    }

    #[test]
    fn report_mentions_collisions_only_when_present() {
        let quiet = format_report(&SyncReport::default());
        assert!(!quiet.contains("collisions"));

        let noisy = format_report(&SyncReport {
            collisions: 2,
            ..SyncReport::default()
        });
        assert!(noisy.contains("Fingerprint collisions: 2"));
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_for_width("short", 10), "short");
        assert_eq!(truncate_for_width("abcdefghij", 5), "abcd…");
    }
}
