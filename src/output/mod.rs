pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::db::models::{Account, AddressEntry, Attachment, Flag, Message, SyncRun};
use crate::db::DatabaseStats;
use crate::sync::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

/// A stored message with its flags, addresses and attachments, as shown by `show`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: Message,
    pub flags: Vec<Flag>,
    pub addresses: Vec<AddressEntry>,
    pub attachments: Vec<Attachment>,
}

pub fn format_messages(format: OutputFormat, messages: &[Message]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_messages(messages)),
        OutputFormat::Json => json::format_messages(messages),
    }
}

pub fn format_message(format: OutputFormat, detail: &MessageDetail) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_message(detail)),
        OutputFormat::Json => json::format_message(detail),
    }
}

pub fn format_accounts(format: OutputFormat, accounts: &[Account]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_accounts(accounts)),
        OutputFormat::Json => json::format_accounts(accounts),
    }
}

pub fn format_runs(format: OutputFormat, runs: &[SyncRun]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_runs(runs)),
        OutputFormat::Json => json::format_runs(runs),
    }
}

pub fn format_report(format: OutputFormat, report: &SyncReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_report(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_stats(format: OutputFormat, stats: &DatabaseStats) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_stats(stats)),
        OutputFormat::Json => json::format_stats(stats),
    }
}
