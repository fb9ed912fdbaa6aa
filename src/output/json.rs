use anyhow::Result;

use crate::db::models::{Account, Message, SyncRun};
use crate::db::DatabaseStats;
use crate::output::MessageDetail;
use crate::sync::SyncReport;

pub fn format_messages(messages: &[Message]) -> Result<String> {
    Ok(serde_json::to_string_pretty(messages)?)
}

pub fn format_message(detail: &MessageDetail) -> Result<String> {
    Ok(serde_json::to_string_pretty(detail)?)
}

pub fn format_accounts(accounts: &[Account]) -> Result<String> {
    Ok(serde_json::to_string_pretty(accounts)?)
}

pub fn format_runs(runs: &[SyncRun]) -> Result<String> {
    Ok(serde_json::to_string_pretty(runs)?)
}

pub fn format_report(report: &SyncReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn format_stats(stats: &DatabaseStats) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}

#[cfg(test)]
mod tests {
    use super::format_accounts;
    use crate::db::models::Account;

    #[test]
    fn account_json_never_contains_password() {
        let rendered = format_accounts(&[Account {
            account_id: "acc-1".to_string(),
            username: "owner@example.com".to_string(),
            password: "hunter2".to_string(),
            host: "imap.example.com".to_string(),
            port: 993,
            enabled: true,
            last_sync: None,
        }])
        .expect("render accounts");
        assert!(rendered.contains("imap.example.com"));
        assert!(!rendered.contains("hunter2"));
    }
}
