use chrono::{DateTime, Utc};

use crate::db::models::{parse_timestamp, MessageRef};
use crate::mailbox::Overview;

/// Identity of a message across folders and UID renumbering. A store hit on
/// the fingerprint is only a candidate until [`Fingerprint::confirms`] agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint<'a> {
    pub account_id: &'a str,
    pub message_id: &'a str,
    pub size: u64,
    pub subject: &'a str,
}

impl<'a> Fingerprint<'a> {
    pub fn from_overview(account_id: &'a str, overview: &'a Overview) -> Self {
        Self {
            account_id,
            message_id: &overview.message_id,
            size: overview.size,
            subject: &overview.subject,
        }
    }

    /// Received and sent times must agree at second precision; a missing
    /// time only matches another missing time.
    pub fn confirms(&self, candidate: &MessageRef, overview: &Overview) -> bool {
        same_second(candidate.received_at.as_deref(), overview.received)
            && same_second(candidate.sent_at.as_deref(), overview.sent)
    }
}

fn same_second(stored: Option<&str>, remote: Option<DateTime<Utc>>) -> bool {
    match (stored.and_then(parse_timestamp), remote) {
        (Some(stored), Some(remote)) => stored.timestamp() == remote.timestamp(),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::Fingerprint;
    use crate::db::models::MessageRef;
    use crate::mailbox::Overview;

    fn overview() -> Overview {
        let received = Utc
            .with_ymd_and_hms(2025, 3, 1, 8, 30, 15)
            .single()
            .expect("valid timestamp");
        Overview {
            uid: 101,
            message_id: "abc".to_string(),
            size: 10,
            subject: "hi".to_string(),
            received: Some(received + Duration::milliseconds(400)),
            sent: Some(received - Duration::minutes(1)),
        }
    }

    fn candidate(received_at: Option<&str>, sent_at: Option<&str>) -> MessageRef {
        MessageRef {
            id: "m-1".to_string(),
            folder: "Archive".to_string(),
            uid: 7,
            received_at: received_at.map(str::to_string),
            sent_at: sent_at.map(str::to_string),
        }
    }

    #[test]
    fn fingerprint_borrows_overview_fields() {
        let overview = overview();
        let fingerprint = Fingerprint::from_overview("acc", &overview);
        assert_eq!(fingerprint.message_id, "abc");
        assert_eq!(fingerprint.size, 10);
        assert_eq!(fingerprint.subject, "hi");
    }

    #[test]
    fn confirmation_ignores_sub_second_difference() {
        let overview = overview();
        let fingerprint = Fingerprint::from_overview("acc", &overview);
        let hit = candidate(Some("2025-03-01T08:30:15Z"), Some("2025-03-01T08:29:15Z"));
        assert!(fingerprint.confirms(&hit, &overview));
    }

    #[test]
    fn time_mismatch_is_a_collision() {
        let overview = overview();
        let fingerprint = Fingerprint::from_overview("acc", &overview);

        let received_off = candidate(Some("2025-03-01T08:30:16Z"), Some("2025-03-01T08:29:15Z"));
        assert!(!fingerprint.confirms(&received_off, &overview));

        let sent_missing = candidate(Some("2025-03-01T08:30:15Z"), None);
        assert!(!fingerprint.confirms(&sent_missing, &overview));
    }

    #[test]
    fn missing_times_match_each_other() {
        let overview = Overview {
            received: None,
            sent: None,
            ..overview()
        };
        let fingerprint = Fingerprint::from_overview("acc", &overview);
        assert!(fingerprint.confirms(&candidate(None, None), &overview));
    }
}
