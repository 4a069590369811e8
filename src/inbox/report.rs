//! Per-cycle results of the inbox loop.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mailbox::MessageId;

/// Bookkeeping step that follows a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookkeepingStage {
    MarkRead,
    Label,
}

/// What happened to one message in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Reply sent, message marked read and labeled.
    Replied,
    /// Details absent, undecodable or unavailable; nothing was sent.
    Skipped { reason: String },
    /// Reply could not be sent; the message stays unread.
    SendFailed { error: String },
    /// Reply sent but a bookkeeping step failed; retried next cycle.
    Unmarked {
        stage: BookkeepingStage,
        error: String,
    },
    /// Reply sent, but the message vanished before bookkeeping finished.
    /// Nothing is left to retry.
    Abandoned {
        stage: BookkeepingStage,
        error: String,
    },
    /// Not attempted because the loop was cancelled.
    Cancelled,
    /// Reply was sent in an earlier cycle; bookkeeping finished now.
    AlreadyReplied,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub id: MessageId,
    #[serde(flatten)]
    pub outcome: MessageOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ids returned by the unread listing.
    pub listed: usize,
    pub results: Vec<ProcessingResult>,
    /// Set when the unread listing failed; `results` then only carries
    /// bookkeeping retries.
    pub fetch_error: Option<String>,
}

impl CycleReport {
    pub fn count(&self, pred: impl Fn(&MessageOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn replied(&self) -> usize {
        self.count(|o| matches!(o, MessageOutcome::Replied))
    }

    /// Results that need another cycle: send failures and incomplete
    /// bookkeeping.
    pub fn pending(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                MessageOutcome::SendFailed { .. } | MessageOutcome::Unmarked { .. }
            )
        })
    }

    pub fn outcome(&self, id: &MessageId) -> Option<&MessageOutcome> {
        self.results.iter().find(|r| &r.id == id).map(|r| &r.outcome)
    }

    /// Nothing listed, nothing retried.
    pub fn is_idle(&self) -> bool {
        self.listed == 0 && self.results.is_empty() && self.fetch_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: Vec<ProcessingResult>) -> CycleReport {
        let now = Utc::now();
        CycleReport {
            cycle: 1,
            started_at: now,
            finished_at: now,
            listed: results.len(),
            results,
            fetch_error: None,
        }
    }

    #[test]
    fn counts_by_outcome() {
        let r = report(vec![
            ProcessingResult {
                id: "a".into(),
                outcome: MessageOutcome::Replied,
            },
            ProcessingResult {
                id: "b".into(),
                outcome: MessageOutcome::SendFailed {
                    error: "503".into(),
                },
            },
            ProcessingResult {
                id: "c".into(),
                outcome: MessageOutcome::Unmarked {
                    stage: BookkeepingStage::Label,
                    error: "boom".into(),
                },
            },
        ]);
        assert_eq!(r.replied(), 1);
        assert_eq!(r.pending(), 2);
        assert_eq!(r.outcome(&"a".into()), Some(&MessageOutcome::Replied));
        assert!(!r.is_idle());
    }

    #[test]
    fn result_serializes_flat() {
        let result = ProcessingResult {
            id: "m1".into(),
            outcome: MessageOutcome::Unmarked {
                stage: BookkeepingStage::MarkRead,
                error: "timeout".into(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["outcome"], "unmarked");
        assert_eq!(json["stage"], "mark_read");
    }

    #[test]
    fn abandoned_is_not_pending() {
        let r = report(vec![ProcessingResult {
            id: "gone".into(),
            outcome: MessageOutcome::Abandoned {
                stage: BookkeepingStage::MarkRead,
                error: "404".into(),
            },
        }]);
        assert_eq!(r.pending(), 0);
        assert_eq!(r.replied(), 0);
    }

    #[test]
    fn empty_report_is_idle() {
        assert!(report(vec![]).is_idle());
    }
}
