//! Inbox processing loop: list unread mail, reply to each message, then mark
//! it read and label it.
//!
//! One cycle handles the listed messages sequentially, in list order. A
//! message is marked read and labeled only after its reply was sent; a
//! failed send leaves it unread so the next cycle retries it. Replies whose
//! bookkeeping failed are tracked in the [`ReplyLedger`] and never sent
//! again.
//!
//! Cancellation is honoured before and during every call that precedes a
//! send. Once a send has started, it and the bookkeeping after it run to
//! completion.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ledger::ReplyLedger;
use super::report::{BookkeepingStage, CycleReport, MessageOutcome, ProcessingResult};
use crate::config::ProcessorConfig;
use crate::error::MailboxError;
use crate::mailbox::{LabelId, MailboxClient, MessageId, reply_subject};
use crate::responder::Responder;

/// Bound a provider call by `limit`; expiry becomes [`MailboxError::Timeout`].
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, MailboxError>>,
) -> Result<T, MailboxError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(MailboxError::Timeout {
            operation,
            timeout: limit,
        }))
}

/// Await `call` unless `cancel` fires first; `None` means cancelled.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = call => Some(out),
    }
}

/// Cycle counter and last report, shared with whoever supervises the loop.
#[derive(Debug, Clone, Default)]
pub struct LoopMonitor {
    inner: Arc<Mutex<MonitorState>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorState {
    pub cycles: u64,
    pub last_report: Option<CycleReport>,
}

impl LoopMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: CycleReport) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.cycles += 1;
        state.last_report = Some(report);
    }

    pub fn snapshot(&self) -> MonitorState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct InboxProcessor {
    mailbox: Arc<dyn MailboxClient>,
    responder: Arc<dyn Responder>,
    config: ProcessorConfig,
    ledger: ReplyLedger,
    monitor: LoopMonitor,
    label_id: Option<LabelId>,
    cycle: u64,
}

impl InboxProcessor {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        responder: Arc<dyn Responder>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            mailbox,
            responder,
            config,
            ledger: ReplyLedger::new(),
            monitor: LoopMonitor::new(),
            label_id: None,
            cycle: 0,
        }
    }

    /// Share an existing ledger, e.g. one kept across restarts.
    pub fn with_ledger(mut self, ledger: ReplyLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_monitor(mut self, monitor: LoopMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn ledger(&self) -> &ReplyLedger {
        &self.ledger
    }

    fn report(
        &self,
        started_at: DateTime<Utc>,
        listed: usize,
        results: Vec<ProcessingResult>,
        fetch_error: Option<String>,
    ) -> CycleReport {
        CycleReport {
            cycle: self.cycle,
            started_at,
            finished_at: Utc::now(),
            listed,
            results,
            fetch_error,
        }
    }

    /// Run one cycle: finish outstanding bookkeeping, list unread mail, then
    /// process each listed message.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        self.cycle += 1;
        let started_at = Utc::now();
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for id in self.ledger.pending() {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = match self.finish_bookkeeping(&id).await {
                Ok(()) => {
                    info!(id = %id, "Bookkeeping finished on retry");
                    MessageOutcome::AlreadyReplied
                }
                Err(outcome) => outcome,
            };
            seen.insert(id.clone());
            results.push(ProcessingResult { id, outcome });
        }

        let listed = unless_cancelled(
            cancel,
            bounded(
                "list_unread",
                self.config.call_timeout,
                self.mailbox.list_unread(self.config.batch_size),
            ),
        )
        .await;

        let ids = match listed {
            None => {
                debug!(cycle = self.cycle, "Cancelled before listing finished");
                return self.report(started_at, 0, results, None);
            }
            Some(Ok(ids)) => ids,
            Some(Err(e)) => {
                error!(cycle = self.cycle, error = %e, "Failed to list unread messages");
                return self.report(started_at, 0, results, Some(e.to_string()));
            }
        };

        if !ids.is_empty() {
            debug!(cycle = self.cycle, count = ids.len(), "Unread messages listed");
        }

        for id in &ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            let outcome = if cancel.is_cancelled() {
                MessageOutcome::Cancelled
            } else {
                self.process_message(id, cancel).await
            };
            results.push(ProcessingResult {
                id: id.clone(),
                outcome,
            });
        }

        self.report(started_at, ids.len(), results, None)
    }

    async fn process_message(
        &mut self,
        id: &MessageId,
        cancel: &CancellationToken,
    ) -> MessageOutcome {
        if self.ledger.contains(id) {
            debug!(id = %id, "Reply already sent, finishing bookkeeping");
            return match self.finish_bookkeeping(id).await {
                Ok(()) => MessageOutcome::AlreadyReplied,
                Err(outcome) => outcome,
            };
        }

        let limit = self.config.call_timeout;
        let fetched = unless_cancelled(
            cancel,
            bounded("get_details", limit, self.mailbox.get_details(id)),
        )
        .await;
        let details = match fetched {
            None => return MessageOutcome::Cancelled,
            Some(Ok(Some(details))) => details,
            Some(Ok(None)) => {
                debug!(id = %id, "Message absent or undecodable, skipping");
                return MessageOutcome::Skipped {
                    reason: "message absent or undecodable".into(),
                };
            }
            Some(Err(e)) => {
                warn!(id = %id, error = %e, "Failed to fetch message details");
                return MessageOutcome::Skipped {
                    reason: format!("details unavailable: {e}"),
                };
            }
        };

        let Some(text) = unless_cancelled(cancel, self.responder.generate_reply(&details)).await
        else {
            return MessageOutcome::Cancelled;
        };
        if cancel.is_cancelled() {
            return MessageOutcome::Cancelled;
        }

        // Not raced against cancellation: a send that started must be recorded.
        let subject = reply_subject(&details.subject);
        if let Err(e) = bounded(
            "send_reply",
            limit,
            self.mailbox.send_reply(&details.from, &subject, &text),
        )
        .await
        {
            warn!(id = %id, to = %details.from, error = %e, "Failed to send reply");
            return MessageOutcome::SendFailed {
                error: e.to_string(),
            };
        }

        info!(id = %id, to = %details.from, "Reply sent");
        // Bookkeeping runs to completion from here, cancellation or not.
        self.ledger.record_sent(id);

        match self.finish_bookkeeping(id).await {
            Ok(()) => MessageOutcome::Replied,
            Err(outcome) => outcome,
        }
    }

    /// Mark read (unless already done), then label. The ledger entry is
    /// dropped once both succeed, or once the message turns out to be gone.
    async fn finish_bookkeeping(&mut self, id: &MessageId) -> Result<(), MessageOutcome> {
        let read = self.ledger.get(id).is_some_and(|p| p.read);
        if !read {
            let marked = bounded(
                "mark_read",
                self.config.call_timeout,
                self.mailbox.mark_read(id),
            )
            .await;
            if let Err(e) = marked {
                return Err(self.bookkeeping_failed(id, BookkeepingStage::MarkRead, e));
            }
            self.ledger.mark_read(id);
        }

        if let Err(e) = self.apply_label(id).await {
            return Err(self.bookkeeping_failed(id, BookkeepingStage::Label, e));
        }
        self.ledger.complete(id);
        Ok(())
    }

    fn bookkeeping_failed(
        &self,
        id: &MessageId,
        stage: BookkeepingStage,
        e: MailboxError,
    ) -> MessageOutcome {
        if e.is_not_found() {
            warn!(id = %id, stage = ?stage, "Message is gone, dropping its bookkeeping");
            self.ledger.complete(id);
            return MessageOutcome::Abandoned {
                stage,
                error: e.to_string(),
            };
        }
        warn!(id = %id, stage = ?stage, error = %e, "Bookkeeping step failed");
        MessageOutcome::Unmarked {
            stage,
            error: e.to_string(),
        }
    }

    async fn apply_label(&mut self, id: &MessageId) -> Result<(), MailboxError> {
        let label = self.resolve_label().await?;
        let applied = bounded(
            "apply_label",
            self.config.call_timeout,
            self.mailbox.apply_label(id, &label),
        )
        .await;
        if applied.is_err() {
            // The label may have been deleted; look it up again next time.
            self.label_id = None;
        }
        applied
    }

    async fn resolve_label(&mut self) -> Result<LabelId, MailboxError> {
        if let Some(label) = &self.label_id {
            return Ok(label.clone());
        }
        let label = bounded(
            "ensure_label",
            self.config.call_timeout,
            self.mailbox.ensure_label(&self.config.label_name),
        )
        .await?;
        debug!(name = %self.config.label_name, label_id = %label, "Resolved reply label");
        self.label_id = Some(label.clone());
        Ok(label)
    }

    /// Run cycles until cancelled. A failed listing backs off exponentially
    /// between `retry_initial` and `retry_max`; otherwise cycles are
    /// `poll_interval` apart.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch = self.config.batch_size,
            label = %self.config.label_name,
            "Inbox processor started"
        );

        let mut backoff = self.config.retry_initial;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.run_cycle(&cancel).await;

            let delay = if report.fetch_error.is_some() {
                let delay = backoff;
                backoff = (backoff * 2).min(self.config.retry_max);
                warn!(
                    cycle = report.cycle,
                    retry_in_secs = delay.as_secs(),
                    "Unread listing failed, backing off"
                );
                delay
            } else {
                backoff = self.config.retry_initial;
                self.config.poll_interval
            };

            if report.is_idle() {
                debug!(cycle = report.cycle, "No unread messages");
            } else {
                info!(
                    cycle = report.cycle,
                    listed = report.listed,
                    replied = report.replied(),
                    pending = report.pending(),
                    "Inbox cycle complete"
                );
            }
            self.monitor.publish(report);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(pending_bookkeeping = self.ledger.len(), "Inbox processor stopped");
    }
}

/// Spawn the loop on the runtime. Cancel the returned token to stop it.
pub fn spawn_inbox_processor(processor: InboxProcessor) -> (JoinHandle<()>, CancellationToken) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(processor.run(token));
    (handle, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::memory::{FailPoint, RecordedAction};
    use crate::mailbox::{MemoryMailbox, MessageDetails};
    use crate::responder::{DEFAULT_ACKNOWLEDGEMENT, StaticResponder};
    use async_trait::async_trait;
    use tokio::time::Instant;

    /// Lists every unread id twice; everything else goes to the wrapped
    /// mailbox.
    struct RepeatingListing(Arc<MemoryMailbox>);

    #[async_trait]
    impl MailboxClient for RepeatingListing {
        async fn list_unread(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
            let ids = self.0.list_unread(max).await?;
            Ok(ids.iter().chain(ids.iter()).cloned().collect())
        }

        async fn list_recent(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
            self.0.list_recent(max).await
        }

        async fn get_details(
            &self,
            id: &MessageId,
        ) -> Result<Option<MessageDetails>, MailboxError> {
            self.0.get_details(id).await
        }

        async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
            self.0.send_reply(to, subject, body).await
        }

        async fn mark_read(&self, id: &MessageId) -> Result<(), MailboxError> {
            self.0.mark_read(id).await
        }

        async fn ensure_label(&self, name: &str) -> Result<LabelId, MailboxError> {
            self.0.ensure_label(name).await
        }

        async fn apply_label(&self, id: &MessageId, label: &LabelId) -> Result<(), MailboxError> {
            self.0.apply_label(id, label).await
        }
    }

    fn processor(mailbox: &Arc<MemoryMailbox>) -> InboxProcessor {
        InboxProcessor::new(
            mailbox.clone(),
            Arc::new(StaticResponder::default()),
            ProcessorConfig::default(),
        )
    }

    #[tokio::test]
    async fn replies_marks_and_labels() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("alice@example.com", "Hello", "Hi there");
        let mut processor = processor(&mailbox);

        let report = processor.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.outcome(&id), Some(&MessageOutcome::Replied));
        let sent = mailbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "RE: Hello");
        assert_eq!(sent[0].body, DEFAULT_ACKNOWLEDGEMENT);
        assert!(!mailbox.is_unread(&id));
        assert!(mailbox.has_label(&id, "Astro-Emails"));
        assert!(processor.ledger().is_empty());
    }

    #[tokio::test]
    async fn empty_inbox_touches_nothing() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let mut processor = processor(&mailbox);

        let report = processor.run_cycle(&CancellationToken::new()).await;

        assert!(report.is_idle());
        let actions = mailbox.actions();
        assert_eq!(actions, vec![RecordedAction::ListUnread { max: 10 }]);
    }

    #[tokio::test]
    async fn absent_details_are_skipped() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_undecodable();
        let mut processor = processor(&mailbox);

        let report = processor.run_cycle(&CancellationToken::new()).await;

        assert!(matches!(
            report.outcome(&id),
            Some(MessageOutcome::Skipped { .. })
        ));
        assert!(mailbox.sent().is_empty());
        assert!(mailbox.is_unread(&id));
    }

    #[tokio::test]
    async fn send_failure_leaves_message_unread() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("bob@example.com", "Order", "Where is it?");
        mailbox.fail(FailPoint::Send, 1);
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();

        let first = processor.run_cycle(&cancel).await;
        assert!(matches!(
            first.outcome(&id),
            Some(MessageOutcome::SendFailed { .. })
        ));
        assert!(mailbox.is_unread(&id));
        assert!(!mailbox.actions().iter().any(RecordedAction::is_mark_read));

        let second = processor.run_cycle(&cancel).await;
        assert_eq!(second.outcome(&id), Some(&MessageOutcome::Replied));
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_failure_does_not_resend() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("carol@example.com", "Hi", "Body");
        mailbox.fail(FailPoint::MarkRead, 1);
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();

        let first = processor.run_cycle(&cancel).await;
        assert!(matches!(
            first.outcome(&id),
            Some(MessageOutcome::Unmarked {
                stage: BookkeepingStage::MarkRead,
                ..
            })
        ));
        assert!(processor.ledger().contains(&id));

        let second = processor.run_cycle(&cancel).await;
        assert_eq!(second.outcome(&id), Some(&MessageOutcome::AlreadyReplied));
        assert_eq!(mailbox.sent().len(), 1);
        assert!(!mailbox.is_unread(&id));
        assert!(mailbox.has_label(&id, "Astro-Emails"));
        assert!(processor.ledger().is_empty());
    }

    #[tokio::test]
    async fn label_failure_is_retried_without_listing() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("dan@example.com", "Hi", "Body");
        mailbox.fail(FailPoint::ApplyLabel, 1);
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();

        let first = processor.run_cycle(&cancel).await;
        assert!(matches!(
            first.outcome(&id),
            Some(MessageOutcome::Unmarked {
                stage: BookkeepingStage::Label,
                ..
            })
        ));
        assert!(!mailbox.is_unread(&id));

        let second = processor.run_cycle(&cancel).await;
        assert_eq!(second.outcome(&id), Some(&MessageOutcome::AlreadyReplied));
        assert_eq!(second.listed, 0);
        assert!(mailbox.has_label(&id, "Astro-Emails"));
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn label_is_resolved_once() {
        let mailbox = Arc::new(MemoryMailbox::new());
        mailbox.add_message("a@example.com", "One", "");
        mailbox.add_message("b@example.com", "Two", "");
        let mut processor = processor(&mailbox);

        processor.run_cycle(&CancellationToken::new()).await;

        let ensures = mailbox
            .actions()
            .iter()
            .filter(|a| matches!(a, RecordedAction::EnsureLabel { .. }))
            .count();
        assert_eq!(ensures, 1);
    }

    #[tokio::test]
    async fn list_failure_sets_fetch_error() {
        let mailbox = Arc::new(MemoryMailbox::new());
        mailbox.add_message("a@example.com", "One", "");
        mailbox.fail(FailPoint::List, 1);
        let mut processor = processor(&mailbox);

        let report = processor.run_cycle(&CancellationToken::new()).await;

        assert!(report.fetch_error.is_some());
        assert!(report.results.is_empty());
        assert!(mailbox.sent().is_empty());
    }

    #[tokio::test]
    async fn cancelled_cycle_attempts_nothing() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("a@example.com", "One", "");
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = processor.run_cycle(&cancel).await;

        assert_eq!(report.outcome(&id), Some(&MessageOutcome::Cancelled));
        assert!(mailbox.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("a@example.com", "One", "");
        mailbox.stall(FailPoint::Send, Duration::from_secs(120));
        let mut processor = processor(&mailbox);

        let report = processor.run_cycle(&CancellationToken::new()).await;

        let Some(MessageOutcome::SendFailed { error }) = report.outcome(&id) else {
            panic!("expected send failure, got {:?}", report.outcome(&id));
        };
        assert!(error.contains("send_reply"));
        assert!(mailbox.is_unread(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_stops_on_cancel() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let monitor = LoopMonitor::new();
        let processor = processor(&mailbox).with_monitor(monitor.clone());

        let (handle, cancel) = spawn_inbox_processor(processor);
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap();

        // cycles at t=0, 5 and 10
        assert_eq!(monitor.snapshot().cycles, 3);
    }

    #[tokio::test]
    async fn duplicate_ids_in_listing_are_answered_once() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("erin@example.com", "Twice", "Body");
        let mut processor = InboxProcessor::new(
            Arc::new(RepeatingListing(mailbox.clone())),
            Arc::new(StaticResponder::default()),
            ProcessorConfig::default(),
        );

        let report = processor.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.listed, 2);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.outcome(&id), Some(&MessageOutcome::Replied));
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn bookkeeping_finishes_after_message_read_elsewhere() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("frank@example.com", "Hi", "Body");
        mailbox.fail(FailPoint::MarkRead, 1);
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();

        processor.run_cycle(&cancel).await;
        assert!(processor.ledger().contains(&id));

        // The owner opens the message, so it never shows up as unread again.
        mailbox.mark_read(&id).await.unwrap();

        let second = processor.run_cycle(&cancel).await;
        assert_eq!(second.listed, 0);
        assert_eq!(second.outcome(&id), Some(&MessageOutcome::AlreadyReplied));
        assert!(mailbox.has_label(&id, "Astro-Emails"));
        assert!(processor.ledger().is_empty());
        assert_eq!(mailbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn deleted_message_drops_its_ledger_entry() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("gina@example.com", "Hi", "Body");
        mailbox.fail(FailPoint::MarkRead, 1);
        let mut processor = processor(&mailbox);
        let cancel = CancellationToken::new();

        processor.run_cycle(&cancel).await;
        mailbox.remove(&id);

        let second = processor.run_cycle(&cancel).await;
        assert!(matches!(
            second.outcome(&id),
            Some(MessageOutcome::Abandoned {
                stage: BookkeepingStage::MarkRead,
                ..
            })
        ));
        assert!(processor.ledger().is_empty());

        let third = processor.run_cycle(&cancel).await;
        assert!(third.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_stalled_listing() {
        let mailbox = Arc::new(MemoryMailbox::new());
        mailbox.stall(FailPoint::List, Duration::from_secs(600));
        let (handle, cancel) = spawn_inbox_processor(processor(&mailbox));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        handle.await.unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_details_sends_nothing() {
        let mailbox = Arc::new(MemoryMailbox::new());
        let id = mailbox.add_message("hal@example.com", "Hi", "Body");
        mailbox.stall(FailPoint::Details, Duration::from_secs(20));
        let monitor = LoopMonitor::new();
        let processor = processor(&mailbox).with_monitor(monitor.clone());
        let (handle, cancel) = spawn_inbox_processor(processor);

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(mailbox.sent().is_empty());
        assert!(mailbox.is_unread(&id));
        let report = monitor.snapshot().last_report.unwrap();
        assert_eq!(report.outcome(&id), Some(&MessageOutcome::Cancelled));
    }
}
