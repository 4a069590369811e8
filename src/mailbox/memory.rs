//! In-memory mailbox with failure injection.
//!
//! Simulates provider state (read flags, labels, sent mail) without network
//! access and records every call so tests can assert on ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{LabelId, MailboxClient, MessageDetails, MessageId};
use crate::error::MailboxError;

/// A message held by the mailbox.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub unread: bool,
    /// Label ids attached to the message.
    pub labels: BTreeSet<LabelId>,
    /// When false, detail fetches report the message as undecodable.
    pub decodable: bool,
}

/// A reply handed to `send_reply`.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Recorded call, in the order the client received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    ListUnread { max: usize },
    ListRecent { max: usize },
    GetDetails { id: MessageId },
    Send { to: String, subject: String },
    MarkRead { id: MessageId },
    EnsureLabel { name: String },
    CreateLabel { name: String },
    ApplyLabel { id: MessageId, label: LabelId },
}

impl RecordedAction {
    pub fn is_send(&self) -> bool {
        matches!(self, RecordedAction::Send { .. })
    }

    pub fn is_mark_read(&self) -> bool {
        matches!(self, RecordedAction::MarkRead { .. })
    }
}

/// Provider operation that can be made to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    List,
    Details,
    Send,
    MarkRead,
    EnsureLabel,
    ApplyLabel,
}

/// Failure injection key: the message id, or the recipient for `Send`.
/// `None` matches any call at that point.
type FailKey = (FailPoint, Option<String>);

#[derive(Debug, Default)]
struct State {
    messages: Vec<StoredMessage>,
    labels: BTreeMap<String, LabelId>,
    next_id: u32,
    next_label: u32,
    failures: HashMap<FailKey, u32>,
    delays: HashMap<FailPoint, Duration>,
    actions: Vec<RecordedAction>,
    sent: Vec<SentMail>,
}

impl State {
    /// Consume one injected failure for this call, if any is armed.
    fn take_failure(&mut self, point: FailPoint, key: &str) -> bool {
        for k in [(point, Some(key.to_string())), (point, None)] {
            if let Some(remaining) = self.failures.get_mut(&k) {
                if *remaining != u32::MAX {
                    *remaining = remaining.saturating_sub(1);
                }
                if *remaining == 0 {
                    self.failures.remove(&k);
                }
                return true;
            }
        }
        false
    }

    fn arm(&mut self, key: FailKey, times: u32) {
        if times == 0 {
            self.failures.remove(&key);
        } else {
            self.failures.insert(key, times);
        }
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

fn injected(point: FailPoint) -> MailboxError {
    MailboxError::Api {
        status: 503,
        body: format!("injected {point:?} failure"),
    }
}

/// In-process mailbox implementing [`MailboxClient`].
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    state: Mutex<State>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an unread message, returning its assigned id.
    pub fn add_message(&self, from: &str, subject: &str, body: &str) -> MessageId {
        let mut state = self.state();
        state.next_id += 1;
        let id = MessageId(format!("msg-{}", state.next_id));
        state.messages.push(StoredMessage {
            id: id.clone(),
            from: from.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            unread: true,
            labels: BTreeSet::new(),
            decodable: true,
        });
        id
    }

    /// Add an unread message whose details cannot be decoded.
    pub fn add_undecodable(&self) -> MessageId {
        let id = self.add_message("", "", "");
        if let Some(msg) = self.state().message_mut(&id) {
            msg.decodable = false;
        }
        id
    }

    /// Delete a message (later detail fetches report it absent).
    pub fn remove(&self, id: &MessageId) {
        self.state().messages.retain(|m| &m.id != id);
    }

    /// Create a label up front, returning its id.
    pub fn create_label(&self, name: &str) -> LabelId {
        let mut state = self.state();
        state.next_label += 1;
        let label_id = format!("Label_{}", state.next_label);
        state.labels.insert(name.to_string(), label_id.clone());
        label_id
    }

    /// Fail the next `times` calls at `point` (`u32::MAX` fails forever,
    /// zero disarms).
    pub fn fail(&self, point: FailPoint, times: u32) {
        self.state().arm((point, None), times);
    }

    /// Fail the next `times` calls at `point` for one message id (or
    /// recipient address for [`FailPoint::Send`]).
    pub fn fail_on(&self, point: FailPoint, key: &str, times: u32) {
        self.state().arm((point, Some(key.to_string())), times);
    }

    /// Stall every call at `point` for `delay` before answering.
    pub fn stall(&self, point: FailPoint, delay: Duration) {
        self.state().delays.insert(point, delay);
    }

    pub fn is_unread(&self, id: &MessageId) -> bool {
        self.state()
            .messages
            .iter()
            .any(|m| &m.id == id && m.unread)
    }

    pub fn unread_count(&self) -> usize {
        self.state().messages.iter().filter(|m| m.unread).count()
    }

    /// Label id for a label name, if it exists (case-insensitive).
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.state()
            .labels
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| id.clone())
    }

    /// Whether a message carries the label with this name.
    pub fn has_label(&self, id: &MessageId, name: &str) -> bool {
        let Some(label_id) = self.label_id(name) else {
            return false;
        };
        self.state()
            .messages
            .iter()
            .any(|m| &m.id == id && m.labels.contains(&label_id))
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.state().sent.clone()
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.state().actions.clone()
    }

    /// Record the call, then report whether an injected failure fires.
    async fn enter(&self, point: FailPoint, key: &str, action: RecordedAction) -> bool {
        let delay = {
            let mut state = self.state();
            state.actions.push(action);
            state.delays.get(&point).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state().take_failure(point, key)
    }
}

#[async_trait]
impl MailboxClient for MemoryMailbox {
    async fn list_unread(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
        if self
            .enter(FailPoint::List, "", RecordedAction::ListUnread { max })
            .await
        {
            return Err(injected(FailPoint::List));
        }
        Ok(self
            .state()
            .messages
            .iter()
            .filter(|m| m.unread)
            .take(max)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn list_recent(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
        if self
            .enter(FailPoint::List, "", RecordedAction::ListRecent { max })
            .await
        {
            return Err(injected(FailPoint::List));
        }
        Ok(self
            .state()
            .messages
            .iter()
            .take(max)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_details(&self, id: &MessageId) -> Result<Option<MessageDetails>, MailboxError> {
        let action = RecordedAction::GetDetails { id: id.clone() };
        if self.enter(FailPoint::Details, id.as_str(), action).await {
            return Err(injected(FailPoint::Details));
        }
        Ok(self
            .state()
            .messages
            .iter()
            .find(|m| &m.id == id && m.decodable)
            .map(|m| MessageDetails {
                id: m.id.clone(),
                from: m.from.clone(),
                subject: m.subject.clone(),
                body: m.body.clone(),
            }))
    }

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let action = RecordedAction::Send {
            to: to.to_string(),
            subject: subject.to_string(),
        };
        if self.enter(FailPoint::Send, to, action).await {
            return Err(injected(FailPoint::Send));
        }
        self.state().sent.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), MailboxError> {
        let action = RecordedAction::MarkRead { id: id.clone() };
        if self.enter(FailPoint::MarkRead, id.as_str(), action).await {
            return Err(injected(FailPoint::MarkRead));
        }
        match self.state().message_mut(id) {
            Some(msg) => {
                msg.unread = false;
                Ok(())
            }
            None => Err(MailboxError::Api {
                status: 404,
                body: format!("no message {id}"),
            }),
        }
    }

    async fn ensure_label(&self, name: &str) -> Result<LabelId, MailboxError> {
        let action = RecordedAction::EnsureLabel {
            name: name.to_string(),
        };
        if self.enter(FailPoint::EnsureLabel, name, action).await {
            return Err(injected(FailPoint::EnsureLabel));
        }
        if let Some(existing) = self.label_id(name) {
            return Ok(existing);
        }
        self.state().actions.push(RecordedAction::CreateLabel {
            name: name.to_string(),
        });
        Ok(self.create_label(name))
    }

    async fn apply_label(&self, id: &MessageId, label: &LabelId) -> Result<(), MailboxError> {
        let action = RecordedAction::ApplyLabel {
            id: id.clone(),
            label: label.clone(),
        };
        if self.enter(FailPoint::ApplyLabel, id.as_str(), action).await {
            return Err(injected(FailPoint::ApplyLabel));
        }
        match self.state().message_mut(id) {
            Some(msg) => {
                msg.labels.insert(label.clone());
                Ok(())
            }
            None => Err(MailboxError::Api {
                status: 404,
                body: format!("no message {id}"),
            }),
        }
    }
}
