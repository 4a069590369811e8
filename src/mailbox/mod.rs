//! Mailbox abstraction: the provider-side collaborator of the inbox loop.
//!
//! The loop only ever talks to `dyn MailboxClient`. Production wires in
//! [`GmailClient`]; tests wire in [`MemoryMailbox`].

pub mod gmail;
pub mod memory;
pub mod oauth;
pub mod payload;

pub use gmail::{GmailClient, GmailConfig};
pub use memory::MemoryMailbox;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MailboxError;

/// Opaque provider-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transient, read-only copy of a message as seen by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDetails {
    pub id: MessageId,
    /// Raw `From` header value (may include a display name).
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Provider-side label identifier, as returned by [`MailboxClient::ensure_label`].
pub type LabelId = String;

/// Operations the inbox loop needs from a mail provider.
///
/// Every call may fail with a provider error; the caller decides whether a
/// failure skips the message or retries later.
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Up to `max` unread message ids, newest first.
    async fn list_unread(&self, max: usize) -> Result<Vec<MessageId>, MailboxError>;

    /// Up to `max` message ids regardless of read state.
    async fn list_recent(&self, max: usize) -> Result<Vec<MessageId>, MailboxError>;

    /// Full details, or `None` when the message is gone or cannot be decoded.
    async fn get_details(&self, id: &MessageId) -> Result<Option<MessageDetails>, MailboxError>;

    /// Send a plain-text message.
    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError>;

    /// Clear the unread state of a message.
    async fn mark_read(&self, id: &MessageId) -> Result<(), MailboxError>;

    /// Resolve a label by name (case-insensitive), creating it if absent.
    async fn ensure_label(&self, name: &str) -> Result<LabelId, MailboxError>;

    /// Attach a label to a message.
    async fn apply_label(&self, id: &MessageId, label: &LabelId) -> Result<(), MailboxError>;
}

/// Subject line used when replying to `original`.
pub fn reply_subject(original: &str) -> String {
    format!("RE: {original}")
}

/// Fetch details for several messages, dropping ones that are absent or fail
/// to load.
pub async fn fetch_details(client: &dyn MailboxClient, ids: &[MessageId]) -> Vec<MessageDetails> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        match client.get_details(id).await {
            Ok(Some(details)) => out.push(details),
            Ok(None) => debug!(id = %id, "Message absent or undecodable"),
            Err(e) => warn!(id = %id, error = %e, "Failed to fetch message details"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_serializes_transparently() {
        let id = MessageId::new("18c2f");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"18c2f\"");
        assert_eq!(id.to_string(), "18c2f");
    }

    #[test]
    fn reply_subject_prefix() {
        assert_eq!(reply_subject("Order #12"), "RE: Order #12");
        assert_eq!(reply_subject(""), "RE: ");
    }
}
