//! Record of replies that were sent but whose bookkeeping (mark read, label)
//! has not completed yet. Consulted before every send so a message is never
//! answered twice within one process lifetime.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::mailbox::MessageId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingBookkeeping {
    /// Mark-read succeeded; only the label is missing.
    pub read: bool,
}

/// Cloneable handle; clones share the same entries so the ledger survives a
/// loop restart under the supervisor.
#[derive(Debug, Clone, Default)]
pub struct ReplyLedger {
    entries: Arc<Mutex<BTreeMap<MessageId, PendingBookkeeping>>>,
}

impl ReplyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<MessageId, PendingBookkeeping>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_sent(&self, id: &MessageId) {
        self.entries().insert(id.clone(), PendingBookkeeping::default());
    }

    pub fn get(&self, id: &MessageId) -> Option<PendingBookkeeping> {
        self.entries().get(id).copied()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn mark_read(&self, id: &MessageId) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.read = true;
        }
    }

    /// Bookkeeping done; the entry is dropped.
    pub fn complete(&self, id: &MessageId) {
        self.entries().remove(id);
    }

    /// Every entry with bookkeeping outstanding. Retried at the start of each
    /// cycle, since the message may have left the unread listing (read or
    /// deleted elsewhere) while its entry was still open.
    pub fn pending(&self) -> Vec<MessageId> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
