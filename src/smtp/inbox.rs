//! Process-wide store of captured messages

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::smtp::message::Message;

/// Append-only, arrival-ordered message store.
///
/// Cloning an `Inbox` yields another handle to the same storage, so one inbox
/// can be shared by the assembler of every session and by query callers. A
/// new inbox starts empty and lives as long as its last handle.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return the number of stored messages.
    ///
    /// Each append happens under the lock, so concurrent sessions produce a
    /// total order of arrival.
    pub fn add(&self, message: Message) -> usize {
        let mut messages = self.lock();
        messages.push(message);
        messages.len()
    }

    /// The most recently added message, or `None` while the inbox is empty
    pub fn newest(&self) -> Option<Message> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every message in arrival order
    pub fn messages(&self) -> Vec<Message> {
        self.lock().clone()
    }

    // A panic while holding the lock cannot leave a half-pushed message
    // behind, so the guard is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
