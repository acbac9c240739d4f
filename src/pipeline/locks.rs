use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of conversations with a request in flight.
#[derive(Debug, Clone, Default)]
pub struct ConversationLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another request already holds the conversation.
    pub fn try_acquire(&self, conversation_id: &str) -> Option<ConversationGuard> {
        let inserted = lock_set(&self.active).insert(conversation_id.to_string());
        inserted.then(|| ConversationGuard {
            conversation_id: conversation_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        lock_set(&self.active).contains(conversation_id)
    }
}

/// Releases the conversation when dropped.
#[derive(Debug)]
pub struct ConversationGuard {
    conversation_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        lock_set(&self.active).remove(&self.conversation_id);
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
