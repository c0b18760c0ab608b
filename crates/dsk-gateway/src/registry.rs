use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dsk_providers::SessionId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Backend linkage for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub conversation_id: String,
    pub session_id: SessionId,
    /// Backend message id of the last completed turn.
    pub last_message_id: Option<String>,
}

type Slot = Arc<Mutex<Option<ConversationState>>>;

/// Process-lifetime map from conversation id to backend session.
///
/// Each conversation has its own slot lock; a [`ConversationLease`] holds it
/// for the whole turn, so turns on one conversation run one at a time while
/// unrelated conversations proceed in parallel.
#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    populated: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, conversation_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(conversation_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Remove an empty slot that no other request holds.
    async fn discard_empty(&self, conversation_id: &str, slot: &Slot) {
        let mut slots = self.slots.write().await;
        let unused = slots
            .get(conversation_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
            && Arc::strong_count(slot) == 2
            && slot.try_lock().is_ok_and(|state| state.is_none());
        if unused {
            slots.remove(conversation_id);
        }
    }

    /// Lease the state for `conversation_id`, calling `create` once if the
    /// conversation has no backend session yet.
    ///
    /// A failed `create` stores nothing; the next request tries again.
    pub async fn resolve<F, Fut, E>(
        &self,
        conversation_id: &str,
        create: F,
    ) -> Result<ConversationLease, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionId, E>>,
    {
        let slot = self.slot(conversation_id).await;
        let mut guard = slot.clone().lock_owned().await;

        let state = match guard.as_ref() {
            Some(state) => state.clone(),
            None => {
                let session_id = match create().await {
                    Ok(session_id) => session_id,
                    Err(err) => {
                        drop(guard);
                        self.discard_empty(conversation_id, &slot).await;
                        return Err(err);
                    }
                };
                tracing::info!(
                    conversation_id,
                    session_id = %session_id,
                    "created backend session"
                );
                let state = ConversationState {
                    conversation_id: conversation_id.to_string(),
                    session_id,
                    last_message_id: None,
                };
                *guard = Some(state.clone());
                self.populated.fetch_add(1, Ordering::Relaxed);
                state
            }
        };

        Ok(ConversationLease { guard, state })
    }

    /// Current state of a conversation. Waits for an in-flight turn on the
    /// same conversation to finish.
    pub async fn snapshot(&self, conversation_id: &str) -> Option<ConversationState> {
        let slot = self.slots.read().await.get(conversation_id).cloned()?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Number of conversations with a backend session.
    pub fn len(&self) -> usize {
        self.populated.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one conversation for the duration of a turn.
///
/// Dropping the lease without calling [`advance`](Self::advance) leaves the
/// parent pointer untouched.
pub struct ConversationLease {
    guard: OwnedMutexGuard<Option<ConversationState>>,
    state: ConversationState,
}

impl ConversationLease {
    pub fn conversation_id(&self) -> &str {
        &self.state.conversation_id
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Parent for the next backend completion.
    pub fn parent_message_id(&self) -> Option<&str> {
        self.state.last_message_id.as_deref()
    }

    /// Commit the message id of a terminated turn and release the slot.
    pub fn advance(mut self, message_id: impl Into<String>) {
        let message_id = message_id.into();
        if let Some(state) = self.guard.as_mut() {
            state.last_message_id = Some(message_id);
        }
    }
}

impl std::fmt::Debug for ConversationLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLease")
            .field("state", &self.state)
            .finish()
    }
}
