use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AnalysisBackend, ChatReply, ChatTurn};
use crate::classify::{classify, ClassifiedError, EndpointKind, ErrorCategory};
use crate::error::RequestFailure;

/// Starter questions offered while a session has no messages.
pub const SUGGESTED_QUESTIONS: [&str; 6] = [
    "What was the maximum altitude reached during this flight?",
    "Were there any GPS issues during the flight?",
    "What was the battery status throughout the flight?",
    "Did any critical errors occur during the flight?",
    "How many mode changes happened during the flight?",
    "What was the total flight time?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set on `Error` messages only.
    pub category: Option<ErrorCategory>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            category: None,
        }
    }

    fn error(classified: &ClassifiedError) -> Self {
        Self {
            category: Some(classified.category),
            ..Self::new(Role::Error, classified.display_text.clone())
        }
    }
}

/// What happened to a `send` or `clear` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// A precondition failed; nothing was sent and nothing changed.
    Dropped,
    Replied,
    Cleared,
    Failed(ClassifiedError),
    /// The session was reset while the request was outstanding.
    Discarded,
}

/// A request issued under a given session generation. Dropping it without
/// calling `ConversationSession::complete` frees the session for the next send.
#[derive(Debug)]
pub struct PendingTurn<'a> {
    slot: BusySlot<'a>,
    turn: ChatTurn,
}

impl PendingTurn<'_> {
    pub fn turn(&self) -> &ChatTurn {
        &self.turn
    }
}

/// Holds `awaiting_reply` for one request. Releases it on drop unless the
/// request finished or the session was reset in the meantime.
#[derive(Debug)]
struct BusySlot<'a> {
    session: &'a ConversationSession,
    generation: u64,
    armed: bool,
}

impl BusySlot<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for BusySlot<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.session.state();
        if state.generation == self.generation && state.awaiting_reply {
            warn!("Request abandoned before a reply arrived");
            state.awaiting_reply = false;
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    log_id: Option<String>,
    conversation_id: Option<String>,
    messages: Vec<Message>,
    awaiting_reply: bool,
    generation: u64,
}

/// A threaded conversation about one uploaded log.
///
/// At most one request is outstanding at a time. Every `reset` starts a new
/// generation, and a reply issued under an older one is discarded.
#[derive(Debug, Default)]
pub struct ConversationSession {
    state: Mutex<SessionState>,
}

impl ConversationSession {
    /// A session with no log bound yet; every `send` is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_to(log_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.reset(log_id);
        session
    }

    /// Bind to `log_id`, dropping the history and conversation id. Applies
    /// even when `log_id` equals the current one.
    pub fn reset(&self, log_id: impl Into<String>) {
        let log_id = log_id.into();
        let mut state = self.state();
        state.generation += 1;
        state.messages.clear();
        state.conversation_id = None;
        state.awaiting_reply = false;
        debug!(
            "Session reset to log {} (generation {})",
            log_id, state.generation
        );
        state.log_id = Some(log_id);
    }

    pub fn log_id(&self) -> Option<String> {
        self.state().log_id.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state().conversation_id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.state().awaiting_reply
    }

    /// Send the contents of `draft` as the next turn.
    ///
    /// On acceptance the trimmed text is appended as a user message and
    /// `draft` is cleared before the request goes out, so a failed send
    /// leaves the text only in the message list.
    pub async fn send<B: AnalysisBackend + ?Sized>(
        &self,
        backend: &B,
        draft: &mut String,
    ) -> SendOutcome {
        let Some(pending) = self.begin(draft) else {
            return SendOutcome::Dropped;
        };
        let result = backend.chat(pending.turn()).await;
        self.complete(pending, result)
    }

    /// First half of `send`: check preconditions, append the user message
    /// and mark the session busy.
    pub fn begin(&self, draft: &mut String) -> Option<PendingTurn<'_>> {
        let mut state = self.state();

        let Some(log_id) = state.log_id.clone() else {
            debug!("Send ignored, no log bound");
            return None;
        };
        let text = draft.trim();
        if text.is_empty() {
            return None;
        }
        if state.awaiting_reply {
            debug!("Send ignored, still waiting for a reply");
            return None;
        }

        let text = text.to_string();
        draft.clear();
        state.messages.push(Message::new(Role::User, text.clone()));
        state.awaiting_reply = true;

        Some(PendingTurn {
            slot: BusySlot {
                session: self,
                generation: state.generation,
                armed: true,
            },
            turn: ChatTurn {
                log_id,
                message: text,
                conversation_id: state.conversation_id.clone(),
            },
        })
    }

    /// Second half of `send`: record the reply or the classified failure.
    pub fn complete(
        &self,
        mut pending: PendingTurn<'_>,
        result: Result<ChatReply, RequestFailure>,
    ) -> SendOutcome {
        pending.slot.disarm();
        let mut state = self.state();

        if state.generation != pending.slot.generation {
            warn!(
                "Discarding reply for log {}, session has moved on",
                pending.turn.log_id
            );
            return SendOutcome::Discarded;
        }

        let outcome = match result {
            Ok(reply) => {
                state
                    .messages
                    .push(Message::new(Role::Assistant, reply.response));
                if let Some(id) = reply.conversation_id.filter(|id| !id.is_empty()) {
                    if state.conversation_id.as_deref() != Some(id.as_str()) {
                        info!("Conversation {} assigned for log {}", id, pending.turn.log_id);
                    }
                    state.conversation_id = Some(id);
                }
                SendOutcome::Replied
            }
            Err(failure) => {
                let classified = classify(EndpointKind::Chat, &failure);
                warn!("Chat request failed ({}): {}", classified.category, failure);
                state.messages.push(Message::error(&classified));
                SendOutcome::Failed(classified)
            }
        };

        state.awaiting_reply = false;
        outcome
    }

    /// Drop the conversation on the backend, then start over locally with the
    /// same log. Without a conversation id there is nothing remote to clear.
    pub async fn clear<B: AnalysisBackend + ?Sized>(&self, backend: &B) -> SendOutcome {
        let (log_id, conversation_id, generation) = {
            let mut state = self.state();
            let Some(log_id) = state.log_id.clone() else {
                return SendOutcome::Dropped;
            };
            if state.awaiting_reply {
                debug!("Clear ignored, still waiting for a reply");
                return SendOutcome::Dropped;
            }
            let Some(conversation_id) = state.conversation_id.clone() else {
                drop(state);
                self.reset(log_id);
                return SendOutcome::Cleared;
            };
            state.awaiting_reply = true;
            (log_id, conversation_id, state.generation)
        };
        let mut slot = BusySlot {
            session: self,
            generation,
            armed: true,
        };

        let result = backend.clear_chat(&log_id, &conversation_id).await;
        slot.disarm();

        let mut state = self.state();
        if state.generation != generation {
            warn!("Discarding clear for log {}, session has moved on", log_id);
            return SendOutcome::Discarded;
        }
        match result {
            Ok(()) => {
                drop(state);
                info!("Cleared conversation {} for log {}", conversation_id, log_id);
                self.reset(log_id);
                SendOutcome::Cleared
            }
            Err(failure) => {
                let classified = classify(EndpointKind::Chat, &failure);
                warn!("Clear request failed ({}): {}", classified.category, failure);
                state.messages.push(Message::error(&classified));
                state.awaiting_reply = false;
                SendOutcome::Failed(classified)
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
