//! Chat relay
//!
//! Runs one conversational turn against the backend: append the player's
//! message, send the whole history, and append the reply once it is
//! complete. A turn that fails or is abandoned leaves the history exactly as
//! it found it.
//!
//! Streaming turns run as a small state machine on their own task:
//!
//! ```text
//! PENDING ──▶ STREAMING ──▶ COMPLETE
//!    │            │
//!    └────────────┴──▶ FAILED | CANCELLED
//! ```
//!
//! Each backend fragment is forwarded through a channel of capacity one, so
//! the client sees fragments in backend order with at most one in flight.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm::{ChatBackend, FragmentStream, Message, Role};
use crate::session::{ConversationManager, SessionHandle};
use crate::{Error, Result};

/// Where a streaming turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for the conversation lock or the backend to answer
    Pending,
    /// Forwarding fragments
    Streaming,
    /// Reply appended to history
    Complete,
    /// Backend failed; history rolled back
    Failed,
    /// Client went away; history rolled back
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Event delivered to the client during a streaming turn
#[derive(Debug)]
pub enum RelayEvent {
    /// Next piece of the reply
    Fragment(String),
    /// The turn failed; nothing follows
    Failed(Error),
}

/// A turn in progress.
///
/// Owns the conversation lock. Unless `commit` is called, dropping it
/// removes everything the turn appended.
struct PendingTurn {
    conversation: OwnedMutexGuard<ConversationManager>,
    mark: usize,
    committed: bool,
}

impl PendingTurn {
    async fn begin(conversation: SessionHandle, user_message: &str) -> Self {
        let mut conversation = conversation.lock_owned().await;
        let mark = conversation.len();
        conversation.add_message(Role::User, user_message);
        Self {
            conversation,
            mark,
            committed: false,
        }
    }

    fn history(&self) -> &[Message] {
        self.conversation.get_history()
    }

    fn commit(mut self, reply: &str) {
        self.conversation.add_message(Role::Assistant, reply);
        self.committed = true;
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if !self.committed {
            debug!(
                "Rolling back turn for NPC {} to {} messages",
                self.conversation.npc_name(),
                self.mark
            );
            self.conversation.truncate(self.mark);
        }
    }
}

/// Relays conversation turns to a chat backend
#[derive(Clone)]
pub struct ChatRelay {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl ChatRelay {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run a turn with a single blocking backend call and return the reply
    pub async fn complete(&self, conversation: &SessionHandle, user_message: &str) -> Result<String> {
        let turn = PendingTurn::begin(conversation.clone(), user_message).await;
        let npc_name = turn.conversation.npc_name().to_string();

        let result = self.backend.chat(&self.model, turn.history()).await;
        match result {
            Ok(reply) => {
                info!("Reply for NPC {}: {} chars", npc_name, reply.content.len());
                turn.commit(&reply.content);
                Ok(reply.content)
            }
            Err(e) => {
                warn!("Backend call failed for NPC {}: {}", npc_name, e);
                Err(e)
            }
        }
    }

    /// Run a turn as a stream of fragments.
    ///
    /// The turn runs on its own task. Dropping the returned stream cancels
    /// it.
    pub fn stream(&self, conversation: SessionHandle, user_message: impl Into<String>) -> RelayStream {
        let (tx, rx) = mpsc::channel(1);
        let span = info_span!("turn", id = %Uuid::new_v4());

        let task = tokio::spawn(
            run_stream(
                self.backend.clone(),
                self.model.clone(),
                conversation,
                user_message.into(),
                tx,
            )
            .instrument(span),
        );

        RelayStream { events: rx, task }
    }
}

async fn run_stream(
    backend: Arc<dyn ChatBackend>,
    model: String,
    conversation: SessionHandle,
    user_message: String,
    tx: mpsc::Sender<RelayEvent>,
) -> RelayState {
    let mut state = RelayState::Pending;

    let turn = tokio::select! {
        _ = tx.closed() => None,
        turn = PendingTurn::begin(conversation, &user_message) => Some(turn),
    };
    let Some(turn) = turn else {
        debug!("Client left before the turn started");
        return RelayState::Cancelled;
    };
    let npc_name = turn.conversation.npc_name().to_string();

    let opened = tokio::select! {
        _ = tx.closed() => None,
        result = backend.chat_stream(&model, turn.history()) => Some(result),
    };
    let mut fragments: FragmentStream = match opened {
        None => {
            info!("Client left before NPC {} started replying", npc_name);
            return RelayState::Cancelled;
        }
        Some(Err(e)) => {
            warn!("Backend call failed for NPC {}: {}", npc_name, e);
            return fail(turn, &tx, e).await;
        }
        Some(Ok(fragments)) => fragments,
    };

    debug!("{:?} -> {:?}", state, RelayState::Streaming);
    state = RelayState::Streaming;

    let mut reply = String::new();
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                info!("Client disconnected mid-reply for NPC {}", npc_name);
                return RelayState::Cancelled;
            }
            next = fragments.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                reply.push_str(&fragment);
                if tx.send(RelayEvent::Fragment(fragment)).await.is_err() {
                    info!("Client disconnected mid-reply for NPC {}", npc_name);
                    return RelayState::Cancelled;
                }
            }
            Some(Err(e)) => {
                warn!("Backend stream failed for NPC {}: {}", npc_name, e);
                return fail(turn, &tx, e).await;
            }
            None => break,
        }
    }

    info!("Reply for NPC {}: {} chars", npc_name, reply.len());
    turn.commit(&reply);

    debug!("{:?} -> {:?}", state, RelayState::Complete);
    RelayState::Complete
}

async fn fail(turn: PendingTurn, tx: &mpsc::Sender<RelayEvent>, error: Error) -> RelayState {
    // roll back before the client hears about it
    drop(turn);
    let _ = tx.send(RelayEvent::Failed(error)).await;
    RelayState::Failed
}

/// Client side of a streaming turn
pub struct RelayStream {
    events: mpsc::Receiver<RelayEvent>,
    task: JoinHandle<RelayState>,
}

impl RelayStream {
    /// Wait for the next event; `None` once the turn is over
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }

    /// Stop listening and wait for the turn to settle.
    ///
    /// Returns `Complete` only if the reply was fully received and appended.
    pub async fn finish(self) -> RelayState {
        drop(self.events);
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("Relay task ended abnormally: {}", e);
                RelayState::Failed
            }
        }
    }
}

impl Stream for RelayStream {
    type Item = RelayEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
