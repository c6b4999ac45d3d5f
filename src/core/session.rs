//! One streamed assistant reply, from request to commit.
//!
//! A [`ChatSession`] is created by [`ChatApp::start_session`] after the user
//! message has been appended. Polling it issues the request, accumulates the
//! fragments and yields the full text so far on every step. The reply is
//! committed to the conversation only when the stream ends on its own; a
//! cancelled, failed or dropped session commits nothing.
//!
//! [`ChatApp::start_session`]: crate::core::app::ChatApp::start_session

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ChatRequest;
use crate::core::chat_stream::{ChatBackend, FragmentStream, TransportError};
use crate::core::conversation::SharedConversation;
use crate::core::message::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; nothing sent yet.
    Idle,
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The user input was empty or whitespace.
    EmptyInput,
    /// Another session is still streaming.
    Busy,
    Transport(TransportError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyInput => f.write_str("Message is empty"),
            SessionError::Busy => f.write_str("A reply is already being generated"),
            SessionError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

#[derive(Debug)]
struct ActiveStream {
    stream_id: u64,
    cancel_token: CancellationToken,
}

#[derive(Debug, Default)]
struct SlotInner {
    active: Option<ActiveStream>,
    next_id: u64,
}

/// Holds the cancellation token of the one session allowed to run.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims the slot for a new session, or fails with `Busy`.
    pub fn acquire(&self) -> Result<SlotLease, SessionError> {
        let mut inner = self.lock();
        if inner.active.is_some() {
            return Err(SessionError::Busy);
        }
        inner.next_id += 1;
        let cancel_token = CancellationToken::new();
        inner.active = Some(ActiveStream {
            stream_id: inner.next_id,
            cancel_token: cancel_token.clone(),
        });
        Ok(SlotLease {
            slot: self.clone(),
            stream_id: inner.next_id,
            cancel_token,
        })
    }

    /// Fires the active session's token. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match &self.lock().active {
            Some(active) => {
                debug!(stream_id = active.stream_id, "cancelling active stream");
                active.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    fn release(&self, stream_id: u64) {
        let mut inner = self.lock();
        if inner
            .active
            .as_ref()
            .is_some_and(|active| active.stream_id == stream_id)
        {
            inner.active = None;
        }
    }
}

/// Ownership of the session slot; frees it on drop.
#[derive(Debug)]
pub struct SlotLease {
    slot: SessionSlot,
    stream_id: u64,
    cancel_token: CancellationToken,
}

impl SlotLease {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.slot.release(self.stream_id);
    }
}

/// A single streamed reply. See the module docs for the lifecycle.
pub struct ChatSession {
    state: SessionState,
    backend: Arc<dyn ChatBackend>,
    conversation: SharedConversation,
    generation: u64,
    request: Option<ChatRequest>,
    fragments: Option<FragmentStream>,
    accumulator: String,
    lease: SlotLease,
}

impl ChatSession {
    /// `generation` is the conversation generation the user message was
    /// appended to; the reply is only committed into that same generation.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        conversation: SharedConversation,
        generation: u64,
        request: ChatRequest,
        lease: SlotLease,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            backend,
            conversation,
            generation,
            request: Some(request),
            fragments: None,
            accumulator: String::new(),
            lease,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_id(&self) -> u64 {
        self.lease.stream_id()
    }

    /// Seed sent with the request, once resolved.
    pub fn seed(&self) -> Option<i64> {
        self.request.as_ref().map(|request| request.options.seed)
    }

    /// Token that stops this session; the same one `ChatApp::cancel_session`
    /// fires.
    pub fn cancel_token(&self) -> CancellationToken {
        self.lease.cancel_token().clone()
    }

    /// Advances the session and returns the full reply text so far.
    ///
    /// `None` means the session reached a terminal state. A transport failure
    /// is reported once as `Some(Err(..))`.
    pub async fn next_snapshot(&mut self) -> Option<Result<String, SessionError>> {
        if self.state.is_terminal() {
            return None;
        }

        if self.fragments.is_none() {
            let Some(request) = self.request.clone() else {
                self.finish(SessionState::Failed);
                return None;
            };
            self.state = SessionState::Requesting;
            let cancel_token = self.lease.cancel_token().clone();
            let started = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => None,
                result = self.backend.chat(request) => Some(result),
            };
            match started {
                None => {
                    self.finish(SessionState::Cancelled);
                    return None;
                }
                Some(Err(err)) => {
                    self.finish(SessionState::Failed);
                    return Some(Err(err.into()));
                }
                Some(Ok(fragments)) => {
                    self.fragments = Some(fragments);
                    self.state = SessionState::Streaming;
                }
            }
        }

        let cancel_token = self.lease.cancel_token().clone();
        let next = {
            let fragments = self.fragments.as_mut()?;
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => None,
                next = fragments.next() => Some(next),
            }
        };

        match next {
            None => {
                self.finish(SessionState::Cancelled);
                None
            }
            Some(Some(Ok(fragment))) => {
                if cancel_token.is_cancelled() {
                    self.finish(SessionState::Cancelled);
                    return None;
                }
                self.accumulator.push_str(&fragment);
                Some(Ok(self.accumulator.clone()))
            }
            Some(Some(Err(err))) => {
                self.finish(SessionState::Failed);
                Some(Err(err.into()))
            }
            Some(None) => {
                self.commit().await;
                None
            }
        }
    }

    /// Consumes the session as a one-shot stream of full-text snapshots.
    /// Dropping the stream early cancels the session.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, SessionError>> + Send {
        futures_util::stream::unfold(self, |mut session| async move {
            session
                .next_snapshot()
                .await
                .map(|snapshot| (snapshot, session))
        })
    }

    async fn commit(&mut self) {
        let reply = std::mem::take(&mut self.accumulator);
        {
            let mut conversation = self.conversation.lock().await;
            if conversation.generation() == self.generation {
                conversation.append(Role::Assistant, reply);
            } else {
                info!(
                    stream_id = self.stream_id(),
                    "conversation was replaced mid-stream; reply not committed"
                );
            }
        }
        self.finish(SessionState::Completed);
    }

    /// Enters a terminal state and closes the server connection.
    fn finish(&mut self, state: SessionState) {
        debug!(stream_id = self.stream_id(), ?state, "chat session finished");
        self.state = state;
        self.fragments = None;
        if state != SessionState::Completed {
            self.accumulator.clear();
        }
        self.lease.cancel_token().cancel();
        self.lease.slot.release(self.lease.stream_id);
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("stream_id", &self.stream_id())
            .field("state", &self.state)
            .field("accumulated", &self.accumulator.len())
            .finish()
    }
}
