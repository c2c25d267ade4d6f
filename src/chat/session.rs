//! Chat session state machine
//!
//! A session is either Idle or Streaming one turn. A turn is driven in steps
//! so a front end can interleave it with other input:
//!
//! ```text
//! begin_turn -> open_turn -> apply(event)* -> finish_turn
//!                         \-> fail_turn / cancel_turn
//! ```
//!
//! `submit` runs all the steps for callers that just want the answer.

use super::conversation::{Conversation, Message};
use super::decoder::{FrameStream, StreamEvent};
use super::feedback::{FeedbackChannel, FeedbackOutcome};
use crate::agent::{ActionDispatcher, BusHandle, PageCommand, StatusUpdate, Subscription};
use crate::protocol::{AgentAction, ChatRequest, FallbackResponse, FeedbackKind};
use crate::transport::{ByteStream, ChatReply, ChatTransport};
use crate::{AssistantConfig, AssistantError, Result};
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shown when the server cannot be reached or the answer breaks off
pub const APOLOGY: &str = "Sorry, I can't reach the AI server right now. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
}

/// Decoded events of the answer being streamed
pub struct Turn {
    events: FrameStream<ByteStream>,
}

impl Turn {
    pub fn new(bytes: ByteStream) -> Self {
        Self {
            events: FrameStream::new(bytes),
        }
    }

    /// Next event, or `None` once the transport has closed
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        self.events.next().await
    }
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn").finish_non_exhaustive()
    }
}

/// Per-turn state owned by the session while Streaming
#[derive(Debug)]
struct TurnBuffer {
    /// Index of the bot message the answer streams into
    placeholder: usize,
    text: String,
    /// The end sentinel arrived: later text is ignored
    sealed: bool,
    actions: Option<Vec<AgentAction>>,
}

/// Subscriptions the session drains from the agent bus
#[derive(Debug)]
pub struct SessionInbox {
    pub status: Subscription<StatusUpdate>,
    pub bot_message: Subscription<String>,
}

pub struct ChatSession<T> {
    transport: T,
    conversation: Conversation,
    greeting: Option<String>,
    state: TurnState,
    turn: Option<TurnBuffer>,
    session_id: Option<String>,
    dispatcher: ActionDispatcher,
    bus: BusHandle,
    inbox: SessionInbox,
    /// Bot messages from the bus held back while a turn streams
    deferred: Vec<String>,
    feedback: FeedbackChannel,
}

impl<T: ChatTransport> ChatSession<T> {
    pub fn new(transport: T, config: &AssistantConfig, bus: BusHandle, inbox: SessionInbox) -> Self {
        Self {
            transport,
            conversation: Conversation::with_greeting(config.greeting.as_deref()),
            greeting: config.greeting.clone(),
            state: TurnState::Idle,
            turn: None,
            session_id: None,
            dispatcher: ActionDispatcher::new(bus.clone(), config.status_delays.clone()),
            bus,
            inbox,
            deferred: Vec::new(),
            feedback: FeedbackChannel::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Forget the server session; the next request starts a new one
    pub fn clear_session(&mut self) {
        self.session_id = None;
    }

    pub fn is_sending_feedback(&self) -> bool {
        self.feedback.is_sending()
    }

    // ── Turn steps ──

    /// Start a turn: append the user message and an empty bot placeholder.
    /// Returns `None` (and changes nothing) while another turn is streaming
    /// or when the text is blank.
    pub fn begin_turn(&mut self, text: &str) -> Option<ChatRequest> {
        if self.state == TurnState::Streaming {
            debug!("Turn already streaming, input ignored");
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.conversation.push(Message::user(text));
        let placeholder = self.conversation.push(Message::bot(""));
        self.turn = Some(TurnBuffer {
            placeholder,
            text: String::new(),
            sealed: false,
            actions: None,
        });
        self.state = TurnState::Streaming;
        Some(ChatRequest::new(text, self.session_id.clone()))
    }

    /// Send the request. A streamed reply is returned as a `Turn` to drain;
    /// a complete reply or a failure finishes the turn right away.
    pub async fn open_turn(&mut self, request: &ChatRequest, now: Instant) -> Option<Turn> {
        match self.transport.send_chat(request).await {
            Ok(ChatReply::Stream(bytes)) => Some(Turn::new(bytes)),
            Ok(ChatReply::Complete(response)) => {
                self.apply_fallback(response, now);
                None
            }
            Err(e) => {
                self.fail_turn(&e);
                None
            }
        }
    }

    /// Apply one decoded event to the streaming turn
    pub fn apply(&mut self, event: StreamEvent) {
        let Some(turn) = self.turn.as_mut() else {
            debug!("Event without a streaming turn dropped: {:?}", event);
            return;
        };

        match event {
            StreamEvent::TextDelta(delta) => {
                if turn.sealed {
                    debug!("Text after end sentinel ignored ({} bytes)", delta.len());
                    return;
                }
                turn.text.push_str(&delta);
                self.conversation.rewrite(turn.placeholder, &turn.text);
            }
            StreamEvent::EndOfTurn => turn.sealed = true,
            StreamEvent::SessionAssigned(id) => self.assign_session(id),
            StreamEvent::ActionBatch {
                actions,
                session_id,
            } => {
                if turn.actions.is_some() {
                    debug!("Action batch replaced by a later one");
                }
                turn.actions = Some(actions);
                if let Some(id) = session_id {
                    self.assign_session(id);
                }
            }
        }
    }

    /// The transport closed: settle the answer and dispatch its actions
    pub fn finish_turn(&mut self, now: Instant) {
        let Some(turn) = self.end_turn() else {
            return;
        };
        if turn.text.is_empty() {
            self.conversation.remove_bot_at(turn.placeholder);
        }
        info!("Turn finished: {} chars", turn.text.chars().count());

        if let Some(actions) = turn.actions {
            self.dispatcher.dispatch(&actions, &mut self.conversation, now);
        }
        self.drain_bus();
    }

    /// The request or the stream failed: replace the answer with an apology
    pub fn fail_turn(&mut self, error: &AssistantError) {
        warn!("Chat turn failed: {}", error);
        if let Some(turn) = self.end_turn() {
            self.conversation.remove_bot_at(turn.placeholder);
        }
        self.conversation.push(Message::bot_untimed(APOLOGY));
        self.drain_bus();
    }

    /// Stop streaming. Partial text is kept and buffered actions are dropped.
    pub fn cancel_turn(&mut self, turn: Turn) {
        drop(turn);
        let Some(buffer) = self.end_turn() else {
            return;
        };
        info!("Turn cancelled after {} chars", buffer.text.chars().count());
        if buffer.text.is_empty() {
            self.conversation.remove_bot_at(buffer.placeholder);
        }
        self.drain_bus();
    }

    /// Run a whole turn. Returns whether the input was accepted.
    pub async fn submit(&mut self, text: &str) -> bool {
        let Some(request) = self.begin_turn(text) else {
            return false;
        };
        let Some(mut turn) = self.open_turn(&request, Instant::now()).await else {
            return true;
        };

        while let Some(event) = turn.next_event().await {
            match event {
                Ok(event) => self.apply(event),
                Err(e) => {
                    self.fail_turn(&e);
                    return true;
                }
            }
        }
        self.finish_turn(Instant::now());
        true
    }

    // ── Bus and timers ──

    /// Apply status updates and append bot messages published on the bus.
    /// Bot messages wait while a turn streams so the answer stays last.
    pub fn drain_bus(&mut self) {
        for update in self.inbox.status.drain() {
            if !self.dispatcher.apply_status(&update, &mut self.conversation) {
                debug!("Status update for unknown id {}", update.status_id);
            }
        }

        self.deferred.extend(self.inbox.bot_message.drain());
        if self.state == TurnState::Streaming {
            return;
        }
        for text in std::mem::take(&mut self.deferred) {
            self.conversation.push_bot_dedup(&text);
        }
    }

    /// Complete expired status messages and drain the bus
    pub fn tick(&mut self, now: Instant) {
        self.dispatcher.complete_due(&mut self.conversation, now);
        self.drain_bus();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.dispatcher.next_deadline()
    }

    /// Start over: greeting only, no pending work. An open `Turn` becomes
    /// inert and should be dropped. The pages are told to drop agent work
    /// in flight, and status ids keep counting so a late update cannot match
    /// a status of the new conversation.
    pub fn reset(&mut self) {
        info!("Conversation reset");
        self.bus.pages.publish(PageCommand::AbandonAgentWork);
        self.turn = None;
        self.state = TurnState::Idle;
        self.conversation = Conversation::with_greeting(self.greeting.as_deref());
        self.dispatcher.clear();
        self.deferred.clear();
        self.inbox.status.drain();
        self.inbox.bot_message.drain();
        self.session_id = None;
    }

    // ── Feedback ──

    /// Send feedback on the answer at `index`
    pub async fn send_feedback(
        &mut self,
        kind: FeedbackKind,
        index: usize,
        answer_override: Option<&str>,
    ) -> FeedbackOutcome {
        let pending = match self
            .feedback
            .prepare(&self.conversation, kind, index, answer_override)
        {
            Ok(pending) => pending,
            Err(skip) => {
                debug!("Feedback skipped: {}", skip);
                return FeedbackOutcome::Skipped(skip);
            }
        };
        let result = self.transport.send_feedback(&pending.request).await;
        self.feedback
            .complete(&pending, result, &mut self.conversation, &self.bus)
    }

    // ── Internals ──

    fn end_turn(&mut self) -> Option<TurnBuffer> {
        self.state = TurnState::Idle;
        self.turn.take()
    }

    fn apply_fallback(&mut self, response: FallbackResponse, now: Instant) {
        info!("Turn answered without streaming");
        if let Some(id) = response.session_id {
            self.assign_session(id);
        }
        let Some(turn) = self.end_turn() else {
            return;
        };
        match response.response.filter(|r| !r.is_empty()) {
            Some(text) => {
                self.conversation.rewrite(turn.placeholder, &text);
            }
            None => {
                self.conversation.remove_bot_at(turn.placeholder);
            }
        }
        if !response.actions.is_empty() {
            self.dispatcher
                .dispatch(&response.actions, &mut self.conversation, now);
        }
        self.drain_bus();
    }

    /// The first id the server assigns is kept for the whole conversation
    fn assign_session(&mut self, id: String) {
        match &self.session_id {
            None => {
                info!("Session assigned: {}", id);
                self.session_id = Some(id);
            }
            Some(current) if *current != id => {
                debug!("Ignoring session id {} (keeping {})", id, current);
            }
            Some(_) => {}
        }
    }
}
