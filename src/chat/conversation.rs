//! Conversation history
//!
//! An ordered message list. Messages are only appended, except for:
//! - the streaming bot message, whose text grows in place during a turn
//! - status messages, patched in place by status updates
//! - a feedback rewrite of a single answer

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageVariant {
    #[default]
    Normal,
    /// Acknowledgement of an agent action, updated as the action progresses
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Set on status messages so updates can find them
    pub id: Option<String>,
    pub text: String,
    pub sender: Sender,
    pub timestamp: Option<DateTime<Local>>,
    pub variant: MessageVariant,
    pub status: Option<MessageStatus>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            sender: Sender::User,
            timestamp: Some(Local::now()),
            variant: MessageVariant::Normal,
            status: None,
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Bot,
            ..Self::user(text)
        }
    }

    /// Bot message without a timestamp (greeting, apology)
    pub fn bot_untimed(text: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            ..Self::bot(text)
        }
    }

    pub fn status(id: impl Into<String>, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: Some(id.into()),
            variant: MessageVariant::Status,
            status: Some(status),
            ..Self::bot(text)
        }
    }

    pub fn is_status(&self) -> bool {
        self.variant == MessageVariant::Status
    }

    fn touch(&mut self) {
        self.timestamp = Some(Local::now());
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting(greeting: Option<&str>) -> Self {
        let mut conversation = Self::new();
        if let Some(text) = greeting {
            conversation.push(Message::bot_untimed(text));
        }
        conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message and return its index
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Append a bot message unless the previous message is the same bot text.
    /// Returns whether it was appended.
    pub fn push_bot_dedup(&mut self, text: &str) -> bool {
        if self.repeats_last_bot_text(text) {
            return false;
        }
        self.push(Message::bot(text));
        true
    }

    /// Append a status message under `id` and return the id it can be
    /// updated by. A status repeating the previous bot message (same sender,
    /// same text) is not shown again: the previous message's id is returned
    /// if it has one, otherwise `id` is returned without being attached, so
    /// later updates to it change nothing.
    pub fn push_status(&mut self, id: impl Into<String>, text: &str, status: MessageStatus) -> String {
        let id = id.into();
        if self.repeats_last_bot_text(text) {
            return self
                .messages
                .last()
                .and_then(|m| m.id.clone())
                .unwrap_or(id);
        }
        self.push(Message::status(id.clone(), text, status));
        id
    }

    /// Apply a status update. A `None` text keeps the current text.
    pub fn update_status(&mut self, id: &str, text: Option<&str>, status: MessageStatus) -> bool {
        let Some(message) = self.status_mut(id) else {
            return false;
        };
        if let Some(text) = text {
            message.text = text.to_string();
        }
        message.status = Some(status);
        message.variant = MessageVariant::Status;
        message.touch();
        true
    }

    /// Mark a status as succeeded, but only if nothing else settled it first
    pub fn complete_status_if_pending(&mut self, id: &str, text: &str) -> bool {
        match self.status_mut(id) {
            Some(message) if matches!(message.status, None | Some(MessageStatus::Pending)) => {
                message.text = text.to_string();
                message.status = Some(MessageStatus::Success);
                message.touch();
                true
            }
            _ => false,
        }
    }

    /// Remove the message at `index` if it is a non-status bot message
    pub fn remove_bot_at(&mut self, index: usize) -> Option<Message> {
        match self.messages.get(index) {
            Some(m) if m.sender == Sender::Bot && !m.is_status() => Some(self.messages.remove(index)),
            _ => None,
        }
    }

    /// Rewrite a message's text in place
    pub fn rewrite(&mut self, index: usize, text: &str) -> bool {
        match self.messages.get_mut(index) {
            Some(message) => {
                message.text = text.to_string();
                message.touch();
                true
            }
            None => false,
        }
    }

    /// The nearest user message before `index`: the question an answer replies to
    pub fn question_for(&self, index: usize) -> Option<&str> {
        self.messages
            .get(..index.min(self.messages.len()))?
            .iter()
            .rev()
            .find(|m| m.sender == Sender::User)
            .map(|m| m.text.as_str())
    }

    fn repeats_last_bot_text(&self, text: &str) -> bool {
        self.messages
            .last()
            .is_some_and(|last| last.sender == Sender::Bot && last.text == text)
    }

    fn status_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(id))
    }
}
