//! Typed publish/subscribe bus between the chat and the pages
//!
//! One topic per event kind. The routing layer creates the bus and hands the
//! publisher side to both the chat session and the pages; each topic has a
//! single subscriber that drains it without blocking.

use crate::chat::MessageStatus;
use crate::pages::Route;
use crate::protocol::AgentAction;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Update for a previously emitted status message
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status_id: String,
    pub text: String,
    pub status: MessageStatus,
}

/// One-shot payload attached to a navigation, read once by the target page
#[derive(Debug, Clone, PartialEq)]
pub struct AgentIntent {
    pub action: AgentAction,
    pub status_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    pub route: Route,
    pub intent: Option<AgentIntent>,
}

/// Work for the page side. Navigation and resets share one topic so a reset
/// is seen after every navigation published before it.
#[derive(Debug, Clone, PartialEq)]
pub enum PageCommand {
    Navigate(NavigationRequest),
    /// The conversation was reset: agent work still in flight is dropped
    AbandonAgentWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient notification, shown once and not kept in history
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// Publishing end of a topic
#[derive(Debug)]
pub struct Publisher<T> {
    tx: UnboundedSender<T>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Publisher<T> {
    /// Publish an event. Events to a dropped subscriber are discarded.
    pub fn publish(&self, event: T) {
        if self.tx.send(event).is_err() {
            debug!("Bus subscriber gone, event dropped");
        }
    }
}

/// Receiving end of a topic
#[derive(Debug)]
pub struct Subscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Take every event published so far, in publish order
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn topic<T>() -> (Publisher<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, Subscription { rx })
}

/// Publisher side of every topic
#[derive(Debug, Clone)]
pub struct BusHandle {
    pub status: Publisher<StatusUpdate>,
    pub bot_message: Publisher<String>,
    pub pages: Publisher<PageCommand>,
    pub notice: Publisher<Notice>,
}

impl BusHandle {
    pub fn navigate(&self, request: NavigationRequest) {
        self.pages.publish(PageCommand::Navigate(request));
    }

    pub fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        self.notice.publish(Notice::new(level, text));
    }
}

/// Subscriber side of every topic
#[derive(Debug)]
pub struct BusReceivers {
    pub status: Subscription<StatusUpdate>,
    pub bot_message: Subscription<String>,
    pub pages: Subscription<PageCommand>,
    pub notice: Subscription<Notice>,
}

pub struct AgentBus;

impl AgentBus {
    pub fn channel() -> (BusHandle, BusReceivers) {
        let (status, status_rx) = topic();
        let (bot_message, bot_message_rx) = topic();
        let (pages, pages_rx) = topic();
        let (notice, notice_rx) = topic();
        (
            BusHandle {
                status,
                bot_message,
                pages,
                notice,
            },
            BusReceivers {
                status: status_rx,
                bot_message: bot_message_rx,
                pages: pages_rx,
                notice: notice_rx,
            },
        )
    }
}
