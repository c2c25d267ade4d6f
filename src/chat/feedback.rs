//! Answer feedback
//!
//! Feedback is sent in two steps so a caller can keep the UI responsive while
//! the request is in flight: `prepare` validates the target and builds the
//! request, `complete` applies the outcome. Only one request may be in flight.

use super::conversation::{Conversation, Sender};
use crate::agent::{BusHandle, NoticeLevel};
use crate::protocol::{FeedbackKind, FeedbackReply, FeedbackRequest};
use crate::Result;
use tracing::{info, warn};

/// Why a feedback request was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackSkip {
    NoSuchMessage,
    EmptyAnswer,
    NotAnAnswer,
    NoQuestion,
    AlreadySending,
}

impl std::fmt::Display for FeedbackSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackSkip::NoSuchMessage => write!(f, "no such message"),
            FeedbackSkip::EmptyAnswer => write!(f, "the message is empty"),
            FeedbackSkip::NotAnAnswer => write!(f, "only assistant answers take feedback"),
            FeedbackSkip::NoQuestion => write!(f, "no question precedes this answer"),
            FeedbackSkip::AlreadySending => write!(f, "another feedback request is in flight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Skipped(FeedbackSkip),
    /// The server accepted the feedback
    Sent { rewritten: bool },
    /// The server answered with an error status
    Rejected,
    /// The server could not be reached
    Failed,
}

/// Feedback prepared for one answer, waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFeedback {
    pub index: usize,
    pub request: FeedbackRequest,
}

#[derive(Debug, Default)]
pub struct FeedbackChannel {
    sending: bool,
}

impl FeedbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Validate the target answer and build the request. The question is the
    /// nearest user message before the answer.
    pub fn prepare(
        &mut self,
        conversation: &Conversation,
        kind: FeedbackKind,
        index: usize,
        answer_override: Option<&str>,
    ) -> std::result::Result<PendingFeedback, FeedbackSkip> {
        if self.sending {
            return Err(FeedbackSkip::AlreadySending);
        }
        let message = conversation.get(index).ok_or(FeedbackSkip::NoSuchMessage)?;
        if message.sender != Sender::Bot || message.is_status() {
            return Err(FeedbackSkip::NotAnAnswer);
        }
        if message.text.trim().is_empty() {
            return Err(FeedbackSkip::EmptyAnswer);
        }
        let question = conversation
            .question_for(index)
            .ok_or(FeedbackSkip::NoQuestion)?;

        self.sending = true;
        Ok(PendingFeedback {
            index,
            request: FeedbackRequest {
                question: question.to_string(),
                answer: answer_override.unwrap_or(&message.text).to_string(),
                feedback_type: kind,
            },
        })
    }

    /// Apply the server's answer. Only a `wrong` verdict with a replacement
    /// answer touches history; everything else is a notice.
    pub fn complete(
        &mut self,
        pending: &PendingFeedback,
        result: Result<FeedbackReply>,
        conversation: &mut Conversation,
        bus: &BusHandle,
    ) -> FeedbackOutcome {
        self.sending = false;
        let kind = pending.request.feedback_type;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Feedback ({}) failed: {}", kind, e);
                bus.notify(NoticeLevel::Error, "Error while sending feedback!");
                return FeedbackOutcome::Failed;
            }
        };

        if !reply.accepted {
            info!("Feedback ({}) rejected by server", kind);
            bus.notify(NoticeLevel::Error, "Sending feedback failed.");
            return FeedbackOutcome::Rejected;
        }

        let rewritten = match (kind, reply.new_answer.as_deref()) {
            (FeedbackKind::Wrong, Some(answer)) => conversation.rewrite(pending.index, answer),
            _ => false,
        };
        info!("Feedback ({}) accepted, answer rewritten: {}", kind, rewritten);

        let notice = match kind {
            FeedbackKind::Wrong if rewritten => "Recorded. The answer has been updated.",
            FeedbackKind::Wrong => "Recorded. The system will learn from this to improve later answers.",
            FeedbackKind::Correct => "Correction sent, thank you!",
            FeedbackKind::Confirm => "Feedback sent successfully!",
        };
        bus.notify(NoticeLevel::Success, notice);
        FeedbackOutcome::Sent { rewritten }
    }
}
