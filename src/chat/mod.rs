//! Conversation widget logic: decoding the streamed answer, the message
//! history, the turn state machine and answer feedback.

pub mod conversation;
pub mod decoder;
pub mod feedback;
pub mod session;

pub use conversation::{Conversation, Message, MessageStatus, MessageVariant, Sender};
pub use decoder::{decode_frame, FrameDecoder, FrameStream, StreamEvent};
pub use feedback::{FeedbackChannel, FeedbackOutcome, FeedbackSkip, PendingFeedback};
pub use session::{ChatSession, SessionInbox, Turn, TurnState, APOLOGY};
