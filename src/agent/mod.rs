//! Agent side of the assistant: directives, the bus that carries them to the
//! pages, search correlation and scheduled work.

pub mod bus;
pub mod correlation;
pub mod dispatcher;
pub mod schedule;

pub use bus::{
    AgentBus, AgentIntent, BusHandle, BusReceivers, NavigationRequest, Notice, NoticeLevel,
    PageCommand, Publisher, StatusUpdate, Subscription,
};
pub use correlation::{
    resolution_for, CorrelationTracker, PendingCorrelation, Resolution, ResolvedSearch,
    SearchReport, Subject, ViewSnapshot,
};
pub use dispatcher::{ActionDispatcher, Directive};
pub use schedule::{ScheduledTasks, TaskKey};
