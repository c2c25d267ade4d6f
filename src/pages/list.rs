//! List page state driven by agent intents
//!
//! A search intent is typed into the search box one character at a time and
//! committed on the last character. The commit seeds the page's search
//! correlation, reloads the rows, and the correlation resolves against the
//! freshly loaded rows.

use super::{refine_query, ListRow, RowSource};
use crate::agent::{
    AgentIntent, BusHandle, CorrelationTracker, NoticeLevel, PendingCorrelation, Resolution,
    ScheduledTasks, StatusUpdate, ViewSnapshot,
};
use crate::protocol::ActionKind;
use crate::Result;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One step of the agent's typing simulation
#[derive(Debug, Clone, PartialEq)]
pub enum TypingStep {
    /// Show this partial query in the search box
    Type(String),
    /// Commit the full query and start the search
    Commit {
        query: String,
        status_id: Option<String>,
    },
}

#[derive(Debug)]
pub struct ListView<R> {
    bus: BusHandle,
    typing_delay: Duration,

    rows: Vec<R>,
    loading: bool,
    last_loaded_at: Option<Instant>,
    needs_load: bool,

    search_input: String,
    query: String,
    page: usize,

    intent: Option<AgentIntent>,
    typing: ScheduledTasks<TypingStep>,
    correlation: CorrelationTracker,
    pending_detail: Option<String>,
    opened: Option<R>,
}

impl<R: ListRow> ListView<R> {
    pub fn new(bus: BusHandle, typing_delay: Duration) -> Self {
        Self {
            bus,
            typing_delay,
            rows: Vec::new(),
            loading: false,
            last_loaded_at: None,
            needs_load: true,
            search_input: String::new(),
            query: String::new(),
            page: 0,
            intent: None,
            typing: ScheduledTasks::new(),
            correlation: CorrelationTracker::new(),
            pending_detail: None,
            opened: None,
        }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_loaded_at(&self) -> Option<Instant> {
        self.last_loaded_at
    }

    /// Text currently visible in the search box
    pub fn search_input(&self) -> &str {
        &self.search_input
    }

    /// Query the rows were last filtered with
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn is_typing(&self) -> bool {
        !self.typing.is_empty()
    }

    pub fn correlation(&self) -> &CorrelationTracker {
        &self.correlation
    }

    pub fn pending_detail(&self) -> Option<&str> {
        self.pending_detail.as_deref()
    }

    /// Row whose detail view is open
    pub fn opened(&self) -> Option<&R> {
        self.opened.as_ref()
    }

    /// The page was navigated to: its rows are fetched again on the next tick
    pub fn visit(&mut self) {
        self.needs_load = true;
    }

    /// Drop agent work in flight: the unread intent, the typing simulation,
    /// the search correlation and the pending detail request. What the page
    /// already shows is kept.
    pub fn abandon_agent_work(&mut self) {
        self.intent = None;
        self.typing.clear();
        if let Some(abandoned) = self.correlation.clear() {
            debug!("Abandoned search correlation for '{}'", abandoned.query);
        }
        self.pending_detail = None;
        self.search_input = self.query.clone();
    }

    /// Hand the page an intent. It is read once on the next tick; an intent
    /// that was never read is replaced.
    pub fn offer_intent(&mut self, intent: AgentIntent) {
        if let Some(unread) = self.intent.replace(intent) {
            debug!("Unread intent for {} replaced: {:?}", R::SUBJECT.many, unread.action);
        }
    }

    /// Advance the page to `now`: read the intent, run due typing steps,
    /// load rows if needed and resolve pending agent work.
    pub fn tick(&mut self, now: Instant, source: &impl RowSource<R>) {
        if let Some(intent) = self.intent.take() {
            self.accept_intent(intent, now);
        }

        for step in self.typing.take_due(now) {
            match step {
                TypingStep::Type(partial) => self.search_input = partial,
                TypingStep::Commit { query, status_id } => self.commit(query, status_id, now),
            }
        }

        if self.needs_load {
            self.begin_load();
            let result = source.fetch(&self.query);
            self.finish_load(result, now);
        }

        self.reconcile();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    pub fn begin_load(&mut self) {
        self.loading = true;
        self.needs_load = false;
    }

    /// Finish a load started with `begin_load`. A failed load keeps the
    /// previous rows and does not count as fresh data.
    pub fn finish_load(&mut self, result: Result<Vec<R>>, now: Instant) {
        self.loading = false;
        match result {
            Ok(rows) => {
                debug!("Loaded {} {} for '{}'", rows.len(), R::SUBJECT.many, self.query);
                self.rows = rows;
                self.last_loaded_at = Some(now);
            }
            Err(e) => {
                warn!("Failed to load {}: {}", R::SUBJECT.many, e);
                self.bus.notify(
                    NoticeLevel::Error,
                    format!("Could not load the {} list", R::SUBJECT.one),
                );
            }
        }
    }

    /// Resolve the pending search and the pending detail request against the
    /// current rows, when the rows allow it.
    pub fn reconcile(&mut self) {
        let snapshot = ViewSnapshot {
            loading: self.loading,
            last_loaded_at: self.last_loaded_at,
            rows: &self.rows,
        };
        if let Some(resolved) = self.correlation.observe(snapshot) {
            let report = resolved.report(&R::SUBJECT);
            if let Some(status_id) = resolved.correlation.status_id.clone() {
                self.bus.status.publish(StatusUpdate {
                    status_id,
                    text: report.status_text,
                    status: report.status,
                });
            }
            self.bus.bot_message.publish(report.bot_message);
            if let Resolution::Single { index } = resolved.resolution {
                self.opened = self.rows.get(index).cloned();
                self.pending_detail = None;
            }
        }

        if self.loading || self.last_loaded_at.is_none() {
            return;
        }
        let Some(wanted) = self.pending_detail.take() else {
            return;
        };
        match self.rows.iter().find(|row| row.is_identified_by(&wanted)) {
            Some(row) => {
                self.bus.notify(
                    NoticeLevel::Info,
                    format!("Agent: opening {} details: {}", R::SUBJECT.one, row.display_name()),
                );
                self.opened = Some(row.clone());
            }
            None => self.bus.notify(
                NoticeLevel::Warning,
                format!("Agent: {} {} is not in the current list", R::SUBJECT.one, wanted),
            ),
        }
    }

    fn accept_intent(&mut self, intent: AgentIntent, now: Instant) {
        let action = &intent.action;
        match action.kind {
            ActionKind::Search => match action.param("q") {
                Some(incoming) => {
                    let query = refine_query(&self.query, &incoming);
                    self.correlation.clear();
                    self.pending_detail = None;
                    info!("Agent search on {}: '{}'", R::SUBJECT.many, query);
                    self.start_typing(query, intent.status_id, now);
                }
                None => {
                    self.correlation.clear();
                }
            },
            ActionKind::Navigate => {
                if let Some(id) = action.param("personId").or_else(|| action.param("householdId")) {
                    self.pending_detail = Some(id);
                }
            }
            ActionKind::Other => debug!("Ignoring intent {:?}", action),
        }
    }

    fn start_typing(&mut self, query: String, status_id: Option<String>, now: Instant) {
        self.typing.clear();
        self.search_input.clear();

        let chars: Vec<char> = query.chars().collect();
        let mut deadline = now;
        for end in 1..chars.len() {
            self.typing
                .schedule(deadline, TypingStep::Type(chars[..end].iter().collect()));
            deadline += self.typing_delay;
        }
        self.typing
            .schedule(deadline, TypingStep::Commit { query, status_id });
    }

    fn commit(&mut self, query: String, status_id: Option<String>, now: Instant) {
        self.search_input = query.clone();
        self.query = query.clone();
        self.page = 0;
        self.needs_load = true;
        self.correlation.seed(PendingCorrelation {
            query,
            triggered_at: now,
            status_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBus, BusReceivers};
    use crate::chat::MessageStatus;
    use crate::pages::{Directory, Person};
    use crate::protocol::AgentAction;

    fn person(id: u64, name: &str, card: &str) -> Person {
        Person {
            id,
            full_name: name.to_string(),
            id_card: Some(card.to_string()),
            household_code: None,
            address: "Hoan Kiem".to_string(),
        }
    }

    fn directory() -> Directory {
        Directory::new(
            vec![
                person(1, "Nguyen Van An", "001"),
                person(2, "Nguyen Van A", "002"),
                person(3, "Nguyen Van Anh", "003"),
                person(4, "Tran Thi B", "004"),
            ],
            Vec::new(),
        )
    }

    fn view(delay_ms: u64) -> (ListView<Person>, BusReceivers) {
        let (bus, inbox) = AgentBus::channel();
        (ListView::new(bus, Duration::from_millis(delay_ms)), inbox)
    }

    fn search(q: &str, status: &str) -> AgentIntent {
        AgentIntent {
            action: AgentAction::new(ActionKind::Search, "person_list").with_param("q", q),
            status_id: Some(status.to_string()),
        }
    }

    #[test]
    fn test_typing_commits_on_last_character() {
        let (mut view, _inbox) = view(65);
        let source = directory();
        let start = Instant::now();
        view.tick(start, &source);
        assert_eq!(view.rows().len(), 4);

        view.offer_intent(search("Tran", "status-1"));
        view.tick(start, &source);
        assert_eq!(view.search_input(), "T");
        assert!(view.is_typing());
        assert!(view.correlation().pending().is_none());

        view.tick(start + Duration::from_millis(130), &source);
        assert_eq!(view.search_input(), "Tra");
        assert_eq!(view.query(), "");

        let commit_at = start + Duration::from_millis(195);
        assert_eq!(view.next_deadline(), Some(commit_at));
        view.tick(commit_at, &source);
        assert_eq!(view.query(), "Tran");
        assert!(!view.is_typing());
        assert_eq!(view.rows().len(), 1);
    }

    #[test]
    fn test_search_resolves_single_exact_match() {
        let (mut view, mut inbox) = view(0);
        let source = directory();
        let now = Instant::now();
        view.offer_intent(search("Nguyen Van A", "status-4"));
        view.tick(now, &source);

        assert_eq!(view.rows().len(), 3);
        assert_eq!(view.opened().map(|p| p.id), Some(2));
        assert!(view.correlation().pending().is_none());

        let updates = inbox.status.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status_id, "status-4");
        assert_eq!(updates[0].status, MessageStatus::Success);
        let messages = inbox.bot_message.drain();
        assert_eq!(
            messages,
            vec!["There is currently 1 person named Nguyen Van A. Opening the record for you."]
        );
    }

    #[test]
    fn test_new_intent_cancels_typing_in_flight() {
        let (mut view, mut inbox) = view(50);
        let source = directory();
        let start = Instant::now();
        view.offer_intent(search("Nguyen", "status-1"));
        view.tick(start, &source);
        view.offer_intent(search("Tran Thi B", "status-2"));
        view.tick(start + Duration::from_millis(60), &source);

        view.tick(start + Duration::from_secs(5), &source);
        assert_eq!(view.query(), "Tran Thi B");
        let updates = inbox.status.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status_id, "status-2");
    }

    #[test]
    fn test_pending_detail_opens_by_alternate_id() {
        let (mut view, mut inbox) = view(0);
        let source = directory();
        let now = Instant::now();
        view.offer_intent(AgentIntent {
            action: AgentAction::new(ActionKind::Navigate, "person_detail").with_param("personId", "004"),
            status_id: None,
        });
        view.tick(now, &source);
        assert_eq!(view.opened().map(|p| p.id), Some(4));
        assert_eq!(inbox.notice.drain()[0].level, NoticeLevel::Info);

        view.offer_intent(AgentIntent {
            action: AgentAction::new(ActionKind::Navigate, "person_detail").with_param("personId", 99),
            status_id: None,
        });
        view.tick(now, &source);
        assert_eq!(inbox.notice.drain()[0].level, NoticeLevel::Warning);
        assert!(view.pending_detail().is_none());
    }

    #[test]
    fn test_empty_search_clears_correlation() {
        let (mut view, mut inbox) = view(10);
        let source = directory();
        let start = Instant::now();
        view.offer_intent(search("Tran", "status-1"));
        view.tick(start, &source);
        view.tick(start + Duration::from_secs(1), &source);
        assert!(view.correlation().pending().is_none());
        inbox.status.drain();

        view.offer_intent(AgentIntent {
            action: AgentAction::new(ActionKind::Search, "person_list"),
            status_id: None,
        });
        view.tick(start + Duration::from_secs(2), &source);
        assert_eq!(view.query(), "Tran");
        assert!(inbox.status.drain().is_empty());
    }

    #[test]
    fn test_abandon_agent_work_during_typing() {
        let (mut view, mut inbox) = view(50);
        let source = directory();
        let start = Instant::now();
        view.offer_intent(search("Tran Thi B", "status-1"));
        view.tick(start, &source);
        assert!(view.is_typing());

        view.abandon_agent_work();
        assert!(!view.is_typing());
        assert_eq!(view.search_input(), "");

        view.tick(start + Duration::from_secs(2), &source);
        assert_eq!(view.query(), "");
        assert!(view.correlation().pending().is_none());
        assert!(inbox.status.drain().is_empty());
        assert!(inbox.bot_message.drain().is_empty());
    }
}
