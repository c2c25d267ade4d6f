//! Agent directive dispatch
//!
//! Maps each action of a batch to one typed side effect: a status message in
//! the conversation, an info notice, and a navigation request (carrying an
//! intent for the pages that need one). Pending status messages complete on
//! their own after a per-directive delay unless a page settles them first.

use super::bus::{AgentIntent, BusHandle, NavigationRequest, NoticeLevel, StatusUpdate};
use super::schedule::{ScheduledTasks, TaskKey};
use crate::chat::{Conversation, MessageStatus};
use crate::pages::Route;
use crate::protocol::{ActionKind, AgentAction};
use crate::StatusDelays;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A recognised agent directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    HouseholdList,
    HouseholdDetail { household_id: String },
    PersonList,
    PersonDetail { person_id: String },
    Fees,
    Dashboard,
    Login,
    SearchPersons { query: String },
    SearchHouseholds { query: String },
}

impl Directive {
    /// Recognise an action. Unknown pairs and actions missing their required
    /// parameter yield `None`.
    pub fn from_action(action: &AgentAction) -> Option<Self> {
        let directive = match (action.kind, action.target.as_str()) {
            (ActionKind::Navigate, "household_list") => Self::HouseholdList,
            (ActionKind::Navigate, "household_detail") => Self::HouseholdDetail {
                household_id: action.param("householdId")?,
            },
            (ActionKind::Navigate, "person_list") => Self::PersonList,
            (ActionKind::Navigate, "person_detail") => Self::PersonDetail {
                person_id: action.param("personId")?,
            },
            (ActionKind::Navigate, "fees") => Self::Fees,
            (ActionKind::Navigate, "dashboard") => Self::Dashboard,
            (ActionKind::Navigate, "login") => Self::Login,
            (ActionKind::Search, "person_list") => Self::SearchPersons {
                query: action.param("q")?,
            },
            (ActionKind::Search, "household_list") => Self::SearchHouseholds {
                query: action.param("q")?,
            },
            _ => return None,
        };
        Some(directive)
    }

    pub fn route(&self) -> Route {
        match self {
            Self::HouseholdList | Self::SearchHouseholds { .. } => Route::Households,
            Self::HouseholdDetail { household_id } => Route::HouseholdDetail(household_id.clone()),
            Self::PersonList | Self::PersonDetail { .. } | Self::SearchPersons { .. } => Route::Persons,
            Self::Fees => Route::Fees,
            Self::Dashboard => Route::Dashboard,
            Self::Login => Route::Login,
        }
    }

    /// Whether the destination page reads the action as an intent
    pub fn carries_intent(&self) -> bool {
        matches!(
            self,
            Self::PersonDetail { .. } | Self::SearchPersons { .. } | Self::SearchHouseholds { .. }
        )
    }

    pub fn pending_text(&self) -> String {
        match self {
            Self::HouseholdList => "Opening the household management page...".to_string(),
            Self::HouseholdDetail { household_id } => {
                format!("Opening household {household_id}...")
            }
            Self::PersonList => "Opening the resident management page...".to_string(),
            Self::PersonDetail { person_id } => format!("Opening resident {person_id}..."),
            Self::Fees => "Opening the fee collection page...".to_string(),
            Self::Dashboard => "Opening the dashboard...".to_string(),
            Self::Login => "Opening the login page...".to_string(),
            Self::SearchPersons { .. } => "Searching residents, please wait...".to_string(),
            Self::SearchHouseholds { .. } => "Searching households, please wait...".to_string(),
        }
    }

    /// Text a still-pending status settles to when its delay expires
    pub fn completion_text(&self) -> String {
        match self {
            Self::HouseholdList => "✅ Household management page opened!".to_string(),
            Self::HouseholdDetail { household_id } => {
                format!("✅ Household details opened: {household_id}")
            }
            Self::PersonList => "✅ Resident management page opened!".to_string(),
            Self::PersonDetail { person_id } => format!("✅ Resident details opened: {person_id}"),
            Self::Fees => "✅ Fee collection page opened!".to_string(),
            Self::Dashboard => "✅ Dashboard opened!".to_string(),
            Self::Login => "✅ Moved to the login page!".to_string(),
            Self::SearchPersons { query } => format!("🔎 Searched residents: {query}"),
            Self::SearchHouseholds { query } => format!("🔎 Searched households: {query}"),
        }
    }

    pub fn notice_text(&self) -> String {
        match self {
            Self::SearchPersons { query } => format!("Agent: searching residents: {query}"),
            Self::SearchHouseholds { query } => format!("Agent: searching households: {query}"),
            other => format!("Agent: {}", other.pending_text().trim_end_matches("...")),
        }
    }

    pub fn auto_complete_delay(&self, delays: &StatusDelays) -> Duration {
        match self {
            Self::HouseholdDetail { .. } | Self::PersonDetail { .. } => delays.open_detail,
            Self::SearchPersons { .. } => delays.person_search,
            Self::SearchHouseholds { .. } => delays.household_search,
            _ => delays.navigate,
        }
    }
}

/// Scheduled auto-completion of a pending status message
#[derive(Debug, Clone, PartialEq)]
struct StatusCompletion {
    status_id: String,
    text: String,
}

/// Applies action batches and owns the status auto-complete timers
#[derive(Debug)]
pub struct ActionDispatcher {
    bus: BusHandle,
    delays: StatusDelays,
    completions: ScheduledTasks<StatusCompletion>,
    timers: HashMap<String, TaskKey>,
    /// Last issued status id. Never reset, so ids stay unique across
    /// conversation resets.
    last_status: u64,
}

impl ActionDispatcher {
    pub fn new(bus: BusHandle, delays: StatusDelays) -> Self {
        Self {
            bus,
            delays,
            completions: ScheduledTasks::new(),
            timers: HashMap::new(),
            last_status: 0,
        }
    }

    /// Dispatch a batch in array order. Returns how many actions were
    /// recognised.
    pub fn dispatch(
        &mut self,
        actions: &[AgentAction],
        conversation: &mut Conversation,
        now: Instant,
    ) -> usize {
        let mut dispatched = 0;
        for action in actions {
            let Some(directive) = Directive::from_action(action) else {
                debug!(
                    "Ignoring agent action {:?} -> {}",
                    action.kind, action.target
                );
                continue;
            };

            let status_id = self.next_status_id();
            let status_id =
                conversation.push_status(status_id, &directive.pending_text(), MessageStatus::Pending);
            self.schedule_completion(
                &status_id,
                directive.completion_text(),
                now + directive.auto_complete_delay(&self.delays),
            );

            self.bus.notify(NoticeLevel::Info, directive.notice_text());

            let route = directive.route();
            info!("Agent directive {:?} -> {}", directive, route.path());
            let intent = directive.carries_intent().then(|| AgentIntent {
                action: action.clone(),
                status_id: Some(status_id),
            });
            self.bus.navigate(NavigationRequest { route, intent });
            dispatched += 1;
        }
        dispatched
    }

    /// Apply a status update published by a page. Cancels the status's
    /// auto-complete timer.
    pub fn apply_status(&mut self, update: &StatusUpdate, conversation: &mut Conversation) -> bool {
        if let Some(key) = self.timers.remove(&update.status_id) {
            self.completions.cancel(key);
        }
        conversation.update_status(&update.status_id, Some(&update.text), update.status)
    }

    /// Complete every status whose delay has expired and that is still
    /// pending. Returns how many messages changed.
    pub fn complete_due(&mut self, conversation: &mut Conversation, now: Instant) -> usize {
        self.completions
            .take_due(now)
            .into_iter()
            .filter(|completion| {
                self.timers.remove(&completion.status_id);
                conversation.complete_status_if_pending(&completion.status_id, &completion.text)
            })
            .count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.completions.next_deadline()
    }

    /// Drop every pending timer. Status ids keep counting.
    pub fn clear(&mut self) {
        self.completions.clear();
        self.timers.clear();
    }

    fn next_status_id(&mut self) -> String {
        self.last_status += 1;
        format!("status-{}", self.last_status)
    }

    fn schedule_completion(&mut self, status_id: &str, text: String, deadline: Instant) {
        // A resent acknowledgement reuses its status id: restart its timer
        if let Some(key) = self.timers.remove(status_id) {
            self.completions.cancel(key);
        }
        let key = self.completions.schedule(
            deadline,
            StatusCompletion {
                status_id: status_id.to_string(),
                text,
            },
        );
        self.timers.insert(status_id.to_string(), key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBus, BusReceivers, PageCommand};
    use crate::chat::Message;
    use serde_json::json;

    fn navigations(inbox: &mut BusReceivers) -> Vec<NavigationRequest> {
        inbox
            .pages
            .drain()
            .into_iter()
            .filter_map(|command| match command {
                PageCommand::Navigate(request) => Some(request),
                PageCommand::AbandonAgentWork => None,
            })
            .collect()
    }

    fn navigate(target: &str) -> AgentAction {
        AgentAction::new(ActionKind::Navigate, target)
    }

    fn search(target: &str, q: &str) -> AgentAction {
        AgentAction::new(ActionKind::Search, target).with_param("q", q)
    }

    #[test]
    fn test_directive_catalogue() {
        assert_eq!(Directive::from_action(&navigate("fees")), Some(Directive::Fees));
        assert_eq!(Directive::from_action(&navigate("household_detail")), None);
        assert_eq!(
            Directive::from_action(&navigate("household_detail").with_param("householdId", json!(42))),
            Some(Directive::HouseholdDetail {
                household_id: "42".to_string()
            })
        );
        assert_eq!(Directive::from_action(&search("person_list", "  ")), None);
        assert_eq!(Directive::from_action(&navigate("settings")), None);
        assert_eq!(
            Directive::from_action(&AgentAction::new(ActionKind::Other, "fees")),
            None
        );

        let person = Directive::PersonDetail {
            person_id: "7".to_string(),
        };
        assert_eq!(person.route(), Route::Persons);
        assert!(person.carries_intent());
        assert!(!Directive::HouseholdDetail {
            household_id: "HK01".to_string()
        }
        .carries_intent());
    }

    #[test]
    fn test_dispatch_publishes_in_order() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let mut conversation = Conversation::new();
        let now = Instant::now();

        let batch = [
            navigate("dashboard"),
            navigate("unknown"),
            search("household_list", "Hang Bac"),
        ];
        assert_eq!(dispatcher.dispatch(&batch, &mut conversation, now), 2);

        let routes: Vec<Route> = navigations(&mut inbox).into_iter().map(|n| n.route).collect();
        assert_eq!(routes, vec![Route::Dashboard, Route::Households]);
        assert_eq!(inbox.notice.drain().len(), 2);
        assert_eq!(conversation.len(), 2);
        assert!(conversation.messages().iter().all(|m| m.is_status()));
    }

    #[test]
    fn test_search_intent_carries_status_id() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let mut conversation = Conversation::new();
        dispatcher.dispatch(&[search("person_list", "Tran B")], &mut conversation, Instant::now());

        let request = navigations(&mut inbox).remove(0);
        let intent = request.intent.unwrap();
        assert_eq!(intent.status_id, conversation.messages()[0].id);
        assert_eq!(intent.action.param("q").as_deref(), Some("Tran B"));
    }

    #[test]
    fn test_auto_complete_respects_settled_status() {
        let (bus, _inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let mut conversation = Conversation::new();
        let now = Instant::now();
        dispatcher.dispatch(
            &[navigate("fees"), search("household_list", "Le")],
            &mut conversation,
            now,
        );

        let search_id = conversation.messages()[1].id.clone().unwrap();
        dispatcher.apply_status(
            &StatusUpdate {
                status_id: search_id,
                text: "found 3".to_string(),
                status: MessageStatus::Success,
            },
            &mut conversation,
        );

        assert_eq!(dispatcher.complete_due(&mut conversation, now), 0);
        let later = now + Duration::from_secs(1);
        assert_eq!(dispatcher.complete_due(&mut conversation, later), 1);
        assert_eq!(conversation.messages()[0].text, "✅ Fee collection page opened!");
        assert_eq!(conversation.messages()[1].text, "found 3");
        assert_eq!(dispatcher.next_deadline(), None);
    }

    #[test]
    fn test_resent_acknowledgement_is_not_duplicated() {
        let (bus, _inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let mut conversation = Conversation::new();
        let now = Instant::now();
        dispatcher.dispatch(&[navigate("login")], &mut conversation, now);
        dispatcher.dispatch(&[navigate("login")], &mut conversation, now);
        assert_eq!(conversation.len(), 1);
        assert_eq!(dispatcher.complete_due(&mut conversation, now + Duration::from_secs(1)), 1);
    }

    #[test]
    fn test_status_ids_survive_clear() {
        let (bus, _inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let now = Instant::now();

        let mut first = Conversation::new();
        dispatcher.dispatch(&[navigate("fees")], &mut first, now);
        dispatcher.clear();

        let mut second = Conversation::new();
        dispatcher.dispatch(&[navigate("dashboard")], &mut second, now);
        assert_eq!(first.messages()[0].id.as_deref(), Some("status-1"));
        assert_eq!(second.messages()[0].id.as_deref(), Some("status-2"));
        assert_eq!(dispatcher.next_deadline(), Some(now + Duration::from_millis(900)));
    }

    #[test]
    fn test_acknowledgement_matching_answer_text_is_suppressed() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut dispatcher = ActionDispatcher::new(bus, StatusDelays::default());
        let mut conversation = Conversation::new();
        conversation.push(Message::bot("Opening the dashboard..."));
        let now = Instant::now();

        assert_eq!(dispatcher.dispatch(&[navigate("dashboard")], &mut conversation, now), 1);
        assert_eq!(conversation.len(), 1);
        assert!(!conversation.messages()[0].is_status());
        assert_eq!(navigations(&mut inbox).len(), 1);

        dispatcher.complete_due(&mut conversation, now + Duration::from_secs(5));
        assert_eq!(conversation.messages()[0].text, "Opening the dashboard...");
    }
}
