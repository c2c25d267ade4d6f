//! Routing layer: owns the current location and the list pages, and delivers
//! agent navigation to them.

use super::{household_summary, Directory, Household, ListView, Person, Route};
use crate::agent::{BusHandle, NavigationRequest, PageCommand, Subscription};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub struct Router {
    current: Route,
    directory: Directory,
    bus: BusHandle,
    commands: Subscription<PageCommand>,
    persons: ListView<Person>,
    households: ListView<Household>,
}

impl Router {
    pub fn new(
        directory: Directory,
        bus: BusHandle,
        commands: Subscription<PageCommand>,
        typing_delay: Duration,
    ) -> Self {
        Self {
            current: Route::default(),
            directory,
            persons: ListView::new(bus.clone(), typing_delay),
            households: ListView::new(bus.clone(), typing_delay),
            bus,
            commands,
        }
    }

    pub fn current(&self) -> &Route {
        &self.current
    }

    pub fn persons(&self) -> &ListView<Person> {
        &self.persons
    }

    pub fn households(&self) -> &ListView<Household> {
        &self.households
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Apply every queued page command in order. Returns whether the
    /// location changed.
    pub fn drain_navigation(&mut self) -> bool {
        let mut moved = false;
        for command in self.commands.drain() {
            match command {
                PageCommand::Navigate(request) => {
                    self.navigate(request);
                    moved = true;
                }
                PageCommand::AbandonAgentWork => {
                    debug!("Dropping agent work on the list pages");
                    self.persons.abandon_agent_work();
                    self.households.abandon_agent_work();
                }
            }
        }
        moved
    }

    /// Process navigation, then typing steps, loads and search resolution of
    /// the mounted page up to `now`. A page that is not mounted keeps its
    /// pending work until it is visited again.
    pub fn tick(&mut self, now: Instant) {
        self.drain_navigation();
        match self.current {
            Route::Persons => self.persons.tick(now, &self.directory),
            Route::Households => self.households.tick(now, &self.directory),
            _ => {}
        }
    }

    /// Earliest instant at which `tick` has scheduled work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.current {
            Route::Persons => self.persons.next_deadline(),
            Route::Households => self.households.next_deadline(),
            _ => None,
        }
    }

    fn navigate(&mut self, request: NavigationRequest) {
        info!("Navigating to {}", request.route);
        match &request.route {
            Route::Persons => {
                self.persons.visit();
                if let Some(intent) = request.intent {
                    self.persons.offer_intent(intent);
                }
            }
            Route::Households => {
                self.households.visit();
                if let Some(intent) = request.intent {
                    self.households.offer_intent(intent);
                }
            }
            Route::HouseholdDetail(key) => match self.directory.household(key) {
                Some(household) => self.bus.bot_message.publish(household_summary(household)),
                None => debug!("No household '{}' to summarize", key),
            },
            _ => {
                if request.intent.is_some() {
                    debug!("Intent for {} dropped: page reads no intents", request.route);
                }
            }
        }
        self.current = request.route;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBus, AgentIntent};
    use crate::pages::Person;
    use crate::protocol::{ActionKind, AgentAction};

    fn households() -> Directory {
        Directory::new(
            Vec::new(),
            vec![Household {
                id: 1,
                code: "HK001".to_string(),
                head_name: Some("Le Van C".to_string()),
                address: "12 Hang Bac".to_string(),
                created_on: None,
                members: vec!["Le Van C".to_string(), "Le Thi D".to_string()],
            }],
        )
    }

    #[test]
    fn test_household_detail_posts_summary() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut router = Router::new(households(), bus.clone(), inbox.pages, Duration::ZERO);
        bus.navigate(NavigationRequest {
            route: Route::HouseholdDetail("HK001".to_string()),
            intent: None,
        });

        assert!(router.drain_navigation());
        assert_eq!(router.current().path(), "/ho-khau/HK001");
        let summary = inbox.bot_message.drain().remove(0);
        assert!(summary.starts_with("Household summary HK001:"));
        assert!(summary.contains("- Member names: Le Van C, Le Thi D"));
    }

    #[test]
    fn test_search_intent_reaches_household_page() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut router = Router::new(households(), bus.clone(), inbox.pages, Duration::ZERO);
        bus.navigate(NavigationRequest {
            route: Route::Households,
            intent: Some(AgentIntent {
                action: AgentAction::new(ActionKind::Search, "household_list")
                    .with_param("q", "Hang Bac"),
                status_id: Some("status-1".to_string()),
            }),
        });

        router.tick(Instant::now());
        assert_eq!(router.current(), &Route::Households);
        assert_eq!(router.households().query(), "Hang Bac");
        assert_eq!(router.households().opened().map(|h| h.id), Some(1));
        assert_eq!(
            inbox.bot_message.drain(),
            vec!["There is currently 1 household matching Hang Bac. Opening the record for you."]
        );
    }

    fn residents() -> Directory {
        Directory::new(
            vec![Person {
                id: 4,
                full_name: "Tran Thi B".to_string(),
                id_card: Some("004".to_string()),
                household_code: None,
                address: "7 Hang Dao".to_string(),
            }],
            Vec::new(),
        )
    }

    fn person_search(q: &str) -> NavigationRequest {
        NavigationRequest {
            route: Route::Persons,
            intent: Some(AgentIntent {
                action: AgentAction::new(ActionKind::Search, "person_list").with_param("q", q),
                status_id: Some("status-1".to_string()),
            }),
        }
    }

    #[test]
    fn test_search_waits_while_page_is_not_mounted() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut router = Router::new(residents(), bus.clone(), inbox.pages, Duration::from_millis(50));
        let start = Instant::now();
        bus.navigate(person_search("Tran Thi B"));
        router.tick(start);
        assert!(router.persons().is_typing());

        bus.navigate(NavigationRequest {
            route: Route::Dashboard,
            intent: None,
        });
        router.tick(start + Duration::from_secs(2));
        assert_eq!(router.next_deadline(), None);
        assert_eq!(router.persons().query(), "");
        assert!(inbox.bot_message.drain().is_empty());

        bus.navigate(NavigationRequest {
            route: Route::Persons,
            intent: None,
        });
        router.tick(start + Duration::from_secs(3));
        assert_eq!(router.persons().query(), "Tran Thi B");
        assert_eq!(inbox.status.drain().len(), 1);
        assert_eq!(inbox.bot_message.drain().len(), 1);
    }

    #[test]
    fn test_abandon_reaches_typing_search() {
        let (bus, mut inbox) = AgentBus::channel();
        let mut router = Router::new(residents(), bus.clone(), inbox.pages, Duration::from_millis(50));
        let start = Instant::now();
        bus.navigate(person_search("Tran Thi B"));
        router.tick(start);

        bus.pages.publish(PageCommand::AbandonAgentWork);
        router.tick(start + Duration::from_secs(2));
        assert!(!router.persons().is_typing());
        assert!(router.persons().correlation().pending().is_none());
        assert!(inbox.status.drain().is_empty());
        assert!(inbox.bot_message.drain().is_empty());
    }
}
