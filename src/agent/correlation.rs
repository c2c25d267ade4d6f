//! Search correlation
//!
//! Links a search the agent issued to the page data that eventually answers
//! it. A list view has one slot; seeding it supersedes whatever was pending.
//! The slot resolves only when the view is idle and its data finished loading
//! at or after the moment the search was committed, so rows that were already
//! on screen before the search can never answer it.

use crate::chat::MessageStatus;
use crate::pages::ListRow;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCorrelation {
    pub query: String,
    pub triggered_at: Instant,
    /// Status message to settle when the search resolves
    pub status_id: Option<String>,
}

/// What a list view currently shows, as seen by the tracker
#[derive(Debug, Clone, Copy)]
pub struct ViewSnapshot<'a, R> {
    pub loading: bool,
    pub last_loaded_at: Option<Instant>,
    pub rows: &'a [R],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No rows: ask for a narrower query
    NotFound,
    /// One candidate: open the row at this index
    Single { index: usize },
    /// Several candidates: report `count` and ask which one
    Many { count: usize },
}

/// Decide how a result set answers a query.
///
/// Several rows are narrowed to the rows whose lower-cased display name
/// equals the lower-cased query. A single exact match is opened like a single
/// result; otherwise the exact-match count is reported, or the full count
/// when nothing matches exactly.
pub fn resolution_for<R: ListRow>(query: &str, rows: &[R]) -> Resolution {
    match rows.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Single { index: 0 },
        total => {
            let normalized = query.trim().to_lowercase();
            let exact: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.display_name().trim().to_lowercase() == normalized)
                .map(|(index, _)| index)
                .collect();
            match exact.as_slice() {
                [index] => Resolution::Single { index: *index },
                [] => Resolution::Many { count: total },
                matches => Resolution::Many {
                    count: matches.len(),
                },
            }
        }
    }
}

/// How a list view names its rows in assistant messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub one: &'static str,
    pub many: &'static str,
    /// Links the count to the query: "named", "matching"
    pub relation: &'static str,
}

/// Messages produced by a resolved search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub status_text: String,
    pub status: MessageStatus,
    pub bot_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSearch {
    pub correlation: PendingCorrelation,
    pub resolution: Resolution,
}

impl ResolvedSearch {
    pub fn report(&self, subject: &Subject) -> SearchReport {
        let query = &self.correlation.query;
        match self.resolution {
            Resolution::NotFound => SearchReport {
                status_text: format!("🔎 No {} found for: {}", subject.one, query),
                status: MessageStatus::Error,
                bot_message: format!(
                    "No {} matches \"{}\". Please provide an ID card number, household code or a more specific address.",
                    subject.one, query
                ),
            },
            Resolution::Single { .. } => SearchReport {
                status_text: format!("🔎 Searched {}: {}", subject.many, query),
                status: MessageStatus::Success,
                bot_message: format!(
                    "There is currently 1 {} {} {}. Opening the record for you.",
                    subject.one, subject.relation, query
                ),
            },
            Resolution::Many { count } => SearchReport {
                status_text: format!("🔎 Searched {}: {}", subject.many, query),
                status: MessageStatus::Success,
                bot_message: format!(
                    "There are currently {} {} {} {}. Which one do you mean? Please provide an ID card number, household code or address.",
                    count, subject.many, subject.relation, query
                ),
            },
        }
    }
}

/// Single-slot correlation holder owned by one list view
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    slot: Option<PendingCorrelation>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a search, returning the correlation it supersedes
    pub fn seed(&mut self, correlation: PendingCorrelation) -> Option<PendingCorrelation> {
        let superseded = self.slot.replace(correlation);
        if let Some(old) = &superseded {
            debug!("Search correlation for '{}' superseded", old.query);
        }
        superseded
    }

    pub fn clear(&mut self) -> Option<PendingCorrelation> {
        self.slot.take()
    }

    pub fn pending(&self) -> Option<&PendingCorrelation> {
        self.slot.as_ref()
    }

    /// Resolve the pending search against the view, if its data is fresh
    pub fn observe<R: ListRow>(&mut self, view: ViewSnapshot<'_, R>) -> Option<ResolvedSearch> {
        let pending = self.slot.as_ref()?;
        if view.loading {
            return None;
        }
        match view.last_loaded_at {
            Some(loaded_at) if loaded_at >= pending.triggered_at => {}
            _ => return None,
        }

        let correlation = self.slot.take()?;
        let resolution = resolution_for(&correlation.query, view.rows);
        info!(
            "Search '{}' resolved over {} rows: {:?}",
            correlation.query,
            view.rows.len(),
            resolution
        );
        Some(ResolvedSearch {
            correlation,
            resolution,
        })
    }
}
