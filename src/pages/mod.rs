//! Destination pages driven by the agent
//!
//! Stand-ins for the console's list pages: enough state to receive an
//! intent, type and commit a search, load rows from a source, and report the
//! outcome back to the chat.

pub mod directory;
pub mod list;
pub mod router;

pub use directory::{household_summary, Directory, Household, Person};
pub use list::{ListView, TypingStep};
pub use router::Router;

use crate::agent::Subject;
use crate::Result;
use regex::Regex;
use std::sync::LazyLock;

/// Console location a navigation can target
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Dashboard,
    Login,
    Households,
    HouseholdDetail(String),
    Persons,
    Fees,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Dashboard => "/".to_string(),
            Route::Login => "/login".to_string(),
            Route::Households => "/ho-khau".to_string(),
            Route::HouseholdDetail(id) => format!("/ho-khau/{id}"),
            Route::Persons => "/nhan-khau".to_string(),
            Route::Fees => "/thu-phi".to_string(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// A row of a list page
pub trait ListRow: Clone {
    /// How assistant messages name rows of this kind
    const SUBJECT: Subject;

    fn id(&self) -> String;

    /// Name compared against a search query for exact matches
    fn display_name(&self) -> &str;

    /// Other identifiers a detail request may use (ID card, household code)
    fn alternate_ids(&self) -> Vec<String> {
        Vec::new()
    }

    /// Client-side filter used by in-memory sources
    fn matches(&self, query: &str) -> bool;

    /// Whether `id` names this row
    fn is_identified_by(&self, id: &str) -> bool {
        self.id() == id || self.alternate_ids().iter().any(|alt| alt == id)
    }
}

/// Where a list page loads its rows from
pub trait RowSource<R> {
    fn fetch(&self, query: &str) -> Result<Vec<R>>;
}

static ADDRESS_KEYWORDS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)biệt thự|biet thu|thự|phố|đường|duong|xã|phường|quận|huyện|tỉnh|thành phố|the vesta|ấp|thôn|ngõ|ngách|\bstreet\b|\broad\b|\bward\b|\bdistrict\b|\balley\b",
    )
    .ok()
});

pub fn looks_like_address(query: &str) -> bool {
    ADDRESS_KEYWORDS
        .as_ref()
        .is_some_and(|re| re.is_match(query))
}

/// Combine a new agent query with the query already committed on the page.
///
/// An address-like query narrows the current search (a name followed by
/// "where does she live") unless it already contains it.
pub fn refine_query(current: &str, incoming: &str) -> String {
    let current = current.trim();
    let incoming = incoming.trim();
    if current.is_empty()
        || !looks_like_address(incoming)
        || incoming.to_lowercase().contains(&current.to_lowercase())
    {
        return incoming.to_string();
    }
    format!("{current} {incoming}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_paths() {
        assert_eq!(Route::Households.path(), "/ho-khau");
        assert_eq!(Route::HouseholdDetail("HK01".into()).path(), "/ho-khau/HK01");
        assert_eq!(Route::default().to_string(), "/");
    }

    #[test]
    fn test_refine_query() {
        assert_eq!(refine_query("", "phố Hàng Bạc"), "phố Hàng Bạc");
        assert_eq!(refine_query("Nguyen Van A", "Tran Thi B"), "Tran Thi B");
        assert_eq!(
            refine_query("Nguyen Van A", "Phố Hàng Bạc"),
            "Nguyen Van A Phố Hàng Bạc"
        );
        assert_eq!(
            refine_query("nguyen van a", "Nguyen Van A, phường Cửa Đông"),
            "Nguyen Van A, phường Cửa Đông"
        );
        assert_eq!(refine_query("Le C", "12 Hang Bac Street"), "Le C 12 Hang Bac Street");
    }
}
