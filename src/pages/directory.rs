//! In-memory resident directory backing the list pages

use super::{ListRow, RowSource};
use crate::agent::Subject;
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Number of member names listed in a household summary
const SUMMARY_MEMBER_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Person {
    pub id: u64,
    pub full_name: String,
    #[serde(default)]
    pub id_card: Option<String>,
    #[serde(default)]
    pub household_code: Option<String>,
    #[serde(default)]
    pub address: String,
}

impl ListRow for Person {
    const SUBJECT: Subject = Subject {
        one: "person",
        many: "people",
        relation: "named",
    };

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn display_name(&self) -> &str {
        &self.full_name
    }

    fn alternate_ids(&self) -> Vec<String> {
        self.id_card.iter().cloned().collect()
    }

    fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        [
            Some(self.full_name.as_str()),
            self.id_card.as_deref(),
            self.household_code.as_deref(),
            Some(self.address.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Household {
    pub id: u64,
    pub code: String,
    #[serde(default)]
    pub head_name: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub created_on: Option<NaiveDate>,
    /// Member full names
    #[serde(default)]
    pub members: Vec<String>,
}

impl ListRow for Household {
    const SUBJECT: Subject = Subject {
        one: "household",
        many: "households",
        relation: "matching",
    };

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn display_name(&self) -> &str {
        self.head_name.as_deref().unwrap_or_default()
    }

    fn alternate_ids(&self) -> Vec<String> {
        vec![self.code.clone()]
    }

    fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.code.to_lowercase().contains(&query)
            || self
                .head_name
                .as_deref()
                .is_some_and(|head| head.to_lowercase().contains(&query))
            || self.address.to_lowercase().contains(&query)
    }
}

/// Bot message posted when a household detail page opens
pub fn household_summary(household: &Household) -> String {
    let mut lines = vec![
        format!("Household summary {}:", household.code),
        format!("- Head: {}", household.head_name.as_deref().unwrap_or("—")),
        format!("- Address: {}", household.address),
        format!(
            "- Created: {}",
            household
                .created_on
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "—".to_string())
        ),
        format!("- Members: {}", household.members.len()),
    ];

    if !household.members.is_empty() {
        let shown = household.members[..household.members.len().min(SUMMARY_MEMBER_LIMIT)].join(", ");
        let hidden = household.members.len().saturating_sub(SUMMARY_MEMBER_LIMIT);
        let more = if hidden > 0 {
            format!(" and {hidden} others")
        } else {
            String::new()
        };
        lines.push(format!("- Member names: {shown}{more}"));
    }

    lines.join("\n")
}

/// Resident data as stored in the fixture file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directory {
    #[serde(default)]
    persons: Vec<Person>,
    #[serde(default)]
    households: Vec<Household>,
}

impl Directory {
    pub fn new(persons: Vec<Person>, households: Vec<Household>) -> Self {
        Self {
            persons,
            households,
        }
    }

    /// Load a JSON fixture `{ "persons": [...], "households": [...] }`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let directory: Directory = serde_json::from_str(&content)?;
        info!(
            "Loaded directory from {}: {} persons, {} households",
            path.display(),
            directory.persons.len(),
            directory.households.len()
        );
        Ok(directory)
    }

    pub fn persons(&self) -> &[Person] {
        &self.persons
    }

    pub fn households(&self) -> &[Household] {
        &self.households
    }

    /// Find a household by its code or numeric id
    pub fn household(&self, key: &str) -> Option<&Household> {
        self.households.iter().find(|h| h.is_identified_by(key))
    }
}

fn filter_rows<R: ListRow>(rows: &[R], query: &str) -> Vec<R> {
    let query = query.trim();
    if query.is_empty() {
        return rows.to_vec();
    }
    rows.iter().filter(|row| row.matches(query)).cloned().collect()
}

impl RowSource<Person> for Directory {
    fn fetch(&self, query: &str) -> Result<Vec<Person>> {
        Ok(filter_rows(&self.persons, query))
    }
}

impl RowSource<Household> for Directory {
    fn fetch(&self, query: &str) -> Result<Vec<Household>> {
        Ok(filter_rows(&self.households, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn household(members: &[&str]) -> Household {
        Household {
            id: 3,
            code: "HK003".to_string(),
            head_name: Some("Pham Van D".to_string()),
            address: "7 Hang Bac".to_string(),
            created_on: NaiveDate::from_ymd_opt(2019, 5, 2),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_household_summary_lists_five_members() {
        let summary = household_summary(&household(&["A", "B", "C", "D", "E", "F", "G"]));
        assert_eq!(
            summary,
            "Household summary HK003:\n\
             - Head: Pham Van D\n\
             - Address: 7 Hang Bac\n\
             - Created: 2019-05-02\n\
             - Members: 7\n\
             - Member names: A, B, C, D, E and 2 others"
        );
    }

    #[test]
    fn test_household_summary_without_members() {
        let summary = household_summary(&household(&[]));
        assert!(summary.ends_with("- Members: 0"));
    }

    #[test]
    fn test_load_and_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "persons": [
                    {{ "id": 1, "full_name": "Nguyen Van A", "id_card": "001", "address": "5 Hang Bac" }},
                    {{ "id": 2, "full_name": "Tran Thi B", "household_code": "HK002" }}
                ],
                "households": [
                    {{ "id": 9, "code": "HK002", "head_name": "Tran Thi B", "address": "1 Ta Hien" }}
                ]
            }}"#
        )
        .unwrap();

        let directory = Directory::load(file.path()).unwrap();
        let persons: Vec<Person> = directory.fetch("hang bac").unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].full_name, "Nguyen Van A");
        let all: Vec<Person> = directory.fetch("  ").unwrap();
        assert_eq!(all.len(), 2);

        assert_eq!(directory.household("HK002").map(|h| h.id), Some(9));
        assert_eq!(directory.household("9").map(|h| h.id), Some(9));
        assert!(persons[0].is_identified_by("001"));
    }
}
