//! Candidate field set and client-side shape validation.
//!
//! Mirrors the remote `candidates` table: `name` and a unique `email` are
//! required; test settings default the way the server defaults them.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::{MutationKind, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Entity type name for candidates.
pub const CANDIDATE: &str = "candidate";

/// Allowed test duration range, in hours.
const DURATION_HOURS: std::ops::RangeInclusive<i64> = 1..=24;

/// Assessment difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Junior level.
    Junior,
    /// Mid level.
    #[default]
    Mid,
    /// Senior level.
    Senior,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Junior => "junior",
            Difficulty::Mid => "mid",
            Difficulty::Senior => "senior",
        })
    }
}

impl FromStr for Difficulty {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "junior" => Ok(Difficulty::Junior),
            "mid" => Ok(Difficulty::Mid),
            "senior" => Ok(Difficulty::Senior),
            other => Err(ProtocolError::invalid(format!(
                "unknown difficulty '{}', expected junior, mid or senior",
                other
            ))),
        }
    }
}

/// Default assessment length, in hours.
pub const DEFAULT_DURATION_HOURS: i64 = 2;

fn default_duration_hours() -> i64 {
    DEFAULT_DURATION_HOURS
}

/// Typed candidate fields for building a create payload.
///
/// Deserializing fills omitted test settings with the server defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFields {
    /// Full name.
    pub name: String,
    /// Unique email address.
    pub email: String,
    /// Length of the assessment.
    #[serde(default = "default_duration_hours")]
    pub test_duration_hours: i64,
    /// Skill categories, e.g. `backend`, `ml`.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Assessment difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl CandidateFields {
    /// Creates fields with server defaults for the test settings.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            test_duration_hours: DEFAULT_DURATION_HOURS,
            categories: Vec::new(),
            difficulty: Difficulty::Mid,
        }
    }

    /// Sets the test duration.
    pub fn with_test_duration_hours(mut self, hours: i64) -> Self {
        self.test_duration_hours = hours;
        self
    }

    /// Sets the categories.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Sets the difficulty.
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Converts to a mutation payload.
    pub fn into_payload(self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

/// Checks that `email` looks like a deliverable address.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Validates a candidate payload for the given mutation kind.
///
/// Creates must carry `name` and `email`; updates are checked only for the
/// fields they supply; deletes carry no fields worth checking.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidMutation`] describing the first problem.
pub fn validate_candidate_payload(kind: MutationKind, payload: &Payload) -> ProtocolResult<()> {
    if kind == MutationKind::Delete {
        return Ok(());
    }

    let required = kind == MutationKind::Create;

    match payload.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(_) => return Err(ProtocolError::invalid("name must be a non-empty string")),
        None if required => return Err(ProtocolError::invalid("name is required")),
        None => {}
    }

    match payload.get("email") {
        Some(Value::String(email)) if is_plausible_email(email) => {}
        Some(_) => return Err(ProtocolError::invalid("email is not a valid address")),
        None if required => return Err(ProtocolError::invalid("email is required")),
        None => {}
    }

    if let Some(hours) = payload.get("test_duration_hours") {
        match hours.as_i64() {
            Some(h) if DURATION_HOURS.contains(&h) => {}
            _ => {
                return Err(ProtocolError::invalid(format!(
                    "test_duration_hours must be between {} and {}",
                    DURATION_HOURS.start(),
                    DURATION_HOURS.end()
                )))
            }
        }
    }

    if let Some(categories) = payload.get("categories") {
        let all_strings = categories
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !all_strings {
            return Err(ProtocolError::invalid("categories must be a list of strings"));
        }
    }

    if let Some(difficulty) = payload.get("difficulty") {
        let parsed = difficulty
            .as_str()
            .ok_or_else(|| ProtocolError::invalid("difficulty must be a string"))?;
        parsed.parse::<Difficulty>()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn typed_fields_build_a_valid_create() {
        let p = CandidateFields::new("Ada Lovelace", "ada@x.com")
            .with_categories(vec!["backend".into(), "ml".into()])
            .with_difficulty(Difficulty::Senior)
            .into_payload();
        assert_eq!(p["difficulty"], json!("senior"));
        assert_eq!(p["test_duration_hours"], json!(2));
        validate_candidate_payload(MutationKind::Create, &p).unwrap();
    }

    #[test]
    fn create_requires_name_and_email() {
        let missing_email = payload(json!({"name": "Ada"}));
        assert!(validate_candidate_payload(MutationKind::Create, &missing_email).is_err());

        let blank_name = payload(json!({"name": "  ", "email": "a@x.com"}));
        assert!(validate_candidate_payload(MutationKind::Create, &blank_name).is_err());
    }

    #[test]
    fn update_checks_only_supplied_fields() {
        let p = payload(json!({"difficulty": "junior"}));
        validate_candidate_payload(MutationKind::Update, &p).unwrap();

        let bad = payload(json!({"difficulty": "guru"}));
        assert!(validate_candidate_payload(MutationKind::Update, &bad).is_err());

        let bad_hours = payload(json!({"test_duration_hours": 0}));
        assert!(validate_candidate_payload(MutationKind::Update, &bad_hours).is_err());
    }

    #[test]
    fn delete_is_always_valid() {
        validate_candidate_payload(MutationKind::Delete, &payload(json!({"junk": 1}))).unwrap();
    }

    #[test]
    fn omitted_settings_take_defaults() {
        let fields: CandidateFields =
            serde_json::from_value(json!({"name": "Ada", "email": "a@x.com"})).unwrap();
        assert_eq!(fields, CandidateFields::new("Ada", "a@x.com"));
    }

    #[test]
    fn email_plausibility() {
        assert!(is_plausible_email("a@x.com"));
        assert!(is_plausible_email(" a@x.com "));
        assert!(!is_plausible_email("a@x"));
        assert!(!is_plausible_email("@x.com"));
        assert!(!is_plausible_email("a b@x.com"));
        assert!(!is_plausible_email("a@@x.com"));
        assert!(!is_plausible_email("a@x.com."));
    }
}
