//! In-memory candidate table.

use crate::error::{ServerError, ServerResult};
use intake_sync_protocol::{CandidateFields, Difficulty};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A stored candidate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Server-assigned key.
    pub id: i64,
    /// Full name.
    pub name: String,
    /// Unique email address.
    pub email: String,
    /// Length of the assessment.
    pub test_duration_hours: i64,
    /// Skill categories.
    pub categories: Vec<String>,
    /// Assessment difficulty.
    pub difficulty: Difficulty,
    /// Logical creation time.
    pub created_at: u64,
    /// Logical time of the last change.
    pub updated_at: u64,
}

/// A partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidatePatch {
    /// New name.
    pub name: Option<String>,
    /// New email.
    pub email: Option<String>,
    /// New test duration.
    pub test_duration_hours: Option<i64>,
    /// New categories.
    pub categories: Option<Vec<String>>,
    /// New difficulty.
    pub difficulty: Option<Difficulty>,
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, Candidate>,
    by_email: HashMap<String, i64>,
    next_id: i64,
    clock: u64,
}

impl Table {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Candidate table with a case-insensitive unique email index.
///
/// One lock guards rows and index together so the uniqueness check and the
/// insert are a single step.
pub struct CandidateStore {
    table: RwLock<Table>,
}

impl CandidateStore {
    /// Creates an empty table. Ids start at 1.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table {
                next_id: 1,
                ..Table::default()
            }),
        }
    }

    /// Inserts a candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateEmail`] if the email is taken.
    pub fn create(&self, fields: CandidateFields) -> ServerResult<Candidate> {
        let mut table = self.table.write();
        let key = email_key(&fields.email);
        if table.by_email.contains_key(&key) {
            return Err(ServerError::DuplicateEmail);
        }

        let id = table.next_id;
        table.next_id += 1;
        let now = table.tick();
        let candidate = Candidate {
            id,
            name: fields.name.trim().to_string(),
            email: fields.email.trim().to_string(),
            test_duration_hours: fields.test_duration_hours,
            categories: fields.categories,
            difficulty: fields.difficulty,
            created_at: now,
            updated_at: now,
        };
        table.by_email.insert(key, id);
        table.rows.insert(id, candidate.clone());
        Ok(candidate)
    }

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] for an unknown id and
    /// [`ServerError::DuplicateEmail`] if the new email belongs to another row.
    pub fn update(&self, id: i64, patch: CandidatePatch) -> ServerResult<Candidate> {
        let mut table = self.table.write();
        let old_key = match table.rows.get(&id) {
            Some(row) => email_key(&row.email),
            None => return Err(ServerError::NotFound),
        };

        let new_key = patch.email.as_deref().map(email_key);
        if let Some(new_key) = &new_key {
            if let Some(&owner) = table.by_email.get(new_key) {
                if owner != id {
                    return Err(ServerError::DuplicateEmail);
                }
            }
        }

        let now = table.tick();
        let Some(row) = table.rows.get_mut(&id) else {
            return Err(ServerError::NotFound);
        };
        if let Some(name) = patch.name {
            row.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            row.email = email.trim().to_string();
        }
        if let Some(hours) = patch.test_duration_hours {
            row.test_duration_hours = hours;
        }
        if let Some(categories) = patch.categories {
            row.categories = categories;
        }
        if let Some(difficulty) = patch.difficulty {
            row.difficulty = difficulty;
        }
        row.updated_at = now;
        let updated = row.clone();

        if let Some(new_key) = new_key {
            if new_key != old_key {
                table.by_email.remove(&old_key);
                table.by_email.insert(new_key, id);
            }
        }
        Ok(updated)
    }

    /// Deletes a candidate and returns the removed row.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] for an unknown id.
    pub fn delete(&self, id: i64) -> ServerResult<Candidate> {
        let mut table = self.table.write();
        let row = table.rows.remove(&id).ok_or(ServerError::NotFound)?;
        table.by_email.remove(&email_key(&row.email));
        Ok(row)
    }

    /// Looks up a candidate by id.
    pub fn get(&self, id: i64) -> Option<Candidate> {
        self.table.read().rows.get(&id).cloned()
    }

    /// Looks up a candidate by email, ignoring case and surrounding space.
    pub fn find_by_email(&self, email: &str) -> Option<Candidate> {
        let table = self.table.read();
        let id = table.by_email.get(&email_key(email))?;
        table.rows.get(id).cloned()
    }

    /// Lists candidates newest first.
    pub fn list(&self, skip: usize, limit: usize) -> Vec<Candidate> {
        let table = self.table.read();
        let mut rows: Vec<_> = table.rows.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.into_iter().skip(skip).take(limit).collect()
    }

    /// Number of stored candidates.
    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    /// Returns true if no candidates are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CandidateStore {
    fn default() -> Self {
        Self::new()
    }
}
