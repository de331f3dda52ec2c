//! Relational-store seam - accounts, courses, and learner progress tables.
//!
//! The crate never talks SQL. It sees a `RecordStore` that runs a closure
//! inside a transaction and a `RecordSession` exposing just the table
//! operations the identity flows touch. The in-memory implementation backs
//! tests and development; a SQL-backed one plugs in at the same seam.

mod memory;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::account::{Account, Destination};
use crate::progress::{GeneratedBlock, ProgressRecord};

/// Error type for record store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Storage-level failure (connectivity, constraint, poisoned state).
    Storage(String),
    /// Row not found where one was required.
    NotFound { table: &'static str, id: String },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Storage(msg) => write!(f, "record storage error: {}", msg),
            RecordError::NotFound { table, id } => write!(f, "{} row not found: {}", table, id),
        }
    }
}

impl std::error::Error for RecordError {}

/// A course row. Deleted rows are invisible to the active queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub row_id: u64,
    pub course_id: String,
    pub title: String,
    /// Account stamped as the course owner. Empty until assigned.
    pub owner_account_id: String,
    pub deleted: bool,
    pub created_at: SystemTime,
}

impl Course {
    pub fn new(course_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            row_id: 0,
            course_id: course_id.into(),
            title: title.into(),
            owner_account_id: String::new(),
            deleted: false,
            created_at: SystemTime::now(),
        }
    }
}

/// Transactional access to the record tables.
pub trait RecordStore: Send + Sync {
    /// Run `f` against a session. Every mutation commits if `f` returns `Ok`
    /// and rolls back entirely if it returns `Err`. This is the only
    /// atomicity the crate requires of its relational backend.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<RecordError>,
        F: FnOnce(&mut dyn RecordSession) -> Result<T, E>;
}

/// Table operations visible inside a transaction.
///
/// Inserts assign `row_id` monotonically; whatever the caller put there is
/// replaced. Reads observe the session's own pending mutations.
pub trait RecordSession {
    /// Account by its stable public identifier.
    fn account_by_id(&self, account_id: &str) -> Result<Option<Account>, RecordError>;

    /// All accounts bound to the destination, in storage order.
    fn accounts_by_binding(&self, destination: &Destination)
        -> Result<Vec<Account>, RecordError>;

    /// How many accounts have moved past Unverified.
    fn verified_account_count(&self) -> Result<usize, RecordError>;

    fn insert_account(&mut self, account: Account) -> Result<Account, RecordError>;

    /// Update by `account_id`. Errors if the row is gone.
    fn update_account(&mut self, account: &Account) -> Result<(), RecordError>;

    fn active_course_count(&self) -> Result<usize, RecordError>;

    /// The earliest-created non-deleted course.
    fn first_active_course(&self) -> Result<Option<Course>, RecordError>;

    fn insert_course(&mut self, course: Course) -> Result<Course, RecordError>;

    /// Update by `course_id`. Errors if the row is gone.
    fn update_course(&mut self, course: &Course) -> Result<(), RecordError>;

    /// Non-reset progress rows for an account in a course.
    fn active_progress(
        &self,
        account_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressRecord>, RecordError>;

    fn insert_progress(&mut self, record: ProgressRecord) -> Result<ProgressRecord, RecordError>;

    /// Bulk-move the listed progress rows to another account. Returns the
    /// number of rows touched.
    fn reassign_progress(&mut self, row_ids: &[u64], to_account_id: &str)
        -> Result<usize, RecordError>;

    fn generated_blocks_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<GeneratedBlock>, RecordError>;

    fn insert_generated_block(
        &mut self,
        block: GeneratedBlock,
    ) -> Result<GeneratedBlock, RecordError>;

    /// Bulk-move the generated blocks referencing the given progress record
    /// ids to another account. Returns the number of rows touched.
    fn reassign_generated_blocks(
        &mut self,
        record_bids: &[String],
        to_account_id: &str,
    ) -> Result<usize, RecordError>;
}

pub use memory::InMemoryRecordStore;
