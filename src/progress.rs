//! Study-progress records and their migration between accounts.

use std::collections::HashSet;

use tracing::info;

use crate::records::{RecordError, RecordSession};

/// Lifecycle of a progress row. `Reset` rows are history and never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    Reset,
}

/// One account's progress through one outline item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub row_id: u64,
    /// Business id, stable across reassignment.
    pub record_bid: String,
    pub account_id: String,
    pub course_id: String,
    /// The outline item this row tracks. One live row per item per account.
    pub item_id: String,
    pub status: ProgressStatus,
}

impl ProgressRecord {
    pub fn new(
        record_bid: impl Into<String>,
        account_id: impl Into<String>,
        course_id: impl Into<String>,
        item_id: impl Into<String>,
        status: ProgressStatus,
    ) -> Self {
        Self {
            row_id: 0,
            record_bid: record_bid.into(),
            account_id: account_id.into(),
            course_id: course_id.into(),
            item_id: item_id.into(),
            status,
        }
    }
}

/// Content generated while a progress row was being worked through.
/// Follows its progress row when the row changes hands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBlock {
    pub row_id: u64,
    pub block_bid: String,
    pub account_id: String,
    /// `record_bid` of the progress row this block belongs to.
    pub record_bid: String,
    pub content: String,
}

impl GeneratedBlock {
    pub fn new(
        block_bid: impl Into<String>,
        account_id: impl Into<String>,
        record_bid: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            row_id: 0,
            block_bid: block_bid.into(),
            account_id: account_id.into(),
            record_bid: record_bid.into(),
            content: content.into(),
        }
    }
}

/// What a migration actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationReport {
    /// Progress rows reassigned to the destination account.
    pub migrated: usize,
    /// Source rows left behind because the destination already covers the item.
    pub skipped: usize,
}

/// Move study progress for one course from one account to another.
///
/// Only live rows move: a source row whose outline item already has a live
/// row on the destination side is skipped, so the destination keeps its own
/// history for items it has touched. Generated blocks travel with the rows
/// that move. Runs inside the caller's session so the reassignment commits
/// or rolls back with the surrounding work.
pub fn migrate_progress(
    session: &mut dyn RecordSession,
    from_account_id: &str,
    to_account_id: &str,
    course_id: &str,
) -> Result<MigrationReport, RecordError> {
    let source_rows = session.active_progress(from_account_id, course_id)?;
    if source_rows.is_empty() {
        return Ok(MigrationReport::default());
    }

    let taken: HashSet<String> = session
        .active_progress(to_account_id, course_id)?
        .into_iter()
        .map(|record| record.item_id)
        .collect();

    let mut row_ids = Vec::new();
    let mut record_bids = Vec::new();
    let mut skipped = 0;
    for record in &source_rows {
        if taken.contains(&record.item_id) {
            skipped += 1;
        } else {
            row_ids.push(record.row_id);
            record_bids.push(record.record_bid.clone());
        }
    }

    let migrated = if row_ids.is_empty() {
        0
    } else {
        session.reassign_generated_blocks(&record_bids, to_account_id)?;
        session.reassign_progress(&row_ids, to_account_id)?
    };

    info!(
        from = from_account_id,
        to = to_account_id,
        course = course_id,
        migrated,
        skipped,
        "migrated study progress"
    );

    Ok(MigrationReport { migrated, skipped })
}
