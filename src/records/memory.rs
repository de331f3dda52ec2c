//! InMemoryRecordStore - table snapshots with clone-and-swap transactions.

use std::sync::{Arc, Mutex};

use crate::account::{Account, AccountState, Destination};
use crate::progress::{GeneratedBlock, ProgressRecord, ProgressStatus};

use super::{Course, RecordError, RecordSession, RecordStore};

/// The tables, plus the row-id counter shared across them.
#[derive(Clone, Default)]
struct Tables {
    next_row_id: u64,
    accounts: Vec<Account>,
    courses: Vec<Course>,
    progress: Vec<ProgressRecord>,
    generated_blocks: Vec<GeneratedBlock>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

/// In-memory record store.
///
/// A transaction clones the tables, lets the closure mutate the clone, and
/// swaps it in on `Ok`. An `Err` drops the clone, which is the rollback.
/// Transactions serialize on the table mutex. Clone-friendly via Arc.
#[derive(Clone)]
pub struct InMemoryRecordStore {
    tables: Arc<Mutex<Tables>>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<RecordError>,
        F: FnOnce(&mut dyn RecordSession) -> Result<T, E>,
    {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| E::from(RecordError::Storage("table lock poisoned".into())))?;

        let mut working = tables.clone();
        let result = f(&mut working);
        if result.is_ok() {
            *tables = working;
        }
        result
    }
}

impl RecordSession for Tables {
    fn account_by_id(&self, account_id: &str) -> Result<Option<Account>, RecordError> {
        Ok(self
            .accounts
            .iter()
            .find(|account| account.account_id == account_id)
            .cloned())
    }

    fn accounts_by_binding(
        &self,
        destination: &Destination,
    ) -> Result<Vec<Account>, RecordError> {
        Ok(self
            .accounts
            .iter()
            .filter(|account| account.is_bound_to(destination))
            .cloned()
            .collect())
    }

    fn verified_account_count(&self) -> Result<usize, RecordError> {
        Ok(self
            .accounts
            .iter()
            .filter(|account| account.state != AccountState::Unverified)
            .count())
    }

    fn insert_account(&mut self, mut account: Account) -> Result<Account, RecordError> {
        account.row_id = self.next_id();
        self.accounts.push(account.clone());
        Ok(account)
    }

    fn update_account(&mut self, account: &Account) -> Result<(), RecordError> {
        match self
            .accounts
            .iter_mut()
            .find(|row| row.account_id == account.account_id)
        {
            Some(row) => {
                *row = account.clone();
                Ok(())
            }
            None => Err(RecordError::NotFound {
                table: "accounts",
                id: account.account_id.clone(),
            }),
        }
    }

    fn active_course_count(&self) -> Result<usize, RecordError> {
        Ok(self.courses.iter().filter(|course| !course.deleted).count())
    }

    fn first_active_course(&self) -> Result<Option<Course>, RecordError> {
        Ok(self
            .courses
            .iter()
            .filter(|course| !course.deleted)
            .min_by_key(|course| course.row_id)
            .cloned())
    }

    fn insert_course(&mut self, mut course: Course) -> Result<Course, RecordError> {
        course.row_id = self.next_id();
        self.courses.push(course.clone());
        Ok(course)
    }

    fn update_course(&mut self, course: &Course) -> Result<(), RecordError> {
        match self
            .courses
            .iter_mut()
            .find(|row| row.course_id == course.course_id)
        {
            Some(row) => {
                *row = course.clone();
                Ok(())
            }
            None => Err(RecordError::NotFound {
                table: "courses",
                id: course.course_id.clone(),
            }),
        }
    }

    fn active_progress(
        &self,
        account_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressRecord>, RecordError> {
        Ok(self
            .progress
            .iter()
            .filter(|record| {
                record.account_id == account_id
                    && record.course_id == course_id
                    && record.status != ProgressStatus::Reset
            })
            .cloned()
            .collect())
    }

    fn insert_progress(
        &mut self,
        mut record: ProgressRecord,
    ) -> Result<ProgressRecord, RecordError> {
        record.row_id = self.next_id();
        self.progress.push(record.clone());
        Ok(record)
    }

    fn reassign_progress(
        &mut self,
        row_ids: &[u64],
        to_account_id: &str,
    ) -> Result<usize, RecordError> {
        let mut touched = 0;
        for record in self.progress.iter_mut() {
            if row_ids.contains(&record.row_id) {
                record.account_id = to_account_id.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn generated_blocks_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<GeneratedBlock>, RecordError> {
        Ok(self
            .generated_blocks
            .iter()
            .filter(|block| block.account_id == account_id)
            .cloned()
            .collect())
    }

    fn insert_generated_block(
        &mut self,
        mut block: GeneratedBlock,
    ) -> Result<GeneratedBlock, RecordError> {
        block.row_id = self.next_id();
        self.generated_blocks.push(block.clone());
        Ok(block)
    }

    fn reassign_generated_blocks(
        &mut self,
        record_bids: &[String],
        to_account_id: &str,
    ) -> Result<usize, RecordError> {
        let mut touched = 0;
        for block in self.generated_blocks.iter_mut() {
            if record_bids.iter().any(|bid| *bid == block.record_bid) {
                block.account_id = to_account_id.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(account_id: &str, phone: &str) -> Account {
        let mut account = Account::new(account_id, AccountState::Verified);
        account.phone = phone.to_string();
        account
    }

    #[test]
    fn insert_assigns_sequential_row_ids() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                let first = session.insert_account(verified("u1", ""))?;
                let second = session.insert_account(verified("u2", ""))?;
                assert_eq!(first.row_id, 1);
                assert_eq!(second.row_id, 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn transaction_commits_on_ok() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                session.insert_account(verified("u1", "15550100"))?;
                Ok(())
            })
            .unwrap();

        let found = store
            .transaction(|session| -> Result<Option<Account>, RecordError> {
                session.account_by_id("u1")
            })
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let store = InMemoryRecordStore::new();
        let result: Result<(), RecordError> = store.transaction(|session| {
            session.insert_account(verified("u1", "15550100"))?;
            Err(RecordError::Storage("forced failure".into()))
        });
        assert!(result.is_err());

        let found = store
            .transaction(|session| -> Result<Option<Account>, RecordError> {
                session.account_by_id("u1")
            })
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn update_missing_account_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = store
            .transaction(|session| -> Result<(), RecordError> {
                session.update_account(&verified("ghost", ""))
            })
            .unwrap_err();
        assert!(matches!(err, RecordError::NotFound { table: "accounts", .. }));
    }

    #[test]
    fn binding_lookup_respects_the_channel() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                session.insert_account(verified("by-phone", "15550100"))?;
                let mut by_mail = Account::new("by-mail", AccountState::Verified);
                by_mail.mail = "15550100".to_string();
                session.insert_account(by_mail)?;
                Ok(())
            })
            .unwrap();

        let matches = store
            .transaction(|session| -> Result<Vec<Account>, RecordError> {
                session.accounts_by_binding(&Destination::Phone("15550100".to_string()))
            })
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].account_id, "by-phone");
    }

    #[test]
    fn active_progress_excludes_reset_rows() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                session.insert_progress(ProgressRecord::new(
                    "pr-1",
                    "u1",
                    "c1",
                    "item-1",
                    ProgressStatus::Completed,
                ))?;
                session.insert_progress(ProgressRecord::new(
                    "pr-2",
                    "u1",
                    "c1",
                    "item-2",
                    ProgressStatus::Reset,
                ))?;
                Ok(())
            })
            .unwrap();

        let active = store
            .transaction(|session| -> Result<Vec<ProgressRecord>, RecordError> {
                session.active_progress("u1", "c1")
            })
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].record_bid, "pr-1");
    }

    #[test]
    fn reassign_touches_only_listed_rows() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                let moved = session.insert_progress(ProgressRecord::new(
                    "pr-1",
                    "u1",
                    "c1",
                    "item-1",
                    ProgressStatus::Completed,
                ))?;
                session.insert_progress(ProgressRecord::new(
                    "pr-2",
                    "u1",
                    "c1",
                    "item-2",
                    ProgressStatus::Completed,
                ))?;
                let touched = session.reassign_progress(&[moved.row_id], "u2")?;
                assert_eq!(touched, 1);
                Ok(())
            })
            .unwrap();

        let moved = store
            .transaction(|session| -> Result<Vec<ProgressRecord>, RecordError> {
                session.active_progress("u2", "c1")
            })
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].item_id, "item-1");
    }

    #[test]
    fn first_active_course_skips_deleted() {
        let store = InMemoryRecordStore::new();
        store
            .transaction(|session| -> Result<(), RecordError> {
                let mut gone = Course::new("c-deleted", "Gone");
                gone.deleted = true;
                session.insert_course(gone)?;
                session.insert_course(Course::new("c-live", "Live"))?;
                Ok(())
            })
            .unwrap();

        let (count, first) = store
            .transaction(|session| -> Result<(usize, Option<Course>), RecordError> {
                Ok((session.active_course_count()?, session.first_active_course()?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(first.unwrap().course_id, "c-live");
    }

    #[test]
    fn clone_shares_storage() {
        let store = InMemoryRecordStore::new();
        let clone = store.clone();

        store
            .transaction(|session| -> Result<(), RecordError> {
                session.insert_account(verified("u1", ""))?;
                Ok(())
            })
            .unwrap();

        let found = clone
            .transaction(|session| -> Result<Option<Account>, RecordError> {
                session.account_by_id("u1")
            })
            .unwrap();
        assert!(found.is_some());
    }
}
