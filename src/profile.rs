//! Profile-label seam used while merging accounts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Profile labels could not be read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileError {
    pub message: String,
}

impl ProfileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile labels unavailable: {}", self.message)
    }
}

impl std::error::Error for ProfileError {}

/// One key/value label on an account's course profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLabel {
    pub key: String,
    pub value: String,
}

impl ProfileLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Reads and writes the per-course profile labels of an account.
pub trait ProfileLabels: Send + Sync {
    /// Labels of one account for one course.
    fn labels_for(
        &self,
        account_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProfileLabel>, ProfileError>;

    /// Apply labels to an account's course profile, upserting by key.
    fn apply_labels(
        &self,
        account_id: &str,
        labels: &[ProfileLabel],
        course_id: &str,
    ) -> Result<(), ProfileError>;
}

/// In-memory label store keyed by (account, course). Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryProfileLabels {
    labels: Arc<RwLock<HashMap<(String, String), Vec<ProfileLabel>>>>,
}

impl InMemoryProfileLabels {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileLabels for InMemoryProfileLabels {
    fn labels_for(
        &self,
        account_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProfileLabel>, ProfileError> {
        let labels = self
            .labels
            .read()
            .map_err(|_| ProfileError::new("label lock poisoned"))?;
        Ok(labels
            .get(&(account_id.to_string(), course_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn apply_labels(
        &self,
        account_id: &str,
        labels: &[ProfileLabel],
        course_id: &str,
    ) -> Result<(), ProfileError> {
        let mut table = self
            .labels
            .write()
            .map_err(|_| ProfileError::new("label lock poisoned"))?;
        let slot = table
            .entry((account_id.to_string(), course_id.to_string()))
            .or_default();
        for label in labels {
            match slot.iter_mut().find(|existing| existing.key == label.key) {
                Some(existing) => existing.value = label.value.clone(),
                None => slot.push(label.clone()),
            }
        }
        Ok(())
    }
}
