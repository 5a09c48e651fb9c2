use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::record::{basename, FunctionRecord, RecordKey};

/// How duplicate records are detected on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Records collapse only when every field is equal. Two distinct
    /// definitions sharing name and file both stay.
    #[default]
    FullEquality,
    /// The first record per `(name, file)` wins.
    Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(usize),
    /// An equivalent record already sits in this slot.
    Duplicate(usize),
}

/// Function records in insertion order, indexed by name and by
/// `(name, file)` for in-place updates.
#[derive(Debug, Default, Clone)]
pub struct RecordStore {
    policy: DedupPolicy,
    records: Vec<FunctionRecord>,
    by_key: HashMap<RecordKey, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
}

impl RecordStore {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    pub fn insert(&mut self, record: FunctionRecord) -> InsertOutcome {
        let key = record.key();
        if let Some(slots) = self.by_key.get(&key) {
            let existing = match self.policy {
                DedupPolicy::FullEquality => slots.iter().copied().find(|&s| self.records[s] == record),
                DedupPolicy::Key => slots.first().copied(),
            };
            if let Some(slot) = existing {
                return InsertOutcome::Duplicate(slot);
            }
        }

        let slot = self.records.len();
        self.by_name.entry(record.name.clone()).or_default().push(slot);
        self.by_key.entry(key).or_default().push(slot);
        self.records.push(record);
        InsertOutcome::Inserted(slot)
    }

    pub fn get(&self, slot: usize) -> Option<&FunctionRecord> {
        self.records.get(slot)
    }

    /// Mutable access for in-place updates. Callers must not change
    /// `name` or `file`, the index depends on them.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut FunctionRecord> {
        self.records.get_mut(slot)
    }

    pub fn slots_for_key(&self, key: &RecordKey) -> &[usize] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First slot (in insertion order) named `name` whose file has the
    /// given basename.
    pub fn first_by_name_and_basename(&self, name: &str, file_basename: &str) -> Option<usize> {
        self.by_name
            .get(name)?
            .iter()
            .copied()
            .find(|&slot| basename(&self.records[slot].file) == file_basename)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FunctionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FunctionRecord> {
        self.records
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
