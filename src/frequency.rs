//! Token occurrence tables and their order-independent merge.

use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;

use crate::tokenize::TokenizedRecord;

/// Total occurrences per distinct token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: FxHashMap<Vec<u8>, u64>,
}

impl FrequencyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `token`.
    pub fn add(&mut self, token: &[u8]) {
        self.add_count(token, 1);
    }

    /// Records `count` occurrences of `token`.
    pub fn add_count(&mut self, token: &[u8], count: u64) {
        if let Some(existing) = self.counts.get_mut(token) {
            *existing += count;
        } else {
            self.counts.insert(token.to_vec(), count);
        }
    }

    /// Records every token occurrence of a record.
    pub fn add_record(&mut self, record: &TokenizedRecord<'_>) {
        for token in record.occurrences() {
            self.add(token);
        }
    }

    /// Adds every count from `other` into `self`.
    pub fn merge(&mut self, other: FrequencyTable) {
        if self.counts.len() < other.counts.len() {
            let smaller = std::mem::replace(&mut self.counts, other.counts);
            for (token, count) in smaller {
                *self.counts.entry(token).or_insert(0) += count;
            }
            return;
        }
        for (token, count) in other.counts {
            *self.counts.entry(token).or_insert(0) += count;
        }
    }

    /// Total occurrences recorded for `token`.
    #[must_use]
    pub fn get(&self, token: &[u8]) -> u64 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    /// Number of distinct tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true when no token has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of every token's count.
    #[must_use]
    pub fn total_occurrences(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Entries in byte-lexicographic token order.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&[u8], u64)> {
        let mut entries: Vec<(&[u8], u64)> = self
            .counts
            .iter()
            .map(|(token, &count)| (token.as_slice(), count))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Sums a collection of tables into one.
pub fn merge_all<I>(tables: I) -> FrequencyTable
where
    I: IntoIterator<Item = FrequencyTable>,
{
    tables
        .into_iter()
        .fold(FrequencyTable::default(), |mut acc, table| {
            acc.merge(table);
            acc
        })
}

/// A table shared between workers; each record's increments happen under one lock.
#[derive(Debug, Default)]
pub struct SharedFrequencyTable {
    inner: Mutex<FrequencyTable>,
}

impl SharedFrequencyTable {
    /// Creates an empty shared table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one record's occurrences while holding the lock.
    pub fn add_record(&self, record: &TokenizedRecord<'_>) {
        if record.is_empty() {
            return;
        }
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.add_record(record);
    }

    /// Consumes the wrapper and returns the accumulated table.
    #[must_use]
    pub fn into_inner(self) -> FrequencyTable {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
