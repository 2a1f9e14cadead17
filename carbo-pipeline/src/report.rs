//! Batch results and their summary.

use carbo_core::{Category, CompoundRecord, FailureReason};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Counts over one batch. Records for duplicate identifiers count once per
/// occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub unique: usize,
    pub resolved: usize,
    pub classified: usize,
    pub carbohydrates: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub failed: usize,
    /// Skipped because an earlier run gave up on them.
    pub skipped: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[CompoundRecord], unique: usize) -> Self {
        let mut summary = Self {
            total: records.len(),
            unique,
            ..Self::default()
        };
        for record in records {
            if record.is_resolved() {
                summary.resolved += 1;
            }
            if let Some(category) = record.category() {
                summary.classified += 1;
                if category.is_carbohydrate() {
                    summary.carbohydrates += 1;
                }
                *summary.by_category.entry(category).or_insert(0) += 1;
            }
            match record.error.as_ref().map(|e| e.reason) {
                Some(FailureReason::KnownFailed) => summary.skipped += 1,
                Some(FailureReason::Cancelled) => summary.cancelled += 1,
                Some(_) => summary.failed += 1,
                None => {}
            }
        }
        summary
    }

    pub fn count(&self, category: Category) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// Outcome of `BatchOrchestrator::run`. Records are in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub records: Vec<CompoundRecord>,
    pub summary: BatchSummary,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn record(&self, identifier: &str) -> Option<&CompoundRecord> {
        self.records.iter().find(|r| r.identifier == identifier)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CompoundRecord> {
        self.records.iter().filter(|r| r.is_failed())
    }
}
