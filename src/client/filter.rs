//! Post-merge filtering of unified records.
//!
//! Providers push down what they can, but not every registry supports every
//! constraint, so the merged list is always filtered again here. Every
//! predicate is pure; a filter left unset passes everything.

use crate::client::providers::{Jurisdiction, SearchQuery};
use crate::client::UnifiedRecord;
use chrono::NaiveDate;
use tracing::debug;

/// Applies a query's filter set to a merged result list
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEngine;

impl FilterEngine {
    /// Keep records that satisfy every filter the query sets, in input order
    #[must_use]
    pub fn apply(records: Vec<UnifiedRecord>, query: &SearchQuery) -> Vec<UnifiedRecord> {
        let before = records.len();
        let kept: Vec<UnifiedRecord> = records
            .into_iter()
            .filter(|record| Self::matches(record, query))
            .collect();

        if kept.len() != before {
            debug!("Filter engine kept {} of {} records", kept.len(), before);
        }
        kept
    }

    /// Whether a single record satisfies every filter of the query
    #[must_use]
    pub fn matches(record: &UnifiedRecord, query: &SearchQuery) -> bool {
        matches_jurisdiction(record, &query.jurisdiction)
            && matches_date_range(record, query.date_from, query.date_to)
            && matches_assignee(record, query.assignee_term())
            && matches_inventor(record, query.inventor_term())
    }
}

/// `ALL` passes everything; a code requires a record jurisdiction equal to it
#[must_use]
pub fn matches_jurisdiction(record: &UnifiedRecord, jurisdiction: &Jurisdiction) -> bool {
    jurisdiction.matches(record.jurisdiction.as_deref())
}

/// Inclusive range on the reference date; records without a date pass
#[must_use]
pub fn matches_date_range(
    record: &UnifiedRecord,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> bool {
    let Some(date) = record.reference_date() else {
        return true;
    };
    from.map_or(true, |from| date >= from) && to.map_or(true, |to| date <= to)
}

/// Case-insensitive substring match against any assignee
#[must_use]
pub fn matches_assignee(record: &UnifiedRecord, assignee: Option<&str>) -> bool {
    assignee.map_or(true, |term| any_contains(&record.assignees, term))
}

/// Case-insensitive substring match against any inventor
#[must_use]
pub fn matches_inventor(record: &UnifiedRecord, inventor: Option<&str>) -> bool {
    inventor.map_or(true, |term| any_contains(&record.inventors, term))
}

fn any_contains(values: &[String], term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    values
        .iter()
        .any(|value| value.to_lowercase().contains(&needle))
}
