//! Normalization rules shared by every adapter.
//!
//! Missing optional fields become `None` or an empty list, never placeholder
//! strings. Multi-valued fields are trimmed, stripped of blanks and
//! de-duplicated in first-seen order.

use chrono::NaiveDate;
use std::collections::HashSet;

/// How "final" a document version is; higher wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentStatus {
    Unknown,
    Application,
    Publication,
    Grant,
}

impl DocumentStatus {
    /// Classify a patent kind code (`B1`, `A2`, ...)
    #[must_use]
    pub fn from_kind_code(kind: &str) -> Self {
        match kind.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('B' | 'C' | 'E') => Self::Grant,
            Some('A') => Self::Publication,
            Some(_) => Self::Application,
            None => Self::Unknown,
        }
    }
}

/// Pick the most final variant; ties keep the first returned
pub fn select_preferred<T, F>(items: &[T], status_of: F) -> Option<&T>
where
    F: Fn(&T) -> DocumentStatus,
{
    let mut best: Option<(&T, DocumentStatus)> = None;
    for item in items {
        let status = status_of(item);
        match best {
            Some((_, best_status)) if best_status >= status => {}
            _ => best = Some((item, status)),
        }
    }
    best.map(|(item, _)| item)
}

/// Trim, drop blanks and de-duplicate while keeping first-seen order
pub fn dedup_non_blank<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let cleaned = collapse_whitespace(value.as_ref());
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            out.push(cleaned);
        }
    }
    out
}

/// Optional text with surrounding and repeated whitespace removed
#[must_use]
pub fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|cleaned| !cleaned.is_empty())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `YYYYMMDD`, `YYYY-MM-DD` or an RFC 3339 timestamp into a date
#[must_use]
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }

    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_code_priority() {
        assert_eq!(DocumentStatus::from_kind_code("B1"), DocumentStatus::Grant);
        assert_eq!(DocumentStatus::from_kind_code("a2"), DocumentStatus::Publication);
        assert_eq!(DocumentStatus::from_kind_code("U"), DocumentStatus::Application);
        assert_eq!(DocumentStatus::from_kind_code(""), DocumentStatus::Unknown);
        assert!(DocumentStatus::Grant > DocumentStatus::Publication);
        assert!(DocumentStatus::Publication > DocumentStatus::Application);
    }

    #[test]
    fn test_select_preferred_prefers_grant() {
        let kinds = ["A1", "B1", "A2"];
        let picked = select_preferred(&kinds, |k| DocumentStatus::from_kind_code(k));
        assert_eq!(picked, Some(&"B1"));
    }

    #[test]
    fn test_select_preferred_ties_keep_first() {
        let kinds = [("first", "A1"), ("second", "A2")];
        let picked = select_preferred(&kinds, |(_, k)| DocumentStatus::from_kind_code(k));
        assert_eq!(picked.map(|(name, _)| *name), Some("first"));
        assert!(select_preferred(&[] as &[&str], |_| DocumentStatus::Grant).is_none());
    }

    #[test]
    fn test_dedup_non_blank() {
        let values = vec!["  Tesla Inc ", "", "Tesla  Inc", "   ", "Panasonic"];
        assert_eq!(dedup_non_blank(values), vec!["Tesla Inc", "Panasonic"]);
    }

    #[test]
    fn test_clean_text_never_placeholder() {
        assert_eq!(clean_text(Some("   ")), None);
        assert_eq!(clean_text(None), None);
        assert_eq!(clean_text(Some(" Solid\n state ")), Some("Solid state".to_string()));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 17);
        assert_eq!(parse_date(Some("20200317")), expected);
        assert_eq!(parse_date(Some("2020-03-17")), expected);
        assert_eq!(parse_date(Some("2020-03-17T00:00:00Z")), expected);
        assert_eq!(parse_date(Some("not a date")), None);
        assert_eq!(parse_date(Some("")), None);
        assert_eq!(parse_date(None), None);
    }
}
