//! Search request options and result types.

use crate::model::Record;
use chrono::{Days, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;

/// How results are ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    /// Best match first.
    #[default]
    Relevance,
    /// Newest first.
    Date,
}

serde_plain::derive_display_from_serialize!(OrderBy);
serde_plain::derive_fromstr_from_deserialize!(OrderBy);

/// Which retrieval paths a search uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Full-text and vector search fused by reciprocal rank.
    #[default]
    Hybrid,
    /// Full-text search only.
    Text,
    /// Vector similarity only.
    Vector,
}

serde_plain::derive_display_from_serialize!(SearchMode);
serde_plain::derive_fromstr_from_deserialize!(SearchMode);

/// All of the knobs for a search. Construct with `SearchOptions::new` and the `with_` methods;
/// every field is independent so the order of the calls does not matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results returned.
    pub limit: usize,
    /// Only include transactions from the last `days` days. Ignored when `date_cutoff` is set.
    pub days: Option<u32>,
    /// Only include transactions dated on or after this day.
    pub date_cutoff: Option<NaiveDate>,
    pub order_by: OrderBy,
    /// Minimum cosine similarity for vector matches. Zero or less disables the filter.
    pub vector_threshold: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            days: None,
            date_cutoff: None,
            order_by: OrderBy::Relevance,
            vector_threshold: 0.0,
        }
    }

    pub fn with_days(mut self, days: u32) -> Self {
        self.days = Some(days);
        self
    }

    pub fn with_date_cutoff(mut self, cutoff: NaiveDate) -> Self {
        self.date_cutoff = Some(cutoff);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_vector_threshold(mut self, threshold: f32) -> Self {
        self.vector_threshold = threshold;
        self
    }

    /// The earliest date (inclusive) that results may have, relative to `today`.
    pub fn cutoff(&self, today: NaiveDate) -> Option<NaiveDate> {
        match (self.date_cutoff, self.days) {
            (Some(cutoff), _) => Some(cutoff),
            (None, Some(days)) => Some(
                today
                    .checked_sub_days(Days::new(u64::from(days)))
                    .unwrap_or(NaiveDate::MIN),
            ),
            (None, None) => None,
        }
    }
}

/// Per-query scores. Which ones are present depends on the kind of search that produced the
/// result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchScore {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub record: Record,
    pub score: SearchScore,
}

/// A page of results plus the number of matches before `limit` was applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchResult>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cutoff_from_days() {
        let options = SearchOptions::new(10).with_days(30);
        assert_eq!(options.cutoff(day(2025, 3, 31)), Some(day(2025, 3, 1)));
    }

    #[test]
    fn test_explicit_cutoff_wins_regardless_of_call_order() {
        let a = SearchOptions::new(10)
            .with_days(5)
            .with_date_cutoff(day(2024, 1, 1));
        let b = SearchOptions::new(10)
            .with_date_cutoff(day(2024, 1, 1))
            .with_days(5);
        assert_eq!(a.cutoff(day(2025, 1, 1)), Some(day(2024, 1, 1)));
        assert_eq!(a.cutoff(day(2025, 1, 1)), b.cutoff(day(2025, 1, 1)));
    }

    #[test]
    fn test_no_cutoff_by_default() {
        assert_eq!(SearchOptions::default().cutoff(day(2025, 1, 1)), None);
        assert_eq!(SearchOptions::default().limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_order_by_strings() {
        assert_eq!(OrderBy::Date.to_string(), "date");
        assert_eq!("relevance".parse::<OrderBy>().unwrap(), OrderBy::Relevance);
        assert_eq!(SearchMode::default().to_string(), "hybrid");
        assert_eq!("vector".parse::<SearchMode>().unwrap(), SearchMode::Vector);
    }
}
