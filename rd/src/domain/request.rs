//! Search request as issued by a caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional narrowing of a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SearchFilters {
    /// Upper bound on total price
    pub max_price: Option<f64>,

    /// Proposals must stay valid at least until this instant
    pub min_valid_until: Option<DateTime<Utc>>,

    /// Exact arrival time at the destination
    pub destination_time: Option<DateTime<Utc>>,

    /// Answer from the cache only, skipping the provider fan-out
    pub only_cached: Option<bool>,
}

/// Origin, destination and departure time plus optional filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub origin_time: DateTime<Utc>,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
}

impl SearchRequest {
    pub fn new(origin: impl Into<String>, destination: impl Into<String>, origin_time: DateTime<Utc>) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            origin_time,
            filters: None,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn only_cached(&self) -> bool {
        self.filters.as_ref().and_then(|f| f.only_cached).unwrap_or(false)
    }

    pub fn max_price(&self) -> Option<f64> {
        self.filters.as_ref().and_then(|f| f.max_price)
    }

    pub fn min_valid_until(&self) -> Option<DateTime<Utc>> {
        self.filters.as_ref().and_then(|f| f.min_valid_until)
    }

    pub fn destination_time(&self) -> Option<DateTime<Utc>> {
        self.filters.as_ref().and_then(|f| f.destination_time)
    }
}
