//! Route proposal: one provider's candidate answer to a search

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors from proposal construction
#[derive(Debug, Error, PartialEq)]
pub enum ProposalError {
    #[error("proposal has no route segments")]
    EmptyRoute,

    #[error("cannot shorten proposal from {current} to {requested} segments")]
    InvalidLength { current: usize, requested: usize },
}

/// A named place at an instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub at: DateTime<Utc>,
}

impl Location {
    pub fn new(name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { name: name.into(), at }
    }
}

/// One leg of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub origin: Location,
    pub destination: Location,
}

impl RouteSegment {
    pub fn new(origin: Location, destination: Location) -> Self {
        Self { origin, destination }
    }
}

/// A priced, time-limited route offered by a provider
///
/// `segments` and `prices` always have the same, non-zero length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "ProposalRecord")]
pub struct Proposal {
    pub id: String,
    pub user_id: Option<String>,
    segments: Vec<RouteSegment>,
    prices: Vec<f64>,
    pub valid_until: DateTime<Utc>,
}

/// Wire form checked on the way in so a decoded proposal keeps its invariants
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProposalRecord {
    id: String,
    user_id: Option<String>,
    segments: Vec<RouteSegment>,
    prices: Vec<f64>,
    valid_until: DateTime<Utc>,
}

impl TryFrom<ProposalRecord> for Proposal {
    type Error = ProposalError;

    fn try_from(mut record: ProposalRecord) -> Result<Self, Self::Error> {
        let len = record.segments.len().min(record.prices.len());
        if len == 0 {
            return Err(ProposalError::EmptyRoute);
        }
        record.segments.truncate(len);
        record.prices.truncate(len);
        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            segments: record.segments,
            prices: record.prices,
            valid_until: record.valid_until,
        })
    }
}

impl Proposal {
    /// Create a proposal, truncating segments and prices to the shorter of the two
    pub fn new(
        user_id: Option<String>,
        mut segments: Vec<RouteSegment>,
        mut prices: Vec<f64>,
        valid_until: DateTime<Utc>,
    ) -> Result<Self, ProposalError> {
        debug!(segments = segments.len(), prices = prices.len(), "Proposal::new: called");
        let len = segments.len().min(prices.len());
        if segments.len() != prices.len() {
            warn!(
                segments = segments.len(),
                prices = prices.len(),
                len,
                "Proposal::new: mismatched segment and price counts, truncating"
            );
        }
        segments.truncate(len);
        prices.truncate(len);

        if len == 0 {
            return Err(ProposalError::EmptyRoute);
        }

        Ok(Self {
            id: Uuid::now_v7().to_string(),
            user_id,
            segments,
            prices,
            valid_until,
        })
    }

    /// Shorten both sequences to `len` segments before first use
    pub fn shorten(&mut self, len: usize) -> Result<(), ProposalError> {
        debug!(id = %self.id, len, "Proposal::shorten: called");
        if len == 0 || len > self.segments.len() {
            return Err(ProposalError::InvalidLength {
                current: self.segments.len(),
                requested: len,
            });
        }
        self.segments.truncate(len);
        self.prices.truncate(len);
        Ok(())
    }

    pub fn segments(&self) -> &[RouteSegment] {
        &self.segments
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Where the first segment departs
    pub fn origin(&self) -> &Location {
        &self.segments[0].origin
    }

    /// Where the last segment arrives
    pub fn destination(&self) -> &Location {
        &self.segments[self.segments.len() - 1].destination
    }

    pub fn total_price(&self) -> f64 {
        self.prices.iter().sum()
    }

    /// Elapsed time from first departure to last arrival
    pub fn duration(&self) -> Duration {
        self.destination().at - self.origin().at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until >= now
    }

    /// True when every segment arrives no later than the next one departs
    pub fn is_chained(&self) -> bool {
        self.segments
            .windows(2)
            .all(|pair| pair[0].destination.at <= pair[1].origin.at)
            && self.segments.iter().all(|s| s.origin.at <= s.destination.at)
    }
}
