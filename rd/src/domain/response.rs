//! What a caller gets back from a search

use serde::{Deserialize, Serialize};

use super::proposal::Proposal;

/// Price and duration bounds over a set of proposals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseStats {
    pub min_price: f64,
    pub max_price: f64,
    pub min_minutes: i64,
    pub max_minutes: i64,
}

impl ResponseStats {
    /// Aggregate over `proposals`; all zero when there are none
    pub fn from_proposals(proposals: &[Proposal]) -> Self {
        let Some(first) = proposals.first() else {
            return Self::default();
        };

        let seed = Self {
            min_price: first.total_price(),
            max_price: first.total_price(),
            min_minutes: first.duration().num_minutes(),
            max_minutes: first.duration().num_minutes(),
        };

        proposals.iter().skip(1).fold(seed, |acc, p| {
            let price = p.total_price();
            let minutes = p.duration().num_minutes();
            Self {
                min_price: acc.min_price.min(price),
                max_price: acc.max_price.max(price),
                min_minutes: acc.min_minutes.min(minutes),
                max_minutes: acc.max_minutes.max(minutes),
            }
        })
    }
}

/// How the wait for a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Completion {
    /// Every expected provider answered
    Completed,
    /// The deadline elapsed first; results may be partial
    TimedOut,
}

/// Merged result of one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchResponse {
    pub request_id: String,
    pub proposals: Vec<Proposal>,
    pub stats: ResponseStats,
    pub completion: Completion,
    pub answered: Vec<String>,
    pub failed: Vec<String>,
}

impl SearchResponse {
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, RouteSegment};
    use chrono::{Duration, TimeZone, Utc};

    fn proposal(price: f64, hours: i64) -> Proposal {
        let dep = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let arr = dep + Duration::hours(hours);
        Proposal::new(
            None,
            vec![RouteSegment::new(Location::new("A", dep), Location::new("B", arr))],
            vec![price],
            dep + Duration::days(3),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_is_zeroed() {
        assert_eq!(ResponseStats::from_proposals(&[]), ResponseStats::default());
    }

    #[test]
    fn test_bounds() {
        let stats = ResponseStats::from_proposals(&[proposal(120.0, 3), proposal(80.0, 5), proposal(100.0, 1)]);
        assert_eq!(stats.min_price, 80.0);
        assert_eq!(stats.max_price, 120.0);
        assert_eq!(stats.min_minutes, 60);
        assert_eq!(stats.max_minutes, 300);
    }
}
