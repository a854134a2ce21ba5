//! Provider-side narrowing of answers before they are published

use tracing::debug;

use crate::domain::{Proposal, SearchRequest};

/// Keep proposals that honor the request's price and validity filters and chain in time
pub fn filter_proposals(proposals: Vec<Proposal>, request: &SearchRequest) -> Vec<Proposal> {
    let before = proposals.len();
    let max_price = request.max_price();
    let min_valid_until = request.min_valid_until();

    let kept: Vec<Proposal> = proposals
        .into_iter()
        .filter(|p| min_valid_until.is_none_or(|min| p.valid_until >= min))
        .filter(|p| max_price.is_none_or(|max| p.total_price() <= max))
        .filter(Proposal::is_chained)
        .collect();

    debug!(before, after = kept.len(), "filter_proposals: done");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, RouteSegment, SearchFilters};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn proposal(price: f64, valid_days: i64) -> Proposal {
        Proposal::new(
            None,
            vec![RouteSegment::new(
                Location::new("A", t0()),
                Location::new("B", t0() + Duration::hours(3)),
            )],
            vec![price],
            t0() + Duration::days(valid_days),
        )
        .unwrap()
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let request = SearchRequest::new("A", "B", t0());
        let kept = filter_proposals(vec![proposal(10.0, 1), proposal(1000.0, 5)], &request);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_price_and_validity() {
        let request = SearchRequest::new("A", "B", t0()).with_filters(SearchFilters {
            max_price: Some(100.0),
            min_valid_until: Some(t0() + Duration::days(2)),
            ..Default::default()
        });
        let kept = filter_proposals(
            vec![proposal(50.0, 3), proposal(150.0, 3), proposal(50.0, 1), proposal(100.0, 2)],
            &request,
        );
        let prices: Vec<f64> = kept.iter().map(Proposal::total_price).collect();
        assert_eq!(prices, vec![50.0, 100.0]);
    }

    #[test]
    fn test_unchained_dropped() {
        let broken = Proposal::new(
            None,
            vec![
                RouteSegment::new(Location::new("A", t0()), Location::new("B", t0() + Duration::hours(5))),
                RouteSegment::new(
                    Location::new("B", t0() + Duration::hours(4)),
                    Location::new("C", t0() + Duration::hours(6)),
                ),
            ],
            vec![1.0, 1.0],
            t0() + Duration::days(3),
        )
        .unwrap();
        let request = SearchRequest::new("A", "C", t0());
        assert!(filter_proposals(vec![broken], &request).is_empty());
    }
}
