//! Gateway that fabricates plausible proposals without any network

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use tracing::debug;

use super::{ProviderError, ProviderGateway};
use crate::domain::{Location, Proposal, RouteSegment, SearchRequest};

const MAX_SEGMENTS: usize = 3;
const VALIDITY_DAYS: i64 = 3;

/// Answers every search with 1..=max generated proposals
///
/// Each proposal departs from the requested origin at the requested time and
/// arrives at the requested destination, one day later unless a destination
/// time is given.
#[derive(Debug, Clone)]
pub struct FixtureGateway {
    id: String,
    max_proposals: usize,
    latency: Duration,
}

impl FixtureGateway {
    pub fn new(id: impl Into<String>, max_proposals: usize, latency: Duration) -> Self {
        Self {
            id: id.into(),
            max_proposals: max_proposals.max(1),
            latency,
        }
    }

    fn generate(
        &self,
        user_id: &str,
        request: &SearchRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, ProviderError> {
        let mut rng = rand::rng();
        let count = rng.random_range(1..=self.max_proposals);
        let departure = request.origin_time;
        let arrival = request
            .destination_time()
            .filter(|t| *t > departure)
            .unwrap_or(departure + ChronoDuration::days(1));

        (0..count)
            .map(|_| {
                let legs = rng.random_range(1..=MAX_SEGMENTS);
                let step = (arrival - departure) / legs as i32;
                let segments: Vec<RouteSegment> = (0..legs)
                    .map(|leg| {
                        let from = if leg == 0 {
                            request.origin.clone()
                        } else {
                            format!("{}-hub-{}", self.id, leg)
                        };
                        let to = if leg + 1 == legs {
                            request.destination.clone()
                        } else {
                            format!("{}-hub-{}", self.id, leg + 1)
                        };
                        let leave = departure + step * leg as i32;
                        let reach = if leg + 1 == legs { arrival } else { leave + step };
                        RouteSegment::new(Location::new(from, leave), Location::new(to, reach))
                    })
                    .collect();
                let prices: Vec<f64> = (0..legs)
                    .map(|_| (rng.random_range(20.0..400.0_f64) * 100.0).round() / 100.0)
                    .collect();
                Proposal::new(
                    Some(user_id.to_string()),
                    segments,
                    prices,
                    now + ChronoDuration::days(VALIDITY_DAYS),
                )
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ProviderGateway for FixtureGateway {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn search(&self, user_id: &str, request: &SearchRequest) -> Result<Vec<Proposal>, ProviderError> {
        debug!(
            provider = %self.id,
            user_id,
            origin = %request.origin,
            destination = %request.destination,
            "FixtureGateway::search: called"
        );
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.generate(user_id, request, Utc::now())
    }
}
