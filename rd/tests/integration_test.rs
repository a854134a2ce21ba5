//! End-to-end tests against a wired engine
//!
//! Time-driven scenarios run on tokio's paused clock, so provider latencies
//! and the waiter deadline are virtual and deterministic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::time::Instant;

use routedaemon::events::{EventLog, update_received_topic};
use routedaemon::store::keys;
use routedaemon::{
    Completion, Config, Daemon, Location, Proposal, ProviderConfig, ProviderError, ProviderGateway, RouteSegment,
    SearchFilters, SearchRequest,
};

fn depart() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 6, 1, 8, 0, 0).unwrap()
}

fn request() -> SearchRequest {
    SearchRequest::new("A", "B", depart())
}

fn proposal(price: f64) -> Proposal {
    Proposal::new(
        Some("u".into()),
        vec![RouteSegment::new(
            Location::new("A", depart()),
            Location::new("B", depart() + ChronoDuration::hours(3)),
        )],
        vec![price],
        Utc::now() + ChronoDuration::days(10),
    )
    .unwrap()
}

#[derive(Clone, Copy)]
enum Behaviour {
    Answer,
    Fail,
    Offline,
}

/// Provider with a fixed latency and price list
struct ScriptedGateway {
    id: String,
    latency: Duration,
    prices: Vec<f64>,
    behaviour: Behaviour,
}

impl ScriptedGateway {
    fn answering(id: &str, latency_secs: u64, prices: &[f64]) -> Arc<dyn ProviderGateway> {
        Arc::new(Self {
            id: id.into(),
            latency: Duration::from_secs(latency_secs),
            prices: prices.to_vec(),
            behaviour: Behaviour::Answer,
        })
    }

    fn with(id: &str, behaviour: Behaviour) -> Arc<dyn ProviderGateway> {
        Arc::new(Self {
            id: id.into(),
            latency: Duration::ZERO,
            prices: Vec::new(),
            behaviour,
        })
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self) -> bool {
        !matches!(self.behaviour, Behaviour::Offline)
    }

    async fn search(&self, _user_id: &str, _request: &SearchRequest) -> Result<Vec<Proposal>, ProviderError> {
        tokio::time::sleep(self.latency).await;
        match self.behaviour {
            Behaviour::Fail => Err(ProviderError::InvalidResponse("scripted failure".into())),
            _ => Ok(self.prices.iter().map(|p| proposal(*p)).collect()),
        }
    }
}

fn config(ids: &[&str]) -> Config {
    let mut config = Config::default();
    config.cache.path = ":memory:".into();
    config.providers = ids.iter().map(|id| ProviderConfig::fixture(*id)).collect();
    config
}

async fn start(ids: &[&str], gateways: Vec<Arc<dyn ProviderGateway>>) -> Daemon {
    Daemon::start_with_gateways(&config(ids), gateways).await.unwrap()
}

// =============================================================================
// Scatter-gather scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_all_providers_answer_before_deadline() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::answering("p2", 2, &[200.0, 300.0]),
        ],
    )
    .await;

    let started = Instant::now();
    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.completion, Completion::Completed);
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3), "{elapsed:?}");
    assert_eq!(response.proposals.len(), 3);
    assert_eq!(response.answered, vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(response.stats.min_price, 100.0);
    assert_eq!(response.stats.max_price, 300.0);
    assert_eq!(response.stats.min_minutes, 180);
    assert_eq!(daemon.correlations().pending_count("42").await.unwrap(), 0);
    assert_eq!(daemon.store().subscriber_count(&keys::status_channel("42")), 0);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_provider_yields_partial_result_at_deadline() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::with("p2", Behaviour::Offline),
        ],
    )
    .await;

    let started = Instant::now();
    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();

    assert_eq!(response.completion, Completion::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(response.proposals.len(), 1);
    assert_eq!(
        daemon.correlations().pending_providers("42").await.unwrap(),
        vec!["p2".to_string()]
    );
    assert_eq!(daemon.store().subscriber_count(&keys::status_channel("42")), 0);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_responders_is_empty_not_error() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::with("p1", Behaviour::Offline),
            ScriptedGateway::with("p2", Behaviour::Offline),
        ],
    )
    .await;

    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();
    assert_eq!(response.completion, Completion::TimedOut);
    assert!(response.proposals.is_empty());
    assert_eq!(response.stats.min_price, 0.0);
    assert_eq!(response.stats.max_price, 0.0);
    assert_eq!(response.stats.min_minutes, 0);
    assert_eq!(response.stats.max_minutes, 0);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_provider_is_reported_and_stays_pending() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::with("p2", Behaviour::Fail),
        ],
    )
    .await;

    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();
    assert_eq!(response.completion, Completion::TimedOut);
    assert_eq!(response.failed, vec!["p2".to_string()]);
    assert_eq!(response.answered, vec!["p1".to_string()]);
    assert_eq!(response.proposals.len(), 1);
    assert_eq!(
        daemon.correlations().pending_providers("42").await.unwrap(),
        vec!["p2".to_string()]
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_response_does_not_duplicate_or_recomplete() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::answering("p2", 2, &[200.0, 300.0]),
        ],
    )
    .await;
    let mut status = daemon.correlations().subscribe("42").await.unwrap();

    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();
    assert!(response.is_complete());

    // replay p1's answer as a second, independent delivery
    let topic = update_received_topic("p1");
    let original = daemon.event_log().published(&topic);
    assert_eq!(original.len(), 1);
    daemon
        .event_log()
        .publish(&topic, "42", original[0].clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(daemon.correlations().read_proposals("42").await.unwrap().len(), 3);

    let mut completed = 0;
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(200), status.recv()).await {
        if message == "completed" {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);

    daemon.shutdown().await.unwrap();
}

// =============================================================================
// Cache path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_model_builder_feeds_cache_query() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::answering("p2", 2, &[200.0, 300.0]),
        ],
    )
    .await;
    daemon.client().search_with_id("42", "u", request()).await.unwrap();

    let mut cached = 0;
    for _ in 0..50 {
        cached = daemon.index().count().await.unwrap();
        if cached == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(cached, 3);
    assert_eq!(daemon.index().count_for_provider("p2").await.unwrap(), 2);

    let cheap = request().with_filters(SearchFilters {
        max_price: Some(150.0),
        min_valid_until: Some(Utc::now()),
        only_cached: Some(true),
        ..Default::default()
    });
    let response = daemon.client().search_with_id("43", "u", cheap).await.unwrap();
    assert!(response.is_complete());
    assert_eq!(response.proposals.len(), 1);
    assert_eq!(response.proposals[0].total_price(), 100.0);
    assert_eq!(response.answered, vec!["cache".to_string()]);

    let too_cheap = request().with_filters(SearchFilters {
        max_price: Some(50.0),
        only_cached: Some(true),
        ..Default::default()
    });
    let response = daemon.client().search_with_id("44", "u", too_cheap).await.unwrap();
    assert!(response.is_complete());
    assert!(response.proposals.is_empty());

    // the cache path never fans out
    assert_eq!(daemon.event_log().published("routes.update-requested.p1").len(), 1);

    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_roster_completes_immediately() {
    let daemon = start(&[], Vec::new()).await;
    let started = Instant::now();
    let response = daemon.client().search_with_id("42", "u", request()).await.unwrap();
    assert!(response.is_complete());
    assert!(response.proposals.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
    daemon.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_independent_requests_do_not_mix() {
    let daemon = start(
        &["p1", "p2"],
        vec![
            ScriptedGateway::answering("p1", 1, &[100.0]),
            ScriptedGateway::answering("p2", 2, &[200.0, 300.0]),
        ],
    )
    .await;
    let client = daemon.client();
    let (a, b) = tokio::join!(
        client.search_with_id("r-a", "u", request()),
        client.search_with_id("r-b", "u", request())
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_complete() && b.is_complete());
    assert_eq!(a.proposals.len(), 3);
    assert_eq!(b.proposals.len(), 3);
    assert!(a.proposals.iter().all(|p| !b.proposals.contains(p)));

    daemon.shutdown().await.unwrap();
}

// =============================================================================
// Proposals
// =============================================================================

#[test]
fn test_mismatched_prices_truncate_instead_of_failing() {
    let segments = vec![
        RouteSegment::new(
            Location::new("A", depart()),
            Location::new("X", depart() + ChronoDuration::hours(1)),
        ),
        RouteSegment::new(
            Location::new("X", depart() + ChronoDuration::hours(2)),
            Location::new("B", depart() + ChronoDuration::hours(3)),
        ),
    ];
    let proposal = Proposal::new(None, segments, vec![10.0], depart() + ChronoDuration::days(1)).unwrap();
    assert_eq!(proposal.segments().len(), 1);
    assert_eq!(proposal.prices(), &[10.0]);
    assert_eq!(proposal.destination().name, "X");
}
