//! JSON-over-HTTP provider gateway

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProviderError, ProviderGateway};
use crate::config::ProviderConfig;
use crate::domain::{Location, Proposal, RouteSegment, SearchRequest};
use crate::retry::RetryPolicy;

/// Search call body
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct SearchBody<'a> {
    from: &'a str,
    to: &'a str,
    date_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_time_limit: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    routes: Vec<WireRoute>,
}

/// One single-leg route as the provider reports it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WireRoute {
    from: String,
    to: String,
    date_from: DateTime<Utc>,
    date_to: DateTime<Utc>,
    price: f64,
    time_limit: DateTime<Utc>,
}

/// Gateway for providers exposing `GET {base}ping` and `POST {base}search`
pub struct HttpGateway {
    id: String,
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpGateway {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let id = id.into();
        let mut base_url = base_url.into();
        debug!(%id, %base_url, ?timeout, "HttpGateway::new: called");
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProviderError::Config(format!("base-url must be http(s): {base_url}")));
        }
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            base_url,
            http,
            timeout,
            retry,
        })
    }

    pub fn from_config(config: &ProviderConfig, retry: RetryPolicy) -> Result<Self, ProviderError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ProviderError::Config(format!("provider {} has no base-url", config.id)))?;
        Self::new(&config.id, base_url, Duration::from_millis(config.timeout_ms), retry)
    }

    async fn search_once(&self, url: &str, body: &SearchBody<'_>) -> Result<SearchReply, ProviderError> {
        let response = self.http.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(provider = %self.id, status, "HttpGateway::search_once: error status");
            return Err(ProviderError::Http { status, message });
        }

        response
            .json::<SearchReply>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

fn search_body(request: &SearchRequest) -> SearchBody<'_> {
    SearchBody {
        from: &request.origin,
        to: &request.destination,
        date_from: request.origin_time,
        date_to: request.destination_time(),
        max_price: request.max_price(),
        min_time_limit: request.min_valid_until(),
    }
}

fn to_proposal(user_id: &str, route: WireRoute) -> Result<Proposal, ProviderError> {
    Proposal::new(
        Some(user_id.to_string()),
        vec![RouteSegment::new(
            Location::new(route.from, route.date_from),
            Location::new(route.to, route.date_to),
        )],
        vec![route.price],
        route.time_limit,
    )
    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self) -> bool {
        let url = format!("{}ping", self.base_url);
        debug!(provider = %self.id, %url, "HttpGateway::probe: called");
        match self.http.get(&url).send().await {
            Ok(response) => match response.status().as_u16() {
                200 => true,
                500 => false,
                other => {
                    warn!(provider = %self.id, status = other, "HttpGateway::probe: unexpected status");
                    false
                }
            },
            Err(e) => {
                warn!(provider = %self.id, error = %e, "HttpGateway::probe: request failed");
                false
            }
        }
    }

    async fn search(&self, user_id: &str, request: &SearchRequest) -> Result<Vec<Proposal>, ProviderError> {
        debug!(provider = %self.id, user_id, "HttpGateway::search: called");
        let url = format!("{}search", self.base_url);
        let body = search_body(request);
        let url = url.as_str();
        let body = &body;

        let reply = self
            .retry
            .run("HttpGateway::search", move || self.search_once(url, body))
            .await?;

        reply.routes.into_iter().map(|route| to_proposal(user_id, route)).collect()
    }
}
