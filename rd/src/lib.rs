//! RouteDaemon - scatter-gather route search
//!
//! A search fans out to every provider in the roster through a partitioned
//! event log. Provider answers are folded twice: per request, into a pending
//! set and response collection that tell a waiting caller when everyone has
//! answered; and for good, into a SQLite proposal cache that can answer
//! cache-only searches without any fan-out.
//!
//! # Modules
//!
//! - [`domain`] - proposals, search requests and responses
//! - [`events`] - event log capability, in-process log, consumer loop
//! - [`store`] - correlation store and notification bus
//! - [`providers`] - gateways, roster and provider workers
//! - [`dispatcher`] - fan-out or cache answer per search
//! - [`collector`] - records responses, detects completion
//! - [`model`] - folds responses into the proposal cache
//! - [`cache`] - proposal index and cache-only queries
//! - [`waiter`] - caller-side wait with deadline
//! - [`client`] - publish a search and wait for it
//! - [`daemon`] - wires everything into one process
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cache;
pub mod cli;
pub mod client;
pub mod collector;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod model;
pub mod providers;
pub mod retry;
pub mod store;
pub mod waiter;

// Re-export commonly used types
pub use cache::{CachePredicate, CacheQueryEngine, IndexError, ProposalIndex, QueryError};
pub use client::{ClientError, SearchClient};
pub use collector::{CollectError, CollectOutcome, ResponseCollector};
pub use config::{Config, ProviderConfig, ProviderKind};
pub use daemon::Daemon;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use domain::{
    Completion, Location, Proposal, ProposalError, ResponseStats, RouteSegment, SearchFilters, SearchRequest,
    SearchResponse,
};
pub use events::{EventLog, EventLogError, InMemoryEventLog};
pub use model::ModelBuilder;
pub use providers::{ProviderError, ProviderGateway, ProviderRoster, RosterError, create_gateway};
pub use retry::RetryPolicy;
pub use store::{CorrelationStore, Correlations, InMemoryStore, NotificationBus, StatusNotification, StoreError};
pub use waiter::{CompletionWaiter, PendingSearch};
