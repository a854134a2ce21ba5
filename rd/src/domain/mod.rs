//! Domain types shared by every component
//!
//! - [`Proposal`] - a provider's priced, time-limited route
//! - [`SearchRequest`] - what a caller asks for
//! - [`SearchResponse`] - what a caller gets back

mod proposal;
mod request;
mod response;

pub use proposal::{Location, Proposal, ProposalError, RouteSegment};
pub use request::{SearchFilters, SearchRequest};
pub use response::{Completion, ResponseStats, SearchResponse};
