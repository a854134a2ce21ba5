//! Long-lived proposal cache: SQLite index plus the cache-only query path

mod index;
mod query;

pub use index::{IndexError, IndexResult, ProposalIndex};
pub use query::{CachePredicate, CacheQueryEngine, QueryError};
