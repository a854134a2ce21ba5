//! Shared correlation state
//!
//! The pending-provider set and response collection of every request live in
//! a key-value store reached through [`CorrelationStore`]; status updates for
//! waiting callers flow through [`NotificationBus`]. [`Correlations`] wraps
//! both with the per-request key layout.

mod correlation;
mod error;
pub mod keys;
mod memory;
mod notification;
mod traits;

pub use correlation::{CorrelationConfig, Correlations};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, sweep_expired};
pub use notification::StatusNotification;
pub use traits::{CorrelationStore, NotificationBus, SetRemoval, Subscription};
