//! ProviderGateway trait definition

use async_trait::async_trait;

use super::ProviderError;
use crate::domain::{Proposal, SearchRequest};

/// Transport to one external provider
///
/// Turns a generic search into a provider-native call and maps the answer
/// back to proposals.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Whether the provider can take a search right now
    async fn probe(&self) -> bool;

    /// Run a search for `user_id`; an empty result is a valid answer
    async fn search(&self, user_id: &str, request: &SearchRequest) -> Result<Vec<Proposal>, ProviderError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing::debug;

    /// Gateway that replays scripted answers
    pub struct MockGateway {
        id: String,
        available: AtomicBool,
        answers: Mutex<VecDeque<Result<Vec<Proposal>, String>>>,
        probes: AtomicUsize,
        searches: AtomicUsize,
    }

    impl MockGateway {
        pub fn new(id: &str, answers: Vec<Result<Vec<Proposal>, String>>) -> Self {
            debug!(id, answers = answers.len(), "MockGateway::new: called");
            Self {
                id: id.to_string(),
                available: AtomicBool::new(true),
                answers: Mutex::new(answers.into()),
                probes: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
            }
        }

        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        pub fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        pub fn search_count(&self) -> usize {
            self.searches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderGateway for MockGateway {
        fn provider_id(&self) -> &str {
            &self.id
        }

        async fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.available.load(Ordering::SeqCst)
        }

        async fn search(&self, _user_id: &str, _request: &SearchRequest) -> Result<Vec<Proposal>, ProviderError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            let next = self.answers.lock().unwrap().pop_front();
            match next {
                Some(Ok(proposals)) => Ok(proposals),
                Some(Err(message)) => Err(ProviderError::InvalidResponse(message)),
                None => Ok(Vec::new()),
            }
        }
    }
}
