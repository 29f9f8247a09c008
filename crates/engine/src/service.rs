//! Service layer for the conversation engine
//! Provides the main service struct that holds all dependencies for engine
//! operations

use std::sync::Arc;

use crate::{
    dispatch::RetryPolicy,
    logic::{channel::AdapterRegistry, conversation::PairLocks, event::EventBus},
    repository::Repository,
};

/// Main service struct for engine operations
/// Holds all dependencies needed for ingestion, dispatch, conversation, and
/// integration operations
#[derive(Clone)]
pub struct EngineService {
    pub repository: Repository,
    pub event_bus: EventBus,
    /// Channel adapters, one per connected channel kind
    pub adapters: Arc<AdapterRegistry>,
    /// Per-pair locks serializing inbound ingestion
    pub pair_locks: Arc<PairLocks>,
    /// Backoff budget for outbound dispatch
    pub retry_policy: RetryPolicy,
}

/// Parameters for creating an EngineService
pub struct EngineServiceParams {
    pub repository: Repository,
    pub event_bus: EventBus,
    pub adapters: Arc<AdapterRegistry>,
    pub retry_policy: RetryPolicy,
}

impl EngineService {
    /// Create a new EngineService instance
    pub fn new(params: EngineServiceParams) -> Self {
        Self {
            repository: params.repository,
            event_bus: params.event_bus,
            adapters: params.adapters,
            pair_locks: Arc::new(PairLocks::new()),
            retry_policy: params.retry_policy,
        }
    }
}
