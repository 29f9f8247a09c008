//! Assembly of the engine service and its dependencies

use std::sync::Arc;

use engine::dispatch::RetryPolicy;
use engine::logic::channel::AdapterRegistry;
use engine::logic::event::EventBus;
use engine::repository::Repository;
use engine::service::{EngineService, EngineServiceParams};
use shared::error::CommonError;
use shared::libsql::establish_db_connection;
use tracing::info;
use url::Url;

pub struct CreateEngineServiceParams {
    pub db_url: Url,
    pub event_bus_capacity: usize,
}

/// Create the engine service and everything it depends on.
///
/// The returned database handle must stay alive for as long as the service
/// is in use.
pub async fn create_engine_service(
    params: CreateEngineServiceParams,
) -> Result<(libsql::Database, EngineService), CommonError> {
    info!("Establishing database connection");
    let (db, conn) = establish_db_connection(&params.db_url, Some(engine::MIGRATIONS)).await?;
    let repository = Repository::new(conn);
    info!("Database ready");

    let adapters = AdapterRegistry::new();
    channels::register_defaults(&adapters);
    info!("Channel adapters registered");

    let service = EngineService::new(EngineServiceParams {
        repository,
        event_bus: EventBus::new(params.event_bus_capacity),
        adapters: Arc::new(adapters),
        retry_policy: RetryPolicy::default(),
    });
    info!("Engine service created");

    Ok((db, service))
}
