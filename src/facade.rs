//! The process-wide default [`Manager`] plus its free-function mirrors, and
//! a companion service factory registry so modules can self-register
//! startable services without importing each other.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::core::types::stringy::Stringy;

use crate::manager::{Manager, ProcessConfig};

fn default_manager() -> &'static Manager {
    static MANAGER: OnceLock<Manager> = OnceLock::new();
    MANAGER.get_or_init(Manager::new)
}

pub async fn register(config: ProcessConfig) -> Result<(), ErrorArrayItem> {
    default_manager().register(config).await
}

pub async fn register_and_start(config: ProcessConfig) -> Result<(), ErrorArrayItem> {
    let name = config.name.clone();
    default_manager().register(config).await?;
    default_manager().start(&name).await
}

pub async fn start(name: &str) -> Result<(), ErrorArrayItem> {
    default_manager().start(name).await
}

pub async fn stop(name: &str) -> Result<(), ErrorArrayItem> {
    default_manager().stop(name).await
}

pub async fn restart(name: &str) -> Result<(), ErrorArrayItem> {
    default_manager().restart(name).await
}

pub async fn is_running(name: &str) -> bool {
    default_manager().is_running(name).await
}

pub async fn stop_all() -> Result<(), ErrorArrayItem> {
    default_manager().stop_all().await
}

pub async fn get_all_status() -> Result<HashMap<String, String>, ErrorArrayItem> {
    default_manager().all_status().await
}

pub async fn register_group(name: &str, members: Vec<Stringy>) -> Result<(), ErrorArrayItem> {
    default_manager().add_group(name, members).await
}

pub async fn start_group(name: &str) -> Result<(), ErrorArrayItem> {
    default_manager().start_group(name).await
}

pub async fn stop_group(name: &str) -> Result<(), ErrorArrayItem> {
    default_manager().stop_group(name).await
}

/// Gives callers that need more than the free-function mirrors (e.g. to
/// call `set_bus`) a handle to the same process-wide Manager.
pub fn manager() -> Manager {
    default_manager().clone()
}

/// Zero-argument callable a module registers so the CLI or another
/// bootstrap path can start it by name without importing it directly.
pub type ServiceFactory = Arc<dyn Fn() -> futures_util::future::BoxFuture<'static, Result<(), ErrorArrayItem>> + Send + Sync>;

fn service_registry() -> &'static LockWithTimeout<HashMap<Stringy, ServiceFactory>> {
    static REGISTRY: OnceLock<LockWithTimeout<HashMap<Stringy, ServiceFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| LockWithTimeout::new(HashMap::new()))
}

const REGISTRY_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub async fn register_service(name: &str, factory: ServiceFactory) -> Result<(), ErrorArrayItem> {
    let mut registry = service_registry()
        .try_write_with_timeout(Some(REGISTRY_LOCK_TIMEOUT))
        .await?;
    registry.insert(Stringy::new(name), factory);
    Ok(())
}

pub async fn start_service(name: &str) -> Result<(), ErrorArrayItem> {
    let factory = {
        let registry = service_registry()
            .try_read_with_timeout(Some(REGISTRY_LOCK_TIMEOUT))
            .await?;
        registry
            .get(&Stringy::new(name))
            .cloned()
            .ok_or_else(|| ErrorArrayItem::new(Errors::GeneralError, format!("unknown service: {}", name)))?
    };
    factory().await
}

pub async fn get_available_services() -> Result<Vec<String>, ErrorArrayItem> {
    let registry = service_registry()
        .try_read_with_timeout(Some(REGISTRY_LOCK_TIMEOUT))
        .await?;
    Ok(registry.keys().map(|name| name.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dusa_collection_utils::core::types::pathtype::PathType;

    #[tokio::test]
    async fn register_and_status_round_trip_through_the_singleton() {
        let config = ProcessConfig::new("facade-test-echo", PathType::Str("/bin/echo".into()), vec!["hi".into()]);
        register(config).await.expect("register should succeed");
        let statuses = get_all_status().await.expect("status snapshot should succeed");
        assert!(statuses.contains_key("facade-test-echo"));
    }

    #[tokio::test]
    async fn service_registry_round_trips_a_factory() {
        register_service(
            "noop",
            Arc::new(|| Box::pin(async { Ok(()) })),
        )
        .await
        .expect("registering a factory should succeed");

        assert!(get_available_services().await.unwrap().contains(&"noop".to_string()));
        start_service("noop").await.expect("starting the noop service should succeed");
    }
}
