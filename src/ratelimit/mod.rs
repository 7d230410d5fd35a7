//! Admission control: route classification, fixed-window counting and the
//! counter stores behind it.

mod key;
mod limiter;
mod redis_store;
mod rules;
mod store;
mod window;

pub use key::{client_identifier, RateLimitKey, DEFAULT_CLIENT_HEADERS, UNKNOWN_CLIENT};
pub use limiter::{
    Admission, AdmissionController, QuotaStatus, StoreErrorPolicy, DEFAULT_KEY_PREFIX,
    DEFAULT_MOUNT_PREFIX, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
};
pub use redis_store::RedisCounterStore;
pub use rules::{PolicyTable, QuotaPolicy, RouteMatch, RouteRule};
pub use store::{spawn_purge_task, CounterStore, InMemoryCounterStore};
pub use window::{Clock, FixedWindow, ManualClock, SystemClock};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{RateLimitingConfig, StoreBackend};
use crate::error::{GatewayError, Result};

/// Build the counter store selected by configuration.
///
/// Returns `None` for [`StoreBackend::None`]; the admission controller then
/// fails open. The in-memory store gets a background purge task.
pub async fn build_store(config: &RateLimitingConfig) -> Result<Option<Arc<dyn CounterStore>>> {
    match config.store {
        StoreBackend::None => {
            info!("No counter store configured, rate limiting disabled (fail-open)");
            Ok(None)
        }
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryCounterStore::new());
            spawn_purge_task(
                store.clone(),
                Duration::from_secs(config.purge_interval_secs.max(1)),
            );
            info!("Using in-memory counter store");
            let store: Arc<dyn CounterStore> = store;
            Ok(Some(store))
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                GatewayError::Config("rate_limiting.redis_url is required".to_string())
            })?;
            let store: Arc<dyn CounterStore> = Arc::new(RedisCounterStore::connect(url).await?);
            Ok(Some(store))
        }
    }
}

/// Build an admission controller from configuration and a store.
pub fn build_controller(
    config: &RateLimitingConfig,
    mount_prefix: &str,
    store: Option<Arc<dyn CounterStore>>,
) -> AdmissionController {
    AdmissionController::new(config.policies.clone(), store)
        .with_mount_prefix(mount_prefix)
        .with_key_prefix(config.key_prefix.clone())
        .with_client_headers(config.client_ip_headers.clone())
        .with_store_error_policy(config.store_error_policy)
}
