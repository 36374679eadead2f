//! Application state management
//!
//! Dependency-injection container wiring the storage backend, the frozen
//! error-response registry, and the identity extractor into the handlers.

use actix_web::HttpRequest;
use log::info;
use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::errors::ErrorRegistry;
use crate::storage::disk_store::DiskStore;
use crate::storage::mock_store::MockFileStore;
use crate::storage::FileStorage;

/// Resolves the caller identity for a request. Injected so deployments can
/// plug in their own authentication without touching the handlers.
pub type IdentityExtractor = Arc<dyn Fn(&HttpRequest) -> Option<String> + Send + Sync>;

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn FileStorage>,
    pub registry: Arc<ErrorRegistry>,
    pub identity: IdentityExtractor,
    pub config: AppConfig,
}

impl AppState {
    /// State configured from `config.yaml`.
    pub fn new() -> Self {
        let config = AppConfig::load().expect("Failed to load configuration");
        Self::from_config(config)
    }

    /// Build the state from a configuration. The error registry is seeded
    /// with the base catalog, extended by the storage backend's validation
    /// registrations, then frozen.
    pub fn from_config(config: AppConfig) -> Self {
        info!("Initializing application state");
        let mut registry = ErrorRegistry::new();

        let storage: Arc<dyn FileStorage> = match config.storage.backend {
            StorageBackend::Disk => {
                info!("Using disk storage backend in {}", config.storage.directory);
                Arc::new(DiskStore::new(&config.storage, &mut registry))
            }
            StorageBackend::Mock => {
                info!("Using mock storage backend");
                Arc::new(MockFileStore::new())
            }
        };

        Self {
            storage,
            registry: Arc::new(registry),
            identity: default_identity(),
            config,
        }
    }

    /// State over an injected storage backend; used by tests that need to
    /// inspect the backend afterwards.
    pub fn with_storage(storage: Arc<dyn FileStorage>, config: AppConfig) -> Self {
        Self {
            storage,
            registry: Arc::new(ErrorRegistry::new()),
            identity: default_identity(),
            config,
        }
    }

    /// State with an in-memory backend and default configuration.
    pub fn new_for_testing() -> Self {
        Self::with_storage(Arc::new(MockFileStore::new()), AppConfig::default())
    }

    /// Replace the identity extractor.
    pub fn with_identity(mut self, identity: IdentityExtractor) -> Self {
        self.identity = identity;
        self
    }
}

/// Default identity extractor: the `User` request header.
fn default_identity() -> IdentityExtractor {
    Arc::new(|req: &HttpRequest| {
        req.headers()
            .get("User")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_default_identity_reads_user_header() {
        let state = AppState::new_for_testing();
        let req = TestRequest::default()
            .insert_header(("User", "alice"))
            .to_http_request();
        assert_eq!((state.identity)(&req), Some("alice".to_string()));
    }

    #[test]
    fn test_default_identity_missing_header() {
        let state = AppState::new_for_testing();
        let req = TestRequest::default().to_http_request();
        assert_eq!((state.identity)(&req), None);
    }

    #[test]
    fn test_custom_identity_extractor() {
        let state = AppState::new_for_testing()
            .with_identity(Arc::new(|_req| Some("fixed".to_string())));
        let req = TestRequest::default().to_http_request();
        assert_eq!((state.identity)(&req), Some("fixed".to_string()));
    }
}
