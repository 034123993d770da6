//! Process-wide wiring of the data layer.
//!
//! `DataServices` builds the token manager, record store and amendment
//! service once from configuration and tears them down together.

use crate::amendment_service::AmendmentService;
use crate::record_store::RecordStore;
use crate::token_manager::SessionTokenManager;
use bazaar_core::config::BazaarConfig;
use bazaar_core::diff::DiffEngine;
use bazaar_core::record::RecordBackend;
use bazaar_core::session::CredentialEndpoint;
use std::sync::Arc;

pub struct DataServices {
    pub tokens: SessionTokenManager,
    pub records: Arc<RecordStore>,
    pub amendments: AmendmentService,
}

impl DataServices {
    /// Wires the services with a diff engine that has no custom comparators.
    pub fn init(
        config: &BazaarConfig,
        endpoint: Arc<dyn CredentialEndpoint>,
        backend: Arc<dyn RecordBackend>,
    ) -> Self {
        Self::init_with_engine(config, endpoint, backend, DiffEngine::new())
    }

    pub fn init_with_engine(
        config: &BazaarConfig,
        endpoint: Arc<dyn CredentialEndpoint>,
        backend: Arc<dyn RecordBackend>,
        engine: DiffEngine,
    ) -> Self {
        let tokens = SessionTokenManager::new(endpoint, config.session.clone());
        let records = Arc::new(RecordStore::new(backend, Arc::new(tokens.clone())));
        let amendments = AmendmentService::new(Arc::clone(&records), engine);

        tracing::info!(
            "[DataServices] Initialized (refresh gap {:?})",
            config.session.safety_gap()
        );
        Self {
            tokens,
            records,
            amendments,
        }
    }

    /// Releases subscriptions, the refresh timer and token listeners.
    pub fn teardown(&self) {
        self.records.teardown();
        self.tokens.teardown();
        tracing::info!("[DataServices] Torn down");
    }
}
