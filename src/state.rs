use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics::Metrics;
use crate::service::carrier_requests::CarrierRequestService;
use crate::service::parcels::ParcelService;
use crate::store::memory::InMemoryStore;
use crate::store::{Gateway, ParcelRepository};

pub struct AppState {
    pub parcels: ParcelService,
    pub carrier_requests: CarrierRequestService,
    pub repo: Arc<dyn ParcelRepository>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        repo: Arc<dyn ParcelRepository>,
        assign_timeout: Duration,
    ) -> Self {
        let metrics = Metrics::new();

        Self {
            parcels: ParcelService::new(repo.clone(), metrics.clone()),
            carrier_requests: CarrierRequestService::new(gateway, assign_timeout, metrics.clone()),
            repo,
            metrics,
        }
    }

    /// State over a fresh in-memory store.
    pub fn in_memory(assign_timeout: Duration) -> (Self, InMemoryStore) {
        let store = InMemoryStore::new();
        let state = Self::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            assign_timeout,
        );
        (state, store)
    }
}
