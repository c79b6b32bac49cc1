//! Estado compartido de la aplicación
//!
//! Este módulo define el estado que se pasa a través del router de Axum.
//! El almacén se elige al arrancar (Postgres o memoria) y los motores lo
//! reciben ya envuelto en `Arc<dyn RecordStore>`. Motor de transiciones y
//! servicio de trámites comparten los mismos candados por trámite.

use std::sync::Arc;

use crate::config::environment::EnvironmentConfig;
use crate::middleware::auth::{AuthorizationGuard, RoleGuard};
use crate::repositories::record_store::RecordStore;
use crate::services::history_engine::HistoryEngine;
use crate::services::notification_bus::NotificationBus;
use crate::services::presence::PresenceRegistry;
use crate::services::record_locks::RecordLocks;
use crate::services::tramite_service::TramiteService;
use crate::services::transition_engine::TransitionEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: EnvironmentConfig,
    pub bus: NotificationBus,
    pub presence: Arc<PresenceRegistry>,
    pub transitions: Arc<TransitionEngine>,
    pub history: Arc<HistoryEngine>,
    pub tramites: Arc<TramiteService>,
    pub guard: Arc<dyn AuthorizationGuard>,
}

impl AppState {
    pub fn new(config: EnvironmentConfig, store: Arc<dyn RecordStore>) -> Self {
        let bus = NotificationBus::new(config.notify_queue_capacity);
        let notifier = Arc::new(bus.clone());
        let locks = Arc::new(RecordLocks::new());

        Self {
            transitions: Arc::new(TransitionEngine::new(
                store.clone(),
                notifier.clone(),
                locks.clone(),
            )),
            history: Arc::new(HistoryEngine::new(store.clone())),
            tramites: Arc::new(TramiteService::new(store, notifier, locks)),
            presence: Arc::new(PresenceRegistry::new(bus.clone())),
            guard: Arc::new(RoleGuard::staff()),
            config,
            bus,
        }
    }
}
