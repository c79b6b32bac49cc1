pub mod history_engine;
pub mod notification_bus;
pub mod presence;
pub mod record_locks;
pub mod tramite_service;
pub mod transition_engine;

pub use history_engine::HistoryEngine;
pub use notification_bus::NotificationBus;
pub use presence::PresenceRegistry;
pub use record_locks::RecordLocks;
pub use tramite_service::TramiteService;
pub use transition_engine::TransitionEngine;
