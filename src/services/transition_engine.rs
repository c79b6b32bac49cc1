//! Motor de transiciones
//!
//! Ejecuta un `TransitionCommand` contra el almacén (lectura con bloqueo,
//! verificación de módulo, efectos, historial, todo en una transacción) y,
//! solo después de confirmar, publica dos eventos: `deleted` en el módulo
//! origen y `created` con la proyección en el módulo destino.
//!
//! El candado del trámite se mantiene desde la escritura hasta la
//! publicación, de modo que dos transiciones seguidas del mismo trámite
//! publican en el orden en que se confirmaron. El límite de tiempo lo
//! impone el almacén; aquí nunca se cancela una escritura en curso.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::models::history::Actor;
use crate::models::projection::{Projection, RemovedView};
use crate::models::tramite::{Module, Tramite};
use crate::models::transition::{TransitionCommand, TransitionPayload, Trigger};
use crate::repositories::record_store::RecordStore;
use crate::services::notification_bus::{ChangeKind, EventType, Notifier, Topic};
use crate::services::record_locks::RecordLocks;
use crate::utils::errors::AppResult;

/// Resultado de una transición confirmada
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub tramite: Tramite,
    pub from: Module,
    pub to: Module,
    pub projection: Projection,
}

pub struct TransitionEngine {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<RecordLocks>,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<RecordLocks>,
    ) -> Self {
        Self {
            store,
            notifier,
            locks,
        }
    }

    pub async fn execute(
        &self,
        id: i64,
        command: TransitionCommand,
        actor: &Actor,
    ) -> AppResult<TransitionResult> {
        let _guard = self.locks.lock(id).await;
        let tramite = self.store.apply_transition(id, &command, actor).await?;

        let from = command.source();
        let to = command.destination();
        info!(
            "🔀 Trámite {} ({}) movido de {} a {} por {}",
            tramite.id, tramite.plate, from, to, actor
        );

        let projection = Projection::for_module(&tramite, to, Utc::now().date_naive());
        self.notify(&tramite, from, &projection).await;

        Ok(TransitionResult {
            tramite,
            from,
            to,
            projection,
        })
    }

    async fn notify(&self, tramite: &Tramite, from: Module, projection: &Projection) {
        let removed = RemovedView::new(tramite, from);
        self.notifier
            .publish(
                &Topic::Module(from),
                EventType::new(from, ChangeKind::Deleted),
                json!(removed),
            )
            .await;

        let to = projection.module();
        self.notifier
            .publish(
                &Topic::Module(to),
                EventType::new(to, ChangeKind::Created),
                json!(projection),
            )
            .await;
    }

    pub async fn send_to_tracker(
        &self,
        id: i64,
        payload: TransitionPayload,
        actor: &Actor,
    ) -> AppResult<TransitionResult> {
        let command = TransitionCommand::new(Module::Preparation, Trigger::SendToTracker, payload)?;
        self.execute(id, command, actor).await
    }

    /// Finaliza desde Preparación, Tracker o Archivadas
    pub async fn finalize(
        &self,
        source: Module,
        id: i64,
        payload: TransitionPayload,
        actor: &Actor,
    ) -> AppResult<TransitionResult> {
        let command = TransitionCommand::new(source, Trigger::Finalize, payload)?;
        self.execute(id, command, actor).await
    }

    pub async fn archive(&self, id: i64, actor: &Actor) -> AppResult<TransitionResult> {
        let command =
            TransitionCommand::new(Module::Finalized, Trigger::Archive, TransitionPayload::default())?;
        self.execute(id, command, actor).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::history::Operation;
    use crate::utils::errors::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use crate::models::tramite::{NewTramite, Status, TrackerStatus, VehicleType};
    use crate::repositories::memory_store::MemoryRecordStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;
    use tokio::sync::Mutex;

    /// Notifier que guarda lo publicado
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, topic: &Topic, event_type: EventType, payload: Value) {
            self.events
                .lock()
                .await
                .push((topic.to_string(), event_type.to_string(), payload));
        }
    }

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        notifier: Arc<RecordingNotifier>,
        engine: TransitionEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::seeded());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = TransitionEngine::new(
            store.clone(),
            notifier.clone(),
            Arc::new(RecordLocks::new()),
        );
        Fixture {
            store,
            notifier,
            engine,
        }
    }

    async fn create(store: &MemoryRecordStore, plate: &str) -> Tramite {
        store
            .create_tramite(
                NewTramite {
                    plate: plate.to_string(),
                    vehicle_type: VehicleType::Car,
                    department_id: 5,
                    municipality_id: 1,
                    status: Status::ReadyForFiling,
                    package: None,
                    document_checklist: Default::default(),
                    created_by: Some("ana".to_string()),
                },
                &Actor::resolve(Some("ana")),
            )
            .await
            .unwrap()
    }

    fn ana() -> Actor {
        Actor::resolve(Some("ana"))
    }

    #[tokio::test]
    async fn test_send_to_tracker_sets_payload_and_notifies_twice() {
        let f = fixture();
        let tramite = create(&f.store, "ABC123").await;

        let result = f
            .engine
            .send_to_tracker(
                tramite.id,
                TransitionPayload {
                    provider_id: Some(1),
                    received_date: NaiveDate::from_ymd_opt(2025, 1, 1),
                    status_detail: None,
                },
                &ana(),
            )
            .await
            .unwrap();

        assert_eq!(result.from, Module::Preparation);
        assert_eq!(result.to, Module::Tracker);
        assert_eq!(result.tramite.tracker_status, TrackerStatus::InFiling);
        assert_eq!(result.tramite.provider_id, Some(1));

        let events = f.notifier.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "module:Preparation");
        assert_eq!(events[0].1, "preparation_deleted");
        assert_eq!(events[0].2["id"], tramite.id);
        assert_eq!(events[1].0, "module:Tracker");
        assert_eq!(events[1].1, "tracker_created");
        assert_eq!(events[1].2["received_date"], "2025-01-01");
        assert_eq!(events[1].2["module"], "Tracker");
    }

    #[tokio::test]
    async fn test_full_cycle_through_every_table_entry() {
        let f = fixture();
        let direct = create(&f.store, "DIR001").await;
        let tramite = create(&f.store, "CYC001").await;

        f.engine
            .finalize(Module::Preparation, direct.id, TransitionPayload::default(), &ana())
            .await
            .unwrap();

        f.engine
            .send_to_tracker(tramite.id, TransitionPayload::default(), &ana())
            .await
            .unwrap();
        let finalized = f
            .engine
            .finalize(
                Module::Tracker,
                tramite.id,
                TransitionPayload {
                    status_detail: Some("placa entregada".to_string()),
                    ..Default::default()
                },
                &ana(),
            )
            .await
            .unwrap();
        assert_eq!(finalized.tramite.status, Status::Finalized);
        assert_eq!(finalized.tramite.tracker_status, TrackerStatus::Finalized);

        let archived = f.engine.archive(tramite.id, &ana()).await.unwrap();
        assert_eq!(archived.tramite.module, Module::Archived);
        assert_eq!(archived.tramite.status_detail.as_deref(), Some("placa entregada"));

        let back = f
            .engine
            .finalize(
                Module::Archived,
                tramite.id,
                TransitionPayload {
                    status_detail: Some("reabierto".to_string()),
                    ..Default::default()
                },
                &ana(),
            )
            .await
            .unwrap();
        assert_eq!(back.tramite.module, Module::Finalized);
        assert_eq!(back.tramite.status_detail.as_deref(), Some("reabierto"));

        // 1 transición directa + 4 del ciclo, dos eventos cada una
        assert_eq!(f.notifier.events.lock().await.len(), 10);
    }

    #[tokio::test]
    async fn test_wrong_module_is_state_conflict_without_side_effects() {
        let f = fixture();
        let tramite = create(&f.store, "ABC123").await;
        f.engine
            .send_to_tracker(tramite.id, TransitionPayload::default(), &ana())
            .await
            .unwrap();
        let before = f.store.find_tramite(tramite.id).await.unwrap().unwrap();
        let history_before = f.store.history_for_record(tramite.id).await.unwrap().len();
        f.notifier.events.lock().await.clear();

        let err = f.engine.archive(tramite.id, &ana()).await.unwrap_err();
        match err {
            AppError::StateConflict { expected, actual, .. } => {
                assert_eq!(expected, Module::Finalized);
                assert_eq!(actual, Module::Tracker);
            }
            other => panic!("se esperaba StateConflict, llegó {:?}", other),
        }

        let after = f.store.find_tramite(tramite.id).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(
            f.store.history_for_record(tramite.id).await.unwrap().len(),
            history_before
        );
        assert!(f.notifier.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .send_to_tracker(404, TransitionPayload::default(), &ana())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(f.notifier.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_pair_outside_table_is_validation() {
        let f = fixture();
        let err = f
            .engine
            .finalize(Module::Finalized, 1, TransitionPayload::default(), &ana())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_history_failure_aborts_transition_and_publishes_nothing() {
        let f = fixture();
        let tramite = create(&f.store, "ABC123").await;
        f.store.fail_next_history_write().await;

        let err = f
            .engine
            .send_to_tracker(tramite.id, TransitionPayload::default(), &ana())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(_)));

        let current = f.store.find_tramite(tramite.id).await.unwrap().unwrap();
        assert_eq!(current.module, Module::Preparation);
        assert!(f.notifier.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_finalize_only_one_wins() {
        let f = fixture();
        let tramite = create(&f.store, "ABC123").await;
        f.engine
            .send_to_tracker(tramite.id, TransitionPayload::default(), &ana())
            .await
            .unwrap();
        let engine = Arc::new(f.engine);
        let id = tramite.id;

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .finalize(Module::Tracker, id, TransitionPayload::default(), &ana())
                    .await
            })
        };
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .finalize(Module::Tracker, id, TransitionPayload::default(), &ana())
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::StateConflict { actual: Module::Finalized, .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);

        let updates = f
            .store
            .history_for_record(tramite.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == Operation::Update)
            .count();
        // send-to-tracker + un solo finalize
        assert_eq!(updates, 2);
    }

    /// Demora solo la primera publicación que recibe
    #[derive(Default)]
    struct SlowFirstNotifier {
        recorded: RecordingNotifier,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl Notifier for SlowFirstNotifier {
        async fn publish(&self, topic: &Topic, event_type: EventType, payload: Value) {
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.recorded.publish(topic, event_type, payload).await;
        }
    }

    #[tokio::test]
    async fn test_events_of_one_record_follow_commit_order() {
        let store = Arc::new(MemoryRecordStore::seeded());
        let tramite = create(&store, "ABC123").await;
        let to_tracker = TransitionCommand::new(
            Module::Preparation,
            Trigger::SendToTracker,
            TransitionPayload::default(),
        )
        .unwrap();
        store.apply_transition(tramite.id, &to_tracker, &ana()).await.unwrap();

        let notifier = Arc::new(SlowFirstNotifier::default());
        let engine = Arc::new(TransitionEngine::new(
            store.clone(),
            notifier.clone(),
            Arc::new(RecordLocks::new()),
        ));
        let id = tramite.id;

        let finalize = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .finalize(Module::Tracker, id, TransitionPayload::default(), &ana())
                    .await
            })
        };

        // el finalize ya confirmó y está publicando
        for _ in 0..500 {
            if store.find_tramite(id).await.unwrap().unwrap().module == Module::Finalized {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        engine.archive(id, &ana()).await.unwrap();
        finalize.await.unwrap().unwrap();

        let published: Vec<String> = notifier
            .recorded
            .events
            .lock()
            .await
            .iter()
            .map(|(topic, kind, _)| format!("{} {}", topic, kind))
            .collect();
        assert_eq!(
            published,
            vec![
                "module:Tracker tracker_deleted",
                "module:Finalized finalized_created",
                "module:Finalized finalized_deleted",
                "module:Archived archived_created",
            ]
        );
        assert_eq!(
            store.find_tramite(id).await.unwrap().unwrap().module,
            Module::Archived
        );
    }

    #[tokio::test]
    async fn test_module_is_checked_before_provider() {
        let f = fixture();
        let tramite = create(&f.store, "ABC123").await;
        f.engine
            .send_to_tracker(tramite.id, TransitionPayload::default(), &ana())
            .await
            .unwrap();

        let err = f
            .engine
            .send_to_tracker(
                tramite.id,
                TransitionPayload {
                    provider_id: Some(999),
                    ..Default::default()
                },
                &ana(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::StateConflict {
                actual: Module::Tracker,
                ..
            }
        ));
    }
}
