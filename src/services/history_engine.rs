//! Motor de historial
//!
//! Construye los snapshots que el almacén escribe junto con cada mutación,
//! calcula diferencias campo a campo entre snapshots consecutivos de una
//! misma entidad y arma la línea de tiempo de un trámite con sus archivos.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::models::attachment::Attachment;
use crate::models::history::{
    Actor, EntityKind, FieldChange, HistoryEntry, NewHistoryEntry, Operation, Snapshot,
};
use crate::models::tramite::Tramite;
use crate::repositories::record_store::RecordStore;
use crate::utils::errors::{AppError, AppResult};

/// Campos que no se guardan en el snapshot: la marca de tiempo de la entrada ya los cubre
const UNTRACKED_FIELDS: [&str; 1] = ["updated_at"];

/// Entidades con historial propio
pub trait Snapshotable: Serialize {
    fn entity_kind(&self) -> EntityKind;
    fn entity_id(&self) -> i64;
    /// Trámite al que pertenece la entidad
    fn owner_record_id(&self) -> i64;

    fn snapshot(&self) -> AppResult<Snapshot> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(fields
                .into_iter()
                .filter(|(field, _)| !UNTRACKED_FIELDS.contains(&field.as_str()))
                .collect()),
            Ok(_) => Err(AppError::Store(
                "el snapshot de la entidad no es un objeto".to_string(),
            )),
            Err(e) => Err(AppError::Store(format!("no se pudo serializar el snapshot: {}", e))),
        }
    }
}

impl Snapshotable for Tramite {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::Record
    }

    fn entity_id(&self) -> i64 {
        self.id
    }

    fn owner_record_id(&self) -> i64 {
        self.id
    }
}

impl Snapshotable for Attachment {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::Attachment
    }

    fn entity_id(&self) -> i64 {
        self.id
    }

    fn owner_record_id(&self) -> i64 {
        self.record_id
    }
}

/// Evento de la línea de tiempo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub seq: i32,
    pub operation: Operation,
    pub description: String,
    pub changes: Vec<FieldChange>,
}

/// Respuesta de `GET /api/tramites/:id/timeline`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub record_id: i64,
    pub total_events: usize,
    pub timeline: Vec<TimelineEvent>,
}

pub struct HistoryEngine {
    store: Arc<dyn RecordStore>,
}

impl HistoryEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Prepara la entrada de historial de una mutación ya aplicada.
    /// El almacén la escribe en la misma transacción que la mutación.
    pub fn record_snapshot<E: Snapshotable>(
        entity: &E,
        operation: Operation,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> AppResult<NewHistoryEntry> {
        Ok(NewHistoryEntry {
            entity_kind: entity.entity_kind(),
            entity_id: entity.entity_id(),
            record_id: entity.owner_record_id(),
            recorded_at: at,
            actor: actor.clone(),
            operation,
            snapshot: entity.snapshot()?,
        })
    }

    /// Campos que difieren entre `before` y `after`. Una llave ausente cuenta como `null`.
    pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FieldChange> {
        let fields: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

        fields
            .into_iter()
            .filter_map(|field| {
                let old = before.get(field).unwrap_or(&Value::Null);
                let new = after.get(field).unwrap_or(&Value::Null);
                (old != new).then(|| FieldChange {
                    field: field.clone(),
                    old: old.clone(),
                    new: new.clone(),
                })
            })
            .collect()
    }

    /// Reconstruye el último snapshot de una entidad aplicando los diffs en orden
    pub fn replay(entries: &[HistoryEntry]) -> Option<Snapshot> {
        let mut ordered: Vec<&HistoryEntry> = entries.iter().collect();
        ordered.sort_by_key(|entry| entry.seq);

        let mut state = ordered.first()?.snapshot.clone();
        for pair in ordered.windows(2) {
            let (before, after) = (&pair[0].snapshot, &pair[1].snapshot);
            for change in Self::diff(before, after) {
                state.insert(change.field, change.new);
            }
            // el diff no distingue una llave quitada de un null
            state.retain(|field, _| after.contains_key(field) || !before.contains_key(field));
        }
        Some(state)
    }

    /// Une entradas de varias entidades en una línea de tiempo, lo más nuevo primero.
    /// Cada entrada se compara solo con su predecesora de la misma entidad.
    pub fn build_timeline(entries: Vec<HistoryEntry>) -> Vec<TimelineEvent> {
        let mut by_entity: BTreeMap<(EntityKind, i64), Vec<HistoryEntry>> = BTreeMap::new();
        for entry in entries {
            by_entity
                .entry((entry.entity_kind, entry.entity_id))
                .or_default()
                .push(entry);
        }

        let mut events = Vec::new();
        for (_, mut history) in by_entity {
            history.sort_by_key(|entry| entry.seq);
            let mut previous: Option<&Snapshot> = None;
            for entry in &history {
                let changes = match previous {
                    Some(before) => Self::diff(before, &entry.snapshot),
                    None => Vec::new(),
                };
                events.push(TimelineEvent {
                    timestamp: entry.recorded_at,
                    actor: entry.actor.clone(),
                    entity_kind: entry.entity_kind,
                    entity_id: entry.entity_id,
                    seq: entry.seq,
                    operation: entry.operation,
                    description: describe(entry, &changes),
                    changes,
                });
                previous = Some(&entry.snapshot);
            }
        }

        events.sort_by_key(|event| {
            (
                Reverse(event.timestamp),
                Reverse(event.seq),
                event.entity_kind,
                event.entity_id,
            )
        });
        events
    }

    /// Línea de tiempo de un trámite y de todos los archivos que tuvo.
    /// Sin entradas devuelve una lista vacía, no un error.
    pub async fn timeline(&self, record_id: i64) -> AppResult<Timeline> {
        let entries = self.store.history_for_record(record_id).await?;
        debug!("📜 {} entradas de historial para el trámite {}", entries.len(), record_id);

        let timeline = Self::build_timeline(entries);
        Ok(Timeline {
            record_id,
            total_events: timeline.len(),
            timeline,
        })
    }
}

fn snapshot_text<'a>(snapshot: &'a Snapshot, field: &str) -> &'a str {
    snapshot.get(field).and_then(Value::as_str).unwrap_or("?")
}

fn describe(entry: &HistoryEntry, changes: &[FieldChange]) -> String {
    match entry.entity_kind {
        EntityKind::Record => {
            let plate = snapshot_text(&entry.snapshot, "plate");
            match entry.operation {
                Operation::Create => format!("Trámite {} creado", plate),
                Operation::Delete => format!("Trámite {} eliminado", plate),
                Operation::Update => match changes.iter().find(|c| c.field == "module") {
                    Some(moved) => format!(
                        "Trámite {} movido de {} a {}",
                        plate,
                        moved.old.as_str().unwrap_or("?"),
                        moved.new.as_str().unwrap_or("?")
                    ),
                    None => format!("Cambio en datos del trámite {}", plate),
                },
            }
        }
        EntityKind::Attachment => {
            let name = snapshot_text(&entry.snapshot, "original_name");
            match entry.operation {
                Operation::Create => format!("Archivo agregado: {}", name),
                Operation::Update => format!("Archivo: {}", name),
                Operation::Delete => format!("Archivo eliminado: {}", name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(pairs: &[(&str, Value)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn entry(
        kind: EntityKind,
        entity_id: i64,
        seq: i32,
        when: DateTime<Utc>,
        operation: Operation,
        snapshot: Snapshot,
    ) -> HistoryEntry {
        HistoryEntry {
            id: seq as i64 + entity_id * 100,
            entity_kind: kind,
            entity_id,
            record_id: 1,
            seq,
            recorded_at: when,
            actor: Actor::resolve(Some("ana")),
            operation,
            snapshot,
        }
    }

    #[test]
    fn test_diff_is_empty_iff_equal() {
        let a = snapshot(&[("plate", json!("ABC123")), ("status", json!("in-verification"))]);
        assert!(HistoryEngine::diff(&a, &a.clone()).is_empty());

        let b = snapshot(&[("plate", json!("ABC123")), ("status", json!("with-issue"))]);
        let changes = HistoryEngine::diff(&a, &b);
        assert_eq!(
            changes,
            vec![FieldChange {
                field: "status".to_string(),
                old: json!("in-verification"),
                new: json!("with-issue"),
            }]
        );
    }

    #[test]
    fn test_diff_treats_missing_as_null() {
        let a = snapshot(&[("plate", json!("ABC123"))]);
        let b = snapshot(&[("plate", json!("ABC123")), ("package", Value::Null)]);
        assert!(HistoryEngine::diff(&a, &b).is_empty());

        let c = snapshot(&[("plate", json!("ABC123")), ("package", json!("caja-1"))]);
        assert_eq!(HistoryEngine::diff(&a, &c)[0].old, Value::Null);
    }

    #[test]
    fn test_first_entry_has_no_changes_and_is_creation() {
        let entries = vec![entry(
            EntityKind::Record,
            1,
            1,
            at(0),
            Operation::Create,
            snapshot(&[("plate", json!("ABC123"))]),
        )];
        let timeline = HistoryEngine::build_timeline(entries);
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].changes.is_empty());
        assert_eq!(timeline[0].operation, Operation::Create);
        assert_eq!(timeline[0].description, "Trámite ABC123 creado");
    }

    #[test]
    fn test_replay_reproduces_latest_snapshot() {
        let s1 = snapshot(&[("plate", json!("ABC123")), ("module", json!("Preparation")), ("status_detail", Value::Null)]);
        let s2 = snapshot(&[("plate", json!("ABC124")), ("module", json!("Preparation")), ("status_detail", Value::Null)]);
        let s3 = snapshot(&[("plate", json!("ABC124")), ("module", json!("Tracker")), ("status_detail", json!("ok"))]);
        let entries = vec![
            entry(EntityKind::Record, 1, 3, at(20), Operation::Update, s3.clone()),
            entry(EntityKind::Record, 1, 1, at(0), Operation::Create, s1),
            entry(EntityKind::Record, 1, 2, at(10), Operation::Update, s2),
        ];
        assert_eq!(HistoryEngine::replay(&entries), Some(s3));
        assert_eq!(HistoryEngine::replay(&[]), None);
    }

    #[test]
    fn test_replay_drops_fields_missing_from_newer_snapshot() {
        let s1 = snapshot(&[("plate", json!("ABC123")), ("package", json!("caja-1")), ("notes", Value::Null)]);
        let s2 = snapshot(&[("plate", json!("ABC123"))]);
        let entries = vec![
            entry(EntityKind::Record, 1, 1, at(0), Operation::Create, s1),
            entry(EntityKind::Record, 1, 2, at(10), Operation::Update, s2.clone()),
        ];
        let replayed = HistoryEngine::replay(&entries).unwrap();
        assert!(!replayed.contains_key("package"));
        assert!(!replayed.contains_key("notes"));
        assert_eq!(replayed, s2);
    }

    #[test]
    fn test_timeline_is_newest_first_and_scoped_per_entity() {
        let record_v1 = snapshot(&[("plate", json!("ABC123")), ("module", json!("Preparation"))]);
        let record_v2 = snapshot(&[("plate", json!("ABC123")), ("module", json!("Tracker"))]);
        let file = snapshot(&[("original_name", json!("soat.pdf")), ("size_bytes", json!(10))]);

        let entries = vec![
            entry(EntityKind::Record, 1, 1, at(0), Operation::Create, record_v1),
            entry(EntityKind::Attachment, 8, 1, at(5), Operation::Create, file.clone()),
            entry(EntityKind::Record, 1, 2, at(10), Operation::Update, record_v2),
            entry(EntityKind::Attachment, 8, 2, at(15), Operation::Delete, file),
        ];
        let timeline = HistoryEngine::build_timeline(entries);

        let stamps: Vec<_> = timeline.iter().map(|e| e.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(stamps, sorted);

        assert_eq!(timeline[0].description, "Archivo eliminado: soat.pdf");
        // el borrado del archivo se compara con su propio alta, no con el trámite
        assert!(timeline[0].changes.is_empty());
        assert_eq!(timeline[1].description, "Trámite ABC123 movido de Preparation a Tracker");
        assert_eq!(timeline[1].changes.len(), 1);
    }

    #[test]
    fn test_same_timestamp_ties_are_deterministic() {
        let when = at(0);
        let s = |status: &str| snapshot(&[("plate", json!("ABC123")), ("status", json!(status))]);
        let entries = vec![
            entry(EntityKind::Record, 1, 1, when, Operation::Create, s("in-verification")),
            entry(EntityKind::Record, 1, 2, when, Operation::Update, s("with-issue")),
            entry(EntityKind::Record, 1, 3, when, Operation::Update, s("ready-for-filing")),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();

        let a = HistoryEngine::build_timeline(entries);
        let b = HistoryEngine::build_timeline(reversed);
        assert_eq!(a, b);
        assert_eq!(a.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn test_recreated_attachment_keeps_each_operation() {
        let file = snapshot(&[("original_name", json!("acta.pdf"))]);
        let entries = vec![
            entry(EntityKind::Attachment, 4, 1, at(0), Operation::Create, file.clone()),
            entry(EntityKind::Attachment, 4, 2, at(1), Operation::Delete, file.clone()),
            entry(EntityKind::Attachment, 5, 1, at(2), Operation::Create, file),
        ];
        let timeline = HistoryEngine::build_timeline(entries);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].entity_id, 5);
        assert_eq!(timeline[0].operation, Operation::Create);
    }

    #[test]
    fn test_empty_history_is_empty_timeline() {
        assert!(HistoryEngine::build_timeline(Vec::new()).is_empty());
    }

    #[test]
    fn test_record_snapshot_skips_updated_at() {
        use crate::models::tramite::{NewTramite, Status, VehicleType};

        let now = at(0);
        let mut tramite = NewTramite {
            plate: "ABC123".to_string(),
            vehicle_type: VehicleType::Car,
            department_id: 5,
            municipality_id: 1,
            status: Status::InVerification,
            package: None,
            document_checklist: Default::default(),
            created_by: None,
        }
        .into_tramite(1, now);
        tramite.updated_at = now + Duration::seconds(30);

        let entry =
            HistoryEngine::record_snapshot(&tramite, Operation::Create, &Actor::resolve(None), now)
                .unwrap();
        assert!(entry.actor.is_system());
        assert!(!entry.snapshot.contains_key("updated_at"));
        assert_eq!(entry.snapshot["plate"], json!("ABC123"));
        assert_eq!(entry.snapshot["module"], json!("Preparation"));
        assert_eq!(entry.record_id, 1);
    }
}
