//! Comandos de transición entre módulos
//!
//! Cada disparador se modela como un comando explícito (módulo origen
//! esperado + carga opcional). `apply` es puro: el almacén lo ejecuta
//! dentro de su transacción y decide si persiste el resultado.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::tramite::{Module, Status, Tramite, TrackerStatus};
use crate::utils::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    SendToTracker,
    Finalize,
    Archive,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::SendToTracker => "send-to-tracker",
            Trigger::Finalize => "finalize",
            Trigger::Archive => "archive",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tabla de transiciones permitidas: (origen, disparador, destino)
pub const TRANSITIONS: [(Module, Trigger, Module); 5] = [
    (Module::Preparation, Trigger::SendToTracker, Module::Tracker),
    (Module::Tracker, Trigger::Finalize, Module::Finalized),
    (Module::Preparation, Trigger::Finalize, Module::Finalized),
    (Module::Finalized, Trigger::Archive, Module::Archived),
    (Module::Archived, Trigger::Finalize, Module::Finalized),
];

pub fn destination_for(source: Module, trigger: Trigger) -> Option<Module> {
    TRANSITIONS
        .iter()
        .find(|(from, t, _)| *from == source && *t == trigger)
        .map(|(_, _, to)| *to)
}

/// Datos opcionales de cada disparador; los que no aplican se ignoran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPayload {
    pub provider_id: Option<i64>,
    pub received_date: Option<NaiveDate>,
    pub status_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionCommand {
    source: Module,
    trigger: Trigger,
    destination: Module,
    payload: TransitionPayload,
}

impl TransitionCommand {
    /// Falla con `Validation` si el par (origen, disparador) no está en la tabla
    pub fn new(source: Module, trigger: Trigger, payload: TransitionPayload) -> AppResult<Self> {
        let destination = destination_for(source, trigger).ok_or_else(|| {
            AppError::Validation(format!(
                "La transición '{}' no está permitida desde el módulo {}",
                trigger, source
            ))
        })?;

        Ok(Self {
            source,
            trigger,
            destination,
            payload,
        })
    }

    pub fn source(&self) -> Module {
        self.source
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn destination(&self) -> Module {
        self.destination
    }

    pub fn payload(&self) -> &TransitionPayload {
        &self.payload
    }

    /// Verifica la precondición de módulo y aplica los efectos de la tabla.
    /// En error el trámite queda intacto.
    pub fn apply(&self, tramite: &mut Tramite, now: DateTime<Utc>) -> AppResult<()> {
        if tramite.module != self.source {
            return Err(AppError::StateConflict {
                record_id: tramite.id,
                expected: self.source,
                actual: tramite.module,
            });
        }

        match (self.source, self.trigger) {
            (Module::Preparation, Trigger::SendToTracker) => {
                tramite.tracker_status = TrackerStatus::InFiling;
                if let Some(provider_id) = self.payload.provider_id {
                    tramite.provider_id = Some(provider_id);
                }
                if let Some(date) = self.payload.received_date {
                    tramite.received_date = Some(date);
                }
            }
            (Module::Tracker, Trigger::Finalize) => {
                tramite.status = Status::Finalized;
                tramite.tracker_status = TrackerStatus::Finalized;
                self.apply_status_detail(tramite);
            }
            (Module::Preparation, Trigger::Finalize) | (Module::Archived, Trigger::Finalize) => {
                tramite.status = Status::Finalized;
                self.apply_status_detail(tramite);
            }
            // Archivar no modifica ningún otro campo, ni siquiera el detalle
            (Module::Finalized, Trigger::Archive) => {}
            _ => unreachable!("TransitionCommand::new solo construye pares de la tabla"),
        }

        tramite.module = self.destination;
        tramite.updated_at = now;
        Ok(())
    }

    fn apply_status_detail(&self, tramite: &mut Tramite) {
        if let Some(detail) = &self.payload.status_detail {
            tramite.status_detail = Some(detail.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tramite::{NewTramite, VehicleType};

    fn tramite_in(module: Module) -> Tramite {
        let mut tramite = NewTramite {
            plate: "XYZ987".to_string(),
            vehicle_type: VehicleType::Motorcycle,
            department_id: 5,
            municipality_id: 1,
            status: Status::ReadyForFiling,
            package: Some("caja-3".to_string()),
            document_checklist: Default::default(),
            created_by: None,
        }
        .into_tramite(9, Utc::now());
        tramite.module = module;
        tramite
    }

    #[test]
    fn test_table_pairs_are_valid_commands() {
        for (source, trigger, destination) in TRANSITIONS {
            let command = TransitionCommand::new(source, trigger, Default::default()).unwrap();
            assert_eq!(command.destination(), destination);
        }
    }

    #[test]
    fn test_unknown_pair_is_validation_error() {
        let err = TransitionCommand::new(Module::Tracker, Trigger::Archive, Default::default())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(destination_for(Module::Archived, Trigger::Archive).is_none());
    }

    #[test]
    fn test_send_to_tracker_keeps_unset_fields() {
        let mut tramite = tramite_in(Module::Preparation);
        tramite.provider_id = Some(4);
        let command =
            TransitionCommand::new(Module::Preparation, Trigger::SendToTracker, Default::default())
                .unwrap();
        command.apply(&mut tramite, Utc::now()).unwrap();

        assert_eq!(tramite.module, Module::Tracker);
        assert_eq!(tramite.tracker_status, TrackerStatus::InFiling);
        assert_eq!(tramite.provider_id, Some(4));
        assert_eq!(tramite.status, Status::ReadyForFiling);
        assert_eq!(tramite.package.as_deref(), Some("caja-3"));
    }

    #[test]
    fn test_archive_ignores_status_detail() {
        let mut tramite = tramite_in(Module::Finalized);
        tramite.status_detail = Some("previo".to_string());
        let payload = TransitionPayload {
            status_detail: Some("nuevo".to_string()),
            ..Default::default()
        };
        let command = TransitionCommand::new(Module::Finalized, Trigger::Archive, payload).unwrap();
        command.apply(&mut tramite, Utc::now()).unwrap();

        assert_eq!(tramite.module, Module::Archived);
        assert_eq!(tramite.status_detail.as_deref(), Some("previo"));
    }

    #[test]
    fn test_wrong_source_is_state_conflict_and_leaves_record_intact() {
        let mut tramite = tramite_in(Module::Archived);
        let before = tramite.clone();
        let command =
            TransitionCommand::new(Module::Finalized, Trigger::Archive, Default::default()).unwrap();
        let err = command.apply(&mut tramite, Utc::now()).unwrap_err();

        match err {
            AppError::StateConflict { actual, expected, .. } => {
                assert_eq!(actual, Module::Archived);
                assert_eq!(expected, Module::Finalized);
            }
            other => panic!("error inesperado: {:?}", other),
        }
        assert_eq!(tramite, before);
    }
}
