//! Proyecciones por módulo
//!
//! Cada módulo ve un subconjunto distinto del trámite. Las proyecciones
//! son lo que viaja en los eventos en tiempo real y en las respuestas de
//! transición; nunca se expone el modelo interno completo.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::tramite::{
    ChecklistItem, Module, Status, Tramite, TrackerStatus, VehicleType,
};

/// Campos comunes a todas las vistas; identifican el trámite sin depender del orden de llegada
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseView {
    pub id: i64,
    pub module: Module,
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub department_id: i32,
    pub municipality_id: i32,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparationView {
    #[serde(flatten)]
    pub base: BaseView,
    pub status: Status,
    pub package: Option<String>,
    pub document_checklist: Vec<ChecklistItem>,
    pub documents_complete: bool,
    pub completed_count: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerView {
    #[serde(flatten)]
    pub base: BaseView,
    pub tracker_status: TrackerStatus,
    pub status_detail: Option<String>,
    pub received_date: Option<NaiveDate>,
    pub days_since_received: Option<i64>,
    pub provider_id: Option<i64>,
}

/// Vista de Finalizados y Archivadas; Archivadas no muestra `tracker_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedView {
    #[serde(flatten)]
    pub base: BaseView,
    pub status: Status,
    pub status_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_status: Option<TrackerStatus>,
    pub received_date: Option<NaiveDate>,
    pub days_since_received: Option<i64>,
    pub provider_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Projection {
    Preparation(PreparationView),
    Tracker(TrackerView),
    Closed(ClosedView),
}

impl Projection {
    /// Proyección del trámite en el módulo que hoy lo contiene
    pub fn of(tramite: &Tramite, today: NaiveDate) -> Self {
        Self::for_module(tramite, tramite.module, today)
    }

    pub fn for_module(tramite: &Tramite, module: Module, today: NaiveDate) -> Self {
        let base = BaseView {
            id: tramite.id,
            module,
            plate: tramite.plate.clone(),
            vehicle_type: tramite.vehicle_type,
            department_id: tramite.department_id,
            municipality_id: tramite.municipality_id,
            created_by: tramite.created_by.clone(),
            created_at: tramite.created_at,
            updated_at: tramite.updated_at,
        };

        match module {
            Module::Preparation => {
                let summary = tramite.checklist_summary();
                Projection::Preparation(PreparationView {
                    base,
                    status: tramite.status,
                    package: tramite.package.clone(),
                    document_checklist: tramite.document_checklist.items().to_vec(),
                    documents_complete: summary.documents_complete,
                    completed_count: summary.completed_count,
                    total_count: summary.total_count,
                })
            }
            Module::Tracker => Projection::Tracker(TrackerView {
                base,
                tracker_status: tramite.tracker_status,
                status_detail: tramite.status_detail.clone(),
                received_date: tramite.received_date,
                days_since_received: tramite.days_since_received(today),
                provider_id: tramite.provider_id,
            }),
            Module::Finalized | Module::Archived => Projection::Closed(ClosedView {
                base,
                status: tramite.status,
                status_detail: tramite.status_detail.clone(),
                tracker_status: (module == Module::Finalized).then_some(tramite.tracker_status),
                received_date: tramite.received_date,
                days_since_received: tramite.days_since_received(today),
                provider_id: tramite.provider_id,
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.base().id
    }

    pub fn module(&self) -> Module {
        self.base().module
    }

    fn base(&self) -> &BaseView {
        match self {
            Projection::Preparation(view) => &view.base,
            Projection::Tracker(view) => &view.base,
            Projection::Closed(view) => &view.base,
        }
    }
}

/// Carga de los eventos `deleted`: suficiente para quitar la fila de una lista
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedView {
    pub id: i64,
    pub plate: String,
    pub module: Module,
}

impl RemovedView {
    pub fn new(tramite: &Tramite, module: Module) -> Self {
        Self {
            id: tramite.id,
            plate: tramite.plate.clone(),
            module,
        }
    }
}
