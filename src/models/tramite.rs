//! Modelo de Trámite
//!
//! Un trámite es la unidad de trabajo que recorre los módulos
//! Preparación → Tracker → Finalizados ↔ Archivadas. Cada módulo es una
//! vista filtrada del mismo registro: la columna `module` decide qué lista
//! de trabajo lo muestra.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Módulo dueño de la visibilidad del trámite - mapea a la columna `module SMALLINT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Module {
    Preparation,
    Tracker,
    Finalized,
    Archived,
}

impl Module {
    pub const ALL: [Module; 4] = [
        Module::Preparation,
        Module::Tracker,
        Module::Finalized,
        Module::Archived,
    ];

    /// Código persistido: 1-Preparación, 2-Tracker, 3-Finalizados, 0-Archivadas
    pub fn code(self) -> i16 {
        match self {
            Module::Preparation => 1,
            Module::Tracker => 2,
            Module::Finalized => 3,
            Module::Archived => 0,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Module::Preparation),
            2 => Some(Module::Tracker),
            3 => Some(Module::Finalized),
            0 => Some(Module::Archived),
            _ => None,
        }
    }

    /// Nombre en minúsculas usado en rutas HTTP y en el tipo de evento
    pub fn slug(self) -> &'static str {
        match self {
            Module::Preparation => "preparation",
            Module::Tracker => "tracker",
            Module::Finalized => "finalized",
            Module::Archived => "archived",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Module::ALL.into_iter().find(|m| m.slug() == slug)
    }

    /// Estados que se pueden asignar editando un trámite en este módulo
    pub fn allows_status(self, status: Status) -> bool {
        match self {
            Module::Preparation => matches!(
                status,
                Status::InVerification
                    | Status::ReadyForFiling
                    | Status::WithIssue
                    | Status::SentToTracker
            ),
            // `finalized` solo lo asigna la transición finalize
            Module::Tracker => status != Status::Finalized,
            Module::Finalized | Module::Archived => true,
        }
    }

    /// El sub-estado de Tracker existe desde Tracker en adelante
    pub fn has_tracker_status(self) -> bool {
        self != Module::Preparation
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Module::Preparation => "Preparation",
            Module::Tracker => "Tracker",
            Module::Finalized => "Finalized",
            Module::Archived => "Archived",
        };
        f.write_str(name)
    }
}

/// Tipo de vehículo (conjunto cerrado)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Pickup,
    Truck,
    Bus,
    Taxi,
    Other,
}

impl VehicleType {
    pub fn as_str(self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Pickup => "pickup",
            VehicleType::Truck => "truck",
            VehicleType::Bus => "bus",
            VehicleType::Taxi => "taxi",
            VehicleType::Other => "other",
        }
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "car" => Ok(VehicleType::Car),
            "motorcycle" => Ok(VehicleType::Motorcycle),
            "pickup" => Ok(VehicleType::Pickup),
            "truck" => Ok(VehicleType::Truck),
            "bus" => Ok(VehicleType::Bus),
            "taxi" => Ok(VehicleType::Taxi),
            "other" => Ok(VehicleType::Other),
            other => Err(format!("tipo de vehículo desconocido: {}", other)),
        }
    }
}

/// Estado general del trámite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    InVerification,
    ReadyForFiling,
    WithIssue,
    SentToTracker,
    InFiling,
    Finalized,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::InVerification => "in-verification",
            Status::ReadyForFiling => "ready-for-filing",
            Status::WithIssue => "with-issue",
            Status::SentToTracker => "sent-to-tracker",
            Status::InFiling => "in-filing",
            Status::Finalized => "finalized",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::InVerification
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-verification" => Ok(Status::InVerification),
            "ready-for-filing" => Ok(Status::ReadyForFiling),
            "with-issue" => Ok(Status::WithIssue),
            "sent-to-tracker" => Ok(Status::SentToTracker),
            "in-filing" => Ok(Status::InFiling),
            "finalized" => Ok(Status::Finalized),
            other => Err(format!("estado desconocido: {}", other)),
        }
    }
}

/// Sub-estado del módulo Tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackerStatus {
    None,
    InFiling,
    WithIssue,
    Finalized,
}

impl TrackerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerStatus::None => "none",
            TrackerStatus::InFiling => "in-filing",
            TrackerStatus::WithIssue => "with-issue",
            TrackerStatus::Finalized => "finalized",
        }
    }
}

impl Default for TrackerStatus {
    fn default() -> Self {
        TrackerStatus::None
    }
}

impl FromStr for TrackerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TrackerStatus::None),
            "in-filing" => Ok(TrackerStatus::InFiling),
            "with-issue" => Ok(TrackerStatus::WithIssue),
            "finalized" => Ok(TrackerStatus::Finalized),
            other => Err(format!("estado de tracker desconocido: {}", other)),
        }
    }
}

/// Documento requerido de la lista de chequeo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub name: String,
    #[serde(default)]
    pub completed: bool,
}

impl ChecklistItem {
    pub fn new(name: impl Into<String>, completed: bool) -> Self {
        Self {
            name: name.into(),
            completed,
        }
    }
}

/// Lista ordenada de documentos - se persiste como JSONB
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentChecklist(Vec<ChecklistItem>);

impl DocumentChecklist {
    pub fn new(items: Vec<ChecklistItem>) -> Self {
        Self(items)
    }

    pub fn items(&self) -> &[ChecklistItem] {
        &self.0
    }

    pub fn completed_count(&self) -> usize {
        self.0.iter().filter(|doc| doc.completed).count()
    }

    pub fn total_count(&self) -> usize {
        self.0.len()
    }

    /// Una lista vacía no cuenta como completa
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|doc| doc.completed)
    }
}

impl From<Vec<ChecklistItem>> for DocumentChecklist {
    fn from(items: Vec<ChecklistItem>) -> Self {
        Self(items)
    }
}

/// Contadores derivados de la lista de chequeo, calculados una vez por lectura
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecklistSummary {
    pub documents_complete: bool,
    pub completed_count: usize,
    pub total_count: usize,
}

impl From<&DocumentChecklist> for ChecklistSummary {
    fn from(list: &DocumentChecklist) -> Self {
        Self {
            documents_complete: list.is_complete(),
            completed_count: list.completed_count(),
            total_count: list.total_count(),
        }
    }
}

/// Trámite - mapea a la tabla `tramites`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tramite {
    pub id: i64,
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub department_id: i32,
    pub municipality_id: i32,
    pub module: Module,
    pub status: Status,
    pub status_detail: Option<String>,
    pub tracker_status: TrackerStatus,
    pub provider_id: Option<i64>,
    pub received_date: Option<NaiveDate>,
    pub package: Option<String>,
    pub document_checklist: DocumentChecklist,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tramite {
    /// Días transcurridos desde la recepción en el municipio
    pub fn days_since_received(&self, today: NaiveDate) -> Option<i64> {
        self.received_date
            .map(|received| (today - received).num_days())
    }

    pub fn checklist_summary(&self) -> ChecklistSummary {
        ChecklistSummary::from(&self.document_checklist)
    }
}

/// Datos para crear un trámite; siempre nace en Preparación
#[derive(Debug, Clone)]
pub struct NewTramite {
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub department_id: i32,
    pub municipality_id: i32,
    pub status: Status,
    pub package: Option<String>,
    pub document_checklist: DocumentChecklist,
    pub created_by: Option<String>,
}

impl NewTramite {
    pub fn into_tramite(self, id: i64, now: DateTime<Utc>) -> Tramite {
        Tramite {
            id,
            plate: self.plate,
            vehicle_type: self.vehicle_type,
            department_id: self.department_id,
            municipality_id: self.municipality_id,
            module: Module::Preparation,
            status: self.status,
            status_detail: None,
            tracker_status: TrackerStatus::None,
            provider_id: None,
            received_date: None,
            package: self.package,
            document_checklist: self.document_checklist,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Edición de campos. Nunca toca `module`: eso es exclusivo del motor de transiciones.
#[derive(Debug, Clone, Default)]
pub struct TramitePatch {
    pub plate: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    pub department_id: Option<i32>,
    pub municipality_id: Option<i32>,
    pub status: Option<Status>,
    pub status_detail: Option<String>,
    pub tracker_status: Option<TrackerStatus>,
    pub provider_id: Option<i64>,
    pub received_date: Option<NaiveDate>,
    pub package: Option<String>,
    pub document_checklist: Option<DocumentChecklist>,
}

impl TramitePatch {
    pub fn apply_to(&self, tramite: &mut Tramite) {
        if let Some(plate) = &self.plate {
            tramite.plate = plate.clone();
        }
        if let Some(vehicle_type) = self.vehicle_type {
            tramite.vehicle_type = vehicle_type;
        }
        if let Some(department_id) = self.department_id {
            tramite.department_id = department_id;
        }
        if let Some(municipality_id) = self.municipality_id {
            tramite.municipality_id = municipality_id;
        }
        if let Some(status) = self.status {
            tramite.status = status;
        }
        if let Some(detail) = &self.status_detail {
            tramite.status_detail = Some(detail.clone());
        }
        if let Some(tracker_status) = self.tracker_status {
            tramite.tracker_status = tracker_status;
        }
        if let Some(provider_id) = self.provider_id {
            tramite.provider_id = Some(provider_id);
        }
        if let Some(date) = self.received_date {
            tramite.received_date = Some(date);
        }
        if let Some(package) = &self.package {
            tramite.package = Some(package.clone());
        }
        if let Some(list) = &self.document_checklist {
            tramite.document_checklist = list.clone();
        }
    }

    /// Los campos de ubicación cambiaron y hay que revalidar el municipio
    pub fn touches_location(&self) -> bool {
        self.department_id.is_some() || self.municipality_id.is_some()
    }
}
