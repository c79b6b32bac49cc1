use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::attachment::{Attachment, NewAttachment};
use crate::models::projection::Projection;
use crate::models::tramite::{
    ChecklistItem, DocumentChecklist, Module, NewTramite, Status, TrackerStatus, TramitePatch,
    VehicleType,
};
use crate::models::transition::TransitionPayload;
use crate::services::transition_engine::TransitionResult;
use crate::utils::errors::AppResult;
use crate::utils::validation::{normalize_plate, parse_optional_date};

// Request para crear un trámite (siempre nace en Preparación)
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTramiteRequest {
    #[validate(length(min = 1, max = 10))]
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub department_id: i32,
    pub municipality_id: i32,
    pub status: Option<Status>,
    #[validate(length(max = 100))]
    pub package: Option<String>,
    #[serde(default)]
    pub document_checklist: Vec<ChecklistItem>,
}

impl CreateTramiteRequest {
    pub fn into_new_tramite(self, created_by: Option<String>) -> AppResult<NewTramite> {
        Ok(NewTramite {
            plate: normalize_plate(&self.plate)?,
            vehicle_type: self.vehicle_type,
            department_id: self.department_id,
            municipality_id: self.municipality_id,
            status: self.status.unwrap_or_default(),
            package: self.package,
            document_checklist: DocumentChecklist::new(self.document_checklist),
            created_by,
        })
    }
}

// Request para editar campos; `module` no se acepta aquí
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTramiteRequest {
    #[validate(length(min = 1, max = 10))]
    pub plate: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    pub department_id: Option<i32>,
    pub municipality_id: Option<i32>,
    pub status: Option<Status>,
    #[validate(length(max = 500))]
    pub status_detail: Option<String>,
    pub tracker_status: Option<TrackerStatus>,
    pub provider_id: Option<i64>,
    pub received_date: Option<String>,
    #[validate(length(max = 100))]
    pub package: Option<String>,
    pub document_checklist: Option<Vec<ChecklistItem>>,
}

impl UpdateTramiteRequest {
    pub fn into_patch(self) -> AppResult<TramitePatch> {
        Ok(TramitePatch {
            plate: self.plate.as_deref().map(normalize_plate).transpose()?,
            vehicle_type: self.vehicle_type,
            department_id: self.department_id,
            municipality_id: self.municipality_id,
            status: self.status,
            status_detail: self.status_detail,
            tracker_status: self.tracker_status,
            provider_id: self.provider_id,
            received_date: parse_optional_date("received_date", self.received_date.as_deref())?,
            package: self.package,
            document_checklist: self.document_checklist.map(DocumentChecklist::new),
        })
    }
}

// Cuerpo opcional de send-to-tracker
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SendToTrackerRequest {
    #[validate(range(min = 1))]
    pub provider_id: Option<i64>,
    pub received_date: Option<String>,
}

impl SendToTrackerRequest {
    pub fn into_payload(self) -> AppResult<TransitionPayload> {
        Ok(TransitionPayload {
            provider_id: self.provider_id,
            received_date: parse_optional_date("received_date", self.received_date.as_deref())?,
            status_detail: None,
        })
    }
}

// Cuerpo opcional de finalize
#[derive(Debug, Default, Deserialize, Validate)]
pub struct FinalizeRequest {
    #[validate(length(max = 500))]
    pub status_detail: Option<String>,
}

impl From<FinalizeRequest> for TransitionPayload {
    fn from(request: FinalizeRequest) -> Self {
        TransitionPayload {
            status_detail: request.status_detail,
            ..Default::default()
        }
    }
}

// Metadatos de un archivo ya subido al almacenamiento externo
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAttachmentRequest {
    #[validate(length(min = 1, max = 255))]
    pub original_name: String,
    #[validate(length(min = 1, max = 100))]
    pub mime_type: String,
    #[validate(range(min = 0))]
    pub size_bytes: i64,
    #[validate(length(min = 1, max = 500))]
    pub storage_ref: String,
}

impl From<CreateAttachmentRequest> for NewAttachment {
    fn from(request: CreateAttachmentRequest) -> Self {
        NewAttachment {
            original_name: request.original_name,
            mime_type: request.mime_type.trim().to_lowercase(),
            size_bytes: request.size_bytes,
            storage_ref: request.storage_ref,
        }
    }
}

// Response de una transición
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub message: String,
    pub id: i64,
    pub module: Module,
    pub data: Projection,
}

impl From<TransitionResult> for TransitionResponse {
    fn from(result: TransitionResult) -> Self {
        Self {
            message: format!(
                "Trámite {} movido de {} a {}",
                result.tramite.plate, result.from, result.to
            ),
            id: result.tramite.id,
            module: result.to,
            data: result.projection,
        }
    }
}

// Response de detalle: la vista del módulo actual más sus archivos
#[derive(Debug, Serialize)]
pub struct TramiteDetailResponse {
    pub tramite: Projection,
    pub attachments: Vec<Attachment>,
}

// Lista de trabajo de un módulo
#[derive(Debug, Serialize)]
pub struct ModuleListResponse {
    pub module: Module,
    pub total: usize,
    pub tramites: Vec<Projection>,
}

// Envoltorio de respuestas CRUD
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}
