//! Servicio de trámites
//!
//! Alta, edición, borrado y archivos adjuntos. Las transiciones de módulo
//! no pasan por aquí: son exclusivas del `TransitionEngine`. Cada escritura
//! publica con el candado del trámite tomado, igual que las transiciones.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::models::attachment::{is_allowed_mime_type, Attachment, NewAttachment, ALLOWED_MIME_TYPES};
use crate::models::history::Actor;
use crate::models::projection::{Projection, RemovedView};
use crate::models::tramite::{Module, NewTramite, Tramite, TramitePatch};
use crate::repositories::record_store::RecordStore;
use crate::services::notification_bus::{ChangeKind, EventType, Notifier, Topic};
use crate::services::record_locks::RecordLocks;
use crate::utils::errors::{not_found_error, AppError, AppResult};

pub struct TramiteService {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<RecordLocks>,
}

impl TramiteService {
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

    pub async fn create(&self, new: NewTramite, actor: &Actor) -> AppResult<Tramite> {
        if !Module::Preparation.allows_status(new.status) {
            return Err(AppError::Validation(format!(
                "El estado '{}' no se puede asignar en Preparation",
                new.status.as_str()
            )));
        }

        let tramite = self.store.create_tramite(new, actor).await?;
        info!("✅ Trámite {} ({}) creado por {}", tramite.id, tramite.plate, actor);

        self.notifier
            .publish(
                &Topic::Module(Module::Preparation),
                EventType::new(Module::Preparation, ChangeKind::Created),
                json!(Projection::of(&tramite, Utc::now().date_naive())),
            )
            .await;
        Ok(tramite)
    }

    pub async fn get(&self, id: i64) -> AppResult<(Tramite, Vec<Attachment>)> {
        let tramite = self
            .store
            .find_tramite(id)
            .await?
            .ok_or_else(|| not_found_error("Trámite", id))?;
        let attachments = self.store.attachments_of(id).await?;
        Ok((tramite, attachments))
    }

    /// Lista de trabajo de un módulo en su proyección
    pub async fn list_module(&self, module: Module) -> AppResult<Vec<Projection>> {
        let today = Utc::now().date_naive();
        let tramites = self.store.list_by_module(module).await?;
        Ok(tramites
            .iter()
            .map(|tramite| Projection::for_module(tramite, module, today))
            .collect())
    }

    pub async fn update(&self, id: i64, patch: TramitePatch, actor: &Actor) -> AppResult<Tramite> {
        let _guard = self.locks.lock(id).await;

        if patch.status.is_some() || patch.tracker_status.is_some() {
            let current = self
                .store
                .find_tramite(id)
                .await?
                .ok_or_else(|| not_found_error("Trámite", id))?;
            if let Some(status) = patch.status {
                if !current.module.allows_status(status) {
                    return Err(AppError::Validation(format!(
                        "El estado '{}' no se puede asignar en {}",
                        status.as_str(),
                        current.module
                    )));
                }
            }
            if patch.tracker_status.is_some() && !current.module.has_tracker_status() {
                return Err(AppError::Validation(format!(
                    "El estado de Tracker no aplica en {}",
                    current.module
                )));
            }
        }

        let tramite = self.store.update_tramite(id, &patch, actor).await?;
        info!("✏️ Trámite {} actualizado por {}", id, actor);

        self.publish_updated(&tramite).await;
        Ok(tramite)
    }

    pub async fn delete(&self, id: i64, actor: &Actor) -> AppResult<Tramite> {
        let _guard = self.locks.lock(id).await;
        let tramite = self.store.delete_tramite(id, actor).await?;
        info!("🗑️ Trámite {} ({}) eliminado por {}", id, tramite.plate, actor);

        let removed = json!(RemovedView::new(&tramite, tramite.module));
        let event_type = EventType::new(tramite.module, ChangeKind::Deleted);
        self.notifier
            .publish(&Topic::Module(tramite.module), event_type, removed.clone())
            .await;
        self.notifier
            .publish(&Topic::Record(id), event_type, removed)
            .await;
        Ok(tramite)
    }

    pub async fn add_attachment(
        &self,
        record_id: i64,
        new: NewAttachment,
        actor: &Actor,
    ) -> AppResult<Attachment> {
        if !is_allowed_mime_type(&new.mime_type) {
            return Err(AppError::Validation(format!(
                "Tipo de archivo no permitido '{}'; se aceptan: {}",
                new.mime_type,
                ALLOWED_MIME_TYPES.join(", ")
            )));
        }

        let _guard = self.locks.lock(record_id).await;
        let attachment = self.store.add_attachment(record_id, new, actor).await?;
        info!(
            "📎 Archivo {} agregado al trámite {} por {}",
            attachment.original_name, record_id, actor
        );
        self.publish_owner_updated(record_id).await?;
        Ok(attachment)
    }

    pub async fn delete_attachment(&self, id: i64, actor: &Actor) -> AppResult<Attachment> {
        let attachment = self.store.delete_attachment(id, actor).await?;
        info!(
            "📎 Archivo {} eliminado del trámite {} por {}",
            attachment.original_name, attachment.record_id, actor
        );
        // el dueño se conoce después de borrar; la relectura va bajo candado
        let _guard = self.locks.lock(attachment.record_id).await;
        self.publish_owner_updated(attachment.record_id).await?;
        Ok(attachment)
    }

    /// Relee el trámite y publica su estado actual. Se llama con el candado tomado.
    async fn publish_owner_updated(&self, record_id: i64) -> AppResult<()> {
        if let Some(tramite) = self.store.find_tramite(record_id).await? {
            self.publish_updated(&tramite).await;
        }
        Ok(())
    }

    /// `<módulo>_updated` en el tópico del módulo y en el del trámite
    async fn publish_updated(&self, tramite: &Tramite) {
        let projection = json!(Projection::of(tramite, Utc::now().date_naive()));
        let event_type = EventType::new(tramite.module, ChangeKind::Updated);
        self.notifier
            .publish(&Topic::Module(tramite.module), event_type, projection.clone())
            .await;
        self.notifier
            .publish(&Topic::Record(tramite.id), event_type, projection)
            .await;
    }
}
