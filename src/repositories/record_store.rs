//! Contrato del almacén de trámites
//!
//! Toda mutación escribe su entrada de historial en la misma unidad atómica:
//! o se aplican las dos o ninguna. Las implementaciones son intercambiables
//! (Postgres en producción, memoria en pruebas y desarrollo).

use async_trait::async_trait;

use crate::models::attachment::{Attachment, NewAttachment};
use crate::models::history::{Actor, HistoryEntry};
use crate::models::tramite::{Module, NewTramite, Tramite, TramitePatch};
use crate::models::transition::TransitionCommand;
use crate::utils::errors::AppResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Crea el trámite en Preparación y registra su entrada `create`
    async fn create_tramite(&self, new: NewTramite, actor: &Actor) -> AppResult<Tramite>;

    async fn find_tramite(&self, id: i64) -> AppResult<Option<Tramite>>;

    /// Lista de trabajo de un módulo, lo más reciente primero
    async fn list_by_module(&self, module: Module) -> AppResult<Vec<Tramite>>;

    async fn update_tramite(&self, id: i64, patch: &TramitePatch, actor: &Actor)
        -> AppResult<Tramite>;

    /// Lee el trámite con bloqueo, verifica el módulo origen y persiste el
    /// resultado de `command.apply` junto con su historial. Dos transiciones
    /// concurrentes sobre el mismo trámite se serializan.
    async fn apply_transition(
        &self,
        id: i64,
        command: &TransitionCommand,
        actor: &Actor,
    ) -> AppResult<Tramite>;

    /// Borra el trámite y sus archivos; cada borrado deja su entrada `delete`
    async fn delete_tramite(&self, id: i64, actor: &Actor) -> AppResult<Tramite>;

    async fn attachments_of(&self, record_id: i64) -> AppResult<Vec<Attachment>>;

    async fn add_attachment(
        &self,
        record_id: i64,
        new: NewAttachment,
        actor: &Actor,
    ) -> AppResult<Attachment>;

    async fn delete_attachment(&self, id: i64, actor: &Actor) -> AppResult<Attachment>;

    /// Historial del trámite y de todos sus archivos, incluidos los ya borrados
    async fn history_for_record(&self, record_id: i64) -> AppResult<Vec<HistoryEntry>>;
}
