//! Almacén en memoria
//!
//! Implementación de `RecordStore` para desarrollo sin base de datos y para
//! pruebas. Cada operación prepara sus cambios sobre copias y los confirma
//! de una sola vez, sin puntos de espera, bajo el mismo mutex: así el
//! trámite y su historial se escriben juntos o no se escriben. El único
//! punto de espera es tomar el mutex, y ese es el que tiene límite de tiempo.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::models::attachment::{Attachment, NewAttachment};
use crate::models::catalog::{Department, Municipality, Provider};
use crate::models::history::{Actor, EntityKind, HistoryEntry, NewHistoryEntry, Operation};
use crate::models::tramite::{Module, NewTramite, Tramite, TramitePatch};
use crate::models::transition::TransitionCommand;
use crate::repositories::record_store::RecordStore;
use crate::services::history_engine::HistoryEngine;
use crate::utils::errors::{not_found_error, AppError, AppResult};

#[derive(Default)]
struct Inner {
    last_tramite_id: i64,
    last_attachment_id: i64,
    last_history_id: i64,
    tramites: BTreeMap<i64, Tramite>,
    attachments: BTreeMap<i64, Attachment>,
    history: Vec<HistoryEntry>,
    seqs: HashMap<(EntityKind, i64), i32>,
    departments: HashMap<i32, Department>,
    municipalities: HashMap<i32, Municipality>,
    providers: HashMap<i64, Provider>,
    fail_next_history_write: bool,
}

impl Inner {
    fn check_location(&self, department_id: i32, municipality_id: i32) -> AppResult<()> {
        if !self.departments.contains_key(&department_id) {
            return Err(AppError::Validation(format!(
                "El departamento {} no existe",
                department_id
            )));
        }
        match self.municipalities.get(&municipality_id) {
            Some(m) if m.department_id == department_id => Ok(()),
            Some(_) => Err(AppError::Validation(format!(
                "El municipio {} no pertenece al departamento {}",
                municipality_id, department_id
            ))),
            None => Err(AppError::Validation(format!(
                "El municipio {} no existe",
                municipality_id
            ))),
        }
    }

    fn check_provider(&self, provider_id: Option<i64>) -> AppResult<()> {
        match provider_id {
            Some(id) if !self.providers.contains_key(&id) => Err(AppError::Validation(format!(
                "El proveedor {} no existe",
                id
            ))),
            _ => Ok(()),
        }
    }

    fn tramite(&self, id: i64) -> AppResult<&Tramite> {
        self.tramites
            .get(&id)
            .ok_or_else(|| not_found_error("Trámite", id))
    }

    /// Único punto de escritura del historial. Si falla, el llamador no
    /// ha tocado todavía sus datos y la operación completa se descarta.
    fn commit_history(&mut self, staged: Vec<NewHistoryEntry>) -> AppResult<()> {
        if self.fail_next_history_write {
            self.fail_next_history_write = false;
            return Err(AppError::Store(
                "fallo simulado al escribir el historial".to_string(),
            ));
        }

        for entry in staged {
            let seq = self
                .seqs
                .entry((entry.entity_kind, entry.entity_id))
                .or_insert(0);
            *seq += 1;
            let seq = *seq;
            self.last_history_id += 1;
            self.history.push(entry.into_entry(self.last_history_id, seq));
        }
        Ok(())
    }
}

/// Espera máxima por el mutex antes de rendirse con `AppError::Store`
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    lock_timeout: Duration,
}

impl MemoryRecordStore {
    pub fn with_catalog(
        departments: Vec<Department>,
        municipalities: Vec<Municipality>,
        providers: Vec<Provider>,
    ) -> Self {
        let inner = Inner {
            departments: departments.into_iter().map(|d| (d.id, d)).collect(),
            municipalities: municipalities.into_iter().map(|m| (m.id, m)).collect(),
            providers: providers.into_iter().map(|p| (p.id, p)).collect(),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    async fn lock(&self) -> AppResult<MutexGuard<'_, Inner>> {
        tokio::time::timeout(self.lock_timeout, self.inner.lock())
            .await
            .map_err(|_| {
                warn!("⚠️ Almacén en memoria ocupado por más de {:?}", self.lock_timeout);
                AppError::Store(format!(
                    "el almacén no respondió en {} ms",
                    self.lock_timeout.as_millis()
                ))
            })
    }

    /// Catálogo de demostración: el mismo que siembra la migración de Postgres
    pub fn seeded() -> Self {
        Self::with_catalog(
            vec![
                Department { id: 5, name: "Antioquia".to_string() },
                Department { id: 11, name: "Bogotá D.C.".to_string() },
            ],
            vec![
                Municipality { id: 1, name: "Medellín".to_string(), department_id: 5, active: true },
                Municipality { id: 2, name: "Envigado".to_string(), department_id: 5, active: true },
                Municipality { id: 3, name: "Bogotá".to_string(), department_id: 11, active: true },
            ],
            vec![Provider {
                id: 1,
                code: "PRV-001".to_string(),
                name: "Gestiones Andinas".to_string(),
                active: true,
            }],
        )
    }

    /// La próxima escritura de historial falla; sirve para verificar atomicidad
    pub async fn fail_next_history_write(&self) {
        self.inner.lock().await.fail_next_history_write = true;
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::seeded()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_tramite(&self, new: NewTramite, actor: &Actor) -> AppResult<Tramite> {
        let mut inner = self.lock().await?;
        inner.check_location(new.department_id, new.municipality_id)?;

        let now = Utc::now();
        let id = inner.last_tramite_id + 1;
        let tramite = new.into_tramite(id, now);
        let entry = HistoryEngine::record_snapshot(&tramite, Operation::Create, actor, now)?;

        inner.commit_history(vec![entry])?;
        inner.last_tramite_id = id;
        inner.tramites.insert(id, tramite.clone());
        debug!("🗂️ Trámite {} creado en memoria", id);
        Ok(tramite)
    }

    async fn find_tramite(&self, id: i64) -> AppResult<Option<Tramite>> {
        Ok(self.lock().await?.tramites.get(&id).cloned())
    }

    async fn list_by_module(&self, module: Module) -> AppResult<Vec<Tramite>> {
        let inner = self.lock().await?;
        let mut tramites: Vec<Tramite> = inner
            .tramites
            .values()
            .filter(|t| t.module == module)
            .cloned()
            .collect();
        tramites.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tramites)
    }

    async fn update_tramite(
        &self,
        id: i64,
        patch: &TramitePatch,
        actor: &Actor,
    ) -> AppResult<Tramite> {
        let mut inner = self.lock().await?;
        let mut staged = inner.tramite(id)?.clone();
        patch.apply_to(&mut staged);

        if patch.touches_location() {
            inner.check_location(staged.department_id, staged.municipality_id)?;
        }
        inner.check_provider(patch.provider_id)?;

        let now = Utc::now();
        staged.updated_at = now;
        let entry = HistoryEngine::record_snapshot(&staged, Operation::Update, actor, now)?;

        inner.commit_history(vec![entry])?;
        inner.tramites.insert(id, staged.clone());
        Ok(staged)
    }

    async fn apply_transition(
        &self,
        id: i64,
        command: &TransitionCommand,
        actor: &Actor,
    ) -> AppResult<Tramite> {
        // El mutex cumple el papel del bloqueo de fila
        let mut inner = self.lock().await?;
        let mut staged = inner.tramite(id)?.clone();

        let now = Utc::now();
        command.apply(&mut staged, now)?;
        inner.check_provider(command.payload().provider_id)?;
        let entry = HistoryEngine::record_snapshot(&staged, Operation::Update, actor, now)?;

        inner.commit_history(vec![entry])?;
        inner.tramites.insert(id, staged.clone());
        Ok(staged)
    }

    async fn delete_tramite(&self, id: i64, actor: &Actor) -> AppResult<Tramite> {
        let mut inner = self.lock().await?;
        let tramite = inner.tramite(id)?.clone();
        let now = Utc::now();

        let attachment_ids: Vec<i64> = inner
            .attachments
            .values()
            .filter(|a| a.record_id == id)
            .map(|a| a.id)
            .collect();

        let mut staged = Vec::with_capacity(attachment_ids.len() + 1);
        for attachment_id in &attachment_ids {
            if let Some(attachment) = inner.attachments.get(attachment_id) {
                staged.push(HistoryEngine::record_snapshot(
                    attachment,
                    Operation::Delete,
                    actor,
                    now,
                )?);
            }
        }
        staged.push(HistoryEngine::record_snapshot(&tramite, Operation::Delete, actor, now)?);

        inner.commit_history(staged)?;
        for attachment_id in attachment_ids {
            inner.attachments.remove(&attachment_id);
        }
        inner.tramites.remove(&id);
        Ok(tramite)
    }

    async fn attachments_of(&self, record_id: i64) -> AppResult<Vec<Attachment>> {
        let inner = self.lock().await?;
        Ok(inner
            .attachments
            .values()
            .filter(|a| a.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn add_attachment(
        &self,
        record_id: i64,
        new: NewAttachment,
        actor: &Actor,
    ) -> AppResult<Attachment> {
        let mut inner = self.lock().await?;
        inner.tramite(record_id)?;

        let now = Utc::now();
        let id = inner.last_attachment_id + 1;
        let attachment = new.into_attachment(id, record_id, now);
        let entry = HistoryEngine::record_snapshot(&attachment, Operation::Create, actor, now)?;

        inner.commit_history(vec![entry])?;
        inner.last_attachment_id = id;
        inner.attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachment(&self, id: i64, actor: &Actor) -> AppResult<Attachment> {
        let mut inner = self.lock().await?;
        let attachment = inner
            .attachments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found_error("Archivo", id))?;
        let entry =
            HistoryEngine::record_snapshot(&attachment, Operation::Delete, actor, Utc::now())?;

        inner.commit_history(vec![entry])?;
        inner.attachments.remove(&id);
        Ok(attachment)
    }

    async fn history_for_record(&self, record_id: i64) -> AppResult<Vec<HistoryEntry>> {
        let inner = self.lock().await?;
        Ok(inner
            .history
            .iter()
            .filter(|entry| entry.record_id == record_id)
            .cloned()
            .collect())
    }
}
