//! Almacén Postgres
//!
//! Cada mutación abre una transacción, bloquea la fila del trámite con
//! `FOR UPDATE`, escribe el cambio y su entrada de historial y confirma.
//! Un error en cualquier paso descarta la transacción completa.
//!
//! El límite de tiempo lo pone el servidor (`statement_timeout` y
//! `lock_timeout` locales a la transacción): una sentencia lenta aborta la
//! transacción antes del commit, y un commit ya enviado nunca se cancela.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::convert::TryFrom;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::attachment::{Attachment, NewAttachment};
use crate::models::history::{
    Actor, HistoryEntry, NewHistoryEntry, Operation, Snapshot,
};
use crate::models::tramite::{DocumentChecklist, Module, NewTramite, Tramite, TramitePatch};
use crate::models::transition::TransitionCommand;
use crate::repositories::record_store::RecordStore;
use crate::services::history_engine::HistoryEngine;
use crate::utils::errors::{not_found_error, AppError, AppResult};

#[derive(Debug, sqlx::FromRow)]
struct TramiteRow {
    id: i64,
    plate: String,
    vehicle_type: String,
    department_id: i32,
    municipality_id: i32,
    module: i16,
    status: String,
    status_detail: Option<String>,
    tracker_status: String,
    provider_id: Option<i64>,
    received_date: Option<NaiveDate>,
    package: Option<String>,
    document_checklist: Json<DocumentChecklist>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TramiteRow> for Tramite {
    type Error = AppError;

    fn try_from(row: TramiteRow) -> Result<Self, Self::Error> {
        Ok(Tramite {
            id: row.id,
            plate: row.plate,
            vehicle_type: row.vehicle_type.parse().map_err(AppError::Store)?,
            department_id: row.department_id,
            municipality_id: row.municipality_id,
            module: Module::from_code(row.module).ok_or_else(|| {
                AppError::Store(format!("código de módulo desconocido: {}", row.module))
            })?,
            status: row.status.parse().map_err(AppError::Store)?,
            status_detail: row.status_detail,
            tracker_status: row.tracker_status.parse().map_err(AppError::Store)?,
            provider_id: row.provider_id,
            received_date: row.received_date,
            package: row.package,
            document_checklist: row.document_checklist.0,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRow {
    id: i64,
    record_id: i64,
    original_name: String,
    mime_type: String,
    size_bytes: i64,
    storage_ref: String,
    created_at: DateTime<Utc>,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            record_id: row.record_id,
            original_name: row.original_name,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            storage_ref: row.storage_ref,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    entity_kind: String,
    entity_id: i64,
    record_id: i64,
    seq: i32,
    recorded_at: DateTime<Utc>,
    actor: String,
    operation: String,
    snapshot: Json<Snapshot>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryEntry {
            id: row.id,
            entity_kind: row.entity_kind.parse().map_err(AppError::Store)?,
            entity_id: row.entity_id,
            record_id: row.record_id,
            seq: row.seq,
            recorded_at: row.recorded_at,
            actor: Actor::resolve(Some(row.actor.as_str())),
            operation: row.operation.parse().map_err(AppError::Store)?,
            snapshot: row.snapshot.0,
        })
    }
}

pub struct PgRecordStore {
    pool: PgPool,
    store_timeout: Duration,
}

/// Sentencias que acotan cada transacción; sin unidad, Postgres las lee en ms
fn timeout_statements(timeout: Duration) -> [String; 2] {
    let millis = timeout.as_millis().max(1);
    [
        format!("SET LOCAL statement_timeout = {}", millis),
        format!("SET LOCAL lock_timeout = {}", millis),
    ]
}

impl PgRecordStore {
    pub fn new(pool: PgPool, store_timeout: Duration) -> Self {
        Self {
            pool,
            store_timeout,
        }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        for statement in timeout_statements(self.store_timeout) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        Ok(tx)
    }

    async fn lock_tramite(conn: &mut PgConnection, id: i64) -> AppResult<Tramite> {
        let row = sqlx::query_as::<_, TramiteRow>("SELECT * FROM tramites WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| not_found_error("Trámite", id))?;
        Tramite::try_from(row)
    }

    async fn check_location(
        conn: &mut PgConnection,
        department_id: i32,
        municipality_id: i32,
    ) -> AppResult<()> {
        let owner: Option<(i32,)> =
            sqlx::query_as("SELECT department_id FROM municipalities WHERE id = $1")
                .bind(municipality_id)
                .fetch_optional(&mut *conn)
                .await?;

        match owner {
            Some((owner,)) if owner == department_id => Ok(()),
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

    async fn check_provider(conn: &mut PgConnection, provider_id: Option<i64>) -> AppResult<()> {
        let Some(provider_id) = provider_id else {
            return Ok(());
        };
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM providers WHERE id = $1)")
                .bind(provider_id)
                .fetch_one(&mut *conn)
                .await?;
        if !exists {
            return Err(AppError::Validation(format!(
                "El proveedor {} no existe",
                provider_id
            )));
        }
        Ok(())
    }

    /// Escribe todas las columnas mutables del trámite
    async fn persist_tramite(conn: &mut PgConnection, tramite: &Tramite) -> AppResult<Tramite> {
        let row = sqlx::query_as::<_, TramiteRow>(
            r#"
            UPDATE tramites SET
                plate = $2, vehicle_type = $3, department_id = $4, municipality_id = $5,
                module = $6, status = $7, status_detail = $8, tracker_status = $9,
                provider_id = $10, received_date = $11, package = $12,
                document_checklist = $13, updated_at = $14
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tramite.id)
        .bind(&tramite.plate)
        .bind(tramite.vehicle_type.as_str())
        .bind(tramite.department_id)
        .bind(tramite.municipality_id)
        .bind(tramite.module.code())
        .bind(tramite.status.as_str())
        .bind(&tramite.status_detail)
        .bind(tramite.tracker_status.as_str())
        .bind(tramite.provider_id)
        .bind(tramite.received_date)
        .bind(&tramite.package)
        .bind(Json(&tramite.document_checklist))
        .bind(tramite.updated_at)
        .fetch_one(&mut *conn)
        .await?;

        Tramite::try_from(row)
    }

    /// `seq` se calcula dentro de la misma transacción; el índice único
    /// (entity_kind, entity_id, seq) rechaza cualquier carrera restante.
    async fn insert_history(conn: &mut PgConnection, entry: NewHistoryEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO history_entries
                (entity_kind, entity_id, record_id, seq, recorded_at, actor, operation, snapshot)
            SELECT $1, $2, $3, COALESCE(MAX(seq), 0) + 1, $4, $5, $6, $7
            FROM history_entries
            WHERE entity_kind = $1 AND entity_id = $2
            "#,
        )
        .bind(entry.entity_kind.as_str())
        .bind(entry.entity_id)
        .bind(entry.record_id)
        .bind(entry.recorded_at)
        .bind(entry.actor.as_str())
        .bind(entry.operation.as_str())
        .bind(Json(&entry.snapshot))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_tramite(&self, new: NewTramite, actor: &Actor) -> AppResult<Tramite> {
        let mut tx = self.begin().await?;
        Self::check_location(&mut tx, new.department_id, new.municipality_id).await?;

        let now = Utc::now();
        let row = sqlx::query_as::<_, TramiteRow>(
            r#"
            INSERT INTO tramites
                (plate, vehicle_type, department_id, municipality_id, module, status,
                 tracker_status, package, document_checklist, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING *
            "#,
        )
        .bind(&new.plate)
        .bind(new.vehicle_type.as_str())
        .bind(new.department_id)
        .bind(new.municipality_id)
        .bind(Module::Preparation.code())
        .bind(new.status.as_str())
        .bind("none")
        .bind(&new.package)
        .bind(Json(&new.document_checklist))
        .bind(&new.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let tramite = Tramite::try_from(row)?;

        let entry = HistoryEngine::record_snapshot(&tramite, Operation::Create, actor, now)?;
        Self::insert_history(&mut tx, entry).await?;
        tx.commit().await?;

        info!("✅ Trámite {} ({}) creado por {}", tramite.id, tramite.plate, actor);
        Ok(tramite)
    }

    async fn find_tramite(&self, id: i64) -> AppResult<Option<Tramite>> {
        sqlx::query_as::<_, TramiteRow>("SELECT * FROM tramites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Tramite::try_from)
            .transpose()
    }

    async fn list_by_module(&self, module: Module) -> AppResult<Vec<Tramite>> {
        let rows = sqlx::query_as::<_, TramiteRow>(
            "SELECT * FROM tramites WHERE module = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(module.code())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Tramite::try_from).collect()
    }

    async fn update_tramite(
        &self,
        id: i64,
        patch: &TramitePatch,
        actor: &Actor,
    ) -> AppResult<Tramite> {
        let mut tx = self.begin().await?;
        let mut staged = Self::lock_tramite(&mut tx, id).await?;
        patch.apply_to(&mut staged);

        if patch.touches_location() {
            Self::check_location(&mut tx, staged.department_id, staged.municipality_id).await?;
        }
        Self::check_provider(&mut tx, patch.provider_id).await?;

        let now = Utc::now();
        staged.updated_at = now;
        let tramite = Self::persist_tramite(&mut tx, &staged).await?;

        let entry = HistoryEngine::record_snapshot(&tramite, Operation::Update, actor, now)?;
        Self::insert_history(&mut tx, entry).await?;
        tx.commit().await?;

        debug!("✏️ Trámite {} actualizado por {}", id, actor);
        Ok(tramite)
    }

    async fn apply_transition(
        &self,
        id: i64,
        command: &TransitionCommand,
        actor: &Actor,
    ) -> AppResult<Tramite> {
        let mut tx = self.begin().await?;
        let mut staged = Self::lock_tramite(&mut tx, id).await?;

        let now = Utc::now();
        command.apply(&mut staged, now)?;
        Self::check_provider(&mut tx, command.payload().provider_id).await?;
        let tramite = Self::persist_tramite(&mut tx, &staged).await?;

        let entry = HistoryEngine::record_snapshot(&tramite, Operation::Update, actor, now)?;
        Self::insert_history(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(tramite)
    }

    async fn delete_tramite(&self, id: i64, actor: &Actor) -> AppResult<Tramite> {
        let mut tx = self.begin().await?;
        let tramite = Self::lock_tramite(&mut tx, id).await?;
        let now = Utc::now();

        let attachments = sqlx::query_as::<_, AttachmentRow>(
            "SELECT * FROM tramite_attachments WHERE record_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        for row in attachments {
            let attachment = Attachment::from(row);
            let entry =
                HistoryEngine::record_snapshot(&attachment, Operation::Delete, actor, now)?;
            Self::insert_history(&mut tx, entry).await?;
        }

        let entry = HistoryEngine::record_snapshot(&tramite, Operation::Delete, actor, now)?;
        Self::insert_history(&mut tx, entry).await?;

        // Los archivos caen por ON DELETE CASCADE
        sqlx::query("DELETE FROM tramites WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("🗑️ Trámite {} eliminado por {}", id, actor);
        Ok(tramite)
    }

    async fn attachments_of(&self, record_id: i64) -> AppResult<Vec<Attachment>> {
        let rows = sqlx::query_as::<_, AttachmentRow>(
            "SELECT * FROM tramite_attachments WHERE record_id = $1 ORDER BY id",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Attachment::from).collect())
    }

    async fn add_attachment(
        &self,
        record_id: i64,
        new: NewAttachment,
        actor: &Actor,
    ) -> AppResult<Attachment> {
        let mut tx = self.begin().await?;
        Self::lock_tramite(&mut tx, record_id).await?;

        let now = Utc::now();
        let row = sqlx::query_as::<_, AttachmentRow>(
            r#"
            INSERT INTO tramite_attachments
                (record_id, original_name, mime_type, size_bytes, storage_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(record_id)
        .bind(&new.original_name)
        .bind(&new.mime_type)
        .bind(new.size_bytes)
        .bind(&new.storage_ref)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let attachment = Attachment::from(row);

        let entry = HistoryEngine::record_snapshot(&attachment, Operation::Create, actor, now)?;
        Self::insert_history(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(attachment)
    }

    async fn delete_attachment(&self, id: i64, actor: &Actor) -> AppResult<Attachment> {
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, AttachmentRow>(
            "SELECT * FROM tramite_attachments WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| not_found_error("Archivo", id))?;
        let attachment = Attachment::from(row);

        let entry =
            HistoryEngine::record_snapshot(&attachment, Operation::Delete, actor, Utc::now())?;
        Self::insert_history(&mut tx, entry).await?;

        sqlx::query("DELETE FROM tramite_attachments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(attachment)
    }

    async fn history_for_record(&self, record_id: i64) -> AppResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT * FROM history_entries
            WHERE record_id = $1
            ORDER BY recorded_at, entity_kind, entity_id, seq
            "#,
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntry::try_from).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_transaction_is_bounded() {
        let statements = timeout_statements(Duration::from_millis(750));
        assert_eq!(statements[0], "SET LOCAL statement_timeout = 750");
        assert_eq!(statements[1], "SET LOCAL lock_timeout = 750");
    }

    #[test]
    fn test_zero_timeout_is_not_unlimited() {
        // en Postgres 0 significa "sin límite"
        let statements = timeout_statements(Duration::ZERO);
        assert!(statements.iter().all(|s| s.ends_with("= 1")));
    }
}
