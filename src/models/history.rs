//! Modelo de Historial
//!
//! Entradas inmutables, una por cada mutación de un trámite o de un archivo.
//! Se identifican por (entidad, id, secuencia) y nunca se actualizan ni borran.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Campos de la entidad después de la operación
pub type Snapshot = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Record,
    Attachment,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Record => "record",
            EntityKind::Attachment => "attachment",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(EntityKind::Record),
            "attachment" => Ok(EntityKind::Attachment),
            other => Err(format!("tipo de entidad desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("operación desconocida: {}", other)),
        }
    }
}

/// Autor de una mutación: nombre de usuario o el centinela `system`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub const SYSTEM: &'static str = "system";

    pub fn system() -> Self {
        Actor(Self::SYSTEM.to_string())
    }

    /// Un actor ausente o vacío se resuelve a `system` en vez de fallar
    pub fn resolve(username: Option<&str>) -> Self {
        match username.map(str::trim) {
            Some(name) if !name.is_empty() => Actor(name.to_string()),
            _ => Self::system(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    /// Nombre de usuario, si no es el sistema
    pub fn username(&self) -> Option<&str> {
        if self.is_system() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entrada persistida en `history_entries`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    /// Trámite dueño; se conserva aunque el trámite o el archivo se borren
    pub record_id: i64,
    /// Secuencia por entidad, empieza en 1
    pub seq: i32,
    pub recorded_at: DateTime<Utc>,
    pub actor: Actor,
    pub operation: Operation,
    pub snapshot: Snapshot,
}

/// Entrada pendiente de escribir; el almacén asigna `id` y `seq` dentro de la transacción
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub record_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub actor: Actor,
    pub operation: Operation,
    pub snapshot: Snapshot,
}

impl NewHistoryEntry {
    pub fn into_entry(self, id: i64, seq: i32) -> HistoryEntry {
        HistoryEntry {
            id,
            entity_kind: self.entity_kind,
            entity_id: self.entity_id,
            record_id: self.record_id,
            seq,
            recorded_at: self.recorded_at,
            actor: self.actor,
            operation: self.operation,
            snapshot: self.snapshot,
        }
    }
}

/// Cambio de un campo entre dos snapshots consecutivos
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}
