//! Modelo de Archivo
//!
//! Metadatos de un archivo adjunto a un trámite. El binario vive en el
//! almacenamiento externo; aquí solo se guarda la referencia.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tipos MIME aceptados para adjuntos
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["application/pdf", "image/png", "image/jpeg", "image/jpg"];

/// Archivo - mapea a la tabla `tramite_attachments` (ON DELETE CASCADE)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub record_id: i64,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_ref: String,
}

impl NewAttachment {
    pub fn into_attachment(self, id: i64, record_id: i64, now: DateTime<Utc>) -> Attachment {
        Attachment {
            id,
            record_id,
            original_name: self.original_name,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            storage_ref: self.storage_ref,
            created_at: now,
        }
    }
}

pub fn is_allowed_mime_type(mime_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime_type)
}
