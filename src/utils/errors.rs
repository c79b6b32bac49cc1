//! Sistema de manejo de errores
//!
//! Este módulo define los errores del sistema y su conversión a respuestas
//! HTTP con el formato `{"error": "<mensaje>", "code": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::tramite::Module;

/// Código SQLSTATE de violación de llave foránea
const FOREIGN_KEY_VIOLATION: &str = "23503";
/// `statement_timeout` y `lock_timeout` vencidos
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Errores principales de la aplicación
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Datos inválidos: {0}")]
    InvalidPayload(#[from] validator::ValidationErrors),

    #[error("{0}")]
    NotFound(String),

    #[error("El trámite {record_id} no está en el módulo {expected}; está en {actual}")]
    StateConflict {
        record_id: i64,
        expected: Module,
        actual: Module,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => {
                    return AppError::Validation(format!("Referencia inválida: {}", db.message()));
                }
                Some(QUERY_CANCELED) | Some(LOCK_NOT_AVAILABLE) => {
                    return AppError::Store(format!(
                        "el almacén no respondió a tiempo; la transacción se descartó ({})",
                        db.message()
                    ));
                }
                _ => {}
            }
        }
        AppError::Store(e.to_string())
    }
}

/// Respuesta de error para la API
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AppError::StateConflict { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidPayload(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::StateConflict { .. } => "STATE_CONFLICT",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let body = match &self {
            AppError::Store(msg) => {
                error!("❌ Error de almacenamiento: {}", msg);
                ErrorResponse {
                    error: "Error de almacenamiento; la operación no se aplicó".to_string(),
                    code,
                    details: None,
                }
            }
            AppError::InvalidPayload(errors) => {
                warn!("⚠️ Datos inválidos: {}", errors);
                ErrorResponse {
                    error: self.to_string(),
                    code,
                    details: serde_json::to_value(errors).ok(),
                }
            }
            AppError::StateConflict {
                record_id,
                expected,
                actual,
            } => {
                warn!("⚠️ Conflicto de módulo en trámite {}: esperado {}, actual {}", record_id, expected, actual);
                ErrorResponse {
                    error: self.to_string(),
                    code,
                    details: Some(json!({
                        "record_id": record_id,
                        "expected_module": expected,
                        "current_module": actual,
                    })),
                }
            }
            other => {
                warn!("⚠️ {} ({})", other, code);
                ErrorResponse {
                    error: other.to_string(),
                    code,
                    details: None,
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Resultado tipado para operaciones que pueden fallar
pub type AppResult<T> = Result<T, AppError>;

/// Función helper para crear errores de recurso no encontrado
pub fn not_found_error(resource: &str, id: i64) -> AppError {
    AppError::NotFound(format!("{} con id {} no encontrado", resource, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_state_conflict_names_current_module() {
        let (status, body) = body_of(AppError::StateConflict {
            record_id: 7,
            expected: Module::Finalized,
            actual: Module::Archived,
        })
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "STATE_CONFLICT");
        assert!(body["error"].as_str().unwrap().contains("Archived"));
        assert_eq!(body["details"]["current_module"], "Archived");
    }

    #[tokio::test]
    async fn test_store_error_is_500_without_internals() {
        let (status, body) = body_of(AppError::Store("connection reset".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_not_found_is_404() {
        let (status, body) = body_of(not_found_error("Trámite", 99)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Trámite con id 99 no encontrado");
    }
}
