//! Utilidades de validación
//!
//! Este módulo contiene funciones helper para validación de datos
//! y conversión de tipos de las peticiones.

use axum::body::Bytes;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::utils::errors::{AppError, AppResult};

lazy_static! {
    static ref PLATE_RE: Regex = Regex::new(r"^[A-Z0-9-]{1,10}$").expect("regex de placa válida");
}

/// Normaliza una placa a mayúsculas y verifica su formato
pub fn normalize_plate(value: &str) -> AppResult<String> {
    let plate = value.trim().to_uppercase();
    if !PLATE_RE.is_match(&plate) {
        return Err(AppError::Validation(format!(
            "Placa inválida '{}': use de 1 a 10 letras, dígitos o guiones",
            value
        )));
    }
    Ok(plate)
}

/// Validar y convertir string a fecha (YYYY-MM-DD)
pub fn parse_date(field: &str, value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!(
            "Fecha inválida en '{}': '{}' (formato esperado YYYY-MM-DD)",
            field, value
        ))
    })
}

/// Convierte un campo de fecha opcional; un string vacío cuenta como ausente
pub fn parse_optional_date(field: &str, value: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_date(field, raw).map(Some),
        _ => Ok(None),
    }
}

/// Cuerpo JSON opcional: vacío equivale a `T::default()`, malformado es 400
pub fn parse_optional_body<T>(body: &Bytes) -> AppResult<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Cuerpo JSON inválido: {}", e)))
}

/// Cuerpo JSON obligatorio y validado; errores de formato y de reglas son 400
pub fn parse_body<T>(body: &Bytes) -> AppResult<T>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Cuerpo JSON inválido: {}", e)))?;
    value.validate()?;
    Ok(value)
}
