//! Catálogos de referencia: departamentos, municipios y proveedores.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: i32,
    pub name: String,
    pub department_id: i32,
    pub active: bool,
}

/// Proveedor encargado del trámite en el módulo Tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub active: bool,
}
