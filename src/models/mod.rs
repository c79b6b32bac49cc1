//! Modelos del sistema
//!
//! Trámites, archivos, historial, catálogos, comandos de transición y las
//! proyecciones que ve cada módulo.

pub mod attachment;
pub mod catalog;
pub mod history;
pub mod projection;
pub mod tramite;
pub mod transition;
