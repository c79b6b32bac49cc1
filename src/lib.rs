//! Backend de seguimiento de trámites vehiculares
//!
//! Un trámite recorre los módulos Preparación → Tracker → Finalizados ↔
//! Archivadas. Cada cambio queda en el historial y se publica en tiempo
//! real a los clientes del módulo afectado.

pub mod config;
pub mod database;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
