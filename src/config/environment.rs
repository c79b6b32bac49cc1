//! Configuración de variables de entorno
//!
//! Este módulo maneja la configuración del entorno. Todas las variables
//! tienen un valor por defecto salvo `DATABASE_URL`: sin ella el servidor
//! arranca con el almacén en memoria.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::notification_bus::DEFAULT_QUEUE_CAPACITY;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Configuración del entorno
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub notify_queue_capacity: usize,
    pub notify_send_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            cors_origins: Vec::new(),
            log_level: "info".to_string(),
            notify_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            notify_send_timeout: Duration::from_millis(2_000),
            store_timeout: Duration::from_millis(5_000),
        }
    }
}

impl EnvironmentConfig {
    /// Lee la configuración del proceso (después de `dotenvy::dotenv()`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Lee la configuración con una función de búsqueda arbitraria
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            environment: value("ENVIRONMENT").unwrap_or(defaults.environment),
            host: value("HOST").unwrap_or(defaults.host),
            port: parse_or(&value, "PORT", defaults.port)?,
            database_url: value("DATABASE_URL"),
            jwt_secret: value("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            cors_origins: value("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            log_level: value("LOG_LEVEL").unwrap_or(defaults.log_level),
            notify_queue_capacity: parse_or(
                &value,
                "NOTIFY_QUEUE_CAPACITY",
                defaults.notify_queue_capacity,
            )?,
            notify_send_timeout: Duration::from_millis(parse_or(
                &value,
                "NOTIFY_SEND_TIMEOUT_MS",
                defaults.notify_send_timeout.as_millis() as u64,
            )?),
            store_timeout: Duration::from_millis(parse_or(
                &value,
                "STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
        };
        config.check()?;
        Ok(config)
    }

    /// En producción el secreto JWT tiene que venir del entorno
    fn check(&self) -> Result<()> {
        if self.is_production() && self.jwt_secret == DEV_JWT_SECRET {
            anyhow::bail!("JWT_SECRET es obligatorio con ENVIRONMENT=production");
        }
        Ok(())
    }

    /// Verificar si estamos en modo producción
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Obtener la dirección del servidor
    pub fn server_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, F>(value: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match value(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} debe ser un número válido (valor: '{}')", key, raw)),
        None => Ok(default),
    }
}
