use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

use tramites_tracker::config::{DatabaseConfig, EnvironmentConfig};
use tramites_tracker::database::DatabaseConnection;
use tramites_tracker::repositories::{MemoryRecordStore, PgRecordStore, RecordStore};
use tramites_tracker::routes::create_app_router;
use tramites_tracker::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();
    let config = EnvironmentConfig::from_env()?;

    // Configurar logging
    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚗 Tramites Tracker - API de seguimiento de trámites");
    info!("================================================");

    // Elegir almacén
    let store: Arc<dyn RecordStore> = match &config.database_url {
        Some(url) => {
            let mut database = DatabaseConfig::new(url.clone());
            database.acquire_timeout = config.store_timeout;
            let connection = match DatabaseConnection::connect(&database).await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("❌ Error conectando a la base de datos: {:#}", e);
                    return Err(e);
                }
            };
            Arc::new(PgRecordStore::new(connection.pool(), config.store_timeout))
        }
        None => {
            warn!("⚠️ DATABASE_URL no definida: usando almacén en memoria (los datos se pierden al reiniciar)");
            Arc::new(MemoryRecordStore::seeded().with_lock_timeout(config.store_timeout))
        }
    };

    let addr: SocketAddr = config.server_url().parse()?;
    let app = create_app_router(AppState::new(config, store));

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET  /health - Estado del servicio");
    info!("   GET  /ws/:module?token= - Eventos en tiempo real por módulo");
    info!("   GET  /ws/users/online?token= - Usuarios conectados");
    info!("🔀 Transiciones:");
    info!("   POST /api/preparation/:id/send-to-tracker");
    info!("   POST /api/preparation/:id/finalize");
    info!("   POST /api/tracker/:id/finalize");
    info!("   POST /api/finalized/:id/archive");
    info!("   POST /api/archived/:id/finalize");
    info!("📋 Trámites:");
    info!("   POST /api/tramites - Crear trámite");
    info!("   GET  /api/tramites/:id - Detalle");
    info!("   PUT  /api/tramites/:id - Editar campos");
    info!("   DELETE /api/tramites/:id - Eliminar (admin)");
    info!("   GET  /api/tramites/:id/timeline - Historial");
    info!("   POST /api/tramites/:id/attachments - Registrar archivo");
    info!("   DELETE /api/attachments/:id - Eliminar archivo");
    info!("   GET  /api/modules/:module/tramites - Lista de trabajo");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Error del servidor: {}", e);
        return Err(e.into());
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo escuchar Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo escuchar SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
