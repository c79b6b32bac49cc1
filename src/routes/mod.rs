//! Router de la aplicación
//!
//! `/api/*` pasa por el middleware JWT; `/health` y `/ws/:module` quedan
//! fuera (el WebSocket valida el token de la query string).

pub mod health_routes;
pub mod realtime_routes;
pub mod tramite_routes;
pub mod transition_routes;

use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::middleware::auth::auth_middleware;
use crate::middleware::cors::cors_middleware;
use crate::state::AppState;

pub fn create_app_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(transition_routes::create_transition_router())
        .merge(tramite_routes::create_tramite_router())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        .merge(health_routes::create_health_router())
        .merge(realtime_routes::create_realtime_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_middleware(&state.config.cors_origins))
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}
