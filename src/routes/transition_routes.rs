//! Rutas de transición entre módulos
//!
//! Una ruta por disparador: el módulo origen esperado sale de la URL, nunca
//! del cuerpo. El cuerpo es opcional; si viene, debe ser JSON válido.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use validator::Validate;

use crate::dto::tramite_dto::{FinalizeRequest, SendToTrackerRequest, TransitionResponse};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::tramite::Module;
use crate::state::AppState;
use crate::utils::errors::AppResult;
use crate::utils::validation::parse_optional_body;

pub fn create_transition_router() -> Router<AppState> {
    Router::new()
        .route("/preparation/:id/send-to-tracker", post(send_to_tracker))
        .route("/preparation/:id/finalize", post(finalize_from_preparation))
        .route("/tracker/:id/finalize", post(finalize_from_tracker))
        .route("/finalized/:id/archive", post(archive))
        .route("/archived/:id/finalize", post(finalize_from_archived))
}

async fn send_to_tracker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<Json<TransitionResponse>> {
    let request: SendToTrackerRequest = parse_optional_body(&body)?;
    request.validate()?;

    let result = state
        .transitions
        .send_to_tracker(id, request.into_payload()?, &user.actor())
        .await?;
    Ok(Json(result.into()))
}

async fn finalize(
    state: &AppState,
    source: Module,
    id: i64,
    user: &AuthenticatedUser,
    body: &Bytes,
) -> AppResult<Json<TransitionResponse>> {
    let request: FinalizeRequest = parse_optional_body(body)?;
    request.validate()?;

    let result = state
        .transitions
        .finalize(source, id, request.into(), &user.actor())
        .await?;
    Ok(Json(result.into()))
}

async fn finalize_from_preparation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<Json<TransitionResponse>> {
    finalize(&state, Module::Preparation, id, &user, &body).await
}

async fn finalize_from_tracker(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<Json<TransitionResponse>> {
    finalize(&state, Module::Tracker, id, &user, &body).await
}

async fn finalize_from_archived(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<Json<TransitionResponse>> {
    finalize(&state, Module::Archived, id, &user, &body).await
}

// Archivar no lleva cuerpo; si llega `status_detail` se ignora
async fn archive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<TransitionResponse>> {
    let result = state.transitions.archive(id, &user.actor()).await?;
    Ok(Json(result.into()))
}
