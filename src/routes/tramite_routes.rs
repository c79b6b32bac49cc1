//! Rutas de trámites: CRUD, archivos, listas por módulo e historial.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};

use crate::dto::tramite_dto::{
    ApiResponse, CreateAttachmentRequest, CreateTramiteRequest, ModuleListResponse,
    TramiteDetailResponse, UpdateTramiteRequest,
};
use crate::middleware::auth::{admin_middleware, AuthenticatedUser};
use crate::models::attachment::Attachment;
use crate::models::projection::Projection;
use crate::models::tramite::Module;
use crate::services::history_engine::Timeline;
use crate::state::AppState;
use crate::utils::errors::{AppError, AppResult};
use crate::utils::validation::parse_body;

pub fn create_tramite_router() -> Router<AppState> {
    // El borrado exige rol admin además de la autenticación general
    let admin_only = Router::new()
        .route("/tramites/:id", delete(delete_tramite))
        .route_layer(middleware::from_fn(admin_middleware));

    Router::new()
        .route("/tramites", post(create_tramite))
        .route("/tramites/:id", get(get_tramite).put(update_tramite))
        .route("/tramites/:id/timeline", get(get_timeline))
        .route("/tramites/:id/attachments", post(add_attachment))
        .route("/attachments/:id", delete(delete_attachment))
        .route("/modules/:module/tramites", get(list_module))
        .merge(admin_only)
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

async fn create_tramite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ApiResponse<Projection>>)> {
    let request: CreateTramiteRequest = parse_body(&body)?;
    let new = request.into_new_tramite(Some(user.username.clone()))?;

    let tramite = state.tramites.create(new, &user.actor()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            Projection::of(&tramite, today()),
            format!("Trámite {} creado", tramite.plate),
        )),
    ))
}

async fn get_tramite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TramiteDetailResponse>> {
    let (tramite, attachments) = state.tramites.get(id).await?;
    Ok(Json(TramiteDetailResponse {
        tramite: Projection::of(&tramite, today()),
        attachments,
    }))
}

async fn update_tramite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<Projection>>> {
    let request: UpdateTramiteRequest = parse_body(&body)?;
    let tramite = state
        .tramites
        .update(id, request.into_patch()?, &user.actor())
        .await?;
    Ok(Json(ApiResponse::success(Projection::of(&tramite, today()))))
}

async fn delete_tramite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<StatusCode> {
    state.tramites.delete(id, &user.actor()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Timeline>> {
    Ok(Json(state.history.timeline(id).await?))
}

async fn add_attachment(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ApiResponse<Attachment>>)> {
    let request: CreateAttachmentRequest = parse_body(&body)?;
    let attachment = state
        .tramites
        .add_attachment(record_id, request.into(), &user.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(attachment))))
}

async fn delete_attachment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<StatusCode> {
    state.tramites.delete_attachment(id, &user.actor()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_module(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<ModuleListResponse>> {
    let module = Module::from_slug(&slug)
        .ok_or_else(|| AppError::NotFound(format!("Módulo '{}' no existe", slug)))?;
    let tramites = state.tramites.list_module(module).await?;
    Ok(Json(ModuleListResponse {
        module,
        total: tramites.len(),
        tramites,
    }))
}
