//! Middleware de autenticación JWT
//!
//! Extrae el bearer token, lo valida, evalúa el `AuthorizationGuard` de la
//! ruta y deja el `AuthenticatedUser` en las extensiones de la request. El
//! nombre de usuario es el actor de cada entrada de historial.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::models::history::Actor;
use crate::state::AppState;
use crate::utils::errors::{AppError, AppResult};
use crate::utils::jwt::{extract_token_from_header, validate_token, JwtClaims};

/// Roles del personal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Seller,
    Accountant,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Seller => "seller",
            Role::Accountant => "accountant",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "seller" => Ok(Role::Seller),
            "accountant" => Ok(Role::Accountant),
            "client" => Ok(Role::Client),
            other => Err(AppError::Unauthorized(format!("Rol desconocido: {}", other))),
        }
    }
}

/// Usuario autenticado que se inyecta en las requests
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn actor(&self) -> Actor {
        Actor::resolve(Some(self.username.as_str()))
    }
}

impl TryFrom<JwtClaims> for AuthenticatedUser {
    type Error = AppError;

    fn try_from(claims: JwtClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            role: claims.role.parse()?,
            username: claims.sub,
        })
    }
}

/// Decide si un usuario autenticado puede continuar
pub trait AuthorizationGuard: Send + Sync {
    fn authorize(&self, user: &AuthenticatedUser) -> AppResult<()>;
}

/// Permite solo los roles listados
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Vec<Role>,
}

impl RoleGuard {
    pub fn new(allowed: Vec<Role>) -> Self {
        Self { allowed }
    }

    /// Personal interno: todos menos clientes
    pub fn staff() -> Self {
        Self::new(vec![Role::Admin, Role::Seller, Role::Accountant])
    }

    pub fn admin() -> Self {
        Self::new(vec![Role::Admin])
    }
}

impl AuthorizationGuard for RoleGuard {
    fn authorize(&self, user: &AuthenticatedUser) -> AppResult<()> {
        if self.allowed.contains(&user.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "El rol '{}' no tiene acceso a este recurso",
                user.role
            )))
        }
    }
}

/// Valida un token y lo convierte en usuario; lo usa también el WebSocket
pub fn authenticate(token: &str, secret: &str) -> AppResult<AuthenticatedUser> {
    AuthenticatedUser::try_from(validate_token(token, secret)?)
}

/// Middleware de autenticación JWT para todo `/api`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_token_from_header)
        .ok_or_else(|| AppError::Unauthorized("Token de autorización requerido".to_string()))?;

    let user = authenticate(token, &state.config.jwt_secret)?;
    state.guard.authorize(&user)?;
    debug!("🔐 {} ({}) autenticado", user.username, user.role);

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Segunda barrera para operaciones de administración; corre después de `auth_middleware`
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Usuario no autenticado".to_string()))?;
    RoleGuard::admin().authorize(user)?;
    Ok(next.run(request).await)
}
