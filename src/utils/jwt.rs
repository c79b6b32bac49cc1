//! Utilidades JWT
//!
//! Emisión y verificación de tokens firmados con HS256. El `sub` es el
//! nombre de usuario, que termina siendo el actor del historial.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::utils::errors::AppError;

/// Claims del JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,  // username
    pub role: String, // admin | seller | accountant | client
    pub exp: usize,   // expiration timestamp
    pub iat: usize,   // issued at timestamp
}

/// Generar JWT token para un usuario
pub fn generate_token(
    username: &str,
    role: &str,
    secret: &str,
    expiration_secs: i64,
) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let expires_at = now + chrono::Duration::seconds(expiration_secs);

    let claims = JwtClaims {
        sub: username.to_string(),
        role: role.to_string(),
        exp: expires_at.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| AppError::Unauthorized(format!("No se pudo generar el token: {}", e)))
}

/// Validar y decodificar JWT token
pub fn validate_token(token: &str, secret: &str) -> Result<JwtClaims, AppError> {
    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Token inválido o expirado".to_string()))
}

/// Extraer token del header Authorization
pub fn extract_token_from_header(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = generate_token("ana", "admin", "secreto", 60).unwrap();
        let claims = validate_token(&token, "secreto").unwrap();
        assert_eq!(claims.sub, "ana");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = generate_token("ana", "admin", "secreto", 60).unwrap();
        assert!(matches!(
            validate_token(&token, "otro"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = generate_token("ana", "admin", "secreto", -3600).unwrap();
        assert!(validate_token(&token, "secreto").is_err());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(extract_token_from_header("Bearer abc"), Some("abc"));
        assert_eq!(extract_token_from_header("Basic abc"), None);
    }
}
