//! Bearer-token authentication: HS256-signed JWTs with `{sub, role, exp}`.
//! Tokens are minted elsewhere (registration/login is an external
//! collaborator); this crate only validates them and gates roles.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tourist,
    Authority,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

/// Verification material, shared via `AppState`.
#[derive(Clone)]
pub struct JwtKeys {
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self { decoding: DecodingKey::from_secret(secret.as_bytes()) }
    }

    /// Validate signature and expiry. Any failure is an auth failure; the
    /// caller never learns which check tripped.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

/// Any authenticated principal.
pub struct Authenticated(pub Claims);

/// Authenticated tourist; `.0` is the tourist id.
pub struct TouristAuth(pub String);

/// Authenticated authority or admin; `.0` is the authority id.
pub struct AuthorityAuth(pub String);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(bearer_token(parts)?)?;
        Ok(Authenticated(claims))
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for TouristAuth
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authenticated(claims) = Authenticated::from_request_parts(parts, state).await?;
        if claims.role != Role::Tourist {
            return Err(ApiError::Forbidden);
        }
        Ok(TouristAuth(claims.sub))
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthorityAuth
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authenticated(claims) = Authenticated::from_request_parts(parts, state).await?;
        if !matches!(claims.role, Role::Authority | Role::Admin) {
            return Err(ApiError::Forbidden);
        }
        Ok(AuthorityAuth(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn mint(secret: &str, sub: &str, role: Role, ttl_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            role,
            exp: Utc::now().timestamp() + ttl_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verify_roundtrip() {
        let keys = JwtKeys::new(SECRET);
        let claims = keys.verify(&mint(SECRET, "T1", Role::Tourist, 3600)).unwrap();
        assert_eq!(claims.sub, "T1");
        assert_eq!(claims.role, Role::Tourist);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn wrong_secret_rejected() {
        let keys = JwtKeys::new("ffffffffffffffffffffffffffffffff");
        assert!(keys.verify(&mint(SECRET, "T1", Role::Tourist, 3600)).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let keys = JwtKeys::new(SECRET);
        // Past the validator's default leeway.
        assert!(keys.verify(&mint(SECRET, "T1", Role::Tourist, -600)).is_err());
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(JwtKeys::new(SECRET).verify("not-a-jwt").is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Authority).unwrap(), "\"authority\"");
        let back: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(back, Role::Admin);
    }
}
