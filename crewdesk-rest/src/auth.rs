//! Principal resolution.
//!
//! Authentication primitives (password hashing, login) live outside this
//! service; requests arrive with a bearer token and a [`PrincipalResolver`]
//! turns it into a principal with an active team and role. The default
//! resolver validates HS256 JWTs minted by the auth collaborator with the
//! shared secret.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use crewdesk_core::policy::TeamRole;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

/// The authenticated caller with their active team.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
    pub team_id: i64,
    pub team_role: TeamRole,
}

/// Bearer token → principal.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, bearer: &str) -> Result<Principal, ApiError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    scope: String,
    sub: String,
    email: String,
    tid: i64,
    trole: String,
    iat: i64,
    exp: i64,
}

/// HS256 JWT resolver sharing the server secret.
pub struct JwtPrincipalResolver {
    secret: String,
}

impl JwtPrincipalResolver {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mint a bearer token for a principal. Used by operator tooling and
    /// tests; interactive login is the auth collaborator's job.
    pub fn mint(&self, principal: &Principal, ttl_secs: i64) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = UserClaims {
            scope: "user".to_string(),
            sub: principal.user_id.to_string(),
            email: principal.email.clone(),
            tid: principal.team_id,
            trole: principal.team_role.as_str().to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))
    }
}

impl PrincipalResolver for JwtPrincipalResolver {
    fn resolve(&self, bearer: &str) -> Result<Principal, ApiError> {
        let data = jsonwebtoken::decode::<UserClaims>(
            bearer,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ApiError::Auth(format!("invalid token: {e}")))?;
        let claims = data.claims;
        if claims.scope != "user" {
            return Err(ApiError::Auth("invalid token scope".to_string()));
        }
        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| ApiError::Auth("invalid token subject".to_string()))?;
        Ok(Principal {
            user_id,
            email: claims.email,
            team_id: claims.tid,
            team_role: TeamRole::parse(&claims.trole),
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Auth("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Auth("missing bearer token".to_string()))?;
        state.resolver.resolve(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            user_id: 42,
            email: "a@example.com".to_string(),
            team_id: 7,
            team_role: TeamRole::Admin,
        }
    }

    #[test]
    fn test_mint_and_resolve_roundtrip() {
        let resolver = JwtPrincipalResolver::new("secret");
        let token = resolver.mint(&principal(), 3600).unwrap();
        let resolved = resolver.resolve(&token).unwrap();
        assert_eq!(resolved.user_id, 42);
        assert_eq!(resolved.team_id, 7);
        assert_eq!(resolved.team_role, TeamRole::Admin);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let resolver = JwtPrincipalResolver::new("secret");
        let token = resolver.mint(&principal(), 3600).unwrap();
        let other = JwtPrincipalResolver::new("different");
        assert!(matches!(other.resolve(&token), Err(ApiError::Auth(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let resolver = JwtPrincipalResolver::new("secret");
        let token = resolver.mint(&principal(), -120).unwrap();
        assert!(matches!(resolver.resolve(&token), Err(ApiError::Auth(_))));
    }
}
