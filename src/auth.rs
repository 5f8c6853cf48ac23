use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AppError;

/// Caller identity as resolved by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthUser, AppError>;
}

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolves the caller from the request headers; the body is never trusted for identity.
pub async fn authenticate(
    verifier: &dyn AuthVerifier,
    headers: &HeaderMap,
) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;
    verifier.verify(token).await
}

/// Verifies tokens against the hosted auth service's `/auth/v1/user` endpoint.
pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(http: reqwest::Client, base_url: String, anon_key: String) -> Self {
        Self {
            http,
            base_url,
            anon_key,
        }
    }
}

#[async_trait]
impl AuthVerifier for SupabaseAuth {
    #[tracing::instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<AuthUser, AppError> {
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Auth service unreachable: {e}");
                AppError::Unauthorized("Unable to verify token".into())
            })?;

        if !resp.status().is_success() {
            warn!("Token rejected by auth service: {}", resp.status());
            return Err(AppError::Unauthorized("Invalid or expired token".into()));
        }

        resp.json::<AuthUser>().await.map_err(|e| {
            error!("Unexpected auth service response: {e}");
            AppError::Unauthorized("Invalid or expired token".into())
        })
    }
}
