//! Bearer-token authentication and tenant resolution for protected routes.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::error::ApiError;
use super::server::AppState;
use crate::auth::{TenantContext, authenticate, bearer_token, resolve_tenant};
use crate::error::AuthError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Authenticated profile, present on every protected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub profile_id: Uuid,
}

/// Verify the bearer token and, when an `X-Tenant-Id` header is sent,
/// the caller's active membership in that tenant.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authorize(&state, request.headers()).await {
        Ok((caller, tenant)) => {
            request.extensions_mut().insert(caller);
            if let Some(ctx) = tenant {
                request.extensions_mut().insert(ctx);
            }
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Caller, Option<TenantContext>), AuthError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let profile_id = authenticate(state.db.as_ref(), bearer_token(header)?).await?;

    let Some(raw) = headers.get(TENANT_HEADER) else {
        return Ok((Caller { profile_id }, None));
    };
    let tenant_id = raw
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(AuthError::MissingTenant)?;
    let ctx = resolve_tenant(state.db.as_ref(), profile_id, tenant_id).await?;
    tracing::debug!(%profile_id, %tenant_id, role = ctx.role.as_str(), "Resolved tenant context");
    Ok((Caller { profile_id }, Some(ctx)))
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .copied()
            .ok_or_else(|| AuthError::MissingToken.into())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .copied()
            .ok_or_else(|| AuthError::MissingTenant.into())
    }
}
