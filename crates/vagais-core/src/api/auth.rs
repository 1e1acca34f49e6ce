//! Caller identity from request headers.
//!
//! トークン検証は前段（gateway）の責務。ここでは検証済みの
//! `X-User-Id` / `X-Organization-Id` をそのまま信じる。

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::response::ApiError;
use crate::domain::{Actor, OrganizationId, UserId};

pub const USER_HEADER: &str = "x-user-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// The authenticated actor of a request.
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id: UserId = header(USER_HEADER)
            .ok_or(ApiError::Unauthenticated)?
            .parse()
            .map_err(|_| ApiError::Unauthenticated)?;
        let mut actor = Actor::new(user_id);

        if let Some(raw) = header(ORGANIZATION_HEADER) {
            let organization_id: OrganizationId = raw.parse()?;
            actor = actor.with_organization(organization_id);
        }
        Ok(CurrentActor(actor))
    }
}
