//! Caller identity.
//!
//! Account management lives upstream; a fronting gateway authenticates the user
//! and forwards the account and user ids as headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the caller of an `/api/*` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
    /// Falls back to the account id when the gateway sends no user.
    pub user_id: String,
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account_id = header_value(parts, ACCOUNT_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-Account-Id header"))?;
        let user_id = header_value(parts, USER_ID_HEADER).unwrap_or_else(|| account_id.clone());
        Ok(Self {
            account_id,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(request: Request<()>) -> Result<CallerIdentity, ApiError> {
        let (mut parts, _) = request.into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_identity_from_headers() {
        let request = Request::builder()
            .header("X-Account-Id", "acct")
            .header("X-User-Id", "user")
            .body(())
            .unwrap();
        let identity = extract(request).await.unwrap();
        assert_eq!(identity.account_id, "acct");
        assert_eq!(identity.user_id, "user");

        let request = Request::builder()
            .header("X-Account-Id", "acct")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap().user_id, "acct");
    }

    #[tokio::test]
    async fn test_missing_account_is_unauthorized() {
        let request = Request::builder()
            .header("X-Account-Id", "  ")
            .body(())
            .unwrap();
        let err = extract(request).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
