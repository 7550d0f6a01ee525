//! Identity extraction for sync requests.
//!
//! Every sync request names its device and user in the `X-Device-Id` and
//! `X-User-Id` headers. When an `AUTH_SECRET` is configured the request must
//! also carry it as a bearer token.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use stash_engine::sync::{DEVICE_ID_HEADER, USER_ID_HEADER};

use crate::error::AppError;
use crate::AppState;

/// The device and user a request speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIdentity {
    pub device_id: String,
    pub user_id: String,
}

impl FromRequestParts<AppState> for SyncIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        check_bearer(&parts.headers, state.config.auth_secret.as_deref())?;

        Ok(SyncIdentity {
            device_id: required_header(&parts.headers, DEVICE_ID_HEADER)?,
            user_id: required_header(&parts.headers, USER_ID_HEADER)?,
        })
    }
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(format!("missing {} header", name)))
}

fn check_bearer(headers: &HeaderMap, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        // No auth configured, allow anonymous access
        return Ok(());
    };

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized("missing authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized("invalid authorization header format"))?;

    if token != secret {
        return Err(AppError::Unauthorized("invalid bearer token"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn bearer_is_optional_without_secret() {
        assert!(check_bearer(&HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn bearer_must_match_secret() {
        let good = headers(&[("authorization", "Bearer s3cret")]);
        let wrong = headers(&[("authorization", "Bearer nope")]);
        let basic = headers(&[("authorization", "Basic s3cret")]);

        assert!(check_bearer(&good, Some("s3cret")).is_ok());
        assert!(matches!(
            check_bearer(&wrong, Some("s3cret")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            check_bearer(&basic, Some("s3cret")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            check_bearer(&HeaderMap::new(), Some("s3cret")),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn identity_headers_are_required() {
        let present = headers(&[(DEVICE_ID_HEADER, "device-a")]);
        assert_eq!(required_header(&present, DEVICE_ID_HEADER).unwrap(), "device-a");
        assert!(matches!(
            required_header(&present, USER_ID_HEADER),
            Err(AppError::BadRequest(_))
        ));

        let blank = headers(&[(USER_ID_HEADER, "  ")]);
        assert!(required_header(&blank, USER_ID_HEADER).is_err());
    }
}
