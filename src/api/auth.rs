//! Bearer token guard for staff-only endpoints

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::SharedState;

/// Proof that the request carried the configured admin token
#[derive(Debug, Clone, Copy)]
pub struct StaffAccess;

fn token_matches(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

impl FromRequestParts<SharedState> for StaffAccess {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let forbidden = |msg: &str| (StatusCode::FORBIDDEN, Json(json!({ "error": msg })));

        let Some(expected) = state.config.admin_token.as_deref().filter(|t| !t.is_empty()) else {
            warn!("Privileged request refused: no admin token configured");
            return Err(forbidden("Staff access is not configured"));
        };

        let supplied = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match supplied {
            Some(token) if token_matches(expected, token) => Ok(StaffAccess),
            _ => {
                warn!("Privileged request refused on {}", parts.uri.path());
                Err(forbidden("Staff access required"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_whole_tokens() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3cre"));
        assert!(!token_matches("s3cret", "s3cret-and-more"));
        assert!(!token_matches("s3cret", ""));
    }
}
