//! Admin authentication
//!
//! Admin routes require the `X-Admin-Secret` header. The configured secret is
//! kept only as a SHA-256 digest and compared digest to digest, so the check
//! does not short-circuit on the first differing byte of the raw secret.

use super::errors::ApiError;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

#[derive(Clone)]
pub struct AdminGuard {
    secret_hash: Option<[u8; 32]>,
}

impl AdminGuard {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret_hash: secret.filter(|s| !s.is_empty()).map(hash_secret),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret_hash.is_some()
    }

    pub fn authorize(&self, headers: &HeaderMap, request_id: &str) -> Result<(), ApiError> {
        let Some(expected) = self.secret_hash else {
            tracing::warn!(request_id, "Admin request rejected: no admin secret configured");
            return Err(ApiError::unauthorized(
                request_id.to_string(),
                "Admin endpoints are disabled".to_string(),
            ));
        };

        let provided = headers
            .get(ADMIN_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(hash_secret);

        match provided {
            Some(hash) if digests_equal(&hash, &expected) => Ok(()),
            _ => {
                tracing::warn!(request_id, "Admin request rejected: bad or missing secret");
                Err(ApiError::unauthorized(
                    request_id.to_string(),
                    "Invalid or missing admin secret".to_string(),
                ))
            }
        }
    }
}

fn hash_secret(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_admin_guard() {
        let guard = AdminGuard::new(Some("s3cret"));
        let mut headers = HeaderMap::new();
        assert!(guard.authorize(&headers, "r").is_err());

        headers.insert(ADMIN_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(guard.authorize(&headers, "r").is_err());

        headers.insert(ADMIN_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(guard.authorize(&headers, "r").is_ok());
    }

    #[test]
    fn test_disabled_without_secret() {
        let guard = AdminGuard::new(None);
        assert!(!guard.is_enabled());

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_SECRET_HEADER, HeaderValue::from_static(""));
        assert!(guard.authorize(&headers, "r").is_err());
        assert!(!AdminGuard::new(Some("")).is_enabled());
    }
}
