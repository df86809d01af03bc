//! Request gates applied in front of the processing endpoints.
//!
//! Order on protected routes: authentication, then per-client rate limiting,
//! then a request slot from the admission controller.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::response::ApiError;
use super::AppState;
use crate::error::ProcessingError;
use crate::rate_limit::client_key;

/// Header carrying the shared secret.
pub const AUTH_HEADER: &str = "x-internal-auth";

/// The configured shared secret, kept only as a digest.
#[derive(Clone)]
pub struct SharedSecret {
    digest: Option<[u8; 32]>,
}

impl SharedSecret {
    /// An empty secret accepts nothing.
    pub fn new(secret: &str) -> Self {
        let digest = (!secret.is_empty()).then(|| sha256(secret.as_bytes()));
        Self { digest }
    }

    /// Compare digests so timing does not depend on the matched prefix.
    pub fn verify(&self, provided: &[u8]) -> bool {
        let Some(expected) = self.digest else {
            return false;
        };
        let actual = sha256(provided);
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(AUTH_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if !state.secret.verify(provided) {
        debug!("Rejected request to {}: bad auth", request.uri().path());
        return ApiError(ProcessingError::Unauthorized).into_response();
    }
    next.run(request).await
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    if !state.limiter.allow(&key).await {
        warn!("Rate limit exceeded for {}", key);
        return ApiError(ProcessingError::RateLimited).into_response();
    }
    next.run(request).await
}

/// Hold a request slot for the lifetime of the handler.
pub async fn request_slot(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let lease = match state
        .admission
        .acquire_request_slot(state.settings.request_slot_wait)
        .await
    {
        Ok(lease) => lease,
        Err(e) => {
            warn!("Rejected request to {}: {}", request.uri().path(), e);
            return ApiError::from(e).into_response();
        }
    };

    let _active = state.metrics.begin();
    let response = next.run(request).await;
    state.admission.release(lease);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_verify() {
        let secret = SharedSecret::new("0123456789abcdef0123456789abcdef");
        assert!(secret.verify(b"0123456789abcdef0123456789abcdef"));
        assert!(!secret.verify(b"0123456789abcdef0123456789abcdeX"));
        assert!(!secret.verify(b""));
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        let secret = SharedSecret::new("");
        assert!(!secret.verify(b""));
        assert!(!secret.verify(b"anything"));
    }
}
