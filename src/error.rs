//! Crate-wide structured error types.
//!
//! Most call sites propagate `anyhow::Error` the way the rest of this crate's
//! ancestry does (see `manager.rs`/`hls.rs` in the upstream transcoder this
//! was built from). The handful of error types here are the ones a *caller*
//! needs to match on rather than just log and surface as a 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Outcome of `TunerPool::allocate`. A bare `Option<Tuner>` can't distinguish
/// "someone else just grabbed the last free tuner for a different channel"
/// (superseded) from "there is truly no tuner to give you" (exhausted) --
/// spec.md flags this as an open question; this type pins it down.
#[derive(Debug)]
pub enum AllocateOutcome<T> {
    Tuned(T),
    Superseded,
    Exhausted,
}

impl<T> AllocateOutcome<T> {
    pub fn tuned(self) -> Option<T> {
        match self {
            AllocateOutcome::Tuned(t) => Some(t),
            _ => None,
        }
    }
}

/// Failure modes of the tuning procedure (spec.md Step A-F).
#[derive(Debug, Error)]
pub enum TuneError {
    #[error("channel not found in guide: {0}")]
    ChannelNotFound(String),
    #[error("media never reached a playable state")]
    MediaNotReady,
    #[error("browser page navigation failed: {0}")]
    Navigation(String),
    #[error("encoder failed to start: {0}")]
    EncoderStart(String),
}

/// Errors surfaced by `ProviderCore`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("extraction timed out")]
    ExtractionTimeout,
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("upstream returned {0}")]
    UpstreamStatus(u16),
}

/// Top-level error type the HTTP layer converts into a response. Intentionally
/// small: most handlers match on these variants to decide a status code, and
/// fall back to `Internal` for anything that was already logged at the call
/// site via `anyhow`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("channel not found")]
    ChannelNotFound,
    #[error("tuner pool exhausted")]
    PoolExhausted,
    #[error("channel switched, please retry")]
    Superseded,
    #[error(transparent)]
    Tune(#[from] TuneError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("upstream resource expired")]
    Expired,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GatewayError::ChannelNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            GatewayError::PoolExhausted => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            GatewayError::Superseded => {
                (StatusCode::SERVICE_UNAVAILABLE, "channel switched, please retry".to_string())
            }
            GatewayError::Tune(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            GatewayError::Provider(ProviderError::UnknownProvider(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            GatewayError::Provider(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            GatewayError::Expired => (StatusCode::GONE, self.to_string()),
            GatewayError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, body).into_response()
    }
}
