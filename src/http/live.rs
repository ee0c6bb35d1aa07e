//! Live-channel handlers: playlist, stream, tuner status/release (spec.md
//! §6's first table group). Grounded in the teacher's `stream_handler` /
//! `channels_api_handler` (`src/lib.rs`), generalized from a single RTSP
//! pass-through to the tuner-pool allocation path.

use super::routes::GatewayContext;
use crate::error::GatewayError;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::Host;
use std::sync::Arc;
use tracing::info;

pub async fn playlist_handler(State(ctx): State<Arc<GatewayContext>>, Host(host): Host) -> impl IntoResponse {
    let body = crate::channel::emit_m3u(&ctx.channels, &host);
    (
        [(header::CONTENT_TYPE, "audio/mpegurl")],
        body,
    )
}

pub async fn stream_handler(
    Path(channel_id): Path<String>,
    State(ctx): State<Arc<GatewayContext>>,
) -> Result<Response, GatewayError> {
    let channel = ctx
        .channels
        .iter()
        .find(|c| c.id == channel_id)
        .ok_or(GatewayError::ChannelNotFound)?;

    match ctx.pool.allocate(channel).await {
        crate::error::AllocateOutcome::Tuned((tuner, client)) => {
            info!("streaming channel {channel_id} from tuner {}", tuner.id);
            let stream = futures::stream::unfold(client, |mut client| async move {
                match client.recv().await {
                    Some(Ok(bytes)) => Some((Ok::<_, std::io::Error>(bytes), client)),
                    _ => None,
                }
            });
            Ok((
                [(header::CONTENT_TYPE, "video/mp2t")],
                Body::from_stream(stream),
            )
                .into_response())
        }
        crate::error::AllocateOutcome::Superseded => Err(GatewayError::Superseded),
        crate::error::AllocateOutcome::Exhausted => Err(GatewayError::PoolExhausted),
    }
}

pub async fn status_handler(State(ctx): State<Arc<GatewayContext>>) -> impl IntoResponse {
    Json(ctx.pool.status().await)
}

pub async fn release_handler(Path(id): Path<usize>, State(ctx): State<Arc<GatewayContext>>) -> impl IntoResponse {
    ctx.pool.release_client(id).await;
    StatusCode::NO_CONTENT
}

pub async fn force_release_handler(
    Path(id): Path<usize>,
    State(ctx): State<Arc<GatewayContext>>,
) -> impl IntoResponse {
    ctx.pool.force_release(id).await;
    StatusCode::NO_CONTENT
}
