//! VOD proxy handlers: resolve-or-extract, segment serve, on-demand extract,
//! catalog (spec.md §4.3, §4.4, §6). New relative to the teacher (a single
//! statically-known RTSP source); grounded in `javipelopi-streamforge`'s
//! `server/stream.rs` proxy-and-rewrite shape.

use super::routes::GatewayContext;
use crate::error::{GatewayError, ProviderError};
use crate::metrics::{PROVIDER_CACHE_HITS, PROVIDER_CACHE_MISSES};
use crate::provider::{CatalogOptions, ExtractHints};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::Host;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

fn provider_core<'a>(
    ctx: &'a GatewayContext,
    provider: &str,
) -> Result<&'a Arc<crate::provider::core::ProviderCore>, GatewayError> {
    ctx.providers
        .get(provider)
        .ok_or_else(|| ProviderError::UnknownProvider(provider.to_string()).into())
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamQuery {
    #[serde(rename = "type", default = "default_content_type")]
    content_type: String,
    quality: Option<String>,
}

fn default_content_type() -> String {
    "movie".to_string()
}

pub async fn stream_handler(
    Path((provider, id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    State(ctx): State<Arc<GatewayContext>>,
    Host(host): Host,
) -> Result<Response, GatewayError> {
    let core = provider_core(&ctx, &provider)?;
    let hints = ExtractHints { quality: query.quality };

    let (url, headers, _content_type) = core
        .ensure_stream_url(&id, &query.content_type, &hints)
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;

    let mut request = ctx.http_client.get(&url);
    for (k, v) in core.provider().proxy_headers() {
        request = request.header(k, v);
    }
    for (k, v) in &headers {
        request = request.header(k.as_str(), v.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::UpstreamStatus(status.as_u16()).into());
    }
    let playlist = response
        .text()
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;

    let proxy_base = format!("http://{host}/vod/{provider}");
    let rewritten = core.provider().rewrite_playlist_urls(&playlist, &proxy_base, &id, &url);

    core.schedule_prefetch(
        id.clone(),
        rewritten.clone(),
        proxy_base,
        ctx.segment_cache.clone(),
        ctx.http_client.clone(),
        Duration::from_millis(ctx.vod.prefetch_delay_ms),
    )
    .await;

    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        rewritten,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    cid: String,
}

pub async fn segment_handler(
    Path((provider, encoded)): Path<(String, String)>,
    Query(query): Query<SegmentQuery>,
    State(ctx): State<Arc<GatewayContext>>,
) -> Result<Response, GatewayError> {
    let core = provider_core(&ctx, &provider)?;
    core.get_active_stream_url(&query.cid).await; // touch lastAccessed

    if let Some(entry) = ctx.segment_cache.get(&encoded).await {
        PROVIDER_CACHE_HITS.with_label_values(&[&provider]).inc();
        return Ok((
            [
                (header::CONTENT_TYPE, entry.content_type.clone()),
                (X_CACHE, "HIT".to_string()),
            ],
            entry.bytes,
        )
            .into_response());
    }
    PROVIDER_CACHE_MISSES.with_label_values(&[&provider]).inc();

    let upstream_url = crate::provider::rewrite::decode_url(&encoded)
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;

    let headers = core
        .get_active_stream_url(&query.cid)
        .await
        .map(|(_, h, _)| h)
        .unwrap_or_default();

    let mut request = ctx.http_client.get(&upstream_url);
    for (k, v) in core.provider().proxy_headers() {
        request = request.header(k, v);
    }
    for (k, v) in &headers {
        request = request.header(k.as_str(), v.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;
    let status = response.status().as_u16();
    if status == 403 || status == 503 {
        warn!("segment fetch for {provider}/{} observed {status}, triggering urgent refresh", query.cid);
        let hints = ExtractHints::default();
        if let Err(e) = core.urgent_refresh(&query.cid, "movie", &hints).await {
            warn!("urgent refresh failed: {e}");
        }
        return Err(GatewayError::Expired);
    }
    if !response.status().is_success() {
        return Err(ProviderError::UpstreamStatus(status).into());
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/mp2t")
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;

    ctx.segment_cache.put(encoded, bytes.clone(), content_type.clone()).await;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (X_CACHE, "MISS".to_string()),
        ],
        bytes,
    )
        .into_response())
}

pub async fn extract_handler(
    Path((provider, id)): Path<(String, String)>,
    State(ctx): State<Arc<GatewayContext>>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let core = provider_core(&ctx, &provider)?;
    let extracted = core
        .provider()
        .extract_stream_url(&id, "movie", &ExtractHints::default())
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;
    Ok(Json(serde_json::json!({ "url": extracted.url })))
}

#[derive(Debug, Deserialize, Default)]
pub struct CatalogQuery {
    #[serde(default)]
    expand: bool,
    #[serde(default)]
    refresh: bool,
}

pub async fn catalog_handler(
    Path(provider): Path<String>,
    Query(query): Query<CatalogQuery>,
    State(ctx): State<Arc<GatewayContext>>,
) -> Result<Json<crate::provider::Catalog>, GatewayError> {
    let core = provider_core(&ctx, &provider)?;
    let options = CatalogOptions { expand: query.expand, refresh: query.refresh };
    let catalog = core
        .get_catalog(&options)
        .await
        .map_err(|e| ProviderError::ExtractionFailed(e.to_string()))?;
    Ok(Json(catalog))
}

