//! `tve/directv` EPG handlers: XMLTV document, EPG-aware playlist, manual
//! refresh trigger (spec.md §4.5, §6). New relative to the teacher (no guide
//! data concept); grounded in `javipelopi-streamforge`'s `server/epg.rs`
//! handler shape.

use super::routes::GatewayContext;
use crate::error::GatewayError;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::Host;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct XmltvQuery {
    hours: Option<u32>,
}

pub async fn xmltv_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<XmltvQuery>,
) -> impl IntoResponse {
    let configured_window = ctx.epg_config.read().await.window_hours;
    let window_hours = query.hours.unwrap_or(configured_window);
    let guide = ctx.epg.guide().await;
    let xml = crate::epg::xmltv::emit_xmltv(&guide, Utc::now(), ChronoDuration::hours(window_hours as i64));
    ([(header::CONTENT_TYPE, "application/xml")], xml)
}

pub async fn playlist_handler(State(ctx): State<Arc<GatewayContext>>, Host(host): Host) -> impl IntoResponse {
    let epg_url = format!("http://{host}/tve/directv/epg.xml");
    let body = crate::channel::emit_m3u_with_epg(&ctx.channels, &host, &epg_url);
    ([(header::CONTENT_TYPE, "audio/mpegurl")], body)
}

pub async fn refresh_handler(State(ctx): State<Arc<GatewayContext>>) -> Result<impl IntoResponse, GatewayError> {
    let (channels, programs) = ctx.epg.refresh().await.map_err(GatewayError::Internal)?;
    Ok(Json(serde_json::json!({ "channels": channels, "programs": programs })))
}
