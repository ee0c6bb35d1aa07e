//! `GatewayContext` (spec.md §9's singleton-to-context redesign) and Router
//! assembly. Generalizes the teacher's single `AppState` (channels +
//! `StreamManager` + `HlsManager`) into the full set of shared resources the
//! expanded HTTP surface needs.

use crate::browser::Browser;
use crate::channel::Channel;
use crate::config::{EpgConfig, Settings, VodConfig};
use crate::epg::ingestor::EpgIngestor;
use crate::provider::cache::SegmentCache;
use crate::provider::core::ProviderCore;
use crate::tuner::pool::TunerPool;
use axum::routing::{get, post};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Every shared resource a request handler might touch. Constructed once in
/// `main.rs`; tests construct their own for isolation (spec.md §9).
pub struct GatewayContext {
    pub channels: Vec<Channel>,
    pub pool: Arc<TunerPool>,
    pub providers: HashMap<String, Arc<ProviderCore>>,
    pub segment_cache: Arc<SegmentCache>,
    pub epg: Arc<EpgIngestor>,
    pub http_client: reqwest::Client,
    pub vod: VodConfig,
    pub epg_config: Arc<RwLock<EpgConfig>>,
    pub browser: Browser,
}

impl GatewayContext {
    pub fn settings_snapshot(settings: &Settings) -> (VodConfig, Arc<RwLock<EpgConfig>>) {
        (settings.vod.clone(), Arc::new(RwLock::new(settings.epg.clone())))
    }
}

pub fn create_app(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/playlist.m3u", get(super::live::playlist_handler))
        .route("/stream/{channel_id}", get(super::live::stream_handler))
        .route("/tuners", get(super::live::status_handler))
        .route("/stats", get(super::live::status_handler))
        .route("/tuner/{id}/release", post(super::live::release_handler))
        .route("/tuner/{id}/force-release", post(super::live::force_release_handler))
        .route("/vod/{provider}/{id}/stream", get(super::vod::stream_handler))
        .route("/vod/{provider}/segment/{encoded}", get(super::vod::segment_handler))
        .route("/vod/{provider}/extract/{id}", post(super::vod::extract_handler))
        .route("/vod/{provider}/catalog", get(super::vod::catalog_handler))
        .route("/tve/directv/epg.xml", get(super::epg::xmltv_handler))
        .route("/tve/directv/playlist.m3u", get(super::epg::playlist_handler))
        .route("/tve/directv/epg/refresh", post(super::epg::refresh_handler))
        .with_state(ctx)
}
