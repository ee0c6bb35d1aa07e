//! VOD provider core: the pluggable interface each upstream site implements
//! (spec.md §4.3), plus the URL-extraction lifecycle, playlist rewriting, and
//! segment cache that sit on top of it. New relative to the upstream RTSP
//! transcoder (a single statically-known source); enriched from
//! `javipelopi-streamforge`'s Xtream provider client/types
//! (`src-tauri/src/xtream/{client,types}.rs`) for the provider-trait shape,
//! and from `other_examples` tuliprox's provider stream factory for
//! header/reconnect modeling.

pub mod cache;
pub mod core;
pub mod demo;
pub mod rewrite;
pub mod scraper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub content_type: String,
    #[serde(default)]
    pub poster: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    pub expand: bool,
    pub refresh: bool,
}

/// What `Provider::extract_stream_url` hands back: the resolved upstream
/// playlist URL plus whatever headers/metadata the provider's CDN requires
/// on follow-up requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedStream {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub alternates: Vec<String>,
    #[serde(default)]
    pub subtitles: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractHints {
    pub quality: Option<String>,
}

/// One pluggable upstream site. Real provider scraping trivia is explicitly
/// out of scope (spec.md §1); the only concrete implementation shipped here
/// is `demo::DemoProvider`, test infrastructure for the URL-refresh and
/// segment-410 scenarios spec.md §8 describes.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_catalog(&self, options: &CatalogOptions) -> anyhow::Result<Catalog>;

    async fn extract_stream_url(
        &self,
        content_id: &str,
        content_type: &str,
        hints: &ExtractHints,
    ) -> anyhow::Result<ExtractedStream>;

    fn proxy_headers(&self) -> HashMap<String, String>;

    fn m3u8_patterns(&self) -> Vec<String>;
    fn exclude_patterns(&self) -> Vec<String>;

    /// Default playlist rewrite delegates to `rewrite::rewrite_playlist`;
    /// providers with CDN-specific segment naming can override this.
    fn rewrite_playlist_urls(&self, playlist: &str, proxy_base: &str, content_id: &str, base_url: &str) -> String {
        rewrite::rewrite_playlist(playlist, base_url, proxy_base, content_id)
    }

    fn content_url(&self, id: &str, content_type: &str) -> String;
}
