//! `ProviderCore`: the upstream-URL extraction/refresh lifecycle sitting on
//! top of a `Provider` impl (spec.md §4.3). New relative to the teacher's
//! single statically-known RTSP source; enriched from
//! `javipelopi-streamforge`'s EPG refresh-timer shape (a long-lived
//! `tokio::spawn`'d task re-checking a deadline each tick) and from
//! `other_examples` tuliprox's provider stream factory for header handling
//! on re-fetched segments.

use super::{Catalog, CatalogOptions, ExtractHints, Provider};
use crate::metrics::PROVIDER_STREAM_ENTRIES;
use crate::provider::cache::SegmentCache;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const REFRESH_TICK: Duration = Duration::from_secs(15);
/// Catalogs don't carry their own TTL in spec.md; re-fetch after an hour
/// even without an explicit `refresh=true` so a long-lived process doesn't
/// serve a day-stale catalog forever.
const CATALOG_STALE_AFTER: Duration = Duration::from_secs(3600);

struct EntryState {
    url: String,
    headers: HashMap<String, String>,
    content_type: String,
    first_acquired_at: Instant,
    last_accessed: Instant,
    refreshing: bool,
}

/// Owns every `StreamEntry` for one provider (spec.md §3: "the ProviderCore
/// owns StreamEntries"). One instance per registered provider.
pub struct ProviderCore {
    provider: Arc<dyn Provider>,
    entries: RwLock<HashMap<String, Arc<Mutex<EntryState>>>>,
    refresh_interval: Duration,
    inactivity_timeout: Duration,
    prefetch_in_flight: Mutex<HashSet<String>>,
    catalog_cache: Mutex<Option<(Catalog, Instant)>>,
}

impl ProviderCore {
    pub fn new(provider: Arc<dyn Provider>, refresh_interval: Duration, inactivity_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            provider,
            entries: RwLock::new(HashMap::new()),
            refresh_interval,
            inactivity_timeout,
            prefetch_in_flight: Mutex::new(HashSet::new()),
            catalog_cache: Mutex::new(None),
        })
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// `GET /vod/{provider}/catalog` backing call: reads from cache unless
    /// `options.refresh` or the catalog was never fetched, and falls back to
    /// a stale cached catalog if a refresh fetch fails (spec.md §7:
    /// "cache fallback to stale catalog when upstream fetch fails").
    pub async fn get_catalog(&self, options: &CatalogOptions) -> anyhow::Result<Catalog> {
        let mut cache = self.catalog_cache.lock().await;
        let needs_fetch = options.refresh || cache.as_ref().map(|(_, at)| at.elapsed() > CATALOG_STALE_AFTER).unwrap_or(true);

        if !needs_fetch {
            return Ok(cache.as_ref().unwrap().0.clone());
        }

        match self.provider.fetch_catalog(options).await {
            Ok(catalog) => {
                *cache = Some((catalog.clone(), Instant::now()));
                Ok(catalog)
            }
            Err(e) => {
                if let Some((stale, _)) = cache.as_ref() {
                    warn!("catalog refresh failed, serving stale cache: {e}");
                    Ok(stale.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Never triggers extraction; only reads the cache and touches
    /// `last_accessed` (spec.md §4.3 read path).
    pub async fn get_active_stream_url(&self, content_id: &str) -> Option<(String, HashMap<String, String>, String)> {
        let entries = self.entries.read().await;
        let state = entries.get(content_id)?.clone();
        drop(entries);
        let mut s = state.lock().await;
        s.last_accessed = Instant::now();
        Some((s.url.clone(), s.headers.clone(), s.content_type.clone()))
    }

    /// The public stream endpoint's actual entry point: cache hit just
    /// touches the entry; cache miss extracts, caches, and starts the
    /// refresh timer (spec.md §4.3 "the public stream endpoint" paragraph).
    pub async fn ensure_stream_url(
        self: &Arc<Self>,
        content_id: &str,
        content_type: &str,
        hints: &ExtractHints,
    ) -> anyhow::Result<(String, HashMap<String, String>, String)> {
        if let Some(cached) = self.get_active_stream_url(content_id).await {
            return Ok(cached);
        }

        let extracted = self.provider.extract_stream_url(content_id, content_type, hints).await?;

        // Guard timer creation under the write lock: only the caller whose
        // insert actually lands a new entry spawns a supervisor, so two
        // concurrent first-touch requests for the same contentId never end
        // up with two refresh timers racing on the same entry.
        enum Landed {
            New(Arc<Mutex<EntryState>>),
            Existing(Arc<Mutex<EntryState>>),
        }

        let mut entries = self.entries.write().await;
        let landed = match entries.entry(content_id.to_string()) {
            Entry::Occupied(occ) => Landed::Existing(occ.get().clone()),
            Entry::Vacant(vac) => {
                let state = Arc::new(Mutex::new(EntryState {
                    url: extracted.url.clone(),
                    headers: extracted.headers.clone(),
                    content_type: content_type.to_string(),
                    first_acquired_at: Instant::now(),
                    last_accessed: Instant::now(),
                    refreshing: false,
                }));
                vac.insert(state.clone());
                Landed::New(state)
            }
        };
        let entry_count = entries.len();
        drop(entries);

        match landed {
            Landed::New(_) => {
                PROVIDER_STREAM_ENTRIES.with_label_values(&[self.provider.id()]).set(entry_count as f64);
                self.spawn_refresh_timer(content_id.to_string(), content_type.to_string());
            }
            Landed::Existing(existing) => {
                // Lost the race: a concurrent call already inserted. Latest
                // write wins (spec.md §4.3) without a second timer.
                let mut s = existing.lock().await;
                s.url = extracted.url.clone();
                s.headers = extracted.headers.clone();
                s.last_accessed = Instant::now();
            }
        }

        Ok((extracted.url, extracted.headers, content_type.to_string()))
    }

    /// Explicit, synchronous refresh: clears the cache and re-extracts. Used
    /// when a segment fetch observes a 403/503 (spec.md §4.3 `UrgentRefresh`).
    pub async fn urgent_refresh(
        &self,
        content_id: &str,
        content_type: &str,
        hints: &ExtractHints,
    ) -> anyhow::Result<(String, HashMap<String, String>)> {
        let extracted = self.provider.extract_stream_url(content_id, content_type, hints).await?;
        let entries = self.entries.read().await;
        if let Some(state) = entries.get(content_id) {
            let mut s = state.lock().await;
            s.url = extracted.url.clone();
            s.headers = extracted.headers.clone();
            s.first_acquired_at = Instant::now();
            s.last_accessed = Instant::now();
        }
        Ok((extracted.url, extracted.headers))
    }

    /// One refresh supervisor per `contentId`, owning both the timer and the
    /// entry's refresh state (spec.md §9 redesign of "interval timer +
    /// mutable shared state"). Exits once the entry is gone (dropped for
    /// inactivity by a prior tick, or never existed).
    fn spawn_refresh_timer(self: &Arc<Self>, content_id: String, content_type: String) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REFRESH_TICK).await;

                let state = {
                    let entries = this.entries.read().await;
                    match entries.get(&content_id) {
                        Some(s) => s.clone(),
                        None => return,
                    }
                };

                let (inactive, stale) = {
                    let s = state.lock().await;
                    (
                        s.last_accessed.elapsed() > this.inactivity_timeout,
                        s.first_acquired_at.elapsed() > this.refresh_interval && !s.refreshing,
                    )
                };

                if inactive {
                    let mut entries = this.entries.write().await;
                    entries.remove(&content_id);
                    PROVIDER_STREAM_ENTRIES.with_label_values(&[this.provider.id()]).set(entries.len() as f64);
                    info!("stream entry {content_id} dropped after inactivity timeout");
                    return;
                }

                if !stale {
                    continue;
                }

                {
                    let mut s = state.lock().await;
                    s.refreshing = true;
                }

                match this.provider.extract_stream_url(&content_id, &content_type, &ExtractHints::default()).await {
                    Ok(extracted) => {
                        let mut s = state.lock().await;
                        s.url = extracted.url;
                        s.headers = extracted.headers;
                        s.first_acquired_at = Instant::now();
                        s.refreshing = false;
                        info!("refreshed stream url for {content_id}");
                    }
                    Err(e) => {
                        warn!("refresh failed for {content_id}, keeping old url: {e}");
                        let mut s = state.lock().await;
                        s.refreshing = false;
                    }
                }
            }
        });
    }

    /// Schedules the background segment prefetch for a just-served playlist
    /// (spec.md §4.4). Only one prefetch task per `contentId` runs at a time.
    pub async fn schedule_prefetch(
        self: &Arc<Self>,
        content_id: String,
        rewritten_playlist: String,
        proxy_base: String,
        cache: Arc<SegmentCache>,
        client: reqwest::Client,
        prefetch_delay: Duration,
    ) {
        {
            let mut in_flight = self.prefetch_in_flight.lock().await;
            if in_flight.contains(&content_id) {
                return;
            }
            in_flight.insert(content_id.clone());
        }

        let this = self.clone();
        tokio::spawn(async move {
            let headers = this
                .get_active_stream_url(&content_id)
                .await
                .map(|(_, h, _)| h)
                .unwrap_or_default();
            let segment_prefix = format!("{proxy_base}/segment/");

            for line in rewritten_playlist.lines() {
                let trimmed = line.trim();
                let Some(rest) = trimmed.strip_prefix(&segment_prefix) else { continue };
                let encoded = rest.split('?').next().unwrap_or(rest).to_string();
                if cache.contains(&encoded).await {
                    continue;
                }
                let Ok(upstream_url) = super::rewrite::decode_url(&encoded) else { continue };

                let mut request = client.get(&upstream_url);
                for (k, v) in &headers {
                    request = request.header(k.as_str(), v.as_str());
                }

                match request.send().await {
                    Ok(resp) if resp.status().as_u16() == 403 || resp.status().as_u16() == 503 => {
                        info!("prefetch for {content_id} stopped on upstream {}", resp.status());
                        break;
                    }
                    Ok(resp) if resp.status().is_success() => {
                        let content_type = resp
                            .headers()
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("video/mp2t")
                            .to_string();
                        if let Ok(bytes) = resp.bytes().await {
                            cache.put(encoded, bytes, content_type).await;
                        }
                    }
                    Ok(_) | Err(_) => {}
                }

                tokio::time::sleep(prefetch_delay).await;
            }

            this.prefetch_in_flight.lock().await.remove(&content_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::demo::DemoProvider;

    #[tokio::test]
    async fn ensure_stream_url_caches_on_first_call() {
        let provider = Arc::new(DemoProvider::new("demo", vec!["https://cdn/a.m3u8".to_string()]));
        let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));
        let (url, _, _) = core.ensure_stream_url("movie1", "movie", &ExtractHints::default()).await.unwrap();
        assert_eq!(url, "https://cdn/a.m3u8");
        let cached = core.get_active_stream_url("movie1").await.unwrap();
        assert_eq!(cached.0, "https://cdn/a.m3u8");
    }

    #[tokio::test]
    async fn urgent_refresh_replaces_cached_url() {
        let provider = Arc::new(DemoProvider::new(
            "demo",
            vec!["https://cdn/a.m3u8".to_string(), "https://cdn/b.m3u8".to_string()],
        ));
        let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));
        core.ensure_stream_url("movie1", "movie", &ExtractHints::default()).await.unwrap();
        let (url, _) = core.urgent_refresh("movie1", "movie", &ExtractHints::default()).await.unwrap();
        assert_eq!(url, "https://cdn/b.m3u8");
        assert_eq!(core.get_active_stream_url("movie1").await.unwrap().0, "https://cdn/b.m3u8");
    }

    #[tokio::test]
    async fn get_active_stream_url_never_extracts() {
        let provider = Arc::new(DemoProvider::new("demo", vec!["https://cdn/a.m3u8".to_string()]));
        let core = ProviderCore::new(provider, Duration::from_secs(60), Duration::from_secs(300));
        assert!(core.get_active_stream_url("never-extracted").await.is_none());
    }
}
