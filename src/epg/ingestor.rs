//! Browser-driven EPG capture and auto-refresh (spec.md §4.5). Supplements
//! the teacher (an RTSP retransmitter with no guide-data concept); the
//! auto-refresh supervisor shape -- a long-lived task re-reading the
//! configured interval every tick rather than freezing it at construction --
//! and the on-disk JSON cache-with-timestamp pattern are grounded in
//! `javipelopi-streamforge`'s `server/epg.rs` and `scheduler/mod.rs`.

use super::{EpgChannel, Guide, Program};
use crate::browser::Browser;
use crate::config::EpgConfig;
use chrono::{DateTime, Utc};
use chromiumoxide::Page;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const SETTLE_PERIOD: Duration = Duration::from_secs(3);
const MAX_PAGE_DOWNS: u32 = 20;

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
    name: String,
    number: String,
    #[serde(default)]
    call_sign: Option<String>,
    #[serde(default)]
    ccid: Option<String>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default, rename = "liveStreamEligible")]
    live_stream_eligible: bool,
}

#[derive(Debug, Deserialize)]
struct AllChannelsPayload {
    channels: Vec<RawChannel>,
}

#[derive(Debug, Deserialize)]
struct RawProgram {
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "startTime")]
    start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    end_time: DateTime<Utc>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    rating: Option<String>,
    #[serde(default, rename = "seasonNumber")]
    season_number: Option<u32>,
    #[serde(default, rename = "episodeNumber")]
    episode_number: Option<u32>,
    #[serde(default, rename = "originalAirDate")]
    original_air_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SchedulePayload {
    #[serde(rename = "channelId")]
    channel_id: String,
    programs: Vec<RawProgram>,
}

#[derive(Debug, Deserialize, Default)]
struct CapturedPayloads {
    channels: Option<AllChannelsPayload>,
    schedules: Vec<SchedulePayload>,
}

#[derive(serde::Serialize, Deserialize, Default)]
struct ChannelCacheFile {
    channels: Vec<EpgChannel>,
}

#[derive(serde::Serialize, Deserialize, Default)]
struct ScheduleCacheFile {
    schedules: std::collections::HashMap<String, Vec<Program>>,
    #[serde(rename = "lastFetch")]
    last_fetch: i64,
}

/// Owns the captured `Guide` plus the auto-refresh supervisor. One instance
/// per process (spec.md §9's singleton-to-context redesign: constructed once
/// in `main.rs`, threaded through `AppState`, tests build their own).
pub struct EpgIngestor {
    browser: Browser,
    guide_base_url: String,
    cache_dir: PathBuf,
    config: Arc<RwLock<EpgConfig>>,
    guide: RwLock<Guide>,
    last_fetch: RwLock<Option<DateTime<Utc>>>,
    refreshing: AtomicBool,
    auto_refresh_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EpgIngestor {
    pub fn new(browser: Browser, guide_base_url: String, cache_dir: PathBuf, config: Arc<RwLock<EpgConfig>>) -> Arc<Self> {
        Arc::new(Self {
            browser,
            guide_base_url,
            cache_dir,
            config,
            guide: RwLock::new(Guide::default()),
            last_fetch: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            auto_refresh_handle: tokio::sync::Mutex::new(None),
        })
    }

    fn channel_cache_path(&self) -> PathBuf {
        self.cache_dir.join("epg_channels.json")
    }

    fn schedule_cache_path(&self) -> PathBuf {
        self.cache_dir.join("epg_schedule.json")
    }

    /// Loads the on-disk caches at startup. Missing or unparsable files are
    /// treated as an empty guide -- the next scheduled/forced refresh
    /// repopulates them.
    pub async fn load_cache(&self) {
        if let Ok(raw) = tokio::fs::read_to_string(self.channel_cache_path()).await {
            if let Ok(parsed) = serde_json::from_str::<ChannelCacheFile>(&raw) {
                self.guide.write().await.channels = parsed.channels;
            }
        }
        if let Ok(raw) = tokio::fs::read_to_string(self.schedule_cache_path()).await {
            if let Ok(parsed) = serde_json::from_str::<ScheduleCacheFile>(&raw) {
                self.guide.write().await.schedules = parsed.schedules;
                if parsed.last_fetch > 0 {
                    *self.last_fetch.write().await = DateTime::from_timestamp_millis(parsed.last_fetch);
                }
            }
        }
        info!(
            "epg cache loaded: {} channels, {} programs",
            self.guide.read().await.channels.len(),
            self.guide.read().await.program_count(),
        );
    }

    async fn save_cache(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let guide = self.guide.read().await;
        let channel_file = ChannelCacheFile { channels: guide.channels.clone() };
        tokio::fs::write(self.channel_cache_path(), serde_json::to_string_pretty(&channel_file)?).await?;

        let last_fetch = self.last_fetch.read().await.map(|dt| dt.timestamp_millis()).unwrap_or_default();
        let schedule_file = ScheduleCacheFile { schedules: guide.schedules.clone(), last_fetch };
        tokio::fs::write(self.schedule_cache_path(), serde_json::to_string_pretty(&schedule_file)?).await?;
        Ok(())
    }

    pub async fn guide(&self) -> Guide {
        self.guide.read().await.clone()
    }

    pub async fn last_fetch(&self) -> Option<DateTime<Utc>> {
        *self.last_fetch.read().await
    }

    /// One forced or scheduled refresh. Re-entrant callers short-circuit
    /// (spec.md §4.5: "a flag short-circuits re-entrant callers") rather than
    /// running two captures concurrently against the same shared page.
    pub async fn refresh(&self) -> anyhow::Result<(usize, usize)> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            info!("epg refresh already in progress, ignoring re-entrant call");
            let guide = self.guide.read().await;
            return Ok((guide.channels.len(), guide.program_count()));
        }

        let result = self.do_refresh().await;
        self.refreshing.store(false, Ordering::Release);
        result
    }

    async fn do_refresh(&self) -> anyhow::Result<(usize, usize)> {
        let guide_url = format!("{}/guide", self.guide_base_url.trim_end_matches('/'));
        let page = self.browser.new_page(&guide_url).await?;

        let result = self.capture_from_page(&page).await;
        Browser::close_page(&page).await;

        let captured = result?;
        let mut new_guide = Guide::default();

        if let Some(channels_payload) = captured.channels {
            new_guide.channels = channels_payload
                .channels
                .into_iter()
                .filter(|c| c.live_stream_eligible)
                .map(|c| EpgChannel {
                    id: c.id,
                    name: c.name,
                    number: c.number,
                    call_sign: c.call_sign,
                    ccid: c.ccid,
                    logo: c.logo,
                    format: c.format,
                })
                .collect();
        }

        for schedule in captured.schedules {
            let programs: Vec<Program> = schedule
                .programs
                .into_iter()
                .map(|p| Program {
                    title: p.title,
                    subtitle: p.subtitle,
                    description: p.description,
                    start_time: p.start_time,
                    end_time: p.end_time,
                    categories: p.categories,
                    genres: p.genres,
                    rating: p.rating,
                    season_number: p.season_number,
                    episode_number: p.episode_number,
                    original_air_date: p.original_air_date,
                })
                .collect();
            new_guide.schedules.entry(schedule.channel_id).or_default().extend(programs);
        }

        let channel_count = new_guide.channels.len();
        let program_count = new_guide.program_count();

        *self.guide.write().await = new_guide;
        *self.last_fetch.write().await = Some(Utc::now());

        if let Err(e) = self.save_cache().await {
            warn!("failed to persist epg cache: {e}");
        }

        info!("epg refresh captured {channel_count} channels, {program_count} programs");
        Ok((channel_count, program_count))
    }

    async fn capture_from_page(&self, page: &Page) -> anyhow::Result<CapturedPayloads> {
        install_capture_script(page).await?;

        // Attempt to switch the UI filter to "streaming channels".
        let _ = page
            .evaluate(
                "(() => { const el = document.querySelector('[data-filter=\"streaming\"], [aria-label*=\"streaming\" i]'); \
                 if (el) el.click(); })()",
            )
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Page through the guide to coerce lazy-loaded schedule fetches.
        for _ in 0..MAX_PAGE_DOWNS {
            let _ = page.press_key("PageDown").await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        tokio::time::sleep(SETTLE_PERIOD).await;

        let value = page.evaluate("window.__epgCapture || {}").await?;
        let captured: CapturedPayloads = value.into_value().unwrap_or_default();
        Ok(captured)
    }

    /// On module start: if the cache is older than the configured interval,
    /// refresh immediately, then run on a recurring timer. The interval is
    /// re-read from `config` every tick, not frozen at construction (spec.md
    /// §4.5). Calling this twice is a no-op (spec.md §8 idempotence).
    pub fn start_auto_refresh(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut guard = this.auto_refresh_handle.lock().await;
            if guard.is_some() {
                info!("auto-refresh already running, ignoring duplicate start");
                return;
            }

            let inner = this.clone();
            let handle = tokio::spawn(async move {
                let interval_hours = inner.config.read().await.refresh_interval_hours;
                let stale = match inner.last_fetch().await {
                    Some(last) => Utc::now().signed_duration_since(last).num_hours() >= interval_hours as i64,
                    None => true,
                };
                if stale {
                    if let Err(e) = inner.refresh().await {
                        warn!("initial epg refresh failed: {e}");
                    }
                }

                loop {
                    let interval_hours = inner.config.read().await.refresh_interval_hours.max(1);
                    tokio::time::sleep(Duration::from_secs(interval_hours as u64 * 3600)).await;
                    if let Err(e) = inner.refresh().await {
                        warn!("scheduled epg refresh failed: {e}");
                    }
                }
            });
            *guard = Some(handle);
        });
    }

    pub async fn stop_auto_refresh(&self) {
        if let Some(handle) = self.auto_refresh_handle.lock().await.take() {
            handle.abort();
        }
    }
}

async fn install_capture_script(page: &Page) -> anyhow::Result<()> {
    let script = r#"(() => {
        window.__epgCapture = { channels: null, schedules: [] };
        const originalFetch = window.fetch;
        window.fetch = async function(...args) {
            const response = await originalFetch.apply(this, args);
            try {
                const url = typeof args[0] === 'string' ? args[0] : (args[0] && args[0].url) || '';
                if (url.includes('/allchannels')) {
                    response.clone().json().then((data) => { window.__epgCapture.channels = data; }).catch(() => {});
                } else if (url.includes('/schedule')) {
                    response.clone().json().then((data) => { window.__epgCapture.schedules.push(data); }).catch(() => {});
                }
            } catch (e) {}
            return response;
        };
    })()"#;
    page.evaluate(script).await?;
    Ok(())
}
