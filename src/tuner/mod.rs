//! A single tuner: virtual display + exclusive browser page + capture
//! encoder + fan-out (spec.md §3, §4.1). Grounded in the upstream
//! transcoder's per-stream lifecycle (`manager.rs`'s `ActiveStream`), but the
//! upstream model (one RTSP URL, immediately known) is replaced end-to-end by
//! the DOM-navigation tuning procedure spec.md §4.1 Steps A-F describes,
//! since there is no URL to dial here -- only a channel to find and click.

pub mod matching;
pub mod pool;

use crate::browser::Browser;
use crate::capture::{CaptureEncoder, EncoderStats, FanoutClient};
use crate::channel::Channel;
use crate::config::{EncoderConfig, TunerConfig};
use crate::error::TuneError;
use chromiumoxide::Page;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunerState {
    Stopped,
    Starting,
    Free,
    Tuning,
    Streaming,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TunerSnapshot {
    pub id: usize,
    pub state: TunerState,
    pub current_channel: Option<String>,
    pub client_count: usize,
    pub last_activity_secs_ago: u64,
    pub display_num: u32,
    pub debug_port: u16,
}

/// Guard data the upstream site's guide view is kept in, so repeated tunes
/// don't re-navigate when already in place (spec.md §4.1 Step A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageLocation {
    Unknown,
    OffSite,
    OnGuide,
    Elsewhere,
}

pub struct Tuner {
    pub id: usize,
    pub display_num: u32,
    pub debug_port: u16,
    state: RwLock<TunerState>,
    current_channel: RwLock<Option<String>>,
    last_activity: AtomicU64,
    encoder: CaptureEncoder,
    browser: Browser,
    page: Mutex<Option<Page>>,
    page_location: Mutex<PageLocation>,
    guide_base_url: String,
    tune_lock: Mutex<()>,
}

fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Tuner {
    pub fn new(
        id: usize,
        display_base: u32,
        debug_port_base: u16,
        browser: Browser,
        guide_base_url: String,
        encoder_config: EncoderConfig,
    ) -> Self {
        Self {
            id,
            display_num: display_base + id as u32,
            debug_port: debug_port_base + id as u16,
            state: RwLock::new(TunerState::Stopped),
            current_channel: RwLock::new(None),
            last_activity: AtomicU64::new(epoch_secs()),
            encoder: CaptureEncoder::new(encoder_config, format!("tuner{id}_sink"), id.to_string()),
            browser,
            page: Mutex::new(None),
            page_location: Mutex::new(PageLocation::Unknown),
            guide_base_url,
            tune_lock: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> TunerState {
        *self.state.read().await
    }

    pub async fn current_channel(&self) -> Option<String> {
        self.current_channel.read().await.clone()
    }

    pub fn client_count(&self) -> usize {
        self.encoder.client_count()
    }

    pub fn touch(&self) {
        self.last_activity.store(epoch_secs(), Ordering::Relaxed);
    }

    pub fn last_activity_secs_ago(&self) -> u64 {
        epoch_secs().saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }

    pub async fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats().await
    }

    pub async fn snapshot(&self) -> TunerSnapshot {
        TunerSnapshot {
            id: self.id,
            state: *self.state.read().await,
            current_channel: self.current_channel.read().await.clone(),
            client_count: self.client_count(),
            last_activity_secs_ago: self.last_activity_secs_ago(),
            display_num: self.display_num,
            debug_port: self.debug_port,
        }
    }

    /// `stopped -start()-> starting -ready-> free` (spec.md §4.1).
    pub async fn start(&self) -> anyhow::Result<()> {
        *self.state.write().await = TunerState::Starting;
        let url = format!("{}/", self.guide_base_url.trim_end_matches('/'));
        match self.browser.new_page(&url).await {
            Ok(page) => {
                *self.page.lock().await = Some(page);
                *self.page_location.lock().await = PageLocation::OffSite;
                *self.state.write().await = TunerState::Free;
                info!("tuner {} ready (display=:{})", self.id, self.display_num);
                Ok(())
            }
            Err(e) => {
                warn!("tuner {} failed to start: {e}", self.id);
                *self.state.write().await = TunerState::Error;
                Err(e)
            }
        }
    }

    /// The allocator attaches a client after reuse/join/free/steal decisions;
    /// this just increments via the encoder's fan-out and touches activity.
    pub async fn attach_client(&self) -> FanoutClient {
        self.touch();
        self.encoder.add_client().await
    }

    pub async fn release_client(&self) {
        self.encoder.note_client_count_zero().await;
    }

    /// `any -fatal-> error -recover-> stopped`, invoked by the idle reaper or
    /// the next allocator call.
    pub async fn recover(&self) {
        self.encoder.stop_and_wait().await;
        *self.current_channel.write().await = None;
        *self.state.write().await = TunerState::Free;
    }

    pub async fn force_release(&self) {
        self.encoder.stop_and_wait().await;
        *self.current_channel.write().await = None;
        *self.state.write().await = TunerState::Free;
    }

    /// The tuning procedure, spec.md §4.1 Steps A-F. Transitions are
    /// serialized per-tuner via `tune_lock` so two `Allocate` calls never
    /// race through this state machine concurrently for the same tuner.
    pub async fn tune(&self, channel: &Channel) -> Result<(), TuneError> {
        let _guard = self.tune_lock.lock().await;

        if *self.state.read().await == TunerState::Streaming {
            self.encoder.stop_and_wait().await;
        }
        *self.state.write().await = TunerState::Tuning;

        let result = self.tune_inner(channel).await;

        match &result {
            Ok(()) => {
                *self.current_channel.write().await = Some(channel.id.clone());
                self.touch();
                *self.state.write().await = TunerState::Streaming;
            }
            Err(TuneError::EncoderStart(_)) => {
                *self.state.write().await = TunerState::Error;
            }
            Err(_) => {
                *self.current_channel.write().await = None;
                *self.state.write().await = TunerState::Free;
            }
        }

        result
    }

    async fn tune_inner(&self, channel: &Channel) -> Result<(), TuneError> {
        let page_guard = self.page.lock().await;
        let page = page_guard
            .as_ref()
            .ok_or_else(|| TuneError::Navigation("tuner has no open page".to_string()))?;

        // Step A: ensure the page is on the guide view.
        self.ensure_on_guide(page).await?;

        // Step B: locate the channel row via the ordered match policy.
        let label_index = self.locate_channel_row(page, channel).await?;

        // Step C: click the located row, wait for a play affordance.
        self.click_and_wait_for_play(page, label_index).await?;

        // Step D: wait for media readiness.
        self.wait_for_media_ready(page).await?;

        // Step E: normalize viewport (fullscreen, hide chrome, unmute).
        self.normalize_viewport(page).await?;

        drop(page_guard);

        // Step F: start the capture encoder bound to this tuner's display.
        self.encoder
            .start(self.display_num)
            .await
            .map_err(|e| TuneError::EncoderStart(e.to_string()))?;

        Ok(())
    }

    async fn ensure_on_guide(&self, page: &Page) -> Result<(), TuneError> {
        let mut location = self.page_location.lock().await;
        if *location != PageLocation::OnGuide {
            let guide_url = format!("{}/guide", self.guide_base_url.trim_end_matches('/'));
            page.goto(&guide_url)
                .await
                .map_err(|e| TuneError::Navigation(e.to_string()))?;
            *location = PageLocation::OnGuide;
        }
        drop(location);

        // Poll for at least one channel row, cap 10s @ 300ms, proceed on timeout.
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Ok(rows) = page.find_elements("[data-channel-row]").await {
                if !rows.is_empty() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(())
    }

    async fn locate_channel_row(&self, page: &Page, channel: &Channel) -> Result<usize, TuneError> {
        const MAX_SCROLLS: u32 = 15;
        for scroll in 0..=MAX_SCROLLS {
            let rows = page
                .find_elements("[data-channel-row]")
                .await
                .map_err(|e| TuneError::Navigation(e.to_string()))?;
            let mut labels = Vec::with_capacity(rows.len());
            for row in &rows {
                let label = row.inner_text().await.ok().flatten().unwrap_or_default();
                labels.push(label);
            }
            if let Some(index) = matching::find_matching_label(&labels, channel) {
                return Ok(index);
            }
            if scroll < MAX_SCROLLS {
                let _ = page
                    .evaluate("window.scrollBy(0, window.innerHeight)")
                    .await;
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        }
        Err(TuneError::ChannelNotFound(channel.name.clone()))
    }

    async fn click_and_wait_for_play(&self, page: &Page, label_index: usize) -> Result<(), TuneError> {
        let rows = page
            .find_elements("[data-channel-row]")
            .await
            .map_err(|e| TuneError::Navigation(e.to_string()))?;
        let row = rows
            .get(label_index)
            .ok_or_else(|| TuneError::Navigation("channel row vanished before click".to_string()))?;
        row.click().await.map_err(|e| TuneError::Navigation(e.to_string()))?;

        let deadline = Instant::now() + Duration::from_secs(8);
        let selector = "[aria-label*='play' i], [aria-label*='watch' i], [aria-label*='tune' i], svg.play-icon, [data-time-of-day]";
        while Instant::now() < deadline {
            if let Ok(matches) = page.find_elements(selector).await {
                if !matches.is_empty() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        // Spec.md allows proceeding on timeout here too; the next step's own
        // readiness check is the real gate.
        Ok(())
    }

    async fn wait_for_media_ready(&self, page: &Page) -> Result<(), TuneError> {
        let deadline = Instant::now() + Duration::from_secs(15);
        let mut attempted_play = false;
        while Instant::now() < deadline {
            let script = "(() => { const v = document.querySelector('video'); if (!v) return null; \
                return { readyState: v.readyState, currentTime: v.currentTime, paused: v.paused }; })()";
            if let Ok(result) = page.evaluate(script).await {
                if let Ok(Some(state)) = result.into_value::<Option<MediaState>>() {
                    let ready_playing = state.ready_state >= 3 && state.current_time > 0.0 && !state.paused;
                    let ready_loaded = state.ready_state == 4;
                    if ready_playing || ready_loaded {
                        return Ok(());
                    }
                    if state.ready_state >= 3 && state.paused && !attempted_play {
                        attempted_play = true;
                        let _ = page
                            .evaluate("const v = document.querySelector('video'); if (v) { v.muted = false; v.play(); }")
                            .await;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        // Proceed on timeout per spec.md; a persistently black/frozen feed
        // will simply produce an unhealthy encoder the reaper can recover.
        Ok(())
    }

    async fn normalize_viewport(&self, page: &Page) -> Result<(), TuneError> {
        let _ = page
            .evaluate(
                "(() => { const v = document.querySelector('video'); if (v && v.requestFullscreen) { \
                 v.requestFullscreen().catch(() => {}); } \
                 const style = document.createElement('style'); \
                 style.textContent = 'video{position:fixed!important;top:0!important;left:0!important;\
                 width:100vw!important;height:100vh!important;z-index:2147483647!important}\
                 header,nav,.chrome,.overlay{display:none!important}'; \
                 document.head.appendChild(style); \
                 if (v) v.muted = false; })()",
            )
            .await;
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct MediaState {
    #[serde(rename = "readyState")]
    ready_state: i32,
    #[serde(rename = "currentTime")]
    current_time: f64,
    paused: bool,
}
