//! Configuration loading: a `config.toml` file plus CLI overrides, the same
//! layering the upstream transcoder used (`config` crate + `clap`), expanded
//! to cover every environment input spec.md §6 lists.

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: String,

    /// Override server.port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tuners: TunerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub vod: VodConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Debug port the headless browser exposes its DevTools protocol on.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
}

fn default_debug_port() -> u16 {
    9222
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub login_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// First virtual display number; tuner `i` owns display `display_base + i`.
    #[serde(default = "default_display_base")]
    pub display_base: u32,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reaper_period_secs")]
    pub reaper_period_secs: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            display_base: default_display_base(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reaper_period_secs: default_reaper_period_secs(),
        }
    }
}

fn default_pool_size() -> usize {
    2
}
fn default_display_base() -> u32 {
    99
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_reaper_period_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_hw_accel")]
    pub hw_accel: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_kbps: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_encoder_idle_timer_secs")]
    pub idle_timer_secs: u64,
}

impl EncoderConfig {
    /// Seconds an idle (zero-client) but still-running encoder is kept alive
    /// before it stops itself (spec.md §4.2 idle-timer policy).
    pub fn idle_timer_secs(&self) -> u64 {
        self.idle_timer_secs
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            hw_accel: default_hw_accel(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            video_bitrate_kbps: default_video_bitrate(),
            audio_bitrate_kbps: default_audio_bitrate(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_delay_secs: default_restart_delay_secs(),
            idle_timer_secs: default_encoder_idle_timer_secs(),
        }
    }
}

fn default_encoder_idle_timer_secs() -> u64 {
    30
}

fn default_hw_accel() -> String {
    "auto".to_string()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    30
}
fn default_video_bitrate() -> u32 {
    4000
}
fn default_audio_bitrate() -> u32 {
    128
}
fn default_max_restart_attempts() -> u32 {
    5
}
fn default_restart_delay_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct VodConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_prefetch_delay_ms")]
    pub prefetch_delay_ms: u64,
}

impl Default for VodConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            prefetch_delay_ms: default_prefetch_delay_ms(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_inactivity_timeout_secs() -> u64 {
    300
}
fn default_prefetch_delay_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpgConfig {
    #[serde(default = "default_epg_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_epg_refresh_interval_hours")]
    pub refresh_interval_hours: u32,
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            window_hours: default_epg_window_hours(),
            refresh_interval_hours: default_epg_refresh_interval_hours(),
        }
    }
}

fn default_epg_window_hours() -> u32 {
    24
}
fn default_epg_refresh_interval_hours() -> u32 {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_segment_cache_size")]
    pub segment_cache_size: usize,
    #[serde(default = "default_segment_ttl_secs")]
    pub segment_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            segment_cache_size: default_segment_cache_size(),
            segment_ttl_secs: default_segment_ttl_secs(),
        }
    }
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}
fn default_segment_cache_size() -> usize {
    600
}
fn default_segment_ttl_secs() -> u64 {
    900
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
