//! Prometheus metrics, generalized from the upstream transcoder's per-channel
//! bandwidth/CPU gauges into per-tuner and per-provider gauges covering the
//! pool, encoder, and VOD cache.

use lazy_static::lazy_static;
use prometheus::{register_gauge_vec, Encoder, GaugeVec, TextEncoder};

lazy_static! {
    pub static ref TUNER_STATE: GaugeVec = register_gauge_vec!(
        "gateway_tuner_state",
        "Tuner state as a numeric code (0=stopped,1=starting,2=free,3=tuning,4=streaming,5=error)",
        &["tuner_id"]
    )
    .unwrap();
    pub static ref TUNER_CLIENT_COUNT: GaugeVec = register_gauge_vec!(
        "gateway_tuner_client_count",
        "Number of clients currently attached to a tuner's fan-out",
        &["tuner_id"]
    )
    .unwrap();
    pub static ref ENCODER_RESTARTS: GaugeVec = register_gauge_vec!(
        "gateway_encoder_restarts_total",
        "Cumulative hot-restart count for a tuner's capture encoder",
        &["tuner_id"]
    )
    .unwrap();
    pub static ref ENCODER_BYTES: GaugeVec = register_gauge_vec!(
        "gateway_encoder_bytes_total",
        "Cumulative bytes produced by a tuner's capture encoder",
        &["tuner_id"]
    )
    .unwrap();
    pub static ref PROVIDER_CACHE_HITS: GaugeVec = register_gauge_vec!(
        "gateway_segment_cache_hits_total",
        "Segment cache hits per provider",
        &["provider"]
    )
    .unwrap();
    pub static ref PROVIDER_CACHE_MISSES: GaugeVec = register_gauge_vec!(
        "gateway_segment_cache_misses_total",
        "Segment cache misses per provider",
        &["provider"]
    )
    .unwrap();
    pub static ref PROVIDER_STREAM_ENTRIES: GaugeVec = register_gauge_vec!(
        "gateway_provider_stream_entries",
        "Live StreamEntry count per provider",
        &["provider"]
    )
    .unwrap();
    pub static ref ENCODER_CPU_USAGE: GaugeVec = register_gauge_vec!(
        "gateway_encoder_cpu_usage_percent",
        "Current CPU usage of a tuner's capture encoder process (0-100+)",
        &["tuner_id"]
    )
    .unwrap();
}

pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_default()
}
