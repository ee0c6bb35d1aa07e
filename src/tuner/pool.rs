//! `TunerPool`: allocation policy, surf debouncing, and the idle reaper
//! (spec.md §4.1). Generalizes the upstream transcoder's mux-key/avm slot
//! allocation in `manager.rs` (reuse an active stream on the same tuning
//! mux, otherwise grab a free slot) into the full seven-step policy spec.md
//! describes, returning a typed `AllocateOutcome` rather than a bare
//! `Option` (spec.md §9's open question on "superseded" vs "exhausted").

use super::{Tuner, TunerState};
use crate::browser::Browser;
use crate::channel::Channel;
use crate::config::{EncoderConfig, TunerConfig};
use crate::error::AllocateOutcome;
use crate::metrics::{TUNER_CLIENT_COUNT, TUNER_STATE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOIN_WAIT_CAP: Duration = Duration::from_secs(30);
const SURF_WAIT_CAP: Duration = Duration::from_secs(35);

pub struct TunerPool {
    tuners: Vec<Arc<Tuner>>,
    config: TunerConfig,
    /// Monotonic counter recording the most recent surf-supersession request;
    /// a waiter whose `my_token` is no longer the latest when it wakes is
    /// superseded by someone else's newer request (spec.md §4.1 rule 3).
    pending_surf_token: Arc<AtomicU64>,
    reaper_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl TunerPool {
    /// Brings `N` tuners to `free`. Per-tuner start failures are recorded and
    /// the pool continues with survivors.
    pub async fn initialize(
        pool_size: usize,
        config: TunerConfig,
        encoder_config: EncoderConfig,
        browser: Browser,
        guide_base_url: String,
    ) -> Arc<Self> {
        let mut tuners = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            let tuner = Arc::new(Tuner::new(
                id,
                config.display_base,
                9222 + id as u16,
                browser.clone(),
                guide_base_url.clone(),
                encoder_config.clone(),
            ));
            if let Err(e) = tuner.start().await {
                warn!("tuner {id} failed to initialize: {e}");
            }
            tuners.push(tuner);
        }

        let pool = Arc::new(Self {
            tuners,
            config: config.clone(),
            pending_surf_token: Arc::new(AtomicU64::new(0)),
            reaper_handle: RwLock::new(None),
        });
        pool.clone().spawn_idle_reaper();
        pool
    }

    fn spawn_idle_reaper(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.reaper_period_secs);
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                for tuner in &pool.tuners {
                    if tuner.state().await == TunerState::Streaming
                        && tuner.client_count() == 0
                        && tuner.last_activity_secs_ago() > idle_timeout.as_secs()
                    {
                        info!("idle reaper releasing tuner {}", tuner.id);
                        tuner.recover().await;
                    }
                }
            }
        });
        tokio::spawn(async move {
            *self.reaper_handle.write().await = Some(handle);
        });
    }

    /// The seven-step allocation policy. On success, the returned
    /// `FanoutClient` is already attached -- the caller (the HTTP stream
    /// handler) just has to hold it for the connection's lifetime.
    pub async fn allocate(
        &self,
        channel: &Channel,
    ) -> AllocateOutcome<(Arc<Tuner>, crate::capture::FanoutClient)> {
        // 1. Reuse streaming.
        for tuner in &self.tuners {
            if tuner.state().await == TunerState::Streaming
                && tuner.current_channel().await.as_deref() == Some(channel.id.as_str())
            {
                let client = tuner.attach_client().await;
                return AllocateOutcome::Tuned((tuner.clone(), client));
            }
        }

        // 2. Join an in-progress tune to the same channel.
        for tuner in &self.tuners {
            if tuner.state().await == TunerState::Tuning
                && tuner.current_channel().await.as_deref() == Some(channel.id.as_str())
            {
                if self.wait_for_quiescence(tuner, JOIN_WAIT_CAP).await
                    && tuner.state().await == TunerState::Streaming
                {
                    let client = tuner.attach_client().await;
                    return AllocateOutcome::Tuned((tuner.clone(), client));
                }
            }
        }

        // 3. Surf supersession: another tuner is mid-tune to a different channel.
        if let Some(tuner) = self.find_tuning_different(channel).await {
            let my_token = self.pending_surf_token.fetch_add(1, Ordering::AcqRel) + 1;
            self.wait_for_quiescence(&tuner, SURF_WAIT_CAP).await;
            if self.pending_surf_token.load(Ordering::Acquire) != my_token {
                return AllocateOutcome::Superseded;
            }
            return self.reassign(&tuner, channel).await;
        }

        // 4. First free tuner.
        for tuner in &self.tuners {
            if tuner.state().await == TunerState::Free {
                return self.tune_fresh(tuner, channel).await;
            }
        }

        // 5. Steal the idlest streaming-but-unwatched tuner.
        if let Some(tuner) = self.find_idlest_streaming().await {
            return self.reassign(&tuner, channel).await;
        }

        // 6. Single-tuner auto-switch (restricted to N == 1, spec.md §9 decision).
        if self.tuners.len() == 1 {
            let tuner = self.tuners[0].clone();
            if tuner.state().await == TunerState::Streaming {
                return self.reassign(&tuner, channel).await;
            }
        }

        // 7. Exhausted.
        AllocateOutcome::Exhausted
    }

    async fn find_tuning_different(&self, channel: &Channel) -> Option<Arc<Tuner>> {
        for tuner in &self.tuners {
            if tuner.state().await == TunerState::Tuning
                && tuner.current_channel().await.as_deref() != Some(channel.id.as_str())
            {
                return Some(tuner.clone());
            }
        }
        None
    }

    async fn find_idlest_streaming(&self) -> Option<Arc<Tuner>> {
        let mut best: Option<(Arc<Tuner>, u64)> = None;
        for tuner in &self.tuners {
            if tuner.state().await == TunerState::Streaming && tuner.client_count() == 0 {
                let idle = tuner.last_activity_secs_ago();
                if best.as_ref().map(|(_, b)| idle > *b).unwrap_or(true) {
                    best = Some((tuner.clone(), idle));
                }
            }
        }
        best.map(|(t, _)| t)
    }

    /// Polls `tuner` until it leaves `Tuning`, bounded by `cap`.
    async fn wait_for_quiescence(&self, tuner: &Arc<Tuner>, cap: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + cap;
        while tokio::time::Instant::now() < deadline {
            let state = tuner.state().await;
            if state != TunerState::Tuning {
                return true;
            }
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }
        false
    }

    async fn tune_fresh(
        &self,
        tuner: &Arc<Tuner>,
        channel: &Channel,
    ) -> AllocateOutcome<(Arc<Tuner>, crate::capture::FanoutClient)> {
        match tuner.tune(channel).await {
            Ok(()) => {
                let client = tuner.attach_client().await;
                AllocateOutcome::Tuned((tuner.clone(), client))
            }
            Err(e) => {
                warn!("tune failed on tuner {}: {e}", tuner.id);
                AllocateOutcome::Exhausted
            }
        }
    }

    async fn reassign(
        &self,
        tuner: &Arc<Tuner>,
        channel: &Channel,
    ) -> AllocateOutcome<(Arc<Tuner>, crate::capture::FanoutClient)> {
        tuner.force_release().await;
        self.tune_fresh(tuner, channel).await
    }

    pub async fn release_client(&self, tuner_id: usize) {
        if let Some(tuner) = self.tuners.get(tuner_id) {
            tuner.release_client().await;
        }
    }

    pub async fn force_release(&self, tuner_id: usize) {
        if let Some(tuner) = self.tuners.get(tuner_id) {
            tuner.force_release().await;
        }
    }

    pub async fn status(&self) -> Vec<super::TunerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.tuners.len());
        for tuner in &self.tuners {
            let snapshot = tuner.snapshot().await;
            let label = snapshot.id.to_string();
            TUNER_STATE.with_label_values(&[&label]).set(snapshot.state as u8 as f64);
            TUNER_CLIENT_COUNT.with_label_values(&[&label]).set(snapshot.client_count as f64);
            snapshots.push(snapshot);
        }
        snapshots
    }

    pub fn tuner(&self, id: usize) -> Option<&Arc<Tuner>> {
        self.tuners.get(id)
    }

    pub async fn shutdown(&self) {
        for tuner in &self.tuners {
            tuner.force_release().await;
        }
        if let Some(handle) = self.reaper_handle.write().await.take() {
            handle.abort();
        }
    }
}
