//! `CaptureEncoder`: screen-grab + audio-sink capture to MPEG-TS, with hot
//! restart, hardware-accel fallback, idle timer, and bounded stats. Grounded
//! in the upstream transcoder's `Transcoder` (`src/transcoder.rs`): same
//! external-process-plus-stdout-parsing shape, same `watch`-channel stop
//! signal and stderr ring buffer, generalized from a single ffmpeg invocation
//! transcoding one RTSP URL to one that captures a virtual X11 display and
//! named audio sink, and extended with the restart-attempt counter, hw-accel
//! latch, and stats ring the teacher's `Transcoder` didn't need.

use crate::config::EncoderConfig;
use crate::hardware::{self, EncodeParams};
use crate::metrics::{ENCODER_BYTES, ENCODER_CPU_USAGE, ENCODER_RESTARTS};
use bytes::Bytes;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::fanout::{Fanout, FanoutClient};

const MAX_RECENT_ERRORS: usize = 10;
const HW_FAILURE_WINDOW: Duration = Duration::from_secs(5);
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub running: bool,
    pub uptime_secs: u64,
    pub bytes_transferred: u64,
    pub frames: u64,
    pub restarts: u32,
    pub last_activity_secs_ago: u64,
    pub recent_errors: Vec<String>,
    pub encoder_mode: String,
}

impl EncoderStats {
    pub fn healthy(&self) -> bool {
        self.running && self.last_activity_secs_ago <= 5
    }
}

struct Shared {
    fanout: Fanout,
    running: Arc<AtomicBool>,
    stopping: AtomicBool,
    hw_accel_failed: AtomicBool,
    restart_attempts: AtomicU32,
    bytes_transferred: AtomicU64,
    frames: AtomicU64,
    last_activity: RwLock<Instant>,
    started_at: RwLock<Instant>,
    recent_errors: Mutex<VecDeque<String>>,
    generation: AtomicU64,
}

/// Owns the external encoder process plus the shared producer stream
/// (spec.md §3 ownership). One `CaptureEncoder` per tuner.
pub struct CaptureEncoder {
    shared: Arc<Shared>,
    config: EncoderConfig,
    display_num: Arc<Mutex<Option<u32>>>,
    audio_sink: String,
    /// Metric label for this encoder's tuner (e.g. its pool index), used to
    /// key `ENCODER_CPU_USAGE`/`ENCODER_RESTARTS`/`ENCODER_BYTES`.
    metric_label: String,
    supervisor: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

impl CaptureEncoder {
    pub fn new(config: EncoderConfig, audio_sink: String, metric_label: String) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let idle_timer = Duration::from_secs(config.idle_timer_secs());
        let fanout = Fanout::new(running.clone(), idle_timer);
        Self {
            shared: Arc::new(Shared {
                fanout,
                running,
                stopping: AtomicBool::new(false),
                hw_accel_failed: AtomicBool::new(false),
                restart_attempts: AtomicU32::new(0),
                bytes_transferred: AtomicU64::new(0),
                frames: AtomicU64::new(0),
                last_activity: RwLock::new(Instant::now()),
                started_at: RwLock::new(Instant::now()),
                recent_errors: Mutex::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
                generation: AtomicU64::new(0),
            }),
            config,
            display_num: Arc::new(Mutex::new(None)),
            audio_sink,
            metric_label,
            supervisor: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn client_count(&self) -> usize {
        self.shared.fanout.client_count()
    }

    /// Attaches a client, cancelling any pending idle-timer (spec.md §4.2).
    pub async fn add_client(&self) -> FanoutClient {
        self.shared.fanout.add_client()
    }

    /// If the attached set just became empty, arms the idle-timer. The
    /// automatic counterpart (writer close without an explicit
    /// `RemoveClient`) is armed directly by `FanoutClient`'s drop.
    pub async fn note_client_count_zero(&self) {
        self.shared.fanout.arm_idle_if_empty();
    }

    /// Starts (or restarts) the capture pipeline on the given virtual
    /// display. If already running, stops the previous instance and waits
    /// for process exit before spawning a new one: the `supervisor` mutex
    /// serializes this against any concurrent `Start` call.
    pub async fn start(&self, display_num: u32) -> anyhow::Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        if let Some((stop_tx, handle)) = supervisor.take() {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }

        self.shared.hw_accel_failed.store(false, Ordering::Release);
        self.shared.restart_attempts.store(0, Ordering::Release);
        self.shared.stopping.store(false, Ordering::Release);
        *self.display_num.lock().await = Some(display_num);

        let (stop_tx, stop_rx) = watch::channel(false);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let shared = self.shared.clone();
        let config = self.config.clone();
        let audio_sink = self.audio_sink.clone();
        let metric_label = self.metric_label.clone();

        let idle_stop_tx = stop_tx.clone();
        let handle = tokio::spawn(run_supervisor(shared.clone(), config, audio_sink, metric_label, display_num, stop_rx, generation));
        *supervisor = Some((stop_tx, handle));
        self.shared.running.store(true, Ordering::Release);
        spawn_idle_timer(self.shared.clone(), generation, idle_stop_tx);
        Ok(())
    }

    /// Non-blocking stop.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        if let Some((stop_tx, _)) = self.supervisor.lock().await.as_ref() {
            let _ = stop_tx.send(true);
        }
    }

    /// Blocking stop: waits for the supervisor task to actually exit.
    pub async fn stop_and_wait(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        let mut supervisor = self.supervisor.lock().await;
        if let Some((stop_tx, handle)) = supervisor.take() {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }
        self.shared.running.store(false, Ordering::Release);
        ENCODER_CPU_USAGE.with_label_values(&[&self.metric_label]).set(0.0);
    }

    pub async fn stats(&self) -> EncoderStats {
        let started_at = *self.shared.started_at.read().await;
        let last_activity = *self.shared.last_activity.read().await;
        EncoderStats {
            running: self.is_running(),
            uptime_secs: started_at.elapsed().as_secs(),
            bytes_transferred: self.shared.bytes_transferred.load(Ordering::Relaxed),
            frames: self.shared.frames.load(Ordering::Relaxed),
            restarts: self.shared.restart_attempts.load(Ordering::Relaxed),
            last_activity_secs_ago: last_activity.elapsed().as_secs(),
            recent_errors: self.shared.recent_errors.lock().await.iter().cloned().collect(),
            encoder_mode: if self.shared.hw_accel_failed.load(Ordering::Acquire) {
                "cpu".to_string()
            } else {
                self.config.hw_accel.clone()
            },
        }
    }
}

fn spawn_idle_timer(shared: Arc<Shared>, generation: u64, stop_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            if shared.generation.load(Ordering::Acquire) != generation {
                return; // superseded by a newer Start()
            }
            if !shared.running.load(Ordering::Acquire) {
                return;
            }
            if shared.fanout.is_idle_expired() {
                info!("capture encoder idle-timer expired, stopping to conserve resources");
                shared.stopping.store(true, Ordering::Release);
                shared.fanout.clear_idle();
                let _ = stop_tx.send(true);
                return;
            }
        }
    });
}

async fn run_supervisor(
    shared: Arc<Shared>,
    config: EncoderConfig,
    audio_sink: String,
    metric_label: String,
    display_num: u32,
    mut stop_rx: watch::Receiver<bool>,
    generation: u64,
) {
    *shared.started_at.write().await = Instant::now();
    let mut hw_accel = hardware::detect(&config.hw_accel);

    loop {
        if *stop_rx.borrow() {
            break;
        }
        let attempt_start = Instant::now();
        let result = run_once(&shared, &config, &audio_sink, &metric_label, display_num, &hw_accel, &mut stop_rx).await;

        if shared.generation.load(Ordering::Acquire) != generation {
            return; // a newer Start() took over; don't fight it for exit handling
        }

        match result {
            ExitOutcome::StoppedByCaller => break,
            ExitOutcome::CleanExit => break,
            ExitOutcome::Failed { hw_error } => {
                if hw_error
                    && attempt_start.elapsed() < HW_FAILURE_WINDOW
                    && !shared.hw_accel_failed.swap(true, Ordering::AcqRel)
                {
                    warn!("hardware encoder init failed, falling back to software for this session");
                    hw_accel = "cpu".to_string();
                    shared.restart_attempts.store(0, Ordering::Release);
                    continue;
                }

                if shared.fanout.client_count() == 0 {
                    info!("capture encoder exited with no clients attached, not restarting");
                    break;
                }

                let attempts = shared.restart_attempts.fetch_add(1, Ordering::AcqRel) + 1;
                ENCODER_RESTARTS.with_label_values(&[&metric_label]).set(attempts as f64);
                if attempts > config.max_restart_attempts {
                    error!("capture encoder exceeded {} restart attempts, abandoning", config.max_restart_attempts);
                    break;
                }
                let restart_delay = Duration::from_secs(config.restart_delay_secs);
                warn!("capture encoder restarting (attempt {attempts}) after {restart_delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(restart_delay) => {}
                    _ = stop_rx.changed() => { if *stop_rx.borrow() { break; } }
                }
            }
        }
    }

    shared.running.store(false, Ordering::Release);
}

enum ExitOutcome {
    StoppedByCaller,
    CleanExit,
    Failed { hw_error: bool },
}

async fn run_once(
    shared: &Arc<Shared>,
    config: &EncoderConfig,
    audio_sink: &str,
    metric_label: &str,
    display_num: u32,
    hw_accel: &str,
    stop_rx: &mut watch::Receiver<bool>,
) -> ExitOutcome {
    let display = format!(":{display_num}");
    let params = EncodeParams {
        width: config.width,
        height: config.height,
        fps: config.fps,
        video_bitrate_kbps: config.video_bitrate_kbps,
        audio_bitrate_kbps: config.audio_bitrate_kbps,
    };

    let mut args = hardware::get_global_args(hw_accel);
    args.extend([
        "-f".into(), "x11grab".into(),
        "-video_size".into(), format!("{}x{}", config.width, config.height),
        "-framerate".into(), config.fps.to_string(),
        "-i".into(), display,
        "-f".into(), "pulse".into(),
        "-i".into(), audio_sink.to_string(),
    ]);
    args.extend(hardware::get_args(hw_accel, params));
    args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), format!("{}k", config.audio_bitrate_kbps)]);
    args.extend(["-f".into(), "mpegts".into(), "pipe:1".into()]);

    // hardware encoders benefit from a short readiness delay before traffic starts
    if hw_accel != "cpu" {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    info!("spawning capture encoder: display={display_num} hw_accel={hw_accel} args={args:?}");
    let child = Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            error!("failed to spawn capture encoder: {e}");
            push_error(shared, format!("spawn failed: {e}")).await;
            return ExitOutcome::Failed { hw_error: false };
        }
    };

    if let Some(pid) = child.id() {
        let label = metric_label.to_string();
        let mut stop_rx_mon = stop_rx.clone();
        tokio::spawn(async move {
            let mut sys = System::new();
            let pid = Pid::from_u32(pid);
            loop {
                tokio::select! {
                    _ = stop_rx_mon.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {
                        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
                        match sys.process(pid) {
                            Some(process) => ENCODER_CPU_USAGE.with_label_values(&[&label]).set(process.cpu_usage() as f64),
                            None => break,
                        }
                    }
                }
            }
        });
    }

    let mut stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let hw_error_flag = Arc::new(AtomicBool::new(false));
    let hw_error_flag_reader = hw_error_flag.clone();
    let hw_accel_owned = hw_accel.to_string();
    let shared_stderr = shared.clone();

    let stderr_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim().to_string();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!("ffmpeg: {trimmed}");
                    if crate::hardware::is_hw_init_error(&hw_accel_owned, &trimmed) {
                        hw_error_flag_reader.store(true, Ordering::Release);
                    }
                    if trimmed.contains("error") || trimmed.contains("Error") {
                        push_error(&shared_stderr, trimmed).await;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut buf = [0u8; 64 * 1024];
    let mut stop_requested = false;
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    stop_requested = true;
                    let _ = child.kill().await;
                    break;
                }
            }
            read = stdout.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let bytes = Bytes::copy_from_slice(&buf[..n]);
                        let total = shared.bytes_transferred.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                        shared.frames.fetch_add(1, Ordering::Relaxed);
                        *shared.last_activity.write().await = Instant::now();
                        ENCODER_BYTES.with_label_values(&[metric_label]).set(total as f64);
                        shared.fanout.send(bytes);
                    }
                    Err(e) => {
                        warn!("error reading capture encoder stdout: {e}");
                        break;
                    }
                }
            }
        }
    }

    let _ = stderr_task.await;
    let status = child.wait().await;

    if stop_requested {
        return ExitOutcome::StoppedByCaller;
    }

    match status {
        Ok(status) if status.success() => ExitOutcome::CleanExit,
        Ok(status) => {
            warn!("capture encoder exited with error: {status}");
            ExitOutcome::Failed { hw_error: hw_error_flag.load(Ordering::Acquire) }
        }
        Err(e) => {
            warn!("capture encoder wait() failed: {e}");
            ExitOutcome::Failed { hw_error: false }
        }
    }
}

async fn push_error(shared: &Arc<Shared>, msg: String) {
    let mut errors = shared.recent_errors.lock().await;
    if errors.len() >= MAX_RECENT_ERRORS {
        errors.pop_front();
    }
    errors.push_back(msg);
}
