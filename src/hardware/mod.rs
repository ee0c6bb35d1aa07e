//! Hardware-encoder detection and per-OS ffmpeg argument generation for the
//! capture pipeline. Generalized from the upstream RTSP transcoder's
//! `TuningMode`-keyed argument builders into one keyed by the capture
//! resolution/bitrate the gateway is configured with.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "windows")]
pub mod windows;

pub mod cpu;

/// Video parameters the capture encoder was configured with (spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

/// Resolves the configured `hw_accel` setting ("auto", "cpu", or an explicit
/// accelerator name) to the concrete mode to use on this OS.
pub fn detect(configured: &str) -> String {
    if configured != "auto" {
        return configured.to_string();
    }

    #[cfg(target_os = "linux")]
    {
        return linux::detect_auto();
    }

    #[cfg(target_os = "macos")]
    {
        return macos::detect_auto();
    }

    #[cfg(target_os = "windows")]
    {
        return windows::detect_auto();
    }

    #[allow(unreachable_code)]
    "cpu".to_string()
}

/// Per-output video/audio codec args for the given accelerator.
pub fn get_args(hw_accel: &str, params: EncodeParams) -> Vec<String> {
    if hw_accel == "cpu" {
        return cpu::get_args(params);
    }

    #[cfg(target_os = "linux")]
    if hw_accel == "vaapi" {
        return linux::get_args_vaapi(params);
    }

    #[cfg(target_os = "macos")]
    if hw_accel == "videotoolbox" {
        return macos::get_args_videotoolbox(params);
    }

    #[cfg(target_os = "windows")]
    {
        if hw_accel == "amf" {
            return windows::get_args_amf(params);
        }
        if hw_accel == "nvenc" {
            return windows::get_args_nvenc(params);
        }
        if hw_accel == "qsv" {
            return windows::get_args_qsv(params);
        }
    }

    cpu::get_args(params)
}

/// Global (pre-input) args a hardware accelerator needs, e.g. VAAPI's device init.
pub fn get_global_args(hw_accel: &str) -> Vec<String> {
    #[cfg(target_os = "linux")]
    if hw_accel == "vaapi" {
        return linux::get_global_args_vaapi();
    }
    let _ = hw_accel;
    Vec::new()
}

/// Heuristic used by the capture encoder's hot-restart policy (spec.md §4.2)
/// to distinguish a genuine hardware-initialization failure (worth falling
/// back to software for) from an ordinary encoder crash.
pub fn is_hw_init_error(hw_accel: &str, log_line: &str) -> bool {
    let lower = log_line.to_lowercase();
    match hw_accel {
        "vaapi" => {
            lower.contains("failed to initialise vaapi")
                || lower.contains("failed to initialize vaapi")
                || lower.contains("cannot load va")
                || lower.contains("vaapi_device_init")
        }
        "videotoolbox" => lower.contains("videotoolbox session") || lower.contains("vtcompressionsession"),
        "nvenc" => {
            lower.contains("cannot load nvcuda")
                || lower.contains("cannot load libnvidia-encode")
                || lower.contains("nvenc_open_encode_session")
        }
        "amf" => lower.contains("amf") && (lower.contains("failed") || lower.contains("cannot")),
        "qsv" => lower.contains("qsv") && (lower.contains("failed") || lower.contains("cannot")),
        _ => false,
    }
}
