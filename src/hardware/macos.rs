use super::EncodeParams;
use tracing::info;

pub fn detect_auto() -> String {
    info!("auto-detected macOS, using videotoolbox");
    "videotoolbox".to_string()
}

pub fn get_args_videotoolbox(params: EncodeParams) -> Vec<String> {
    vec![
        "-c:v".into(),
        "h264_videotoolbox".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", params.video_bitrate_kbps * 2),
        "-profile:v".into(),
        "high".into(),
        "-realtime".into(),
        "true".into(),
        "-bf".into(),
        "0".into(),
        "-allow_sw".into(),
        "1".into(),
    ]
}
