use super::EncodeParams;
use tracing::info;

pub fn detect_auto() -> String {
    info!("windows auto-detection is not implemented, defaulting to cpu; set hw_accel explicitly to amf/nvenc/qsv");
    "cpu".to_string()
}

pub fn get_args_amf(params: EncodeParams) -> Vec<String> {
    vec![
        "-c:v".into(),
        "h264_amf".into(),
        "-rc".into(),
        "cbr".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-usage".into(),
        "lowlatency".into(),
    ]
}

pub fn get_args_nvenc(params: EncodeParams) -> Vec<String> {
    vec![
        "-c:v".into(),
        "h264_nvenc".into(),
        "-rc".into(),
        "cbr".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-preset".into(),
        "p2".into(),
        "-tune".into(),
        "ull".into(),
        "-zerolatency".into(),
        "1".into(),
    ]
}

pub fn get_args_qsv(params: EncodeParams) -> Vec<String> {
    vec![
        "-c:v".into(),
        "h264_qsv".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-look_ahead".into(),
        "0".into(),
        "-async_depth".into(),
        "1".into(),
    ]
}
