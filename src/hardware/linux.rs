use super::EncodeParams;
use std::path::Path;
use tracing::{info, warn};

pub fn detect_auto() -> String {
    let path = Path::new("/dev/dri/renderD128");
    if path.exists() {
        match std::fs::File::open(path) {
            Ok(_) => {
                info!("auto-detected VAAPI device at {:?}, using vaapi", path);
                "vaapi".to_string()
            }
            Err(e) => {
                warn!("VAAPI device found at {:?} but cannot be opened ({}), falling back to cpu", path, e);
                "cpu".to_string()
            }
        }
    } else {
        info!("no VAAPI device at {:?}, using cpu", path);
        "cpu".to_string()
    }
}

pub fn get_global_args_vaapi() -> Vec<String> {
    vec![
        "-init_hw_device".into(),
        "vaapi=va:/dev/dri/renderD128".into(),
        "-filter_hw_device".into(),
        "va".into(),
    ]
}

pub fn get_args_vaapi(params: EncodeParams) -> Vec<String> {
    vec![
        "-vf".into(),
        "format=nv12,hwupload".into(),
        "-c:v".into(),
        "h264_vaapi".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", params.video_bitrate_kbps * 2),
        "-bufsize".into(),
        format!("{}k", params.video_bitrate_kbps * 2),
        "-bf".into(),
        "0".into(),
    ]
}
