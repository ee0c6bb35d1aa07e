use super::EncodeParams;

pub fn get_args(params: EncodeParams) -> Vec<String> {
    vec![
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-profile:v".into(),
        "main".into(),
        "-b:v".into(),
        format!("{}k", params.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", params.video_bitrate_kbps * 2),
        "-bufsize".into(),
        format!("{}k", params.video_bitrate_kbps * 2),
        "-g".into(),
        (params.fps * 2).to_string(),
    ]
}
