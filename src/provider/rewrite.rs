//! HLS playlist rewriting: resolve each segment reference to an absolute
//! upstream URL, then replace it with a `{proxyBase}/segment/{encoded}`
//! reference the downstream player fetches through this gateway instead of
//! directly (spec.md §4.4). Enriched from `other_examples`'
//! `jmylchreest-m3u-proxy` generation stage, which does the analogous
//! M3U8-line-rewrite for live channel proxying.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use url::Url;

/// Resolves a playlist line to an absolute URL against `base`:
/// scheme-relative (`//host/path`) inherits `base`'s scheme; path-relative
/// (`/path`) resolves against `base`'s origin; bare (`seg.ts`) resolves
/// against the last `/` in `base`.
pub fn resolve_url(line: &str, base: &str) -> String {
    if line.starts_with("//") {
        let scheme = Url::parse(base).map(|u| u.scheme().to_string()).unwrap_or_else(|_| "https".to_string());
        return format!("{scheme}:{line}");
    }
    if let Ok(base_url) = Url::parse(base) {
        if let Ok(resolved) = base_url.join(line) {
            return resolved.to_string();
        }
    }
    line.to_string()
}

pub fn encode_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

pub fn decode_url(encoded: &str) -> anyhow::Result<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
    Ok(String::from_utf8(bytes)?)
}

/// Rewrites every segment reference in `playlist` to a proxy URL and strips
/// `#EXT-X-ENDLIST` so the playlist presents as live (spec.md §4.4, §8
/// invariant 6: only preserved comments/blanks or `{proxyBase}/segment/...`
/// lines survive).
pub fn rewrite_playlist(playlist: &str, base_url: &str, proxy_base: &str, content_id: &str) -> String {
    let mut out = String::with_capacity(playlist.len());
    for line in playlist.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "#EXT-X-ENDLIST" {
            continue;
        }
        if trimmed.starts_with('#') {
            out.push_str(trimmed);
            out.push('\n');
            continue;
        }
        let absolute = resolve_url(trimmed, base_url);
        let encoded = encode_url(&absolute);
        out.push_str(&format!("{proxy_base}/segment/{encoded}?cid={content_id}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let url = "https://cdn.example.com/path/seg001.ts?token=abc";
        let encoded = encode_url(url);
        assert_eq!(decode_url(&encoded).unwrap(), url);
    }

    #[test]
    fn resolve_handles_scheme_relative() {
        let resolved = resolve_url("//cdn.example.com/seg1.ts", "https://origin.example.com/live/master.m3u8");
        assert_eq!(resolved, "https://cdn.example.com/seg1.ts");
    }

    #[test]
    fn resolve_handles_path_relative() {
        let resolved = resolve_url("/seg1.ts", "https://origin.example.com/live/master.m3u8");
        assert_eq!(resolved, "https://origin.example.com/seg1.ts");
    }

    #[test]
    fn resolve_handles_bare_relative() {
        let resolved = resolve_url("seg1.ts", "https://origin.example.com/live/master.m3u8");
        assert_eq!(resolved, "https://origin.example.com/live/seg1.ts");
    }

    #[test]
    fn rewrite_strips_endlist_and_rewrites_segments() {
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.ts\nseg2.ts\n#EXT-X-ENDLIST\n";
        let rewritten = rewrite_playlist(playlist, "https://origin.example.com/live/master.m3u8", "http://gw", "abc123");
        assert!(!rewritten.contains("ENDLIST"));
        for line in rewritten.lines().filter(|l| !l.starts_with('#')) {
            assert!(line.starts_with("http://gw/segment/"));
            assert!(line.contains("cid=abc123"));
        }
    }

    #[test]
    fn rewrite_only_emits_comments_or_proxy_segment_lines() {
        let playlist = "#EXTM3U\nseg1.ts\n";
        let rewritten = rewrite_playlist(playlist, "https://origin.example.com/live/master.m3u8", "http://gw", "cid");
        for line in rewritten.lines() {
            assert!(line.starts_with('#') || line.starts_with("http://gw/segment/"));
        }
    }
}
