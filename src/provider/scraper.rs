//! Two-layer base64 decoder for providers that expose a direct
//! JSON-returning scraper endpoint (spec.md §4.3). Re-architected per
//! spec.md §9: rather than decoding into loosely-typed JSON and hoping the
//! shape matches, this decodes into a concrete, versioned struct and rejects
//! anything that doesn't parse as one.

use crate::provider::ExtractedStream;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct ScraperPayload {
    url: String,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

/// Decodes `encoded` as base64(base64(json)), producing a normalized
/// `ExtractedStream` with `Referer`/`Origin` promoted to headers. Returns an
/// error on any layer that fails to decode or parse, rather than panicking
/// or silently returning an empty stream -- callers fall through to the
/// browser-based extraction path on failure (spec.md §4.3).
pub fn decode_scraper_response(encoded: &str) -> anyhow::Result<ExtractedStream> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let outer = STANDARD.decode(encoded.trim())?;
    let outer = String::from_utf8(outer)?;
    let inner = STANDARD.decode(outer.trim())?;
    let payload: ScraperPayload = serde_json::from_slice(&inner)?;

    let mut headers = HashMap::new();
    if let Some(referer) = payload.referer {
        headers.insert("Referer".to_string(), referer);
    }
    if let Some(origin) = payload.origin {
        headers.insert("Origin".to_string(), origin);
    }

    Ok(ExtractedStream {
        url: payload.url,
        headers,
        quality: payload.quality,
        alternates: Vec::new(),
        subtitles: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn double_encode(json: &str) -> String {
        STANDARD.encode(STANDARD.encode(json.as_bytes()))
    }

    #[test]
    fn decodes_two_layer_base64_json() {
        let json = r#"{"url":"https://cdn.example.com/stream.m3u8","referer":"https://site.example.com/","origin":"https://site.example.com","quality":"1080p"}"#;
        let encoded = double_encode(json);
        let result = decode_scraper_response(&encoded).unwrap();
        assert_eq!(result.url, "https://cdn.example.com/stream.m3u8");
        assert_eq!(result.headers.get("Referer").unwrap(), "https://site.example.com/");
        assert_eq!(result.headers.get("Origin").unwrap(), "https://site.example.com");
        assert_eq!(result.quality.as_deref(), Some("1080p"));
    }

    #[test]
    fn rejects_unknown_shape() {
        let json = r#"{"foo":"bar"}"#;
        let encoded = double_encode(json);
        assert!(decode_scraper_response(&encoded).is_err());
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(decode_scraper_response("not-valid-base64!!!").is_err());
    }
}
