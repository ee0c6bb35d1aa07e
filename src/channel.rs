//! Channel model plus M3U parsing and emission.
//!
//! The upstream channel list the gateway tunes against is internal (ids the
//! tuner resolves via DOM navigation, not URLs) and is loaded once from a
//! local JSON file or config, unlike the teacher's RTSP-URL channel list. M3U
//! parsing is kept for compatibility with externally-supplied channel maps;
//! emission is new -- the gateway is itself a playlist source now.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub search_terms: Vec<String>,
}

static RE_EXTINF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#EXTINF:-?\d+(?P<attrs>(?:\s+[\w-]+="[^"]*")*)\s*,(?P<name>.*)"#).unwrap()
});
static RE_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"([\w-]+)="([^"]*)""#).unwrap());

/// Parses an externally-supplied M3U channel map into `Channel`s. Only the
/// attributes this gateway cares about (`tvg-id`, `tvg-chno`, `group-title`)
/// are extracted; unrecognized attributes are ignored.
pub fn parse_m3u(content: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    let mut pending: Option<(String, String, String, String)> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line == "#EXTM3U" {
            continue;
        }

        if let Some(caps) = RE_EXTINF.captures(line) {
            // A new #EXTINF without an intervening URL line still describes a
            // channel (some playlists omit the URL on the last entry); flush
            // whatever was pending before starting the next one.
            if let Some((id, name, number, category)) = pending.take() {
                channels.push(Channel { id, name, number, category, search_terms: Vec::new() });
            }

            let name = caps["name"].trim().to_string();
            let mut id = String::new();
            let mut number = String::new();
            let mut category = String::new();
            for attr in RE_ATTR.captures_iter(&caps["attrs"]) {
                match &attr[1] {
                    "tvg-id" => id = attr[2].to_string(),
                    "tvg-chno" => number = attr[2].to_string(),
                    "group-title" => category = attr[2].to_string(),
                    _ => {}
                }
            }
            if id.is_empty() {
                id = name.to_lowercase().replace(' ', "-");
            }
            pending = Some((id, name, number, category));
        } else if !line.starts_with('#') {
            if let Some((id, name, number, category)) = pending.take() {
                channels.push(Channel {
                    id,
                    name,
                    number,
                    category,
                    search_terms: Vec::new(),
                });
            }
            let _ = line; // the stream URL itself is not retained: this channel list is internal
        }
    }

    if let Some((id, name, number, category)) = pending.take() {
        channels.push(Channel { id, name, number, category, search_terms: Vec::new() });
    }

    Ok(channels)
}

/// Loads a channel list from a JSON file: `{ "channels": [...] }` per the
/// persisted state layout.
pub fn load_channels(path: &str) -> Result<Vec<Channel>> {
    #[derive(Deserialize)]
    struct ChannelFile {
        channels: Vec<Channel>,
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading channel cache {path}"))?;
    let parsed: ChannelFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing channel cache {path}"))?;
    Ok(parsed.channels)
}

fn escape_attr(s: &str) -> String {
    s.replace('"', "'")
}

/// Emits the M3U playlist of all channels, as spec.md §6 defines:
/// `#EXTINF:-1 tvg-id="{id}" tvg-name="{name}" tvg-chno="{number}" group-title="{category}",{name}`
/// followed by the stream URL.
pub fn emit_m3u(channels: &[Channel], host: &str) -> String {
    let mut out = String::from("#EXTM3U\n");
    for ch in channels {
        out.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\" tvg-chno=\"{}\" group-title=\"{}\",{}\n",
            escape_attr(&ch.id),
            escape_attr(&ch.name),
            escape_attr(&ch.number),
            escape_attr(&ch.category),
            ch.name,
        ));
        out.push_str(&format!("http://{host}/stream/{}\n", ch.id));
    }
    out
}

/// Emits the `tve/directv` playlist variant carrying `url-tvg` / `tvg-id`
/// pointing at the XMLTV endpoint, per spec.md §6.
pub fn emit_m3u_with_epg(channels: &[Channel], host: &str, epg_url: &str) -> String {
    let mut out = format!("#EXTM3U url-tvg=\"{epg_url}\"\n");
    for ch in channels {
        out.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"dtv-{}\" tvg-name=\"{}\" tvg-chno=\"{}\" group-title=\"{}\",{}\n",
            escape_attr(&ch.number),
            escape_attr(&ch.name),
            escape_attr(&ch.number),
            escape_attr(&ch.category),
            ch.name,
        ));
        out.push_str(&format!("http://{host}/stream/{}\n", ch.id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_m3u_extracts_attributes() {
        let data = r#"#EXTM3U
#EXTINF:-1 tvg-id="espn" tvg-chno="24" group-title="Sports",ESPN HD
http://example/stream/espn
#EXTINF:-1 tvg-id="cnn" tvg-chno="46" group-title="News",CNN"#;

        let channels = parse_m3u(data).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "espn");
        assert_eq!(channels[0].number, "24");
        assert_eq!(channels[0].category, "Sports");
        assert_eq!(channels[1].name, "CNN");
    }

    #[test]
    fn emit_m3u_round_trips_channel_list() {
        let channels = vec![Channel {
            id: "espn".to_string(),
            name: "ESPN HD".to_string(),
            number: "24".to_string(),
            category: "Sports".to_string(),
            search_terms: vec![],
        }];
        let playlist = emit_m3u(&channels, "localhost:8080");
        let parsed = parse_m3u(&playlist).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "espn");
        assert_eq!(parsed[0].number, "24");
        assert_eq!(parsed[0].category, "Sports");
    }

    #[test]
    fn emit_m3u_contains_stream_url() {
        let channels = vec![Channel {
            id: "fox".to_string(),
            name: "FOX".to_string(),
            number: "5".to_string(),
            category: String::new(),
            search_terms: vec![],
        }];
        let playlist = emit_m3u(&channels, "host:1234");
        assert!(playlist.contains("http://host:1234/stream/fox"));
    }
}
