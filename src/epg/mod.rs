//! EPG (Electronic Program Guide) data model, XMLTV emission, and the
//! browser-driven ingestor (spec.md §3, §4.5). New relative to the teacher
//! (an RTSP retransmitter with no guide data concept); enriched from
//! `javipelopi-streamforge`'s `server/epg.rs` EPG output shape and
//! `other_examples`' m3u-proxy `generation.rs` streaming-string XMLTV build.

pub mod ingestor;
pub mod xmltv;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgChannel {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub call_sign: Option<String>,
    #[serde(default)]
    pub ccid: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub original_air_date: Option<DateTime<Utc>>,
}

impl Default for Program {
    fn default() -> Self {
        Program {
            title: String::new(),
            subtitle: None,
            description: None,
            start_time: chrono::DateTime::<Utc>::UNIX_EPOCH,
            end_time: chrono::DateTime::<Utc>::UNIX_EPOCH,
            categories: Vec::new(),
            genres: Vec::new(),
            rating: None,
            season_number: None,
            episode_number: None,
            original_air_date: None,
        }
    }
}

/// The whole captured guide: channels plus their schedules, keyed by
/// `channelId` (spec.md §3 "Channels and programs are grouped").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Guide {
    pub channels: Vec<EpgChannel>,
    pub schedules: HashMap<String, Vec<Program>>,
}

impl Guide {
    pub fn program_count(&self) -> usize {
        self.schedules.values().map(|p| p.len()).sum()
    }
}
