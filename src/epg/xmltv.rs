//! XMLTV document emission (spec.md §4.5). Grounded in `other_examples`'
//! m3u-proxy `generation.rs`, which builds XMLTV by string-templating
//! escaped fragments with `quick_xml::escape::escape` rather than a DOM
//! writer; this module follows the same streaming-string-build idiom,
//! extended to the fuller element set (`episode-num`, `rating`, `date`,
//! multiple `display-name`) spec.md §4.5 requires.

use super::{EpgChannel, Guide, Program};
use chrono::{DateTime, Duration, Utc};
use quick_xml::escape::escape;

/// `dtv-{number}` per spec.md §4.5.
pub fn channel_id_key(channel: &EpgChannel) -> String {
    format!("dtv-{}", channel.number)
}

fn format_xmltv_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S +0000").to_string()
}

/// `(season-1).(episode-1).0` per spec.md §4.5, only when both are present.
fn episode_num_xmltv_ns(program: &Program) -> Option<String> {
    let season = program.season_number?;
    let episode = program.episode_number?;
    Some(format!("{}.{}.0", season.saturating_sub(1), episode.saturating_sub(1)))
}

fn write_channel(out: &mut String, channel: &EpgChannel) {
    out.push_str(&format!("  <channel id=\"{}\">\n", escape(&channel_id_key(channel))));
    out.push_str(&format!("    <display-name>{}</display-name>\n", escape(&channel.name)));
    out.push_str(&format!("    <display-name>{}</display-name>\n", escape(&channel.number)));
    if let Some(call_sign) = &channel.call_sign {
        out.push_str(&format!("    <display-name>{}</display-name>\n", escape(call_sign)));
    }
    if let Some(logo) = &channel.logo {
        out.push_str(&format!("    <icon src=\"{}\"/>\n", escape(logo)));
    }
    out.push_str("  </channel>\n");
}

fn write_programme(out: &mut String, channel_id: &str, program: &Program) {
    out.push_str(&format!(
        "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
        format_xmltv_datetime(program.start_time),
        format_xmltv_datetime(program.end_time),
        escape(channel_id),
    ));
    out.push_str(&format!("    <title>{}</title>\n", escape(&program.title)));
    if let Some(subtitle) = &program.subtitle {
        out.push_str(&format!("    <sub-title>{}</sub-title>\n", escape(subtitle)));
    }
    if let Some(description) = &program.description {
        out.push_str(&format!("    <desc>{}</desc>\n", escape(description)));
    }
    for category in &program.categories {
        out.push_str(&format!("    <category>{}</category>\n", escape(category)));
    }
    for genre in &program.genres {
        out.push_str(&format!("    <category>{}</category>\n", escape(genre)));
    }
    if let Some(episode_num) = episode_num_xmltv_ns(program) {
        out.push_str(&format!("    <episode-num system=\"xmltv_ns\">{episode_num}</episode-num>\n"));
    }
    if let Some(air_date) = program.original_air_date {
        out.push_str(&format!("    <date>{}</date>\n", air_date.format("%Y%m%d")));
    }
    if let Some(rating) = &program.rating {
        out.push_str(&format!(
            "    <rating system=\"VCHIP\">\n      <value>{}</value>\n    </rating>\n",
            escape(rating)
        ));
    }
    out.push_str("  </programme>\n");
}

/// Emits the full XMLTV document for `guide`, restricted to programs
/// starting within `window` of `now` (spec.md §4.5, default 24h).
pub fn emit_xmltv(guide: &Guide, now: DateTime<Utc>, window: Duration) -> String {
    let window_end = now + window;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n");
    out.push_str("<tv generator-info-name=\"iptv-gateway\">\n");

    for channel in &guide.channels {
        write_channel(&mut out, channel);
    }

    for channel in &guide.channels {
        let channel_id = channel_id_key(channel);
        let Some(programs) = guide.schedules.get(&channel.id) else { continue };
        for program in programs {
            if program.start_time >= now && program.start_time < window_end {
                write_programme(&mut out, &channel_id, program);
            }
        }
    }

    out.push_str("</tv>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn channel(id: &str, name: &str, number: &str) -> EpgChannel {
        EpgChannel { id: id.to_string(), name: name.to_string(), number: number.to_string(), call_sign: None, ccid: None, logo: None, format: None }
    }

    fn program(title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Program {
        Program { title: title.to_string(), start_time: start, end_time: end, ..Default::default() }
    }

    #[test]
    fn emits_channel_id_as_dtv_prefixed_number() {
        let guide = Guide { channels: vec![channel("espn", "ESPN", "24")], schedules: HashMap::new() };
        let xml = emit_xmltv(&guide, Utc::now(), Duration::hours(24));
        assert!(xml.contains("<channel id=\"dtv-24\">"));
    }

    #[test]
    fn filters_programs_outside_window() {
        let now = Utc::now();
        let mut schedules = HashMap::new();
        schedules.insert(
            "espn".to_string(),
            vec![
                program("Past Show", now - Duration::hours(2), now - Duration::hours(1)),
                program("In Window", now + Duration::hours(1), now + Duration::hours(2)),
                program("Future Outside Window", now + Duration::hours(48), now + Duration::hours(49)),
            ],
        );
        let guide = Guide { channels: vec![channel("espn", "ESPN", "24")], schedules };
        let xml = emit_xmltv(&guide, now, Duration::hours(24));
        assert!(!xml.contains("Past Show"));
        assert!(xml.contains("In Window"));
        assert!(!xml.contains("Future Outside Window"));
    }

    #[test]
    fn episode_num_uses_xmltv_ns_zero_indexed() {
        let now = Utc::now();
        let mut p = program("Show", now + Duration::hours(1), now + Duration::hours(2));
        p.season_number = Some(2);
        p.episode_number = Some(5);
        let mut schedules = HashMap::new();
        schedules.insert("espn".to_string(), vec![p]);
        let guide = Guide { channels: vec![channel("espn", "ESPN", "24")], schedules };
        let xml = emit_xmltv(&guide, now, Duration::hours(24));
        assert!(xml.contains("<episode-num system=\"xmltv_ns\">1.4.0</episode-num>"));
    }

    #[test]
    fn escapes_special_characters() {
        let now = Utc::now();
        let p = program("Tom & Jerry <Classic>", now + Duration::hours(1), now + Duration::hours(2));
        let mut schedules = HashMap::new();
        schedules.insert("espn".to_string(), vec![p]);
        let guide = Guide { channels: vec![channel("espn", "ESPN & Co", "24")], schedules };
        let xml = emit_xmltv(&guide, now, Duration::hours(24));
        assert!(xml.contains("ESPN &amp; Co"));
        assert!(xml.contains("Tom &amp; Jerry &lt;Classic&gt;"));
        assert!(!xml.contains("ESPN & Co"));
    }

    #[test]
    fn round_trips_channel_and_program_identity() {
        let now = Utc::now();
        let mut schedules = HashMap::new();
        schedules.insert(
            "espn".to_string(),
            vec![program("SportsCenter", now + Duration::hours(1), now + Duration::hours(2))],
        );
        let guide = Guide { channels: vec![channel("espn", "ESPN", "24")], schedules };
        let xml = emit_xmltv(&guide, now, Duration::hours(24));

        let mut reader = quick_xml::Reader::from_str(&xml);
        let mut channel_count = 0;
        let mut programme_count = 0;
        loop {
            use quick_xml::events::Event;
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == b"channel" => channel_count += 1,
                Ok(Event::Start(e)) if e.name().as_ref() == b"programme" => programme_count += 1,
                Ok(Event::Eof) => break,
                Err(_) => break,
                _ => {}
            }
        }
        assert_eq!(channel_count, 1);
        assert_eq!(programme_count, 1);
    }
}
