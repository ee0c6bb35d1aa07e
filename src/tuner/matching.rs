//! Channel-row matching against DOM-accessible labels (spec.md §4.1 Step B).
//! Pure and browser-free so the ordered match policy and its stoplist
//! boundary cases can be unit tested directly.

use crate::channel::Channel;

/// Network-name prefixes short enough to collide with a bare channel number
/// (e.g. "SHOWTIME 2" must not match channel "2").
const FIRST_WORD_STOPLIST: &[&str] = &["the", "fox", "nbc", "cbs", "abc", "cnn"];

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn tokenize(label: &str) -> Vec<String> {
    normalize(label).split_whitespace().map(str::to_string).collect()
}

/// Returns the index of the first label in `labels` that matches `channel`
/// under spec.md's ordered policy, or `None` if nothing matches.
pub fn find_matching_label(labels: &[String], channel: &Channel) -> Option<usize> {
    // 1. any literal search term (case-insensitive substring)
    if !channel.search_terms.is_empty() {
        let terms: Vec<String> = channel.search_terms.iter().map(|t| normalize(t)).collect();
        for (i, label) in labels.iter().enumerate() {
            let normalized = normalize(label);
            if terms.iter().any(|t| !t.is_empty() && normalized.contains(t.as_str())) {
                return Some(i);
            }
        }
    }

    let number = channel.number.trim();
    if !number.is_empty() {
        // 2. " NN " with a leading zero if the number is <= 2 chars long
        if number.len() <= 2 {
            let padded = format!("{number:0>2}");
            let needle = format!(" {padded} ");
            if let Some(i) = labels.iter().position(|l| format!(" {} ", normalize(l)).contains(&needle)) {
                return Some(i);
            }
        }
        // 3. " N " as-is, only for 3+ digit channel numbers
        if number.len() >= 3 {
            let needle = format!(" {number} ");
            if let Some(i) = labels.iter().position(|l| format!(" {} ", normalize(l)).contains(&needle)) {
                return Some(i);
            }
        }
    }

    // 4. full channel name
    let name = normalize(&channel.name);
    if !name.is_empty() {
        if let Some(i) = labels.iter().position(|l| normalize(l).contains(&name)) {
            return Some(i);
        }
    }

    // 5. first word of the name, guarded by length and the stoplist
    if let Some(first_word) = tokenize(&channel.name).into_iter().next() {
        if first_word.len() > 3 && !FIRST_WORD_STOPLIST.contains(&first_word.as_str()) {
            if let Some(i) = labels.iter().position(|l| tokenize(l).contains(&first_word)) {
                return Some(i);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, number: &str, search_terms: &[&str]) -> Channel {
        Channel {
            id: name.to_lowercase(),
            name: name.to_string(),
            number: number.to_string(),
            category: String::new(),
            search_terms: search_terms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn short_number_does_not_match_longer_suffix() {
        let ch = channel("Generic 2", "2", &[]);
        let labels = vec!["SHOWTIME 2".to_string()];
        // "SHOWTIME 2" is a full-name/number collision the policy must avoid:
        // number match requires " 02 " framed by spaces, which "SHOWTIME 2" (no
        // trailing space/second digit) does not satisfy as a prefix-safe match,
        // and the name "Generic 2" isn't contained in "SHOWTIME 2".
        assert_eq!(find_matching_label(&labels, &ch), None);
    }

    #[test]
    fn padded_number_matches_framed_label() {
        let ch = channel("Local", "5", &[]);
        let labels = vec!["some show 05 tonight".to_string()];
        assert_eq!(find_matching_label(&labels, &ch), Some(0));
    }

    #[test]
    fn padded_number_does_not_match_three_digit_suffix() {
        let ch = channel("Local", "5", &[]);
        let labels = vec!["channel 502 guide".to_string()];
        assert_eq!(find_matching_label(&labels, &ch), None);
    }

    #[test]
    fn search_terms_take_priority_over_number() {
        let ch = channel("Affiliate 4", "4", &["KRON"]);
        let labels = vec!["channel 4 guide".to_string(), "KRON local news".to_string()];
        assert_eq!(find_matching_label(&labels, &ch), Some(1));
    }

    #[test]
    fn first_word_stoplist_prevents_short_prefix_collision() {
        let ch = channel("FOX Sports", "23", &[]);
        let labels = vec!["fox news at nine".to_string()];
        // "fox" is in the stoplist and too short anyway; neither the number nor
        // full name appear, so no match.
        assert_eq!(find_matching_label(&labels, &ch), None);
    }

    #[test]
    fn first_word_matches_when_long_enough_and_not_stoplisted() {
        let ch = channel("Discovery Channel", "", &[]);
        let labels = vec!["discovery nature special".to_string()];
        assert_eq!(find_matching_label(&labels, &ch), Some(0));
    }
}
