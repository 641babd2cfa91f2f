//! Participation balance heuristics
//!
//! Cheap checks an orchestrator can run between turns: is one speaker
//! drowning out the others, and are two speakers just trading replies.

use crate::bus::Message;
use crate::config::BalanceConfig;
use std::collections::{BTreeMap, HashSet};

/// Non-system message count per speaker
pub fn speaker_counts(messages: &[Message]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for message in messages.iter().filter(|m| !m.is_system()) {
        *counts.entry(message.speaker_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// No speaker exceeds `max_ratio` times the least active one.
///
/// Too little data (fewer than `min_messages` in total) counts as balanced.
pub fn is_balanced(config: &BalanceConfig, counts: &BTreeMap<String, usize>) -> bool {
    let total: usize = counts.values().sum();
    if total < config.min_messages {
        return true;
    }
    let (Some(min), Some(max)) = (counts.values().min(), counts.values().max()) else {
        return true;
    };
    (*max as f64) <= config.max_ratio * (*min as f64)
}

/// The most active speaker, if the conversation is out of balance
pub fn dominant_speaker(config: &BalanceConfig, counts: &BTreeMap<String, usize>) -> Option<String> {
    if is_balanced(config, counts) {
        return None;
    }
    let max = counts.values().max()?;
    counts
        .iter()
        .find(|(_, count)| *count == max)
        .map(|(speaker, _)| speaker.clone())
}

/// The last `loop_window` non-system messages ping-pong between two speakers
pub fn loop_detected(config: &BalanceConfig, messages: &[Message]) -> bool {
    let recent: Vec<&str> = messages
        .iter()
        .rev()
        .filter(|m| !m.is_system())
        .take(config.loop_window)
        .map(|m| m.speaker_id.as_str())
        .collect();
    if config.loop_window < 2 || recent.len() < config.loop_window {
        return false;
    }

    let speakers: HashSet<&str> = recent.iter().copied().collect();
    speakers.len() == 2 && recent.windows(2).all(|pair| pair[0] != pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageKind;

    fn transcript(speakers: &[&str]) -> Vec<Message> {
        speakers
            .iter()
            .map(|s| Message::new(*s, MessageKind::Statement, "..."))
            .collect()
    }

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(s, n)| (s.to_string(), *n)).collect()
    }

    #[test]
    fn test_speaker_counts_skip_system() {
        let mut messages = transcript(&["a", "b", "a"]);
        messages.push(Message::system("tick"));
        assert_eq!(speaker_counts(&messages), counts(&[("a", 2), ("b", 1)]));
    }

    #[test]
    fn test_balance_ratio() {
        let config = BalanceConfig::default();
        assert!(is_balanced(&config, &counts(&[("a", 6), ("b", 2)])));
        assert!(!is_balanced(&config, &counts(&[("a", 7), ("b", 2)])));
        // Not enough data yet
        assert!(is_balanced(&config, &counts(&[("a", 3), ("b", 0)])));
        assert!(is_balanced(&config, &BTreeMap::new()));
    }

    #[test]
    fn test_balance_threshold_is_configurable() {
        let strict = BalanceConfig {
            max_ratio: 1.5,
            ..BalanceConfig::default()
        };
        assert!(!is_balanced(&strict, &counts(&[("a", 4), ("b", 2)])));
    }

    #[test]
    fn test_dominant_speaker() {
        let config = BalanceConfig::default();
        assert_eq!(
            dominant_speaker(&config, &counts(&[("a", 1), ("b", 9), ("c", 2)])),
            Some("b".to_string())
        );
        assert_eq!(dominant_speaker(&config, &counts(&[("a", 3), ("b", 3)])), None);
    }

    #[test]
    fn test_loop_detection() {
        let config = BalanceConfig::default();
        assert!(loop_detected(
            &config,
            &transcript(&["c", "a", "b", "a", "b", "a", "b"])
        ));
        assert!(!loop_detected(&config, &transcript(&["a", "b", "a", "b", "a"])));
        assert!(!loop_detected(
            &config,
            &transcript(&["a", "b", "a", "a", "b", "a"])
        ));
        assert!(!loop_detected(
            &config,
            &transcript(&["a", "b", "c", "a", "b", "c"])
        ));
    }

    #[test]
    fn test_loop_detection_ignores_system_messages() {
        let config = BalanceConfig {
            loop_window: 4,
            ..BalanceConfig::default()
        };
        let mut messages = transcript(&["a", "b"]);
        messages.push(Message::system("note"));
        messages.extend(transcript(&["a", "b"]));
        assert!(loop_detected(&config, &messages));
    }
}
