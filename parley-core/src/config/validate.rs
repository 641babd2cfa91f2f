//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    let bus = &config.bus;
    if bus.max_messages == 0 {
        errors.push("bus.max_messages must be > 0".to_string());
    }
    if !(bus.prune_threshold > 0.0 && bus.prune_threshold <= 1.0) {
        errors.push("bus.prune_threshold must be in (0.0, 1.0]".to_string());
    }
    if bus.context_window == 0 {
        errors.push("bus.context_window must be > 0".to_string());
    }

    let floor = &config.floor;
    if floor.floor_timeout_ms == 0 {
        errors.push("floor.floor_timeout_ms must be > 0".to_string());
    }
    if floor.max_queue == 0 {
        errors.push("floor.max_queue must be > 0".to_string());
    }
    if floor.history_cap == 0 {
        errors.push("floor.history_cap must be > 0".to_string());
    }

    let memory = &config.memory;
    let caps = [
        ("memory.limits.max_summaries", memory.limits.max_summaries),
        ("memory.limits.max_decisions", memory.limits.max_decisions),
        ("memory.limits.max_proposals", memory.limits.max_proposals),
        ("memory.limits.max_insights", memory.limits.max_insights),
        ("memory.limits.max_speaker_items", memory.limits.max_speaker_items),
        (
            "memory.limits.max_message_history",
            memory.limits.max_message_history,
        ),
        ("memory.summary_interval", memory.summary_interval),
        ("memory.summary_sentence_budget", memory.summary_sentence_budget),
    ];
    for (name, value) in caps {
        if value == 0 {
            errors.push(format!("{} must be > 0", name));
        }
    }
    if memory.limits.max_message_history < memory.summary_interval {
        errors.push(
            "memory.limits.max_message_history must be >= memory.summary_interval".to_string(),
        );
    }

    if config.balance.max_ratio < 1.0 {
        errors.push("balance.max_ratio must be >= 1.0".to_string());
    }
    if config.balance.loop_window < 2 {
        errors.push("balance.loop_window must be >= 2".to_string());
    }

    if !matches!(config.logging.format.to_lowercase().as_str(), "text" | "json") {
        errors.push("logging.format must be one of: text, json".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
