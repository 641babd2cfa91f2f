//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for parley
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Event bus configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Floor arbitration configuration
    #[serde(default)]
    pub floor: FloorConfig,
    /// Conversational memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Participation balance heuristics
    #[serde(default)]
    pub balance: BalanceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Days to keep rolled log files
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u64,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_retention_days() -> u64 {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            overrides: HashMap::new(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Hard cap on the retained message log
    pub max_messages: usize,
    /// Fraction of `max_messages` at which the log is pruned, in (0, 1]
    pub prune_threshold: f64,
    /// Upper bound on what `recent_messages` hands out
    pub context_window: usize,
}

impl BusConfig {
    /// Log length that triggers pruning; the log is trimmed back to this size
    pub fn prune_trigger(&self) -> usize {
        let trigger = (self.max_messages as f64 * self.prune_threshold).floor() as usize;
        trigger.clamp(1, self.max_messages.max(1))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_messages: 500,
            prune_threshold: 0.9,
            context_window: 50,
        }
    }
}

/// Floor arbitration configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    /// Minimum time after a release before the same speaker may request again
    pub cooldown_ms: u64,
    /// Maximum time a speaker may hold the floor before it is taken back
    pub floor_timeout_ms: u64,
    /// Pause after a release before the next queued request is granted
    pub regrant_delay_ms: u64,
    /// Maximum number of pending requests
    pub max_queue: usize,
    /// Number of past speakers remembered for cooldown checks
    pub history_cap: usize,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 2_000,
            floor_timeout_ms: 30_000,
            regrant_delay_ms: 100,
            max_queue: 10,
            history_cap: 50,
        }
    }
}

/// Hard caps on memory categories, enforced after every mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionLimits {
    pub max_summaries: usize,
    pub max_decisions: usize,
    pub max_proposals: usize,
    pub max_insights: usize,
    /// Cap for each per-speaker list (key points, positions, agreements, disagreements)
    pub max_speaker_items: usize,
    /// Raw messages kept by the ingestor for summarization slices
    pub max_message_history: usize,
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            max_summaries: 10,
            max_decisions: 20,
            max_proposals: 15,
            max_insights: 20,
            max_speaker_items: 10,
            max_message_history: 100,
        }
    }
}

/// Conversational memory configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub limits: RetentionLimits,
    /// Messages per summarization slice
    pub summary_interval: usize,
    /// Sentence budget passed to the summarizer
    pub summary_sentence_budget: usize,
    /// Messages sampled by the deterministic fallback summary
    pub fallback_summary_messages: usize,
    /// Decisions rendered by `memory_context`
    pub context_decisions: usize,
    /// Proposals rendered by `memory_context`
    pub context_proposals: usize,
    /// Per-speaker items rendered by `memory_context`
    pub context_speaker_items: usize,
    /// Decisions rendered by `eval_context`
    pub eval_decisions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            limits: RetentionLimits::default(),
            summary_interval: 12,
            summary_sentence_budget: 3,
            fallback_summary_messages: 3,
            context_decisions: 5,
            context_proposals: 5,
            context_speaker_items: 3,
            eval_decisions: 3,
        }
    }
}

/// Thresholds for the participation balance heuristics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// No speaker may exceed this multiple of the least active speaker
    pub max_ratio: f64,
    /// Trailing messages inspected for ping-pong loops
    pub loop_window: usize,
    /// Messages required before balance is judged at all
    pub min_messages: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            max_ratio: 3.0,
            loop_window: 6,
            min_messages: 4,
        }
    }
}
