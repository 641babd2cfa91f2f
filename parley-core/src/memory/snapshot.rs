//! Serializable memory state

use super::types::{AgentMemoryState, MemoryEntry};
use crate::config::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete, plain copy of a [`super::MemoryStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Configuration in force when the snapshot was taken, limits included
    pub config: MemoryConfig,
    #[serde(default)]
    pub summaries: Vec<MemoryEntry>,
    #[serde(default)]
    pub decisions: Vec<MemoryEntry>,
    #[serde(default)]
    pub proposals: Vec<MemoryEntry>,
    #[serde(default)]
    pub insights: Vec<MemoryEntry>,
    #[serde(default)]
    pub speakers: BTreeMap<String, AgentMemoryState>,
    pub total_messages: usize,
    /// Global index up to which messages have been summarized
    pub last_summarized: usize,
}

impl MemorySnapshot {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
