//! Agent view model.
//!
//! Agents register and heartbeat through an external surface; the kernel
//! only reads them when selecting where to dispatch a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }
}

/// A scan agent as the allocator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub status: AgentStatus,
    /// Tools this agent can execute (matched case-insensitively).
    pub supported_tools: Vec<String>,
    /// Capability tags (matched case-sensitively).
    pub tags: Vec<String>,
    /// Pending/running task count; the allocator prefers the lowest.
    pub current_load: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::default(),
            supported_tools: Vec::new(),
            tags: Vec::new(),
            current_load: 0,
            last_seen_at: None,
        }
    }

    pub fn online(agent_id: impl Into<String>, supported_tools: Vec<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Online,
            supported_tools,
            tags: Vec::new(),
            current_load: 0,
            last_seen_at: Some(Utc::now()),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_load(mut self, load: i64) -> Self {
        self.current_load = load;
        self
    }

    pub fn supports_tool(&self, tool: &str) -> bool {
        self.supported_tools.iter().any(|t| t.eq_ignore_ascii_case(tool))
    }
}
