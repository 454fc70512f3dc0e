//! Collaborator contracts for the agent being escalated.
//!
//! The pipeline never probes an agent for optional behaviour. Capabilities
//! are explicit trait methods with conservative defaults:
//!
//! | Capability          | Method              | Default          |
//! |---------------------|---------------------|------------------|
//! | chat                | [`Agent::chat`]     | required         |
//! | tool swapping       | [`Agent::tool_provider`] | `None`      |
//! | stronger model      | [`Agent::escalate_model`] | `false`    |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Substrings marking a tool as write-capable.
const WRITE_TOOL_PATTERNS: &[&str] = &[
    "write", "edit", "patch", "delete", "remove", "create", "move", "rename",
];

// ── Tools ────────────────────────────────────────────────────────────────────

/// A tool the agent can call. Only the name matters to the pipeline.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the tool can modify the workspace.
    fn is_write(&self) -> bool {
        let name = self.name().to_lowercase();
        WRITE_TOOL_PATTERNS.iter().any(|p| name.contains(p))
    }
}

impl fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tool").field(&self.name()).finish()
    }
}

/// Shared handle to a tool.
pub type ToolRef = Arc<dyn Tool>;

/// A tool identified by name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTool(pub String);

impl NamedTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Convenience: a list of shared named tools.
    pub fn many(names: &[&str]) -> Vec<ToolRef> {
        names
            .iter()
            .map(|n| Arc::new(Self::new(*n)) as ToolRef)
            .collect()
    }
}

impl Tool for NamedTool {
    fn name(&self) -> &str {
        &self.0
    }
}

/// Agents whose active tool set can be swapped.
pub trait ToolProvider: Send {
    fn tools(&self) -> Vec<ToolRef>;
    fn set_tools(&mut self, tools: Vec<ToolRef>);
}

// ── Replies and errors ───────────────────────────────────────────────────────

/// One agent reply.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    /// Tool calls made while producing the reply, when the agent reports them.
    pub tool_calls: Option<u32>,
    /// Tokens consumed, when the agent reports them.
    pub tokens_used: Option<u64>,
    pub files_modified: Vec<String>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, n: u32) -> Self {
        self.tool_calls = Some(n);
        self
    }

    pub fn with_tokens(mut self, n: u64) -> Self {
        self.tokens_used = Some(n);
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files_modified = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Errors an agent can report from `chat`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Network / backend hiccup. Safe to retry.
    #[error("Transient agent failure: {0}")]
    Transient(String),

    /// Provider rate limit. Retry after backoff.
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// The agent could not complete the request.
    #[error("Agent failed: {0}")]
    Failed(String),

    #[error("Agent call cancelled")]
    Cancelled,
}

impl AgentError {
    /// Returns `true` if the pipeline may retry the same call.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimit(_))
    }
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// The agent being driven through escalation stages.
#[async_trait]
pub trait Agent: Send {
    /// Name for logging.
    fn name(&self) -> &str {
        "agent"
    }

    /// Send one prompt and wait for the reply.
    async fn chat(&mut self, prompt: &str) -> Result<AgentReply, AgentError>;

    /// Tool-swapping capability, if the agent has one.
    fn tool_provider(&mut self) -> Option<&mut dyn ToolProvider> {
        None
    }

    /// Switch to a stronger model. Returns whether a switch happened.
    fn escalate_model(&mut self) -> bool {
        false
    }
}
