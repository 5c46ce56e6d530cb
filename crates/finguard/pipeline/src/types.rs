use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

/// The four pipeline stages, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fraud,
    Risk,
    Compliance,
    MemoryConsolidation,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Fraud,
        StageKind::Risk,
        StageKind::Compliance,
        StageKind::MemoryConsolidation,
    ];

    /// Agent identity and report key for the stage.
    pub fn name(self) -> &'static str {
        match self {
            Self::Fraud => "fraud_agent",
            Self::Risk => "risk_agent",
            Self::Compliance => "compliance_agent",
            Self::MemoryConsolidation => "memory_agent",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            _ => Err(PipelineError::InvalidMediaType(s.to_string())),
        }
    }
}

/// ASK pauses for confirmation before escalations and the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    Ask,
    Command,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ASK",
            Self::Command => "COMMAND",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASK" => Ok(Self::Ask),
            "COMMAND" => Ok(Self::Command),
            _ => Err(PipelineError::InvalidMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// `SESSION_<utc timestamp>_<random suffix>`.
    pub fn generate() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "SESSION_{}_{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded input for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub input: String,
    pub media_type: MediaType,
    pub mode: ExecutionMode,
    #[serde(default)]
    pub metadata: Value,
}

impl SessionRequest {
    pub fn new(input: impl Into<String>, media_type: MediaType, mode: ExecutionMode) -> Self {
        Self {
            input: input.into(),
            media_type,
            mode,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
