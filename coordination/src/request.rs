//! Request: the unit of work routed through the hierarchy.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional structured context attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Artifacts the request targets (file paths, document ids, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_artifacts: Vec<String>,
    /// Free-text context carried over from earlier work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_context: Option<String>,
    /// Arbitrary caller-defined metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A routing request. Immutable once accepted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-visible identifier, generated when not supplied.
    #[serde(default = "new_request_id")]
    pub id: String,
    /// Opaque task description.
    pub task: String,
    #[serde(default)]
    pub context: RequestContext,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl Request {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: new_request_id(),
            task: task.into(),
            context: RequestContext::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_target(mut self, artifact: impl Into<String>) -> Self {
        self.context.target_artifacts.push(artifact.into());
        self
    }

    /// Short single-line preview for logs.
    pub fn preview(&self, max_chars: usize) -> String {
        let line = self.task.lines().next().unwrap_or_default();
        if line.chars().count() <= max_chars {
            line.to_string()
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}
