use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(other)]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionMessagesResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub session_id: String,
}

/// Acknowledgement body returned by the clear endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub total_entries: u64,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
    #[serde(default)]
    pub hit_rate: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl CacheStats {
    /// Label/value pairs in display order.
    pub fn summary_rows(&self) -> Vec<(&'static str, String)> {
        let status = if self.enabled { "Enabled" } else { "Disabled" };
        vec![
            ("Status", status.to_string()),
            ("Total Entries", self.total_entries.to_string()),
            ("Cache Hits", self.cache_hits.to_string()),
            ("Cache Misses", self.cache_misses.to_string()),
            ("Hit Rate", format!("{:.1}%", self.hit_rate)),
            (
                "Threshold",
                format!("{:.0}%", self.similarity_threshold * 100.0),
            ),
        ]
    }
}

/// FastAPI error body.
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        message: String,
    },
    CacheHit {
        value: bool,
    },
    #[serde(rename = "sql", alias = "query")]
    SqlReady {
        #[serde(default)]
        content: Option<String>,
    },
    Chunk {
        content: String,
    },
    Done,
    Error {
        message: String,
    },
}
