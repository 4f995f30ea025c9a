use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A chat session. `session_id` links it to an external client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub session_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A chat with its derived message count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input row for `insert_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewMessage {
    #[schemars(description = "Author of the message: 'user', 'assistant', 'system' or 'tool'")]
    pub role: String,
    #[schemars(description = "Message text")]
    pub content: String,
}

/// A message returned by semantic chat search.
#[derive(Debug, Clone, Serialize)]
pub struct MessageHit {
    #[serde(flatten)]
    pub message: Message,
    /// Cosine distance to the query, smaller is closer.
    pub distance: f64,
}
