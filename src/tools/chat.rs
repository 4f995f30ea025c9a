//! Parameter definitions for the `chat_*` MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::chat::types::NewMessage;

/// Parameters for the `chat_create` MCP tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatCreateParams {
    #[schemars(description = "Optional external session identifier")]
    pub session_id: Option<String>,
}

/// Parameters for tools addressing one chat by id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatIdParams {
    #[schemars(description = "Chat ID")]
    pub id: String,
}

/// Parameters for the `chat_add_messages` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatAddMessagesParams {
    #[schemars(description = "Chat to append to")]
    pub chat_id: String,
    #[schemars(description = "Messages in conversation order")]
    pub messages: Vec<NewMessage>,
}

/// Parameters for the `chat_search` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatSearchParams {
    #[schemars(description = "Natural language query")]
    pub query: String,
    #[schemars(description = "Maximum number of messages to return (default: 10)")]
    pub limit: Option<usize>,
}

/// Parameters for the `chat_embed_messages` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatEmbedMessagesParams {
    #[schemars(description = "Chat whose user and assistant messages should be embedded")]
    pub chat_id: String,
}
