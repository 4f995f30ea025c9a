//! The closed set of boundary operations and their results.
//!
//! Every tool call becomes one [`Request`] variant, is checked once by
//! [`Request::validate`], and is answered by one [`Response`] variant.

use serde::{Deserialize, Serialize};

use super::chat::{
    ChatAddMessagesParams, ChatCreateParams, ChatEmbedMessagesParams, ChatIdParams,
    ChatSearchParams,
};
use super::memory::{
    AddObservationsParams, CreateEntitiesParams, CreateRelationsParams, DeleteIdsParams,
    OpenNodesParams, SearchNodesParams,
};
use crate::chat::types::{Chat, ChatSummary, Message, MessageHit};
use crate::error::{Error, Result};
use crate::memory::search::{HybridHit, ObservationHit};
use crate::memory::types::{Entity, EntityNode, EntitySummary, Graph, Relation};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum Request {
    MemoryCreateEntities(CreateEntitiesParams),
    MemoryCreateRelations(CreateRelationsParams),
    MemoryAddObservations(AddObservationsParams),
    MemoryDeleteEntities(DeleteIdsParams),
    MemoryDeleteObservations(DeleteIdsParams),
    MemoryDeleteRelations(DeleteIdsParams),
    MemoryReadGraph,
    MemoryListEntities,
    MemorySearchNodes(SearchNodesParams),
    MemoryOpenNodes(OpenNodesParams),
    MemoryEmbedAll,
    ChatCreate(ChatCreateParams),
    ChatGet(ChatIdParams),
    ChatList,
    ChatDelete(ChatIdParams),
    ChatListMessages(ChatIdParams),
    ChatAddMessages(ChatAddMessagesParams),
    ChatSearch(ChatSearchParams),
    ChatEmbedMessages(ChatEmbedMessagesParams),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Entities(Vec<Entity>),
    Relations(Vec<Relation>),
    ObservationIds { ids: Vec<i64> },
    Deleted { deleted: usize },
    Graph(Graph),
    EntityList(Vec<EntitySummary>),
    Observations(Vec<ObservationHit>),
    Ranked(Vec<HybridHit>),
    Nodes(Vec<EntityNode>),
    Accepted {
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        queued: Option<usize>,
    },
    Chat(Chat),
    ChatSummary(ChatSummary),
    Chats(Vec<ChatSummary>),
    Messages(Vec<Message>),
    MessageHits(Vec<MessageHit>),
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn positive(field: &str, value: Option<usize>) -> Result<()> {
    if value == Some(0) {
        return Err(Error::Validation(format!("{field} must be at least 1")));
    }
    Ok(())
}

impl Request {
    /// Tool name of this request.
    pub fn name(&self) -> &'static str {
        match self {
            Request::MemoryCreateEntities(_) => "memory_create_entities",
            Request::MemoryCreateRelations(_) => "memory_create_relations",
            Request::MemoryAddObservations(_) => "memory_add_observations",
            Request::MemoryDeleteEntities(_) => "memory_delete_entities",
            Request::MemoryDeleteObservations(_) => "memory_delete_observations",
            Request::MemoryDeleteRelations(_) => "memory_delete_relations",
            Request::MemoryReadGraph => "memory_read_graph",
            Request::MemoryListEntities => "memory_list_entities",
            Request::MemorySearchNodes(_) => "memory_search_nodes",
            Request::MemoryOpenNodes(_) => "memory_open_nodes",
            Request::MemoryEmbedAll => "memory_embed_all",
            Request::ChatCreate(_) => "chat_create",
            Request::ChatGet(_) => "chat_get",
            Request::ChatList => "chat_list",
            Request::ChatDelete(_) => "chat_delete",
            Request::ChatListMessages(_) => "chat_list_messages",
            Request::ChatAddMessages(_) => "chat_add_messages",
            Request::ChatSearch(_) => "chat_search",
            Request::ChatEmbedMessages(_) => "chat_embed_messages",
        }
    }

    /// Reject malformed arguments before anything touches the store.
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::MemoryCreateEntities(p) => {
                for entity in &p.entities {
                    require("name", &entity.name)?;
                    require("entityType", &entity.entity_type)?;
                }
            }
            Request::MemoryCreateRelations(p) => {
                for relation in &p.relations {
                    require("relationType", &relation.relation_type)?;
                }
            }
            Request::MemoryAddObservations(p) => {
                for observation in &p.observations {
                    require("content", &observation.content)?;
                }
            }
            Request::MemorySearchNodes(p) => {
                require("query", &p.query)?;
                positive("k", p.k)?;
                positive("probe", p.probe)?;
            }
            Request::ChatGet(p) | Request::ChatDelete(p) | Request::ChatListMessages(p) => {
                require("id", &p.id)?;
            }
            Request::ChatCreate(p) => {
                if let Some(session_id) = &p.session_id {
                    require("sessionId", session_id)?;
                }
            }
            Request::ChatAddMessages(p) => {
                require("chatId", &p.chat_id)?;
                for message in &p.messages {
                    require("role", &message.role)?;
                }
            }
            Request::ChatSearch(p) => {
                require("query", &p.query)?;
                positive("limit", p.limit)?;
            }
            Request::ChatEmbedMessages(p) => require("chatId", &p.chat_id)?,
            Request::MemoryDeleteEntities(_)
            | Request::MemoryDeleteObservations(_)
            | Request::MemoryDeleteRelations(_)
            | Request::MemoryReadGraph
            | Request::MemoryListEntities
            | Request::MemoryOpenNodes(_)
            | Request::MemoryEmbedAll
            | Request::ChatList => {}
        }
        Ok(())
    }
}
