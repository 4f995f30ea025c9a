pub mod chat;
pub mod memory;
pub mod request;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};

use chat::{
    ChatAddMessagesParams, ChatCreateParams, ChatEmbedMessagesParams, ChatIdParams,
    ChatSearchParams,
};
use memory::{
    AddObservationsParams, CreateEntitiesParams, CreateRelationsParams, DeleteIdsParams, NoParams,
    OpenNodesParams, SearchNodesParams,
};
use request::Request;

use crate::service::Services;

/// The Familiar MCP tool handler. Every tool builds a [`Request`] and hands it
/// to [`Services::handle`]; results are returned as JSON text.
#[derive(Clone)]
pub struct FamiliarTools {
    tool_router: ToolRouter<Self>,
    services: Services,
}

impl FamiliarTools {
    async fn call(&self, request: Request) -> Result<String, String> {
        let tool = request.name();
        match self.services.handle(request).await {
            Ok(response) => {
                serde_json::to_string(&response).map_err(|e| format!("serialization_error: {e}"))
            }
            Err(e) => {
                tracing::warn!(tool, kind = e.kind(), error = %e, "tool call failed");
                Err(format!("{}: {e}", e.kind()))
            }
        }
    }
}

#[tool_router]
impl FamiliarTools {
    pub fn new(services: Services) -> Self {
        Self {
            tool_router: Self::tool_router(),
            services,
        }
    }

    #[tool(description = "Create entities in the knowledge graph. Fails without creating anything if any (name, entityType) pair already exists.")]
    async fn memory_create_entities(
        &self,
        Parameters(params): Parameters<CreateEntitiesParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryCreateEntities(params)).await
    }

    #[tool(description = "Create directed relations between entities (e.g. 'knows', 'works_at'). All-or-nothing on duplicate triples.")]
    async fn memory_create_relations(
        &self,
        Parameters(params): Parameters<CreateRelationsParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryCreateRelations(params)).await
    }

    #[tool(description = "Add free-text observations about entities. Returns their IDs; they become searchable once embedded.")]
    async fn memory_add_observations(
        &self,
        Parameters(params): Parameters<AddObservationsParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryAddObservations(params)).await
    }

    #[tool(description = "Delete entities by ID, together with their observations and relations.")]
    async fn memory_delete_entities(
        &self,
        Parameters(params): Parameters<DeleteIdsParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryDeleteEntities(params)).await
    }

    #[tool(description = "Delete observations by ID.")]
    async fn memory_delete_observations(
        &self,
        Parameters(params): Parameters<DeleteIdsParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryDeleteObservations(params)).await
    }

    #[tool(description = "Delete relations by ID.")]
    async fn memory_delete_relations(
        &self,
        Parameters(params): Parameters<DeleteIdsParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryDeleteRelations(params)).await
    }

    #[tool(description = "Read the entire knowledge graph: all entities, observations and relations.")]
    async fn memory_read_graph(
        &self,
        Parameters(_params): Parameters<NoParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryReadGraph).await
    }

    #[tool(description = "List entities with their observation and relation counts.")]
    async fn memory_list_entities(
        &self,
        Parameters(_params): Parameters<NoParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryListEntities).await
    }

    #[tool(description = "Semantic search over observations. Set hybrid=true to also rank by keyword match.")]
    async fn memory_search_nodes(
        &self,
        Parameters(params): Parameters<SearchNodesParams>,
    ) -> Result<String, String> {
        self.call(Request::MemorySearchNodes(params)).await
    }

    #[tool(description = "Open entities by name with their observations and incoming and outgoing relations.")]
    async fn memory_open_nodes(
        &self,
        Parameters(params): Parameters<OpenNodesParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryOpenNodes(params)).await
    }

    #[tool(description = "Re-embed every observation in the background. Returns immediately.")]
    async fn memory_embed_all(
        &self,
        Parameters(_params): Parameters<NoParams>,
    ) -> Result<String, String> {
        self.call(Request::MemoryEmbedAll).await
    }

    #[tool(description = "Create a new chat session")]
    async fn chat_create(
        &self,
        Parameters(params): Parameters<ChatCreateParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatCreate(params)).await
    }

    #[tool(description = "Get a chat and its message count")]
    async fn chat_get(&self, Parameters(params): Parameters<ChatIdParams>) -> Result<String, String> {
        self.call(Request::ChatGet(params)).await
    }

    #[tool(description = "List all chat sessions, most recent first")]
    async fn chat_list(&self, Parameters(_params): Parameters<NoParams>) -> Result<String, String> {
        self.call(Request::ChatList).await
    }

    #[tool(description = "Delete a chat and all of its messages")]
    async fn chat_delete(
        &self,
        Parameters(params): Parameters<ChatIdParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatDelete(params)).await
    }

    #[tool(description = "List the messages of a chat in order")]
    async fn chat_list_messages(
        &self,
        Parameters(params): Parameters<ChatIdParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatListMessages(params)).await
    }

    #[tool(description = "Append messages to a chat's history")]
    async fn chat_add_messages(
        &self,
        Parameters(params): Parameters<ChatAddMessagesParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatAddMessages(params)).await
    }

    #[tool(description = "Semantic search over user and assistant messages across all chats")]
    async fn chat_search(
        &self,
        Parameters(params): Parameters<ChatSearchParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatSearch(params)).await
    }

    #[tool(description = "Queue embedding for a chat's user and assistant messages that have none yet")]
    async fn chat_embed_messages(
        &self,
        Parameters(params): Parameters<ChatEmbedMessagesParams>,
    ) -> Result<String, String> {
        self.call(Request::ChatEmbedMessages(params)).await
    }
}

#[tool_handler]
impl ServerHandler for FamiliarTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Familiar keeps a knowledge graph of entities, relations and observations, \
                 plus chat history. Use memory_create_entities and memory_add_observations \
                 to remember, memory_search_nodes and memory_open_nodes to recall, and \
                 chat_* tools for conversation history."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
