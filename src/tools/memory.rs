//! Parameter definitions for the `memory_*` MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::memory::types::{NewEntity, NewObservation, NewRelation};

/// Parameters for tools that take no arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

/// Parameters for the `memory_create_entities` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateEntitiesParams {
    #[schemars(description = "Entities to create. Each (name, entityType) pair must be new.")]
    pub entities: Vec<NewEntity>,
}

/// Parameters for the `memory_create_relations` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateRelationsParams {
    #[schemars(description = "Relations to create between existing entities")]
    pub relations: Vec<NewRelation>,
}

/// Parameters for the `memory_add_observations` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddObservationsParams {
    #[schemars(description = "Observations to add")]
    pub observations: Vec<NewObservation>,
}

/// Parameters for the three `memory_delete_*` MCP tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteIdsParams {
    #[schemars(description = "IDs to delete. Unknown IDs are ignored.")]
    pub ids: Vec<i64>,
}

/// Parameters for the `memory_search_nodes` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchNodesParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Maximum number of nearest observations to consider (default: 10)")]
    pub k: Option<usize>,

    /// Widens the ANN candidate pool; higher trades latency for recall.
    #[schemars(description = "ANN search quality; higher is slower but more thorough (default: 5)")]
    pub probe: Option<usize>,

    #[schemars(description = "Also rank by keyword match on the query text (default: false)")]
    pub hybrid: Option<bool>,
}

/// Parameters for the `memory_open_nodes` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenNodesParams {
    #[schemars(description = "Entity names to open. Unknown names are omitted from the result.")]
    pub entity_names: Vec<String>,
}
