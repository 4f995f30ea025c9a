//! Knowledge graph record types.
//!
//! [`Entity`] nodes, [`Relation`] edges, and free-text [`Observation`]s, plus the
//! aggregate views returned by listing, graph reads, and node opening. Field
//! names serialize in camelCase to match the tool boundary.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named, typed node. `(name, entity_type)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input row for entity creation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    #[schemars(description = "The name of the entity")]
    pub name: String,
    #[schemars(description = "The type of the entity (e.g. 'person', 'project')")]
    pub entity_type: String,
}

/// A typed directed edge. `(from_entity_id, to_entity_id, relation_type)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: i64,
    pub from_entity_id: i64,
    pub to_entity_id: i64,
    pub relation_type: String,
    pub created_at: String,
}

/// Input row for relation creation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRelation {
    #[schemars(description = "ID of the entity the relation is from")]
    pub from_entity_id: i64,
    #[schemars(description = "ID of the entity the relation is to")]
    pub to_entity_id: i64,
    #[schemars(description = "Verb that describes the relation (e.g. 'knows', 'works_at')")]
    pub relation_type: String,
}

/// A free-text fact. Observations without an entity are never embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: i64,
    pub entity_id: Option<i64>,
    pub content: String,
    pub created_at: String,
}

/// Input row for observation creation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewObservation {
    #[schemars(description = "The ID of the entity the observation is about")]
    pub entity_id: Option<i64>,
    #[schemars(description = "The content of the observation. Should be comprehensible on its own.")]
    pub content: String,
}

/// One row of `list_entities`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub num_observations: i64,
    /// Distinct relations with this entity at either end. A self-relation counts once.
    pub num_relations: i64,
}

/// The whole graph, unfiltered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub entities: Vec<Entity>,
    pub observations: Vec<Observation>,
    pub relations: Vec<Relation>,
}

/// An opened entity with its observations and both relation directions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNode {
    #[serde(flatten)]
    pub entity: Entity,
    pub observations: Vec<Observation>,
    /// Relations where this entity is the source.
    pub relations_from: Vec<Relation>,
    /// Relations where this entity is the destination.
    pub relations_to: Vec<Relation>,
}
