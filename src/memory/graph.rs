//! Entity node assembly ("open nodes").
//!
//! Three keyed queries (entities by name, observations by entity id, relations
//! by each endpoint) feed [`assemble`], which folds the rows into one
//! [`EntityNode`] per entity through an index keyed by entity id.

use std::collections::{HashMap, HashSet};

use rusqlite::{params_from_iter, Connection};

use super::placeholders;
use super::store::{
    entity_from_row, observation_from_row, relation_from_row, ENTITY_COLUMNS,
    OBSERVATION_COLUMNS, RELATION_COLUMNS,
};
use super::types::{Entity, EntityNode, Observation, Relation};
use crate::error::Result;

/// Open every entity whose name is in `names`, with its observations and both
/// relation directions. Names that match nothing are omitted.
pub fn open_nodes(conn: &Connection, names: &[String]) -> Result<Vec<EntityNode>> {
    if names.is_empty() {
        return Ok(vec![]);
    }

    let entities = conn
        .prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE name IN ({}) ORDER BY id",
            placeholders(names.len())
        ))?
        .query_map(params_from_iter(names.iter()), entity_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if entities.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<i64> = entities.iter().map(|e| e.id).collect();
    let in_list = placeholders(ids.len());

    let observations = conn
        .prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE entity_id IN ({in_list}) ORDER BY id"
        ))?
        .query_map(params_from_iter(ids.iter()), observation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let relations_from = conn
        .prepare(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations WHERE from_entity_id IN ({in_list}) ORDER BY id"
        ))?
        .query_map(params_from_iter(ids.iter()), relation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let relations_to = conn
        .prepare(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations WHERE to_entity_id IN ({in_list}) ORDER BY id"
        ))?
        .query_map(params_from_iter(ids.iter()), relation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(assemble(entities, observations, relations_from, relations_to))
}

/// Fold flat rows into nodes, one per distinct entity, in first-seen order.
///
/// Rows whose owner is not among `entities` are dropped, and repeated rows are
/// kept once, so callers may pass rows straight from joined queries.
pub fn assemble(
    entities: Vec<Entity>,
    observations: Vec<Observation>,
    relations_from: Vec<Relation>,
    relations_to: Vec<Relation>,
) -> Vec<EntityNode> {
    let mut nodes: Vec<EntityNode> = Vec::with_capacity(entities.len());
    let mut index: HashMap<i64, usize> = HashMap::with_capacity(entities.len());

    for entity in entities {
        if index.contains_key(&entity.id) {
            continue;
        }
        index.insert(entity.id, nodes.len());
        nodes.push(EntityNode {
            entity,
            observations: Vec::new(),
            relations_from: Vec::new(),
            relations_to: Vec::new(),
        });
    }

    let mut seen_observations: HashSet<i64> = HashSet::new();
    for observation in observations {
        let Some(&slot) = observation.entity_id.and_then(|id| index.get(&id)) else {
            continue;
        };
        if seen_observations.insert(observation.id) {
            nodes[slot].observations.push(observation);
        }
    }

    let mut seen_from: HashSet<i64> = HashSet::new();
    for relation in relations_from {
        if let Some(&slot) = index.get(&relation.from_entity_id) {
            if seen_from.insert(relation.id) {
                nodes[slot].relations_from.push(relation);
            }
        }
    }

    let mut seen_to: HashSet<i64> = HashSet::new();
    for relation in relations_to {
        if let Some(&slot) = index.get(&relation.to_entity_id) {
            if seen_to.insert(relation.id) {
                nodes[slot].relations_to.push(relation);
            }
        }
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: i64, name: &str) -> Entity {
        Entity {
            id,
            name: name.into(),
            entity_type: "person".into(),
            created_at: "t".into(),
            updated_at: "t".into(),
        }
    }

    fn observation(id: i64, entity_id: i64) -> Observation {
        Observation {
            id,
            entity_id: Some(entity_id),
            content: format!("observation {id}"),
            created_at: "t".into(),
        }
    }

    fn relation(id: i64, from: i64, to: i64) -> Relation {
        Relation {
            id,
            from_entity_id: from,
            to_entity_id: to,
            relation_type: "knows".into(),
            created_at: "t".into(),
        }
    }

    #[test]
    fn cross_product_rows_fold_to_unique_sets() {
        // Rows as a joined query would produce them: 2 observations x 2 outgoing
        // x 1 incoming relation = 4 rows for entity 1.
        let mut entities = Vec::new();
        let mut observations = Vec::new();
        let mut from = Vec::new();
        let mut to = Vec::new();
        for obs in [10, 11] {
            for rel in [100, 101] {
                entities.push(entity(1, "A"));
                observations.push(observation(obs, 1));
                from.push(relation(rel, 1, 2));
                to.push(relation(200, 3, 1));
            }
        }

        let nodes = assemble(entities, observations, from, to);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].observations.len(), 2);
        assert_eq!(nodes[0].relations_from.len(), 2);
        assert_eq!(nodes[0].relations_to.len(), 1);
    }

    #[test]
    fn self_relation_appears_in_both_directions() {
        let nodes = assemble(
            vec![entity(1, "A")],
            vec![],
            vec![relation(5, 1, 1)],
            vec![relation(5, 1, 1)],
        );
        assert_eq!(nodes[0].relations_from.len(), 1);
        assert_eq!(nodes[0].relations_to.len(), 1);
    }

    #[test]
    fn rows_for_unknown_entities_are_dropped() {
        let nodes = assemble(
            vec![entity(1, "A")],
            vec![observation(10, 2)],
            vec![relation(5, 2, 1)],
            vec![],
        );
        assert!(nodes[0].observations.is_empty());
        assert!(nodes[0].relations_from.is_empty());
    }

    #[test]
    fn relations_are_split_by_direction() {
        let nodes = assemble(
            vec![entity(1, "A"), entity(2, "B")],
            vec![],
            vec![relation(5, 1, 2)],
            vec![relation(5, 1, 2)],
        );
        assert_eq!(nodes[0].relations_from.len(), 1);
        assert!(nodes[0].relations_to.is_empty());
        assert!(nodes[1].relations_from.is_empty());
        assert_eq!(nodes[1].relations_to.len(), 1);
    }
}
