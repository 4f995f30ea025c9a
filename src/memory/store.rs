//! Graph write and read paths.
//!
//! Every batch runs in one transaction, so a constraint failure on any row
//! leaves nothing from that batch behind. Writes that change what an
//! observation's embedded text would contain queue an embedding job in the
//! same transaction (see [`crate::jobs`]).

use std::collections::BTreeSet;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};

use super::placeholders;
use super::types::{
    Entity, EntitySummary, Graph, NewEntity, NewObservation, NewRelation, Observation, Relation,
};
use crate::error::{Error, Result};
use crate::jobs::{self, JobKind};

pub(crate) const ENTITY_COLUMNS: &str = "id, name, entity_type, created_at, updated_at";
pub(crate) const RELATION_COLUMNS: &str =
    "id, from_entity_id, to_entity_id, relation_type, created_at";
pub(crate) const OBSERVATION_COLUMNS: &str = "id, entity_id, content, created_at";

pub(crate) fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub(crate) fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        from_entity_id: row.get(1)?,
        to_entity_id: row.get(2)?,
        relation_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Run `sql` (with one `{}` for the IN list) over `ids`, collecting the first column.
fn select_ids(conn: &Connection, sql: &str, ids: &[i64]) -> Result<Vec<i64>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = sql.replace("{}", &placeholders(ids.len()));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(rows)
}

fn execute_in(conn: &Connection, sql: &str, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = sql.replace("{}", &placeholders(ids.len()));
    Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
}

/// Entities at the far end of any relation touching `ids`.
fn neighbor_entities(conn: &Connection, ids: &[i64]) -> Result<BTreeSet<i64>> {
    let mut neighbors: BTreeSet<i64> = select_ids(
        conn,
        "SELECT to_entity_id FROM relations WHERE from_entity_id IN ({})",
        ids,
    )?
    .into_iter()
    .collect();
    neighbors.extend(select_ids(
        conn,
        "SELECT from_entity_id FROM relations WHERE to_entity_id IN ({})",
        ids,
    )?);
    Ok(neighbors)
}

/// Remove vectors and queued jobs for observations about to disappear.
fn drop_observation_embeddings(tx: &Transaction<'_>, observation_ids: &[i64]) -> Result<()> {
    if observation_ids.is_empty() {
        return Ok(());
    }
    {
        let mut stmt =
            tx.prepare("DELETE FROM observation_embeddings WHERE observation_id = ?1")?;
        for id in observation_ids {
            stmt.execute(params![id])?;
        }
    }
    let targets: Vec<String> = observation_ids.iter().map(i64::to_string).collect();
    jobs::discard(tx, JobKind::Observation, &targets)?;
    Ok(())
}

/// Insert a batch of entities. Fails as a whole if any `(name, entity_type)` exists.
pub fn create_entities(conn: &mut Connection, batch: &[NewEntity]) -> Result<Vec<Entity>> {
    if batch.is_empty() {
        return Ok(vec![]);
    }

    let tx = conn.transaction()?;
    let now = crate::db::now_timestamp();
    let mut created = Vec::with_capacity(batch.len());
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO entities (name, entity_type, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) RETURNING {ENTITY_COLUMNS}"
        ))?;
        for entity in batch {
            let row = stmt
                .query_row(params![entity.name, entity.entity_type, now], entity_from_row)
                .map_err(|e| match Error::from(e) {
                    Error::ConstraintViolation(_) => Error::ConstraintViolation(format!(
                        "entity '{}' of type '{}' already exists",
                        entity.name, entity.entity_type
                    )),
                    other => other,
                })?;
            created.push(row);
        }
    }
    tx.commit()?;

    tracing::info!(count = created.len(), "entities created");
    Ok(created)
}

/// Insert a batch of relations. Fails as a whole on a duplicate triple or an
/// unknown endpoint. Observations of both endpoints are queued for re-embedding.
pub fn create_relations(conn: &mut Connection, batch: &[NewRelation]) -> Result<Vec<Relation>> {
    if batch.is_empty() {
        return Ok(vec![]);
    }

    let tx = conn.transaction()?;
    let now = crate::db::now_timestamp();
    let mut created = Vec::with_capacity(batch.len());
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO relations (from_entity_id, to_entity_id, relation_type, created_at) \
             VALUES (?1, ?2, ?3, ?4) RETURNING {RELATION_COLUMNS}"
        ))?;
        for relation in batch {
            let row = stmt
                .query_row(
                    params![
                        relation.from_entity_id,
                        relation.to_entity_id,
                        relation.relation_type,
                        now
                    ],
                    relation_from_row,
                )
                .map_err(|e| match Error::from(e) {
                    Error::ConstraintViolation(msg) => Error::ConstraintViolation(format!(
                        "relation {} -[{}]-> {} rejected: {msg}",
                        relation.from_entity_id, relation.relation_type, relation.to_entity_id
                    )),
                    other => other,
                })?;
            created.push(row);
        }
    }

    let endpoints: Vec<i64> = created
        .iter()
        .flat_map(|r| [r.from_entity_id, r.to_entity_id])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let queued = jobs::enqueue_observations_of_entities(&tx, &endpoints)?;
    tx.commit()?;

    tracing::info!(count = created.len(), requeued = queued, "relations created");
    Ok(created)
}

/// Insert observations and queue an embedding job for each one attached to an
/// entity. Returns the generated ids in input order.
pub fn add_observations(conn: &mut Connection, batch: &[NewObservation]) -> Result<Vec<i64>> {
    if batch.is_empty() {
        return Ok(vec![]);
    }

    let tx = conn.transaction()?;
    let now = crate::db::now_timestamp();
    let mut ids = Vec::with_capacity(batch.len());
    {
        let mut stmt = tx.prepare(
            "INSERT INTO observations (entity_id, content, created_at) VALUES (?1, ?2, ?3) RETURNING id",
        )?;
        for observation in batch {
            let id: i64 = stmt
                .query_row(params![observation.entity_id, observation.content, now], |row| {
                    row.get(0)
                })
                .map_err(|e| match Error::from(e) {
                    Error::ConstraintViolation(_) => Error::ConstraintViolation(format!(
                        "entity {} does not exist",
                        observation.entity_id.unwrap_or_default()
                    )),
                    other => other,
                })?;
            if observation.entity_id.is_some() {
                jobs::enqueue(&tx, JobKind::Observation, &id.to_string())?;
            }
            ids.push(id);
        }
    }
    tx.commit()?;

    tracing::info!(count = ids.len(), "observations added");
    Ok(ids)
}

/// Delete entities with their observations and relations. Unknown ids are ignored.
/// Returns the number of entities removed.
pub fn delete_entities(conn: &mut Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let doomed: BTreeSet<i64> = ids.iter().copied().collect();
    let survivors: Vec<i64> = neighbor_entities(&tx, ids)?
        .into_iter()
        .filter(|id| !doomed.contains(id))
        .collect();

    let observation_ids = select_ids(
        &tx,
        "SELECT id FROM observations WHERE entity_id IN ({})",
        ids,
    )?;
    drop_observation_embeddings(&tx, &observation_ids)?;

    let deleted = execute_in(&tx, "DELETE FROM entities WHERE id IN ({})", ids)?;
    let requeued = jobs::enqueue_observations_of_entities(&tx, &survivors)?;
    tx.commit()?;

    tracing::info!(
        deleted,
        observations = observation_ids.len(),
        requeued,
        "entities deleted"
    );
    Ok(deleted)
}

/// Delete observations by id. Unknown ids are ignored.
pub fn delete_observations(conn: &mut Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    drop_observation_embeddings(&tx, ids)?;
    let deleted = execute_in(&tx, "DELETE FROM observations WHERE id IN ({})", ids)?;
    tx.commit()?;

    tracing::info!(deleted, "observations deleted");
    Ok(deleted)
}

/// Delete relations by id. Unknown ids are ignored. Observations of the former
/// endpoints are queued for re-embedding.
pub fn delete_relations(conn: &mut Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut endpoints: BTreeSet<i64> = select_ids(
        &tx,
        "SELECT from_entity_id FROM relations WHERE id IN ({})",
        ids,
    )?
    .into_iter()
    .collect();
    endpoints.extend(select_ids(
        &tx,
        "SELECT to_entity_id FROM relations WHERE id IN ({})",
        ids,
    )?);

    let deleted = execute_in(&tx, "DELETE FROM relations WHERE id IN ({})", ids)?;
    let endpoints: Vec<i64> = endpoints.into_iter().collect();
    let requeued = jobs::enqueue_observations_of_entities(&tx, &endpoints)?;
    tx.commit()?;

    tracing::info!(deleted, requeued, "relations deleted");
    Ok(deleted)
}

/// Every entity with its observation count and distinct relation count.
pub fn list_entities(conn: &Connection) -> Result<Vec<EntitySummary>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.name, e.entity_type, \
                COUNT(DISTINCT o.id) AS num_observations, \
                COUNT(DISTINCT r.id) AS num_relations \
         FROM entities e \
         LEFT JOIN observations o ON o.entity_id = e.id \
         LEFT JOIN relations r ON r.from_entity_id = e.id OR r.to_entity_id = e.id \
         GROUP BY e.id \
         ORDER BY e.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EntitySummary {
                id: row.get(0)?,
                name: row.get(1)?,
                entity_type: row.get(2)?,
                num_observations: row.get(3)?,
                num_relations: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The whole graph. Meant for small stores.
pub fn read_graph(conn: &Connection) -> Result<Graph> {
    let entities = conn
        .prepare(&format!("SELECT {ENTITY_COLUMNS} FROM entities ORDER BY id"))?
        .query_map([], entity_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let observations = all_observations(conn)?;
    let relations = conn
        .prepare(&format!("SELECT {RELATION_COLUMNS} FROM relations ORDER BY id"))?
        .query_map([], relation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Graph {
        entities,
        observations,
        relations,
    })
}

pub fn get_observation(conn: &Connection, id: i64) -> Result<Option<Observation>> {
    let observation = conn
        .query_row(
            &format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"),
            params![id],
            observation_from_row,
        )
        .optional()?;
    Ok(observation)
}

pub fn all_observations(conn: &Connection) -> Result<Vec<Observation>> {
    let rows = conn
        .prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations ORDER BY id"
        ))?
        .query_map([], observation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
