//! Observation embedding pipeline.
//!
//! The embedded text is the observation content enriched with its entity's
//! name, type and relations, so that "Alice likes tea" is found by queries
//! about Alice's friends as well as about beverages.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::embedding_to_bytes;
use super::store::get_observation;
use super::types::Observation;
use crate::embedding::{ensure_dimensions, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::jobs::EmbedOutcome;

/// Graph context for one entity, used to enrich observation text.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityContext {
    pub name: String,
    pub entity_type: String,
    /// `(relation_type, target name)` for relations leaving this entity.
    pub outgoing: Vec<(String, String)>,
    /// `(source name, relation_type)` for relations arriving at this entity.
    pub incoming: Vec<(String, String)>,
}

/// Load the entity with the names at the other end of each relation.
pub fn load_entity_context(conn: &Connection, entity_id: i64) -> Result<Option<EntityContext>> {
    let Some((name, entity_type)) = conn
        .query_row(
            "SELECT name, entity_type FROM entities WHERE id = ?1",
            params![entity_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?
    else {
        return Ok(None);
    };

    let outgoing = conn
        .prepare(
            "SELECT r.relation_type, t.name FROM relations r \
             JOIN entities t ON t.id = r.to_entity_id \
             WHERE r.from_entity_id = ?1 ORDER BY r.id",
        )?
        .query_map(params![entity_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let incoming = conn
        .prepare(
            "SELECT s.name, r.relation_type FROM relations r \
             JOIN entities s ON s.id = r.from_entity_id \
             WHERE r.to_entity_id = ?1 ORDER BY r.id",
        )?
        .query_map(params![entity_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(EntityContext {
        name,
        entity_type,
        outgoing,
        incoming,
    }))
}

/// Content, then the entity line, then one sentence per relation.
pub fn enrichment_text(content: &str, context: &EntityContext) -> String {
    let mut text = format!(
        "{content}\nEntity: {} ({})",
        context.name, context.entity_type
    );
    for (relation_type, target) in &context.outgoing {
        text.push_str(&format!("\n{} {relation_type} {target}", context.name));
    }
    for (source, relation_type) in &context.incoming {
        text.push_str(&format!("\n{source} {relation_type} {}", context.name));
    }
    text
}

/// Insert or overwrite the vector for an observation.
///
/// Returns `false` without writing when the observation no longer exists.
pub fn upsert_observation_embedding(
    conn: &mut Connection,
    observation_id: i64,
    embedding: &[f32],
) -> Result<bool> {
    ensure_dimensions(embedding).map_err(|e| Error::Validation(e.to_string()))?;

    let tx = conn.transaction()?;
    let exists = tx
        .query_row(
            "SELECT 1 FROM observations WHERE id = ?1",
            params![observation_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(false);
    }

    tx.execute(
        "DELETE FROM observation_embeddings WHERE observation_id = ?1",
        params![observation_id],
    )?;
    tx.execute(
        "INSERT INTO observation_embeddings (observation_id, embedding) VALUES (?1, ?2)",
        params![observation_id, embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Embed one observation with its current graph context.
///
/// Detached observations (no entity) are skipped. The lock is released while
/// the provider runs.
pub fn embed_observation(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    observation: &Observation,
) -> Result<EmbedOutcome> {
    let Some(entity_id) = observation.entity_id else {
        return Ok(EmbedOutcome::SkippedDetached);
    };

    let context = {
        let conn = crate::db::lock(db)?;
        load_entity_context(&conn, entity_id)?
    };
    let Some(context) = context else {
        return Ok(EmbedOutcome::SkippedMissing);
    };

    let text = enrichment_text(&observation.content, &context);
    let embedding = provider.embed(&text).map_err(Error::upstream)?;
    ensure_dimensions(&embedding).map_err(Error::upstream)?;

    let mut conn = crate::db::lock(db)?;
    if upsert_observation_embedding(&mut conn, observation.id, &embedding)? {
        tracing::debug!(observation = observation.id, entity = entity_id, "observation embedded");
        Ok(EmbedOutcome::Embedded)
    } else {
        Ok(EmbedOutcome::SkippedMissing)
    }
}

/// Load an observation and embed it.
pub fn embed_observation_by_id(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    observation_id: i64,
) -> Result<EmbedOutcome> {
    let observation = {
        let conn = crate::db::lock(db)?;
        get_observation(&conn, observation_id)?
    };
    match observation {
        Some(observation) => embed_observation(db, provider, &observation),
        None => Ok(EmbedOutcome::SkippedMissing),
    }
}

/// Counts from a full re-embed.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BackfillReport {
    pub total: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Re-embed every observation, one at a time, whether or not it already has a
/// vector. Failures are logged and counted; the run continues.
///
/// `on_progress` is called after each observation with `(done, total)`.
pub fn embed_all_observations(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<BackfillReport> {
    let observations = {
        let conn = crate::db::lock(db)?;
        super::store::all_observations(&conn)?
    };

    let mut report = BackfillReport {
        total: observations.len(),
        ..BackfillReport::default()
    };

    for (i, observation) in observations.iter().enumerate() {
        match embed_observation(db, provider, observation) {
            Ok(EmbedOutcome::Embedded) => report.embedded += 1,
            Ok(_) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(observation = observation.id, error = %e, "backfill failed for observation");
                report.failed += 1;
            }
        }
        on_progress(i + 1, report.total);
    }

    tracing::info!(
        total = report.total,
        embedded = report.embedded,
        skipped = report.skipped,
        failed = report.failed,
        "observation backfill finished"
    );
    Ok(report)
}
