use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::store::{observation_from_row, OBSERVATION_COLUMNS};
use super::types::Observation;
use crate::config::{HybridPolicy, RetrievalConfig};
use crate::embedding::ensure_dimensions;
use crate::error::{Error, Result};

/// vec0 refuses KNN queries asking for more rows than this.
pub const MAX_KNN_CANDIDATES: usize = 4096;

// ── Public types ──────────────────────────────────────────────────────────────

/// A nearest-neighbor match.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationHit {
    #[serde(flatten)]
    pub observation: Observation,
    /// Cosine distance to the query, smaller is closer.
    pub distance: f64,
}

/// A hybrid-ranked match. A signal is `None` when the observation was only
/// found by the other method.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridHit {
    #[serde(flatten)]
    pub observation: Observation,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_rank: Option<f64>,
}

/// Knobs for [`hybrid_search`].
#[derive(Debug, Clone, Copy)]
pub struct HybridOptions {
    /// ANN candidate count.
    pub k: usize,
    pub probe: usize,
    pub policy: HybridPolicy,
    /// Weight of the text rank in the `Intersection`/`Union` score.
    pub text_weight: f64,
    pub rrf_k: usize,
    /// Maximum number of merged results.
    pub limit: usize,
}

impl HybridOptions {
    pub fn from_config(config: &RetrievalConfig, k: usize, probe: usize) -> Self {
        Self {
            k,
            probe,
            policy: config.hybrid_policy,
            text_weight: config.text_weight,
            rrf_k: config.rrf_k,
            limit: config.hybrid_limit,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// The `k` observations nearest to `query_embedding`, closest first.
///
/// `probe` widens the KNN candidate pool to `k * probe` rows before the join
/// back to `observations`, so vectors left behind by deleted rows cannot
/// crowd out live ones. Returns fewer than `k` hits when the store is small.
pub fn find_similar_observations(
    conn: &Connection,
    query_embedding: &[f32],
    k: usize,
    probe: usize,
) -> Result<Vec<ObservationHit>> {
    ensure_dimensions(query_embedding).map_err(|e| Error::Validation(e.to_string()))?;
    if k == 0 {
        return Ok(Vec::new());
    }

    let candidates = k.saturating_mul(probe.max(1)).min(MAX_KNN_CANDIDATES);
    let mut stmt = conn.prepare(&format!(
        "WITH knn AS ( \
             SELECT observation_id, distance FROM observation_embeddings \
             WHERE embedding MATCH ?1 AND k = ?2 \
         ) \
         SELECT {}, knn.distance FROM knn \
         JOIN observations o ON o.id = knn.observation_id \
         ORDER BY knn.distance LIMIT ?3",
        prefixed_columns("o")
    ))?;
    let hits = stmt
        .query_map(
            params![
                super::embedding_to_bytes(query_embedding),
                candidates as i64,
                k as i64
            ],
            |row| {
                Ok(ObservationHit {
                    observation: observation_from_row(row)?,
                    distance: row.get(4)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Merge ANN candidates with full-text matches for `fts_query` under
/// `options.policy`, best first, capped at `options.limit`.
///
/// - `Intersection`: only observations found by both methods, scored
///   `(1 - distance) + text_weight * text_rank`.
/// - `Union`: the same score over both candidate sets, a missing signal
///   contributing nothing.
/// - `Rrf`: reciprocal rank fusion of the two ranked lists.
pub fn hybrid_search(
    conn: &Connection,
    query_embedding: &[f32],
    fts_query: &str,
    options: &HybridOptions,
) -> Result<Vec<HybridHit>> {
    let ann = find_similar_observations(conn, query_embedding, options.k, options.probe)?;
    if options.limit == 0 {
        return Ok(Vec::new());
    }

    let text = match options.policy {
        HybridPolicy::Intersection => {
            let ids: Vec<i64> = ann.iter().map(|h| h.observation.id).collect();
            fts_search_within(conn, fts_query, &ids)?
        }
        HybridPolicy::Union | HybridPolicy::Rrf => fts_search(conn, fts_query, options.k)?,
    };

    let mut observations: HashMap<i64, Observation> = HashMap::new();
    let mut distances: HashMap<i64, f64> = HashMap::new();
    let mut ann_ranked: Vec<i64> = Vec::with_capacity(ann.len());
    for hit in ann {
        ann_ranked.push(hit.observation.id);
        distances.insert(hit.observation.id, hit.distance);
        observations.insert(hit.observation.id, hit.observation);
    }
    let text_ranks: HashMap<i64, f64> = text.iter().copied().collect();

    let scored: Vec<(i64, f64)> = match options.policy {
        HybridPolicy::Intersection => ann_ranked
            .iter()
            .filter_map(|id| {
                let rank = text_ranks.get(id)?;
                Some((*id, (1.0 - distances[id]) + options.text_weight * rank))
            })
            .collect(),
        HybridPolicy::Union => {
            let mut ids: Vec<i64> = ann_ranked.clone();
            let mut seen: HashSet<i64> = ids.iter().copied().collect();
            ids.extend(text.iter().map(|(id, _)| *id).filter(|id| seen.insert(*id)));
            ids.into_iter()
                .map(|id| {
                    let vector = distances.get(&id).map(|d| 1.0 - d).unwrap_or(0.0);
                    let lexical = text_ranks.get(&id).copied().unwrap_or(0.0);
                    (id, vector + options.text_weight * lexical)
                })
                .collect()
        }
        HybridPolicy::Rrf => {
            let text_ranked: Vec<i64> = text.iter().map(|(id, _)| *id).collect();
            rrf_merge(&ann_ranked, &text_ranked, options.rrf_k)
        }
    };

    let missing: Vec<i64> = scored
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !observations.contains_key(id))
        .collect();
    for observation in fetch_observations(conn, &missing)? {
        observations.insert(observation.id, observation);
    }

    let mut hits: Vec<HybridHit> = scored
        .into_iter()
        .filter_map(|(id, score)| {
            Some(HybridHit {
                observation: observations.remove(&id)?,
                score,
                distance: distances.get(&id).copied(),
                text_rank: text_ranks.get(&id).copied(),
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(options.limit);
    Ok(hits)
}

/// FTS5 BM25 keyword search over observation content.
///
/// Returns `(observation id, text rank)` pairs, best first. FTS5 rank is
/// negative (more negative = better), so it is negated here.
pub fn fts_search(conn: &Connection, query_text: &str, limit: usize) -> Result<Vec<(i64, f64)>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT rowid, -rank FROM observations_fts \
         WHERE observations_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let results = stmt
        .query_map(params![escaped, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(results)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn prefixed_columns(alias: &str) -> String {
    OBSERVATION_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full-text matches restricted to the given observation ids.
fn fts_search_within(conn: &Connection, query_text: &str, ids: &[i64]) -> Result<Vec<(i64, f64)>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() || ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT rowid, -rank FROM observations_fts \
         WHERE observations_fts MATCH ? AND rowid IN ({}) ORDER BY rank",
        super::placeholders(ids.len())
    );
    let mut values: Vec<Value> = vec![Value::Text(escaped)];
    values.extend(ids.iter().map(|id| Value::Integer(*id)));

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(results)
}

fn fetch_observations(conn: &Connection, ids: &[i64]) -> Result<Vec<Observation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id IN ({})",
        super::placeholders(ids.len())
    );
    let rows = conn
        .prepare(&sql)?
        .query_map(params_from_iter(ids.iter()), observation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins with spaces
/// so FTS5 treats them as individual terms (implicit AND). Strips empty tokens.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reciprocal Rank Fusion over two ranked id lists, best first.
///
/// Ids in both lists get additive scores; ids in one list get a single score.
fn rrf_merge(vector_ranked: &[i64], text_ranked: &[i64], k: usize) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();

    for list in [vector_ranked, text_ranked] {
        for (rank, id) in list.iter().enumerate() {
            let entry = scores.entry(*id).or_insert_with(|| {
                order.push(*id);
                0.0
            });
            *entry += 1.0 / (k as f64 + rank as f64 + 1.0);
        }
    }

    let mut merged: Vec<(i64, f64)> = order.into_iter().map(|id| (id, scores[&id])).collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embed::upsert_observation_embedding;
    use crate::memory::store;
    use crate::memory::types::{NewEntity, NewObservation};

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    /// Unit vector with weight on `dims`.
    fn spike(dims: &[usize]) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        let w = 1.0 / (dims.len() as f32).sqrt();
        for &d in dims {
            v[d] = w;
        }
        v
    }

    /// Insert one entity and observations with the given vectors.
    fn seed(conn: &mut Connection, rows: &[(&str, Vec<f32>)]) -> Vec<i64> {
        let entity = store::create_entities(
            conn,
            &[NewEntity {
                name: "Alice".into(),
                entity_type: "person".into(),
            }],
        )
        .unwrap()[0]
            .id;
        let batch: Vec<NewObservation> = rows
            .iter()
            .map(|(content, _)| NewObservation {
                entity_id: Some(entity),
                content: content.to_string(),
            })
            .collect();
        let ids = store::add_observations(conn, &batch).unwrap();
        for (id, (_, embedding)) in ids.iter().zip(rows) {
            upsert_observation_embedding(conn, *id, embedding).unwrap();
        }
        ids
    }

    fn options(policy: HybridPolicy) -> HybridOptions {
        HybridOptions {
            k: 10,
            probe: 1,
            policy,
            text_weight: 0.5,
            rrf_k: 60,
            limit: 20,
        }
    }

    #[test]
    fn nearest_first_and_capped_at_k() {
        let mut conn = test_db();
        let ids = seed(
            &mut conn,
            &[
                ("exact", spike(&[0])),
                ("near", spike(&[0, 1])),
                ("far", spike(&[200])),
            ],
        );

        let hits = find_similar_observations(&conn, &spike(&[0]), 2, 1).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].observation.id, ids[0]);
        assert_eq!(hits[1].observation.id, ids[1]);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[0].distance < 0.01);
    }

    #[test]
    fn empty_store_returns_nothing() {
        let conn = test_db();
        assert!(find_similar_observations(&conn, &spike(&[0]), 5, 3).unwrap().is_empty());
        assert!(hybrid_search(&conn, &spike(&[0]), "tea", &options(HybridPolicy::Union))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn wrong_dimensions_are_a_validation_error() {
        let conn = test_db();
        let err = find_similar_observations(&conn, &[1.0, 0.0], 5, 1).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn zero_k_returns_nothing() {
        let mut conn = test_db();
        seed(&mut conn, &[("only", spike(&[0]))]);
        assert!(find_similar_observations(&conn, &spike(&[0]), 0, 1).unwrap().is_empty());
    }

    #[test]
    fn orphaned_vectors_are_not_returned() {
        let mut conn = test_db();
        let ids = seed(&mut conn, &[("kept", spike(&[0])), ("gone", spike(&[0]))]);
        // Bypass the store so the vector is left behind.
        conn.execute("DELETE FROM observations WHERE id = ?1", params![ids[1]])
            .unwrap();

        let hits = find_similar_observations(&conn, &spike(&[0]), 5, 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation.id, ids[0]);
    }

    #[test]
    fn intersection_requires_both_signals() {
        let mut conn = test_db();
        let ids = seed(
            &mut conn,
            &[
                ("green tea every morning", spike(&[0])),
                ("black coffee", spike(&[0, 1])),
                ("tea ceremony notes", spike(&[300])),
            ],
        );

        let mut opts = options(HybridPolicy::Intersection);
        opts.k = 2;
        let hits = hybrid_search(&conn, &spike(&[0]), "tea", &opts).unwrap();

        // "tea ceremony" matches the text but is outside the ANN top 2.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation.id, ids[0]);
        assert!(hits[0].distance.is_some() && hits[0].text_rank.is_some());
    }

    #[test]
    fn union_keeps_single_signal_hits() {
        let mut conn = test_db();
        let ids = seed(
            &mut conn,
            &[
                ("green tea every morning", spike(&[0])),
                ("black coffee", spike(&[0, 1])),
                ("tea ceremony notes", spike(&[300])),
            ],
        );

        let mut opts = options(HybridPolicy::Union);
        opts.k = 2;
        let hits = hybrid_search(&conn, &spike(&[0]), "tea", &opts).unwrap();
        let found: HashSet<i64> = hits.iter().map(|h| h.observation.id).collect();
        assert_eq!(found, ids.iter().copied().collect());
        // Both signals beat either alone.
        assert_eq!(hits[0].observation.id, ids[0]);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn rrf_ranks_shared_hits_first() {
        let mut conn = test_db();
        let ids = seed(
            &mut conn,
            &[
                ("plain text", spike(&[0])),
                ("tea lover", spike(&[0, 1])),
            ],
        );
        let hits = hybrid_search(&conn, &spike(&[0]), "tea", &options(HybridPolicy::Rrf)).unwrap();
        assert_eq!(hits[0].observation.id, ids[1]);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn hybrid_respects_limit() {
        let mut conn = test_db();
        let rows: Vec<(String, Vec<f32>)> = (0..5)
            .map(|i| (format!("tea note {i}"), spike(&[i])))
            .collect();
        let rows: Vec<(&str, Vec<f32>)> = rows.iter().map(|(c, e)| (c.as_str(), e.clone())).collect();
        seed(&mut conn, &rows);

        let mut opts = options(HybridPolicy::Intersection);
        opts.limit = 3;
        let hits = hybrid_search(&conn, &spike(&[0]), "tea", &opts).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn fts_search_matches_keywords() {
        let mut conn = test_db();
        let ids = seed(
            &mut conn,
            &[
                ("The quantum computer runs cold", spike(&[0])),
                ("Rust is a systems language", spike(&[1])),
            ],
        );
        let results = fts_search(&conn, "quantum computer", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ids[0]);
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn rrf_merge_combines_signals() {
        let merged = rrf_merge(&[1, 2, 3], &[2, 1, 4], 60);
        let scores: HashMap<i64, f64> = merged.into_iter().collect();
        assert!(scores[&1] > scores[&3]);
        assert!(scores[&2] > scores[&4]);
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts_query("rust OR python"), "\"rust\" \"OR\" \"python\"");
        assert_eq!(escape_fts_query("  spaces  "), "\"spaces\"");
        assert_eq!(escape_fts_query("\"\""), "");
        assert_eq!(escape_fts_query(""), "");
    }
}
