#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use familiar::db::{self, SharedConnection};
use familiar::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use familiar::memory::types::{NewEntity, NewObservation, NewRelation};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Wrap a connection the way the server shares it.
pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Each seed produces a distinct, orthogonal vector.
pub fn test_embedding(seed: u16) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed as usize % EMBEDDING_DIM] = 1.0;
    v
}

pub fn entity(name: &str, entity_type: &str) -> NewEntity {
    NewEntity {
        name: name.into(),
        entity_type: entity_type.into(),
    }
}

pub fn observation(entity_id: Option<i64>, content: &str) -> NewObservation {
    NewObservation {
        entity_id,
        content: content.into(),
    }
}

pub fn relation(from: i64, to: i64, relation_type: &str) -> NewRelation {
    NewRelation {
        from_entity_id: from,
        to_entity_id: to,
        relation_type: relation_type.into(),
    }
}

/// Words that land on the same dimension, so paraphrases embed close together.
const CONCEPTS: &[&[&str]] = &[
    &["tea", "coffee", "beverage", "beverages", "drink", "drinks"],
    &["weather", "sunny", "rain", "rainy", "forecast"],
    &["chess", "game", "games", "board"],
    &["deploy", "deployed", "release", "released", "ship", "shipped"],
];

/// Dimensions after the concept block take hashed plain words.
const FREE_DIMS_START: usize = 16;

/// Deterministic bag-of-words embedder: concept words share a dimension,
/// other words hash into the remaining ones. The vector is L2-normalized.
pub struct ConceptEmbedder;

impl ConceptEmbedder {
    fn dimension(word: &str) -> usize {
        for (i, group) in CONCEPTS.iter().enumerate() {
            if group.contains(&word) {
                return i;
            }
        }
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        FREE_DIMS_START + (hash as usize % (EMBEDDING_DIM - FREE_DIMS_START))
    }
}

impl EmbeddingProvider for ConceptEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[Self::dimension(&word.to_lowercase())] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[EMBEDDING_DIM - 1] = 1.0;
        } else {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "concept-test"
    }
}

/// Provider that always errors, counting calls.
#[derive(Default)]
pub struct FailingEmbedder {
    pub calls: AtomicUsize,
}

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("provider unavailable")
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}

/// Provider that records every text it is asked to embed.
#[derive(Default)]
pub struct RecordingEmbedder {
    pub texts: Mutex<Vec<String>>,
}

impl EmbeddingProvider for RecordingEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.texts.lock().unwrap().push(text.to_string());
        ConceptEmbedder.embed(text)
    }

    fn model_name(&self) -> &str {
        "recording-test"
    }
}

/// Rows in a table.
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
