use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::store::message_from_row;
use super::types::MessageHit;
use crate::embedding::{ensure_dimensions, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::memory::embedding_to_bytes;
use crate::memory::search::MAX_KNN_CANDIDATES;

/// Messages nearest to `query_embedding`, closest first, at most `limit`.
/// Only messages with a vector are considered.
pub fn find_similar_messages(
    conn: &Connection,
    query_embedding: &[f32],
    limit: usize,
) -> Result<Vec<MessageHit>> {
    ensure_dimensions(query_embedding).map_err(|e| Error::Validation(e.to_string()))?;
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "WITH knn AS ( \
             SELECT message_id, distance FROM message_embeddings \
             WHERE embedding MATCH ?1 AND k = ?2 \
         ) \
         SELECT m.id, m.chat_id, m.role, m.content, m.created_at, m.updated_at, knn.distance \
         FROM knn JOIN messages m ON m.id = knn.message_id \
         ORDER BY knn.distance LIMIT ?3",
    )?;
    let hits = stmt
        .query_map(
            params![
                embedding_to_bytes(query_embedding),
                limit.min(MAX_KNN_CANDIDATES) as i64,
                limit as i64
            ],
            |row| {
                Ok(MessageHit {
                    message: message_from_row(row)?,
                    distance: row.get(6)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Embed `query` and search chat history with it.
pub fn search_messages(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    query: &str,
    limit: usize,
) -> Result<Vec<MessageHit>> {
    let embedding = provider.embed(query).map_err(Error::upstream)?;
    let conn = crate::db::lock(db)?;
    find_similar_messages(&conn, &embedding, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::embed::upsert_message_embedding;
    use crate::chat::store::{create_chat, insert_messages};
    use crate::chat::types::NewMessage;

    fn spike(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[dim] = 1.0;
        v
    }

    #[test]
    fn nearest_message_first() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let chat = create_chat(&conn, None).unwrap();
        let inserted = insert_messages(
            &mut conn,
            &chat.id,
            &[
                NewMessage {
                    role: "user".into(),
                    content: "tea".into(),
                },
                NewMessage {
                    role: "assistant".into(),
                    content: "weather".into(),
                },
                NewMessage {
                    role: "user".into(),
                    content: "not embedded".into(),
                },
            ],
        )
        .unwrap();
        upsert_message_embedding(&mut conn, &inserted[0].id, &spike(0)).unwrap();
        upsert_message_embedding(&mut conn, &inserted[1].id, &spike(1)).unwrap();

        let hits = find_similar_messages(&conn, &spike(0), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].message.id, inserted[0].id);
        assert!(hits[0].distance < hits[1].distance);

        let hits = find_similar_messages(&conn, &spike(1), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.content, "weather");
    }

    #[test]
    fn empty_history_returns_nothing() {
        let conn = crate::db::open_memory_database().unwrap();
        assert!(find_similar_messages(&conn, &spike(0), 10).unwrap().is_empty());
    }
}
