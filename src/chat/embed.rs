use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::store::get_message;
use super::types::Message;
use crate::embedding::{ensure_dimensions, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::jobs::EmbedOutcome;
use crate::memory::embedding_to_bytes;

/// System and tool messages are never embedded.
pub fn is_embeddable_role(role: &str) -> bool {
    matches!(role, "user" | "assistant")
}

#[derive(Serialize)]
struct CanonicalMessage<'a> {
    content: &'a str,
    role: &'a str,
}

/// The text a message is embedded from: `{"content":...,"role":...}`.
pub fn canonical_text(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(&CanonicalMessage {
        content: &message.content,
        role: &message.role,
    })?)
}

pub fn has_embedding(conn: &Connection, message_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM message_embeddings WHERE message_id = ?1",
            params![message_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert or overwrite the vector for a message. Returns `false` without
/// writing when the message no longer exists.
pub fn upsert_message_embedding(
    conn: &mut Connection,
    message_id: &str,
    embedding: &[f32],
) -> Result<bool> {
    ensure_dimensions(embedding).map_err(|e| Error::Validation(e.to_string()))?;

    let tx = conn.transaction()?;
    if get_message(&tx, message_id)?.is_none() {
        return Ok(false);
    }
    tx.execute(
        "DELETE FROM message_embeddings WHERE message_id = ?1",
        params![message_id],
    )?;
    tx.execute(
        "INSERT INTO message_embeddings (message_id, embedding) VALUES (?1, ?2)",
        params![message_id, embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Embed a user or assistant message that has no vector yet.
pub fn embed_message(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    message: &Message,
) -> Result<EmbedOutcome> {
    if !is_embeddable_role(&message.role) {
        return Ok(EmbedOutcome::SkippedRole);
    }
    {
        let conn = crate::db::lock(db)?;
        if has_embedding(&conn, &message.id)? {
            return Ok(EmbedOutcome::SkippedExisting);
        }
    }

    let text = canonical_text(message)?;
    let embedding = provider.embed(&text).map_err(Error::upstream)?;
    ensure_dimensions(&embedding).map_err(Error::upstream)?;

    let mut conn = crate::db::lock(db)?;
    if upsert_message_embedding(&mut conn, &message.id, &embedding)? {
        tracing::debug!(message = %message.id, "message embedded");
        Ok(EmbedOutcome::Embedded)
    } else {
        Ok(EmbedOutcome::SkippedMissing)
    }
}

pub fn embed_message_by_id(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    message_id: &str,
) -> Result<EmbedOutcome> {
    let message = {
        let conn = crate::db::lock(db)?;
        get_message(&conn, message_id)?
    };
    match message {
        Some(message) => embed_message(db, provider, &message),
        None => Ok(EmbedOutcome::SkippedMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> Message {
        Message {
            id: "m".into(),
            chat_id: "c".into(),
            role: role.into(),
            content: content.into(),
            created_at: "t".into(),
            updated_at: "t".into(),
        }
    }

    #[test]
    fn roles() {
        assert!(is_embeddable_role("user"));
        assert!(is_embeddable_role("assistant"));
        assert!(!is_embeddable_role("system"));
        assert!(!is_embeddable_role("tool"));
        assert!(!is_embeddable_role("User"));
    }

    #[test]
    fn canonical_text_is_content_then_role() {
        let text = canonical_text(&message("user", "say \"hi\"")).unwrap();
        assert_eq!(text, r#"{"content":"say \"hi\"","role":"user"}"#);
    }
}
