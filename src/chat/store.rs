//! Chat and message persistence.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::embed::is_embeddable_role;
use super::types::{Chat, ChatSummary, Message, NewMessage};
use crate::error::{Error, Result};
use crate::jobs::{self, JobKind};
use crate::memory::placeholders;

pub(crate) const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at, updated_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSummary> {
    Ok(ChatSummary {
        chat: Chat {
            id: row.get(0)?,
            session_id: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        },
        message_count: row.get(4)?,
    })
}

const SUMMARY_SELECT: &str = "SELECT c.id, c.session_id, c.created_at, c.updated_at, COUNT(m.id) \
     FROM chats c LEFT JOIN messages m ON m.chat_id = c.id";

pub fn create_chat(conn: &Connection, session_id: Option<&str>) -> Result<Chat> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = crate::db::now_timestamp();
    conn.execute(
        "INSERT INTO chats (id, session_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![id, session_id, now],
    )?;
    tracing::info!(chat = %id, "chat created");
    Ok(Chat {
        id,
        session_id: session_id.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// A chat with its message count, or `None` if it does not exist.
pub fn get_chat(conn: &Connection, id: &str) -> Result<Option<ChatSummary>> {
    let chat = conn
        .query_row(
            &format!("{SUMMARY_SELECT} WHERE c.id = ?1 GROUP BY c.id"),
            params![id],
            summary_from_row,
        )
        .optional()?;
    Ok(chat)
}

/// All chats, most recently updated first.
pub fn list_chats(conn: &Connection) -> Result<Vec<ChatSummary>> {
    let chats = conn
        .prepare(&format!(
            "{SUMMARY_SELECT} GROUP BY c.id ORDER BY c.updated_at DESC, c.id DESC"
        ))?
        .query_map([], summary_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(chats)
}

/// Delete a chat, its messages and their vectors. Returns `false` if the chat
/// did not exist.
pub fn delete_chat(conn: &mut Connection, id: &str) -> Result<bool> {
    let tx = conn.transaction()?;

    let message_ids: Vec<String> = tx
        .prepare("SELECT id FROM messages WHERE chat_id = ?1")?
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    {
        let mut stmt = tx.prepare("DELETE FROM message_embeddings WHERE message_id = ?1")?;
        for message_id in &message_ids {
            stmt.execute(params![message_id])?;
        }
    }
    jobs::discard(&tx, JobKind::Message, &message_ids)?;

    let deleted = tx.execute("DELETE FROM chats WHERE id = ?1", params![id])? > 0;
    tx.commit()?;

    if deleted {
        tracing::info!(chat = %id, messages = message_ids.len(), "chat deleted");
    }
    Ok(deleted)
}

/// Messages of a chat in insertion order.
pub fn list_messages(conn: &Connection, chat_id: &str) -> Result<Vec<Message>> {
    let messages = conn
        .prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at, rowid"
        ))?
        .query_map(params![chat_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn get_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let message = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            message_from_row,
        )
        .optional()?;
    Ok(message)
}

/// Append messages to a chat and queue embedding for the user and assistant
/// ones. The insert never depends on the embedding outcome.
pub fn insert_messages(
    conn: &mut Connection,
    chat_id: &str,
    batch: &[NewMessage],
) -> Result<Vec<Message>> {
    let tx = conn.transaction()?;
    let exists = tx
        .query_row("SELECT 1 FROM chats WHERE id = ?1", params![chat_id], |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        return Err(Error::NotFound(format!("chat {chat_id}")));
    }
    if batch.is_empty() {
        return Ok(vec![]);
    }

    let now = crate::db::now_timestamp();
    let mut inserted = Vec::with_capacity(batch.len());
    let mut queued = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO messages (id, chat_id, role, content, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )?;
        for message in batch {
            let id = uuid::Uuid::now_v7().to_string();
            stmt.execute(params![id, chat_id, message.role, message.content, now])?;
            if is_embeddable_role(&message.role) {
                jobs::enqueue(&tx, JobKind::Message, &id)?;
                queued += 1;
            }
            inserted.push(Message {
                id,
                chat_id: chat_id.to_string(),
                role: message.role.clone(),
                content: message.content.clone(),
                created_at: now.clone(),
                updated_at: now.clone(),
            });
        }
    }
    tx.execute(
        "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
        params![now, chat_id],
    )?;
    tx.commit()?;

    tracing::info!(chat = %chat_id, count = inserted.len(), queued, "messages inserted");
    Ok(inserted)
}

/// Queue embedding for the given message ids. Unknown ids are ignored.
/// Returns how many jobs were queued.
pub fn enqueue_messages(conn: &mut Connection, message_ids: &[String]) -> Result<usize> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let tx = conn.transaction()?;
    let known: Vec<String> = tx
        .prepare(&format!(
            "SELECT id FROM messages WHERE id IN ({})",
            placeholders(message_ids.len())
        ))?
        .query_map(params_from_iter(message_ids.iter()), |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for id in &known {
        jobs::enqueue(&tx, JobKind::Message, id)?;
    }
    tx.commit()?;
    Ok(known.len())
}

/// Queue embedding for every user and assistant message of a chat that has no
/// vector yet.
pub fn enqueue_chat_messages(conn: &mut Connection, chat_id: &str) -> Result<usize> {
    if get_chat(conn, chat_id)?.is_none() {
        return Err(Error::NotFound(format!("chat {chat_id}")));
    }
    let tx = conn.transaction()?;
    let pending: Vec<(String, String)> = tx
        .prepare(
            "SELECT m.id, m.role FROM messages m \
             WHERE m.chat_id = ?1 \
               AND NOT EXISTS (SELECT 1 FROM message_embeddings e WHERE e.message_id = m.id) \
             ORDER BY m.created_at, m.rowid",
        )?
        .query_map(params![chat_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut queued = 0;
    for (id, role) in &pending {
        if is_embeddable_role(role) {
            jobs::enqueue(&tx, JobKind::Message, id)?;
            queued += 1;
        }
    }
    tx.commit()?;

    tracing::info!(chat = %chat_id, queued, "chat messages queued for embedding");
    Ok(queued)
}
