//! Chat history: sessions, messages, and semantic search over them.
//!
//! Mirrors the knowledge-graph layout. Message inserts queue embedding jobs in
//! the same transaction; [`embed`] turns a message into a vector and [`search`]
//! ranks messages by cosine distance to a query.

pub mod embed;
pub mod search;
pub mod store;
pub mod types;
