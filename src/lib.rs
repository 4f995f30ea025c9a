//! Relational memory for a personal assistant, served over MCP.
//!
//! Familiar keeps two stores in one SQLite database:
//!
//! | Store | Contents | Search |
//! |-------|----------|--------|
//! | **Knowledge graph** | Entities, directed relations, free-text observations | Vector, or hybrid vector + FTS5 |
//! | **Chat history** | Chats and their ordered messages | Vector over user/assistant messages |
//!
//! Observations are embedded together with their entity's relational context, so
//! "Alice knows Bob" shapes how a note about Alice is recalled. Embedding never
//! blocks a write: writes enqueue durable jobs that a background worker drains.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions) or
//!   any OpenAI-compatible endpoint
//! - **Transport**: MCP over stdio, or Streamable HTTP with embedding job routes
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`db`]: database initialization, schema, migrations, and health checks
//! - [`embedding`]: text-to-vector providers
//! - [`memory`]: knowledge graph store, enrichment, search, and graph assembly
//! - [`chat`]: chat and message store, embedding, and search
//! - [`jobs`]: durable embedding queue and its background worker
//! - [`service`]: async facade shared by the MCP tools and HTTP routes
//! - [`tools`]: MCP tool definitions and the typed request boundary
//! - [`server`]: stdio and HTTP entry points

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod server;
pub mod service;
pub mod tools;
