//! Async facade over the store, search, and job modules.
//!
//! [`Services`] owns the shared state and runs the synchronous store code on
//! the blocking pool. Both the MCP tool handler and the HTTP job routes go
//! through it.

use std::sync::Arc;

use rusqlite::Connection;

use crate::chat;
use crate::config::FamiliarConfig;
use crate::db::SharedConnection;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::jobs::worker::JobSignal;
use crate::memory::{self, search::HybridOptions};
use crate::tools::request::{Request, Response};

#[derive(Clone)]
pub struct Services {
    db: SharedConnection,
    embedding: Arc<dyn EmbeddingProvider>,
    config: Arc<FamiliarConfig>,
    signal: JobSignal,
}

impl Services {
    pub fn new(
        db: SharedConnection,
        embedding: Arc<dyn EmbeddingProvider>,
        config: Arc<FamiliarConfig>,
        signal: JobSignal,
    ) -> Self {
        Self {
            db,
            embedding,
            config,
            signal,
        }
    }

    pub fn db(&self) -> &SharedConnection {
        &self.db
    }

    pub fn config(&self) -> &FamiliarConfig {
        &self.config
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = crate::db::lock(&db)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("db task failed: {e}")))?
    }

    /// Embed text on the blocking pool.
    async fn embed(&self, text: String) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.embedding);
        tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("embedding task failed: {e}")))?
            .map_err(Error::upstream)
    }

    /// Validate and execute one boundary request.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        request.validate()?;
        tracing::info!(tool = request.name(), "request");

        let response = match request {
            Request::MemoryCreateEntities(p) => Response::Entities(
                self.with_conn(move |c| memory::store::create_entities(c, &p.entities))
                    .await?,
            ),
            Request::MemoryCreateRelations(p) => {
                let relations = self
                    .with_conn(move |c| memory::store::create_relations(c, &p.relations))
                    .await?;
                self.signal.notify();
                Response::Relations(relations)
            }
            Request::MemoryAddObservations(p) => {
                let ids = self
                    .with_conn(move |c| memory::store::add_observations(c, &p.observations))
                    .await?;
                self.signal.notify();
                Response::ObservationIds { ids }
            }
            Request::MemoryDeleteEntities(p) => {
                let deleted = self
                    .with_conn(move |c| memory::store::delete_entities(c, &p.ids))
                    .await?;
                self.signal.notify();
                Response::Deleted { deleted }
            }
            Request::MemoryDeleteObservations(p) => Response::Deleted {
                deleted: self
                    .with_conn(move |c| memory::store::delete_observations(c, &p.ids))
                    .await?,
            },
            Request::MemoryDeleteRelations(p) => {
                let deleted = self
                    .with_conn(move |c| memory::store::delete_relations(c, &p.ids))
                    .await?;
                self.signal.notify();
                Response::Deleted { deleted }
            }
            Request::MemoryReadGraph => {
                Response::Graph(self.with_conn(|c| memory::store::read_graph(c)).await?)
            }
            Request::MemoryListEntities => {
                Response::EntityList(self.with_conn(|c| memory::store::list_entities(c)).await?)
            }
            Request::MemorySearchNodes(p) => {
                let retrieval = &self.config.retrieval;
                let k = p.k.unwrap_or(retrieval.default_k);
                let probe = p.probe.unwrap_or(retrieval.default_probe);
                let embedding = self.embed(p.query.clone()).await?;
                if p.hybrid.unwrap_or(false) {
                    let options = HybridOptions::from_config(retrieval, k, probe);
                    let query = p.query;
                    Response::Ranked(
                        self.with_conn(move |c| {
                            memory::search::hybrid_search(c, &embedding, &query, &options)
                        })
                        .await?,
                    )
                } else {
                    Response::Observations(
                        self.with_conn(move |c| {
                            memory::search::find_similar_observations(c, &embedding, k, probe)
                        })
                        .await?,
                    )
                }
            }
            Request::MemoryOpenNodes(p) => Response::Nodes(
                self.with_conn(move |c| memory::graph::open_nodes(c, &p.entity_names))
                    .await?,
            ),
            Request::MemoryEmbedAll => {
                self.start_backfill();
                Response::Accepted {
                    accepted: true,
                    queued: None,
                }
            }
            Request::ChatCreate(p) => Response::Chat(
                self.with_conn(move |c| chat::store::create_chat(c, p.session_id.as_deref()))
                    .await?,
            ),
            Request::ChatGet(p) => {
                let id = p.id;
                let chat = self
                    .with_conn({
                        let id = id.clone();
                        move |c| chat::store::get_chat(c, &id)
                    })
                    .await?;
                match chat {
                    Some(chat) => Response::ChatSummary(chat),
                    None => return Err(Error::NotFound(format!("chat {id}"))),
                }
            }
            Request::ChatList => {
                Response::Chats(self.with_conn(|c| chat::store::list_chats(c)).await?)
            }
            Request::ChatDelete(p) => {
                let deleted = self
                    .with_conn(move |c| chat::store::delete_chat(c, &p.id))
                    .await?;
                Response::Deleted {
                    deleted: usize::from(deleted),
                }
            }
            Request::ChatListMessages(p) => Response::Messages(
                self.with_conn(move |c| chat::store::list_messages(c, &p.id))
                    .await?,
            ),
            Request::ChatAddMessages(p) => {
                let messages = self
                    .with_conn(move |c| chat::store::insert_messages(c, &p.chat_id, &p.messages))
                    .await?;
                self.signal.notify();
                Response::Messages(messages)
            }
            Request::ChatSearch(p) => {
                let limit = p.limit.unwrap_or(self.config.retrieval.chat_search_limit);
                let db = Arc::clone(&self.db);
                let provider = Arc::clone(&self.embedding);
                let hits = tokio::task::spawn_blocking(move || {
                    chat::search::search_messages(&db, provider.as_ref(), &p.query, limit)
                })
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("chat search task failed: {e}")))??;
                Response::MessageHits(hits)
            }
            Request::ChatEmbedMessages(p) => {
                let queued = self.enqueue_chat(p.chat_id).await?;
                Response::Accepted {
                    accepted: true,
                    queued: Some(queued),
                }
            }
        };
        Ok(response)
    }

    /// Queue embedding for specific messages and wake the worker.
    pub async fn enqueue_messages(&self, message_ids: Vec<String>) -> Result<usize> {
        let queued = self
            .with_conn(move |c| chat::store::enqueue_messages(c, &message_ids))
            .await?;
        self.signal.notify();
        Ok(queued)
    }

    /// Queue embedding for a chat's unembedded messages and wake the worker.
    pub async fn enqueue_chat(&self, chat_id: String) -> Result<usize> {
        let queued = self
            .with_conn(move |c| chat::store::enqueue_chat_messages(c, &chat_id))
            .await?;
        self.signal.notify();
        Ok(queued)
    }

    /// Re-embed every observation in the background. Returns immediately.
    pub fn start_backfill(&self) {
        let db = Arc::clone(&self.db);
        let provider = Arc::clone(&self.embedding);
        tokio::task::spawn_blocking(move || {
            tracing::info!("observation backfill started");
            match memory::embed::embed_all_observations(&db, provider.as_ref(), |_, _| {}) {
                Ok(report) if report.failed == 0 => {
                    if let Ok(conn) = crate::db::lock(&db) {
                        if let Err(e) =
                            crate::db::migrations::set_embedding_model(&conn, provider.model_name())
                        {
                            tracing::warn!(error = %e, "failed to record embedding model");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "observation backfill failed"),
            }
        });
    }
}
