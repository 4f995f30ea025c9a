//! Durable embedding job queue.
//!
//! Writes enqueue a job in the same transaction as the rows they create, so a
//! committed observation or message always has a pending embedding request and
//! the write never depends on the embedding outcome. [`drain_pending`] runs the
//! jobs; [`worker`] drives it from a background task.

pub mod worker;

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::config::JobsConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::memory::placeholders;

/// Jobs claimed but not finished become claimable again after this long.
const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// What a job embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Observation,
    Message,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Message => "message",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "observation" => Ok(Self::Observation),
            "message" => Ok(Self::Message),
            _ => Err(format!("unknown job kind: {s}")),
        }
    }
}

/// A claimed job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub target_id: String,
    pub attempts: u32,
    /// Bumped on every re-enqueue. Settling a job only touches the row if it
    /// still carries the generation that was claimed.
    pub generation: i64,
}

/// Result of running one embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedOutcome {
    /// A vector was written.
    Embedded,
    /// Observation has no entity, so it stays out of semantic search.
    SkippedDetached,
    /// Message role is not user/assistant.
    SkippedRole,
    /// Message already has a vector.
    SkippedExisting,
    /// The row was deleted before it could be embedded.
    SkippedMissing,
}

/// Counts from one [`drain_pending`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Jobs that exhausted their attempts during this run.
    pub dead: usize,
}

/// Retry schedule for failed jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl From<&JobsConfig> for RetryPolicy {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failures: `base * 2^(attempts-1)`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

fn timestamp_after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
    (Utc::now() + delay).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Queue (or re-arm) an embedding job. Repeated enqueues for the same target
/// coalesce into one job with its attempts reset and its generation bumped, so
/// a drain still holding the old claim cannot settle the re-armed job.
pub fn enqueue(conn: &Connection, kind: JobKind, target_id: &str) -> Result<()> {
    let now = crate::db::now_timestamp();
    conn.execute(
        "INSERT INTO embedding_jobs (kind, target_id, attempts, available_at, created_at) \
         VALUES (?1, ?2, 0, ?3, ?3) \
         ON CONFLICT(kind, target_id) DO UPDATE SET \
             attempts = 0, last_error = NULL, available_at = excluded.available_at, \
             generation = embedding_jobs.generation + 1",
        params![kind.as_str(), target_id, now],
    )?;
    Ok(())
}

/// Queue re-embedding of every observation attached to the given entities.
///
/// Used when relations touching those entities change, since the embedded
/// text includes the entity's relations.
pub fn enqueue_observations_of_entities(conn: &Connection, entity_ids: &[i64]) -> Result<usize> {
    if entity_ids.is_empty() {
        return Ok(0);
    }
    let now = crate::db::now_timestamp();
    let sql = format!(
        "INSERT INTO embedding_jobs (kind, target_id, attempts, available_at, created_at) \
         SELECT 'observation', CAST(id AS TEXT), 0, ?1, ?1 FROM observations \
         WHERE entity_id IN ({}) \
         ON CONFLICT(kind, target_id) DO UPDATE SET \
             attempts = 0, last_error = NULL, available_at = excluded.available_at, \
             generation = embedding_jobs.generation + 1",
        placeholders(entity_ids.len())
    );
    let mut values: Vec<rusqlite::types::Value> = vec![now.into()];
    values.extend(entity_ids.iter().map(|id| rusqlite::types::Value::Integer(*id)));
    let queued = conn.execute(&sql, params_from_iter(values))?;
    Ok(queued)
}

/// Drop queued jobs for targets that no longer exist.
pub fn discard(conn: &Connection, kind: JobKind, target_ids: &[String]) -> Result<usize> {
    if target_ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM embedding_jobs WHERE kind = ? AND target_id IN ({})",
        placeholders(target_ids.len())
    );
    let mut values: Vec<&str> = vec![kind.as_str()];
    values.extend(target_ids.iter().map(String::as_str));
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

/// Claim up to `limit` due jobs, oldest first, leasing them so a concurrent
/// drain does not pick them up again.
pub fn claim_due(conn: &mut Connection, limit: usize, max_attempts: u32) -> Result<Vec<Job>> {
    let tx = conn.transaction()?;
    let now = crate::db::now_timestamp();

    let jobs = {
        let mut stmt = tx.prepare(
            "SELECT id, kind, target_id, attempts, generation FROM embedding_jobs \
             WHERE available_at <= ?1 AND attempts < ?2 \
             ORDER BY available_at, id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![now, max_attempts, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, kind, target_id, attempts, generation) in rows {
            match kind.parse::<JobKind>() {
                Ok(kind) => jobs.push(Job {
                    id,
                    kind,
                    target_id,
                    attempts,
                    generation,
                }),
                Err(e) => tracing::warn!(job = id, error = %e, "skipping malformed job"),
            }
        }
        jobs
    };

    let lease_until = timestamp_after(CLAIM_LEASE);
    for job in &jobs {
        tx.execute(
            "UPDATE embedding_jobs SET available_at = ?1 WHERE id = ?2",
            params![lease_until, job.id],
        )?;
    }
    tx.commit()?;

    Ok(jobs)
}

/// Remove a finished job. Returns `false` if the job was re-enqueued after it
/// was claimed; it then stays queued and runs again against fresh context.
pub fn complete(conn: &Connection, job: &Job) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM embedding_jobs WHERE id = ?1 AND generation = ?2",
        params![job.id, job.generation],
    )?;
    Ok(removed > 0)
}

/// Record a failed attempt and reschedule. Returns `true` when the job has
/// exhausted its attempts and will not be claimed again. A job re-enqueued
/// since its claim keeps its reset attempts and is never reported dead.
pub fn fail(conn: &Connection, job: &Job, error: &str, policy: &RetryPolicy) -> Result<bool> {
    let attempts = job.attempts + 1;
    let available_at = timestamp_after(policy.backoff(attempts));
    let updated = conn.execute(
        "UPDATE embedding_jobs SET attempts = ?1, last_error = ?2, available_at = ?3 \
         WHERE id = ?4 AND generation = ?5",
        params![attempts, error, available_at, job.id, job.generation],
    )?;
    Ok(updated > 0 && attempts >= policy.max_attempts)
}

/// Number of jobs still eligible to run.
pub fn pending_count(conn: &Connection, max_attempts: u32) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM embedding_jobs WHERE attempts < ?1",
        params![max_attempts],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Number of jobs that exhausted their attempts.
pub fn dead_count(conn: &Connection, max_attempts: u32) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM embedding_jobs WHERE attempts >= ?1",
        params![max_attempts],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Run every due job until none remain.
///
/// The database lock is held only to claim and settle jobs, never across a
/// provider call.
pub fn drain_pending(
    db: &Mutex<Connection>,
    provider: &dyn EmbeddingProvider,
    config: &JobsConfig,
) -> Result<DrainReport> {
    let policy = RetryPolicy::from(config);
    let batch_size = config.batch_size.max(1);
    let mut report = DrainReport::default();
    let mut dead: HashSet<i64> = HashSet::new();

    loop {
        let jobs = {
            let mut conn = crate::db::lock(db)?;
            claim_due(&mut conn, batch_size, policy.max_attempts)?
        };
        if jobs.is_empty() {
            break;
        }

        for job in jobs {
            let outcome = run_job(db, provider, &job);
            let conn = crate::db::lock(db)?;
            match outcome {
                Ok(EmbedOutcome::Embedded) => {
                    if !complete(&conn, &job)? {
                        tracing::debug!(kind = job.kind.as_str(), target = %job.target_id, "job re-enqueued while running, kept");
                    }
                    report.embedded += 1;
                }
                Ok(skipped) => {
                    tracing::debug!(kind = job.kind.as_str(), target = %job.target_id, ?skipped, "embedding skipped");
                    complete(&conn, &job)?;
                    report.skipped += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    report.failed += 1;
                    if fail(&conn, &job, &message, &policy)? {
                        tracing::error!(
                            kind = job.kind.as_str(),
                            target = %job.target_id,
                            attempts = job.attempts + 1,
                            error = %message,
                            "embedding job exhausted its attempts"
                        );
                        if dead.insert(job.id) {
                            report.dead += 1;
                        }
                    } else {
                        tracing::warn!(
                            kind = job.kind.as_str(),
                            target = %job.target_id,
                            attempts = job.attempts + 1,
                            error = %message,
                            "embedding job failed, will retry"
                        );
                    }
                }
            }
        }
    }

    if report != DrainReport::default() {
        tracing::info!(
            embedded = report.embedded,
            skipped = report.skipped,
            failed = report.failed,
            dead = report.dead,
            "embedding jobs drained"
        );
    }
    Ok(report)
}

fn run_job(db: &Mutex<Connection>, provider: &dyn EmbeddingProvider, job: &Job) -> Result<EmbedOutcome> {
    match job.kind {
        JobKind::Observation => match job.target_id.parse::<i64>() {
            Ok(id) => crate::memory::embed::embed_observation_by_id(db, provider, id),
            Err(_) => Ok(EmbedOutcome::SkippedMissing),
        },
        JobKind::Message => crate::chat::embed::embed_message_by_id(db, provider, &job.target_id),
    }
}
