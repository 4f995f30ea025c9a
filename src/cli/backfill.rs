//! CLI `backfill` command: re-embed every observation with the current model.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

use familiar::config::FamiliarConfig;
use familiar::db;
use familiar::embedding;
use familiar::jobs;
use familiar::memory::embed::embed_all_observations;

/// Re-embed all observations, then drain any queued message jobs.
pub async fn backfill(config: &FamiliarConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path).context("failed to open database")?;
    let db = Arc::new(Mutex::new(conn));

    let provider = embedding::load_provider(&config.embedding)
        .await
        .context("failed to create embedding provider")?;

    println!(
        "Re-embedding observations with model '{}'...",
        provider.model_name()
    );

    let pb = super::bar(0, "  {bar:40.cyan/blue} {pos}/{len} ({eta})")?;
    let report = {
        let db = Arc::clone(&db);
        let provider = Arc::clone(&provider);
        let pb = pb.clone();
        tokio::task::spawn_blocking(move || {
            embed_all_observations(&db, provider.as_ref(), |done, total| {
                pb.set_length(total as u64);
                pb.set_position(done as u64);
            })
        })
        .await??
    };
    pb.finish_and_clear();

    println!(
        "Observations: {} total, {} embedded, {} skipped (no entity), {} failed",
        report.total, report.embedded, report.skipped, report.failed
    );

    if report.failed == 0 {
        let conn = db::lock(&db)?;
        db::migrations::set_embedding_model(&conn, provider.model_name())?;
    } else {
        println!("Some observations failed; the stored model name was left unchanged.");
    }

    let drained = {
        let db = Arc::clone(&db);
        let jobs_config = config.jobs.clone();
        tokio::task::spawn_blocking(move || {
            jobs::drain_pending(&db, provider.as_ref(), &jobs_config)
        })
        .await??
    };
    if drained.embedded + drained.failed > 0 {
        println!(
            "Queued jobs: {} embedded, {} failed, {} dead",
            drained.embedded, drained.failed, drained.dead
        );
    }

    Ok(())
}
