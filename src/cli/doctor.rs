//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use familiar::config::FamiliarConfig;
use familiar::db;
use familiar::jobs;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &FamiliarConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `familiar serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let max_attempts = config.jobs.max_attempts;
    let pending = jobs::pending_count(&conn, max_attempts)?;
    let dead = jobs::dead_count(&conn, max_attempts)?;

    println!("Familiar Health Report");
    println!("======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!(
        "  Stored:          {}",
        report.embedding_model.as_deref().unwrap_or("(not set)")
    );
    println!("  Configured:      {}", config.embedding.model);
    if let Some(ref stored) = report.embedding_model {
        if stored != &config.embedding.model {
            println!("  WARNING: model mismatch! Run `familiar backfill` to update vectors.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Knowledge graph:");
    println!("  Entities:        {}", report.entity_count);
    println!("  Relations:       {}", report.relation_count);
    println!(
        "  Observations:    {} ({} embedded)",
        report.observation_count, report.observation_embedding_count
    );
    println!();
    println!("Chats:");
    println!("  Chats:           {}", report.chat_count);
    println!(
        "  Messages:        {} ({} embedded)",
        report.message_count, report.message_embedding_count
    );
    println!();
    println!("Embedding jobs:");
    println!("  Pending:         {pending}");
    println!("  Dead:            {dead}");
    if dead > 0 {
        println!("  {dead} job(s) exhausted their retries; check the provider, then run `familiar backfill`.");
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore the database file from a backup, then run `familiar backfill`.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
