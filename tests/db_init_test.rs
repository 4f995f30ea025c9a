mod helpers;

use familiar::db::{self, migrations};
use familiar::memory::store::{add_observations, create_entities};
use helpers::{count, entity, observation};

fn table_names(conn: &rusqlite::Connection) -> Vec<String> {
    conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn open_database_creates_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("familiar.db");

    let conn = db::open_database(&path).unwrap();
    assert!(path.exists());

    let tables = table_names(&conn);
    for expected in [
        "entities",
        "relations",
        "observations",
        "observations_fts",
        "observation_embeddings",
        "chats",
        "messages",
        "message_embeddings",
        "embedding_jobs",
        "schema_meta",
    ] {
        assert!(tables.contains(&expected.to_string()), "{expected} table missing");
    }

    assert_eq!(
        migrations::get_schema_version(&conn).unwrap(),
        migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn reopening_keeps_data_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("familiar.db");

    {
        let mut conn = db::open_database(&path).unwrap();
        let a = create_entities(&mut conn, &[entity("Alice", "person")]).unwrap()[0].id;
        add_observations(&mut conn, &[observation(Some(a), "likes tea")]).unwrap();
        migrations::set_embedding_model(&conn, "custom-model").unwrap();
    }

    let conn = db::open_database(&path).unwrap();
    assert_eq!(count(&conn, "entities"), 1);
    assert_eq!(count(&conn, "observations"), 1);
    assert_eq!(count(&conn, "embedding_jobs"), 1);
    assert_eq!(
        migrations::get_embedding_model(&conn).unwrap().as_deref(),
        Some("custom-model")
    );
}

#[test]
fn foreign_keys_are_enforced_on_file_databases() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open_database(dir.path().join("familiar.db")).unwrap();
    let result = conn.execute(
        "INSERT INTO observations (entity_id, content, created_at) VALUES (999, 'orphan', 'now')",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn health_report_counts_rows() {
    let mut conn = db::open_memory_database().unwrap();
    let a = create_entities(&mut conn, &[entity("Alice", "person")]).unwrap()[0].id;
    add_observations(&mut conn, &[observation(Some(a), "likes tea")]).unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.entity_count, 1);
    assert_eq!(report.observation_count, 1);
    assert_eq!(report.observation_embedding_count, 0);
    assert_eq!(report.pending_jobs, 1);
    assert!(!report.sqlite_vec_version.is_empty());
}

#[test]
fn timestamps_are_fixed_width_utc() {
    let ts = db::now_timestamp();
    assert!(ts.ends_with('Z'));
    assert_eq!(ts.len(), "2026-01-01T00:00:00.000Z".len());
}
