mod helpers;

use familiar::config::JobsConfig;
use familiar::jobs::{self, drain_pending, EmbedOutcome};
use familiar::memory::embed::{embed_all_observations, embed_observation_by_id};
use familiar::memory::store::{add_observations, create_entities, create_relations};
use helpers::{count, entity, observation, relation, shared, test_db, ConceptEmbedder, RecordingEmbedder};

fn fast_jobs() -> JobsConfig {
    JobsConfig {
        retry_base_delay_ms: 0,
        ..JobsConfig::default()
    }
}

#[test]
fn backfill_embeds_every_attached_observation() {
    let mut conn = test_db();
    let a = create_entities(&mut conn, &[entity("Alice", "person")]).unwrap()[0].id;
    add_observations(
        &mut conn,
        &[
            observation(Some(a), "likes tea"),
            observation(Some(a), "plays chess"),
            observation(Some(a), "lives in Lisbon"),
            observation(Some(a), "works at Acme"),
            observation(Some(a), "has a cat"),
        ],
    )
    .unwrap();
    let db = shared(conn);

    let mut progress = Vec::new();
    let report = embed_all_observations(&db, &ConceptEmbedder, |done, total| {
        progress.push((done, total))
    })
    .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.embedded, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(progress.last(), Some(&(5, 5)));
    assert_eq!(count(&db.lock().unwrap(), "observation_embeddings"), 5);
}

#[test]
fn detached_observation_gets_no_vector() {
    let mut conn = test_db();
    let ids = add_observations(&mut conn, &[observation(None, "floating thought")]).unwrap();
    let db = shared(conn);

    let outcome = embed_observation_by_id(&db, &ConceptEmbedder, ids[0]).unwrap();
    assert_eq!(outcome, EmbedOutcome::SkippedDetached);

    let report = embed_all_observations(&db, &ConceptEmbedder, |_, _| {}).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(count(&db.lock().unwrap(), "observation_embeddings"), 0);
}

#[test]
fn re_embedding_overwrites_instead_of_duplicating() {
    let mut conn = test_db();
    let a = create_entities(&mut conn, &[entity("Alice", "person")]).unwrap()[0].id;
    let ids = add_observations(&mut conn, &[observation(Some(a), "likes tea")]).unwrap();
    let db = shared(conn);

    for _ in 0..3 {
        embed_observation_by_id(&db, &ConceptEmbedder, ids[0]).unwrap();
    }
    assert_eq!(count(&db.lock().unwrap(), "observation_embeddings"), 1);
}

#[test]
fn embedded_text_carries_relational_context() {
    let mut conn = test_db();
    let people =
        create_entities(&mut conn, &[entity("A", "person"), entity("B", "person")]).unwrap();
    let (a, b) = (people[0].id, people[1].id);
    let ids = add_observations(&mut conn, &[observation(Some(b), "plays chess")]).unwrap();
    create_relations(&mut conn, &[relation(a, b, "knows")]).unwrap();
    let db = shared(conn);

    let recorder = RecordingEmbedder::default();
    embed_observation_by_id(&db, &recorder, ids[0]).unwrap();

    let texts = recorder.texts.lock().unwrap();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0], "plays chess\nEntity: B (person)\nA knows B");
}

#[test]
fn queued_writes_are_embedded_by_a_drain() {
    let mut conn = test_db();
    let a = create_entities(&mut conn, &[entity("Alice", "person")]).unwrap()[0].id;
    add_observations(
        &mut conn,
        &[observation(Some(a), "likes tea"), observation(None, "loose")],
    )
    .unwrap();
    let db = shared(conn);

    let report = drain_pending(&db, &ConceptEmbedder, &fast_jobs()).unwrap();
    assert_eq!(report.embedded, 1);
    assert_eq!(report.failed, 0);

    let conn = db.lock().unwrap();
    assert_eq!(count(&conn, "observation_embeddings"), 1);
    assert_eq!(jobs::pending_count(&conn, 3).unwrap(), 0);
}

#[test]
fn new_relation_refreshes_neighbor_vectors() {
    let mut conn = test_db();
    let people =
        create_entities(&mut conn, &[entity("A", "person"), entity("B", "person")]).unwrap();
    let (a, b) = (people[0].id, people[1].id);
    add_observations(&mut conn, &[observation(Some(b), "plays chess")]).unwrap();
    let db = shared(conn);
    drain_pending(&db, &ConceptEmbedder, &fast_jobs()).unwrap();

    create_relations(&mut db.lock().unwrap(), &[relation(a, b, "knows")]).unwrap();

    let recorder = RecordingEmbedder::default();
    let report = drain_pending(&db, &recorder, &fast_jobs()).unwrap();
    assert_eq!(report.embedded, 1);
    assert!(recorder.texts.lock().unwrap()[0].ends_with("A knows B"));
}
