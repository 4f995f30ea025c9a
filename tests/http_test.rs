mod helpers;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use familiar::chat::store::{create_chat, insert_messages};
use familiar::chat::types::NewMessage;
use familiar::config::FamiliarConfig;
use familiar::jobs::worker::JobSignal;
use familiar::server::router;
use familiar::service::Services;
use helpers::{shared, test_db, ConceptEmbedder};
use tower::ServiceExt;

fn services(api_key: Option<&str>) -> Services {
    let mut config = FamiliarConfig::default();
    config.server.api_key = api_key.map(str::to_string);
    Services::new(
        shared(test_db()),
        Arc::new(ConceptEmbedder),
        Arc::new(config),
        JobSignal::new(),
    )
}

fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn seed_chat(services: &Services) -> (String, Vec<String>) {
    let mut conn = services.db().lock().unwrap();
    let chat = create_chat(&conn, None).unwrap();
    let messages = insert_messages(
        &mut conn,
        &chat.id,
        &[
            NewMessage {
                role: "user".into(),
                content: "hello".into(),
            },
            NewMessage {
                role: "system".into(),
                content: "be brief".into(),
            },
        ],
    )
    .unwrap();
    (chat.id, messages.into_iter().map(|m| m.id).collect())
}

#[tokio::test]
async fn missing_key_is_unauthorized() {
    let app = router(services(Some("secret")));
    let body = serde_json::json!({ "messageIds": [] });

    let response = app
        .oneshot(
            post("/jobs/message_embeddings")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_key_is_unauthorized() {
    let app = router(services(Some("secret")));
    let body = serde_json::json!({ "messageIds": [] });

    let response = app
        .oneshot(
            post("/jobs/message_embeddings")
                .header("x-api-key", "guess")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn message_job_is_accepted_with_a_valid_key() {
    let services = services(Some("secret"));
    let (_, message_ids) = seed_chat(&services);
    let app = router(services);
    let body = serde_json::json!({ "messageIds": [message_ids[0], "unknown"] });

    let response = app
        .oneshot(
            post("/jobs/message_embeddings")
                .header("authorization", "Bearer secret")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["accepted"], true);
    assert_eq!(json["queued"], 1);
}

#[tokio::test]
async fn chat_job_for_unknown_chat_is_not_found() {
    let app = router(services(None));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chats/does-not-exist/embeddings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], "not_found");
}

#[tokio::test]
async fn chat_job_queues_only_embeddable_messages() {
    let services = services(None);
    let (chat_id, _) = seed_chat(&services);
    let app = router(services);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/chats/{chat_id}/embeddings"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["queued"], 1);
}

#[tokio::test]
async fn memory_backfill_returns_immediately_without_a_count() {
    let app = router(services(None));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs/memory_embeddings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["accepted"], true);
    assert!(json.get("queued").is_none());
}
