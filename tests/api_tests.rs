//! Tests del router HTTP con backend en memoria.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use session_rag::api::{create_router, HealthResponse};
use session_rag::app_state::{self, Collaborators};
use session_rag::config::AppConfig;
use session_rag::error::GenerationError;
use session_rag::extract::DocumentTextExtractor;
use session_rag::llm::TextGenerator;
use session_rag::memory::{InMemoryRepository, InMemoryVectorIndex};

// =============================================================================
// Helpers
// =============================================================================

struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok("respuesta de prueba".to_string())
    }
}

fn make_app(dir: &tempfile::TempDir) -> Router {
    make_app_with(dir, |c| c)
}

fn make_app_with(dir: &tempfile::TempDir, config: impl FnOnce(AppConfig) -> AppConfig) -> Router {
    let config = config(AppConfig {
        storage_root: dir.path().to_path_buf(),
        generation_timeout: Duration::from_secs(2),
        ..AppConfig::default()
    });
    let runtime = app_state::build(
        config,
        Collaborators {
            repository: Arc::new(InMemoryRepository::new()),
            vector_index: Arc::new(InMemoryVectorIndex::new()),
            generator: Arc::new(EchoGenerator),
            extractor: Arc::new(DocumentTextExtractor),
        },
    );
    create_router(runtime.state)
}

fn json_request(method: &str, uri: &str, user: Uuid, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user.to_string())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str, user: Uuid) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user.to_string())
        .body(Body::empty())
        .unwrap()
}

fn multipart_request(uri: &str, user: Uuid, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "X-SESSION-RAG-BOUNDARY";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", user.to_string())
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_session(app: &Router, user: Uuid, name: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/sessions", user, &format!(r#"{{"name":"{name}"}}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn health_reports_backend_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.backend, "memory");
    assert_eq!(health.metrics.generation_failures, 0);
}

#[tokio::test]
async fn requests_without_caller_id_are_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);

    let response = app
        .clone()
        .oneshot(Request::get("/api/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/api/sessions")
                .header("x-user-id", "no-soy-un-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);
    let user = Uuid::new_v4();
    let id = create_session(&app, user, "Proyecto").await;

    let response = app
        .clone()
        .oneshot(json_request("PATCH", &format!("/api/sessions/{id}"), user, r#"{"name":"Renombrada"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "Renombrada");

    let response = app
        .clone()
        .oneshot(empty_request("POST", &format!("/api/sessions/{id}/favorite"), user))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["favorite"], true);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/sessions", user))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["message_count"], 0);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/sessions/{id}"), user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}"), user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_session_name_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);

    let response = app
        .oneshot(json_request("POST", "/api/sessions", Uuid::new_v4(), r#"{"name":"  "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "bad_request");
}

#[tokio::test]
async fn foreign_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);
    let id = create_session(&app, Uuid::new_v4(), "Ajena").await;

    let response = app
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}"), Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn message_turn_and_pagination() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);
    let user = Uuid::new_v4();
    let id = create_session(&app, user, "Chat").await;

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/sessions/{id}/messages"),
                user,
                &format!(r#"{{"content":"pregunta {i}"}}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let turn = body_json(response).await;
        assert_eq!(turn["message"]["sender"], "USER");
        assert_eq!(turn["response"]["sender"], "AI");
        assert_eq!(turn["response"]["content"], "respuesta de prueba");
        assert_eq!(
            turn["response"]["sequence"].as_i64().unwrap(),
            turn["message"]["sequence"].as_i64().unwrap() + 1
        );
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}/messages?page=1&size=4"), user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["total_elements"], 6);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["has_previous"], true);
    assert_eq!(page["has_next"], false);
    // Orden descendente: la segunda página empieza en la secuencia 2.
    assert_eq!(page["content"][0]["sequence"], 2);
    assert_eq!(page["content"][1]["sequence"], 1);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}/messages"), user))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["size"], 5);
    assert_eq!(page["content"][0]["sequence"], 6);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}/messages?size=101"), user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/api/sessions/{id}/messages?page={}", u32::MAX),
            user,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert!(page["content"].as_array().unwrap().is_empty());
    assert_eq!(page["has_next"], false);
    assert_eq!(page["has_previous"], true);
}

#[tokio::test]
async fn document_upload_list_reindex_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);
    let user = Uuid::new_v4();
    let id = create_session(&app, user, "Docs").await;

    let response = app
        .clone()
        .oneshot(multipart_request(
            &format!("/api/sessions/{id}/documents"),
            user,
            "manual.txt",
            b"Instrucciones de montaje del armario.",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let document = body_json(response).await;
    assert_eq!(document["original_filename"], "manual.txt");
    assert_eq!(document["status"], "PROCESSING");
    let doc_id = document["id"].as_str().unwrap().to_string();

    let mut status = Value::Null;
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(empty_request("GET", &format!("/api/sessions/{id}/documents"), user))
            .await
            .unwrap();
        let docs = body_json(response).await;
        status = docs[0]["status"].clone();
        if status == "READY" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, "READY");

    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/sessions/{id}/documents/{doc_id}/reindex"),
            user,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(empty_request(
            "DELETE",
            &format!("/api/sessions/{id}/documents/{doc_id}"),
            user,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(empty_request("GET", &format!("/api/sessions/{id}/documents"), user))
        .await
        .unwrap();
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_upload_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);
    let user = Uuid::new_v4();
    let id = create_session(&app, user, "Docs").await;

    let response = app
        .oneshot(multipart_request(&format!("/api/sessions/{id}/documents"), user, "vacio.txt", b""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shutdown_route_is_absent_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir);

    let response = app
        .oneshot(empty_request("POST", "/api/shutdown", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn enabled_shutdown_route_requires_a_caller() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app_with(&dir, |c| AppConfig {
        enable_shutdown_endpoint: true,
        ..c
    });

    let response = app
        .clone()
        .oneshot(Request::post("/api/shutdown").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(empty_request("POST", "/api/shutdown", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
