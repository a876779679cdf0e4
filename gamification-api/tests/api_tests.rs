//! In-process integration tests driving the full router via
//! `tower::ServiceExt::oneshot`, without a live TCP listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gamification_api::state::AppState;
use gamification_engine::event::EventDefinition;
use gamification_engine::EngineConfig;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn point_category_crud_roundtrip() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let create = request(
        "POST",
        "/api/point-categories",
        json!({ "id": "xp", "name": "Experience", "description": "", "aggregation": "sum" }),
    );
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.clone().oneshot(get("/api/point-categories/xp")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "xp");
    assert_eq!(body["aggregation"], "sum");

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/point-categories/xp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn badge_visible_filter_excludes_hidden_badges() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let visible = request(
        "POST",
        "/api/badges",
        json!({ "id": "first-login", "name": "First Login", "description": "", "image": "", "visible": true }),
    );
    let hidden = request(
        "POST",
        "/api/badges",
        json!({ "id": "secret", "name": "Secret", "description": "", "image": "", "visible": false }),
    );
    assert_eq!(app.clone().oneshot(visible).await.unwrap().status(), StatusCode::CREATED);
    assert_eq!(app.clone().oneshot(hidden).await.unwrap().status(), StatusCode::CREATED);

    let response = app.oneshot(get("/api/badges/visible")).await.unwrap();
    let body = body_json(response).await;
    let ids: Vec<&str> = body.as_array().unwrap().iter().map(|b| b["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"first-login"));
    assert!(!ids.contains(&"secret"));
}

#[tokio::test]
async fn ingest_event_rejects_unregistered_event_type() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let req = request(
        "POST",
        "/api/events",
        json!({ "eventType": "UNKNOWN_EVENT", "userId": "u1", "attributes": {} }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_event_then_fetch_by_id() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    state.catalog.put_event_definition(EventDefinition {
        id: "USER_LOGIN".into(),
        description: String::new(),
        payload_schema: Default::default(),
    });
    let app = gamification_api::build_router(state);

    let req = request(
        "POST",
        "/api/events",
        json!({ "eventId": "e1", "eventType": "USER_LOGIN", "userId": "u1", "attributes": {} }),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["eventId"], "e1");

    let response = app.oneshot(get("/api/events/e1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["userId"], "u1");
}

#[tokio::test]
async fn rule_activate_and_deactivate_round_trip() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let create = request(
        "POST",
        "/api/rules",
        json!({
            "id": "r1",
            "name": "First login bonus",
            "description": "",
            "isActive": false,
            "triggers": ["USER_LOGIN"],
            "conditions": [],
            "rewards": [],
            "spendings": [],
        }),
    );
    assert_eq!(app.clone().oneshot(create).await.unwrap().status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/rules/r1/activate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isActive"], true);

    let response = app.oneshot(get("/api/rules?active=true&trigger=USER_LOGIN")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn leaderboard_query_requires_category_for_points_kind() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let response = app.oneshot(get("/api/leaderboards?type=points")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_register_test_and_delete_round_trip() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    let app = gamification_api::build_router(state);

    let create = request("POST", "/api/webhooks", json!({ "url": "https://example.com/hook", "eventTypes": ["USER_LOGIN"] }));
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let webhook = body_json(response).await;
    let id = webhook["id"].as_str().unwrap().to_string();

    let test_uri = format!("/api/webhooks/{id}/test");
    let response = app
        .clone()
        .oneshot(Request::builder().method("POST").uri(&test_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["delivered"], true);

    let delete_uri = format!("/api/webhooks/{id}");
    let response = app
        .oneshot(Request::builder().method("DELETE").uri(&delete_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
