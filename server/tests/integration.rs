//! Integration tests for the speech cache HTTP surface

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::*;

const HELLO_FILE: &str = "7b502c3a1f48c8609ae212cdfb639dee39673f5e_en_-_fake.mp3";

#[tokio::test]
async fn test_health_check() {
    let test = create_test_app().await;
    for uri in ["/health", "/healthz", "/api/health"] {
        let response = get(&test.app, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_bytes(response).await, "ok");
    }
}

#[tokio::test]
async fn test_get_url_and_proxy() {
    let test = create_test_app().await;
    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hello world", "language": "en" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let path = format!("/api/tts_proxy/{HELLO_FILE}");
    assert_eq!(body["path"], path);
    assert_eq!(body["url"], format!("http://speech.local:8085{path}"));

    let response = get(&test.app, &path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    let audio = body_bytes(response).await;
    assert!(audio.starts_with(b"ID3"));
    assert_eq!(test.engine.calls(), 1);
}

#[tokio::test]
async fn test_platform_is_accepted_as_engine() {
    let test = create_test_app().await;
    let response = post_json(
        &test.app,
        "/tts_get_url",
        json!({ "platform": "fake", "message": "Hello world" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["path"], format!("/api/tts_proxy/{HELLO_FILE}"));
}

#[tokio::test]
async fn test_get_url_validation() {
    let test = create_test_app().await;

    let response = post_json(&test.app, "/api/tts_get_url", json!({ "message": "Hi" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Must specify platform and message");
    assert_eq!(body["code"], 400);

    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hi", "language": "fr" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not supported"));

    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hi", "options": { "speed": 2 } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "nope", "message": "Hi" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(test.engine.calls(), 0);
}

#[tokio::test]
async fn test_invalid_json_is_rejected() {
    let test = create_test_app().await;
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tts_get_url")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid JSON specified");
}

#[tokio::test]
async fn test_synthesis_failure_is_bad_request() {
    let test = create_test_app().await;
    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "fail" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(test.engine.calls(), 1);
}

#[tokio::test]
async fn test_proxy_not_found() {
    let test = create_test_app().await;

    let response = get(&test.app, &format!("/api/tts_proxy/{HELLO_FILE}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bad = format!("{}_en_-_fake.mp3", "z".repeat(40));
    let response = get(&test.app, &format!("/api/tts_proxy/{bad}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(test.engine.calls(), 0);
}

#[tokio::test]
async fn test_tts_audio_returns_bytes() {
    let test = create_test_app().await;
    let request = json!({ "engine_id": "fake", "message": "Hello world", "language": "en" });

    let first = post_json(&test.app, "/api/tts_audio", request.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["content-type"], "audio/mpeg");
    let first = body_bytes(first).await;

    let second = body_bytes(post_json(&test.app, "/api/tts_audio", request).await).await;
    assert_eq!(first, second);
    assert_eq!(test.engine.calls(), 1);
}

#[tokio::test]
async fn test_clear_cache() {
    let test = create_test_app().await;
    let response = post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hello world" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_json(&test.app, "/api/tts_clear_cache", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = get(&test.app, &format!("/api/tts_proxy/{HELLO_FILE}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!test.dir.path().join("tts").join(HELLO_FILE).exists());
}

#[tokio::test]
async fn test_list_engines() {
    let test = create_test_app().await;
    let body = body_json(get(&test.app, "/api/tts/engines").await).await;
    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["engine_id"], "fake");
    assert_eq!(providers[0]["name"], "Fake");
    assert_eq!(providers[0]["supported_languages"].as_array().unwrap().len(), 4);

    let body = body_json(get(&test.app, "/api/tts/engines?language=en&country=GB").await).await;
    assert_eq!(
        body["providers"][0]["supported_languages"],
        json!(["en", "en_GB", "en_US"])
    );

    let body = body_json(get(&test.app, "/api/tts/engines?language=fr").await).await;
    assert_eq!(body["providers"][0]["supported_languages"], json!([]));
}

#[tokio::test]
async fn test_get_engine() {
    let test = create_test_app().await;
    let response = get(&test.app, "/api/tts/engines/fake").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["provider"]["engine_id"], "fake");
    assert_eq!(body["provider"]["supported_options"], json!(["voice"]));

    let response = get(&test.app, "/api/tts/engines/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "tts engine missing not found");
}

#[tokio::test]
async fn test_list_voices() {
    let test = create_test_app().await;
    let body = body_json(get(&test.app, "/api/tts/engines/fake/voices?language=en_US").await).await;
    assert_eq!(
        body["voices"],
        json!([{ "voice_id": "amy", "name": "Amy" }, { "voice_id": "bob", "name": "Bob" }])
    );

    let body = body_json(get(&test.app, "/api/tts/engines/fake/voices?language=de_DE").await).await;
    assert!(body["voices"].is_null());

    let response = get(&test.app, "/api/tts/engines/fake/voices").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&test.app, "/api/tts/engines/missing/voices?language=en").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let test = create_test_app().await;
    post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hello world" }),
    )
    .await;
    post_json(
        &test.app,
        "/api/tts_get_url",
        json!({ "engine_id": "fake", "message": "Hello world" }),
    )
    .await;

    let response = get(&test.app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = body_json(response).await;

    assert!(metrics["system"]["memory_total_mb"].is_number());
    assert_eq!(metrics["system"]["request_count"], 3);
    assert_eq!(metrics["endpoints"]["tts_get_url"]["request_count"], 2);
    assert_eq!(metrics["cache"]["synthesis_calls"], 1);
    assert_eq!(metrics["cache"]["memory_hits"], 1);
    assert!(metrics["cache"]["hit_rate"].as_f64().unwrap() > 0.0);
}
