//! End-to-end tests for the request engine against a scripted transport


use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_support::*;
use vitatrack_core::{
    codes, AuthEvent, ConnectionType, DrainOutcome, ErrorKind, Method, RequestConfig,
    ResponseBody, TransportError, TransportResponse, UploadFile,
};
use vitatrack_core::types::{FormValue, RequestBody};

#[tokio::test(start_paused = true)]
async fn test_identical_gets_share_one_network_call() {
    let h = harness(
        MockTransport::json(json!({ "reports": [1, 2, 3] })).with_delay(Duration::from_millis(300)),
    );

    let (a, b) = tokio::join!(h.client.get("/reports"), h.client.get("/reports"));

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(h.client.pending_requests_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_different_query_is_not_coalesced() {
    let h = harness(MockTransport::json(json!({})).with_delay(Duration::from_millis(100)));

    let first = h.client.request(RequestConfig::get("/reports").with_query("page", 1));
    let second = h.client.request(RequestConfig::get("/reports").with_query("page", 2));
    let (a, b) = tokio::join!(first, second);

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_callers_share_the_failure() {
    let h = harness(
        MockTransport::new(|_| Ok(json_response(503, &json!({ "message": "maintenance" }))))
            .with_delay(Duration::from_millis(200)),
    );

    let (a, b) = tokio::join!(h.client.get("/dashboard"), h.client.get("/dashboard"));
    let (a, b) = (a.unwrap_err(), b.unwrap_err());

    assert_eq!(h.transport.calls(), 1);
    assert_eq!(a.code, "HTTP_503");
    assert_eq!(a, b);
    assert_eq!(a.detail("serverMessage"), Some(&json!("maintenance")));
}

#[tokio::test]
async fn test_get_is_cached_until_ttl_elapses() {
    let h = harness(MockTransport::json(json!({ "name": "Budi" })));
    let ttl = h.client.config().cache_ttl_ms as i64;

    h.client.get("/profile").await.unwrap();
    h.client.get("/profile").await.unwrap();
    assert_eq!(h.transport.calls(), 1);

    h.clock.advance(ttl);
    h.client.get("/profile").await.unwrap();
    assert_eq!(h.transport.calls(), 1);

    h.clock.advance(1);
    h.client.get("/profile").await.unwrap();
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_cache_opt_out_and_mutations_are_not_cached() {
    let h = harness(MockTransport::json(json!({ "ok": true })));

    h.client.post("/reports", json!({ "hb": 11.2 })).await.unwrap();
    h.client.post("/reports", json!({ "hb": 11.2 })).await.unwrap();
    assert_eq!(h.transport.calls(), 2);

    let live = RequestConfig::get("/live").with_cacheable(false);
    h.client.request(live.clone()).await.unwrap();
    h.client.request(live).await.unwrap();
    assert_eq!(h.transport.calls(), 4);
    assert!(!h.client.is_cached(Method::Get, "/live"));
}

#[tokio::test]
async fn test_server_error_uses_configured_message() {
    let mut config = test_config();
    config
        .messages
        .status
        .insert("500".to_string(), "Server sedang bermasalah".to_string());
    let h = harness_with_config(
        MockTransport::new(|_| Ok(json_response(500, &json!({ "error": "db down" })))),
        config,
    );

    let err = h
        .client
        .post("/reports/submit", json!({ "studentId": 7 }))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Api);
    assert_eq!(err.code, "HTTP_500");
    assert_eq!(err.http_status, 500);
    assert_eq!(err.message, "Server sedang bermasalah");
    assert!(err.is_retryable());
    assert!(!err.was_queued());
}

#[tokio::test]
async fn test_not_found_and_validation_mapping() {
    let h = harness(MockTransport::new(|req| {
        if req.url.ends_with("/missing") {
            Ok(json_response(404, &json!({})))
        } else {
            Ok(json_response(422, &json!({ "errors": { "weight": ["required"] } })))
        }
    }));

    let missing = h.client.get("/missing").await.unwrap_err();
    assert_eq!(missing.code, codes::NOT_FOUND);
    assert_eq!(missing.kind, ErrorKind::Api);

    let invalid = h.client.post("/measurements", json!({})).await.unwrap_err();
    assert_eq!(invalid.kind, ErrorKind::Validation);
    assert_eq!(invalid.code, codes::VALIDATION_ERROR);
    assert_eq!(invalid.detail("fieldErrors"), Some(&json!({ "weight": ["required"] })));
}

#[tokio::test]
async fn test_unauthorized_clears_token_and_notifies() {
    let h = harness(MockTransport::new(|_| Ok(json_response(401, &json!({})))));
    h.client.token_provider().set_token("stale", None).await.unwrap();
    let mut events = h.client.subscribe_auth_events();

    let err = h.client.get("/me").await.unwrap_err();

    assert_eq!(err.code, codes::UNAUTHORIZED);
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(
        h.transport.last_request().unwrap().headers.get("authorization"),
        Some(&"Bearer stale".to_string())
    );
    assert_eq!(h.client.token_provider().token().await.unwrap(), None);
    assert_eq!(
        events.try_recv().unwrap(),
        AuthEvent::Unauthorized { url: "/me".to_string() }
    );
}

#[tokio::test]
async fn test_expired_token_becomes_session_expired() {
    let h = harness(MockTransport::new(|_| Ok(json_response(401, &json!({})))));
    let expiry = chrono::DateTime::from_timestamp_millis(1_700_000_060_000).unwrap();
    h.client.token_provider().set_token("old", Some(expiry)).await.unwrap();
    h.clock.advance(120_000);
    let mut events = h.client.subscribe_auth_events();

    let err = h.client.get("/me").await.unwrap_err();

    assert_eq!(err.code, codes::SESSION_EXPIRED);
    assert_eq!(err.http_status, 401);
    assert!(h.transport.last_request().unwrap().headers.get("authorization").is_none());
    assert!(matches!(events.try_recv().unwrap(), AuthEvent::SessionExpired { .. }));
}

#[tokio::test]
async fn test_offline_mutation_is_queued_and_replayed() {
    let h = harness(MockTransport::json(json!({ "id": 99 })));
    h.client.token_provider().set_token("tok", None).await.unwrap();
    h.monitor.set_offline();

    let queued = h
        .client
        .request(RequestConfig::post("/measurements").with_json(json!({ "weight": 31.5 })).with_offline_queueable(true))
        .await
        .unwrap();
    let body = queued.as_json().unwrap();
    assert_eq!(body["queued"], true);
    assert_eq!(h.transport.calls(), 0);

    let pending = h.client.offline_queue().peek_all();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].config.has_header("authorization"));

    let read = h.client.get("/measurements").await.unwrap_err();
    assert_eq!(read.code, codes::OFFLINE);

    h.monitor.set_online(ConnectionType::Wifi);
    let outcomes = h.client.sync_offline_queue().await.unwrap();

    assert_eq!(outcomes, vec![DrainOutcome::Sent { id: pending[0].id }]);
    assert!(h.client.offline_queue().is_empty());
    let replayed = h.transport.last_request().unwrap();
    assert_eq!(replayed.method, Method::Post);
    assert_eq!(replayed.url, format!("{}/measurements", BASE_URL));
    assert_eq!(replayed.headers.get("authorization"), Some(&"Bearer tok".to_string()));
}

fn photo_config() -> vitatrack_core::ClientConfig {
    let mut config = test_config();
    config.offline_queue.queueable_patterns = vec!["^/photos".to_string()];
    config
}

fn png(len: usize) -> UploadFile {
    UploadFile::new("meal.png", "image/png", vec![0x89; len])
}

#[tokio::test]
async fn test_offline_photo_upload_is_queued() {
    let h = harness_with_config(MockTransport::json(json!({ "id": 7 })), photo_config());
    h.client.token_provider().set_token("tok", None).await.unwrap();
    h.monitor.set_offline();

    let queued = h
        .client
        .upload("/photos", "photo", png(2 * 1024 * 1024), &[])
        .await
        .unwrap();

    assert_eq!(queued.as_json().unwrap()["queued"], true);
    assert_eq!(h.transport.calls(), 0);
    assert_eq!(h.client.token_provider().token().await.unwrap(), Some("tok".to_string()));

    let pending = h.client.offline_queue().peek_all();
    assert_eq!(pending.len(), 1);
    match &pending[0].config.data {
        Some(RequestBody::Multipart(parts)) => match &parts[0].value {
            FormValue::File { bytes, .. } => assert_eq!(bytes.len(), 2 * 1024 * 1024),
            other => panic!("unexpected part {:?}", other),
        },
        other => panic!("unexpected body {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_upload_too_large_to_queue_leaves_storage_intact() {
    let mut config = photo_config();
    config.storage.max_bytes = 1024 * 1024;
    let h = harness_with_config(MockTransport::json(json!({ "id": 7 })), config);
    h.client.token_provider().set_token("tok", None).await.unwrap();
    let keys_before = h.storage.keys();
    h.monitor.set_offline();

    let err = h
        .client
        .upload("/photos", "photo", png(2 * 1024 * 1024), &[])
        .await
        .unwrap_err();

    assert_eq!((err.kind, err.code.as_str()), (ErrorKind::Storage, codes::QUOTA_EXCEEDED));
    assert_eq!(h.transport.calls(), 0);
    assert!(h.client.offline_queue().is_empty());
    assert_eq!(h.storage.keys(), keys_before);
    assert_eq!(h.client.token_provider().token().await.unwrap(), Some("tok".to_string()));
}

#[tokio::test]
async fn test_sync_is_skipped_while_offline() {
    let h = harness(MockTransport::json(json!({})));
    h.monitor.set_offline();
    h.client
        .request(RequestConfig::put("/profile").with_json(json!({})).with_offline_queueable(true))
        .await
        .unwrap();

    assert!(h.client.sync_offline_queue().await.unwrap().is_empty());
    assert_eq!(h.client.offline_queue().len(), 1);
}

#[tokio::test]
async fn test_connection_failure_queues_and_is_not_retried() {
    let h = harness(MockTransport::new(|_| Err(TransportError::connect("connection refused"))));

    let config = RequestConfig::post("/meals").with_json(json!({ "kcal": 450 })).with_offline_queueable(true);
    let err = h.client.request_with_retry(config).await.unwrap_err();

    assert_eq!(err.code, codes::NETWORK_ERROR);
    assert!(err.was_queued());
    assert!(err.detail("queuedId").is_some());
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.client.offline_queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_reported_and_not_queued() {
    let h = harness(MockTransport::json(json!({})).with_delay(Duration::from_secs(5)));

    let config = RequestConfig::post("/meals")
        .with_json(json!({}))
        .with_offline_queueable(true)
        .with_timeout_ms(100);
    let err = h.client.request(config).await.unwrap_err();

    assert_eq!(err.code, codes::TIMEOUT);
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(h.client.offline_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_server_errors() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let h = harness(MockTransport::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(json_response(503, &json!({})))
        } else {
            Ok(json_response(200, &json!({ "ok": true })))
        }
    }));

    let body = h
        .client
        .request_with_retry(RequestConfig::get("/reports").with_cacheable(false))
        .await
        .unwrap();

    assert_eq!(body.as_json().unwrap()["ok"], true);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_requests() {
    let h = harness(MockTransport::json(json!({})).with_delay(Duration::from_secs(60)));

    let client = h.client.clone();
    let call = tokio::spawn(async move { client.get("/slow").await });
    while h.client.pending_requests_count() == 0 {
        tokio::task::yield_now().await;
    }

    h.client.cancel_all_requests();
    let err = call.await.unwrap().unwrap_err();

    assert_eq!(err.code, codes::CANCELLED);
    assert_eq!(h.client.pending_requests_count(), 0);

    // A fresh call after cancellation goes out again
    let h2 = harness(MockTransport::json(json!({ "ok": 1 })));
    h2.client.cancel_all_requests();
    assert!(h2.client.get("/after").await.is_ok());
}

#[tokio::test]
async fn test_background_sync_drains_on_reconnect() {
    let h = harness(MockTransport::json(json!({})));
    let _sync = h.client.spawn_offline_sync();
    h.monitor.set_offline();
    h.client
        .request(RequestConfig::patch("/goals/1").with_json(json!({ "steps": 8000 })).with_offline_queueable(true))
        .await
        .unwrap();

    h.monitor.set_online(ConnectionType::Cellular);
    for _ in 0..200 {
        if h.client.offline_queue().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(h.client.offline_queue().is_empty());
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_envelope_is_unwrapped_for_lists() {
    let h = harness(MockTransport::new(|_| {
        Ok(json_response(200, &json!({ "data": [{ "id": 1 }], "meta": { "total": 1 } })))
    }));

    let body = h.client.get("/students").await.unwrap();
    assert_eq!(
        body,
        ResponseBody::Json(json!({ "items": [{ "id": 1 }], "meta": { "total": 1 }, "success": true }))
    );
}

#[tokio::test]
async fn test_download_returns_raw_bytes() {
    let h = harness(MockTransport::new(|_| {
        Ok(TransportResponse::new(200, vec![0x89, b'P', b'N', b'G']).with_header("content-type", "image/png"))
    }));

    let bytes = h.client.download("/reports/1/chart.png").await.unwrap();
    assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    assert_eq!(h.client.cache_len(), 0);
}
