//! Integration tests for credential renewal.
//!
//! These tests verify that the request pipeline:
//! - Renews expired credentials once and replays the original request
//! - Signs the user out when the refresh token is rejected
//! - Shares one refresh exchange between concurrent requests
//! - Replays queued requests in the order their 401s arrived
//! - Retries a 401 for already-replaced credentials without renewing again

mod common;

use common::{FlakyStore, ScriptedTransport, eventually, signed_in, stored};
use gymsession_core::{ApiResponse, RequestDescriptor, SessionConfig, SessionContext, SessionError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

/// Context against `server` with Rodrigo signed in as `tok1` / `ref1`.
async fn setup(server: &MockServer) -> (SessionContext, Arc<FlakyStore>) {
    let store = FlakyStore::new();
    common::seed(store.clone(), "tok1", "ref1").await;

    let context = SessionContext::connect(SessionConfig::with_base_url(server.uri()), store.clone())
        .unwrap();
    context.restore().await.unwrap();
    (context, store)
}

async fn mount_expired_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.expired" })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_token_is_renewed_and_request_replayed() {
    let server = MockServer::start().await;
    mount_expired_token(&server).await;

    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .and(body_json(json!({ "refresh_token": "ref1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok2",
            "refresh_token": "ref2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["costas", "ombros"])))
        .expect(1)
        .mount(&server)
        .await;

    let (context, store) = setup(&server).await;

    let groups: Vec<String> = context
        .execute(RequestDescriptor::get("/groups"))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(groups, vec!["costas", "ombros"]);

    // The renewed pair is what a restart would restore
    let persisted = stored(store).await.unwrap();
    assert_eq!(persisted.credentials.access_token.expose(), "tok2");
    assert_eq!(persisted.credentials.refresh_token.expose(), "ref2");
    assert_eq!(context.user().unwrap().name, "Rodrigo");
}

#[tokio::test]
async fn test_rejected_refresh_token_signs_out() {
    let server = MockServer::start().await;
    mount_expired_token(&server).await;

    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.invalid" })))
        .expect(1)
        .mount(&server)
        .await;

    let (context, store) = setup(&server).await;

    let result = context.execute(RequestDescriptor::get("/groups")).await;

    assert!(matches!(result, Err(SessionError::SessionExpired)));
    assert!(context.user().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_second_unauthorized_after_renewal_is_terminal() {
    let server = MockServer::start().await;

    // Every request is rejected, whatever its token
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token.invalid" })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok2",
            "refresh_token": "ref2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (context, store) = setup(&server).await;

    let result = context.execute(RequestDescriptor::get("/groups")).await;

    assert!(matches!(result, Err(SessionError::SessionExpired)));
    assert!(context.user().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let server = MockServer::start().await;
    mount_expired_token(&server).await;

    Mock::given(method("POST"))
        .and(path("/sessions/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "tok2", "refresh_token": "ref2" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(5)
        .mount(&server)
        .await;

    let (context, _store) = setup(&server).await;

    let mut requests = JoinSet::new();
    for id in 0..5 {
        let context = context.clone();
        requests.spawn(async move {
            context
                .execute(RequestDescriptor::get(format!("/exercises/{}", id)))
                .await
        });
    }

    while let Some(result) = requests.join_next().await {
        assert_eq!(result.unwrap().unwrap().status, 200);
    }
    // `.expect(1)` on the refresh mock is verified when the server drops
}

/// Spawn `paths` one by one, each only once the previous one is queued.
async fn queue_behind_renewal(
    context: &SessionContext,
    paths: &[&'static str],
) -> Vec<tokio::task::JoinHandle<Result<ApiResponse, SessionError>>> {
    let mut handles = Vec::new();
    for (n, path) in paths.iter().copied().enumerate() {
        let task_context = context.clone();
        handles.push(tokio::spawn(async move {
            task_context.execute(RequestDescriptor::get(path)).await
        }));
        eventually(|| context.queued_requests() == n + 1).await;
    }
    handles
}

#[tokio::test]
async fn test_queued_requests_replay_in_arrival_order() {
    let transport = ScriptedTransport::expiring();
    let context = signed_in(FlakyStore::new(), transport.clone(), "tok1", "ref1").await;

    let handles = queue_behind_renewal(&context, &["/a", "/b", "/c"]).await;
    transport.release_refresh();

    for (handle, path) in handles.into_iter().zip(["/a", "/b", "/c"]) {
        let response = handle.await.unwrap().unwrap();
        let echoed: String = response.json().unwrap();
        assert_eq!(echoed, path);
    }
    assert_eq!(transport.paths_with("tok2"), vec!["/a", "/b", "/c"]);
    assert_eq!(transport.refresh_calls(), 1);
    assert_eq!(context.queued_requests(), 0);
}

#[tokio::test]
async fn test_failed_renewal_fails_every_queued_request() {
    let transport = ScriptedTransport::new(|request, _| {
        if request.path == common::REFRESH_PATH {
            ApiResponse::json_body(401, &json!({ "message": "token.invalid" }))
        } else {
            ApiResponse::json_body(401, &json!({ "message": "token.expired" }))
        }
    });
    let store = FlakyStore::new();
    let context = signed_in(store.clone(), transport.clone(), "tok1", "ref1").await;

    let handles = queue_behind_renewal(&context, &["/a", "/b", "/c"]).await;
    transport.release_refresh();

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Err(SessionError::SessionExpired)
        ));
    }
    // Nothing was replayed
    assert_eq!(transport.calls().len(), 4);
    assert!(context.user().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unpersisted_renewal_counts_as_failure() {
    let transport = ScriptedTransport::expiring();
    let store = FlakyStore::new();
    let context = signed_in(store.clone(), transport.clone(), "tok1", "ref1").await;

    let handles = queue_behind_renewal(&context, &["/a"]).await;
    store.break_writes();
    transport.release_refresh();

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Err(SessionError::SessionExpired)
        ));
    }
    assert!(context.user().is_none());
    assert!(transport.paths_with("tok2").is_empty());
}

#[tokio::test]
async fn test_sign_out_fails_queued_requests() {
    let transport = ScriptedTransport::expiring();
    let context = signed_in(FlakyStore::new(), transport.clone(), "tok1", "ref1").await;

    let handles = queue_behind_renewal(&context, &["/a", "/b"]).await;
    context.sign_out().await;

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Err(SessionError::SessionExpired)
        ));
    }

    // The exchange still in flight must not sign the user back in
    transport.release_refresh();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.refresh_calls(), 1);
    assert!(context.user().is_none());
    assert!(transport.paths_with("tok2").is_empty());
}

#[tokio::test]
async fn test_unauthenticated_requests_skip_renewal() {
    let transport = ScriptedTransport::expiring();
    let context = signed_in(FlakyStore::new(), transport.clone(), "tok1", "ref1").await;

    let result = context
        .execute(RequestDescriptor::get("/public").unauthenticated())
        .await;

    match result {
        Err(SessionError::Api { code, message }) => {
            assert_eq!(code, 401);
            assert_eq!(message, "token.expired");
        }
        other => panic!("expected an API error, got {:?}", other),
    }
    assert_eq!(transport.refresh_calls(), 0);
    assert!(context.user().is_some());
}

#[tokio::test]
async fn test_stale_unauthorized_is_retried_without_second_refresh() {
    let transport = ScriptedTransport::expiring();
    let context = signed_in(FlakyStore::new(), transport.clone(), "tok1", "ref1").await;

    // `/slow` leaves with tok1 and its 401 is held back
    transport.hold("/slow");
    let slow = {
        let context = context.clone();
        tokio::spawn(async move { context.execute(RequestDescriptor::get("/slow")).await })
    };
    eventually(|| transport.calls().len() == 1).await;

    // Meanwhile `/fast` renews the session to tok2
    transport.release_refresh();
    let fast = context.execute(RequestDescriptor::get("/fast")).await.unwrap();
    let echoed: String = fast.json().unwrap();
    assert_eq!(echoed, "/fast");

    transport.release();
    let response = slow.await.unwrap().unwrap();
    let echoed: String = response.json().unwrap();
    assert_eq!(echoed, "/slow");

    assert_eq!(transport.refresh_calls(), 1);
    assert_eq!(transport.paths_with("tok1"), vec!["/slow", "/fast"]);
    assert_eq!(transport.paths_with("tok2"), vec!["/fast", "/slow"]);
    let snapshot = context.snapshot();
    assert_eq!(snapshot.credentials().unwrap().access_token.expose(), "tok2");
}
