//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gymsession_core::{
    ApiResponse, Credentials, CredentialStore, MemoryStore, RequestDescriptor, Secret,
    SecretStore, SessionConfig, SessionContext, StoreError, Transport, TransportError, User,
    model::ActiveSession,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const REFRESH_PATH: &str = "/sessions/refresh-token";

pub fn rodrigo() -> User {
    User::new("1", "Rodrigo", "rodrigo@email.com")
}

pub fn credentials(access: &str, refresh: &str) -> Credentials {
    Credentials::new(access, refresh).unwrap()
}

/// Write a session record the way a previous run would have left it.
pub async fn seed(store: Arc<dyn SecretStore>, access: &str, refresh: &str) {
    let session = ActiveSession::new(rodrigo(), credentials(access, refresh)).unwrap();
    CredentialStore::new(store).save(&session).await.unwrap();
}

pub async fn stored(store: Arc<dyn SecretStore>) -> Option<ActiveSession> {
    CredentialStore::new(store).load().await.unwrap()
}

/// Context over `transport` with a session for Rodrigo (`access`, `refresh`)
/// already restored.
pub async fn signed_in(
    store: Arc<FlakyStore>,
    transport: Arc<dyn Transport>,
    access: &str,
    refresh: &str,
) -> SessionContext {
    seed(store.clone(), access, refresh).await;
    let context = SessionContext::new(SessionConfig::default(), store, transport);
    context.restore().await.unwrap();
    context
}

/// Poll `condition` until it holds, panicking after a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Memory store whose writes can be made to fail, or held until released.
pub struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
    held: AtomicBool,
    waiting: AtomicUsize,
    write_gate: Semaphore,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self {
            inner: MemoryStore::new(),
            broken: AtomicBool::new(false),
            held: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            write_gate: Semaphore::new(0),
        }
    }
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `set` wait until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_writes(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.write_gate.add_permits(self.waiting.load(Ordering::SeqCst).max(1));
    }

    /// Number of writes currently held.
    pub fn held_writes(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn repair(&self) {
        self.broken.store(false, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        if self.held.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.write_gate.acquire().await {
                permit.forget();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.check()?;
        self.inner.set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// A request as seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub path: String,
    pub bearer: Option<String>,
}

type Script = dyn Fn(&RequestDescriptor, Option<&str>) -> ApiResponse + Send + Sync;

/// In-process API double.
///
/// Answers every request through a closure and records it. Refresh-token
/// exchanges block until [`release_refresh`](Self::release_refresh) is
/// called, which makes the renewal window as wide as a test needs. The next
/// request to one more path can be held with [`hold`](Self::hold) until
/// [`release`](Self::release).
pub struct ScriptedTransport {
    script: Box<Script>,
    calls: Mutex<Vec<Call>>,
    refresh_gate: Semaphore,
    held_path: Mutex<Option<String>>,
    path_gate: Semaphore,
}

impl ScriptedTransport {
    pub fn new(
        script: impl Fn(&RequestDescriptor, Option<&str>) -> ApiResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            refresh_gate: Semaphore::new(0),
            held_path: Mutex::new(None),
            path_gate: Semaphore::new(0),
        })
    }

    /// Answers `tok1` with 401, refreshes to `tok2`, and answers `tok2` with
    /// the request path as body.
    pub fn expiring() -> Arc<Self> {
        Self::new(|request, bearer| {
            if request.path == REFRESH_PATH {
                return ApiResponse::json_body(
                    200,
                    &serde_json::json!({ "token": "tok2", "refresh_token": "ref2" }),
                );
            }
            match bearer {
                Some("tok2") => ApiResponse::json_body(200, &serde_json::json!(request.path)),
                _ => ApiResponse::json_body(401, &serde_json::json!({ "message": "token.expired" })),
            }
        })
    }

    pub fn release_refresh(&self) {
        self.refresh_gate.add_permits(1);
    }

    pub fn hold(&self, path: &str) {
        *self.held_path.lock() = Some(path.to_string());
    }

    pub fn release(&self) {
        self.path_gate.add_permits(1);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.path == REFRESH_PATH)
            .count()
    }

    /// Paths requested with `bearer`, in dispatch order.
    pub fn paths_with(&self, bearer: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.bearer.as_deref() == Some(bearer))
            .map(|c| c.path)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, TransportError> {
        let bearer = bearer.map(|s| s.expose().to_string());
        self.calls.lock().push(Call {
            path: request.path.clone(),
            bearer: bearer.clone(),
        });

        if request.path == REFRESH_PATH {
            if let Ok(permit) = self.refresh_gate.acquire().await {
                permit.forget();
            }
        }
        let held = {
            let mut held_path = self.held_path.lock();
            if held_path.as_deref() == Some(request.path.as_str()) {
                held_path.take();
                true
            } else {
                false
            }
        };
        if held {
            if let Ok(permit) = self.path_gate.acquire().await {
                permit.forget();
            }
        }

        Ok((self.script)(request, bearer.as_deref()))
    }
}
