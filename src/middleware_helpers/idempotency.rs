use crate::{auth::AuthUser, errors::ServiceError};
use axum::{
    extract::Request,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use http_body_util::BodyExt as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const TTL: Duration = Duration::from_secs(600);
const MAX_KEY_LEN: usize = 255;

/// In-process store of successful responses keyed by caller, route and key.
#[derive(Clone)]
pub struct IdempotencyStore(Arc<DashMap<String, Slot>>);

#[derive(Clone)]
enum Slot {
    /// A request holding this key has not finished yet.
    InFlight(Instant),
    Done(StoredResponse),
}

impl Slot {
    fn started_at(&self) -> Instant {
        match self {
            Slot::InFlight(at) => *at,
            Slot::Done(sr) => sr.stored_at,
        }
    }
}

/// Result of trying to take a key.
enum Claim {
    Reserved(Reservation),
    Replay(StoredResponse),
    Busy,
}

/// Releases the key on drop unless the response was stored.
struct Reservation {
    store: IdempotencyStore,
    key: String,
    finished: bool,
}

impl Reservation {
    fn complete(mut self, sr: StoredResponse) {
        self.store.0.insert(self.key.clone(), Slot::Done(sr));
        self.finished = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.finished {
            self.store
                .0
                .remove_if(&self.key, |_, slot| matches!(slot, Slot::InFlight(_)));
        }
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self(Arc::new(DashMap::new()))
    }
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, ttl: Duration) -> Option<StoredResponse> {
        self.0.get(key).and_then(|slot| match &*slot {
            Slot::Done(sr) if sr.stored_at.elapsed() < ttl => Some(sr.clone()),
            _ => None,
        })
    }

    pub fn insert(&self, key: &str, sr: StoredResponse) {
        self.0.insert(key.to_string(), Slot::Done(sr));
    }

    /// Atomically reserves `key`, or reports what already holds it.
    fn claim(&self, key: &str, ttl: Duration) -> Claim {
        match self.0.entry(key.to_string()) {
            Entry::Occupied(mut held) if held.get().started_at().elapsed() >= ttl => {
                held.insert(Slot::InFlight(Instant::now()));
            }
            Entry::Occupied(held) => {
                return match held.get() {
                    Slot::Done(sr) => Claim::Replay(sr.clone()),
                    Slot::InFlight(_) => Claim::Busy,
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::InFlight(Instant::now()));
            }
        }
        Claim::Reserved(Reservation {
            store: self.clone(),
            key: key.to_string(),
            finished: false,
        })
    }

    pub fn cleanup(&self, ttl: Duration) {
        let now = Instant::now();
        self.0
            .retain(|_, slot| now.duration_since(slot.started_at()) < ttl);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
    pub stored_at: Instant,
}

impl StoredResponse {
    fn replay(&self) -> Response {
        let mut resp = Response::new(axum::body::Body::from(self.body.clone()));
        *resp.status_mut() = self.status;
        if let Some(ct) = self.content_type.clone() {
            resp.headers_mut().insert(CONTENT_TYPE, ct);
        }
        resp.headers_mut()
            .insert("idempotent-replayed", HeaderValue::from_static("true"));
        resp
    }
}

/// Replays the stored response for a repeated `Idempotency-Key`.
///
/// Only successful (2xx) responses are stored, so a failed attempt can be
/// retried with the same key. A key is reserved while its first request runs
/// and a concurrent duplicate gets 409. Must run inside the auth layer so the
/// key is scoped to the caller.
pub async fn idempotency_middleware(req: Request, next: Next) -> Response {
    let is_mutating = matches!(req.method().as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    if !is_mutating {
        return next.run(req).await;
    }

    let Some(key) = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.len() <= MAX_KEY_LEN)
    else {
        return next.run(req).await;
    };

    let Some(store) = req.extensions().get::<IdempotencyStore>().cloned() else {
        warn!("idempotency store missing from request extensions");
        return next.run(req).await;
    };

    let caller = req
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.user_id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let scoped_key = format!("{}:{}:{}:{}", caller, req.method(), req.uri().path(), key);

    store.cleanup(TTL);

    let reservation = match store.claim(&scoped_key, TTL) {
        Claim::Reserved(reservation) => reservation,
        Claim::Replay(stored) => {
            debug!(idempotency_key = %key, "replaying stored response");
            return stored.replay();
        }
        Claim::Busy => {
            debug!(idempotency_key = %key, "request with this key is still running");
            return ServiceError::Conflict(
                "a request with this Idempotency-Key is already in progress".into(),
            )
            .into_response();
        }
    };

    let resp = next.run(req).await;
    if !resp.status().is_success() {
        return resp;
    }

    let (parts, body) = resp.into_parts();
    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            reservation.complete(StoredResponse {
                status: parts.status,
                body: bytes.clone(),
                content_type: parts.headers.get(CONTENT_TYPE).cloned(),
                stored_at: Instant::now(),
            });
            Response::from_parts(parts, axum::body::Body::from(bytes))
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer response for idempotency store");
            Response::from_parts(parts, axum::body::Body::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::post, Extension, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(store: IdempotencyStore, hits: Arc<AtomicUsize>, status: StatusCode) -> Router {
        Router::new()
            .route(
                "/orders",
                post(move || {
                    let hits = hits.clone();
                    async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                        (status, format!("call-{n}"))
                    }
                }),
            )
            .layer(axum::middleware::from_fn(idempotency_middleware))
            .layer(Extension(store))
    }

    fn request(key: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/orders")
            .header(IDEMPOTENCY_HEADER, key)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_key_replays_first_response() {
        let store = IdempotencyStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let router = app(store.clone(), hits.clone(), StatusCode::CREATED);

        let first = router.clone().oneshot(request("k1")).await.unwrap();
        let second = router.clone().oneshot(request("k1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(second.headers().contains_key("idempotent-replayed"));

        let body = second.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"call-1");
    }

    #[tokio::test]
    async fn failures_are_not_stored() {
        let store = IdempotencyStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let router = app(store.clone(), hits.clone(), StatusCode::BAD_REQUEST);

        router.clone().oneshot(request("k2")).await.unwrap();
        router.clone().oneshot(request("k2")).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_duplicate_is_turned_away() {
        let store = IdempotencyStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());
        let router = {
            let hits = hits.clone();
            let release = release.clone();
            Router::new()
                .route(
                    "/orders",
                    post(move || {
                        let hits = hits.clone();
                        let release = release.clone();
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            (StatusCode::CREATED, "created")
                        }
                    }),
                )
                .layer(axum::middleware::from_fn(idempotency_middleware))
                .layer(Extension(store.clone()))
        };

        let first = tokio::spawn(router.clone().oneshot(request("double-click")));
        while hits.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let second = router.clone().oneshot(request("double-click")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let third = router.oneshot(request("double-click")).await.unwrap();
        assert_eq!(third.status(), StatusCode::CREATED);
        assert!(third.headers().contains_key("idempotent-replayed"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_reservation_frees_the_key() {
        let store = IdempotencyStore::new();
        match store.claim("k3", TTL) {
            Claim::Reserved(reservation) => drop(reservation),
            _ => panic!("fresh key should be reserved"),
        }
        assert!(store.is_empty());
        assert!(matches!(store.claim("k3", TTL), Claim::Reserved(_)));
    }
}
