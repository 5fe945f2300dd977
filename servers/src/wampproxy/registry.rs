//! Session Registry (C2): realm -> UpstreamSession table. Enforces at most
//! one pending connect per realm and hands every caller the same "ready"
//! future for a realm that's still dialing, joining, or introspecting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures_util::future::{FutureExt, Shared};

use crate::wampproxy::error::ProxyError;
use crate::wampproxy::session::UpstreamSession;

pub type ReadyFuture =
    Shared<Pin<Box<dyn Future<Output = Result<Arc<UpstreamSession>, Arc<ProxyError>>> + Send>>>;

struct Entry {
    generation: u64,
    ready: ReadyFuture,
}

#[derive(Clone)]
pub struct SessionRegistry {
    router_uri: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    sessions: HashMap<String, Entry>,
    next_generation: u64,
}

impl SessionRegistry {
    pub fn new(router_uri: impl Into<Arc<str>>) -> Self {
        SessionRegistry {
            router_uri: router_uri.into(),
            inner: Arc::new(Mutex::new(Inner {
                sessions: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Returns the pending or ready future for `realm`, dialing a fresh
    /// session if none exists. Two concurrent callers for an absent realm
    /// observe exactly one dial and the same resulting session.
    pub async fn acquire(&self, realm: &str) -> Result<Arc<UpstreamSession>, ProxyError> {
        let (_generation, ready) = {
            let mut guard = self.inner.lock().expect("registry lock poisoned");
            if let Some(entry) = guard.sessions.get(realm) {
                (entry.generation, entry.ready.clone())
            } else {
                let generation = guard.next_generation;
                guard.next_generation += 1;

                let registry = self.clone();
                let realm_owned = realm.to_string();
                let dial_fut: Pin<Box<dyn Future<Output = Result<Arc<UpstreamSession>, Arc<ProxyError>>> + Send>> =
                    Box::pin(async move { dial_and_watch(registry, realm_owned, generation).await });
                let shared = dial_fut.shared();

                guard.sessions.insert(
                    realm.to_string(),
                    Entry { generation, ready: shared.clone() },
                );
                (generation, shared)
            }
        };

        match ready.await {
            Ok(session) => Ok(session),
            Err(err) => Err(clone_error(&err)),
        }
    }

    /// Drops every entry in the table. Called once after the downstream
    /// listener has stopped accepting connections, so that no realm is
    /// left with a live-looking session once the proxy is going down. The
    /// underlying `wamp_async` clients are not individually disconnected
    /// here: the process is exiting regardless, which tears down their
    /// WebSocket transports along with it.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock().expect("registry lock poisoned");
        let count = guard.sessions.len();
        guard.sessions.clear();
        if count > 0 {
            log::info!("shutdown: dropped {count} realm session(s)");
        }
    }

    /// Removes `realm` from the table iff the currently stored entry is the
    /// one identified by `generation`; guards against evicting an entry a
    /// concurrent `acquire` has already replaced.
    fn evict_generation(&self, realm: &str, generation: u64) {
        let mut guard = self.inner.lock().expect("registry lock poisoned");
        if let Some(entry) = guard.sessions.get(realm) {
            if entry.generation == generation {
                guard.sessions.remove(realm);
                log::debug!("evicted session for realm '{realm}'");
            }
        }
    }
}

async fn dial_and_watch(
    registry: SessionRegistry,
    realm: String,
    generation: u64,
) -> Result<Arc<UpstreamSession>, Arc<ProxyError>> {
    match UpstreamSession::connect(&registry.router_uri, &realm).await {
        Ok((session, watch_handle)) => {
            let session = Arc::new(session);
            let session_for_watch = session.clone();
            let registry_for_watch = registry.clone();
            let realm_for_watch = realm.clone();
            tokio::spawn(async move {
                let _ = watch_handle.await;
                session_for_watch.mark_closed();
                registry_for_watch.evict_generation(&realm_for_watch, generation);
            });
            Ok(session)
        }
        Err(e) => {
            let shared = Arc::new(e);
            registry.evict_generation(&realm, generation);
            Err(shared)
        }
    }
}

fn clone_error(err: &ProxyError) -> ProxyError {
    match err {
        ProxyError::Parse(m) => ProxyError::Parse(m.clone()),
        ProxyError::UnknownOperation(m) => ProxyError::UnknownOperation(m.clone()),
        ProxyError::Application(m) => ProxyError::Application(m.clone()),
        ProxyError::Introspection(m) => ProxyError::Introspection(m.clone()),
        ProxyError::Transport(m) => ProxyError::Transport(m.clone()),
        ProxyError::Config(m) => ProxyError::Config(m.clone()),
        ProxyError::Precondition(m) => ProxyError::Precondition(m.clone()),
        ProxyError::Timeout => ProxyError::Timeout,
    }
}
