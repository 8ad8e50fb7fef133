//! Generic, kind-agnostic watch/cache layer (spec §4.1).
//!
//! Mirrors `ResourceWatcher` from the Python original: one task per
//! `(apiVersion, kind, namespace)`, a short-TTL read cache, and a dispatch
//! callback invoked for every observed event (including the synthetic
//! `Preload` events emitted while priming the cache from a list). Operating
//! on `DynamicObject` throughout means the same code path serves the four
//! first-party kinds and every downstream kind a handle's template refers
//! to — there is no per-kind branch to maintain.

use kube::{
    api::{Api, ListParams, WatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery, Client,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::util::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
}

/// Event type delivered to the dispatch callback. `Preload` distinguishes
/// the initial list phase from live watch events so dispatch handlers that
/// only care about changes (rather than existing state) can skip them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Preload,
    Added,
    Modified,
    Deleted,
}

pub type Dispatch = Arc<dyn Fn(WatchKey, EventKind, DynamicObject) + Send + Sync>;

struct CacheEntry {
    object: DynamicObject,
    observed_at: Instant,
}

struct WatchTask {
    cache: RwLock<HashMap<String, CacheEntry>>,
    stopping: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Process-wide registry of watch tasks plus their per-kind caches.
pub struct ResourceWatcher {
    client: Client,
    refresh_interval: Duration,
    dispatch: Dispatch,
    tasks: RwLock<HashMap<WatchKey, Arc<WatchTask>>>,
}

fn cache_key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", namespace.unwrap_or(""), name)
}

fn gvk_for(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

impl ResourceWatcher {
    pub fn new(client: Client, refresh_interval: Duration, dispatch: Dispatch) -> Arc<Self> {
        Arc::new(ResourceWatcher {
            client,
            refresh_interval,
            dispatch,
            tasks: RwLock::new(HashMap::new()),
        })
    }

    /// Idempotent: the first call for a given key spawns a watch task,
    /// later calls return immediately.
    pub async fn start_watch(
        self: &Arc<Self>,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) {
        let key = WatchKey {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
        };
        {
            let tasks = self.tasks.read().await;
            if tasks.contains_key(&key) {
                return;
            }
        }
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&key) {
            return;
        }
        let stopping = Arc::new(AtomicBool::new(false));
        let join = tokio::spawn(Self::run_watch(self.clone(), key.clone(), stopping.clone()));
        tasks.insert(
            key,
            Arc::new(WatchTask {
                cache: RwLock::new(HashMap::new()),
                stopping,
                join,
            }),
        );
    }

    async fn run_watch(watcher: Arc<Self>, key: WatchKey, stopping: Arc<AtomicBool>) {
        let mut started_at = Instant::now();
        loop {
            if stopping.load(Ordering::Relaxed) {
                return;
            }
            started_at = Instant::now();
            match watcher.watch_once(&key, &stopping).await {
                Ok(()) => return, // cancelled cleanly
                Err(WatchFailure::Restart) => {
                    let elapsed = started_at.elapsed();
                    if elapsed < Duration::from_secs(10) {
                        tokio::time::sleep(Duration::from_secs(10) - elapsed).await;
                    }
                }
                Err(WatchFailure::Failed) => {
                    let elapsed = started_at.elapsed();
                    if elapsed < Duration::from_secs(60) {
                        tokio::time::sleep(Duration::from_secs(60) - elapsed).await;
                    }
                }
            }
        }
    }

    async fn watch_once(
        &self,
        key: &WatchKey,
        stopping: &Arc<AtomicBool>,
    ) -> Result<(), WatchFailure> {
        let gvk = gvk_for(&key.api_version, &key.kind);
        let (ar, _caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|_| WatchFailure::Failed)?;
        let api: Api<DynamicObject> = match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        // Clear the cache at the start of every new list phase so callers
        // never observe a mix of generations.
        {
            let tasks = self.tasks.read().await;
            if let Some(task) = tasks.get(key) {
                task.cache.write().await.clear();
            }
        }

        let mut continue_token: Option<String> = None;
        let mut last_resource_version = "0".to_string();
        loop {
            let lp = ListParams {
                limit: Some(50),
                continue_token: continue_token.clone(),
                ..Default::default()
            };
            let list = api.list(&lp).await.map_err(|_| WatchFailure::Failed)?;
            if let Some(rv) = list.metadata.resource_version.clone() {
                last_resource_version = rv;
            }
            for obj in list.items {
                self.insert(key, &obj).await;
                (self.dispatch)(key.clone(), EventKind::Preload, obj);
            }
            match list.metadata.continue_.clone() {
                Some(tok) if !tok.is_empty() => continue_token = Some(tok),
                _ => break,
            }
        }

        let wp = WatchParams::default();
        let mut stream = Box::pin(
            api.watch(&wp, &last_resource_version)
                .await
                .map_err(|_| WatchFailure::Failed)?,
        );
        use futures::StreamExt;
        loop {
            if stopping.load(Ordering::Relaxed) {
                return Ok(());
            }
            let next = stream.next().await;
            match next {
                None => return Err(WatchFailure::Restart),
                Some(Ok(ev)) => self.handle_event(key, ev).await?,
                Some(Err(_)) => return Err(WatchFailure::Failed),
            }
        }
    }

    async fn handle_event(
        &self,
        key: &WatchKey,
        ev: kube::core::WatchEvent<DynamicObject>,
    ) -> Result<(), WatchFailure> {
        use kube::core::WatchEvent;
        match ev {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                self.insert(key, &obj).await;
                (self.dispatch)(key.clone(), EventKind::Added, obj);
                Ok(())
            }
            WatchEvent::Deleted(obj) => {
                self.remove(key, &obj).await;
                (self.dispatch)(key.clone(), EventKind::Deleted, obj);
                Ok(())
            }
            WatchEvent::Bookmark(_) => Ok(()),
            WatchEvent::Error(status) => {
                let code = status.code.unwrap_or(0);
                let reason = status.reason.as_deref().unwrap_or("");
                if code == 410 || reason == "Expired" || reason == "Gone" {
                    Err(WatchFailure::Restart)
                } else {
                    Err(WatchFailure::Failed)
                }
            }
        }
    }

    async fn insert(&self, key: &WatchKey, obj: &DynamicObject) {
        let tasks = self.tasks.read().await;
        if let Some(task) = tasks.get(key) {
            let name = obj.metadata.name.clone().unwrap_or_default();
            let ns = obj.metadata.namespace.clone();
            task.cache.write().await.insert(
                cache_key(ns.as_deref(), &name),
                CacheEntry {
                    object: obj.clone(),
                    observed_at: Instant::now(),
                },
            );
        }
    }

    async fn remove(&self, key: &WatchKey, obj: &DynamicObject) {
        let tasks = self.tasks.read().await;
        if let Some(task) = tasks.get(key) {
            let name = obj.metadata.name.clone().unwrap_or_default();
            let ns = obj.metadata.namespace.clone();
            task.cache
                .write()
                .await
                .remove(&cache_key(ns.as_deref(), &name));
        }
    }

    /// Returns the cached object if it was observed within the refresh
    /// interval, otherwise performs a fresh read and primes the cache.
    /// A missing object is reported as `Ok(None)`, never as an error.
    pub async fn get(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<DynamicObject>, Error> {
        let key = WatchKey {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
        };
        {
            let tasks = self.tasks.read().await;
            if let Some(task) = tasks.get(&key) {
                let cache = task.cache.read().await;
                if let Some(entry) = cache.get(&cache_key(namespace, name)) {
                    if entry.observed_at.elapsed() < self.refresh_interval {
                        return Ok(Some(entry.object.clone()));
                    }
                }
            }
        }
        let gvk = gvk_for(api_version, kind);
        let (ar, _caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        match api.get_opt(name).await? {
            Some(obj) => {
                self.insert(&key, &obj).await;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// Cancels every watch task and waits for each to drain.
    pub async fn stop_all(&self) {
        let tasks = {
            let mut tasks = self.tasks.write().await;
            std::mem::take(&mut *tasks)
        };
        for (_, task) in tasks {
            task.stopping.store(true, Ordering::Relaxed);
            task.join.abort();
        }
    }
}

enum WatchFailure {
    Restart,
    Failed,
}
