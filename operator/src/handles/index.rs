//! Process-wide handle indices (spec §3 "Ownership", §4.4, §5): a bound
//! index keyed by the owning claim's `(namespace, name)` and an unbound
//! index of warm inventory, both kept current by the watcher's dispatch
//! callback and mutated only under `bind_lock` so that matching a claim to
//! a handle is serialised cluster-wide.

use kube::api::{Api, ListParams};
use kube::Client;
use poolboy_types::ResourceHandle;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::util::Error;

pub struct HandleIndex {
    client: Client,
    namespace: String,
    handles: RwLock<HashMap<String, Arc<ResourceHandle>>>,
    bound: RwLock<HashMap<(String, String), String>>,
    unbound: RwLock<HashSet<String>>,
    /// Held for the duration of a match-and-patch so no two claims bind to
    /// the same handle (spec §5 "Matching a claim to a handle happens under
    /// the process-wide lock").
    pub bind_lock: Mutex<()>,
}

impl HandleIndex {
    pub fn new(client: Client, namespace: String) -> Arc<Self> {
        Arc::new(HandleIndex {
            client,
            namespace,
            handles: RwLock::new(HashMap::new()),
            bound: RwLock::new(HashMap::new()),
            unbound: RwLock::new(HashSet::new()),
            bind_lock: Mutex::new(()),
        })
    }

    pub async fn preload(&self) -> Result<(), Error> {
        let api: Api<ResourceHandle> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut handles = self.handles.write().await;
        let mut bound = self.bound.write().await;
        let mut unbound = self.unbound.write().await;
        handles.clear();
        bound.clear();
        unbound.clear();
        let mut continue_token = None;
        loop {
            let lp = ListParams {
                limit: Some(50),
                continue_token: continue_token.clone(),
                ..Default::default()
            };
            let list = api.list(&lp).await?;
            for h in list.items {
                index_one(&mut handles, &mut bound, &mut unbound, h);
            }
            match list.metadata.continue_.clone() {
                Some(tok) if !tok.is_empty() => continue_token = Some(tok),
                _ => break,
            }
        }
        Ok(())
    }

    pub async fn upsert(&self, handle: ResourceHandle) {
        let mut handles = self.handles.write().await;
        let mut bound = self.bound.write().await;
        let mut unbound = self.unbound.write().await;
        // Drop any stale claim-key pointing at this handle before
        // re-indexing, in case it was rebound (should not normally happen,
        // but keeps the index from ever pointing at two handles for one
        // claim).
        if let Some(name) = handle.metadata.name.clone() {
            bound.retain(|_, v| v != &name);
            unbound.remove(&name);
        }
        index_one(&mut handles, &mut bound, &mut unbound, handle);
    }

    pub async fn remove(&self, name: &str) {
        let mut handles = self.handles.write().await;
        let mut bound = self.bound.write().await;
        let mut unbound = self.unbound.write().await;
        handles.remove(name);
        bound.retain(|_, v| v != name);
        unbound.remove(name);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ResourceHandle>> {
        self.handles.read().await.get(name).cloned()
    }

    /// The handle currently bound to `(claim_namespace, claim_name)`, if any
    /// and if it still exists in the API (a lingering index entry for a
    /// handle already deleted is treated as absent).
    pub async fn bound_to(&self, claim_namespace: &str, claim_name: &str) -> Option<Arc<ResourceHandle>> {
        let key = (claim_namespace.to_string(), claim_name.to_string());
        let name = self.bound.read().await.get(&key).cloned()?;
        self.get(&name).await
    }

    /// Snapshot of every unbound handle, for the matcher and pool sweep to
    /// scan without holding the index lock across I/O.
    pub async fn unbound_handles(&self) -> Vec<Arc<ResourceHandle>> {
        let names = self.unbound.read().await.clone();
        let handles = self.handles.read().await;
        names.iter().filter_map(|n| handles.get(n).cloned()).collect()
    }
}

fn index_one(
    handles: &mut HashMap<String, Arc<ResourceHandle>>,
    bound: &mut HashMap<(String, String), String>,
    unbound: &mut HashSet<String>,
    handle: ResourceHandle,
) {
    let Some(name) = handle.metadata.name.clone() else {
        return;
    };
    match &handle.spec.resource_claim {
        Some(claim) => {
            bound.insert((claim.namespace.clone(), claim.name.clone()), name.clone());
        }
        None => {
            unbound.insert(name.clone());
        }
    }
    handles.insert(name, Arc::new(handle));
}
