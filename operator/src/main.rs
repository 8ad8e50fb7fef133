use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::core::DynamicObject;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

mod claims;
mod config;
mod context;
mod handles;
mod jsonpatch;
mod pools;
mod providers;
mod template;
mod util;
mod watcher;

#[cfg(feature = "metrics")]
mod metrics;

use config::Config;
use context::AppContext;
use handles::index::HandleIndex;
use poolboy_types::{ResourceClaim, ResourceHandle, ResourcePool, ResourceProvider};
use providers::ProviderRegistry;
use watcher::{EventKind, ResourceWatcher, WatchKey};

fn to_typed<T: serde::de::DeserializeOwned>(obj: DynamicObject) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

/// Builds the dispatch callback handed to the watcher: routes every observed
/// event for a first-party kind to its index and spawns a reconcile task.
/// Downstream kinds fall through untouched — their cache entry was already
/// primed by the watcher before dispatch runs. `ctx_cell` breaks the cycle
/// between the watcher (needed by `AppContext`) and the context the
/// dispatch closure needs: it is populated once, immediately after the
/// context is constructed, before any watch is started.
fn make_dispatch(ctx_cell: Arc<OnceLock<Arc<AppContext>>>) -> watcher::Dispatch {
    Arc::new(move |key: WatchKey, event: EventKind, obj: DynamicObject| {
        let Some(ctx) = ctx_cell.get().cloned() else { return };
        match key.kind.as_str() {
            "ResourceProvider" => {
                tokio::spawn(async move {
                    if matches!(event, EventKind::Deleted) {
                        if let Some(name) = obj.metadata.name {
                            ctx.providers.remove(&name).await;
                        }
                    } else if let Ok(provider) = to_typed::<ResourceProvider>(obj) {
                        ctx.providers.upsert(provider).await;
                    }
                });
            }
            "ResourceHandle" => {
                tokio::spawn(async move {
                    match event {
                        EventKind::Deleted => {
                            if let Some(name) = obj.metadata.name {
                                ctx.handles.remove(&name).await;
                            }
                        }
                        EventKind::Preload => {
                            if let Ok(handle) = to_typed::<ResourceHandle>(obj) {
                                ctx.handles.upsert(handle).await;
                            }
                        }
                        EventKind::Added | EventKind::Modified => {
                            if let Ok(handle) = to_typed::<ResourceHandle>(obj) {
                                ctx.handles.upsert(handle.clone()).await;
                                run_with_retry("ResourceHandle", handles::reconcile(&ctx, handle)).await;
                            }
                        }
                    }
                });
            }
            "ResourceClaim" => {
                if matches!(event, EventKind::Added | EventKind::Modified) {
                    tokio::spawn(async move {
                        if let Ok(claim) = to_typed::<ResourceClaim>(obj) {
                            run_with_retry("ResourceClaim", claims::reconcile(&ctx, claim)).await;
                        }
                    });
                }
            }
            "ResourcePool" => {
                if matches!(event, EventKind::Added | EventKind::Modified) {
                    tokio::spawn(async move {
                        if let Ok(pool) = to_typed::<ResourcePool>(obj) {
                            run_with_retry("ResourcePool", pools::reconcile(&ctx, pool)).await;
                        }
                    });
                }
            }
            // Every other kind is a downstream resource a handle's template
            // created. Locate the owning handle by the annotations stamped
            // on it, re-reconcile that handle, then propagate to its bound
            // claim so both pick up the change reactively instead of
            // waiting on the periodic sweep.
            _ => {
                if matches!(event, EventKind::Added | EventKind::Modified | EventKind::Deleted) {
                    tokio::spawn(dispatch_downstream(ctx, obj));
                }
            }
        }
    })
}

async fn dispatch_downstream(ctx: Arc<AppContext>, obj: DynamicObject) {
    let Some(annotations) = &obj.metadata.annotations else { return };
    let handle_name_key = ctx.config.annotation(handles::annotations::RESOURCE_HANDLE_NAME);
    let handle_namespace_key = ctx.config.annotation(handles::annotations::RESOURCE_HANDLE_NAMESPACE);
    let Some(handle_name) = annotations.get(&handle_name_key) else { return };
    let handle_namespace = annotations
        .get(&handle_namespace_key)
        .cloned()
        .unwrap_or_else(|| ctx.config.operator_namespace.clone());

    let Some(handle) = ctx.handles.get(handle_name).await else { return };
    if handle.metadata.namespace.as_deref() != Some(handle_namespace.as_str()) {
        return;
    }

    let claim_ref = handle.spec.resource_claim.clone();
    run_with_retry("ResourceHandle", handles::reconcile(&ctx, (*handle).clone())).await;

    if let Some(claim_ref) = claim_ref {
        let api_version = format!("{}/{}", ctx.config.operator_domain, ctx.config.operator_version);
        if let Ok(Some(claim_obj)) = ctx
            .watcher
            .get(&api_version, "ResourceClaim", &claim_ref.name, Some(&claim_ref.namespace))
            .await
        {
            if let Ok(claim) = to_typed::<ResourceClaim>(claim_obj) {
                run_with_retry("ResourceClaim", claims::reconcile(&ctx, claim)).await;
            }
        }
    }
}

/// Awaits a single reconcile future, logging and counting failures. Unlike
/// the watch-driven path (which relies on the next event to redrive it),
/// this performs no busy retry: a temporary error is left for the next
/// watch event or periodic sweep.
async fn run_with_retry(kind: &'static str, fut: impl std::future::Future<Output = Result<(), util::Error>>) {
    match fut.await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(util::Error::Permanent(message)) => {
            tracing::error!(kind, message, "permanent error, will not retry until definition changes");
            #[cfg(feature = "metrics")]
            metrics::HANDLER_EXCEPTION_COUNTER.with_label_values(&[kind]).inc();
        }
        Err(e) => {
            tracing::warn!(kind, error = %e, "reconcile failed, awaiting next event or sweep");
            #[cfg(feature = "metrics")]
            metrics::HANDLER_EXCEPTION_COUNTER.with_label_values(&[kind]).inc();
        }
    }
}

/// Periodic full sweep over every ResourceClaim: the backstop that re-drives
/// reconciliation even when no event fired, e.g. a claim's lifespan expiring
/// purely from wall-clock time passing.
async fn sweep_claims(ctx: Arc<AppContext>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let api: Api<ResourceClaim> = Api::namespaced(ctx.client.clone(), &ctx.config.operator_namespace);
        for claim in list_all(&api).await {
            run_with_retry("ResourceClaim", claims::reconcile(&ctx, claim)).await;
        }
    }
}

async fn sweep_handles(ctx: Arc<AppContext>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let api: Api<ResourceHandle> = Api::namespaced(ctx.client.clone(), &ctx.config.operator_namespace);
        for handle in list_all(&api).await {
            run_with_retry("ResourceHandle", handles::reconcile(&ctx, handle)).await;
        }
    }
}

async fn sweep_pools(ctx: Arc<AppContext>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let api: Api<ResourcePool> = Api::namespaced(ctx.client.clone(), &ctx.config.operator_namespace);
        for pool in list_all(&api).await {
            run_with_retry("ResourcePool", pools::reconcile(&ctx, pool)).await;
        }
    }
}

async fn list_all<T>(api: &Api<T>) -> Vec<T>
where
    T: Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned,
{
    let mut items = Vec::new();
    let mut continue_token = None;
    loop {
        let lp = ListParams {
            limit: Some(50),
            continue_token: continue_token.clone(),
            ..Default::default()
        };
        let list = match api.list(&lp).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "periodic sweep list failed");
                break;
            }
        };
        let next_token = list.metadata.continue_.clone();
        items.extend(list.items);
        match next_token {
            Some(tok) if !tok.is_empty() => continue_token = Some(tok),
            _ => break,
        }
    }
    items
}

async fn run(client: Client) {
    let config = Config::from_env();
    let namespace = config.operator_namespace.clone();

    let providers = ProviderRegistry::new(client.clone(), namespace.clone());
    let handles = HandleIndex::new(client.clone(), namespace.clone());

    providers.preload().await.expect("failed to preload ResourceProviders");
    handles.preload().await.expect("failed to preload ResourceHandles");

    let resource_refresh_interval = config.resource_refresh_interval;
    let manage_claims_interval = config.manage_claims_interval;
    let manage_handles_interval = config.manage_handles_interval;
    let manage_pools_interval = config.manage_pools_interval;
    let domain_version = format!("{}/{}", config.operator_domain, config.operator_version);

    let ctx_cell: Arc<OnceLock<Arc<AppContext>>> = Arc::new(OnceLock::new());
    let watcher = ResourceWatcher::new(client.clone(), resource_refresh_interval, make_dispatch(ctx_cell.clone()));
    let ctx = AppContext::new(client, config, watcher.clone(), providers, handles);
    ctx_cell.set(ctx.clone()).ok();

    for kind in ["ResourceProvider", "ResourceHandle", "ResourceClaim", "ResourcePool"] {
        watcher.start_watch(&domain_version, kind, Some(&namespace)).await;
    }

    let mut set = tokio::task::JoinSet::new();
    set.spawn(sweep_claims(ctx.clone(), manage_claims_interval));
    set.spawn(sweep_handles(ctx.clone(), manage_handles_interval));
    set.spawn(sweep_pools(ctx.clone(), manage_pools_interval));

    #[cfg(feature = "metrics")]
    {
        let port: u16 = std::env::var("METRICS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000);
        set.spawn(metrics::run_server(port));
    }

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            panic!("task exited unexpectedly: {}", e);
        }
    }

    panic!("all tasks exited unexpectedly");
}

#[tokio::main]
async fn main() {
    util::logging::init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    run(client).await;

    panic!("exited prematurely");
}
