//! ResourceHandle lifecycle: the bound/unbound indices, the claim matcher,
//! the per-handle reconcile loop and the two handle factories (spec §4.4).

pub mod annotations;
pub mod index;
mod matcher;
mod reconcile;
mod resource;
mod vars;

pub use reconcile::reconcile;

use chrono::{Duration as ChronoDuration, Utc};
use kube::api::{Api, PostParams};
use poolboy_types::{
    HandleLifespanSpec, LifespanLimits, NamespaceName, ResourceClaim, ResourceEntry, ResourceHandle,
    ResourceHandleSpec, ResourcePool,
};

use crate::context::AppContext;
use crate::util::Error;

/// Binds `claim` to a handle, either an existing unbound candidate or a
/// freshly created one. Entered under `ctx.handles.bind_lock` so no two
/// claims can race for the same handle (spec §5).
pub async fn bind_handle_to_claim(
    ctx: &AppContext,
    claim: &ResourceClaim,
    target: &[ResourceEntry],
) -> Result<ResourceHandle, Error> {
    let claim_name = claim.metadata.name.clone().unwrap_or_default();
    let claim_namespace = claim.metadata.namespace.clone().unwrap_or_default();

    if let Some(existing) = ctx.handles.bound_to(&claim_namespace, &claim_name).await {
        return Ok((*existing).clone());
    }

    let _guard = ctx.handles.bind_lock.lock().await;
    // Re-check after acquiring the lock: another task may have bound this
    // claim while we were waiting.
    if let Some(existing) = ctx.handles.bound_to(&claim_namespace, &claim_name).await {
        return Ok((*existing).clone());
    }

    let requested_pool = requested_pool_for(ctx, claim);
    let candidates = ctx.handles.unbound_handles().await;
    if let Some(winner) = matcher::find_candidate(candidates, &ctx.providers, requested_pool.as_ref(), target).await {
        match patch_winner(ctx, &winner, claim, target).await {
            Ok(patched) => {
                ctx.handles.upsert(patched.clone()).await;
                return Ok(patched);
            }
            Err(e) if e.is_not_found() => {
                // Deleted underfoot; fall through to create a new handle.
                ctx.handles.remove(&winner.metadata.name.clone().unwrap_or_default()).await;
            }
            Err(e) => return Err(e),
        }
    }

    let created = create_for_claim(ctx, claim, target).await?;
    ctx.handles.upsert(created.clone()).await;
    Ok(created)
}

/// Reads the claim's explicit pool request off its `resource-pool-name`
/// annotation (and `resource-pool-namespace`, defaulting to the operator's
/// namespace), honoring the same convention the handle side uses when
/// stamping its own pool annotation. Absent the annotation, the claim has no
/// pool affinity and may bind to any pool's inventory.
fn requested_pool_for(ctx: &AppContext, claim: &ResourceClaim) -> Option<NamespaceName> {
    let claim_annotations = claim.metadata.annotations.as_ref()?;
    let name = claim_annotations
        .get(&ctx.config.annotation(annotations::RESOURCE_POOL_NAME))?
        .clone();
    let namespace = claim_annotations
        .get(&ctx.config.annotation(annotations::RESOURCE_POOL_NAMESPACE))
        .cloned()
        .unwrap_or_else(|| ctx.config.operator_namespace.clone());
    Some(NamespaceName { name, namespace })
}

async fn patch_winner(
    ctx: &AppContext,
    winner: &ResourceHandle,
    claim: &ResourceClaim,
    target: &[ResourceEntry],
) -> Result<ResourceHandle, Error> {
    let name = winner.metadata.name.clone().unwrap_or_default();
    let namespace = winner.metadata.namespace.clone().unwrap_or_else(|| ctx.config.operator_namespace.clone());
    let api: Api<ResourceHandle> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut modified = winner.clone();
    modified.spec.resource_claim = Some(NamespaceName {
        name: claim.metadata.name.clone().unwrap_or_default(),
        namespace: claim.metadata.namespace.clone().unwrap_or_default(),
    });
    for (i, entry) in target.iter().enumerate() {
        if modified.spec.resources.get(i).is_none() {
            modified.spec.resources.push(entry.clone());
        }
    }

    let limits = provider_lifespan_for(ctx, target).await;
    let start = winner
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);
    let requested_end = claim
        .spec
        .lifespan
        .end
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let end = compute_lifespan_end(start, requested_end, &limits)?;
    modified.spec.lifespan = HandleLifespanSpec {
        end: end.map(|e| e.to_rfc3339()),
        default: limits.default.clone(),
        maximum: limits.maximum.clone(),
        relative_maximum: limits.relative_maximum.clone(),
    };

    let patch = kube::api::Patch::Json::<ResourceHandle>(json_patch::diff(
        &serde_json::to_value(winner).unwrap(),
        &serde_json::to_value(&modified).unwrap(),
    ));
    let patched = api.patch(&name, &kube::api::PatchParams::apply("poolboy"), &patch).await?;

    #[cfg(feature = "metrics")]
    if let Some(pool) = &winner.spec.resource_pool {
        crate::metrics::POOL_USED_TOTAL
            .with_label_values(&[pool.name.as_str(), pool.namespace.as_str()])
            .inc();
    }

    Ok(patched)
}

/// Computes `status.lifespan.end` as the smallest of the requested end, the
/// provider's `default`, `relativeMaximum` (relative to now) and `maximum`
/// (relative to `start`).
pub fn compute_lifespan_end(
    start: chrono::DateTime<Utc>,
    requested_end: Option<chrono::DateTime<Utc>>,
    limits: &LifespanLimits,
) -> Result<Option<chrono::DateTime<Utc>>, Error> {
    let mut candidates = Vec::new();
    if let Some(end) = requested_end {
        candidates.push(end);
    }
    if let Some(default) = &limits.default {
        candidates.push(start + to_chrono(default)?);
    }
    if let Some(max) = &limits.maximum {
        candidates.push(start + to_chrono(max)?);
    }
    if let Some(rel) = &limits.relative_maximum {
        candidates.push(Utc::now() + to_chrono(rel)?);
    }
    Ok(candidates.into_iter().min())
}

fn to_chrono(duration_str: &str) -> Result<ChronoDuration, Error> {
    let d = parse_duration::parse(duration_str)?;
    Ok(ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero()))
}

/// Creates a new handle bound to `claim` from its resource list.
pub async fn create_for_claim(
    ctx: &AppContext,
    claim: &ResourceClaim,
    target: &[ResourceEntry],
) -> Result<ResourceHandle, Error> {
    let claim_name = claim.metadata.name.clone().unwrap_or_default();
    let claim_namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let start = claim
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);

    let limits = provider_lifespan_for(ctx, target).await;
    let requested_end = claim
        .spec
        .lifespan
        .end
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let end = compute_lifespan_end(start, requested_end, &limits)?;

    let name = format!("guid-{}", short_uuid());
    let handle = ResourceHandle::new(
        &name,
        ResourceHandleSpec {
            resources: target.to_vec(),
            resource_claim: Some(NamespaceName {
                name: claim_name,
                namespace: claim_namespace,
            }),
            lifespan: HandleLifespanSpec {
                end: end.map(|e| e.to_rfc3339()),
                default: limits.default.clone(),
                maximum: limits.maximum.clone(),
                relative_maximum: limits.relative_maximum.clone(),
            },
            ..Default::default()
        },
    );
    create_handle(ctx, handle).await
}

/// Creates a new unbound handle for pool warm inventory; the lifespan end is
/// `now + lifespan.unclaimed` when configured, otherwise unset.
pub async fn create_for_pool(ctx: &AppContext, pool: &ResourcePool, target: &[ResourceEntry]) -> Result<ResourceHandle, Error> {
    let pool_name = pool.metadata.name.clone().unwrap_or_default();
    let pool_namespace = pool.metadata.namespace.clone().unwrap_or_default();
    let end = match &pool.spec.lifespan.unclaimed {
        Some(d) => Some(Utc::now() + to_chrono(d)?),
        None => None,
    };
    let name = format!("guid-{}", short_uuid());
    let handle = ResourceHandle::new(
        &name,
        ResourceHandleSpec {
            resources: target.to_vec(),
            resource_pool: Some(NamespaceName {
                name: pool_name,
                namespace: pool_namespace,
            }),
            lifespan: HandleLifespanSpec {
                end: end.map(|e| e.to_rfc3339()),
                default: pool.spec.lifespan.default.clone(),
                maximum: pool.spec.lifespan.maximum.clone(),
                relative_maximum: pool.spec.lifespan.relative_maximum.clone(),
            },
            ..Default::default()
        },
    );
    create_handle(ctx, handle).await
}

async fn create_handle(ctx: &AppContext, mut handle: ResourceHandle) -> Result<ResourceHandle, Error> {
    handle.metadata.finalizers = Some(vec![crate::util::finalizer::FINALIZER_NAME.to_string()]);
    let api: Api<ResourceHandle> = Api::namespaced(ctx.client.clone(), &ctx.config.operator_namespace);
    Ok(api.create(&PostParams::default(), &handle).await?)
}

async fn provider_lifespan_for(ctx: &AppContext, target: &[ResourceEntry]) -> LifespanLimits {
    for entry in target {
        if let Some(name) = &entry.provider {
            if let Ok(Some(provider)) = ctx.providers.get(name).await {
                return provider.spec.lifespan.clone();
            }
        }
    }
    LifespanLimits::default()
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().to_string().split('-').next().unwrap().to_string()
}
