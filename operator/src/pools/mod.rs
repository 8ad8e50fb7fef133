//! ResourcePool reconciler (spec §4.5): keeps a configured count of warm,
//! unbound ResourceHandles available for claims to bind to without paying
//! for cold creation.

use kube::api::Api;
use poolboy_types::{NamespaceName, ResourceEntry, ResourcePool, ResourcePoolStatus, ResourceHandleCount};

use crate::context::AppContext;
use crate::handles;
use crate::util::Error;

pub async fn reconcile(ctx: &AppContext, pool: ResourcePool) -> Result<(), Error> {
    let name = pool.metadata.name.clone().unwrap_or_default();
    let namespace = pool.metadata.namespace.clone().unwrap_or_default();

    if pool.metadata.deletion_timestamp.is_some() {
        return delete(ctx, &pool).await;
    }

    let has_finalizer = pool
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|f| f == crate::util::finalizer::FINALIZER_NAME))
        .unwrap_or(false);
    if !has_finalizer {
        crate::util::finalizer::add::<ResourcePool>(ctx.client.clone(), &name, &namespace).await?;
        return Ok(());
    }

    let mut members: Vec<_> = ctx
        .handles
        .unbound_handles()
        .await
        .into_iter()
        .filter(|h| {
            h.spec
                .resource_pool
                .as_ref()
                .map(|p| p.name == name && p.namespace == namespace)
                .unwrap_or(false)
        })
        .collect();

    if pool.spec.delete_unhealthy_resource_handles {
        let mut survivors = Vec::with_capacity(members.len());
        for handle in members {
            let unhealthy = handle.status.as_ref().map(|s| s.healthy == Some(false)).unwrap_or(false);
            if unhealthy {
                let handle_namespace = handle.metadata.namespace.clone().unwrap_or_default();
                let handle_name = handle.metadata.name.clone().unwrap_or_default();
                let api: Api<poolboy_types::ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_namespace);
                api.delete(&handle_name, &Default::default()).await.ok();
            } else {
                survivors.push(handle);
            }
        }
        members = survivors;
    }

    let available = members
        .iter()
        .filter(|h| {
            let status = h.status.as_ref();
            status.map(|s| s.healthy != Some(false)).unwrap_or(true)
        })
        .count();
    let ready = members.iter().filter(|h| h.status.as_ref().map(|s| s.ready == Some(true)).unwrap_or(false)).count();

    let deficit = pool.spec.min_available.saturating_sub(available);
    let to_create = match pool.spec.max_unready {
        Some(max_unready) => deficit.min(max_unready.saturating_sub(members.len() - available)),
        None => deficit,
    };

    let target = target_resources(ctx, &pool).await?;
    for _ in 0..to_create {
        let created = handles::create_for_pool(ctx, &pool, &target).await?;
        ctx.handles.upsert(created.clone()).await;
        members.push(std::sync::Arc::new(created));
    }

    publish_status(ctx, &pool, &members, available, ready).await?;
    Ok(())
}

/// Deletes every unbound handle still owned by this pool, then clears the
/// finalizer so the pool object itself can be removed (spec §3 Lifecycles).
async fn delete(ctx: &AppContext, pool: &ResourcePool) -> Result<(), Error> {
    let name = pool.metadata.name.clone().unwrap_or_default();
    let namespace = pool.metadata.namespace.clone().unwrap_or_default();

    let members: Vec<_> = ctx
        .handles
        .unbound_handles()
        .await
        .into_iter()
        .filter(|h| {
            h.spec
                .resource_pool
                .as_ref()
                .map(|p| p.name == name && p.namespace == namespace)
                .unwrap_or(false)
        })
        .collect();
    for handle in members {
        let handle_namespace = handle.metadata.namespace.clone().unwrap_or_default();
        let handle_name = handle.metadata.name.clone().unwrap_or_default();
        let api: Api<poolboy_types::ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_namespace);
        api.delete(&handle_name, &Default::default()).await.ok();
    }

    crate::util::finalizer::delete::<ResourcePool>(ctx.client.clone(), &name, &namespace).await?;
    Ok(())
}

async fn target_resources(ctx: &AppContext, pool: &ResourcePool) -> Result<Vec<ResourceEntry>, Error> {
    if let Some(provider_ref) = &pool.spec.provider {
        let Some(provider) = ctx.providers.get(&provider_ref.name).await? else {
            return Err(Error::temporary(
                format!("ResourceProvider {} not yet registered", provider_ref.name),
                std::time::Duration::from_secs(60),
            ));
        };
        let mut entries = vec![ResourceEntry {
            name: None,
            provider: provider.metadata.name.clone(),
            template: Some(provider.spec.template.definition.clone()),
            reference: None,
        }];
        for linked in &provider.spec.linked_resource_providers {
            entries.push(ResourceEntry {
                name: Some(linked.resource_name.clone()),
                provider: Some(linked.name.clone()),
                template: None,
                reference: None,
            });
        }
        return Ok(entries);
    }
    let Some(resources) = &pool.spec.resources else {
        return Err(Error::permanent("one of spec.provider or spec.resources is required"));
    };
    let mut assigned = Vec::with_capacity(resources.len());
    for entry in resources {
        let mut entry = entry.clone();
        if entry.provider.is_none() {
            let template = entry.template.clone().unwrap_or_default();
            let provider = ctx.providers.find_by_template_match(&template).await?;
            entry.provider = provider.metadata.name.clone();
        }
        assigned.push(entry);
    }
    Ok(assigned)
}

async fn publish_status(
    ctx: &AppContext,
    pool: &ResourcePool,
    members: &[std::sync::Arc<poolboy_types::ResourceHandle>],
    available: usize,
    ready: usize,
) -> Result<(), Error> {
    poolboy_types::patch::patch_status::<ResourcePoolStatus, ResourcePool>(ctx.client.clone(), pool, |status| {
        status.resource_handles = members
            .iter()
            .filter_map(|h| {
                Some(NamespaceName {
                    name: h.metadata.name.clone()?,
                    namespace: h.metadata.namespace.clone().unwrap_or_default(),
                })
            })
            .collect();
        status.resource_handle_count = ResourceHandleCount { available, ready };
    })
    .await?;

    #[cfg(feature = "metrics")]
    {
        let name = pool.metadata.name.clone().unwrap_or_default();
        let namespace = pool.metadata.namespace.clone().unwrap_or_default();
        let labels = [name.as_str(), namespace.as_str()];
        crate::metrics::POOL_MIN_AVAILABLE
            .with_label_values(&labels)
            .set(pool.spec.min_available as f64);
        crate::metrics::POOL_AVAILABLE.with_label_values(&labels).set(available as f64);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    #[test]
    fn deficit_is_never_negative() {
        let min_available: usize = 2;
        let available: usize = 5;
        assert_eq!(min_available.saturating_sub(available), 0);
    }
}
