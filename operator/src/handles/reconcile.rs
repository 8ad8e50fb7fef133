//! ResourceHandle reconcile loop (spec §4.4 "Reconcile").

use chrono::Utc;
use kube::api::Api;
use poolboy_types::{
    patch::patch_status, HandleResourceStatus, ObjectReference, ResourceHandle, ResourceHandleStatus, Value,
};
use std::collections::BTreeMap;

use crate::context::AppContext;
use crate::handles::annotations::{self, Requester};
use crate::handles::resource;
use crate::handles::vars::VarsBuilder;
use crate::util::messages;
use crate::util::Error;

/// Runs one full reconcile pass over `handle`. Idempotent: every branch
/// that mutates state does so once and returns, relying on the resulting
/// watch event to drive the next pass.
pub async fn reconcile(ctx: &AppContext, handle: ResourceHandle) -> Result<(), Error> {
    let name = handle.metadata.name.clone().unwrap_or_default();

    if handle.metadata.deletion_timestamp.is_some() {
        return delete(ctx, handle).await;
    }

    if let Some(claim_ref) = handle.spec.resource_claim.clone() {
        let claim_gvk_kind = "ResourceClaim";
        let api_version = format!("{}/{}", ctx.config.operator_domain, ctx.config.operator_version);
        let claim = ctx
            .watcher
            .get(&api_version, claim_gvk_kind, &claim_ref.name, Some(&claim_ref.namespace))
            .await?;
        if claim.is_none() {
            let api: Api<ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_namespace(&handle, ctx));
            api.delete(&name, &Default::default()).await.ok();
            return Ok(());
        }
    }

    if let Some(end) = &handle.spec.lifespan.end {
        if let Ok(end) = chrono::DateTime::parse_from_rfc3339(end) {
            if Utc::now() > end {
                let api: Api<ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_namespace(&handle, ctx));
                api.delete(&name, &Default::default()).await.ok();
                return Ok(());
            }
        }
    }

    let mut resource_statuses: Vec<HandleResourceStatus> = handle
        .status
        .as_ref()
        .map(|s| s.resources.clone())
        .unwrap_or_default();
    resource_statuses.resize_with(handle.spec.resources.len(), Default::default);

    let requester = Requester::default();

    // The primary provider's state (index 0) is the usual gating source for
    // linked-provider `waitFor` expressions; see the linked-provider Open
    // Question decision recorded in DESIGN.md.
    let primary_state = resource_statuses.first().and_then(|r| r.state.clone());

    let primary_provider = match &handle.spec.provider {
        Some(name) => ctx.providers.get(name).await?,
        None => None,
    };
    let linked_by_resource_name: BTreeMap<String, poolboy_types::LinkedResourceProvider> = primary_provider
        .as_ref()
        .map(|p| {
            p.spec
                .linked_resource_providers
                .iter()
                .map(|l| (l.resource_name.clone(), l.clone()))
                .collect()
        })
        .unwrap_or_default();

    for i in 0..handle.spec.resources.len() {
        let entry = &handle.spec.resources[i];
        let Some(provider_name) = &entry.provider else {
            continue;
        };
        let Some(provider) = ctx.providers.get(provider_name).await? else {
            resource_statuses[i].waiting_for = Some(format!("ResourceProvider {}", provider_name));
            continue;
        };

        if provider.spec.resource_requires_claim && handle.spec.resource_claim.is_none() {
            resource_statuses[i].waiting_for = Some(messages::WAITING_FOR_RESOURCE_CLAIM.to_string());
            continue;
        }

        let mut extra_vars = Vec::new();
        if let Some(name) = &entry.name {
            if let Some(linked) = linked_by_resource_name.get(name) {
                let gate_ok = match &linked.wait_for {
                    Some(expr) => evaluate_truthy(ctx, expr, primary_state.as_ref()),
                    None => true,
                };
                if !gate_ok {
                    resource_statuses[i].waiting_for = Some(messages::WAITING_FOR_LINKED_PROVIDER.to_string());
                    continue;
                }
                for tv in &linked.template_vars {
                    if let Some(state) = &primary_state {
                        if let Some(v) = state.pointer(&tv.json_path) {
                            extra_vars.push((tv.name.clone(), v.clone()));
                        }
                    }
                }
            }
        }
        resource_statuses[i].waiting_for = None;

        let base_template = entry
            .template
            .clone()
            .unwrap_or_else(|| provider.spec.template.definition.clone());

        let mut vars = VarsBuilder::new()
            .handle(&handle)
            .provider(&provider)
            .resource_index(i)
            .resource_name(entry.name.as_deref())
            .resource_state(resource_statuses[i].state.as_ref())
            .resource_template(&base_template)
            .requester(&requester);
        for (k, v) in extra_vars {
            vars = vars.extra(&k, v);
        }
        let vars = vars.build();

        let mut projected = if provider.spec.template.enable {
            ctx.template.render_tree(&base_template, &vars)?
        } else {
            base_template
        };

        if let Some(override_) = &provider.spec.override_ {
            let rendered_override = if provider.spec.template.enable {
                ctx.template.render_tree(override_, &vars)?
            } else {
                override_.clone()
            };
            projected.deep_merge(rendered_override);
        }

        let (api_version, kind, resolved_name, namespace) =
            resolve_identity(&handle, &provider, entry.reference.as_ref(), &mut projected, i, &name)?;

        let pool = handle.spec.resource_pool.clone();
        let annotations = annotations::stamp(&ctx.config, &handle, provider_name, i, pool.as_ref(), &requester);
        merge_annotations(&mut projected, &annotations);

        ctx.watcher.start_watch(&api_version, &kind, Some(&namespace)).await;

        let existing = resource::get(&ctx.client, &api_version, &kind, &resolved_name, Some(&namespace)).await?;
        match existing {
            None => {
                let created = resource::create(&ctx.client, &api_version, &kind, Some(&namespace), &projected).await?;
                resource_statuses[i].reference = Some(ObjectReference {
                    api_version,
                    kind,
                    name: resolved_name,
                    namespace: Some(namespace),
                });
                resource_statuses[i].state = Some(resource::from_dynamic_object(&created));
            }
            Some(current) => {
                let current_value = resource::from_dynamic_object(&current);
                let current_json: serde_json::Value = current_value.clone().into();
                let projected_json: serde_json::Value = projected.clone().into();
                let ops = crate::jsonpatch::jsonpatch_from_diff(
                    &current_json,
                    &projected_json,
                    &provider.spec.update_filters,
                );
                resource::apply_patch(&ctx.client, &api_version, &kind, &resolved_name, Some(&namespace), ops).await?;
                resource_statuses[i].state = Some(current_value);
            }
        }
    }

    recompute_rollups(ctx, &handle, &mut resource_statuses).await;
    publish_status(ctx, &handle, resource_statuses).await?;
    Ok(())
}

fn handle_namespace(handle: &ResourceHandle, ctx: &AppContext) -> String {
    handle.metadata.namespace.clone().unwrap_or_else(|| ctx.config.operator_namespace.clone())
}

fn evaluate_truthy(ctx: &AppContext, expr: &str, state: Option<&Value>) -> bool {
    let mut vars = BTreeMap::new();
    vars.insert("resource_state".to_string(), state.cloned().unwrap_or(Value::Null));
    let tpl = Value::String(format!("{{{{ {} | bool }}}}", expr));
    matches!(ctx.template.render_tree(&tpl, &vars), Ok(Value::Bool(true)))
}

fn resolve_identity(
    handle: &ResourceHandle,
    _provider: &poolboy_types::ResourceProvider,
    reference: Option<&ObjectReference>,
    projected: &mut Value,
    index: usize,
    handle_name: &str,
) -> Result<(String, String, String, String), Error> {
    let api_version = projected
        .get("apiVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::permanent("projected resource is missing apiVersion"))?;
    let kind = projected
        .get("kind")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::permanent("projected resource is missing kind"))?;

    if let Some(reference) = reference {
        if reference.api_version != api_version || reference.kind != kind {
            return Err(Error::permanent(format!(
                "cannot change apiVersion/kind of an already-created resource: {}/{} -> {}/{}",
                reference.api_version, reference.kind, api_version, kind
            )));
        }
    }

    let namespace = reference
        .and_then(|r| r.namespace.clone())
        .or_else(|| {
            projected
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| handle.metadata.namespace.clone().unwrap_or_default());

    let resolved_name = match reference {
        Some(r) => r.name.clone(),
        None => projected
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("guid{}-{}", index, short_guid(handle_name))),
    };

    if let Some(obj) = projected.as_object_mut() {
        let metadata = obj.entry("metadata".to_string()).or_insert_with(|| Value::Object(Default::default()));
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert("name".to_string(), Value::String(resolved_name.clone()));
            meta.insert("namespace".to_string(), Value::String(namespace.clone()));
        }
    }

    Ok((api_version, kind, resolved_name, namespace))
}

fn short_guid(seed: &str) -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let _ = seed;
    uuid.split('-').next().unwrap_or(&uuid).to_string()
}

fn merge_annotations(projected: &mut Value, annotations: &BTreeMap<String, String>) {
    let Some(obj) = projected.as_object_mut() else { return };
    let metadata = obj.entry("metadata".to_string()).or_insert_with(|| Value::Object(Default::default()));
    let Some(meta) = metadata.as_object_mut() else { return };
    let ann = meta.entry("annotations".to_string()).or_insert_with(|| Value::Object(Default::default()));
    if let Some(ann) = ann.as_object_mut() {
        for (k, v) in annotations {
            ann.insert(k.clone(), Value::String(v.clone()));
        }
    }
}

async fn recompute_rollups(ctx: &AppContext, handle: &ResourceHandle, statuses: &mut [HandleResourceStatus]) {
    for (i, status) in statuses.iter_mut().enumerate() {
        let Some(state) = status.state.clone() else {
            status.healthy = None;
            status.ready = None;
            continue;
        };
        let provider_name = handle.spec.resources.get(i).and_then(|r| r.provider.clone());
        let provider = match provider_name {
            Some(name) => ctx.providers.get(&name).await.ok().flatten(),
            None => None,
        };
        let mut vars = BTreeMap::new();
        vars.insert("resource_state".to_string(), state);
        status.healthy = provider
            .as_ref()
            .and_then(|p| p.spec.health_check.as_ref())
            .map(|expr| eval_check(ctx, expr, &vars));
        status.ready = provider
            .as_ref()
            .and_then(|p| p.spec.readiness_check.as_ref())
            .map(|expr| eval_check(ctx, expr, &vars));
    }
}

fn eval_check(ctx: &AppContext, expr: &str, vars: &BTreeMap<String, Value>) -> bool {
    let tpl = Value::String(format!("{{{{ {} | bool }}}}", expr));
    matches!(ctx.template.render_tree(&tpl, vars), Ok(Value::Bool(true)))
}

/// Rolls up `all true / any false / any null` across resources, per spec
/// §4.4 step 11.
fn rollup(values: &[Option<bool>]) -> Option<bool> {
    if values.iter().any(|v| *v == Some(false)) {
        Some(false)
    } else if values.iter().any(|v| v.is_none()) {
        None
    } else {
        Some(true)
    }
}

async fn publish_status(
    ctx: &AppContext,
    handle: &ResourceHandle,
    resources: Vec<HandleResourceStatus>,
) -> Result<(), Error> {
    let healthy = rollup(&resources.iter().map(|r| r.healthy).collect::<Vec<_>>());
    let ready = rollup(&resources.iter().map(|r| r.ready).collect::<Vec<_>>());
    patch_status::<ResourceHandleStatus, ResourceHandle>(ctx.client.clone(), handle, |status| {
        status.resources = resources;
        status.healthy = healthy;
        status.ready = ready;
    })
    .await?;
    Ok(())
}

/// Delete path: remove every downstream reference, delete the bound claim
/// (the claim survives only if detached, which is recorded on the claim,
/// not the handle), then clear the finalizer.
async fn delete(ctx: &AppContext, handle: ResourceHandle) -> Result<(), Error> {
    if let Some(status) = &handle.status {
        for r in &status.resources {
            if let Some(reference) = &r.reference {
                resource::delete(
                    &ctx.client,
                    &reference.api_version,
                    &reference.kind,
                    &reference.name,
                    reference.namespace.as_deref(),
                )
                .await?;
            }
        }
    }
    if let Some(claim_ref) = &handle.spec.resource_claim {
        let api: Api<poolboy_types::ResourceClaim> = Api::namespaced(ctx.client.clone(), &claim_ref.namespace);
        api.delete(&claim_ref.name, &Default::default()).await.ok();
    }
    let name = handle.metadata.name.clone().unwrap_or_default();
    let namespace = handle_namespace(&handle, ctx);
    crate::util::finalizer::delete::<ResourceHandle>(ctx.client.clone(), &name, &namespace).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rollup_any_false_wins() {
        assert_eq!(rollup(&[Some(true), Some(false), None]), Some(false));
    }

    #[test]
    fn rollup_null_when_unknown_and_no_false() {
        assert_eq!(rollup(&[Some(true), None]), None);
    }

    #[test]
    fn rollup_true_when_all_true() {
        assert_eq!(rollup(&[Some(true), Some(true)]), Some(true));
    }
}
