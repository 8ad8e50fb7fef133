//! ResourceClaim reconciler (spec §4.3): provider assignment, defaulting,
//! validation, binding, template/lifespan propagation, and deletion.

mod validate;

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use poolboy_types::patch::patch_status;
use poolboy_types::{
    ApprovalStatus, ClaimLifespanStatus, ClaimResourceHandleStatus, ProviderAssignment, ResourceClaim,
    ResourceClaimStatus, ResourceEntry, Value,
};

use crate::context::AppContext;
use crate::handles;
use crate::util::messages;
use crate::util::Error;

const INIT_TIMESTAMP_ANNOTATION: &str = "init-timestamp";

pub async fn reconcile(ctx: &AppContext, claim: ResourceClaim) -> Result<(), Error> {
    let namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let name = claim.metadata.name.clone().unwrap_or_default();

    if claim.metadata.deletion_timestamp.is_some() {
        return delete(ctx, &claim).await;
    }

    // 1. Not-yet-started.
    if let Some(start) = &claim.spec.lifespan.start {
        if let Ok(start) = chrono::DateTime::parse_from_rfc3339(start) {
            if start.with_timezone(&Utc) > Utc::now() {
                return Ok(());
            }
        }
    }

    // 2. Detached claims only track their own lifespan end; they no longer
    // drive a handle.
    let detached = claim
        .status
        .as_ref()
        .and_then(|s| s.resource_handle.as_ref())
        .and_then(|h| h.detached)
        .unwrap_or(false);
    if detached {
        if let Some(end) = claim.status.as_ref().and_then(|s| s.lifespan.end.as_deref()) {
            if let Ok(end) = chrono::DateTime::parse_from_rfc3339(end) {
                if Utc::now() > end {
                    let api: Api<ResourceClaim> = Api::namespaced(ctx.client.clone(), &namespace);
                    api.delete(&name, &Default::default()).await.ok();
                }
            }
        }
        return Ok(());
    }

    // 3. Provider vs resources mode; exactly one may be set.
    if claim.spec.provider.is_some() && claim.spec.resources.is_some() {
        return Err(Error::permanent("spec.provider and spec.resources are mutually exclusive"));
    }

    let target = if let Some(provider_ref) = &claim.spec.provider {
        if let Some(existing) = claim.status.as_ref().and_then(|s| s.provider.as_ref()) {
            if existing.name != provider_ref.name {
                return Err(Error::permanent("status.provider.name is immutable once set"));
            }
        } else {
            publish_provider_name(ctx, &claim, &provider_ref.name).await?;
            return Ok(());
        }
        let Some(provider) = ctx.providers.get(&provider_ref.name).await? else {
            return Err(Error::temporary(
                format!("ResourceProvider {} not yet registered", provider_ref.name),
                std::time::Duration::from_secs(60),
            ));
        };
        if needs_provider_claim_metadata(&claim, &provider) {
            apply_provider_claim_metadata(ctx, &claim, &provider).await?;
            return Ok(());
        }
        if provider.spec.approval.required {
            let approved = claim
                .status
                .as_ref()
                .and_then(|s| s.approval.as_ref())
                .map(|a| a.state.as_str());
            if approved != Some("approved") {
                patch_status_approval(ctx, &claim).await?;
                return Ok(());
            }
        }
        provider_mode_resources(&provider)
    } else if let Some(resources) = &claim.spec.resources {
        resources_mode_assign(ctx, &claim, resources).await?
    } else {
        return Err(Error::permanent("one of spec.provider or spec.resources is required"));
    };

    // 4. Initialization: stamp the init timestamp once, on first sight.
    let initialized = claim
        .metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(&ctx.config.annotation(INIT_TIMESTAMP_ANNOTATION)))
        .unwrap_or(false);
    if !initialized {
        stamp_init_timestamp(ctx, &claim).await?;
        return Ok(());
    }

    // 5. Validation.
    let errors = validate::validate(ctx, &claim, &target).await?;
    if !errors.is_empty() {
        publish_validation_errors(ctx, &claim, errors).await?;
        return Ok(());
    }

    // 6/7. Binding and propagation.
    if claim.status.as_ref().and_then(|s| s.resource_handle.as_ref()).is_none() {
        bind(ctx, &claim, &target).await?;
    } else {
        propagate(ctx, &claim, &target).await?;
    }

    // 8. Auto-delete / auto-detach.
    if let Some(auto) = &claim.spec.auto_delete {
        if evaluate(ctx, &auto.when, &claim) {
            let api: Api<ResourceClaim> = Api::namespaced(ctx.client.clone(), &namespace);
            api.delete(&name, &Default::default()).await.ok();
            return Ok(());
        }
    }
    if let Some(auto) = &claim.spec.auto_detach {
        if evaluate(ctx, &auto.when, &claim) {
            detach(ctx, &claim).await?;
        }
    }

    Ok(())
}

/// Provider-mode: the target resource list is the provider's own template
/// plus one entry per linked provider, keyed by `resourceName`.
fn provider_mode_resources(provider: &poolboy_types::ResourceProvider) -> Vec<ResourceEntry> {
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
    entries
}

/// Resources-mode: each entry either names its own provider already, or
/// gets one assigned by matching its template against the provider
/// registry. Once assigned, a provider is never reconsidered.
async fn resources_mode_assign(
    ctx: &AppContext,
    claim: &ResourceClaim,
    resources: &[ResourceEntry],
) -> Result<Vec<ResourceEntry>, Error> {
    let existing_statuses = claim.status.as_ref().map(|s| s.resources.clone()).unwrap_or_default();
    let mut assigned = Vec::with_capacity(resources.len());
    let mut changed = false;
    for (i, entry) in resources.iter().enumerate() {
        let mut entry = entry.clone();
        if entry.provider.is_none() {
            entry.provider = existing_statuses.get(i).and_then(|s| s.provider.clone());
        }
        if entry.provider.is_none() {
            let template = entry.template.clone().unwrap_or_default();
            let provider = ctx.providers.find_by_template_match(&template).await?;
            entry.provider = provider.metadata.name.clone();
            changed = true;
        }
        assigned.push(entry);
    }
    if changed {
        persist_resource_providers(ctx, claim, &assigned).await?;
    }
    Ok(assigned)
}

async fn persist_resource_providers(ctx: &AppContext, claim: &ResourceClaim, assigned: &[ResourceEntry]) -> Result<(), Error> {
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        status.resources.resize_with(assigned.len(), Default::default);
        for (i, entry) in assigned.iter().enumerate() {
            status.resources[i].provider = entry.provider.clone();
            status.resources[i].name = entry.name.clone();
        }
    })
    .await?;
    Ok(())
}

async fn publish_provider_name(ctx: &AppContext, claim: &ResourceClaim, name: &str) -> Result<(), Error> {
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        status.provider = Some(ProviderAssignment {
            name: name.to_string(),
            parameter_values: Default::default(),
            validation_errors: None,
        });
    })
    .await?;
    Ok(())
}

async fn patch_status_approval(ctx: &AppContext, claim: &ResourceClaim) -> Result<(), Error> {
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        status.approval = Some(ApprovalStatus {
            state: "pending".to_string(),
            message: Some(messages::APPROVAL_PENDING.to_string()),
        });
    })
    .await?;
    Ok(())
}

/// Whether the provider's `resourceClaimAnnotations`/`resourceClaimLabels`
/// still have keys missing from the claim's metadata.
fn needs_provider_claim_metadata(claim: &ResourceClaim, provider: &poolboy_types::ResourceProvider) -> bool {
    let annotations = claim.metadata.annotations.as_ref();
    let labels = claim.metadata.labels.as_ref();
    provider
        .spec
        .resource_claim_annotations
        .keys()
        .any(|k| annotations.map(|a| !a.contains_key(k)).unwrap_or(true))
        || provider
            .spec
            .resource_claim_labels
            .keys()
            .any(|k| labels.map(|l| !l.contains_key(k)).unwrap_or(true))
}

/// Copies a provider's declared `resourceClaimAnnotations`/`resourceClaimLabels`
/// onto the claim (spec §4.3 step 3), merged in without disturbing existing
/// keys.
async fn apply_provider_claim_metadata(
    ctx: &AppContext,
    claim: &ResourceClaim,
    provider: &poolboy_types::ResourceProvider,
) -> Result<(), Error> {
    let namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let name = claim.metadata.name.clone().unwrap_or_default();
    let api: Api<ResourceClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({
        "metadata": {
            "annotations": provider.spec.resource_claim_annotations,
            "labels": provider.spec.resource_claim_labels,
        }
    });
    api.patch(&name, &PatchParams::apply("poolboy"), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn stamp_init_timestamp(ctx: &AppContext, claim: &ResourceClaim) -> Result<(), Error> {
    let namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let name = claim.metadata.name.clone().unwrap_or_default();
    let api: Api<ResourceClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({
        "metadata": {
            "annotations": {
                ctx.config.annotation(INIT_TIMESTAMP_ANNOTATION): Utc::now().to_rfc3339(),
            }
        }
    });
    api.patch(&name, &PatchParams::apply("poolboy"), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn publish_validation_errors(ctx: &AppContext, claim: &ResourceClaim, errors: validate::ValidationErrors) -> Result<(), Error> {
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        if !errors.parameter_errors.is_empty() {
            if let Some(provider) = &mut status.provider {
                provider.validation_errors = Some(errors.parameter_errors.clone());
            }
        }
        for (i, message) in errors.resource_errors {
            if let Some(r) = status.resources.get_mut(i) {
                r.validation_error = Some(message);
            }
        }
    })
    .await?;
    Ok(())
}

async fn bind(ctx: &AppContext, claim: &ResourceClaim, target: &[ResourceEntry]) -> Result<(), Error> {
    let handle = handles::bind_handle_to_claim(ctx, claim, target).await?;
    let start = Utc::now();
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        status.resource_handle = Some(ClaimResourceHandleStatus {
            api_version: format!("{}/{}", ctx.config.operator_domain, ctx.config.operator_version),
            kind: "ResourceHandle".to_string(),
            name: handle.metadata.name.clone().unwrap_or_default(),
            namespace: handle
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| ctx.config.operator_namespace.clone()),
            detached: None,
        });
        status.lifespan = ClaimLifespanStatus {
            start: Some(start.to_rfc3339()),
            end: handle.spec.lifespan.end.clone(),
            maximum: handle.spec.lifespan.maximum.clone(),
            relative_maximum: handle.spec.lifespan.relative_maximum.clone(),
        };
    })
    .await?;
    Ok(())
}

/// Once bound, propagate any claim-side template additions onto the handle
/// (deep-merged, patched only on diff) and reflect a tightened lifespan end.
async fn propagate(ctx: &AppContext, claim: &ResourceClaim, target: &[ResourceEntry]) -> Result<(), Error> {
    let Some(handle_ref) = claim.status.as_ref().and_then(|s| s.resource_handle.as_ref()) else {
        return Ok(());
    };
    let Some(handle) = ctx.handles.get(&handle_ref.name).await else {
        return Ok(());
    };

    let mut modified = (*handle).clone();
    for (i, entry) in target.iter().enumerate() {
        match modified.spec.resources.get_mut(i) {
            Some(existing) => {
                if let Some(t) = &entry.template {
                    let mut merged = existing.template.clone().unwrap_or_default();
                    merged.deep_merge(t.clone());
                    if Some(&merged) != existing.template.as_ref() {
                        existing.template = Some(merged);
                    }
                }
            }
            None => modified.spec.resources.push(entry.clone()),
        }
    }

    if let Some(requested_end) = &claim.spec.lifespan.end {
        let limits = poolboy_types::LifespanLimits {
            default: modified.spec.lifespan.default.clone(),
            maximum: modified.spec.lifespan.maximum.clone(),
            relative_maximum: modified.spec.lifespan.relative_maximum.clone(),
            unclaimed: None,
        };
        let start = handle
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let requested = chrono::DateTime::parse_from_rfc3339(requested_end)
            .ok()
            .map(|d| d.with_timezone(&Utc));
        if let Some(end) = handles::compute_lifespan_end(start, requested, &limits)? {
            modified.spec.lifespan.end = Some(end.to_rfc3339());
        }
    }

    if modified != *handle {
        let handle_namespace = handle.metadata.namespace.clone().unwrap_or_default();
        let api: Api<poolboy_types::ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_namespace);
        let patch = Patch::Json::<poolboy_types::ResourceHandle>(json_patch::diff(
            &serde_json::to_value(&*handle).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        ));
        api.patch(&handle_ref.name, &PatchParams::apply("poolboy"), &patch).await?;
    }
    Ok(())
}

/// Severs a claim from its handle: the handle is released rather than kept
/// as reusable inventory, mirroring the original implementation's
/// unconditional teardown on detach. See the Open Question decision
/// recorded in DESIGN.md.
async fn detach(ctx: &AppContext, claim: &ResourceClaim) -> Result<(), Error> {
    let Some(handle_ref) = claim.status.as_ref().and_then(|s| s.resource_handle.clone()) else {
        return Ok(());
    };
    patch_status::<ResourceClaimStatus, ResourceClaim>(ctx.client.clone(), claim, |status| {
        if let Some(h) = &mut status.resource_handle {
            h.detached = Some(true);
        }
    })
    .await?;
    // Clear spec.resourceClaim first so the handle's own delete path does not
    // also delete this (now-detached) claim — the claim's record is meant to
    // survive, only the handle is torn down.
    let api: Api<poolboy_types::ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_ref.namespace);
    let clear_claim = serde_json::json!({"spec": {"resourceClaim": null}});
    api.patch(&handle_ref.name, &PatchParams::apply("poolboy"), &Patch::Merge(&clear_claim))
        .await
        .ok();
    api.delete(&handle_ref.name, &Default::default()).await.ok();
    Ok(())
}

async fn delete(ctx: &AppContext, claim: &ResourceClaim) -> Result<(), Error> {
    if let Some(handle_ref) = claim.status.as_ref().and_then(|s| s.resource_handle.as_ref()) {
        let api: Api<poolboy_types::ResourceHandle> = Api::namespaced(ctx.client.clone(), &handle_ref.namespace);
        api.delete(&handle_ref.name, &Default::default()).await.ok();
    }
    Ok(())
}

fn evaluate(ctx: &AppContext, expr: &str, claim: &ResourceClaim) -> bool {
    let mut vars = std::collections::BTreeMap::new();
    vars.insert(
        "resource_claim".to_string(),
        Value::from(serde_json::to_value(claim).unwrap_or(serde_json::Value::Null)),
    );
    let tpl = Value::String(format!("{{{{ {} | bool }}}}", expr));
    matches!(ctx.template.render_tree(&tpl, &vars), Ok(Value::Bool(true)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn provider_mode_resources_includes_linked_entries() {
        let mut provider = poolboy_types::ResourceProvider::new(
            "p",
            poolboy_types::ResourceProviderSpec {
                template: poolboy_types::ProviderTemplate {
                    definition: Value::Object(Default::default()),
                    enable: true,
                    style: Default::default(),
                },
                linked_resource_providers: vec![poolboy_types::LinkedResourceProvider {
                    name: "dns".to_string(),
                    resource_name: "dns".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        provider.metadata.name = Some("p".to_string());
        let entries = provider_mode_resources(&provider);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name.as_deref(), Some("dns"));
        assert_eq!(entries[1].provider.as_deref(), Some("dns"));
    }
}
