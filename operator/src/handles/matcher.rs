//! Claim-to-handle matching (spec §4.4 "Matching").

use chrono::{DateTime, Utc};
use poolboy_types::{NamespaceName, ResourceEntry, ResourceHandle};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::providers::ProviderRegistry;

/// Lexicographically smallest score wins; ties broken by earliest creation
/// timestamp (already the last tuple element).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    resource_count_difference: usize,
    resource_name_difference: usize,
    template_difference_count: usize,
    unhealthy: bool,
    unready: bool,
    unknown_ready: bool,
    creation_timestamp: String,
}

/// Scans the unbound index for the best candidate to satisfy `target`,
/// resolving per-resource providers from `providers` to compute template
/// diffs. Returns the winning handle, or `None` when nothing qualifies.
pub async fn find_candidate(
    candidates: Vec<Arc<ResourceHandle>>,
    providers: &ProviderRegistry,
    requested_pool: Option<&NamespaceName>,
    target: &[ResourceEntry],
) -> Option<Arc<ResourceHandle>> {
    let now = Utc::now();
    let mut scored: Vec<(Score, Arc<ResourceHandle>)> = Vec::new();
    for handle in candidates {
        if handle.status.as_ref().and_then(|s| s.healthy) == Some(false) {
            continue;
        }
        if pool_mismatch(requested_pool, handle.spec.resource_pool.as_ref()) {
            continue;
        }
        if lifespan_ending_soon(handle.spec.lifespan.end.as_deref(), now) {
            continue;
        }
        let Some(score) = score_candidate(&handle, providers, target).await else {
            continue;
        };
        scored.push((score, handle));
    }
    scored.sort_by(|a, b| a.0.cmp(&b.0));
    scored.into_iter().next().map(|(_, h)| h)
}

fn pool_mismatch(requested: Option<&NamespaceName>, handle_pool: Option<&NamespaceName>) -> bool {
    match (requested, handle_pool) {
        (Some(r), Some(h)) => r != h,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn lifespan_ending_soon(end: Option<&str>, now: DateTime<Utc>) -> bool {
    let Some(end) = end else { return false };
    match DateTime::parse_from_rfc3339(end) {
        Ok(end) => end.with_timezone(&Utc) - now < chrono::Duration::seconds(120),
        Err(_) => false,
    }
}

async fn score_candidate(
    handle: &ResourceHandle,
    providers: &ProviderRegistry,
    target: &[ResourceEntry],
) -> Option<Score> {
    if handle.spec.resources.len() > target.len() {
        return None;
    }
    let mut name_difference = 0usize;
    let mut template_difference = 0usize;
    for (i, handle_resource) in handle.spec.resources.iter().enumerate() {
        let target_resource = &target[i];
        if handle_resource.provider != target_resource.provider {
            return None;
        }
        if handle_resource.name != target_resource.name {
            name_difference += 1;
        }
        let provider_name = handle_resource.provider.as_deref()?;
        let provider = providers.get(provider_name).await.ok().flatten()?;
        let handle_template = handle_resource.template.clone().unwrap_or_default();
        let target_template = target_resource.template.clone().unwrap_or_default();
        let ops = ProviderRegistry::check_template_match(&provider, &handle_template, &target_template)?;
        template_difference += ops.len();
    }
    let status = handle.status.as_ref();
    Some(Score {
        resource_count_difference: target.len() - handle.spec.resources.len(),
        resource_name_difference: name_difference,
        template_difference_count: template_difference,
        unhealthy: status.and_then(|s| s.healthy) != Some(true),
        unready: status.and_then(|s| s.ready) != Some(true),
        unknown_ready: status.and_then(|s| s.ready).is_none(),
        creation_timestamp: handle
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_mismatch_rejects_different_pool() {
        let a = NamespaceName { name: "a".into(), namespace: "ns".into() };
        let b = NamespaceName { name: "b".into(), namespace: "ns".into() };
        assert!(pool_mismatch(Some(&a), Some(&b)));
        assert!(!pool_mismatch(Some(&a), Some(&a)));
        assert!(!pool_mismatch(None, Some(&a)));
    }

    #[test]
    fn score_ordering_prefers_healthy_then_recency() {
        let healthy = Score {
            resource_count_difference: 0,
            resource_name_difference: 0,
            template_difference_count: 0,
            unhealthy: false,
            unready: false,
            unknown_ready: false,
            creation_timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        let unhealthy = Score {
            unhealthy: true,
            ..healthy.clone()
        };
        assert_eq!(healthy.cmp(&unhealthy), Ordering::Less);
    }
}
