//! Annotation set stamped onto every downstream resource a handle
//! projects (spec §6), and read back by the watcher's dispatch filter to
//! route events to the owning handle and claim.

use poolboy_types::{NamespaceName, ResourceHandle};
use std::collections::BTreeMap;

use crate::config::Config;

pub const RESOURCE_PROVIDER_NAME: &str = "resource-provider-name";
pub const RESOURCE_PROVIDER_NAMESPACE: &str = "resource-provider-namespace";
pub const RESOURCE_HANDLE_NAME: &str = "resource-handle-name";
pub const RESOURCE_HANDLE_NAMESPACE: &str = "resource-handle-namespace";
pub const RESOURCE_HANDLE_UID: &str = "resource-handle-uid";
pub const RESOURCE_INDEX: &str = "resource-index";
pub const RESOURCE_CLAIM_NAME: &str = "resource-claim-name";
pub const RESOURCE_CLAIM_NAMESPACE: &str = "resource-claim-namespace";
pub const RESOURCE_POOL_NAME: &str = "resource-pool-name";
pub const RESOURCE_POOL_NAMESPACE: &str = "resource-pool-namespace";
pub const RESOURCE_REQUESTER_USER: &str = "resource-requester-user";
pub const RESOURCE_REQUESTER_EMAIL: &str = "resource-requester-email";
pub const RESOURCE_REQUESTER_NAME: &str = "resource-requester-name";
pub const RESOURCE_REQUESTER_PREFERRED_USERNAME: &str = "resource-requester-preferred-username";

#[derive(Default, Clone)]
pub struct Requester {
    pub user: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
}

/// Builds the full annotation map for the `index`-th downstream resource of
/// `handle`, given the provider name that owns that slot.
pub fn stamp(
    config: &Config,
    handle: &ResourceHandle,
    provider_name: &str,
    index: usize,
    pool: Option<&NamespaceName>,
    requester: &Requester,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(config.annotation(RESOURCE_PROVIDER_NAME), provider_name.to_string());
    out.insert(config.annotation(RESOURCE_PROVIDER_NAMESPACE), config.operator_namespace.clone());
    if let Some(name) = &handle.metadata.name {
        out.insert(config.annotation(RESOURCE_HANDLE_NAME), name.clone());
    }
    out.insert(
        config.annotation(RESOURCE_HANDLE_NAMESPACE),
        handle.metadata.namespace.clone().unwrap_or_else(|| config.operator_namespace.clone()),
    );
    if let Some(uid) = &handle.metadata.uid {
        out.insert(config.annotation(RESOURCE_HANDLE_UID), uid.clone());
    }
    out.insert(config.annotation(RESOURCE_INDEX), index.to_string());
    if let Some(claim) = &handle.spec.resource_claim {
        out.insert(config.annotation(RESOURCE_CLAIM_NAME), claim.name.clone());
        out.insert(config.annotation(RESOURCE_CLAIM_NAMESPACE), claim.namespace.clone());
    }
    if let Some(pool) = pool.or(handle.spec.resource_pool.as_ref()) {
        out.insert(config.annotation(RESOURCE_POOL_NAME), pool.name.clone());
        out.insert(config.annotation(RESOURCE_POOL_NAMESPACE), pool.namespace.clone());
    }
    if let Some(v) = &requester.user {
        out.insert(config.annotation(RESOURCE_REQUESTER_USER), v.clone());
    }
    if let Some(v) = &requester.email {
        out.insert(config.annotation(RESOURCE_REQUESTER_EMAIL), v.clone());
    }
    if let Some(v) = &requester.name {
        out.insert(config.annotation(RESOURCE_REQUESTER_NAME), v.clone());
    }
    if let Some(v) = &requester.preferred_username {
        out.insert(config.annotation(RESOURCE_REQUESTER_PREFERRED_USERNAME), v.clone());
    }
    out
}
