use crate::common::{HandleLifespanSpec, HandleResourceStatus, NamespaceName, ResourceEntry};
use crate::value::Value;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A binding between a provider-supplied resource list and either a claim
/// (`spec.resourceClaim`) or a pool slot (`spec.resourcePool`), or neither
/// while it sits as unbound warm inventory.
#[derive(CustomResource, Serialize, Default, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "poolboy.gpte.redhat.com",
    version = "v1",
    kind = "ResourceHandle",
    plural = "resourcehandles",
    derive = "PartialEq",
    status = "ResourceHandleStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.resourceClaim.name\", \"name\": \"CLAIM\", \"type\": \"string\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.healthy\", \"name\": \"HEALTHY\", \"type\": \"boolean\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.ready\", \"name\": \"READY\", \"type\": \"boolean\" }")]
pub struct ResourceHandleSpec {
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,

    #[serde(rename = "resourceClaim", skip_serializing_if = "Option::is_none")]
    pub resource_claim: Option<NamespaceName>,

    #[serde(rename = "resourcePool", skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<NamespaceName>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default)]
    pub vars: BTreeMap<String, Value>,

    #[serde(default)]
    pub lifespan: HandleLifespanSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceHandleStatus {
    #[serde(default)]
    pub resources: Vec<HandleResourceStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}
