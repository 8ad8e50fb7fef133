use crate::common::{LifespanLimits, NamespaceName, ProviderRef, ResourceEntry};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maintains a number of warm, unbound [`ResourceHandle`](crate::ResourceHandle)s
/// so that claims can bind to pre-provisioned inventory instead of waiting on
/// cold creation.
#[derive(CustomResource, Serialize, Default, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "poolboy.gpte.redhat.com",
    version = "v1",
    kind = "ResourcePool",
    plural = "resourcepools",
    derive = "PartialEq",
    status = "ResourcePoolStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.minAvailable\", \"name\": \"MIN AVAILABLE\", \"type\": \"integer\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.resourceHandleCount.available\", \"name\": \"AVAILABLE\", \"type\": \"integer\" }")]
pub struct ResourcePoolSpec {
    #[serde(rename = "minAvailable")]
    pub min_available: usize,

    #[serde(rename = "maxUnready", skip_serializing_if = "Option::is_none")]
    pub max_unready: Option<usize>,

    #[serde(rename = "deleteUnhealthyResourceHandles", default)]
    pub delete_unhealthy_resource_handles: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceEntry>>,

    #[serde(default)]
    pub lifespan: LifespanLimits,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourcePoolStatus {
    #[serde(rename = "resourceHandles", default)]
    pub resource_handles: Vec<NamespaceName>,

    #[serde(rename = "resourceHandleCount", default)]
    pub resource_handle_count: ResourceHandleCount,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceHandleCount {
    #[serde(default)]
    pub available: usize,
    #[serde(default)]
    pub ready: usize,
}
