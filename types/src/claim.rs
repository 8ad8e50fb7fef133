use crate::common::{
    ApprovalStatus, ClaimLifespanSpec, ClaimLifespanStatus, ClaimResourceHandleStatus,
    ClaimResourceStatus, ProviderAssignment, ProviderRef, ResourceEntry,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A user's request for a parameterised workload: either a top-level
/// `provider` (the provider supplies the resource list) or an explicit
/// `resources` list. Exactly one of the two is populated.
#[derive(CustomResource, Serialize, Default, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "poolboy.gpte.redhat.com",
    version = "v1",
    kind = "ResourceClaim",
    plural = "resourceclaims",
    derive = "PartialEq",
    status = "ResourceClaimStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.resourceHandle.name\", \"name\": \"HANDLE\", \"type\": \"string\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.lifespan.end\", \"name\": \"LIFESPAN END\", \"type\": \"string\" }")]
pub struct ResourceClaimSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceEntry>>,

    #[serde(default)]
    pub lifespan: ClaimLifespanSpec,

    #[serde(rename = "autoDelete", skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<AutoAction>,

    #[serde(rename = "autoDetach", skip_serializing_if = "Option::is_none")]
    pub auto_detach: Option<AutoAction>,
}

/// A template expression gating an automatic lifecycle transition
/// (`spec.autoDelete.when` / `spec.autoDetach.when`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AutoAction {
    pub when: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceClaimStatus {
    #[serde(default)]
    pub resources: Vec<ClaimResourceStatus>,

    #[serde(rename = "resourceHandle", skip_serializing_if = "Option::is_none")]
    pub resource_handle: Option<ClaimResourceHandleStatus>,

    #[serde(default)]
    pub lifespan: ClaimLifespanStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderAssignment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStatus>,
}
