use crate::value::Value;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity of a downstream Kubernetes object produced by projecting a
/// handle's template through a provider.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ObjectReference {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// `{name, namespace}` pair used by claims and handles to refer to each
/// other without a shared-ownership cycle; the runtime resolves it through
/// its registries.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NamespaceName {
    pub name: String,
    pub namespace: String,
}

/// Duration bounds shared by providers, pools, claims and handles.
/// All fields are duration strings (`"8h"`, `"30d"`, compound forms) parsed
/// with the operator's fixed duration grammar.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LifespanLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<String>,
    #[serde(rename = "relativeMaximum", skip_serializing_if = "Option::is_none")]
    pub relative_maximum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unclaimed: Option<String>,
}

/// `spec.lifespan` on a ResourceClaim: user intent, not the authoritative
/// projection (that lives in `status.lifespan`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClaimLifespanSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// `status.lifespan` on a ResourceClaim: authoritative projection back to
/// the user.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClaimLifespanStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<String>,
    #[serde(rename = "relativeMaximum", skip_serializing_if = "Option::is_none")]
    pub relative_maximum: Option<String>,
}

/// `spec.lifespan` on a ResourceHandle.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HandleLifespanSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<String>,
    #[serde(rename = "relativeMaximum", skip_serializing_if = "Option::is_none")]
    pub relative_maximum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// An `{pathMatch, allowedOps}` entry restricting which JSON-patch ops may
/// be applied to an already-created downstream resource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct UpdateFilter {
    #[serde(rename = "pathMatch")]
    pub path_match: String,
    #[serde(rename = "allowedOps", default)]
    pub allowed_ops: Vec<String>,
}

/// Approval gate published on a claim when its provider requires one.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApprovalStatus {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A resolved provider assignment, as published on `status.provider` of a
/// claim.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderAssignment {
    pub name: String,
    #[serde(rename = "parameterValues", default)]
    pub parameter_values: std::collections::BTreeMap<String, Value>,
    #[serde(rename = "validationErrors", skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

/// `spec.provider` top-level path on a claim or pool.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderRef {
    pub name: String,
    #[serde(rename = "parameterValues", default)]
    pub parameter_values: std::collections::BTreeMap<String, Value>,
}

/// One entry of the explicit-resources path (`spec.resources` on a claim or
/// pool, or `spec.resources` on a handle before projection).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,
}

/// Per-resource observed state written back onto a claim (`status.resources[i]`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClaimResourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(rename = "validationError", skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(rename = "waitingFor", skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
}

/// Per-resource observed state written back onto a handle (`status.resources[i]`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HandleResourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(rename = "waitingFor", skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
}

/// `status.resourceHandle` on a claim once bound.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClaimResourceHandleStatus {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detached: Option<bool>,
}
