use crate::common::{LifespanLimits, UpdateFilter};
use crate::value::Value;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// [`ResourceProvider`] is a registry entry describing how to project a
/// claim's template into one or more downstream Kubernetes objects: matching
/// rules, defaults/overrides, validation, parameters, linked providers and
/// lifespan limits.
#[derive(CustomResource, Serialize, Default, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "poolboy.gpte.redhat.com",
    version = "v1",
    kind = "ResourceProvider",
    plural = "resourceproviders",
    derive = "PartialEq",
    status = "ResourceProviderStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.template.style\", \"name\": \"STYLE\", \"type\": \"string\" }")]
pub struct ResourceProviderSpec {
    /// Partial template that must be a subset of a claim's template for this
    /// provider to be selected by `find_by_template_match`.
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<Value>,

    /// JSON-pointer-syntax regexes; diff ops at matching paths are ignored
    /// when comparing a handle's resource state to a claim's requested
    /// template.
    #[serde(rename = "matchIgnore", default)]
    pub match_ignore: Vec<String>,

    /// Merged into a claim template as low-priority defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Merged into a handle-derived resource as high-priority overrides.
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_: Option<Value>,

    pub template: ProviderTemplate,

    #[serde(default)]
    pub validation: ProviderValidation,

    #[serde(default)]
    pub parameters: Vec<ProviderParameter>,

    #[serde(rename = "linkedResourceProviders", default)]
    pub linked_resource_providers: Vec<LinkedResourceProvider>,

    #[serde(default)]
    pub lifespan: LifespanLimits,

    #[serde(rename = "updateFilters", default)]
    pub update_filters: Vec<UpdateFilter>,

    #[serde(rename = "disableCreation", default)]
    pub disable_creation: bool,

    #[serde(rename = "resourceRequiresClaim", default)]
    pub resource_requires_claim: bool,

    #[serde(rename = "healthCheck", skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,

    #[serde(rename = "readinessCheck", skip_serializing_if = "Option::is_none")]
    pub readiness_check: Option<String>,

    #[serde(rename = "statusSummaryTemplate", skip_serializing_if = "Option::is_none")]
    pub status_summary_template: Option<String>,

    #[serde(rename = "resourceClaimAnnotations", default)]
    pub resource_claim_annotations: BTreeMap<String, String>,

    #[serde(rename = "resourceClaimLabels", default)]
    pub resource_claim_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub approval: ApprovalConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub required: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderTemplate {
    pub definition: Value,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub style: TemplateStyle,
}

fn default_true() -> bool {
    true
}

/// Delimiter set used by the template engine: `jinja2` is the modern `{{ }}`
/// / `{% %}` style, `legacy` keeps an older bracketed form some existing
/// provider definitions still use.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, JsonSchema)]
pub enum TemplateStyle {
    #[default]
    #[serde(rename = "jinja2")]
    Jinja2,
    #[serde(rename = "legacy")]
    Legacy,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderValidation {
    #[serde(rename = "openAPIV3Schema", skip_serializing_if = "Option::is_none")]
    pub open_api_v3_schema: Option<Value>,
    #[serde(default)]
    pub checks: Vec<NamedCheck>,
}

/// A named predicate expression evaluated against the candidate template
/// plus context; failure is reported under the check's name.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NamedCheck {
    pub name: String,
    pub check: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ProviderParameter {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "allowUpdate", default)]
    pub allow_update: bool,
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(rename = "defaultTemplate", skip_serializing_if = "Option::is_none")]
    pub default_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub checks: Vec<NamedCheck>,
}

/// Ordered reference expressing a dependency between resources of a single
/// claim: `resource_name` must already exist (and satisfy `wait_for`) before
/// the dependent resource is created.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LinkedResourceProvider {
    pub name: String,
    #[serde(rename = "resourceName")]
    pub resource_name: String,
    #[serde(rename = "parameterValues", default)]
    pub parameter_values: BTreeMap<String, Value>,
    #[serde(rename = "waitFor", skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    #[serde(rename = "templateVars", default)]
    pub template_vars: Vec<TemplateVar>,
}

/// A named JSON-pointer extraction from a linked provider's resource state,
/// injected into the dependent resource's template context.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TemplateVar {
    pub name: String,
    #[serde(rename = "jsonPath", alias = "pointer")]
    pub json_path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceProviderStatus {
    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}
