//! Parameter and template validation (spec §4.3 step 5): provider-declared
//! parameters are checked for presence/defaults/schema/named checks, and a
//! provider's OpenAPI v3 schema (if any) is checked against each assigned
//! resource's template.

use poolboy_types::{ResourceClaim, ResourceEntry, Value};

use crate::context::AppContext;
use crate::util::Error;

/// Validation outcome, split the way `status.provider.validationErrors` and
/// `status.resources[i].validationError` are written separately: parameter
/// failures belong to the claim's provider assignment as a whole, never to
/// an arbitrary resource index.
#[derive(Default)]
pub struct ValidationErrors {
    pub parameter_errors: Vec<String>,
    pub resource_errors: Vec<(usize, String)>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.parameter_errors.is_empty() && self.resource_errors.is_empty()
    }
}

pub async fn validate(ctx: &AppContext, claim: &ResourceClaim, target: &[ResourceEntry]) -> Result<ValidationErrors, Error> {
    let mut errors = ValidationErrors::default();

    if let Some(provider_ref) = &claim.spec.provider {
        if let Some(provider) = ctx.providers.get(&provider_ref.name).await? {
            for param in &provider.spec.parameters {
                let value = provider_ref.parameter_values.get(&param.name);
                if value.is_none() && param.default_value.is_none() && param.default_template.is_none() {
                    if param.required {
                        errors.parameter_errors.push(format!("parameter '{}' is required", param.name));
                    }
                    continue;
                }
                let Some(value) = value.or(param.default_value.as_ref()) else {
                    continue;
                };
                if let Some(schema) = &param.schema {
                    if let Err(message) = validate_schema(schema, value) {
                        errors.parameter_errors.push(format!("parameter '{}': {}", param.name, message));
                    }
                }
                for check in &param.checks {
                    if !evaluate_check(ctx, &check.check, value) {
                        errors
                            .parameter_errors
                            .push(format!("parameter '{}' failed check '{}'", param.name, check.name));
                    }
                }
            }
        }
    }

    for (i, entry) in target.iter().enumerate() {
        let Some(provider_name) = &entry.provider else { continue };
        let Some(provider) = ctx.providers.get(provider_name).await? else { continue };
        let Some(template) = &entry.template else { continue };
        if let Some(schema) = &provider.spec.validation.open_api_v3_schema {
            if let Err(message) = validate_schema(schema, template) {
                errors.resource_errors.push((i, message));
            }
        }
        for check in &provider.spec.validation.checks {
            if !evaluate_check(ctx, &check.check, template) {
                errors.resource_errors.push((i, format!("failed check '{}'", check.name)));
            }
        }
    }

    Ok(errors)
}

fn validate_schema(schema: &Value, value: &Value) -> Result<(), String> {
    let schema_json: serde_json::Value = schema.clone().into();
    let value_json: serde_json::Value = value.clone().into();
    let compiled = jsonschema::JSONSchema::compile(&schema_json).map_err(|e| format!("invalid schema: {}", e))?;
    match compiled.validate(&value_json) {
        Ok(()) => Ok(()),
        Err(errs) => Err(errs.map(|e| e.to_string()).collect::<Vec<_>>().join("; ")),
    }
}

fn evaluate_check(ctx: &AppContext, expr: &str, value: &Value) -> bool {
    let mut vars = std::collections::BTreeMap::new();
    vars.insert("value".to_string(), value.clone());
    let tpl = Value::String(format!("{{{{ {} | bool }}}}", expr));
    matches!(ctx.template.render_tree(&tpl, &vars), Ok(Value::Bool(true)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schema_rejects_wrong_type() {
        let schema: Value = serde_json::json!({"type": "string"}).into();
        let value = Value::Int(5);
        assert!(validate_schema(&schema, &value).is_err());
    }

    #[test]
    fn schema_accepts_matching_type() {
        let schema: Value = serde_json::json!({"type": "integer"}).into();
        let value = Value::Int(5);
        assert!(validate_schema(&schema, &value).is_ok());
    }
}
