//! Builds the template variable context recognised by provider/claim
//! template expressions (spec §4.2). `omit` is injected by the template
//! engine itself; everything else is assembled here per projected resource.

use chrono::Utc;
use poolboy_types::{ResourceHandle, Value};
use std::collections::BTreeMap;

use crate::handles::annotations::Requester;

#[derive(Default)]
pub struct VarsBuilder {
    vars: BTreeMap<String, Value>,
}

impl VarsBuilder {
    pub fn new() -> Self {
        let now = Utc::now().to_rfc3339();
        let mut vars = BTreeMap::new();
        vars.insert("timestamp".to_string(), Value::String(now.clone()));
        vars.insert("datetime".to_string(), Value::String(now.clone()));
        vars.insert("now".to_string(), Value::String(now));
        vars.insert("timezone".to_string(), Value::String("UTC".to_string()));
        VarsBuilder { vars }
    }

    pub fn handle(mut self, handle: &ResourceHandle) -> Self {
        self.vars.insert(
            "resource_handle".to_string(),
            Value::from(serde_json::to_value(handle).unwrap_or(serde_json::Value::Null)),
        );
        for (k, v) in &handle.spec.vars {
            self.vars.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn claim(mut self, claim: Option<&poolboy_types::ResourceClaim>) -> Self {
        if let Some(claim) = claim {
            self.vars.insert(
                "resource_claim".to_string(),
                Value::from(serde_json::to_value(claim).unwrap_or(serde_json::Value::Null)),
            );
        }
        self
    }

    pub fn provider(mut self, provider: &poolboy_types::ResourceProvider) -> Self {
        self.vars.insert(
            "resource_provider".to_string(),
            Value::from(serde_json::to_value(provider).unwrap_or(serde_json::Value::Null)),
        );
        self
    }

    pub fn resource_index(mut self, index: usize) -> Self {
        self.vars.insert("resource_index".to_string(), Value::Int(index as i64));
        self
    }

    pub fn resource_name(mut self, name: Option<&str>) -> Self {
        if let Some(name) = name {
            self.vars.insert("resource_name".to_string(), Value::String(name.to_string()));
        }
        self
    }

    pub fn resource_reference(mut self, reference: Option<&Value>) -> Self {
        if let Some(reference) = reference {
            self.vars.insert("resource_reference".to_string(), reference.clone());
        }
        self
    }

    pub fn resource_state(mut self, state: Option<&Value>) -> Self {
        self.vars.insert("resource_state".to_string(), state.cloned().unwrap_or(Value::Null));
        self
    }

    pub fn resource_states(mut self, states: Vec<Value>) -> Self {
        self.vars.insert("resource_states".to_string(), Value::Array(states));
        self
    }

    pub fn resource_template(mut self, template: &Value) -> Self {
        self.vars.insert("resource_template".to_string(), template.clone());
        self
    }

    pub fn guid(mut self, guid: &str) -> Self {
        self.vars.insert("guid".to_string(), Value::String(guid.to_string()));
        self
    }

    pub fn requester(mut self, requester: &Requester) -> Self {
        self.vars.insert(
            "requester_user".to_string(),
            requester.user.clone().map(Value::String).unwrap_or(Value::Null),
        );
        self.vars.insert("requester_identities".to_string(), Value::Array(vec![]));
        self
    }

    pub fn extra(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> BTreeMap<String, Value> {
        self.vars
    }
}
