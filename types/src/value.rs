use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamically typed JSON tree.
///
/// CRD fields that hold templates, match expressions, or downstream resource
/// bodies are not given a fixed Rust shape — the operator never knows what a
/// provider author will put in them. `Value` carries them losslessly between
/// the Kubernetes API, the template engine, and the JSON-patch differ without
/// binding any of those to a compile-time schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl JsonSchema for Value {
    fn schema_name() -> String {
        "Value".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        // Resource bodies are arbitrary; the CRD schema accepts anything
        // here rather than constraining it.
        serde_json::from_value(serde_json::json!({
            "x-kubernetes-preserve-unknown-fields": true,
        }))
        .unwrap()
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|m| m.get(key))
    }

    /// Resolve an RFC 6901 JSON pointer (e.g. `/status/ready`).
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        if pointer.is_empty() {
            return Some(self);
        }
        let mut cur = self;
        for part in pointer.split('/').skip(1) {
            let part = part.replace("~1", "/").replace("~0", "~");
            cur = match cur {
                Value::Object(m) => m.get(&part)?,
                Value::Array(a) => a.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Merge `other` into `self` in place, per the deep-merge semantics used
    /// throughout the operator: objects merge key-by-key, an explicit `null`
    /// in `other` removes the key from `self`, and any other type replaces
    /// outright.
    pub fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (k, v) in b {
                    if v.is_null() {
                        a.remove(&k);
                        continue;
                    }
                    match a.get_mut(&k) {
                        Some(existing) => existing.deep_merge(v),
                        None => {
                            a.insert(k, v);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }

    /// True iff `deep_merge(self.clone(), subset) == self`, i.e. `subset` is
    /// satisfied by `self` at every path it specifies.
    pub fn is_superset_of(&self, subset: &Value) -> bool {
        match (self, subset) {
            (Value::Object(a), Value::Object(b)) => {
                b.iter().all(|(k, v)| match a.get(k) {
                    Some(av) => av.is_superset_of(v),
                    None => false,
                })
            }
            (a, b) => a == b,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(m) => {
                Value::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(m) => {
                serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deep_merge_removes_on_null() {
        let mut a: Value = serde_json::json!({"foo": "bar", "keep": 1}).into();
        let b: Value = serde_json::json!({"foo": null, "added": 2}).into();
        a.deep_merge(b);
        assert_eq!(a.get("foo"), None);
        assert_eq!(a.get("keep"), Some(&Value::Int(1)));
        assert_eq!(a.get("added"), Some(&Value::Int(2)));
    }

    #[test]
    fn superset_matches_partial_template() {
        let template: Value = serde_json::json!({"kind": "X", "metadata": {"name": "a"}}).into();
        let matcher: Value = serde_json::json!({"kind": "X"}).into();
        assert!(template.is_superset_of(&matcher));
        let mismatch: Value = serde_json::json!({"kind": "Y"}).into();
        assert!(!template.is_superset_of(&mismatch));
    }

    #[test]
    fn pointer_resolves_nested_path() {
        let v: Value = serde_json::json!({"status": {"ready": true}}).into();
        assert_eq!(v.pointer("/status/ready"), Some(&Value::Bool(true)));
        assert_eq!(v.pointer("/status/missing"), None);
    }
}
