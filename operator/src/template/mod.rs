//! Jinja2-style template rendering (spec §4.2).
//!
//! Wraps `minijinja` with the fixed variable and filter set the original
//! implementation exposed to provider/claim templates, plus the `omit`
//! sentinel convention: an expression that evaluates to `omit` is stripped
//! from the surrounding mapping or sequence rather than rendered as a
//! string.

mod filters;

use minijinja::value::Value as MiniValue;
use minijinja::Environment;
use poolboy_types::Value;
use regex::Regex;
use std::collections::BTreeMap;

use crate::util::Error;

/// String value produced by the `omit` context variable. Expressions that
/// evaluate to exactly this string are dropped from their container once
/// rendering of the whole tree completes.
pub const OMIT_SENTINEL: &str = "\u{0}poolboy-omit-sentinel\u{0}";

/// A top-level expression of the form `{{ ... | (bool|int|float|object) }}`
/// is decoded to that raw type instead of being left as a string.
fn coercion_regex() -> &'static Regex {
    lazy_static::lazy_static! {
        static ref RE: Regex = Regex::new(r"^\{\{(?:(?!\{\{).)*\|\s*(bool|int|float|object)\s*\}\}$").unwrap();
    }
    &RE
}

pub struct Engine {
    env: Environment<'static>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        filters::register(&mut env);
        Engine { env }
    }

    /// Render every string leaf of `tree` against `vars`, applying top-level
    /// type coercion and `omit` stripping. Fails the whole render on any
    /// undefined variable or filter error (spec: "Unknown variables fail
    /// the render").
    pub fn render_tree(&self, tree: &Value, vars: &BTreeMap<String, Value>) -> Result<Value, Error> {
        let ctx = build_context(vars);
        let rendered = self.render_node(tree, &ctx)?;
        Ok(strip_omit(rendered).unwrap_or(Value::Null))
    }

    fn render_node(&self, node: &Value, ctx: &MiniValue) -> Result<Value, Error> {
        match node {
            Value::String(s) => self.render_string(s, ctx),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.render_node(item, ctx)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.render_node(v, ctx)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, template: &str, ctx: &MiniValue) -> Result<Value, Error> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(Value::String(template.to_string()));
        }
        let rendered = self
            .env
            .render_str(template, ctx)
            .map_err(|e| Error::Template(format!("{}: {}", template, e)))?;
        if rendered == OMIT_SENTINEL {
            return Ok(Value::String(OMIT_SENTINEL.to_string()));
        }
        if let Some(caps) = coercion_regex().captures(template.trim()) {
            return Ok(match &caps[1] {
                "bool" => Value::Bool(matches!(rendered.as_str(), "true" | "True" | "1")),
                "int" => Value::Int(rendered.parse().map_err(|_| {
                    Error::Template(format!("not an int: {}", rendered))
                })?),
                "float" => Value::Float(rendered.parse().map_err(|_| {
                    Error::Template(format!("not a float: {}", rendered))
                })?),
                "object" => serde_json::from_str::<serde_json::Value>(&rendered)
                    .map(Value::from)
                    .map_err(|e| Error::Template(format!("not valid json: {}", e)))?,
                _ => unreachable!(),
            });
        }
        Ok(Value::String(rendered))
    }
}

/// Removes any subtree that rendered to the `omit` sentinel: dropped from
/// its containing object's keys or array's elements. Returns `None` when
/// the node itself is omitted.
fn strip_omit(node: Value) -> Option<Value> {
    match node {
        Value::String(s) if s == OMIT_SENTINEL => None,
        Value::Array(items) => Some(Value::Array(items.into_iter().filter_map(strip_omit).collect())),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if let Some(v) = strip_omit(v) {
                    out.insert(k, v);
                }
            }
            Some(Value::Object(out))
        }
        other => Some(other),
    }
}

fn build_context(vars: &BTreeMap<String, Value>) -> MiniValue {
    let mut ctx: BTreeMap<String, MiniValue> = BTreeMap::new();
    for (k, v) in vars {
        ctx.insert(k.clone(), to_minijinja(v));
    }
    ctx.insert(OMIT_VAR_NAME.to_string(), MiniValue::from(OMIT_SENTINEL));
    MiniValue::from_serialize(&ctx)
}

pub const OMIT_VAR_NAME: &str = "omit";

fn to_minijinja(v: &Value) -> MiniValue {
    let json: serde_json::Value = v.clone().into();
    MiniValue::from_serialize(&json)
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars() -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("resource_name".to_string(), Value::String("a".to_string()));
        m
    }

    #[test]
    fn renders_plain_string() {
        let engine = Engine::new();
        let tree: Value = serde_json::json!({"name": "{{ resource_name }}"}).into();
        let out = engine.render_tree(&tree, &vars()).unwrap();
        assert_eq!(out.get("name"), Some(&Value::String("a".to_string())));
    }

    #[test]
    fn coerces_top_level_bool() {
        let engine = Engine::new();
        let tree: Value = serde_json::json!({"ready": "{{ true | bool }}"}).into();
        let out = engine.render_tree(&tree, &vars()).unwrap();
        assert_eq!(out.get("ready"), Some(&Value::Bool(true)));
    }

    #[test]
    fn omit_strips_key() {
        let engine = Engine::new();
        let tree: Value = serde_json::json!({"keep": "yes", "drop": "{{ omit }}"}).into();
        let out = engine.render_tree(&tree, &vars()).unwrap();
        assert_eq!(out.get("drop"), None);
        assert_eq!(out.get("keep"), Some(&Value::String("yes".to_string())));
    }
}
