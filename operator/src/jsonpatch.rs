//! RFC 6902 JSON Patch diffing, used to turn a freshly rendered resource
//! definition into the minimal patch against the live object on the
//! cluster (spec §4.3/§4.4: downstream resources are patched, not
//! replaced, so unrelated fields set by other controllers survive).

use poolboy_types::UpdateFilter;
use regex::Regex;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Computes the patch that transforms `a` into `b`, then drops any
/// operation not allowed by `update_filters` (when filters are given).
pub fn jsonpatch_from_diff(a: &Value, b: &Value, update_filters: &[UpdateFilter]) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff(a, b, &mut Vec::new(), &mut ops);
    if update_filters.is_empty() {
        ops
    } else {
        ops.into_iter()
            .filter(|op| filter_allows(op, update_filters))
            .collect()
    }
}

fn filter_allows(op: &PatchOp, update_filters: &[UpdateFilter]) -> bool {
    for f in update_filters {
        let Ok(re) = Regex::new(&format!("^{}$", f.path_match)) else {
            continue;
        };
        if re.is_match(&op.path) {
            let allowed = if f.allowed_ops.is_empty() {
                &["add", "remove", "replace"][..]
            } else {
                &f.allowed_ops.iter().map(String::as_str).collect::<Vec<_>>()[..]
            };
            return allowed.contains(&op.op.as_str());
        }
    }
    false
}

fn json_pointer_segment(raw: &str) -> String {
    raw.replace('~', "~0").replace('/', "~1")
}

fn path_str(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("/{}", path.iter().map(|s| json_pointer_segment(s)).collect::<Vec<_>>().join("/"))
    }
}

fn diff(a: &Value, b: &Value, path: &mut Vec<String>, ops: &mut Vec<PatchOp>) {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            for (k, av) in am {
                path.push(k.clone());
                if let Some(bv) = bm.get(k) {
                    diff(av, bv, path, ops);
                } else {
                    ops.push(PatchOp {
                        op: "remove".to_string(),
                        path: path_str(path),
                        value: None,
                    });
                }
                path.pop();
            }
            for (k, bv) in bm {
                if !am.contains_key(k) {
                    path.push(k.clone());
                    ops.push(PatchOp {
                        op: "add".to_string(),
                        path: path_str(path),
                        value: Some(bv.clone()),
                    });
                    path.pop();
                }
            }
        }
        (Value::Array(al), Value::Array(bl)) => {
            let common = al.len().min(bl.len());
            for i in 0..common {
                path.push(i.to_string());
                diff(&al[i], &bl[i], path, ops);
                path.pop();
            }
            for i in (bl.len()..al.len()).rev() {
                path.push(i.to_string());
                ops.push(PatchOp {
                    op: "remove".to_string(),
                    path: path_str(path),
                    value: None,
                });
                path.pop();
            }
            for i in al.len()..bl.len() {
                path.push(i.to_string());
                ops.push(PatchOp {
                    op: "add".to_string(),
                    path: path_str(path),
                    value: Some(bl[i].clone()),
                });
                path.pop();
            }
        }
        _ if a != b => {
            ops.push(PatchOp {
                op: "replace".to_string(),
                path: path_str(path),
                value: Some(b.clone()),
            });
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn dict_diff_emits_add_remove_replace() {
        let a = json!({"keep": 1, "drop": 2, "change": "old"});
        let b = json!({"keep": 1, "change": "new", "added": true});
        let ops = jsonpatch_from_diff(&a, &b, &[]);
        assert!(ops.iter().any(|o| o.op == "remove" && o.path == "/drop"));
        assert!(ops.iter().any(|o| o.op == "replace" && o.path == "/change"));
        assert!(ops.iter().any(|o| o.op == "add" && o.path == "/added"));
    }

    #[test]
    fn list_diff_truncates_and_extends() {
        let a = json!([1, 2, 3]);
        let b = json!([1, 9]);
        let ops = jsonpatch_from_diff(&a, &b, &[]);
        assert!(ops.iter().any(|o| o.op == "replace" && o.path == "/1"));
        assert!(ops.iter().any(|o| o.op == "remove" && o.path == "/2"));
    }

    #[test]
    fn update_filters_drop_disallowed_ops() {
        let a = json!({"spec": {"replicas": 1}});
        let b = json!({"spec": {"replicas": 2}});
        let filters = vec![UpdateFilter {
            path_match: "/spec/replicas".to_string(),
            allowed_ops: vec!["add".to_string()],
        }];
        let ops = jsonpatch_from_diff(&a, &b, &filters);
        assert!(ops.is_empty());
    }

    #[test]
    fn path_escapes_tilde_and_slash() {
        let a = json!({});
        let b = json!({"a/b~c": 1});
        let ops = jsonpatch_from_diff(&a, &b, &[]);
        assert_eq!(ops[0].path, "/a~1b~0c");
    }
}
