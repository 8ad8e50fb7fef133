use serde_json::Value;

/// Deep merge two json values. Moves the values of `b` into `a`.
/// An explicit `null` in `b` removes the corresponding key from `a`.
pub fn deep_merge(a: &mut Value, b: Value) {
    match (a, b) {
        (&mut Value::Object(ref mut a), Value::Object(b)) => b.into_iter().for_each(|(k, v)| {
            if v.is_null() {
                a.remove(&k);
            } else {
                deep_merge(a.entry(k).or_insert(Value::Null), v);
            }
        }),
        (a, b) => {
            *a = b;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_unsets_key() {
        let mut a = json!({"foo": "bar", "nested": {"x": 1, "y": 2}});
        deep_merge(&mut a, json!({"foo": null, "nested": {"x": null, "z": 3}}));
        assert_eq!(a, json!({"nested": {"y": 2, "z": 3}}));
    }
}
