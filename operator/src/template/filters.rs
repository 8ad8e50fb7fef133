//! Custom minijinja filters exposed to provider/claim templates.

use minijinja::value::{Value as MiniValue, ValueKind};
use minijinja::{Environment, Error, ErrorKind};
use rand::Rng;

pub fn register(env: &mut Environment<'static>) {
    env.add_filter("bool", bool_filter);
    env.add_filter("int", int_filter);
    env.add_filter("float", float_filter);
    env.add_filter("object", object_filter);
    env.add_filter("json_query", json_query);
    env.add_filter("merge_list_of_dicts", merge_list_of_dicts);
    env.add_filter("parse_time_interval", parse_time_interval);
    env.add_filter("strgen", strgen);
    env.add_filter("to_datetime", to_datetime);
    env.add_filter("to_json", to_json);
}

/// Coerces common truthy/falsy string and numeric forms to a bool, the way
/// the original template helper did for values coming out of environment
/// variables and claim parameters.
fn bool_filter(value: MiniValue) -> Result<bool, Error> {
    Ok(match value.kind() {
        ValueKind::Bool => value.is_true(),
        ValueKind::Number => value.as_i64().map(|i| i != 0).unwrap_or(true),
        _ => {
            let s = value.to_string().to_lowercase();
            matches!(s.as_str(), "true" | "1" | "yes" | "y")
        }
    })
}

fn int_filter(value: MiniValue) -> Result<i64, Error> {
    value
        .as_i64()
        .or_else(|| value.to_string().trim().parse().ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "cannot coerce to int"))
}

fn float_filter(value: MiniValue) -> Result<f64, Error> {
    if let Some(f) = value.as_f64() {
        return Ok(f);
    }
    value
        .to_string()
        .trim()
        .parse()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "cannot coerce to float"))
}

/// Parses a JSON-encoded string into an object/array value; passes
/// non-string values through unchanged.
fn object_filter(value: MiniValue) -> Result<MiniValue, Error> {
    if let Some(s) = value.as_str() {
        let parsed: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        Ok(MiniValue::from_serialize(&parsed))
    } else {
        Ok(value)
    }
}

/// Evaluates a JMESPath expression against the value, mirroring the
/// `json_query` filter used throughout the original provider templates.
fn json_query(value: MiniValue, expr: String) -> Result<MiniValue, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let compiled = jmespath::compile(&expr)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let jv = jmespath::Variable::from(json);
    let result = compiled
        .search(jv)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let out: serde_json::Value = serde_json::to_value(&*result)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(MiniValue::from_serialize(&out))
}

/// Folds a list of mapping values into one by deep-merging each in order,
/// used by linked-resource-provider parameter templates that combine
/// several resource states into a single context object.
fn merge_list_of_dicts(value: MiniValue) -> Result<MiniValue, Error> {
    let mut acc = serde_json::Value::Object(Default::default());
    for item in value.try_iter()? {
        let json: serde_json::Value = serde_json::to_value(&item)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        crate::util::deep_merge(&mut acc, json);
    }
    Ok(MiniValue::from_serialize(&acc))
}

/// Parses a Go-style duration string (`"1h30m"`, `"90s"`) and returns the
/// total number of seconds as an integer.
fn parse_time_interval(value: MiniValue) -> Result<i64, Error> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "expected a string"))?;
    let d = parse_duration::parse(s)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(d.as_secs() as i64)
}

/// Expands a minimal bracket-expression pattern (`"[a-z]{8}"`) into a
/// random string, used for generating unique names/passwords in templates.
fn strgen(pattern: String) -> Result<String, Error> {
    let alphabet = expand_pattern(&pattern)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e))?;
    let mut rng = rand::thread_rng();
    Ok(alphabet
        .into_iter()
        .map(|charset| {
            let idx = rng.gen_range(0..charset.len());
            charset[idx]
        })
        .collect())
}

/// Expands `"[a-z]{8}x[0-9]{2}"` into a `Vec` of per-position character
/// sets: literal characters appear once, `[class]{n}` expands to `n`
/// copies of the class's character set.
fn expand_pattern(pattern: &str) -> Result<Vec<Vec<char>>, String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ']')
                .map(|p| p + i)
                .ok_or("unterminated character class")?;
            let class = expand_class(&chars[i + 1..close])?;
            i = close + 1;
            let count = if i < chars.len() && chars[i] == '{' {
                let end = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| p + i)
                    .ok_or("unterminated repeat count")?;
                let n: usize = chars[i + 1..end]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .map_err(|_| "invalid repeat count".to_string())?;
                i = end + 1;
                n
            } else {
                1
            };
            for _ in 0..count {
                out.push(class.clone());
            }
        } else {
            out.push(vec![chars[i]]);
            i += 1;
        }
    }
    Ok(out)
}

fn expand_class(spec: &[char]) -> Result<Vec<char>, String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < spec.len() {
        if i + 2 < spec.len() && spec[i + 1] == '-' {
            let (start, end) = (spec[i], spec[i + 2]);
            if start > end {
                return Err("invalid character range".to_string());
            }
            out.extend(start..=end);
            i += 3;
        } else {
            out.push(spec[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Parses an RFC3339 or common date string and re-renders it as RFC3339,
/// normalizing the assorted timestamp formats seen in upstream resource
/// status fields.
fn to_datetime(value: MiniValue) -> Result<String, Error> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "expected a string"))?;
    let dt = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(dt.to_rfc3339())
}

fn to_json(value: MiniValue) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    serde_json::to_string(&json).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strgen_matches_pattern_length() {
        let out = strgen("[a-z]{5}-[0-9]{2}".to_string()).unwrap();
        assert_eq!(out.len(), 8);
        assert!(out.chars().nth(5).unwrap() == '-');
    }

    #[test]
    fn bool_filter_parses_yes() {
        assert!(bool_filter(MiniValue::from("yes")).unwrap());
        assert!(!bool_filter(MiniValue::from("no")).unwrap());
    }
}
