//! Deterministic cache key derivation

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::{ServiceError, ServiceResult};

/// Builds `"{service}:{method}:{digest}"` from a stable serialization of `params`
///
/// Structurally identical parameters always produce the same key, whatever
/// order their fields were inserted in.
pub fn generate_key<P>(service: &str, method: &str, params: &P) -> ServiceResult<String>
where
    P: Serialize + ?Sized,
{
    let value = serde_json::to_value(params).map_err(|e| {
        ServiceError::internal(format!(
            "serialization failed for {}:{} key parameters: {}",
            service, method, e
        ))
    })?;

    let canonical = canonical_json(&value);

    // Length-prefixed so a `:` inside service or method cannot shift the boundary
    let mut hasher = Sha256::new();
    for part in [service, method] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();

    Ok(format!("{}:{}:{}", service, method, hex::encode(&digest[..16])))
}

/// Serializes a JSON value with sorted object keys and normalized numbers
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&normalize_number(n)),
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// `1.0` and `1` hash the same
fn normalize_number(n: &serde_json::Number) -> String {
    if let Some(f) = n.as_f64() {
        if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return (f as i64).to_string();
        }
    }
    n.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn test_params_order_independent() {
        let a = generate_key("github", "listRepos", &json!({"a": 1, "b": 2})).unwrap();
        let b = generate_key("github", "listRepos", &json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_map_insertion_order_independent() {
        let mut first = HashMap::new();
        first.insert("owner", "acme");
        first.insert("repo", "web");
        first.insert("branch", "main");

        let mut second = HashMap::new();
        second.insert("branch", "main");
        second.insert("repo", "web");
        second.insert("owner", "acme");

        let sorted: BTreeMap<_, _> = second.clone().into_iter().collect();

        let k1 = generate_key("github", "getBranch", &first).unwrap();
        let k2 = generate_key("github", "getBranch", &second).unwrap();
        let k3 = generate_key("github", "getBranch", &sorted).unwrap();

        assert_eq!(k1, k2);
        assert_eq!(k2, k3);
    }

    #[test]
    fn test_struct_and_map_with_same_shape_collide() {
        #[derive(Serialize)]
        struct Params {
            page: u32,
            per_page: u32,
        }

        let from_struct = generate_key("jira", "search", &Params { page: 2, per_page: 50 }).unwrap();
        let from_map = generate_key("jira", "search", &json!({"per_page": 50, "page": 2})).unwrap();

        assert_eq!(from_struct, from_map);
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = json!({"filter": {"status": "open", "label": "bug"}, "limit": 10});
        let b = json!({"limit": 10, "filter": {"label": "bug", "status": "open"}});

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            canonical_json(&a),
            r#"{"filter":{"label":"bug","status":"open"},"limit":10}"#
        );
    }

    #[test]
    fn test_integral_floats_normalized() {
        assert_eq!(canonical_json(&json!({"n": 1.0})), canonical_json(&json!({"n": 1})));
        assert_eq!(canonical_json(&json!(2.5)), "2.5");
    }

    #[test]
    fn test_different_params_differ() {
        let a = generate_key("slack", "history", &json!({"channel": "C1"})).unwrap();
        let b = generate_key("slack", "history", &json!({"channel": "C2"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = generate_key("svc", "m", &json!({"ids": [1, 2]})).unwrap();
        let b = generate_key("svc", "m", &json!({"ids": [2, 1]})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_colon_in_service_or_method_does_not_collide() {
        let params = json!({"id": 1});
        let a = generate_key("a:b", "c", &params).unwrap();
        let b = generate_key("a", "b:c", &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_format() {
        let key = generate_key("stripe", "getCustomer", &json!({"id": "cus_1"})).unwrap();

        assert!(key.starts_with("stripe:getCustomer:"));
        let digest = key.rsplit(':').next().unwrap();
        assert_eq!(digest.len(), 32);
    }
}
