//! Deep merge and diff over JSON-shaped values
//!
//! Merge semantics: mapping × mapping recurses; any other pairing lets the
//! incoming value win at the leaf, including type changes (a mapping
//! becoming a scalar drops the whole subtree). Keys absent from the update
//! are never removed. Decoded payloads are `serde_json::Value`, already a
//! tagged variant over mapping / list / scalar, so the merge can pattern
//! match instead of probing types at runtime.

use serde_json::Value;

/// Merge `src` into `dst`, recording the `/`-separated path of every leaf
/// whose resolved value actually changed.
pub fn deep_merge(dst: &mut Value, src: &Value, changed: &mut Vec<String>) {
    merge_at(dst, src, "", changed);
}

fn merge_at(dst: &mut Value, src: &Value, path: &str, changed: &mut Vec<String>) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                let child_path = join(path, key);
                match dst_map.get_mut(key) {
                    Some(dst_value) => merge_at(dst_value, src_value, &child_path, changed),
                    None => {
                        record_leaves(src_value, &child_path, changed);
                        dst_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
        }
        (dst_slot, src_value) => {
            if dst_slot != src_value {
                match src_value {
                    // Subtree replacing a leaf: its leaves are what changed.
                    Value::Object(_) => record_leaves(src_value, path, changed),
                    _ => changed.push(path.to_string()),
                }
                *dst_slot = src_value.clone();
            }
        }
    }
}

/// Changed key paths between two trees, including keys present on only one
/// side.
pub fn diff(old: &Value, new: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    diff_at(old, new, "", &mut changed);
    changed
}

fn diff_at(old: &Value, new: &Value, path: &str, changed: &mut Vec<String>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_value) in new_map {
                let child_path = join(path, key);
                match old_map.get(key) {
                    Some(old_value) => diff_at(old_value, new_value, &child_path, changed),
                    None => record_leaves(new_value, &child_path, changed),
                }
            }
            for (key, old_value) in old_map {
                if !new_map.contains_key(key) {
                    record_leaves(old_value, &join(path, key), changed);
                }
            }
        }
        (old_value, new_value) => {
            if old_value != new_value {
                match new_value {
                    Value::Object(_) => record_leaves(new_value, path, changed),
                    _ => changed.push(path.to_string()),
                }
            }
        }
    }
}

fn record_leaves(value: &Value, path: &str, changed: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                record_leaves(child, &join(path, key), changed);
            }
        }
        _ => changed.push(path.to_string()),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}
