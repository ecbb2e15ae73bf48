/*
* File: src/diff.rs
*
* The manifest diff algorithm: compares two resource sets keyed by
* `kind || name` and reports a single "anything changed?" boolean.
* Grounded on `original_source/gitops/utils/kube/kube.go::DiffResources`
* — index `current` by key, walk `desired` removing matched keys and
* comparing the `spec` sub-field, then anything left in the index
* should be deleted.
*
* The caller re-applies the whole desired set whenever this returns
* `true` (see `src/controllers/application.rs`); the identities of
* added/changed/removed resources are not reported, a known
* limitation of the single-boolean contract.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::api::DynamicObject;
use std::collections::HashMap;

fn key(obj: &DynamicObject) -> String {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
    format!("{kind}{}", obj.metadata.name.as_deref().unwrap_or(""))
}

fn spec_of(obj: &DynamicObject) -> Option<&serde_json::Value> {
    obj.data.get("spec")
}

/// Returns `true` if `current` and `desired` differ under the
/// kind+name/spec-equality rule. Duplicate keys within either input are
/// not an error: the last entry with a given key wins in the index.
pub fn diff(current: &[DynamicObject], desired: &[DynamicObject]) -> bool {
    let mut index: HashMap<String, &DynamicObject> = HashMap::new();
    for c in current {
        index.insert(key(c), c);
    }

    let mut changed = false;
    for d in desired {
        let k = key(d);
        match index.remove(&k) {
            None => {
                tracing::debug!(key = %k, "found new resource");
                changed = true;
            }
            Some(c) => {
                if spec_of(c) != spec_of(d) {
                    tracing::debug!(key = %k, "resource has changed");
                    changed = true;
                }
            }
        }
    }

    if !index.is_empty() {
        for k in index.keys() {
            tracing::debug!(key = %k, "resource should be deleted");
        }
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ObjectMeta, TypeMeta};
    use serde_json::json;

    fn obj(kind: &str, name: &str, spec: serde_json::Value) -> DynamicObject {
        let mut data = serde_json::Map::new();
        data.insert("spec".to_string(), spec);
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: serde_json::Value::Object(data),
        }
    }

    #[test]
    fn identical_sets_are_unchanged() {
        let set = vec![obj("Deployment", "web", json!({"replicas": 1}))];
        assert!(!diff(&set, &set));
    }

    #[test]
    fn empty_to_nonempty_is_changed_iff_nonempty() {
        let empty: Vec<DynamicObject> = vec![];
        let nonempty = vec![obj("Deployment", "web", json!({"replicas": 1}))];
        assert!(!diff(&empty, &empty));
        assert!(diff(&empty, &nonempty));
        assert!(diff(&nonempty, &empty));
    }

    #[test]
    fn changed_spec_is_detected() {
        let current = vec![obj("Deployment", "web", json!({"replicas": 1}))];
        let desired = vec![obj("Deployment", "web", json!({"replicas": 2}))];
        assert!(diff(&current, &desired));
    }

    #[test]
    fn residual_current_key_means_should_delete() {
        let current = vec![
            obj("Deployment", "web", json!({"replicas": 1})),
            obj("Service", "web", json!({"port": 80})),
        ];
        let desired = vec![obj("Deployment", "web", json!({"replicas": 1}))];
        assert!(diff(&current, &desired));
    }

    #[test]
    fn duplicate_keys_last_one_wins_without_error() {
        let current = vec![
            obj("Deployment", "web", json!({"replicas": 1})),
            obj("Deployment", "web", json!({"replicas": 2})),
        ];
        let desired = vec![obj("Deployment", "web", json!({"replicas": 2}))];
        assert!(!diff(&current, &desired));
    }
}
