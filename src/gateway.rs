/*
* File: src/gateway.rs
*
* The cluster gateway: bridges an in-memory, loosely-typed resource
* descriptor (group/version/kind plus a name) to the server's typed
* endpoints via runtime discovery. A resource descriptor is
* `kube::api::DynamicObject` — the same type `gitsync_controller::
* execute_apply` applies through `discovery::pinned_kind` +
* `Api<DynamicObject>`.
*
* Discovery is run once per sync pass and cached on the gateway
* (`refresh_discovery`) rather than re-queried on every call.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams, TypeMeta};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery};
use kube::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;

pub type ResourceDescriptor = DynamicObject;

const FIELD_MANAGER: &str = "gitops-controller";

pub struct ClusterGateway {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl ClusterGateway {
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(|e| Error::Internal(format!("discovery failed: {e}")))?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    /// Re-run discovery. Called at the start of each sync pass so newly
    /// registered CRDs are visible without restarting the process.
    pub async fn refresh_discovery(&self) -> Result<()> {
        let fresh = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::Internal(format!("discovery failed: {e}")))?;
        *self.discovery.write().await = fresh;
        Ok(())
    }

    async fn resolve(&self, obj: &DynamicObject) -> Result<(ApiResource, ApiCapabilities)> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("resource is missing apiVersion/kind".into()))?;
        let gvk = gvk_from_type_meta(types)?;
        let discovery = self.discovery.read().await;
        discovery
            .resolve_gvk(&gvk)
            .ok_or_else(|| Error::NotFound(format!("unknown kind: {}/{}", gvk.group, gvk.kind)))
    }

    fn api_for(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: &str) -> Api<DynamicObject> {
        if caps.scope == kube::discovery::Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        } else {
            Api::all_with(self.client.clone(), ar)
        }
    }

    /// Create `obj` in `namespace` (ignored if the resource is
    /// cluster-scoped).
    pub async fn create(&self, obj: &DynamicObject, namespace: &str) -> Result<DynamicObject> {
        let (ar, caps) = self.resolve(obj).await?;
        if !supports_verb(&caps, "create") {
            return Err(Error::NotSupported(format!(
                "{} does not support create",
                ar.kind
            )));
        }
        let api = self.api_for(&ar, &caps, namespace);
        api.create(&PostParams::default(), obj)
            .await
            .map_err(Into::into)
    }

    /// Server-side apply `obj` in `namespace`.
    pub async fn patch(&self, obj: &DynamicObject, namespace: &str) -> Result<DynamicObject> {
        let (ar, caps) = self.resolve(obj).await?;
        if !supports_verb(&caps, "patch") {
            return Err(Error::NotSupported(format!(
                "{} does not support patch",
                ar.kind
            )));
        }
        let api = self.api_for(&ar, &caps, namespace);
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("resource is missing metadata.name".into()))?;
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(obj))
            .await
            .map_err(Into::into)
    }

    /// Delete `obj` by name in `namespace`.
    pub async fn delete(&self, obj: &DynamicObject, namespace: &str) -> Result<()> {
        let (ar, caps) = self.resolve(obj).await?;
        if !supports_verb(&caps, "delete") {
            return Err(Error::NotSupported(format!(
                "{} does not support delete",
                ar.kind
            )));
        }
        let api = self.api_for(&ar, &caps, namespace);
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("resource is missing metadata.name".into()))?;
        api.delete(name, &Default::default()).await?;
        Ok(())
    }

    /// List every object across every discoverable resource kind
    /// carrying all of `labels`. Per-resource listing errors are logged
    /// and skipped; only a discovery-level failure is returned.
    pub async fn list_by_label(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        if labels.is_empty() {
            return Err(Error::InvalidArgument("label selector is empty".into()));
        }
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let discovery = self.discovery.read().await;
        let resources: Vec<(ApiResource, ApiCapabilities)> = discovery
            .groups()
            .flat_map(|g| g.recommended_resources())
            .collect();
        drop(discovery);

        let merged: Arc<AsyncMutex<Vec<DynamicObject>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(resources.len());

        for (ar, caps) in resources {
            if !supports_verb(&caps, "list") {
                continue;
            }
            let client = self.client.clone();
            let selector = selector.clone();
            let merged = Arc::clone(&merged);
            handles.push(tokio::spawn(async move {
                // Listed across all namespaces regardless of scope: the
                // owned set is defined by the label, not the namespace.
                let api: Api<DynamicObject> = Api::all_with(client, &ar);
                let lp = kube::api::ListParams::default().labels(&selector);
                match api.list(&lp).await {
                    Ok(list) => {
                        let mut guard = merged.lock().await;
                        guard.extend(list.items);
                    }
                    Err(e) => {
                        tracing::warn!(kind = %ar.kind, "error listing resource: {e}");
                    }
                }
            }));
        }

        for h in handles {
            let _ = h.await;
        }

        match Arc::try_unwrap(merged) {
            Ok(m) => Ok(m.into_inner()),
            Err(arc) => Ok(arc.lock().await.clone()),
        }
    }

    /// Walk `dir_path` and parse every regular file as one YAML-or-JSON
    /// document, decoding every YAML document in a multi-document file.
    /// Undecodable documents are silently skipped.
    pub async fn generate_manifests(&self, dir_path: PathBuf) -> Result<Vec<DynamicObject>> {
        tokio::task::spawn_blocking(move || walk_and_parse(&dir_path))
            .await
            .map_err(|e| Error::Internal(format!("manifest walk task panicked: {e}")))?
    }

    /// Replace each descriptor's label map with `labels`.
    pub fn stamp_labels(&self, descriptors: &mut [DynamicObject], labels: &BTreeMap<String, String>) {
        for d in descriptors.iter_mut() {
            d.metadata.labels = Some(labels.clone().into_iter().collect());
        }
    }
}

fn supports_verb(caps: &ApiCapabilities, verb: &str) -> bool {
    caps.operations
        .iter()
        .any(|v| v.is_empty() || v == "*" || v.eq_ignore_ascii_case(verb))
}

fn gvk_from_type_meta(types: &TypeMeta) -> Result<kube::api::GroupVersionKind> {
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(kube::api::GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

fn walk_and_parse(dir: &Path) -> Result<Vec<DynamicObject>> {
    let mut objs = Vec::new();
    walk_dir(dir, &mut objs)?;
    Ok(objs)
}

fn walk_dir(dir: &Path, objs: &mut Vec<DynamicObject>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::Io(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Io(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, objs)?;
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        // A manifest file may hold several `---`-separated documents;
        // decode each one independently instead of the whole file as a
        // single document.
        for doc in serde_yaml::Deserializer::from_str(&content) {
            let parsed: std::result::Result<DynamicObject, _> = serde::Deserialize::deserialize(doc);
            if let Ok(obj) = parsed {
                objs.push(obj);
            }
        }
        // Undecodable documents (and files with no valid document) are
        // silently skipped.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_and_parse_skips_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("garbage.txt"), "not: [valid yaml: {{{").unwrap();

        let objs = walk_and_parse(dir.path()).unwrap();
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn supports_verb_is_case_insensitive_and_honors_wildcard() {
        let caps = ApiCapabilities {
            scope: kube::discovery::Scope::Namespaced,
            subresources: vec![],
            operations: vec!["Create".to_string(), "LIST".to_string()],
        };
        assert!(supports_verb(&caps, "create"));
        assert!(supports_verb(&caps, "list"));
        assert!(!supports_verb(&caps, "delete"));

        let wildcard = ApiCapabilities {
            scope: kube::discovery::Scope::Namespaced,
            subresources: vec![],
            operations: vec!["*".to_string()],
        };
        assert!(supports_verb(&wildcard, "delete"));
    }
}
