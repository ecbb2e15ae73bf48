/*
* File: src/crds.rs
*
* Defines the Rust type for the `Application` custom resource. The
* `kube::CustomResource` derive macro maps this struct to the CRD
* (group `thongdepzai.cloud`, version `v1alpha1`, kind `Application`)
* and, via `schemars`, generates the OpenAPI v3 schema embedded in the
* CRD manifest.
*
* `spec` is user-declared and immutable from the controller's
* perspective; `status` is controller-owned and lives behind the
* `status` sub-resource, so spec writes and status writes never race
* each other through the same endpoint.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "thongdepzai.cloud";
pub const VERSION: &str = "v1alpha1";
pub const APP_INSTANCE_LABEL: &str = "thongdepzai.cloud/app-instance";
pub const EVENT_SOURCE: &str = "gitops-controller";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "thongdepzai.cloud",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    namespaced,
    status = "ApplicationStatus",
    printcolumn = r#"{"name":"HealthStatus", "type":"string", "jsonPath":".status.healthStatus"}"#,
    printcolumn = r#"{"name":"LastSync", "type":"string", "jsonPath":".status.lastSyncAt"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum HealthStatus {
    Progressing,
    Healthy,
    Degraded,
}

impl ApplicationStatus {
    pub fn progressing(last_sync_at: String) -> Self {
        Self {
            health_status: Some(HealthStatus::Progressing),
            revision: None,
            last_sync_at: Some(last_sync_at),
        }
    }

    pub fn degraded(previous_revision: Option<String>, last_sync_at: String) -> Self {
        Self {
            health_status: Some(HealthStatus::Degraded),
            revision: previous_revision,
            last_sync_at: Some(last_sync_at),
        }
    }

    pub fn healthy(revision: String, last_sync_at: String) -> Self {
        Self {
            health_status: Some(HealthStatus::Healthy),
            revision: Some(revision),
            last_sync_at: Some(last_sync_at),
        }
    }
}

/// Deep-equality used by the informer's update handler: spec-unchanged
/// updates (and other-top-level-section-unchanged updates) are no-ops.
pub fn specs_equal(a: &ApplicationSpec, b: &ApplicationSpec) -> bool {
    a.repository == b.repository && a.revision == b.revision && a.path == b.path
}
