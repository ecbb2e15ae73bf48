/*
* File: src/controllers/application.rs
*
* The sync pass and cleanup pass — the reconciliation algorithm itself,
* orchestrating git, the cluster gateway, and the manifest diff through
* a clone → checkout → diff → converge → status cycle. Descended from
* `gitsync_controller::reconcile`/`execute_apply`'s status-then-git-
* then-apply shape, generalized from "read a literal manifest path and
* apply it once" to the full cycle, with stage ordering and error
* wrapping grounded in
* `original_source/gitops/internal/controller/controller.go`'s
* `createResources`/`deleteResources`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::controllers::utils::{key_for, record_synced_event};
use crate::crds::{Application, ApplicationStatus, APP_INSTANCE_LABEL};
use crate::error::{Error, Result};
use crate::gateway::{self, ClusterGateway};
use crate::git::{workspace_path, GitWorkspace};
use crate::status::StatusWriter;
use crate::diff;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SyncContext {
    pub client: kube::Client,
    pub gateway: Arc<ClusterGateway>,
    pub git: GitWorkspace,
}

/// Runs one end-to-end reconciliation of `app`.
/// Failure at any numbered stage aborts the pass and returns its error;
/// the caller (the reconcile worker) owns requeueing and writing
/// `Degraded`.
pub async fn sync_pass(ctx: &SyncContext, app: &Application) -> Result<()> {
    let ns = app.namespace().unwrap_or_default();
    let name = app.metadata.name.clone().unwrap_or_default();
    let status_writer = StatusWriter::new(kube::Api::namespaced(ctx.client.clone(), &ns));

    // 1. Mark progressing.
    status_writer
        .write(&name, ApplicationStatus::progressing(chrono::Utc::now().to_rfc3339()))
        .await
        .map_err(|e| stage_err("error updating application status to Progressing", e))?;

    // 2. Ensure workspace.
    let repo_path = workspace_path(&name, &app.spec.repository);
    ctx.git
        .sync(app.spec.repository.clone(), repo_path.clone())
        .await
        .map_err(|e| stage_err("error cloning repository", e))?;

    // 3. Checkout.
    let commit_id = ctx
        .git
        .checkout(repo_path.clone(), app.spec.revision.clone())
        .await
        .map_err(|e| stage_err("error checking out revision", e))?;

    // Re-run discovery before generating/diffing: the manifests in this
    // revision may reference kinds registered since the last pass.
    ctx.gateway
        .refresh_discovery()
        .await
        .map_err(|e| stage_err("error refreshing discovery", e))?;

    // 4. Desired manifests.
    let manifests_path = repo_path.join(&app.spec.path);
    let mut desired = ctx
        .gateway
        .generate_manifests(manifests_path)
        .await
        .map_err(|e| stage_err("error generating manifests", e))?;

    // 5. Current owned set.
    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL.to_string(), name.clone());
    let current = ctx
        .gateway
        .list_by_label(&labels)
        .await
        .map_err(|e| stage_err("error getting resources with label", e))?;

    // 6. Stamp ownership.
    ctx.gateway.stamp_labels(&mut desired, &labels);

    // 7. Diff.
    let changed = diff::diff(&current, &desired);

    // 8. Converge. Server-side apply rather than a literal create: a
    // desired object that already exists on the cluster (unchanged or
    // edited by something else) must converge to the desired state
    // instead of failing with AlreadyExists.
    if changed {
        for d in &desired {
            let target_ns = resolve_namespace(d, &ns);
            ctx.gateway
                .patch(d, &target_ns)
                .await
                .map_err(|e| stage_err("error creating resources", e))?;
        }
    }

    // 9. Mark healthy.
    let now = chrono::Utc::now().to_rfc3339();
    status_writer
        .write(&name, ApplicationStatus::healthy(commit_id, now))
        .await
        .map_err(|e| stage_err("error updating application status to Healthy", e))?;

    // 10. Emit event.
    record_synced_event(ctx.client.clone(), app)
        .await
        .map_err(|e| stage_err("error recording sync event", e))?;

    Ok(())
}

/// Tears down a tombstoned Application's owned resources and workspace.
pub async fn cleanup_pass(ctx: &SyncContext, app: &Application) -> Result<()> {
    let name = app.metadata.name.clone().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::InvalidArgument("app.name is empty".into()));
    }

    let repo_path = workspace_path(&name, &app.spec.repository);

    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL.to_string(), name.clone());
    let current = ctx
        .gateway
        .list_by_label(&labels)
        .await
        .map_err(|e| stage_err("error getting resources with label", e))?;

    for obj in &current {
        let obj_ns = obj.metadata.namespace.clone().unwrap_or_default();
        ctx.gateway
            .delete(obj, &obj_ns)
            .await
            .map_err(|e| stage_err("error deleting resources", e))?;
    }

    ctx.git
        .cleanup(repo_path)
        .await
        .map_err(|e| stage_err("error cleaning up repository", e))?;

    tracing::info!(app = %key_for(app), "cleanup pass complete");
    Ok(())
}

fn resolve_namespace(obj: &gateway::ResourceDescriptor, app_namespace: &str) -> String {
    obj.metadata
        .namespace
        .clone()
        .unwrap_or_else(|| app_namespace.to_string())
}

fn stage_err(stage: &str, e: Error) -> Error {
    Error::Internal(format!("{stage}: {e}"))
}
