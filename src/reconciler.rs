/*
* File: src/reconciler.rs
*
* The reconciler core: wires the informer cache to the intake queue,
* drains the intake queue into the reconcile queue, and drains the
* reconcile queue into the sync/cleanup pass. This is the hand-rolled
* equivalent of client-go's `workqueue`-backed controller loop in
* `original_source/gitops/internal/controller/controller.go`
* (`processNextItem`, `handleAdd`/`handleUdate`/`handleDelete`),
* re-expressed with an explicit two-queue split instead of the
* original's single queue.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::controllers::{application, utils};
use crate::crds::{Application, ApplicationStatus};
use crate::error::Error;
use crate::gateway::ClusterGateway;
use crate::git::GitWorkspace;
use crate::informer::{InformerCache, InformerEvent};
use crate::queue::RateLimitingQueue;
use crate::ratelimiter::DefaultControllerRateLimiter;
use crate::status::StatusWriter;
use kube::{Api, Client, ResourceExt};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::watch;

/// An intake queue item: the cached Application as last observed by the
/// informer, plus the delivery it arrived with. Equality/hashing is by
/// reconcile key only, so repeated notifications for the same object
/// dedup even though the payload (the cached snapshot) may differ
/// between deliveries.
#[derive(Clone)]
struct IntakeItem {
    app: Arc<Application>,
}

impl IntakeItem {
    fn key(&self) -> String {
        utils::key_for(&self.app)
    }
}

impl PartialEq for IntakeItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for IntakeItem {}

impl Hash for IntakeItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl ToString for IntakeItem {
    fn to_string(&self) -> String {
        self.key()
    }
}

pub struct Reconciler {
    client: Client,
    gateway: Arc<ClusterGateway>,
    git: GitWorkspace,
    intake_queue: Arc<RateLimitingQueue<IntakeItem, DefaultControllerRateLimiter>>,
    reconcile_queue: Arc<RateLimitingQueue<String, DefaultControllerRateLimiter>>,
}

impl Reconciler {
    pub async fn new(client: Client, git_token: Option<String>) -> crate::error::Result<Self> {
        let gateway = Arc::new(ClusterGateway::new(client.clone()).await?);
        Ok(Self {
            client,
            gateway,
            git: GitWorkspace::new(git_token),
            intake_queue: RateLimitingQueue::new(DefaultControllerRateLimiter::new()),
            reconcile_queue: RateLimitingQueue::new(DefaultControllerRateLimiter::new()),
        })
    }

    fn sync_context(&self) -> application::SyncContext {
        application::SyncContext {
            client: self.client.clone(),
            gateway: Arc::clone(&self.gateway),
            git: self.git.clone(),
        }
    }

    /// Runs the controller until `stop` is signaled: spawns the
    /// informer's event-dispatch loop, waits for the initial list sync,
    /// then spawns `workers` intake workers and `workers` reconcile
    /// workers. On shutdown both queues stop accepting new items and
    /// in-flight workers run to completion before this returns.
    pub async fn run(self: Arc<Self>, workers: usize, mut stop: watch::Receiver<bool>) {
        let (cache, mut events) = InformerCache::start(self.client.clone());

        let this = Arc::clone(&self);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_informer_event(event);
            }
        });

        tracing::info!("waiting for informer cache to sync");
        loop {
            if cache.has_synced() {
                break;
            }
            if *stop.borrow() {
                dispatch.abort();
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
                _ = stop.changed() => {}
            }
        }
        tracing::info!("informer cache synced, starting workers");

        let mut handles = Vec::with_capacity(workers * 2);
        for _ in 0..workers {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.intake_worker().await }));
        }
        for _ in 0..workers {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.reconcile_worker().await }));
        }

        let _ = stop.changed().await;
        tracing::info!("shutdown signaled, draining in-flight work");
        self.intake_queue.shut_down();
        self.reconcile_queue.shut_down();

        for h in handles {
            let _ = h.await;
        }
        dispatch.abort();
    }

    fn handle_informer_event(&self, event: InformerEvent) {
        match event {
            InformerEvent::Added(app) => {
                tracing::debug!(app = %utils::key_for(&app), "observed add");
                self.intake_queue.add_rate_limited(IntakeItem { app: Arc::new(app) });
            }
            InformerEvent::Deleted(app) => {
                tracing::debug!(app = %utils::key_for(&app), "observed delete");
                self.intake_queue.add_rate_limited(IntakeItem { app: Arc::new(app) });
            }
            InformerEvent::Updated { old, new } => {
                let spec_equal = crate::crds::specs_equal(&old.spec, &new.spec);
                let other_sections_equal = old.metadata.labels == new.metadata.labels
                    && old.metadata.annotations == new.metadata.annotations;
                if spec_equal && other_sections_equal {
                    tracing::debug!(app = %utils::key_for(&new), "no changes in application spec");
                    return;
                }
                // Bypass the intake queue: go straight to a reconcile.
                self.reconcile_queue.add_rate_limited(utils::key_for(&new));
            }
        }
    }

    async fn intake_worker(self: Arc<Self>) {
        while let Some(item) = self.intake_queue.get().await {
            let key = item.key();
            let result = self.process_intake_item(&item).await;
            match result {
                Ok(()) => {
                    self.intake_queue.forget(&item);
                }
                Err(e) => {
                    tracing::error!(key = %key, "intake worker error: {e}");
                    self.intake_queue.add_rate_limited(item.clone());
                    self.write_degraded(&item.app).await;
                }
            }
            self.intake_queue.done(&item);
        }
    }

    /// Looks the object up on the API server to decide whether this is
    /// a live object (hand off to the reconcile queue) or a tombstone
    /// (run the cleanup pass).
    async fn process_intake_item(&self, item: &IntakeItem) -> crate::error::Result<()> {
        let ns = item.app.namespace().unwrap_or_default();
        let name = item.app.name_any();
        let api: Api<Application> = Api::namespaced(self.client.clone(), &ns);

        match api.get(&name).await {
            Ok(_) => {
                self.reconcile_queue.add_rate_limited(item.key());
                Ok(())
            }
            Err(e) => {
                let err: Error = e.into();
                if err.is_not_found() {
                    application::cleanup_pass(&self.sync_context(), &item.app).await
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn reconcile_worker(self: Arc<Self>) {
        while let Some(key) = self.reconcile_queue.get().await {
            self.process_reconcile_key(&key).await;
            self.reconcile_queue.done(&key);
        }
    }

    async fn process_reconcile_key(&self, key: &str) {
        let (ns, name) = match utils::split_key(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("{e}");
                return;
            }
        };

        let api: Api<Application> = Api::namespaced(self.client.clone(), &ns);
        let app = match api.get(&name).await {
            Ok(app) => app,
            Err(e) => {
                let err: Error = e.into();
                if err.is_not_found() {
                    // Races with deletion; cleanup is owned by the intake path.
                    self.reconcile_queue.forget(&key.to_string());
                } else {
                    tracing::error!(key, "error getting application: {err}");
                    self.reconcile_queue.add_rate_limited(key.to_string());
                }
                return;
            }
        };

        match application::sync_pass(&self.sync_context(), &app).await {
            Ok(()) => {
                self.reconcile_queue.forget(&key.to_string());
            }
            Err(e) => {
                tracing::error!(key, "sync pass failed: {e}");
                self.reconcile_queue.add_rate_limited(key.to_string());
                self.write_degraded(&app).await;
            }
        }
    }

    async fn write_degraded(&self, app: &Application) {
        let ns = app.namespace().unwrap_or_default();
        let name = app.name_any();
        let previous_revision = app.status.as_ref().and_then(|s| s.revision.clone());
        let writer = StatusWriter::new(Api::namespaced(self.client.clone(), &ns));
        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = writer
            .write(&name, ApplicationStatus::degraded(previous_revision, now))
            .await
        {
            tracing::error!(app = %format!("{ns}/{name}"), "failed to write degraded status: {e}");
        }
    }
}
