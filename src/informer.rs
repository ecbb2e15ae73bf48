/*
* File: src/informer.rs
*
* The informer cache: a thin adapter over `kube::runtime::watcher`, the
* idiomatic kube-rs equivalent of client-go's `SharedIndexInformer`
* (`original_source/gitops/pkg/informers`, generated by
* `k8s.io/code-generator`), classifying watch events into add/update/
* delete against a local store.
*
* Guarantees preserved:
* - single-writer: one task owns the watch stream and the local store,
*   and emits classified events to a channel in server-observed order.
* - `has_synced()` becomes true once `Event::InitDone` is observed.
* - periodic relists may re-emit `Apply` for unchanged objects; this
*   adapter does not itself filter no-ops, that is the caller's job, so
*   callers must still compare `old`/`new`.
* - delete events carry the last-known object read from the local
*   store, since the API server no longer has it.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::Application;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum InformerEvent {
    Added(Application),
    Updated {
        old: Box<Application>,
        new: Box<Application>,
    },
    Deleted(Application),
}

pub struct InformerCache {
    has_synced: Arc<AtomicBool>,
}

impl InformerCache {
    /// Spawns the watch loop and returns a handle plus the channel of
    /// classified events. The handle's `has_synced` flips once the
    /// initial list has been fully delivered.
    pub fn start(client: Client) -> (Self, mpsc::Receiver<InformerEvent>) {
        let has_synced = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(1024);

        let synced = Arc::clone(&has_synced);
        tokio::spawn(async move {
            let api: Api<Application> = Api::all(client);
            let mut store: HashMap<(String, String), Application> = HashMap::new();
            let stream = kube::runtime::watcher(api, watcher::Config::default());
            futures::pin_mut!(stream);

            while let Some(event) = stream.next().await {
                match event {
                    Ok(Event::InitDone) => {
                        synced.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Init) => {}
                    Ok(Event::InitApply(obj)) | Ok(Event::Apply(obj)) => {
                        let k = (obj.namespace().unwrap_or_default(), obj.name_any());
                        let event = match store.insert(k, obj.clone()) {
                            None => InformerEvent::Added(obj),
                            Some(old) => InformerEvent::Updated {
                                old: Box::new(old),
                                new: Box::new(obj),
                            },
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Delete(obj)) => {
                        let k = (obj.namespace().unwrap_or_default(), obj.name_any());
                        let last_known = store.remove(&k).unwrap_or(obj);
                        if tx.send(InformerEvent::Deleted(last_known)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("informer watch error: {e}");
                    }
                }
            }
        });

        (Self { has_synced }, rx)
    }

    pub fn has_synced(&self) -> bool {
        self.has_synced.load(Ordering::SeqCst)
    }
}
