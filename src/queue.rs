/*
* File: src/queue.rs
*
* A generic rate-limited work queue with per-key deduplication and
* per-key delivery serialization, used for both the event intake queue
* and the reconcile queue. This is a from-scratch re-expression, in
* Rust, of client-go's `workqueue.RateLimitingInterface` as read off
* `original_source/gitops/internal/controller/controller.go`
* (`queue.Get`/`Done`/`Forget`/`AddRateLimited`): a `dirty` set of keys
* that need work, a `processing` set of keys currently checked out by a
* worker, and an ordered queue of keys ready to hand out. Re-adding a key
* that is already `dirty` coalesces with the pending entry instead of
* duplicating work; re-adding a key that is currently `processing` defers
* redelivery until `done` is called for it — this is what gives at most
* one worker per key at a time.
*
* client-go protects this state with a `sync.Cond`; this port uses a
* `tokio::sync::Notify` instead, which is the idiomatic async analogue
* for "wake up whoever's waiting when the state changes."
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::ratelimiter::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct Inner<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

pub struct RateLimitingQueue<K, R> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    rate_limiter: R,
}

impl<K, R> RateLimitingQueue<K, R>
where
    K: Clone + Eq + Hash + Send + Sync + ToString + 'static,
    R: RateLimiter<K> + Send + Sync + 'static,
{
    pub fn new(rate_limiter: R) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter,
        })
    }

    /// Add a key for immediate processing.
    pub fn add(&self, key: K) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down {
            return;
        }
        if inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Add a key after the rate limiter's backoff delay for it elapses.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.rate_limiter.when(&key);
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.add(key);
        });
    }

    /// Clear the key's rate-limit failure history. Call after a
    /// successful pass.
    pub fn forget(&self, key: &K) {
        self.rate_limiter.forget(key);
    }

    /// Block until a key is available or the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register for a notification before checking state, not
            // after dropping the lock: otherwise a `shut_down`/`add` that
            // lands in the gap between the check and the await is missed
            // forever, since `notify_waiters` stores no permit for a
            // future waiter the way `notify_one` does.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Signal that a key handed out by `get` is finished. If it was
    /// re-added (directly via `add`/`add_rate_limited`, or coalesced)
    /// while it was processing, it becomes eligible again immediately.
    pub fn done(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimiter::ExponentialFailureRateLimiter;

    fn queue() -> Arc<RateLimitingQueue<String, ExponentialFailureRateLimiter>> {
        RateLimitingQueue::new(ExponentialFailureRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_millis(50),
        ))
    }

    #[tokio::test]
    async fn get_returns_added_key() {
        let q = queue();
        q.add("default/app-one".to_string());
        let key = q.get().await.unwrap();
        assert_eq!(key, "default/app-one");
    }

    #[tokio::test]
    async fn duplicate_adds_while_dirty_coalesce() {
        let q = queue();
        q.add("k".to_string());
        q.add("k".to_string());
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn redelivery_while_processing_is_deferred_until_done() {
        let q = queue();
        q.add("k".to_string());
        let key = q.get().await.unwrap();
        // Arrives again while a worker holds the key — must not be
        // handed to a second worker concurrently.
        q.add(key.clone());
        assert_eq!(q.len(), 0);
        q.done(&key);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn shut_down_unblocks_get() {
        let q = queue();
        q.shut_down();
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn shut_down_unblocks_a_waiting_getter() {
        let q = queue();
        let waiter = tokio::spawn({
            let q = Arc::clone(&q);
            async move { q.get().await }
        });
        // Give the spawned task a chance to start waiting on the empty
        // queue before shutting it down.
        tokio::task::yield_now().await;
        q.shut_down();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }
}
