/*
* File: src/status.rs
*
* The status writer: a read-modify-update wrapper around the
* Application's status sub-resource with optimistic-concurrency retry.
* Each attempt fetches the live object, replaces its `status`, and
* calls the sub-resource update; a `conflict` response retries with
* exponential backoff and jitter, any other error is final.
*
* Grounded on the retry shape hinted at by
* `original_source/gitops/common/status.go` (a dedicated status-update
* helper) generalized to a full backoff policy: initial 10ms, factor 2,
* 10% jitter, capped at 5 steps.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{Application, ApplicationStatus};
use crate::error::{Error, Result};
use kube::api::{Api, PostParams};
use std::time::Duration;

const MAX_STEPS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_millis(10);
const FACTOR: f64 = 2.0;
const JITTER: f64 = 0.10;

pub struct StatusWriter {
    api: Api<Application>,
}

impl StatusWriter {
    pub fn new(api: Api<Application>) -> Self {
        Self { api }
    }

    /// Read-modify-update `name`'s status, retrying on `conflict` up to
    /// `MAX_STEPS` times with exponential backoff and jitter.
    pub async fn write(&self, name: &str, new_status: ApplicationStatus) -> Result<()> {
        let mut delay = INITIAL_DELAY;

        for attempt in 0..MAX_STEPS {
            let mut app = self.api.get(name).await?;
            app.status = Some(new_status.clone());

            let body = serde_json::to_vec(&app)
                .map_err(|e| Error::Internal(format!("error serializing status: {e}")))?;

            match self
                .api
                .replace_status(name, &PostParams::default(), body)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err: Error = e.into();
                    if !err.is_conflict() || attempt + 1 == MAX_STEPS {
                        return Err(err);
                    }
                    tokio::time::sleep(jittered(delay)).await;
                    delay = delay.mul_f64(FACTOR);
                }
            }
        }

        Err(Error::Conflict(format!(
            "status update for {name} still conflicting after {MAX_STEPS} attempts"
        )))
    }
}

/// Applies +/-`JITTER` to `delay` using the low bits of a monotonic
/// clock reading as an entropy source, avoiding a dependency on a
/// dedicated RNG crate for a single bounded jitter draw.
fn jittered(delay: Duration) -> Duration {
    let nanos = std::time::Instant::now().elapsed().subsec_nanos() as f64;
    let unit = (nanos % 1000.0) / 1000.0; // in [0, 1)
    let jitter_range = delay.as_secs_f64() * JITTER;
    let offset = (unit * 2.0 - 1.0) * jitter_range;
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_delay_stays_within_ten_percent() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d.as_secs_f64() >= 0.09 && d.as_secs_f64() <= 0.11);
        }
    }
}
