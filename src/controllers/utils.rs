/*
* File: src/controllers/utils.rs
*
* Small helpers shared between the intake and reconcile workers: key
* formatting/splitting and success-event recording. Kept separate from
* the sync/cleanup pass so that file stays focused on the reconciliation
* algorithm itself.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{Application, EVENT_SOURCE};
use crate::error::{Error, Result};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};

/// Builds the `namespace/name` reconcile key for an Application.
pub fn key_for(app: &Application) -> String {
    format!("{}/{}", app.namespace().unwrap_or_default(), app.name_any())
}

/// Splits a `namespace/name` reconcile key. Errors with
/// `invalid-argument` if the key is not exactly two `/`-separated parts.
pub fn split_key(key: &str) -> Result<(String, String)> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(Error::InvalidArgument(format!("malformed reconcile key: {key}"))),
    }
}

/// Records a `Normal/Synced` event against the Application after a
/// successful sync pass.
pub async fn record_synced_event(client: Client, app: &Application) -> Result<()> {
    let reporter = Reporter::from(EVENT_SOURCE.to_string());
    let recorder = Recorder::new(client, reporter);
    recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: "Synced".into(),
                note: Some("App synced successfully".into()),
                action: "Sync".into(),
                secondary: None,
            },
            &app.object_ref(&()),
        )
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_key_round_trips_with_key_for() {
        let (ns, name) = split_key("default/app-one").unwrap();
        assert_eq!(ns, "default");
        assert_eq!(name, "app-one");
    }

    #[test]
    fn split_key_rejects_malformed_input() {
        assert!(split_key("no-slash").is_err());
        assert!(split_key("/missing-ns").is_err());
        assert!(split_key("missing-name/").is_err());
    }
}
