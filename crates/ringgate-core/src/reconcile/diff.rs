//! Pure desired-vs-actual comparison.

use serde_json::json;

use super::desired::{DesiredApp, DesiredState};
use crate::connector::ActualState;
use crate::domain::{DriftClass, EntityRef};

/// One difference between desired and actual state.
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    pub entity: EntityRef,
    pub class: DriftClass,
    pub desired: serde_json::Value,
    pub actual: serde_json::Value,
    /// What to re-push; absent for unexpected entities
    pub desired_app: Option<DesiredApp>,
    pub correlation_id: Option<String>,
}

fn desired_json(app: &DesiredApp) -> serde_json::Value {
    json!({
        "version": app.artifact.version,
        "digest": app.artifact.digest,
        "correlation_id": app.correlation_id,
    })
}

/// Compare the two states. Output is ordered by app name, desired apps
/// first.
pub fn diff_states(desired: &DesiredState, actual: &ActualState) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    for (name, want) in &desired.apps {
        let class = match actual.apps.get(name) {
            None => Some(DriftClass::Missing),
            Some(have) => {
                let digest_differs = have
                    .digest
                    .as_ref()
                    .is_some_and(|d| *d != want.artifact.digest);
                (have.version != want.artifact.version || digest_differs)
                    .then_some(DriftClass::VersionMismatch)
            }
        };
        if let Some(class) = class {
            out.push(Discrepancy {
                entity: EntityRef::app(name),
                class,
                desired: desired_json(want),
                actual: actual
                    .apps
                    .get(name)
                    .map(|a| json!(a))
                    .unwrap_or(serde_json::Value::Null),
                desired_app: Some(want.clone()),
                correlation_id: Some(want.correlation_id.clone()),
            });
        }
    }
    for (name, have) in &actual.apps {
        if !desired.apps.contains_key(name) {
            out.push(Discrepancy {
                entity: EntityRef::app(name),
                class: DriftClass::Unexpected,
                desired: serde_json::Value::Null,
                actual: json!(have),
                desired_app: None,
                correlation_id: None,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ObservedApp;
    use crate::domain::ArtifactRef;
    use chrono::Utc;
    use ringgate_state::ContentDigest;

    fn want(name: &str, version: &str) -> (String, DesiredApp) {
        (
            name.to_string(),
            DesiredApp {
                correlation_id: format!("dep-{name}"),
                artifact: ArtifactRef::new(
                    name,
                    version,
                    ContentDigest::from_bytes(version.as_bytes()),
                ),
                published_at: Utc::now(),
            },
        )
    }

    fn have(version: &str) -> ObservedApp {
        ObservedApp {
            version: version.into(),
            digest: Some(ContentDigest::from_bytes(version.as_bytes())),
            targets: 10,
        }
    }

    #[test]
    fn identical_states_have_no_drift() {
        let desired = DesiredState {
            apps: [want("7zip", "23.01")].into_iter().collect(),
        };
        let mut actual = ActualState::default();
        actual.apps.insert("7zip".into(), have("23.01"));
        assert!(diff_states(&desired, &actual).is_empty());
    }

    #[test]
    fn classifies_each_kind() {
        let desired = DesiredState {
            apps: [want("7zip", "23.01"), want("vlc", "3.0.20")].into_iter().collect(),
        };
        let mut actual = ActualState::default();
        actual.apps.insert("vlc".into(), have("3.0.18"));
        actual.apps.insert("putty".into(), have("0.80"));

        let found: Vec<(String, DriftClass)> = diff_states(&desired, &actual)
            .into_iter()
            .map(|d| (d.entity.id, d.class))
            .collect();
        assert_eq!(
            found,
            vec![
                ("7zip".to_string(), DriftClass::Missing),
                ("vlc".to_string(), DriftClass::VersionMismatch),
                ("putty".to_string(), DriftClass::Unexpected),
            ]
        );
    }

    #[test]
    fn digest_mismatch_with_same_version_is_drift() {
        let desired = DesiredState {
            apps: [want("7zip", "23.01")].into_iter().collect(),
        };
        let mut actual = ActualState::default();
        actual.apps.insert(
            "7zip".into(),
            ObservedApp {
                version: "23.01".into(),
                digest: Some(ContentDigest::from_bytes(b"tampered")),
                targets: 10,
            },
        );
        let drift = diff_states(&desired, &actual);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].class, DriftClass::VersionMismatch);
        assert!(drift[0].desired_app.is_some());
    }
}
