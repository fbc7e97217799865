// ── Twin documents ──

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CoreError;

const VERSION_KEY: &str = "$version";

/// Last-known view of a device twin.
///
/// `desired_version` never decreases: a desired update whose version is not
/// strictly greater than it is a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwinState {
    pub reported: Value,
    pub desired: Value,
    pub desired_version: i64,
}

impl Default for TwinState {
    fn default() -> Self {
        Self {
            reported: Value::Object(Map::new()),
            desired: Value::Object(Map::new()),
            desired_version: 0,
        }
    }
}

impl TwinState {
    /// Build from a twin document.
    ///
    /// Accepts both the device-side shape `{desired, reported}` and the
    /// service-side shape `{deviceId, properties: {desired, reported}}`.
    pub fn from_document(doc: &Value) -> Result<Self, CoreError> {
        let Some(root) = doc.as_object() else {
            return Err(CoreError::Decode {
                message: "twin document is not a JSON object".into(),
            });
        };
        let props = match root.get("properties") {
            Some(Value::Object(props)) => props,
            Some(_) => {
                return Err(CoreError::Decode {
                    message: "twin 'properties' is not a JSON object".into(),
                });
            }
            None => root,
        };

        let section = |name: &str| -> Result<Value, CoreError> {
            match props.get(name) {
                None | Some(Value::Null) => Ok(Value::Object(Map::new())),
                Some(v @ Value::Object(_)) => Ok(v.clone()),
                Some(_) => Err(CoreError::Decode {
                    message: format!("twin '{name}' section is not a JSON object"),
                }),
            }
        };

        let desired = section("desired")?;
        let reported = section("reported")?;
        let desired_version = desired.get(VERSION_KEY).and_then(Value::as_i64).unwrap_or(0);

        Ok(Self {
            reported,
            desired,
            desired_version,
        })
    }

    /// Reported version as stamped by the hub, if present.
    pub fn reported_version(&self) -> Option<i64> {
        self.reported.get(VERSION_KEY).and_then(Value::as_i64)
    }
}

/// Raw desired-property push as delivered by a hub session.
#[derive(Debug, Clone)]
pub struct DesiredUpdate {
    /// `$version` from the delivery topic, when the transport provides one.
    pub version: Option<i64>,
    pub payload: Bytes,
}

/// A decoded desired-property delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredPatch {
    pub version: i64,
    pub patch: Value,
}

impl DesiredUpdate {
    /// Parse the payload as a JSON object carrying a version.
    ///
    /// The version comes from the document's `$version` field, falling back
    /// to the transport's. An update with neither is malformed.
    pub fn decode(&self) -> Result<DesiredPatch, CoreError> {
        let patch: Value = serde_json::from_slice(&self.payload).map_err(|e| CoreError::decode(&e))?;
        if !patch.is_object() {
            return Err(CoreError::Decode {
                message: "desired update is not a JSON object".into(),
            });
        }
        let version = patch
            .get(VERSION_KEY)
            .and_then(Value::as_i64)
            .or(self.version)
            .ok_or_else(|| CoreError::Decode {
                message: "desired update has no $version".into(),
            })?;
        Ok(DesiredPatch { version, patch })
    }
}

/// Acknowledgement of a reported-properties write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckStatus {
    pub status: u16,
    /// Reported version after the write, when the hub returns one.
    pub version: Option<i64>,
}

/// Apply `patch` to `target` with JSON merge-patch semantics: objects merge
/// recursively, `null` removes a key, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
