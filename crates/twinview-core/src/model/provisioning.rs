// ── Provisioning outcome ──

use std::fmt;

use serde::Serialize;
use twinview_api::RegistrationOperation;

/// Result of a DPS registration. Only `Assigned` yields a usable hub session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProvisioningResult {
    Assigned {
        hub_host: String,
    },
    Assigning,
    Failed {
        reason: ProvisioningFailure,
        /// DPS `errorMessage`, when the service supplied one.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningFailure {
    /// The wall-clock budget ran out while DPS was still assigning.
    Timeout,
    /// DPS reached a terminal status other than `assigned`.
    Status(String),
}

impl fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for assignment"),
            Self::Status(status) => write!(f, "registration ended with status '{status}'"),
        }
    }
}

impl ProvisioningResult {
    /// Classify a DPS operation snapshot.
    pub fn from_operation(op: &RegistrationOperation) -> Self {
        if op.is_pending() {
            return Self::Assigning;
        }

        let state = op.registration_state.as_ref();
        match (op.status.as_str(), state.and_then(|s| s.assigned_hub.as_deref())) {
            ("assigned", Some(hub)) if !hub.is_empty() => Self::Assigned {
                hub_host: hub.to_owned(),
            },
            ("assigned", _) => Self::Failed {
                reason: ProvisioningFailure::Status("assigned".into()),
                message: Some("assigned without a hub".into()),
            },
            (status, _) => Self::Failed {
                reason: ProvisioningFailure::Status(status.to_owned()),
                message: state.and_then(|s| s.error_message.clone()),
            },
        }
    }

    /// Human-readable failure text, `None` unless the result is `Failed`.
    pub fn failure(&self) -> Option<String> {
        match self {
            Self::Failed { reason, message: Some(message) } => Some(format!("{reason}: {message}")),
            Self::Failed { reason, message: None } => Some(reason.to_string()),
            _ => None,
        }
    }

    pub fn hub_host(&self) -> Option<&str> {
        match self {
            Self::Assigned { hub_host } => Some(hub_host),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(json: serde_json::Value) -> RegistrationOperation {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn pending_statuses_are_assigning() {
        for status in ["assigning", "unassigned"] {
            let result = ProvisioningResult::from_operation(&op(serde_json::json!({
                "operationId": "o", "status": status
            })));
            assert_eq!(result, ProvisioningResult::Assigning);
        }
    }

    #[test]
    fn assigned_extracts_hub() {
        let result = ProvisioningResult::from_operation(&op(serde_json::json!({
            "operationId": "o",
            "status": "assigned",
            "registrationState": { "assignedHub": "hub-a.example.net" }
        })));
        assert_eq!(result.hub_host(), Some("hub-a.example.net"));
    }

    #[test]
    fn other_terminal_status_is_failure() {
        let result = ProvisioningResult::from_operation(&op(serde_json::json!({
            "operationId": "o",
            "status": "disabled",
        })));
        assert_eq!(
            result,
            ProvisioningResult::Failed {
                reason: ProvisioningFailure::Status("disabled".into()),
                message: None,
            }
        );
    }

    #[test]
    fn failure_carries_dps_error_message() {
        let result = ProvisioningResult::from_operation(&op(serde_json::json!({
            "operationId": "o",
            "status": "failed",
            "registrationState": { "errorMessage": "Custom allocation failed" }
        })));
        assert_eq!(
            result,
            ProvisioningResult::Failed {
                reason: ProvisioningFailure::Status("failed".into()),
                message: Some("Custom allocation failed".into()),
            }
        );
        assert_eq!(
            result.failure().as_deref(),
            Some("registration ended with status 'failed': Custom allocation failed")
        );
    }

    #[test]
    fn failed_serializes_status_apart_from_message() {
        let result = ProvisioningResult::from_operation(&op(serde_json::json!({
            "operationId": "o",
            "status": "disabled",
            "registrationState": { "errorMessage": "enrollment disabled" }
        })));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "status": "failed",
                "reason": { "status": "disabled" },
                "message": "enrollment disabled"
            })
        );
    }
}
