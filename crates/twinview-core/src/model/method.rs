// ── Direct methods ──

use serde::Serialize;
use serde_json::{Value, json};

/// A direct-method call delivered to the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodInvocation {
    pub name: String,
    /// Request payload; `Null` when the caller sent none.
    pub payload: Value,
}

/// The device's answer to a direct-method call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodResponse {
    pub status: u16,
    pub payload: Value,
}

impl MethodResponse {
    pub fn new(status: u16, payload: Value) -> Self {
        Self { status, payload }
    }

    pub fn ok(payload: Value) -> Self {
        Self::new(200, payload)
    }

    /// Answer for a method nobody registered a handler for.
    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            501,
            json!({ "message": format!("no handler registered for method '{method}'") }),
        )
    }

    /// Answer for a call whose payload is not JSON.
    pub fn bad_request(message: &str) -> Self {
        Self::new(400, json!({ "message": message }))
    }
}
