use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }
}

/// Body of a cancellation authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationAuthorizationRequest {
    pub policy_id: i64,
    /// Defaults to the policy key when empty.
    #[serde(default)]
    pub reason: String,
}
