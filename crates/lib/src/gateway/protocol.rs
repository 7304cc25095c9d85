//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};

/// Response envelope: `{ "success", "message"?, "data"?, "retryAfter"? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Seconds until the rate-limit window resets (429 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            retry_after: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            retry_after: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            retry_after: None,
        }
    }

    pub fn too_many(retry_after: i64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::err("Too many requests")
        }
    }
}

/// Body of `POST /api/config/:key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfigParams {
    pub value: serde_json::Value,
}

/// Body of `POST /api/check/url` and `POST /api/check/hosts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckParams {
    pub value: String,
}
