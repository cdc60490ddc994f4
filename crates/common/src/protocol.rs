//! Response types returned by the public HTTP API.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Songs
// ---------------------------------------------------------------------------

/// Response body for `GET /songs/:id`.
///
/// `lyrics` holds the text of every line in ascending line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongWithLyrics {
    pub id: i64,
    pub name: String,
    pub lyrics: Vec<String>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"not_found"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the connection pool is open.
    pub database_ready: bool,
}
