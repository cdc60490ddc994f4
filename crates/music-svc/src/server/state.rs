//! Shared application state injected into every Axum handler.

use crate::db::InstrumentedDb;
use crate::telemetry::TelemetryHandle;

/// Application state shared across all request handlers.
///
/// Both fields are cheap to clone (pool handle and `Arc`-backed telemetry).
#[derive(Clone)]
pub struct AppState {
    /// Traced access to the song store.
    pub db: InstrumentedDb,
    /// Telemetry used by the request middleware.
    pub telemetry: TelemetryHandle,
}

impl AppState {
    pub fn new(db: InstrumentedDb, telemetry: TelemetryHandle) -> Self {
        Self { db, telemetry }
    }
}

#[cfg(test)]
impl AppState {
    /// State over a seeded in-memory store, suitable for tests.
    pub(crate) async fn for_tests(telemetry: TelemetryHandle) -> Self {
        let db = InstrumentedDb::new(crate::db::seeded_in_memory().await, telemetry.clone());
        Self::new(db, telemetry)
    }
}
