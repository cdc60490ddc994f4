//! Song and lyrics read service with OpenTelemetry request and data-access
//! instrumentation.

pub mod config;
pub mod db;
pub mod server;
pub mod telemetry;
