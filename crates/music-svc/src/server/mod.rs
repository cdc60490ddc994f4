//! Axum HTTP server, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Trace and time every request to an instrumented route.
//! - Inject shared application state (`AppState`) into handlers.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
