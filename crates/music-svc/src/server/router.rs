//! Axum router construction.

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Span name of the song lookup route.
pub const GET_SONG_OPERATION: &str = "get_song_with_lyrics";

/// Build the application [`Router`] with all routes and middleware attached.
///
/// Only the song route is instrumented; `/health` and the fallback are not.
pub fn build(state: AppState) -> Router {
    let song_telemetry =
        middleware::RequestTelemetry::new(state.telemetry.clone(), GET_SONG_OPERATION);

    Router::new()
        .route("/songs/:id", get(handlers::get_song))
        .route_layer(from_fn_with_state(
            song_telemetry,
            middleware::instrument_request,
        ))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(CatchPanicLayer::custom(handlers::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .with_state(state)
}
