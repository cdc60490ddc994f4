//! Axum request handlers for all service endpoints.

use std::any::Any;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse};
use common::ServiceError;
use tracing::{error, warn};

use super::middleware::RequestContext;
use super::state::AppState;
use crate::db::queries;

/// `GET /songs/:id` — one song with its lyric lines in order.
pub async fn get_song(
    State(state): State<AppState>,
    rcx: RequestContext,
    Path(raw_id): Path<String>,
) -> Response {
    let id: i64 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return reject(&rcx, ServiceError::BadRequest(format!("invalid song id: {raw_id}")))
        }
    };

    match queries::fetch_song_with_lyrics(&state.db, rcx.context(), id).await {
        Ok(Some(song)) => (StatusCode::OK, Json(song)).into_response(),
        Ok(None) => reject(&rcx, ServiceError::NotFound(format!("song {id}"))),
        Err(e) => {
            warn!(error = %e, song_id = id, "failed to load song");
            reject(&rcx, ServiceError::Database(e.to_string()))
        }
    }
}

/// `GET /health` — liveness and readiness check.
///
/// Returns `200 OK` when the database answers a trivial query, `503 Service
/// Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let database_ready = match state.db.database().health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = ?e, "database health check failed");
            false
        }
    };

    let (status_code, status_str) = if database_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        database_ready,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

/// Response for a handler panic caught by the router.
pub fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("request handler panicked");
    let err = ErrorResponse::new("internal_error", "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
}

/// Record `err` on the request span and render it as a JSON error response.
///
/// Server-side failures are reported to the client without detail.
fn reject(rcx: &RequestContext, err: ServiceError) -> Response {
    rcx.record_error(&err);
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if status.is_server_error() {
        "internal error".to_owned()
    } else {
        err.to_string()
    };
    (status, Json(ErrorResponse::new(err.code(), message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::TestTelemetry;
    use axum::routing::get;
    use axum::{body::Body, http::Request, Router};
    use tower::ServiceExt;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn test_router(t: &TestTelemetry) -> Router {
        Router::new()
            .route("/songs/:id", get(get_song))
            .route("/health", get(health))
            .with_state(AppState::for_tests(t.handle.clone()).await)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_reports_ready_database() {
        let t = TestTelemetry::new();
        let app = test_router(&t).await;
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database_ready"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_reports_closed_database() {
        let t = TestTelemetry::new();
        let state = AppState::for_tests(t.handle.clone()).await;
        state.db.database().close().await;
        let app = Router::new()
            .route("/health", get(health))
            .with_state(state);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["database_ready"], false);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_numeric_id_is_bad_request() {
        let t = TestTelemetry::new();
        let app = test_router(&t).await;
        let req = Request::builder()
            .uri("/songs/abc")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "bad_request");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn database_failure_is_internal_error() {
        let t = TestTelemetry::new();
        let state = AppState::for_tests(t.handle.clone()).await;
        sqlx::query("DROP TABLE lyrics")
            .execute(state.db.database().pool())
            .await
            .unwrap();
        let app = Router::new()
            .route("/songs/:id", get(get_song))
            .with_state(state);
        let req = Request::builder()
            .uri("/songs/1")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "internal_error");
        assert_eq!(body["message"], "internal error");
    }

    #[test]
    fn panic_response_is_json_500() {
        let resp = panic_response(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
