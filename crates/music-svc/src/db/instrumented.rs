//! Traced and timed data access.

use std::future::Future;
use std::time::Instant;

use opentelemetry::trace::{FutureExt, SpanKind};
use opentelemetry::{Context, KeyValue};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteQueryResult, SqliteRow};

use super::{Database, DbOperation, SqlArg};
use crate::telemetry::{TelemetryHandle, QUERY_DURATION};

/// [`Database`] wrapper that records one span and one `query_duration`
/// measurement per call.
///
/// Results and errors are returned exactly as the pool produced them.
#[derive(Clone)]
pub struct InstrumentedDb {
    db: Database,
    telemetry: TelemetryHandle,
}

impl InstrumentedDb {
    pub fn new(db: Database, telemetry: TelemetryHandle) -> Self {
        Self { db, telemetry }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Fetch every row produced by `sql`.
    pub async fn query_rows(
        &self,
        cx: &Context,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        self.instrument(cx, DbOperation::QueryRows, sql, |_| {
            bind_args(sql, args).fetch_all(self.db.pool())
        })
        .await
    }

    /// Fetch the first row produced by `sql`, if any. An empty result is
    /// `Ok(None)` and counts as a success.
    pub async fn query_one_row(
        &self,
        cx: &Context,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Option<SqliteRow>, sqlx::Error> {
        self.instrument(cx, DbOperation::QueryOneRow, sql, |_| {
            bind_args(sql, args).fetch_optional(self.db.pool())
        })
        .await
    }

    /// Run a statement that returns no rows.
    pub async fn execute(
        &self,
        cx: &Context,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<SqliteQueryResult, sqlx::Error> {
        self.instrument(cx, DbOperation::Execute, sql, |_| {
            bind_args(sql, args).execute(self.db.pool())
        })
        .await
    }

    /// Run `call` inside a client span that is a child of `parent`.
    ///
    /// `call` receives the child context; it is also attached to the
    /// returned future while it is polled. If the future is dropped before
    /// completion the span is still ended (marked abandoned) but no duration
    /// is recorded.
    pub async fn instrument<T, E, F, Fut>(
        &self,
        parent: &Context,
        op: DbOperation,
        statement: &str,
        call: F,
    ) -> Result<T, E>
    where
        E: std::error::Error,
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let scope = self.telemetry.start_span(
            op.span_name(),
            SpanKind::Client,
            parent,
            vec![
                KeyValue::new("db.system", "sqlite"),
                KeyValue::new("db.operation", op.as_str()),
                KeyValue::new("db.statement", statement.to_owned()),
            ],
        );

        let cx = scope.context().clone();
        let result = call(cx.clone()).with_context(cx).await;

        self.telemetry.instruments().histogram(QUERY_DURATION).record(
            start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("operation", op.as_str()),
                KeyValue::new("error", result.is_err()),
            ],
        );
        if let Err(e) = &result {
            scope.record_error(e);
        }
        scope.finish();
        result
    }
}

fn bind_args<'q>(sql: &'q str, args: &'q [SqlArg]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    args.iter().fold(sqlx::query(sql), |query, arg| match arg {
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Text(s) => query.bind(s.as_str()),
    })
}
