//! SQLite storage for songs and their lyrics.
//!
//! # Responsibilities
//! - Open the connection pool and create the schema on startup.
//! - Seed one sample song when the store is empty.
//! - Route every application query through [`InstrumentedDb`] so it is traced
//!   and timed.

pub mod instrumented;
pub mod queries;

use std::time::Duration;

use opentelemetry::Context;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

pub use instrumented::InstrumentedDb;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS song (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS lyrics (
    song INTEGER NOT NULL,
    line INTEGER NOT NULL,
    text TEXT NOT NULL,
    FOREIGN KEY (song) REFERENCES song(id),
    PRIMARY KEY (song, line)
);
";

const SAMPLE_SONG: &str = "Example Song";
const SAMPLE_LYRICS: [&str; 4] = [
    "This is the first line of our example song",
    "Here comes the second line with a melody",
    "The third line continues the story",
    "And this is how our sample song ends",
];

/// Storage setup failures. Query failures inside a request are plain
/// [`sqlx::Error`]s returned unchanged by [`InstrumentedDb`].
#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database")]
    Connect(#[source] sqlx::Error),

    #[error("failed to create schema")]
    Schema(#[source] sqlx::Error),

    #[error("database query failed")]
    Query(#[from] sqlx::Error),
}

/// Positional bind argument for an instrumented statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
}

/// Kind of data-access call, used for span names and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    /// Multi-row read.
    QueryRows,
    /// Single-row read.
    QueryOneRow,
    /// Write with no result rows.
    Execute,
}

impl DbOperation {
    /// Value of the `operation` label and `db.operation` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            DbOperation::QueryRows => "query",
            DbOperation::QueryOneRow => "query_row",
            DbOperation::Execute => "exec",
        }
    }

    pub fn span_name(self) -> &'static str {
        match self {
            DbOperation::QueryRows => "db.query",
            DbOperation::QueryOneRow => "db.query_row",
            DbOperation::Execute => "db.exec",
        }
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a pool against `database_url` (e.g. `sqlite://music.db?mode=rwc`).
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        info!("connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("database connection established");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` would otherwise see its own empty store.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        Self { pool }
    }

    /// Create the `song` and `lyrics` tables if they do not exist.
    pub async fn create_tables(&self) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(DbError::Schema)?;
        debug!("database schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Verify connectivity with a trivial query.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections to return, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Insert the sample song and its four lyric lines if no song exists yet.
///
/// Returns `true` if data was inserted. Runs as its own root trace.
pub async fn seed_sample_data(db: &InstrumentedDb) -> Result<bool, DbError> {
    let cx = Context::new();

    let count: i64 = match db
        .query_one_row(&cx, "SELECT COUNT(*) AS n FROM song", &[])
        .await?
    {
        Some(row) => row.try_get("n")?,
        None => 0,
    };
    if count > 0 {
        debug!(songs = count, "sample data already present");
        return Ok(false);
    }

    let song_id = db
        .execute(
            &cx,
            "INSERT INTO song (name) VALUES (?)",
            &[SqlArg::Text(SAMPLE_SONG.into())],
        )
        .await?
        .last_insert_rowid();

    for (line, text) in (1..).zip(SAMPLE_LYRICS) {
        db.execute(
            &cx,
            "INSERT INTO lyrics (song, line, text) VALUES (?, ?, ?)",
            &[SqlArg::Int(song_id), SqlArg::Int(line), SqlArg::Text(text.into())],
        )
        .await?;
    }

    info!(song_id, lines = SAMPLE_LYRICS.len(), "sample data inserted");
    Ok(true)
}

/// In-memory database with schema and sample data, seeded through a
/// telemetry pipeline that exports nowhere.
#[cfg(test)]
pub(crate) async fn seeded_in_memory() -> Database {
    use crate::telemetry::TelemetryPipeline;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use opentelemetry_sdk::trace::TracerProvider;

    let db = Database::in_memory().await;
    db.create_tables().await.expect("create tables");
    let (handle, _pipeline) = TelemetryPipeline::from_providers(
        TracerProvider::builder().build(),
        SdkMeterProvider::builder().build(),
    );
    seed_sample_data(&InstrumentedDb::new(db.clone(), handle))
        .await
        .expect("seed sample data");
    db
}
