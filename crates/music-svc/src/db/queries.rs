//! Song and lyrics read queries.

use common::protocol::SongWithLyrics;
use opentelemetry::Context;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{InstrumentedDb, SqlArg};

const SONG_WITH_LYRICS: &str = "\
SELECT s.id, s.name, l.text
FROM song s
LEFT JOIN lyrics l ON s.id = l.song
WHERE s.id = ?
ORDER BY l.line";

/// Fetch song `id` with its lyric lines in line order.
///
/// `Ok(None)` if no such song exists. A song without lyrics has an empty
/// `lyrics` list.
pub async fn fetch_song_with_lyrics(
    db: &InstrumentedDb,
    cx: &Context,
    id: i64,
) -> Result<Option<SongWithLyrics>, sqlx::Error> {
    let rows = db
        .query_rows(cx, SONG_WITH_LYRICS, &[SqlArg::Int(id)])
        .await?;
    collect_song(&rows)
}

/// Fold joined `(id, name, text)` rows into one song. Rows for any id other
/// than the first one seen are ignored.
fn collect_song(rows: &[SqliteRow]) -> Result<Option<SongWithLyrics>, sqlx::Error> {
    let mut song: Option<SongWithLyrics> = None;
    for row in rows {
        let id: i64 = row.try_get("id")?;
        if song.is_none() {
            song = Some(SongWithLyrics {
                id,
                name: row.try_get("name")?,
                lyrics: Vec::new(),
            });
        }
        if let Some(current) = song.as_mut().filter(|s| s.id == id) {
            if let Some(text) = row.try_get::<Option<String>, _>("text")? {
                current.lyrics.push(text);
            }
        }
    }
    Ok(song)
}
