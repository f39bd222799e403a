//! SQLite storage for resolved locations and bookmarks.
//!
//! Resolved locations are keyed by normalized place name and upserted
//! (last write wins). Bookmarks are unique on (region, locality); inserting a
//! duplicate is ignored and reported back to the caller.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::{
    error::Result,
    model::{Bookmark, LocationRef, NewBookmark, ResolvedLocation},
};

const SCHEMA_VERSION: i64 = 2;

pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS locations (
                    name TEXT PRIMARY KEY NOT NULL,
                    display_name TEXT NOT NULL,
                    location_key TEXT,
                    latitude REAL,
                    longitude REAL,
                    resolved_at INTEGER NOT NULL
                );
                "#,
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS bookmarks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                    region_name TEXT NOT NULL,
                    region_abbreviation TEXT NOT NULL,
                    locality_name TEXT NOT NULL,
                    UNIQUE (region_name, locality_name)
                );
                "#,
            )?;
        }

        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!(from = version, to = SCHEMA_VERSION, "migrated store schema");
        }

        Ok(())
    }

    // ── Locations ──

    pub fn location(&self, name: &str) -> Result<Option<ResolvedLocation>> {
        let conn = self.conn.lock();
        let location = conn
            .query_row(
                "SELECT name, display_name, location_key, latitude, longitude
                 FROM locations WHERE name = ?1",
                params![name],
                location_from_row,
            )
            .optional()?;
        Ok(location.flatten())
    }

    pub fn upsert_location(&self, location: &ResolvedLocation) -> Result<()> {
        let (key, lat, lon) = match &location.place {
            LocationRef::Coordinates { lat, lon } => (None, Some(*lat), Some(*lon)),
            LocationRef::ProviderKey { key } => (Some(key.as_str()), None, None),
        };

        self.conn.lock().execute(
            "INSERT OR REPLACE INTO locations
             (name, display_name, location_key, latitude, longitude, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                location.name,
                location.display_name,
                key,
                lat,
                lon,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn location_count(&self) -> Result<usize> {
        let n: i64 = self.conn.lock().query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    // ── Bookmarks ──

    /// All bookmarks ordered by region, then locality.
    pub fn bookmarks(&self) -> Result<Vec<Bookmark>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, region_name, region_abbreviation, locality_name
             FROM bookmarks ORDER BY region_name, locality_name ASC",
        )?;
        let rows = stmt.query_map([], bookmark_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn bookmark(&self, id: i64) -> Result<Option<Bookmark>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, region_name, region_abbreviation, locality_name
                 FROM bookmarks WHERE id = ?1",
                params![id],
                bookmark_from_row,
            )
            .optional()?)
    }

    pub fn find_bookmark(&self, region_name: &str, locality_name: &str) -> Result<Option<Bookmark>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, region_name, region_abbreviation, locality_name
                 FROM bookmarks WHERE region_name = ?1 AND locality_name = ?2",
                params![region_name, locality_name],
                bookmark_from_row,
            )
            .optional()?)
    }

    /// Inserts `bookmark`, ignoring conflicts. `None` means it already existed.
    pub fn insert_bookmark(&self, bookmark: &NewBookmark) -> Result<Option<Bookmark>> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO bookmarks (region_name, region_abbreviation, locality_name)
             VALUES (?1, ?2, ?3)",
            params![bookmark.region_name, bookmark.region_abbreviation, bookmark.locality_name],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(Bookmark {
            id: conn.last_insert_rowid(),
            region_name: bookmark.region_name.clone(),
            region_abbreviation: bookmark.region_abbreviation.clone(),
            locality_name: bookmark.locality_name.clone(),
        }))
    }

    pub fn delete_bookmark(&self, id: i64) -> Result<bool> {
        let n = self.conn.lock().execute("DELETE FROM bookmarks WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

/// Rows with neither a key nor both coordinates are treated as absent.
fn location_from_row(row: &Row<'_>) -> rusqlite::Result<Option<ResolvedLocation>> {
    let key: Option<String> = row.get(2)?;
    let lat: Option<f64> = row.get(3)?;
    let lon: Option<f64> = row.get(4)?;

    let place = match (key, lat, lon) {
        (_, Some(lat), Some(lon)) => LocationRef::Coordinates { lat, lon },
        (Some(key), _, _) => LocationRef::ProviderKey { key },
        _ => return Ok(None),
    };

    Ok(Some(ResolvedLocation { name: row.get(0)?, display_name: row.get(1)?, place }))
}

fn bookmark_from_row(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        region_name: row.get(1)?,
        region_abbreviation: row.get(2)?,
        locality_name: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nyc() -> ResolvedLocation {
        ResolvedLocation {
            name: "new york city, new york".into(),
            display_name: "New York, New York".into(),
            place: LocationRef::Coordinates { lat: 40.7128, lon: -74.006 },
        }
    }

    fn bookmark(region: &str, abbr: &str, city: &str) -> NewBookmark {
        NewBookmark {
            region_name: region.into(),
            region_abbreviation: abbr.into(),
            locality_name: city.into(),
        }
    }

    #[test]
    fn location_roundtrip() {
        let store = Store::in_memory().unwrap();
        assert!(store.location("new york city, new york").unwrap().is_none());

        store.upsert_location(&nyc()).unwrap();
        assert_eq!(store.location("new york city, new york").unwrap(), Some(nyc()));
    }

    #[test]
    fn provider_key_location_roundtrip() {
        let store = Store::in_memory().unwrap();
        let loc = ResolvedLocation {
            name: "boston, massachusetts".into(),
            display_name: "Boston, MA".into(),
            place: LocationRef::ProviderKey { key: "348735".into() },
        };
        store.upsert_location(&loc).unwrap();
        assert_eq!(store.location("boston, massachusetts").unwrap(), Some(loc));
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let store = Store::in_memory().unwrap();
        store.upsert_location(&nyc()).unwrap();

        let mut moved = nyc();
        moved.place = LocationRef::Coordinates { lat: 40.7, lon: -74.0 };
        store.upsert_location(&moved).unwrap();

        assert_eq!(store.location_count().unwrap(), 1);
        assert_eq!(store.location(&moved.name).unwrap(), Some(moved));
    }

    #[test]
    fn duplicate_bookmark_is_ignored() {
        let store = Store::in_memory().unwrap();
        let first = store.insert_bookmark(&bookmark("Texas", "TX", "Austin")).unwrap();
        assert!(first.is_some());

        let second = store.insert_bookmark(&bookmark("Texas", "TX", "Austin")).unwrap();
        assert!(second.is_none());
        assert_eq!(store.bookmarks().unwrap().len(), 1);
    }

    #[test]
    fn bookmarks_are_ordered_by_region_then_locality() {
        let store = Store::in_memory().unwrap();
        store.insert_bookmark(&bookmark("Texas", "TX", "Houston")).unwrap();
        store.insert_bookmark(&bookmark("Ohio", "OH", "Columbus")).unwrap();
        store.insert_bookmark(&bookmark("Texas", "TX", "Austin")).unwrap();

        let names: Vec<_> = store
            .bookmarks()
            .unwrap()
            .into_iter()
            .map(|b| format!("{}/{}", b.region_abbreviation, b.locality_name))
            .collect();
        assert_eq!(names, ["OH/Columbus", "TX/Austin", "TX/Houston"]);
    }

    #[test]
    fn find_and_delete_bookmark() {
        let store = Store::in_memory().unwrap();
        let saved = store.insert_bookmark(&bookmark("Ohio", "OH", "Columbus")).unwrap().unwrap();

        assert_eq!(store.find_bookmark("Ohio", "Columbus").unwrap(), Some(saved.clone()));
        assert_eq!(store.bookmark(saved.id).unwrap(), Some(saved.clone()));

        assert!(store.delete_bookmark(saved.id).unwrap());
        assert!(store.find_bookmark("Ohio", "Columbus").unwrap().is_none());
    }

    #[test]
    fn reopening_a_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.sqlite3");

        Store::open(&path).unwrap().upsert_location(&nyc()).unwrap();

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.location(&nyc().name).unwrap(), Some(nyc()));
    }
}
