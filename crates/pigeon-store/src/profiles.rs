//! CRUD operations for the participant [`Profile`] cache.
//!
//! Profiles are a read-through cache of remote data, refreshed
//! opportunistically; a stale or missing row is never an error.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use pigeon_shared::{Profile, UserId};

use crate::database::Database;
use crate::Result;

impl Database {
    /// Insert or replace a cached profile. Idempotent.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (id, display_name, photo_url, last_seen, online)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 photo_url    = excluded.photo_url,
                 last_seen    = excluded.last_seen,
                 online       = excluded.online",
            params![
                profile.id.as_str(),
                profile.display_name,
                profile.photo_url,
                profile.last_seen.to_rfc3339(),
                profile.online,
            ],
        )?;
        Ok(())
    }

    /// Fetch a cached profile. `None` if the user was never cached.
    pub fn get_profile(&self, id: &UserId) -> Result<Option<Profile>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, display_name, photo_url, last_seen, online
                 FROM profiles WHERE id = ?1",
                params![id.as_str()],
                row_to_profile,
            )
            .optional()?;
        Ok(row)
    }
}

/// Map a `rusqlite::Row` to a [`Profile`].
fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id: String = row.get(0)?;
    let display_name: Option<String> = row.get(1)?;
    let photo_url: Option<String> = row.get(2)?;
    let last_seen_str: String = row.get(3)?;
    let online: bool = row.get(4)?;

    let last_seen: DateTime<Utc> = DateTime::parse_from_rfc3339(&last_seen_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Profile {
        id: UserId::new(id),
        display_name,
        photo_url,
        last_seen,
        online,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let mut profile = Profile {
            id: UserId::new("alice"),
            display_name: Some("Alice".into()),
            photo_url: None,
            last_seen: Utc::now(),
            online: true,
        };
        db.upsert_profile(&profile).unwrap();

        profile.online = false;
        profile.photo_url = Some("https://example.com/a.png".into());
        db.upsert_profile(&profile).unwrap();

        let stored = db.get_profile(&UserId::new("alice")).unwrap().unwrap();
        assert!(!stored.online);
        assert_eq!(stored.photo_url.as_deref(), Some("https://example.com/a.png"));
        assert!(db.get_profile(&UserId::new("nobody")).unwrap().is_none());
    }
}
