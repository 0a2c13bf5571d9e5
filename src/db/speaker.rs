//! Speaker profile persistence
//!
//! A speaker row points at a voice registered with the TTS service by
//! `spk_id`. `user_settings.current_speaker_id` names the one in use, and
//! `is_active` mirrors it so listings can sort the active speaker first.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use super::{DbPool, connection, is_constraint_violation, now_timestamp, parse_datetime};
use crate::{Error, Result};

/// Voices a single user may register
pub const MAX_SPEAKERS_PER_USER: usize = 3;

/// A cloned voice owned by a user
#[derive(Debug, Clone)]
pub struct Speaker {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub spk_id: String,
    pub prompt_text: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,

    /// Whether the user's settings point at this speaker
    pub is_current: bool,
}

impl Speaker {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            spk_id: row.get(3)?,
            prompt_text: row.get(4)?,
            is_active: row.get(5)?,
            created_at: parse_datetime(&row.get::<_, String>(6)?),
            is_current: row.get(7)?,
        })
    }
}

const SPEAKER_SELECT: &str = "SELECT s.id, s.user_id, s.name, s.spk_id, s.prompt_text, s.is_active, s.created_at,
        COALESCE(us.current_speaker_id = s.id, 0)
     FROM speakers s
     LEFT JOIN user_settings us ON us.user_id = s.user_id";

/// Speaker repository
#[derive(Clone)]
pub struct SpeakerRepo {
    pool: DbPool,
}

impl SpeakerRepo {
    /// Create a new speaker repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of speakers a user has
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self, user_id: i64) -> Result<usize> {
        let conn = connection(&self.pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM speakers WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Insert a speaker
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the user already has this `spk_id`
    pub fn create(
        &self,
        user_id: i64,
        name: &str,
        spk_id: &str,
        prompt_text: &str,
        is_active: bool,
    ) -> Result<i64> {
        let conn = connection(&self.pool)?;
        conn.execute(
            "INSERT INTO speakers (user_id, name, spk_id, prompt_text, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_id, name, spk_id, prompt_text, is_active, now_timestamp()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Error::Conflict(format!("speaker {spk_id} already exists"))
            } else {
                Error::Database(e.to_string())
            }
        })?;

        let id = conn.last_insert_rowid();
        tracing::info!(speaker_id = id, user_id, spk_id, "speaker saved");
        Ok(id)
    }

    /// Find a speaker only if `user_id` owns it
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_owned(&self, speaker_id: i64, user_id: i64) -> Result<Option<Speaker>> {
        let conn = connection(&self.pool)?;
        let speaker = conn
            .query_row(
                &format!("{SPEAKER_SELECT} WHERE s.id = ?1 AND s.user_id = ?2"),
                [speaker_id, user_id],
                Speaker::from_row,
            )
            .optional()?;
        Ok(speaker)
    }

    /// Speakers of a user: active first, then newest
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, user_id: i64) -> Result<Vec<Speaker>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "{SPEAKER_SELECT} WHERE s.user_id = ?1
             ORDER BY s.is_active DESC, s.created_at DESC, s.id DESC"
        ))?;

        let speakers = stmt
            .query_map([user_id], Speaker::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(speakers)
    }

    /// `spk_id` of the user's current speaker
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn current_spk_id(&self, user_id: i64) -> Result<Option<String>> {
        let conn = connection(&self.pool)?;
        let spk_id = conn
            .query_row(
                "SELECT s.spk_id FROM user_settings us
                 JOIN speakers s ON s.id = us.current_speaker_id
                 WHERE us.user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(spk_id)
    }

    /// Make a speaker current; it becomes the only active one
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user does not own the speaker
    pub fn set_current(&self, user_id: i64, speaker_id: i64) -> Result<()> {
        let mut conn = connection(&self.pool)?;
        let tx = conn.transaction()?;

        let owned: Option<i64> = tx
            .query_row(
                "SELECT id FROM speakers WHERE id = ?1 AND user_id = ?2",
                [speaker_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(Error::NotFound(format!("speaker {speaker_id}")));
        }

        tx.execute(
            "INSERT INTO user_settings (user_id, current_speaker_id) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET current_speaker_id = excluded.current_speaker_id",
            [user_id, speaker_id],
        )?;
        tx.execute(
            "UPDATE speakers SET is_active = (id = ?2) WHERE user_id = ?1",
            [user_id, speaker_id],
        )?;
        tx.commit()?;

        tracing::info!(user_id, speaker_id, "current speaker switched");
        Ok(())
    }

    /// Delete a speaker, clearing the current setting if it pointed here
    ///
    /// Returns the deleted row so the caller can release the voice.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, user_id: i64, speaker_id: i64) -> Result<Option<Speaker>> {
        let Some(speaker) = self.find_owned(speaker_id, user_id)? else {
            return Ok(None);
        };

        let mut conn = connection(&self.pool)?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE user_settings SET current_speaker_id = NULL
             WHERE user_id = ?1 AND current_speaker_id = ?2",
            [user_id, speaker_id],
        )?;
        tx.execute(
            "DELETE FROM speakers WHERE id = ?1 AND user_id = ?2",
            [speaker_id, user_id],
        )?;
        tx.commit()?;

        tracing::info!(user_id, speaker_id, spk_id = %speaker.spk_id, "speaker deleted");
        Ok(Some(speaker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{UserRepo, init_memory};

    fn setup() -> (SpeakerRepo, i64, i64) {
        let pool = init_memory().unwrap();
        let users = UserRepo::new(pool.clone());
        let alice = users.create("alice", "h").unwrap().id;
        let bob = users.create("bob", "h").unwrap().id;
        (SpeakerRepo::new(pool), alice, bob)
    }

    #[test]
    fn test_create_and_count() {
        let (repo, alice, bob) = setup();
        assert_eq!(repo.count(alice).unwrap(), 0);
        repo.create(alice, "Mum", "user_1_spk_aaaa0000", "hello", true).unwrap();
        repo.create(alice, "Dad", "user_1_spk_bbbb0000", "hello", false).unwrap();
        assert_eq!(repo.count(alice).unwrap(), 2);
        assert_eq!(repo.count(bob).unwrap(), 0);

        let dup = repo.create(alice, "Again", "user_1_spk_aaaa0000", "x", false);
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_switch_keeps_single_active() {
        let (repo, alice, _) = setup();
        let first = repo.create(alice, "A", "a", "p", false).unwrap();
        let second = repo.create(alice, "B", "b", "p", false).unwrap();
        assert_eq!(repo.current_spk_id(alice).unwrap(), None);

        repo.set_current(alice, first).unwrap();
        assert_eq!(repo.current_spk_id(alice).unwrap().as_deref(), Some("a"));

        repo.set_current(alice, second).unwrap();
        assert_eq!(repo.current_spk_id(alice).unwrap().as_deref(), Some("b"));

        let listed = repo.list(alice).unwrap();
        assert_eq!(listed[0].id, second);
        assert!(listed[0].is_active && listed[0].is_current);
        assert!(!listed[1].is_active && !listed[1].is_current);
        assert_eq!(listed.iter().filter(|s| s.is_active).count(), 1);
    }

    #[test]
    fn test_cannot_switch_to_foreign_speaker() {
        let (repo, alice, bob) = setup();
        let theirs = repo.create(bob, "B", "b", "p", false).unwrap();
        assert!(matches!(
            repo.set_current(alice, theirs),
            Err(Error::NotFound(_))
        ));
        assert!(repo.find_owned(theirs, alice).unwrap().is_none());
    }

    #[test]
    fn test_delete_clears_current() {
        let (repo, alice, _) = setup();
        let id = repo.create(alice, "A", "a", "p", true).unwrap();
        repo.set_current(alice, id).unwrap();

        let deleted = repo.delete(alice, id).unwrap().unwrap();
        assert_eq!(deleted.spk_id, "a");
        assert_eq!(repo.current_spk_id(alice).unwrap(), None);
        assert!(repo.delete(alice, id).unwrap().is_none());
    }
}
