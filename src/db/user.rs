//! User repository for account CRUD

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use super::{DbPool, connection, is_constraint_violation, now_timestamp, parse_datetime};
use crate::{Error, Result};

/// A registered account
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,

    /// Stored password hash
    pub password: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            created_at: parse_datetime(&row.get::<_, String>(3)?),
        })
    }
}

const USER_COLUMNS: &str = "id, username, password, created_at";

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an account
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the username is taken
    pub fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        let conn = connection(&self.pool)?;
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
            [username, password_hash, now.as_str()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Error::Conflict("username already exists".to_string())
            } else {
                Error::Database(e.to_string())
            }
        })?;

        let id = conn.last_insert_rowid();
        tracing::info!(user_id = id, username, "user registered");

        Ok(User {
            id,
            username: username.to_string(),
            password: password_hash.to_string(),
            created_at: parse_datetime(&now),
        })
    }

    /// Find a user by name
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = connection(&self.pool)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Find a user by ID (returns None if not found)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: i64) -> Result<Option<User>> {
        let conn = connection(&self.pool)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Rename a user
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the new name is taken, `Error::NotFound`
    /// if the user does not exist
    pub fn update_username(&self, id: i64, username: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        let changed = conn
            .execute(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                rusqlite::params![username, id],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::Conflict("username already exists".to_string())
                } else {
                    Error::Database(e.to_string())
                }
            })?;

        if changed == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    /// Replace a user's password hash
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user does not exist
    pub fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        let changed = conn.execute(
            "UPDATE users SET password = ?1 WHERE id = ?2",
            rusqlite::params![password_hash, id],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    /// Delete a user and everything they own
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = connection(&self.pool)?;
        Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> UserRepo {
        let pool = init_memory().unwrap();
        UserRepo::new(pool)
    }

    #[test]
    fn test_create_and_find() {
        let repo = setup();
        let user = repo.create("alice", "hash").unwrap();
        assert!(user.id > 0);

        let found = repo.find_by_username("alice").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.password, "hash");
        assert!(repo.find(user.id).unwrap().is_some());
        assert!(repo.find_by_username("bob").unwrap().is_none());
        assert!(repo.find(9999).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let repo = setup();
        repo.create("alice", "hash").unwrap();
        let err = repo.create("alice", "other").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_update_username() {
        let repo = setup();
        let alice = repo.create("alice", "h").unwrap();
        repo.create("bob", "h").unwrap();

        assert!(matches!(
            repo.update_username(alice.id, "bob"),
            Err(Error::Conflict(_))
        ));
        repo.update_username(alice.id, "alicia").unwrap();
        assert_eq!(repo.find(alice.id).unwrap().unwrap().username, "alicia");
        assert!(matches!(
            repo.update_username(424_242, "ghost"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_update_password() {
        let repo = setup();
        let alice = repo.create("alice", "old").unwrap();
        repo.update_password(alice.id, "new").unwrap();
        assert_eq!(repo.find(alice.id).unwrap().unwrap().password, "new");
    }

    #[test]
    fn test_delete() {
        let repo = setup();
        let alice = repo.create("alice", "h").unwrap();
        assert!(repo.delete(alice.id).unwrap());
        assert!(!repo.delete(alice.id).unwrap());
        assert!(repo.find(alice.id).unwrap().is_none());
    }
}
