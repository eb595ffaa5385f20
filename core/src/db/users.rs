use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};

use super::{Database, is_unique_violation, now_timestamp};
use crate::auth::{generate_token, hash_password, token_digest, verify_password};
use crate::error::{Error, Result};
use crate::models::{
    NewUser, Role, UpdateUser, User, validate_email, validate_name, validate_password,
};

const USER_COLUMNS: &str = "id, username, email, role, created_at";

fn map_user_conflict(err: rusqlite::Error) -> Error {
    if is_unique_violation(&err) {
        Error::Conflict("Username or email already registered".to_string())
    } else {
        err.into()
    }
}

impl Database {
    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        let username = validate_name("Username", &user.username)?;
        let email = validate_email(&user.email)?;
        validate_password(&user.password)?;
        let password_hash = hash_password(&user.password)?;

        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO users (username, email, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![username, email, password_hash, Role::User, now],
            )
            .map_err(map_user_conflict)?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(user_id = id, %username, "user registered");
        self.get_user(id)
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("User", id))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub(crate) fn user_exists(&self, id: i64) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Partial update: only the provided fields change.
    pub fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User> {
        let current = self.get_user(id)?;
        let username = match update.username.as_deref() {
            Some(u) => validate_name("Username", u)?,
            None => current.username,
        };
        let email = match update.email.as_deref() {
            Some(e) => validate_email(e)?,
            None => current.email,
        };
        let role = update.role.unwrap_or(current.role);

        self.conn
            .execute(
                "UPDATE users SET username = ?1, email = ?2, role = ?3 WHERE id = ?4",
                params![username, email, role, id],
            )
            .map_err(map_user_conflict)?;
        tracing::info!(user_id = id, "user updated");
        self.get_user(id)
    }

    pub fn set_user_role(&self, id: i64, role: Role) -> Result<User> {
        self.update_user(
            id,
            &UpdateUser {
                role: Some(role),
                ..UpdateUser::default()
            },
        )
    }

    /// Removes the user with their sessions, reviews and collection.
    pub fn delete_user(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::not_found("User", id));
        }
        tracing::info!(user_id = id, "user deleted");
        Ok(())
    }

    /// Unknown email and wrong password fail the same way.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, stored)) = row else {
            return Err(Error::InvalidCredentials);
        };
        if !verify_password(password, &stored)? {
            tracing::warn!(user_id = id, "failed login");
            return Err(Error::InvalidCredentials);
        }
        self.get_user(id)
    }

    // --- Sessions ---

    /// Issue a bearer token for the user. Only its digest is stored.
    pub fn create_session(&self, user_id: i64, ttl: Duration) -> Result<String> {
        if !self.user_exists(user_id)? {
            return Err(Error::not_found("User", user_id));
        }
        let token = generate_token();
        let now = Utc::now();
        let expires_at = (now + ttl).to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.conn.execute(
            "INSERT INTO sessions (token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                token_digest(&token),
                user_id,
                expires_at,
                now.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ],
        )?;
        tracing::debug!(user_id, "session created");
        Ok(token)
    }

    /// The user owning an unexpired session, if any.
    pub fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT u.id, u.username, u.email, u.role, u.created_at
                 FROM sessions s JOIN users u ON s.user_id = u.id
                 WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                params![token_digest(token), now_timestamp()],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![token_digest(token)],
        )?;
        Ok(rows > 0)
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![now_timestamp()],
        )?;
        if rows > 0 {
            tracing::debug!(purged = rows, "expired sessions removed");
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: email.to_string(),
            password: "correct horse battery".to_string(),
        }
    }

    #[test]
    fn test_create_user_defaults_to_user_role() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&new_user("alice", "Alice@Example.com"))
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.email, "alice@example.com");
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("alice", "alice@example.com"))
            .unwrap();
        let err = db
            .create_user(&new_user("alice2", "ALICE@example.com"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_short_password_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .create_user(&NewUser {
                password: "short".to_string(),
                ..new_user("bob", "bob@example.com")
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_authenticate() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_support::user(&db, "alice");

        let ok = db
            .authenticate("ALICE@example.com", "correct horse battery")
            .unwrap();
        assert_eq!(ok.id, alice.id);

        assert!(matches!(
            db.authenticate("alice@example.com", "nope").unwrap_err(),
            Error::InvalidCredentials
        ));
        assert!(matches!(
            db.authenticate("ghost@example.com", "correct horse battery")
                .unwrap_err(),
            Error::InvalidCredentials
        ));
    }

    #[test]
    fn test_session_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_support::user(&db, "alice");
        let token = db.create_session(alice.id, Duration::hours(2)).unwrap();

        let found = db.user_for_token(&token).unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert!(db.user_for_token("bogus").unwrap().is_none());

        assert!(db.delete_session(&token).unwrap());
        assert!(db.user_for_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_does_not_authenticate() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_support::user(&db, "alice");
        let token = db.create_session(alice.id, Duration::seconds(-1)).unwrap();
        assert!(db.user_for_token(&token).unwrap().is_none());
        assert_eq!(db.purge_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn test_update_and_promote() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_support::user(&db, "alice");
        let updated = db
            .update_user(
                alice.id,
                &UpdateUser {
                    username: Some("alice_b".to_string()),
                    ..UpdateUser::default()
                },
            )
            .unwrap();
        assert_eq!(updated.username, "alice_b");
        assert_eq!(updated.email, "alice@example.com");

        let admin = db.set_user_role(alice.id, Role::Admin).unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.actor().is_admin());
    }

    #[test]
    fn test_delete_user_cascades_sessions() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_support::user(&db, "alice");
        let token = db.create_session(alice.id, Duration::hours(1)).unwrap();
        db.delete_user(alice.id).unwrap();
        assert!(db.user_for_token(&token).unwrap().is_none());
        assert!(matches!(
            db.delete_user(alice.id).unwrap_err(),
            Error::NotFound { .. }
        ));
    }
}
