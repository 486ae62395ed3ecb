use anyhow::Result;
use rusqlite::Connection;

use super::{OptionalExt, person_at};
use crate::Database;
use crate::models::{PersonRow, TakenField, UserRow};

const USER_COLUMNS: &str =
    "id, email, name, password, image, bio, gender, role, is_verified, created_at";

impl Database {
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        bio: Option<&str>,
        gender: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password, bio, gender) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, email, name, password_hash, bio, gender),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Which of `email` / `name` already belongs to an account other than
    /// `owner_id`. Email is reported first.
    pub fn registered_field(
        &self,
        email: &str,
        name: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<TakenField>> {
        self.with_conn(|conn| {
            let (email_taken, name_taken): (bool, bool) = conn.query_row(
                "SELECT
                    EXISTS(SELECT 1 FROM users WHERE email = ?1 AND id IS NOT ?3),
                    EXISTS(SELECT 1 FROM users WHERE name = ?2 AND id IS NOT ?3)",
                (email, name, owner_id),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(if email_taken {
                Some(TakenField::Email)
            } else if name_taken {
                Some(TakenField::Name)
            } else {
                None
            })
        })
    }

    /// Overwrite the editable profile fields. `image` of `None` keeps the
    /// current avatar.
    pub fn update_profile(
        &self,
        id: &str,
        name: &str,
        email: &str,
        image: Option<&str>,
        bio: Option<&str>,
        gender: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET name = ?2, email = ?3, image = COALESCE(?4, image), bio = ?5, gender = ?6
                 WHERE id = ?1",
                rusqlite::params![id, name, email, image, bio, gender],
            )?;
            Ok(())
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                (id, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Case-insensitive substring match on the display name, excluding the
    /// caller, alphabetical.
    pub fn search_users(&self, needle: &str, exclude_id: &str, limit: u32) -> Result<Vec<PersonRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, image FROM users
                 WHERE id <> ?1 AND instr(lower(name), lower(?2)) > 0
                 ORDER BY name ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![exclude_id, needle, limit], |row| person_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_posts_by(&self, author_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
                [author_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                password: row.get(3)?,
                image: row.get(4)?,
                bio: row.get(5)?,
                gender: row.get(6)?,
                role: row.get(7)?,
                is_verified: row.get(8)?,
                created_at: row.get(9)?,
            })
        })
        .optional()?;

    Ok(row)
}
