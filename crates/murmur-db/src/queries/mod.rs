mod comments;
mod conversations;
mod follows;
mod notifications;
mod posts;
mod stories;
mod users;

use anyhow::Result;
use rusqlite::{Connection, Row};

use crate::models::{AuthorRow, PersonRow};

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Batch-fetch `(owner_id, user_id)` pairs from a relation table for a set of
/// owner ids. `sql` must end in `IN ` and select exactly two TEXT columns.
pub(crate) fn relation_pairs(
    conn: &Connection,
    sql: &str,
    owner_ids: &[String],
) -> Result<Vec<(String, String)>> {
    if owner_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=owner_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!("{}({})", sql, placeholders.join(", "));

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = owner_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Reads `id, name, image` starting at column `at`.
pub(crate) fn person_at(row: &Row<'_>, at: usize) -> rusqlite::Result<PersonRow> {
    Ok(PersonRow {
        id: row.get(at)?,
        name: row.get(at + 1)?,
        image: row.get(at + 2)?,
    })
}

/// Reads `id, name, image, role, is_verified` starting at column `at`.
pub(crate) fn author_at(row: &Row<'_>, at: usize) -> rusqlite::Result<AuthorRow> {
    Ok(AuthorRow {
        id: row.get(at)?,
        name: row.get(at + 1)?,
        image: row.get(at + 2)?,
        role: row.get(at + 3)?,
        is_verified: row.get(at + 4)?,
    })
}

/// Users in a like table for one target: the viewer first, then people the
/// viewer follows, then everyone else.
pub(crate) fn likers(
    conn: &Connection,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    viewer_id: &str,
) -> Result<Vec<PersonRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT u.id, u.name, u.image FROM {table} l
         JOIN users u ON u.id = l.user_id
         WHERE l.{owner_column} = ?1
         ORDER BY CASE
             WHEN u.id = ?2 THEN 0
             WHEN EXISTS (SELECT 1 FROM follows f WHERE f.follower_id = ?2 AND f.following_id = u.id) THEN 1
             ELSE 2
         END, u.name ASC"
    ))?;
    let rows = stmt
        .query_map((owner_id, viewer_id), |row| person_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flip a membership row in a two-column relation table. Returns `true` when
/// the row now exists.
pub(crate) fn toggle_relation(
    conn: &mut Connection,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    user_id: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;
    let removed = tx.execute(
        &format!("DELETE FROM {table} WHERE {owner_column} = ?1 AND user_id = ?2"),
        (owner_id, user_id),
    )?;
    if removed == 0 {
        tx.execute(
            &format!("INSERT INTO {table} ({owner_column}, user_id) VALUES (?1, ?2)"),
            (owner_id, user_id),
        )?;
    }
    tx.commit()?;
    Ok(removed == 0)
}
