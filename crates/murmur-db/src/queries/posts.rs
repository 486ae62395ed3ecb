use anyhow::Result;
use rusqlite::{Connection, Row, types::Type};

use super::{OptionalExt, author_at, likers, person_at, relation_pairs, toggle_relation};
use crate::Database;
use crate::models::{PersonRow, PostRow};

const POST_SELECT: &str = "SELECT p.id, p.content, p.images, p.created_at,
        u.id, u.name, u.image, u.role, u.is_verified
     FROM posts p
     JOIN users u ON u.id = p.author_id";

impl Database {
    /// Insert a post and its tags. Tag ids that match no user are skipped;
    /// returns the ids that were actually tagged.
    pub fn create_post(
        &self,
        id: &str,
        author_id: &str,
        content: &str,
        images: &[String],
        tags: &[String],
        created_at: &str,
    ) -> Result<Vec<String>> {
        let images = serde_json::to_string(images)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO posts (id, author_id, content, images, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, author_id, content, &images, created_at),
            )?;
            let tagged = insert_tags(&tx, id, tags)?;
            tx.commit()?;
            Ok(tagged)
        })
    }

    /// Replace content and the tag set. Returns the ids tagged for the first
    /// time by this edit.
    pub fn update_post(&self, id: &str, content: &str, tags: &[String]) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("UPDATE posts SET content = ?2 WHERE id = ?1", (id, content))?;

            let previous: Vec<String> = {
                let mut stmt = tx.prepare("SELECT user_id FROM post_tags WHERE post_id = ?1")?;
                stmt.query_map([id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM post_tags WHERE post_id = ?1", [id])?;
            let tagged = insert_tags(&tx, id, tags)?;
            tx.commit()?;

            Ok(tagged.into_iter().filter(|t| !previous.contains(t)).collect())
        })
    }

    pub fn delete_post(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{POST_SELECT} WHERE p.id = ?1"), [id], post_row)
                .optional()
        })
    }

    /// Newest first.
    pub fn list_posts(&self, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!("{POST_SELECT} ORDER BY p.created_at DESC LIMIT ?1 OFFSET ?2"),
                rusqlite::params![limit, offset],
            )
        })
    }

    /// Most-liked posts across all authors, ties broken newest first.
    pub fn popular_posts(&self, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT}
                     ORDER BY (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) DESC,
                              p.created_at DESC
                     LIMIT ?1"
                ),
                [limit],
            )
        })
    }

    pub fn count_posts(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?)
        })
    }

    pub fn posts_by_author(&self, author_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!("{POST_SELECT} WHERE p.author_id = ?1 ORDER BY p.created_at DESC"),
                [author_id],
            )
        })
    }

    pub fn posts_tagging(&self, user_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT} JOIN post_tags t ON t.post_id = p.id
                     WHERE t.user_id = ?1 ORDER BY p.created_at DESC"
                ),
                [user_id],
            )
        })
    }

    pub fn posts_saved_by(&self, user_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT} JOIN post_saves s ON s.post_id = p.id
                     WHERE s.user_id = ?1 ORDER BY p.created_at DESC"
                ),
                [user_id],
            )
        })
    }

    /// Returns `true` when the post is liked by `user_id` afterwards.
    pub fn toggle_post_like(&self, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| toggle_relation(conn, "post_likes", "post_id", post_id, user_id))
    }

    /// Returns `true` when the post is saved by `user_id` afterwards.
    pub fn toggle_post_save(&self, post_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| toggle_relation(conn, "post_saves", "post_id", post_id, user_id))
    }

    /// `(post_id, user_id)` for every like on the given posts.
    pub fn post_likes(&self, post_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            relation_pairs(conn, "SELECT post_id, user_id FROM post_likes WHERE post_id IN ", post_ids)
        })
    }

    /// Users who liked the post, as seen by `viewer_id`.
    pub fn post_likers(&self, post_id: &str, viewer_id: &str) -> Result<Vec<PersonRow>> {
        self.with_conn(|conn| likers(conn, "post_likes", "post_id", post_id, viewer_id))
    }

    /// `(post_id, user_id)` for every save on the given posts.
    pub fn post_saves(&self, post_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            relation_pairs(conn, "SELECT post_id, user_id FROM post_saves WHERE post_id IN ", post_ids)
        })
    }

    /// `(post_id, tagged user)` for the given posts.
    pub fn post_tags(&self, post_ids: &[String]) -> Result<Vec<(String, PersonRow)>> {
        if post_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=post_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT t.post_id, u.id, u.name, u.image FROM post_tags t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.post_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = post_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, person_at(row, 1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn insert_tags(conn: &Connection, post_id: &str, tags: &[String]) -> Result<Vec<String>> {
    let mut tagged = Vec::with_capacity(tags.len());
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO post_tags (post_id, user_id)
         SELECT ?1, id FROM users WHERE id = ?2",
    )?;
    for tag in tags {
        if stmt.execute((post_id, tag))? > 0 {
            tagged.push(tag.clone());
        }
    }
    Ok(tagged)
}

fn query_posts<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<PostRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, post_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    let images: String = row.get(2)?;
    let images = serde_json::from_str(&images)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(PostRow {
        id: row.get(0)?,
        content: row.get(1)?,
        images,
        created_at: row.get(3)?,
        author: author_at(row, 4)?,
    })
}
