use anyhow::Result;
use rusqlite::Row;

use super::{OptionalExt, author_at, likers, relation_pairs, toggle_relation};
use crate::Database;
use crate::models::{CommentRow, PersonRow};

const COMMENT_SELECT: &str = "SELECT c.id, c.post_id, c.content, c.created_at,
        u.id, u.name, u.image, u.role, u.is_verified
     FROM comments c
     JOIN users u ON u.id = c.author_id";

impl Database {
    pub fn add_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, post_id, author_id, content, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{COMMENT_SELECT} WHERE c.id = ?1"), [id], comment_row)
                .optional()
        })
    }

    /// Most liked first, then newest.
    pub fn comments_for_post(&self, post_id: &str, limit: u32, offset: u32) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{COMMENT_SELECT}
                 WHERE c.post_id = ?1
                 ORDER BY (SELECT COUNT(*) FROM comment_likes l WHERE l.comment_id = c.id) DESC,
                          c.created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![post_id, limit, offset], comment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_comments(&self, post_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn update_comment(&self, id: &str, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE comments SET content = ?2 WHERE id = ?1", (id, content))?;
            Ok(())
        })
    }

    pub fn delete_comment(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Returns `true` when the comment is liked by `user_id` afterwards.
    /// Users who liked the comment, as seen by `viewer_id`.
    pub fn comment_likers(&self, comment_id: &str, viewer_id: &str) -> Result<Vec<PersonRow>> {
        self.with_conn(|conn| likers(conn, "comment_likes", "comment_id", comment_id, viewer_id))
    }

    pub fn toggle_comment_like(&self, comment_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            toggle_relation(conn, "comment_likes", "comment_id", comment_id, user_id)
        })
    }

    /// `(comment_id, user_id)` for every like on the given comments.
    pub fn comment_likes(&self, comment_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            relation_pairs(
                conn,
                "SELECT comment_id, user_id FROM comment_likes WHERE comment_id IN ",
                comment_ids,
            )
        })
    }
}

fn comment_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        author: author_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};

    #[test]
    fn most_liked_comment_sorts_first() {
        let db = db();
        let author = user(&db, "author");
        let fan = user(&db, "fan");
        db.create_post("p1", &author, "x", &[], &[], "2026-05-01T10:00:00.000Z").unwrap();
        db.add_comment("c-old", "p1", &fan, "first", "2026-05-01T11:00:00.000Z").unwrap();
        db.add_comment("c-new", "p1", &fan, "second", "2026-05-01T12:00:00.000Z").unwrap();

        let ids: Vec<_> = db.comments_for_post("p1", 10, 0).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c-new", "c-old"]);

        assert!(db.toggle_comment_like("c-old", &author).unwrap());
        let ids: Vec<_> = db.comments_for_post("p1", 10, 0).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c-old", "c-new"]);
        assert_eq!(db.count_comments("p1").unwrap(), 2);
    }

    #[test]
    fn deleting_a_post_removes_its_comments() {
        let db = db();
        let author = user(&db, "author");
        db.create_post("p1", &author, "x", &[], &[], "2026-05-01T10:00:00.000Z").unwrap();
        db.add_comment("c1", "p1", &author, "mine", "2026-05-01T11:00:00.000Z").unwrap();

        db.delete_post("p1").unwrap();
        assert!(db.get_comment("c1").unwrap().is_none());
    }

    #[test]
    fn comment_likers_put_viewer_first() {
        let db = db();
        let author = user(&db, "author");
        let viewer = user(&db, "zed");
        db.create_post("p1", &author, "x", &[], &[], "2026-05-01T10:00:00.000Z").unwrap();
        db.add_comment("c1", "p1", &author, "hi", "2026-05-01T11:00:00.000Z").unwrap();
        db.toggle_comment_like("c1", &author).unwrap();
        db.toggle_comment_like("c1", &viewer).unwrap();

        let ids: Vec<_> = db.comment_likers("c1", &viewer).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![viewer, author.clone()]);
        assert!(db.comment_likers("missing", &author).unwrap().is_empty());
    }
}
