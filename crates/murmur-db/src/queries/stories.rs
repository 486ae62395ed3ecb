use anyhow::Result;
use rusqlite::Row;

use super::{OptionalExt, person_at, relation_pairs, toggle_relation};
use crate::Database;
use crate::models::{PersonRow, StoryFeedRow, StoryRow};

const STORY_SELECT: &str = "SELECT s.id, s.image, s.created_at, u.id, u.name, u.image
     FROM stories s
     JOIN users u ON u.id = s.author_id";

// Every query below takes `cutoff`: stories with created_at > cutoff are
// active, the rest are archived. The cutoff is computed by the caller from
// its own clock so the window is a pure function of (created_at, now).

impl Database {
    pub fn add_story(&self, id: &str, author_id: &str, image: &str, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stories (id, author_id, image, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, author_id, image, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_story(&self, id: &str) -> Result<Option<StoryRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{STORY_SELECT} WHERE s.id = ?1"), [id], story_row)
                .optional()
        })
    }

    pub fn delete_story(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM stories WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// An author's active stories, oldest first (playback order).
    pub fn active_stories_by(&self, author_id: &str, cutoff: &str) -> Result<Vec<StoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{STORY_SELECT} WHERE s.author_id = ?1 AND s.created_at > ?2 ORDER BY s.created_at ASC"
            ))?;
            let rows = stmt
                .query_map((author_id, cutoff), story_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// An author's archived stories, newest first.
    pub fn archived_stories_by(&self, author_id: &str, cutoff: &str) -> Result<Vec<StoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{STORY_SELECT} WHERE s.author_id = ?1 AND s.created_at <= ?2 ORDER BY s.created_at DESC"
            ))?;
            let rows = stmt
                .query_map((author_id, cutoff), story_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn has_active_story(&self, author_id: &str, cutoff: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM stories WHERE author_id = ?1 AND created_at > ?2)",
                (author_id, cutoff),
                |row| row.get(0),
            )?)
        })
    }

    /// Users followed by `viewer_id` that have at least one active story.
    /// Users whose active stories were all viewed sort last.
    pub fn story_feed(&self, viewer_id: &str, cutoff: &str) -> Result<Vec<StoryFeedRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.image,
                    NOT EXISTS (
                        SELECT 1 FROM stories s
                        WHERE s.author_id = u.id AND s.created_at > ?2
                          AND NOT EXISTS (
                              SELECT 1 FROM story_views v
                              WHERE v.story_id = s.id AND v.user_id = ?1
                          )
                    ) AS all_viewed
                 FROM users u
                 JOIN follows f ON f.following_id = u.id AND f.follower_id = ?1
                 WHERE EXISTS (
                     SELECT 1 FROM stories s WHERE s.author_id = u.id AND s.created_at > ?2
                 )
                 ORDER BY all_viewed ASC, u.created_at DESC",
            )?;
            let rows = stmt
                .query_map((viewer_id, cutoff), |row| {
                    Ok(StoryFeedRow {
                        user: person_at(row, 0)?,
                        all_viewed: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Idempotent.
    pub fn view_story(&self, story_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO story_views (story_id, user_id) VALUES (?1, ?2)",
                (story_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn story_viewers(&self, story_id: &str) -> Result<Vec<PersonRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.image FROM story_views v
                 JOIN users u ON u.id = v.user_id
                 WHERE v.story_id = ?1",
            )?;
            let rows = stmt
                .query_map([story_id], |row| person_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// `(story_id, user_id)` for every view of the given stories.
    pub fn story_views(&self, story_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            relation_pairs(conn, "SELECT story_id, user_id FROM story_views WHERE story_id IN ", story_ids)
        })
    }

    /// `(story_id, user_id)` for every like on the given stories.
    pub fn story_likes(&self, story_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            relation_pairs(conn, "SELECT story_id, user_id FROM story_likes WHERE story_id IN ", story_ids)
        })
    }

    /// Returns `true` when the story is liked by `user_id` afterwards.
    pub fn toggle_story_like(&self, story_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| toggle_relation(conn, "story_likes", "story_id", story_id, user_id))
    }
}

fn story_row(row: &Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        image: row.get(1)?,
        created_at: row.get(2)?,
        author: person_at(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};
    use uuid::Uuid;

    const CUTOFF: &str = "2026-05-01T12:00:00.000Z";

    #[test]
    fn cutoff_splits_active_and_archived() {
        let db = db();
        let author = user(&db, "author");
        db.add_story("at-cutoff", &author, "/media/1.png", CUTOFF).unwrap();
        db.add_story("after", &author, "/media/2.png", "2026-05-01T12:00:00.001Z").unwrap();
        db.add_story("before", &author, "/media/3.png", "2026-04-30T09:00:00.000Z").unwrap();

        let active: Vec<_> = db.active_stories_by(&author, CUTOFF).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["after"]);
        let archived: Vec<_> = db.archived_stories_by(&author, CUTOFF).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(archived, vec!["at-cutoff", "before"]);
        assert!(db.has_active_story(&author, CUTOFF).unwrap());
    }

    #[test]
    fn feed_lists_followed_authors_unviewed_first() {
        let db = db();
        let viewer = user(&db, "viewer");
        let seen = user(&db, "seen");
        let fresh = user(&db, "fresh");
        let stranger = user(&db, "stranger");
        for author in [&seen, &fresh] {
            db.toggle_follow(&Uuid::new_v4().to_string(), &viewer, author).unwrap();
        }
        db.add_story("s1", &seen, "/media/1.png", "2026-05-01T13:00:00.000Z").unwrap();
        db.add_story("s2", &fresh, "/media/2.png", "2026-05-01T13:00:00.000Z").unwrap();
        db.add_story("s3", &stranger, "/media/3.png", "2026-05-01T13:00:00.000Z").unwrap();
        db.view_story("s1", &viewer).unwrap();
        db.view_story("s1", &viewer).unwrap();

        let feed = db.story_feed(&viewer, CUTOFF).unwrap();
        let order: Vec<_> = feed.iter().map(|e| (e.user.id.clone(), e.all_viewed)).collect();
        assert_eq!(order, vec![(fresh, false), (seen, true)]);
        assert_eq!(db.story_viewers("s1").unwrap().len(), 1);
    }
}
