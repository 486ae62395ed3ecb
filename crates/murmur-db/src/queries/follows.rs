use anyhow::Result;

use super::person_at;
use crate::Database;
use crate::models::PersonRow;

impl Database {
    /// Toggle the follow edge `follower -> following`. Returns `true` when the
    /// edge exists afterwards. The UNIQUE(follower_id, following_id)
    /// constraint keeps at most one edge per ordered pair.
    pub fn toggle_follow(&self, id: &str, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                (follower_id, following_id),
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO follows (id, follower_id, following_id) VALUES (?1, ?2, ?3)",
                    (id, follower_id, following_id),
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    pub fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2)",
                (follower_id, following_id),
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// (followers, following) counts for a user.
    pub fn follow_counts(&self, user_id: &str) -> Result<(i64, i64)> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1)",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(counts)
        })
    }

    /// Users following `user_id`, optionally narrowed by a name substring.
    pub fn followers_of(&self, user_id: &str, name_filter: Option<&str>) -> Result<Vec<PersonRow>> {
        self.follow_list(
            "SELECT u.id, u.name, u.image FROM follows f
             JOIN users u ON u.id = f.follower_id
             WHERE f.following_id = ?1
               AND (?2 IS NULL OR instr(lower(u.name), lower(?2)) > 0)
             ORDER BY f.created_at DESC",
            user_id,
            name_filter,
        )
    }

    /// Users that `user_id` follows, optionally narrowed by a name substring.
    pub fn following_of(&self, user_id: &str, name_filter: Option<&str>) -> Result<Vec<PersonRow>> {
        self.follow_list(
            "SELECT u.id, u.name, u.image FROM follows f
             JOIN users u ON u.id = f.following_id
             WHERE f.follower_id = ?1
               AND (?2 IS NULL OR instr(lower(u.name), lower(?2)) > 0)
             ORDER BY f.created_at DESC",
            user_id,
            name_filter,
        )
    }

    fn follow_list(&self, sql: &str, user_id: &str, name_filter: Option<&str>) -> Result<Vec<PersonRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map((user_id, name_filter), |row| person_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};
    use uuid::Uuid;

    #[test]
    fn toggling_twice_leaves_no_edge() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");

        assert!(db.toggle_follow(&Uuid::new_v4().to_string(), &a, &b).unwrap());
        assert!(db.is_following(&a, &b).unwrap());
        assert!(!db.is_following(&b, &a).unwrap());
        assert_eq!(db.follow_counts(&b).unwrap(), (1, 0));

        assert!(!db.toggle_follow(&Uuid::new_v4().to_string(), &a, &b).unwrap());
        assert!(!db.is_following(&a, &b).unwrap());
        assert_eq!(db.follow_counts(&b).unwrap(), (0, 0));
    }

    #[test]
    fn follower_lists_filter_by_name() {
        let db = db();
        let star = user(&db, "star");
        let fan1 = user(&db, "Fanny");
        let fan2 = user(&db, "bob");
        db.toggle_follow(&Uuid::new_v4().to_string(), &fan1, &star).unwrap();
        db.toggle_follow(&Uuid::new_v4().to_string(), &fan2, &star).unwrap();

        assert_eq!(db.followers_of(&star, None).unwrap().len(), 2);
        let filtered = db.followers_of(&star, Some("fan")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, fan1);
        assert_eq!(db.following_of(&fan2, None).unwrap()[0].id, star);
    }
}
