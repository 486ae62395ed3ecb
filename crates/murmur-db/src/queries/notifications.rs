use anyhow::Result;
use rusqlite::Row;

use super::person_at;
use crate::Database;
use crate::models::NotificationRow;

const NOTIFICATION_SELECT: &str = "SELECT n.id, n.kind, n.sender_id, n.receiver_id, n.message,
        n.redirect_to, n.is_read, n.created_at, u.id, u.name, u.image
     FROM notifications n
     JOIN users u ON u.id = n.sender_id";

impl Database {
    /// Insert a notification and read it back with its sender, so the caller
    /// can push exactly what was stored.
    pub fn insert_notification(
        &self,
        id: &str,
        kind: &str,
        sender_id: &str,
        receiver_id: &str,
        message: Option<&str>,
        redirect_to: Option<&str>,
        created_at: &str,
    ) -> Result<NotificationRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO notifications (id, kind, sender_id, receiver_id, message, redirect_to, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![id, kind, sender_id, receiver_id, message, redirect_to, created_at],
            )?;
            let row = tx.query_row(
                &format!("{NOTIFICATION_SELECT} WHERE n.id = ?1"),
                [id],
                notification_row,
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Newest first.
    pub fn notifications_for(&self, receiver_id: &str, limit: u32, offset: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{NOTIFICATION_SELECT}
                 WHERE n.receiver_id = ?1
                 ORDER BY n.created_at DESC, n.rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![receiver_id, limit, offset], notification_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_notifications(&self, receiver_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE receiver_id = ?1",
                [receiver_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn count_unread_notifications(&self, receiver_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE receiver_id = ?1 AND is_read = 0",
                [receiver_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Returns the number of notifications flipped to read.
    pub fn mark_notifications_read(&self, receiver_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE receiver_id = ?1 AND is_read = 0",
                [receiver_id],
            )?)
        })
    }
}

fn notification_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        message: row.get(4)?,
        redirect_to: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
        sender: Some(person_at(row, 8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};

    #[test]
    fn insert_returns_the_stored_record() {
        let db = db();
        let from = user(&db, "from");
        let to = user(&db, "to");

        let row = db
            .insert_notification("n1", "like", &from, &to, Some("from liked your post"), Some("/?post=p1"), "2026-05-01T10:00:00.000Z")
            .unwrap();
        assert_eq!(row.id, "n1");
        assert_eq!(row.kind, "like");
        assert!(!row.is_read);
        assert_eq!(row.sender.unwrap().name, "from");
        assert_eq!(row.created_at, "2026-05-01T10:00:00.000Z");
    }

    #[test]
    fn self_notifications_are_rejected_by_the_schema() {
        let db = db();
        let me = user(&db, "me");
        assert!(db.insert_notification("n1", "like", &me, &me, None, None, "2026-05-01T10:00:00.000Z").is_err());
        assert_eq!(db.count_notifications(&me).unwrap(), 0);
    }

    #[test]
    fn mark_read_is_scoped_to_receiver() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        db.insert_notification("n1", "follow", &a, &b, None, None, "2026-05-01T10:00:00.000Z").unwrap();
        db.insert_notification("n2", "comment", &a, &b, None, None, "2026-05-01T10:01:00.000Z").unwrap();
        db.insert_notification("n3", "follow", &b, &a, None, None, "2026-05-01T10:02:00.000Z").unwrap();

        assert_eq!(db.count_unread_notifications(&b).unwrap(), 2);
        assert_eq!(db.mark_notifications_read(&b).unwrap(), 2);
        assert_eq!(db.count_unread_notifications(&b).unwrap(), 0);
        assert_eq!(db.count_unread_notifications(&a).unwrap(), 1);

        let listed: Vec<_> = db.notifications_for(&b, 10, 0).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(listed, vec!["n2", "n1"]);
    }
}
