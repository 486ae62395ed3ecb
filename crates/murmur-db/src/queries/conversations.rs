use anyhow::Result;
use rusqlite::Row;

use super::{OptionalExt, person_at};
use crate::Database;
use crate::models::{ConversationListRow, ConversationRow, MessageRow};

const CONVERSATION_COLUMNS: &str = "id, first_user_id, second_user_id, last_message, last_message_at";

/// Sorted pair key. The UNIQUE(pair_low, pair_high) constraint is what makes
/// "one conversation per unordered pair" hold under concurrent first
/// messages.
fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

impl Database {
    /// Resolve-or-create the conversation for `{sender, recipient}`, bump its
    /// last-message summary and append the message, all in one transaction.
    ///
    /// Creation is an upsert on the pair key, so two concurrent first
    /// messages between the same users both land in a single conversation;
    /// the loser of the race updates the row the winner inserted.
    pub fn append_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        sender_id: &str,
        recipient_id: &str,
        text: &str,
        sent_at: &str,
    ) -> Result<(ConversationRow, MessageRow)> {
        let (low, high) = pair_key(sender_id, recipient_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let conversation = tx.query_row(
                &format!(
                    "INSERT INTO conversations
                        (id, first_user_id, second_user_id, pair_low, pair_high, last_message, last_message_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT(pair_low, pair_high) DO UPDATE SET
                        last_message = excluded.last_message,
                        last_message_at = excluded.last_message_at
                     RETURNING {CONVERSATION_COLUMNS}"
                ),
                rusqlite::params![conversation_id, sender_id, recipient_id, low, high, text, sent_at],
                conversation_row,
            )?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, message, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                (message_id, &conversation.id, sender_id, text, sent_at),
            )?;

            tx.commit()?;

            let message = MessageRow {
                id: message_id.to_string(),
                conversation_id: conversation.id.clone(),
                sender_id: sender_id.to_string(),
                sender: None,
                message: text.to_string(),
                is_read: false,
                created_at: sent_at.to_string(),
            };
            Ok((conversation, message))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                [id],
                conversation_row,
            )
            .optional()
        })
    }

    /// Symmetric lookup: the same row is returned for (a, b) and (b, a).
    pub fn find_conversation_between(&self, a: &str, b: &str) -> Result<Option<ConversationRow>> {
        let (low, high) = pair_key(a, b);
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE pair_low = ?1 AND pair_high = ?2"
                ),
                (low, high),
                conversation_row,
            )
            .optional()
        })
    }

    /// Flip `is_read` on the unread messages of `conversation_id` that were
    /// sent by `counterpart_id`. Messages from anyone else are untouched.
    /// Returns the number of messages flipped.
    pub fn mark_messages_read(&self, conversation_id: &str, counterpart_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id = ?2 AND is_read = 0",
                (conversation_id, counterpart_id),
            )?;
            Ok(updated)
        })
    }

    /// Every conversation `user_id` takes part in, from their side: the other
    /// participant, the summary fields and `has_unread`, recomputed from the
    /// message rows on each call. Most recent activity first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, u.id, u.name, u.image, c.last_message, c.last_message_at,
                    EXISTS (
                        SELECT 1 FROM messages m
                        WHERE m.conversation_id = c.id AND m.sender_id <> ?1 AND m.is_read = 0
                    ) AS has_unread
                 FROM conversations c
                 JOIN users u ON u.id = CASE
                     WHEN c.first_user_id = ?1 THEN c.second_user_id
                     ELSE c.first_user_id
                 END
                 WHERE c.first_user_id = ?1 OR c.second_user_id = ?1
                 ORDER BY c.last_message_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationListRow {
                        id: row.get(0)?,
                        other: person_at(row, 1)?,
                        last_message: row.get(4)?,
                        last_message_at: row.get(5)?,
                        has_unread: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Number of conversations holding at least one unread message sent to
    /// `user_id`.
    pub fn count_unread_conversations(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM conversations c
                 WHERE (c.first_user_id = ?1 OR c.second_user_id = ?1)
                   AND EXISTS (
                       SELECT 1 FROM messages m
                       WHERE m.conversation_id = c.id AND m.sender_id <> ?1 AND m.is_read = 0
                   )",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }

    /// A page of messages, newest first, with the sender's public fields.
    pub fn get_messages(&self, conversation_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.message, m.is_read, m.created_at,
                        u.id, u.name, u.image
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![conversation_id, limit, offset], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        message: row.get(3)?,
                        is_read: row.get(4)?,
                        created_at: row.get(5)?,
                        sender: Some(person_at(row, 6)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?)
        })
    }

    pub fn count_conversations(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?)
        })
    }
}

fn conversation_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        first_user_id: row.get(1)?,
        second_user_id: row.get(2)?,
        last_message: row.get(3)?,
        last_message_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::{db, user};
    use uuid::Uuid;

    fn send(db: &crate::Database, from: &str, to: &str, text: &str, at: &str) -> String {
        let (conversation, _) = db
            .append_message(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                from,
                to,
                text,
                at,
            )
            .unwrap();
        conversation.id
    }

    #[test]
    fn first_message_creates_conversation_seeded_with_text() {
        let db = db();
        let u1 = user(&db, "u1");
        let u2 = user(&db, "u2");

        let (conversation, message) = db
            .append_message("c1", "m1", &u1, &u2, "hi", "2026-05-01T10:00:00.000Z")
            .unwrap();

        assert_eq!(conversation.id, "c1");
        assert_eq!(conversation.first_user_id, u1);
        assert_eq!(conversation.second_user_id, u2);
        assert_eq!(conversation.last_message, "hi");
        assert_eq!(message.sender_id, u1);
        assert!(!message.is_read);
        assert_eq!(db.count_conversations().unwrap(), 1);
        assert_eq!(db.count_messages("c1").unwrap(), 1);
    }

    #[test]
    fn reply_reuses_the_pair_and_bumps_summary() {
        let db = db();
        let u1 = user(&db, "u1");
        let u2 = user(&db, "u2");

        let first = send(&db, &u1, &u2, "hi", "2026-05-01T10:00:00.000Z");
        let second = send(&db, &u2, &u1, "hey", "2026-05-01T10:01:00.000Z");

        assert_eq!(first, second);
        assert_eq!(db.count_conversations().unwrap(), 1);

        let conversation = db.find_conversation_between(&u2, &u1).unwrap().unwrap();
        assert_eq!(conversation.last_message, "hey");
        assert_eq!(conversation.last_message_at, "2026-05-01T10:01:00.000Z");
        // the initiator is never rewritten
        assert_eq!(conversation.first_user_id, u1);
    }

    #[test]
    fn concurrent_first_messages_share_one_conversation() {
        let db = Arc::new(db());
        let a = user(&db, "a");
        let b = user(&db, "b");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                let (from, to) = if i % 2 == 0 { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
                std::thread::spawn(move || send(&db, &from, &to, "race", "2026-05-01T10:00:00.000Z"))
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(db.count_conversations().unwrap(), 1);
        assert_eq!(db.count_messages(&ids[0]).unwrap(), 8);
    }

    #[test]
    fn mark_read_only_touches_counterpart_messages() {
        let db = db();
        let me = user(&db, "me");
        let them = user(&db, "them");
        let other = user(&db, "other");

        let c = send(&db, &them, &me, "one", "2026-05-01T10:00:00.000Z");
        send(&db, &me, &them, "two", "2026-05-01T10:01:00.000Z");
        send(&db, &them, &me, "three", "2026-05-01T10:02:00.000Z");
        let unrelated = send(&db, &other, &me, "psst", "2026-05-01T10:03:00.000Z");

        assert_eq!(db.count_unread_conversations(&me).unwrap(), 2);
        assert_eq!(db.mark_messages_read(&c, &them).unwrap(), 2);
        // second call is a no-op
        assert_eq!(db.mark_messages_read(&c, &them).unwrap(), 0);

        let messages = db.get_messages(&c, 10, 0).unwrap();
        for m in &messages {
            assert_eq!(m.is_read, m.sender_id == them, "message {}", m.message);
        }

        let list = db.conversations_for_user(&me).unwrap();
        let unread: Vec<_> = list.iter().map(|c| (c.id.clone(), c.has_unread)).collect();
        assert_eq!(unread, vec![(unrelated, true), (c.clone(), false)]);

        // `them` still sees my "two" as unread on their side
        let theirs = db.conversations_for_user(&them).unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].other.id, me);
        assert!(theirs[0].has_unread);
        assert_eq!(db.count_unread_conversations(&me).unwrap(), 1);
    }

    #[test]
    fn messages_page_newest_first() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = send(&db, &a, &b, "1", "2026-05-01T10:00:00.000Z");
        send(&db, &b, &a, "2", "2026-05-01T10:01:00.000Z");
        send(&db, &a, &b, "3", "2026-05-01T10:02:00.000Z");

        let page: Vec<_> = db.get_messages(&c, 2, 0).unwrap().into_iter().map(|m| m.message).collect();
        assert_eq!(page, vec!["3", "2"]);
        let rest = db.get_messages(&c, 2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sender.as_ref().unwrap().id, a);
    }
}
