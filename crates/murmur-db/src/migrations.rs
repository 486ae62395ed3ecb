use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            name         TEXT NOT NULL UNIQUE,
            password     TEXT NOT NULL,
            image        TEXT,
            bio          TEXT,
            gender       TEXT,
            role         TEXT NOT NULL DEFAULT 'user',
            is_verified  INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS follows (
            id            TEXT PRIMARY KEY,
            follower_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            following_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(follower_id, following_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_following
            ON follows(following_id);

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            images      TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_author
            ON posts(author_id, created_at);

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id  TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS post_saves (
            post_id  TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS post_tags (
            post_id  TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_comments_post
            ON comments(post_id);

        CREATE TABLE IF NOT EXISTS comment_likes (
            comment_id  TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (comment_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS stories (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            image       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_stories_author
            ON stories(author_id, created_at);

        CREATE TABLE IF NOT EXISTS story_views (
            story_id  TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            user_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (story_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS story_likes (
            story_id  TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            user_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (story_id, user_id)
        );

        -- One row per unordered pair: pair_low/pair_high hold the two ids
        -- sorted, first/second keep who started the conversation.
        CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            first_user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            second_user_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            pair_low         TEXT NOT NULL,
            pair_high        TEXT NOT NULL,
            last_message     TEXT NOT NULL,
            last_message_at  TEXT NOT NULL,
            created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (first_user_id <> second_user_id),
            CHECK (pair_low < pair_high),
            UNIQUE(pair_low, pair_high)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message          TEXT NOT NULL,
            is_read          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(conversation_id, sender_id, is_read);

        CREATE TABLE IF NOT EXISTS notifications (
            id           TEXT PRIMARY KEY,
            kind         TEXT NOT NULL,
            sender_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message      TEXT,
            redirect_to  TEXT,
            is_read      INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_receiver
            ON notifications(receiver_id, is_read, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
