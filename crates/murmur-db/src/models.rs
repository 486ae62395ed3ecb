//! Database row types. These map directly to SQLite rows and are distinct
//! from the murmur-types API models to keep the DB layer independent.
//! Ids and timestamps stay as the TEXT the columns hold.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<String>,
    pub role: String,
    pub is_verified: bool,
    pub created_at: String,
}

/// Unique account field already held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakenField {
    Email,
    Name,
}

/// Public fields of another user (id, name, avatar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRow {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorRow {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub role: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub author: AuthorRow,
    pub content: String,
    pub images: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author: AuthorRow,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct StoryRow {
    pub id: String,
    pub author: PersonRow,
    pub image: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct StoryFeedRow {
    pub user: PersonRow,
    /// Every active story of `user` has been viewed by the requesting user
    pub all_viewed: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub first_user_id: String,
    pub second_user_id: String,
    pub last_message: String,
    pub last_message_at: String,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.first_user_id == user_id || self.second_user_id == user_id
    }

    /// The participant that is not `user_id`.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.first_user_id == user_id {
            Some(&self.second_user_id)
        } else if self.second_user_id == user_id {
            Some(&self.first_user_id)
        } else {
            None
        }
    }
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone)]
pub struct ConversationListRow {
    pub id: String,
    pub other: PersonRow,
    pub last_message: String,
    pub last_message_at: String,
    pub has_unread: bool,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender: Option<PersonRow>,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub kind: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender: Option<PersonRow>,
    pub message: Option<String>,
    pub redirect_to: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}
