//! Row -> wire conversions. Stored ids and timestamps are text; a corrupt
//! value is logged and replaced with a default rather than failing the
//! whole response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::{AuthorRow, MessageRow, NotificationRow, PersonRow};
use murmur_types::api::MessageResponse;
use murmur_types::models::{AuthorSummary, Notification, NotificationKind, UserSummary};

pub(crate) fn id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn time(raw: &str, what: &str) -> DateTime<Utc> {
    murmur_db::parse_timestamp(raw).unwrap_or_else(|e| {
        warn!("Corrupt {} timestamp '{}': {}", what, raw, e);
        DateTime::default()
    })
}

pub(crate) fn person(row: PersonRow) -> UserSummary {
    UserSummary {
        id: id(&row.id, "user"),
        name: row.name,
        image: row.image,
    }
}

pub(crate) fn author(row: AuthorRow) -> AuthorSummary {
    AuthorSummary {
        id: id(&row.id, "user"),
        name: row.name,
        image: row.image,
        role: row.role,
        is_verified: row.is_verified,
    }
}

/// Group `(owner_id, user_id)` pairs into `owner_id -> [user ids]`.
pub(crate) fn group_ids(pairs: Vec<(String, String)>) -> HashMap<String, Vec<Uuid>> {
    let mut grouped: HashMap<String, Vec<Uuid>> = HashMap::new();
    for (owner, user) in pairs {
        if let Ok(uid) = user.parse::<Uuid>() {
            grouped.entry(owner).or_default().push(uid);
        }
    }
    grouped
}

pub(crate) fn notification(row: NotificationRow) -> Notification {
    let kind = row.kind.parse().unwrap_or_else(|e| {
        warn!("Notification '{}': {}", row.id, e);
        NotificationKind::Post
    });

    Notification {
        id: id(&row.id, "notification"),
        kind,
        sender_id: id(&row.sender_id, "sender"),
        receiver_id: id(&row.receiver_id, "receiver"),
        sender: row.sender.map(person),
        message: row.message,
        redirect_to: row.redirect_to,
        is_read: row.is_read,
        created_at: time(&row.created_at, "notification"),
    }
}

pub(crate) fn message(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: id(&row.id, "message"),
        conversation_id: id(&row.conversation_id, "conversation"),
        sender_id: id(&row.sender_id, "sender"),
        sender: row.sender.map(person),
        message: row.message,
        is_read: row.is_read,
        created_at: time(&row.created_at, "message"),
    }
}
