use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public slice of a user profile, embedded wherever another user is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
}

/// Author block on posts and comments; carries the verification badge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub role: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Post,
    Comment,
    Like,
    Follow,
    LikedComment,
    Tag,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Like => "like",
            Self::Follow => "follow",
            Self::LikedComment => "likedComment",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNotificationKind(pub String);

impl fmt::Display for UnknownNotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown notification kind: {}", self.0)
    }
}

impl std::error::Error for UnknownNotificationKind {}

impl FromStr for NotificationKind {
    type Err = UnknownNotificationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "comment" => Ok(Self::Comment),
            "like" => Ok(Self::Like),
            "follow" => Ok(Self::Follow),
            "likedComment" => Ok(Self::LikedComment),
            "tag" => Ok(Self::Tag),
            other => Err(UnknownNotificationKind(other.to_string())),
        }
    }
}

/// A persisted notification, exactly as pushed over the gateway and listed
/// over REST.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    pub message: Option<String>,
    pub redirect_to: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// -- Stories --

/// Stories stay visible for this long after creation, then move to the
/// author's archive.
pub fn story_lifetime() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoryState {
    Active,
    Archived,
}

/// Active for `created_at <= now < created_at + 24h`, archived afterwards.
/// Never stored; always derived from the creation timestamp.
pub fn story_state(created_at: DateTime<Utc>, now: DateTime<Utc>) -> StoryState {
    if now < created_at + story_lifetime() {
        StoryState::Active
    } else {
        StoryState::Archived
    }
}

/// Stories created strictly after this instant are active at `now`.
pub fn active_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - story_lifetime()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn story_is_active_for_exactly_one_day() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(story_state(t, t), StoryState::Active);
        assert_eq!(story_state(t, t + Duration::hours(23)), StoryState::Active);
        assert_eq!(
            story_state(t, t + Duration::hours(24) - Duration::milliseconds(1)),
            StoryState::Active
        );
        assert_eq!(story_state(t, t + Duration::hours(24)), StoryState::Archived);
        assert_eq!(story_state(t, t + Duration::days(30)), StoryState::Archived);
    }

    #[test]
    fn cutoff_agrees_with_story_state() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        let cutoff = active_cutoff(now);

        // strictly after the cutoff is active, at the cutoff is archived
        assert_eq!(story_state(cutoff + Duration::milliseconds(1), now), StoryState::Active);
        assert_eq!(story_state(cutoff, now), StoryState::Archived);
    }

    #[test]
    fn notification_kind_round_trips_through_its_column_value() {
        for kind in [
            NotificationKind::Post,
            NotificationKind::Comment,
            NotificationKind::Like,
            NotificationKind::Follow,
            NotificationKind::LikedComment,
            NotificationKind::Tag,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("mention".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn notification_serializes_kind_as_type() {
        let n = Notification {
            id: Uuid::new_v4(),
            kind: NotificationKind::LikedComment,
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            sender: None,
            message: Some("x liked your comment".into()),
            redirect_to: None,
            is_read: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "likedComment");
        assert_eq!(json["isRead"], false);
        assert!(json.get("sender").is_none());
    }
}
