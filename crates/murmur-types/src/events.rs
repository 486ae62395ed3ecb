use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Notification, UserSummary};

/// Events pushed over the WebSocket gateway. The gateway is outbound only;
/// every mutation enters through the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the handshake identity
    Ready {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },

    /// A direct message, delivered before it is persisted
    SendMessage(LiveMessage),

    /// A notification row was written for the receiving user
    SendNotification(Notification),

    /// The receiving user's notifications were all marked read
    ReadNotifications,
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::SendMessage(_) => "sendMessage",
            Self::SendNotification(_) => "sendNotification",
            Self::ReadNotifications => "readNotifications",
        }
    }
}

/// Client-visible message built locally by the sender's request, ahead of
/// the store write. `id` is a temporary millisecond timestamp, not the row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessage {
    pub id: String,
    pub message: String,
    pub sender: UserSummary,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_client_listeners() {
        let read = serde_json::to_value(GatewayEvent::ReadNotifications).unwrap();
        assert_eq!(read, serde_json::json!({ "type": "readNotifications" }));

        let ready = serde_json::to_value(GatewayEvent::Ready { user_id: Uuid::nil() }).unwrap();
        assert_eq!(ready["type"], "ready");
        assert_eq!(ready["data"]["userId"], Uuid::nil().to_string());

        let now = Utc::now();
        let sender = UserSummary {
            id: Uuid::new_v4(),
            name: "ana".into(),
            image: None,
        };
        let event = GatewayEvent::SendMessage(LiveMessage {
            id: "1760000000000".into(),
            message: "hi".into(),
            sender_id: sender.id,
            sender,
            recipient_id: Uuid::new_v4(),
            is_read: false,
            created_at: now,
            updated_at: now,
        });
        assert_eq!(event.name(), "sendMessage");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sendMessage");
        assert_eq!(json["data"]["isRead"], false);
        assert_eq!(json["data"]["message"], "hi");
    }
}
