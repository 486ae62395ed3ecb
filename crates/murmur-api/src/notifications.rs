use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use murmur_db::{Database, timestamp};
use murmur_gateway::dispatcher::Dispatcher;
use murmur_types::api::{CountResponse, NotificationPage};
use murmur_types::events::GatewayEvent;
use murmur_types::models::{Notification, NotificationKind};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::pagination::PageQuery;

/// A notification about to be written.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: Option<String>,
    pub redirect_to: Option<String>,
}

/// Persist-then-push notification writer.
///
/// A row is written first and only the stored row is pushed to the
/// receiver's room, so every live `sendNotification` corresponds to a row a
/// later listing will return.
#[derive(Clone)]
pub struct Notifier {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl Notifier {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Write and push. Self-notifications are suppressed and yield `None`
    /// without touching the store or the hub.
    pub async fn create(&self, new: NewNotification) -> Result<Option<Notification>, ApiError> {
        if new.sender_id == new.receiver_id {
            debug!("Suppressed self-notification for {}", new.sender_id);
            return Ok(None);
        }

        let receiver_id = new.receiver_id;
        let row = blocking(&self.db, move |db| {
            db.insert_notification(
                &Uuid::new_v4().to_string(),
                new.kind.as_str(),
                &new.sender_id.to_string(),
                &new.receiver_id.to_string(),
                new.message.as_deref(),
                new.redirect_to.as_deref(),
                &timestamp(Utc::now()),
            )
        })
        .await?;

        let notification = mapping::notification(row);
        self.dispatcher
            .send_to_user(receiver_id, GatewayEvent::SendNotification(notification.clone()));

        Ok(Some(notification))
    }

    /// Fire-and-log variant used as a side effect of another action. The
    /// action already succeeded, so a failed notification is only logged.
    pub async fn notify(&self, new: NewNotification) -> Option<Notification> {
        let (kind, receiver) = (new.kind, new.receiver_id);
        match self.create(new).await {
            Ok(notification) => notification,
            Err(e) => {
                error!("Failed to write {} notification for {}: {}", kind, receiver, e);
                None
            }
        }
    }

    /// Tell the user's sessions first, then mark every unread row read.
    pub async fn mark_all_read(&self, receiver_id: Uuid) -> Result<usize, ApiError> {
        self.dispatcher
            .send_to_user(receiver_id, GatewayEvent::ReadNotifications);

        blocking(&self.db, move |db| {
            db.mark_notifications_read(&receiver_id.to_string())
        })
        .await
    }

    pub async fn list(&self, receiver_id: Uuid, page: PageQuery) -> Result<NotificationPage, ApiError> {
        let (rows, total) = blocking(&self.db, move |db| {
            let id = receiver_id.to_string();
            let rows = db.notifications_for(&id, page.limit(), page.offset())?;
            let total = db.count_notifications(&id)?;
            Ok((rows, total))
        })
        .await?;

        Ok(NotificationPage {
            notifications: rows.into_iter().map(mapping::notification).collect(),
            next_page: page.next_page(total),
        })
    }

    pub async fn count_unread(&self, receiver_id: Uuid) -> Result<i64, ApiError> {
        blocking(&self.db, move |db| {
            db.count_unread_notifications(&receiver_id.to_string())
        })
        .await
    }
}

pub async fn get_notifications(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.notifier.list(user.id, page).await?))
}

pub async fn count_unread(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.notifier.count_unread(user.id).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.notifier.mark_all_read(user.id).await?;
    Ok(Json(CountResponse { count: updated as i64 }))
}
