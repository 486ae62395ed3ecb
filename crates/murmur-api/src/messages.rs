use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use murmur_db::{Database, timestamp};
use murmur_gateway::dispatcher::Dispatcher;
use murmur_types::api::{
    ConversationPage, ConversationSummary, CountResponse, MarkReadResponse, MessageResponse,
    SendMessageRequest,
};
use murmur_types::events::{GatewayEvent, LiveMessage};
use murmur_types::models::UserSummary;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::pagination::PageQuery;

/// Direct-message coordinator.
///
/// `send_message` pushes the live message to both participants before
/// anything is written. The push is deliberately not rolled back: if the
/// write fails afterwards the failure is logged and returned, and clients
/// reconcile from history.
#[derive(Clone)]
pub struct Conversations {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl Conversations {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub async fn send_message(
        &self,
        sender: &AuthUser,
        recipient_id: Uuid,
        text: String,
    ) -> Result<MessageResponse, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::Validation("message is required".into()));
        }
        if recipient_id == sender.id {
            return Err(ApiError::Validation("cannot message yourself".into()));
        }

        let now = Utc::now();
        let live = LiveMessage {
            id: now.timestamp_millis().to_string(),
            message: text.clone(),
            sender: UserSummary {
                id: sender.id,
                name: sender.name.clone(),
                image: sender.image.clone(),
            },
            sender_id: sender.id,
            recipient_id,
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        self.dispatcher
            .publish(&[sender.id, recipient_id], GatewayEvent::SendMessage(live));

        let sender_id = sender.id;
        let persisted = blocking(&self.db, move |db| {
            let recipient = recipient_id.to_string();
            if !db.user_exists(&recipient)? {
                return Ok(None);
            }
            let (_, message) = db.append_message(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().to_string(),
                &sender_id.to_string(),
                &recipient,
                &text,
                &timestamp(now),
            )?;
            Ok(Some(message))
        })
        .await
        .inspect_err(|e| {
            error!(
                "Message {} -> {} was pushed but not persisted: {}",
                sender_id, recipient_id, e
            )
        })?;

        let message = persisted.ok_or(ApiError::NotFound("user"))?;
        Ok(mapping::message(message))
    }

    /// Mark every message the counterpart sent in this conversation as read.
    /// The viewer's own messages are never touched.
    pub async fn mark_read(
        &self,
        viewer_id: Uuid,
        conversation_id: Uuid,
        counterpart_id: Uuid,
    ) -> Result<usize, ApiError> {
        blocking(&self.db, move |db| {
            let Some(conversation) = db.get_conversation(&conversation_id.to_string())? else {
                return Ok(Err(ApiError::NotFound("conversation")));
            };

            let viewer = viewer_id.to_string();
            if !conversation.has_participant(&viewer) {
                return Ok(Err(ApiError::Forbidden));
            }

            let counterpart = counterpart_id.to_string();
            if conversation.counterpart_of(&viewer) != Some(counterpart.as_str()) {
                return Ok(Err(ApiError::Validation(
                    "counterpart is not part of this conversation".into(),
                )));
            }

            Ok(Ok(db.mark_messages_read(&conversation.id, &counterpart)?))
        })
        .await?
    }

    /// The user's conversations, most recently active first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, ApiError> {
        let rows = blocking(&self.db, move |db| {
            db.conversations_for_user(&user_id.to_string())
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                id: mapping::id(&row.id, "conversation"),
                last_message_at: mapping::time(&row.last_message_at, "conversation"),
                conversation_with: mapping::person(row.other),
                last_message: row.last_message,
                has_unread: row.has_unread,
            })
            .collect())
    }

    pub async fn count_unread(&self, user_id: Uuid) -> Result<i64, ApiError> {
        blocking(&self.db, move |db| {
            db.count_unread_conversations(&user_id.to_string())
        })
        .await
    }

    /// Messages exchanged with `other_id`, newest first.
    pub async fn history(
        &self,
        viewer_id: Uuid,
        other_id: Uuid,
        page: PageQuery,
    ) -> Result<ConversationPage, ApiError> {
        let found = blocking(&self.db, move |db| {
            let Some(conversation) =
                db.find_conversation_between(&viewer_id.to_string(), &other_id.to_string())?
            else {
                return Ok(None);
            };
            let rows = db.get_messages(&conversation.id, page.limit(), page.offset())?;
            let total = db.count_messages(&conversation.id)?;
            Ok(Some((conversation.id, rows, total)))
        })
        .await?;

        let (id, rows, total) = found.ok_or(ApiError::NotFound("conversation"))?;
        Ok(ConversationPage {
            id: mapping::id(&id, "conversation"),
            messages: rows.into_iter().map(mapping::message).collect(),
            next_page: page.next_page(total),
        })
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(recipient_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .conversations
        .send_message(&user, recipient_id, req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.conversations.list(user.id).await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.conversations.history(user.id, other_id, page).await?))
}

pub async fn count_unread(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state.conversations.count_unread(user.id).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((conversation_id, counterpart_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .conversations
        .mark_read(user.id, conversation_id, counterpart_id)
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test(flavor = "multi_thread")]
    async fn both_participants_see_the_message_before_it_returns() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");
        let (_, mut rx1) = state.dispatcher.join(u1.id);
        let (_, mut rx2a) = state.dispatcher.join(u2.id);
        let (_, mut rx2b) = state.dispatcher.join(u2.id);

        let stored = state
            .conversations
            .send_message(&u1, u2.id, "hi".into())
            .await
            .unwrap();
        assert_eq!(stored.message, "hi");
        assert_eq!(stored.sender_id, u1.id);
        assert!(!stored.is_read);

        let row = state
            .db
            .get_conversation(&stored.conversation_id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(row.first_user_id, u1.id.to_string());
        assert_eq!(row.second_user_id, u2.id.to_string());
        assert_eq!(row.last_message, "hi");

        for rx in [&mut rx1, &mut rx2a, &mut rx2b] {
            match rx.try_recv().unwrap() {
                GatewayEvent::SendMessage(live) => {
                    assert_eq!(live.message, "hi");
                    assert_eq!(live.sender_id, u1.id);
                    assert_eq!(live.recipient_id, u2.id);
                    assert_eq!(live.sender.name, "u1");
                    assert!(!live.is_read);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        let convs = state.conversations.list(u2.id).await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].id, stored.conversation_id);
        assert_eq!(convs[0].conversation_with.id, u1.id);
        assert_eq!(convs[0].last_message, "hi");
        assert!(convs[0].has_unread);
        assert!(!state.conversations.list(u1.id).await.unwrap()[0].has_unread);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_input_is_rejected_before_any_push() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");
        let (_, mut rx1) = state.dispatcher.join(u1.id);

        let empty = state.conversations.send_message(&u1, u2.id, "   ".into()).await;
        assert!(matches!(empty, Err(ApiError::Validation(_))));
        let to_self = state.conversations.send_message(&u1, u1.id, "hi".into()).await;
        assert!(matches!(to_self, Err(ApiError::Validation(_))));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_recipient_is_pushed_then_reported() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let (_, mut rx1) = state.dispatcher.join(u1.id);

        let sent = state
            .conversations
            .send_message(&u1, Uuid::new_v4(), "hello?".into())
            .await;
        assert!(matches!(sent, Err(ApiError::NotFound("user"))));
        assert!(matches!(rx1.try_recv().unwrap(), GatewayEvent::SendMessage(_)));
        assert!(state.conversations.list(u1.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_first_messages_share_one_conversation() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");

        let mut handles = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            let (from, to) = if i % 2 == 0 {
                (u1.clone(), u2.id)
            } else {
                (u2.clone(), u1.id)
            };
            handles.push(tokio::spawn(async move {
                state
                    .conversations
                    .send_message(&from, to, format!("msg {i}"))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().conversation_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(state.db.count_conversations().unwrap(), 1);

        let history = state
            .conversations
            .history(u1.id, u2.id, PageQuery { page: 0, limit: 50 })
            .await
            .unwrap();
        assert_eq!(history.messages.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_read_only_touches_counterpart_messages() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");
        let c = &state.conversations;

        let first = c.send_message(&u1, u2.id, "one".into()).await.unwrap();
        c.send_message(&u1, u2.id, "two".into()).await.unwrap();
        c.send_message(&u2, u1.id, "three".into()).await.unwrap();
        let conv = first.conversation_id;

        assert_eq!(c.count_unread(u1.id).await.unwrap(), 1);
        assert_eq!(c.count_unread(u2.id).await.unwrap(), 1);

        assert_eq!(c.mark_read(u2.id, conv, u1.id).await.unwrap(), 2);
        assert_eq!(c.count_unread(u2.id).await.unwrap(), 0);
        // u2's own message to u1 is still unread
        assert_eq!(c.count_unread(u1.id).await.unwrap(), 1);
        assert!(c.list(u1.id).await.unwrap()[0].has_unread);

        // Idempotent
        assert_eq!(c.mark_read(u2.id, conv, u1.id).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_read_checks_membership() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");
        let u3 = test_support::user(&state, "u3");
        let c = &state.conversations;

        let conv = c.send_message(&u1, u2.id, "hi".into()).await.unwrap().conversation_id;

        assert!(matches!(
            c.mark_read(u3.id, conv, u1.id).await,
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            c.mark_read(u2.id, conv, u3.id).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            c.mark_read(u2.id, Uuid::new_v4(), u1.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn history_needs_an_existing_conversation() {
        let state = test_support::state().await;
        let u1 = test_support::user(&state, "u1");
        let u2 = test_support::user(&state, "u2");

        let none = state.conversations.history(u1.id, u2.id, PageQuery::default()).await;
        assert!(matches!(none, Err(ApiError::NotFound(_))));
    }
}
