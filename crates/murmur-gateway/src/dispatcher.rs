use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

/// Identifies one live socket. A user may hold many at once (tabs, devices).
pub type SessionId = Uuid;

/// Process-wide room registry: user id -> that user's live sessions.
///
/// Constructed once at startup and cloned into whatever needs to push.
/// Delivery is best effort: events for users with no sessions are dropped,
/// nothing is queued or retried. All methods are synchronous and never
/// block on I/O.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<Rooms>>,
}

#[derive(Default)]
struct Rooms {
    /// Per-user rooms: user_id -> (session_id -> sender)
    by_user: HashMap<Uuid, HashMap<SessionId, mpsc::UnboundedSender<GatewayEvent>>>,

    /// Reverse index so a session can leave without knowing its user
    owner: HashMap<SessionId, Uuid>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new session to `user_id`'s room. Returns the session handle and
    /// the receiving end the connection loop drains.
    pub fn join(&self, user_id: Uuid) -> (SessionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        rooms.by_user.entry(user_id).or_default().insert(session_id, tx);
        rooms.owner.insert(session_id, user_id);

        debug!("session {} joined room {}", session_id, user_id);
        (session_id, rx)
    }

    /// Remove a session from whatever room holds it. Unknown or already
    /// removed sessions are a no-op. Returns whether anything was removed.
    pub fn leave(&self, session_id: SessionId) -> bool {
        let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        rooms.remove_session(session_id)
    }

    /// Deliver `event` to every session joined under any of `user_ids`.
    /// Duplicate ids are collapsed so each session gets one copy. Returns
    /// the number of sessions the event was handed to.
    pub fn publish(&self, user_ids: &[Uuid], event: GatewayEvent) -> usize {
        let targets: HashSet<&Uuid> = user_ids.iter().collect();
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            for user_id in targets {
                let Some(sessions) = rooms.by_user.get(user_id) else {
                    continue;
                };
                for (session_id, tx) in sessions {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(*session_id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut rooms = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            for session_id in dead {
                rooms.remove_session(session_id);
            }
        }

        debug!("{} delivered to {} session(s)", event.name(), delivered);
        delivered
    }

    /// Shorthand for a single-user publish.
    pub fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        self.publish(&[user_id], event)
    }

    /// Live sessions joined under `user_id`.
    pub fn session_count(&self, user_id: Uuid) -> usize {
        let rooms = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        rooms.by_user.get(&user_id).map_or(0, HashMap::len)
    }
}

impl Rooms {
    fn remove_session(&mut self, session_id: SessionId) -> bool {
        let Some(user_id) = self.owner.remove(&session_id) else {
            return false;
        };
        if let Some(sessions) = self.by_user.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        debug!("session {} left room {}", session_id, user_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_types::models::{Notification, NotificationKind};

    fn notification(receiver_id: Uuid) -> GatewayEvent {
        GatewayEvent::SendNotification(Notification {
            id: Uuid::new_v4(),
            kind: NotificationKind::Follow,
            sender_id: Uuid::new_v4(),
            receiver_id,
            sender: None,
            message: None,
            redirect_to: None,
            is_read: false,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn publish_reaches_every_session_of_the_room_and_nobody_else() {
        let hub = Dispatcher::new();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let (_s1, mut rx1) = hub.join(u1);
        let (_s2, mut rx2) = hub.join(u1);
        let (_s3, mut rx3) = hub.join(u2);

        assert_eq!(hub.publish(&[u1], notification(u1)), 2);

        assert!(matches!(rx1.try_recv(), Ok(GatewayEvent::SendNotification(_))));
        assert!(matches!(rx2.try_recv(), Ok(GatewayEvent::SendNotification(_))));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn offline_users_drop_events_silently() {
        let hub = Dispatcher::new();
        assert_eq!(hub.send_to_user(Uuid::new_v4(), GatewayEvent::ReadNotifications), 0);
    }

    #[test]
    fn duplicate_targets_deliver_once_per_session() {
        let hub = Dispatcher::new();
        let u1 = Uuid::new_v4();
        let (_s, mut rx) = hub.join(u1);

        assert_eq!(hub.publish(&[u1, u1], GatewayEvent::ReadNotifications), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn leave_is_idempotent_and_tolerates_unknown_sessions() {
        let hub = Dispatcher::new();
        let u1 = Uuid::new_v4();
        let (s1, _rx1) = hub.join(u1);
        let (_s2, mut rx2) = hub.join(u1);

        assert!(hub.leave(s1));
        assert!(!hub.leave(s1));
        assert!(!hub.leave(Uuid::new_v4()));
        assert_eq!(hub.session_count(u1), 1);

        assert_eq!(hub.send_to_user(u1, GatewayEvent::ReadNotifications), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn closed_receivers_are_pruned_on_publish() {
        let hub = Dispatcher::new();
        let u1 = Uuid::new_v4();
        let (_s1, rx1) = hub.join(u1);
        drop(rx1);

        assert_eq!(hub.session_count(u1), 1);
        assert_eq!(hub.send_to_user(u1, GatewayEvent::ReadNotifications), 0);
        assert_eq!(hub.session_count(u1), 0);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let hub = Dispatcher::new();
        let u1 = Uuid::new_v4();
        let (_s, mut rx) = hub.join(u1);

        hub.send_to_user(u1, notification(u1));
        hub.send_to_user(u1, GatewayEvent::ReadNotifications);

        assert_eq!(rx.try_recv().unwrap().name(), "sendNotification");
        assert_eq!(rx.try_recv().unwrap().name(), "readNotifications");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_and_leaves_lose_no_sessions() {
        let hub = Dispatcher::new();
        let user = Uuid::new_v4();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let hub = hub.clone();
                tokio::spawn(async move {
                    let (session, rx) = hub.join(user);
                    if i % 2 == 0 {
                        hub.leave(session);
                        None
                    } else {
                        Some(rx)
                    }
                })
            })
            .collect();

        let mut kept = Vec::new();
        for task in tasks {
            if let Some(rx) = task.await.unwrap() {
                kept.push(rx);
            }
        }

        assert_eq!(hub.session_count(user), 32);
        assert_eq!(hub.send_to_user(user, GatewayEvent::ReadNotifications), 32);
    }
}
