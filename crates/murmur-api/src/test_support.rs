use std::sync::Arc;

use uuid::Uuid;

use murmur_db::Database;
use murmur_gateway::dispatcher::Dispatcher;

use crate::auth::{AppState, AppStateInner};
use crate::media::MediaStore;
use crate::middleware::AuthUser;

pub async fn state() -> AppState {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let dir = std::env::temp_dir().join(format!("murmur-test-media-{}", Uuid::new_v4()));
    let media = MediaStore::new(dir, "/media").await.unwrap();
    Arc::new(AppStateInner::new(
        db,
        Dispatcher::new(),
        media,
        "test-secret".into(),
    ))
}

pub fn user(state: &AppState, name: &str) -> AuthUser {
    let id = Uuid::new_v4();
    let email = format!("{name}@example.com");
    state
        .db
        .create_user(&id.to_string(), &email, name, "hash", None, None)
        .unwrap();
    AuthUser {
        id,
        email,
        name: name.to_string(),
        role: "user".into(),
        image: None,
    }
}

pub fn png() -> String {
    "data:image/png;base64,iVBORw0KGgo=".into()
}
