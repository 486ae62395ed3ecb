pub mod auth;
pub mod comments;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod stories;
pub mod users;

mod mapping;
mod pagination;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use murmur_db::Database;

use crate::error::ApiError;

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
}
