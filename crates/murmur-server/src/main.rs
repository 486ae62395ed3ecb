mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::HeaderValue,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_api::auth::{self, AppState, AppStateInner, verify_token};
use murmur_api::error::ApiError;
use murmur_api::media::MediaStore;
use murmur_api::middleware::require_auth;
use murmur_api::{comments, messages, notifications, posts, stories, users};
use murmur_db::Database;
use murmur_gateway::connection;
use murmur_gateway::dispatcher::Dispatcher;

use crate::config::Config;

/// Uploads carry base64 images inline.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let media = MediaStore::new(config.media_dir.clone(), config.media_url_prefix.clone()).await?;
    let media_files = ServeDir::new(media.dir());

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        Dispatcher::new(),
        media,
        config.jwt_secret.clone(),
    ));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users/check-availability", post(users::check_availability))
        .route("/posts/random", get(posts::random_posts));

    let protected_routes = Router::new()
        .route("/auth/password", post(auth::update_password))
        // Users
        .route("/users/profile", get(users::me).post(users::update_profile))
        .route("/users/search/{name}", get(users::search_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/follow/{user_id}", post(users::follow))
        .route("/users/{user_id}/followers", get(users::followers))
        .route("/users/{user_id}/following", get(users::following))
        .route("/users/{user_id}/posts", get(posts::user_posts))
        .route("/users/{user_id}/tagged", get(posts::tagged_posts))
        // Posts
        .route("/posts", get(posts::get_feed).post(posts::create_post))
        .route("/posts/saved", get(posts::saved_posts))
        .route("/posts/likes", get(posts::get_likes))
        .route(
            "/posts/{post_id}",
            get(posts::get_post).put(posts::update_post).delete(posts::delete_post),
        )
        .route("/posts/{post_id}/like", post(posts::like_post))
        .route("/posts/{post_id}/save", post(posts::save_post))
        // Comments
        .route(
            "/posts/{post_id}/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route(
            "/posts/{post_id}/comments/{comment_id}",
            put(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/posts/{post_id}/comments/{comment_id}/like", post(comments::like_comment))
        // Stories
        .route("/stories", post(stories::add_story))
        .route("/stories/feed", get(stories::story_feed))
        .route("/stories/archive", get(stories::archived_stories))
        .route("/stories/archive/{story_id}", get(stories::archived_story))
        .route("/stories/user/{user_id}", get(stories::user_stories))
        .route("/stories/{story_id}", delete(stories::delete_story))
        .route("/stories/{story_id}/view", post(stories::view_story))
        .route("/stories/{story_id}/viewers", get(stories::story_viewers))
        .route("/stories/{story_id}/like", post(stories::like_story))
        // Messages
        .route("/messages/conversations", get(messages::list_conversations))
        .route("/messages/conversation/{user_id}", get(messages::get_conversation))
        .route("/messages/count-unread", get(messages::count_unread))
        .route(
            "/messages/read/{conversation_id}/{counterpart_id}",
            post(messages::mark_read),
        )
        .route("/messages/{recipient_id}", post(messages::send_message))
        // Notifications
        .route("/notifications", get(notifications::get_notifications))
        .route("/notifications/count", get(notifications::count_unread))
        .route("/notifications/read", post(notifications::mark_read))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth));

    let api = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    let app = Router::new()
        .nest("/api", api)
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state)
        .nest_service(&config.media_url_prefix, media_files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(config.client_origin.as_deref())?),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    Ok(match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    })
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The handshake identity comes from `?token=`; browsers cannot set headers
/// on a WebSocket upgrade.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = query.token.ok_or(ApiError::Unauthorized)?;
    let user_id = verify_token(&state.jwt_secret, &token)?;
    let dispatcher = state.dispatcher.clone();

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, user_id)))
}
