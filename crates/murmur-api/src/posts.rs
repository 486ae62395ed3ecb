use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::PostRow;
use murmur_db::{Database, timestamp};
use murmur_types::api::{
    CreatePostRequest, LikeResponse, LikersQuery, PostPage, PostResponse, SaveResponse,
    UpdatePostRequest, UserListResponse,
};
use murmur_types::models::{NotificationKind, UserSummary};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::notifications::NewNotification;
use crate::pagination::PageQuery;

const MAX_IMAGES: usize = 10;
const POPULAR_LIMIT: u32 = 10;

/// Attach likes, saves and tags to a batch of posts with one query each.
fn hydrate(db: &Database, rows: Vec<PostRow>) -> anyhow::Result<Vec<PostResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let mut likes = mapping::group_ids(db.post_likes(&ids)?);
    let mut saves = mapping::group_ids(db.post_saves(&ids)?);
    let mut tags: HashMap<String, Vec<UserSummary>> = HashMap::new();
    for (post_id, person) in db.post_tags(&ids)? {
        tags.entry(post_id).or_default().push(mapping::person(person));
    }

    Ok(rows
        .into_iter()
        .map(|row| PostResponse {
            id: mapping::id(&row.id, "post"),
            liked_by: likes.remove(&row.id).unwrap_or_default(),
            saved_by: saves.remove(&row.id).unwrap_or_default(),
            tags: tags.remove(&row.id).unwrap_or_default(),
            created_at: mapping::time(&row.created_at, "post"),
            author: mapping::author(row.author),
            content: row.content,
            images: row.images,
        })
        .collect())
}

fn tag_notice(sender: &AuthUser, post_id: Uuid, receiver: &str) -> Option<NewNotification> {
    Some(NewNotification {
        kind: NotificationKind::Tag,
        sender_id: sender.id,
        receiver_id: receiver.parse().ok()?,
        message: Some(format!("{} tagged you in a post", sender.name)),
        redirect_to: Some(format!("/post/{}", post_id)),
    })
}

async fn notify_tagged(state: &AppState, sender: &AuthUser, post_id: Uuid, tagged: &[String]) {
    for receiver in tagged {
        if let Some(notice) = tag_notice(sender, post_id, receiver) {
            state.notifier.notify(notice).await;
        }
    }
}

/// Load a post, failing with `NotFound` if it does not exist.
async fn load_post(state: &AppState, post_id: Uuid) -> Result<PostRow, ApiError> {
    blocking(&state.db, move |db| db.get_post(&post_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("post"))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }
    if req.images.is_empty() || req.images.len() > MAX_IMAGES {
        return Err(ApiError::Validation(format!("a post needs 1 to {} images", MAX_IMAGES)));
    }

    let images = state.media.upload_all(&req.images).await?;

    let post_id = Uuid::new_v4();
    let author_id = user.id;
    let tags: Vec<String> = req.tags.iter().map(Uuid::to_string).collect();
    let (post, tagged) = blocking(&state.db, move |db| {
        let id = post_id.to_string();
        let tagged = db.create_post(
            &id,
            &author_id.to_string(),
            &req.content,
            &images,
            &tags,
            &timestamp(Utc::now()),
        )?;
        let row = db
            .get_post(&id)?
            .ok_or_else(|| anyhow::anyhow!("post {} vanished after insert", id))?;
        let post = hydrate(db, vec![row])?.remove(0);
        Ok((post, tagged))
    })
    .await?;

    notify_tagged(&state, &user, post_id, &tagged).await;

    Ok((StatusCode::CREATED, Json(post)))
}

/// Every post, newest first.
pub async fn get_feed(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (posts, total) = blocking(&state.db, move |db| {
        let rows = db.list_posts(page.limit(), page.offset())?;
        Ok((hydrate(db, rows)?, db.count_posts()?))
    })
    .await?;

    Ok(Json(PostPage {
        posts,
        next_page: page.next_page(total),
    }))
}

/// The most-liked posts. Needs no account.
pub async fn random_posts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let posts = blocking(&state.db, move |db| {
        let rows = db.popular_posts(POPULAR_LIMIT)?;
        hydrate(db, rows)
    })
    .await?;

    Ok(Json(PostPage {
        posts,
        next_page: None,
    }))
}

/// Who liked a post or a comment: the caller first, then people they
/// follow, then everyone else.
pub async fn get_likes(
    State(state): State<AppState>,
    Query(target): Query<LikersQuery>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = user.id.to_string();
    let likers = match (target.post_id, target.comment_id) {
        (Some(post_id), None) => {
            blocking(&state.db, move |db| {
                let id = post_id.to_string();
                if db.get_post(&id)?.is_none() {
                    return Ok(None);
                }
                db.post_likers(&id, &viewer).map(Some)
            })
            .await?
            .ok_or(ApiError::NotFound("post"))?
        }
        (None, Some(comment_id)) => {
            blocking(&state.db, move |db| {
                let id = comment_id.to_string();
                if db.get_comment(&id)?.is_none() {
                    return Ok(None);
                }
                db.comment_likers(&id, &viewer).map(Some)
            })
            .await?
            .ok_or(ApiError::NotFound("comment"))?
        }
        _ => {
            return Err(ApiError::Validation(
                "exactly one of postId or commentId is required".into(),
            ));
        }
    };

    Ok(Json(UserListResponse {
        users: likers.into_iter().map(mapping::person).collect(),
    }))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let post = blocking(&state.db, move |db| {
        db.get_post(&post_id.to_string())?
            .map(|row| hydrate(db, vec![row]).map(|mut v| v.remove(0)))
            .transpose()
    })
    .await?
    .ok_or(ApiError::NotFound("post"))?;

    Ok(Json(post))
}

pub async fn user_posts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = blocking(&state.db, move |db| {
        let id = user_id.to_string();
        if !db.user_exists(&id)? {
            return Ok(None);
        }
        let rows = db.posts_by_author(&id)?;
        hydrate(db, rows).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(posts))
}

pub async fn tagged_posts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = blocking(&state.db, move |db| {
        let id = user_id.to_string();
        if !db.user_exists(&id)? {
            return Ok(None);
        }
        let rows = db.posts_tagging(&id)?;
        hydrate(db, rows).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    Ok(Json(posts))
}

/// The caller's saved posts.
pub async fn saved_posts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = blocking(&state.db, move |db| {
        let rows = db.posts_saved_by(&user.id.to_string())?;
        hydrate(db, rows)
    })
    .await?;

    Ok(Json(posts))
}

/// Toggle the caller's like. Only the unliked -> liked transition notifies
/// the author.
pub async fn like_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state, post_id).await?;

    let user_id = user.id;
    let (liked, likes) = blocking(&state.db, move |db| {
        let id = post_id.to_string();
        let liked = db.toggle_post_like(&id, &user_id.to_string())?;
        let likes = db.post_likes(&[id])?;
        Ok((liked, likes))
    })
    .await?;

    if liked {
        state
            .notifier
            .notify(NewNotification {
                kind: NotificationKind::Like,
                sender_id: user.id,
                receiver_id: mapping::id(&post.author.id, "author"),
                message: Some(format!("{} liked your post", user.name)),
                redirect_to: Some(format!("/post/{}", post_id)),
            })
            .await;
    }

    Ok(Json(LikeResponse {
        liked,
        likes: mapping::group_ids(likes)
            .remove(&post_id.to_string())
            .unwrap_or_default(),
    }))
}

pub async fn save_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    load_post(&state, post_id).await?;

    let saved = blocking(&state.db, move |db| {
        db.toggle_post_save(&post_id.to_string(), &user.id.to_string())
    })
    .await?;

    Ok(Json(SaveResponse { saved }))
}

/// Author-only edit of content and tags. Users tagged for the first time
/// are notified.
pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }

    let post = load_post(&state, post_id).await?;
    if post.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    let tags: Vec<String> = req.tags.iter().map(Uuid::to_string).collect();
    let (updated, newly_tagged) = blocking(&state.db, move |db| {
        let id = post_id.to_string();
        let newly_tagged = db.update_post(&id, &req.content, &tags)?;
        let row = db
            .get_post(&id)?
            .ok_or_else(|| anyhow::anyhow!("post {} vanished during update", id))?;
        Ok((hydrate(db, vec![row])?.remove(0), newly_tagged))
    })
    .await?;

    notify_tagged(&state, &user, post_id, &newly_tagged).await;

    Ok(Json(updated))
}

/// Author-only delete. Stored images are removed best-effort; the post is
/// deleted even if the media store is unavailable.
pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state, post_id).await?;
    if post.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    if let Err(e) = state.media.delete(&post.images).await {
        warn!("Leaving orphaned media for post {}: {}", post_id, e);
    }

    blocking(&state.db, move |db| db.delete_post(&post_id.to_string())).await?;

    Ok(StatusCode::NO_CONTENT)
}
