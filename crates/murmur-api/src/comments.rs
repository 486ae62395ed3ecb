use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use murmur_db::models::CommentRow;
use murmur_db::{Database, timestamp};
use murmur_types::api::{CommentPage, CommentRequest, CommentResponse, LikeResponse};
use murmur_types::models::NotificationKind;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::notifications::NewNotification;
use crate::pagination::PageQuery;

fn hydrate(db: &Database, rows: Vec<CommentRow>) -> anyhow::Result<Vec<CommentResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut likes = mapping::group_ids(db.comment_likes(&ids)?);

    Ok(rows
        .into_iter()
        .map(|row| CommentResponse {
            id: mapping::id(&row.id, "comment"),
            post_id: mapping::id(&row.post_id, "post"),
            likes: likes.remove(&row.id).unwrap_or_default(),
            created_at: mapping::time(&row.created_at, "comment"),
            author: mapping::author(row.author),
            content: row.content,
        })
        .collect())
}

fn validate(req: &CommentRequest) -> Result<(), ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("comment is required".into()));
    }
    Ok(())
}

/// The comment, provided it belongs to `post_id`.
async fn load_comment(state: &AppState, post_id: Uuid, comment_id: Uuid) -> Result<CommentRow, ApiError> {
    blocking(&state.db, move |db| db.get_comment(&comment_id.to_string()))
        .await?
        .filter(|c| c.post_id == post_id.to_string())
        .ok_or(ApiError::NotFound("comment"))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req)?;

    let comment_id = Uuid::new_v4();
    let author_id = user.id;
    let content = req.content.clone();
    let created = blocking(&state.db, move |db| {
        let post_id = post_id.to_string();
        let Some(post) = db.get_post(&post_id)? else {
            return Ok(None);
        };
        let id = comment_id.to_string();
        db.add_comment(&id, &post_id, &author_id.to_string(), &content, &timestamp(Utc::now()))?;
        let row = db
            .get_comment(&id)?
            .ok_or_else(|| anyhow::anyhow!("comment {} vanished after insert", id))?;
        Ok(Some((post.author.id, hydrate(db, vec![row])?.remove(0))))
    })
    .await?;

    let (post_author, comment) = created.ok_or(ApiError::NotFound("post"))?;

    state
        .notifier
        .notify(NewNotification {
            kind: NotificationKind::Comment,
            sender_id: user.id,
            receiver_id: mapping::id(&post_author, "author"),
            message: Some(format!("{} commented on your post: {}", user.name, req.content)),
            redirect_to: Some(format!("/post/{}?comment={}", post_id, comment_id)),
        })
        .await;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Most-liked first, then newest.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (comments, total) = blocking(&state.db, move |db| {
        let id = post_id.to_string();
        let rows = db.comments_for_post(&id, page.limit(), page.offset())?;
        Ok((hydrate(db, rows)?, db.count_comments(&id)?))
    })
    .await?;

    Ok(Json(CommentPage {
        comments,
        next_page: page.next_page(total),
    }))
}

pub async fn like_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = load_comment(&state, post_id, comment_id).await?;

    let user_id = user.id;
    let (liked, likes) = blocking(&state.db, move |db| {
        let id = comment_id.to_string();
        let liked = db.toggle_comment_like(&id, &user_id.to_string())?;
        Ok((liked, db.comment_likes(&[id])?))
    })
    .await?;

    if liked {
        state
            .notifier
            .notify(NewNotification {
                kind: NotificationKind::LikedComment,
                sender_id: user.id,
                receiver_id: mapping::id(&comment.author.id, "author"),
                message: Some(format!("{} liked your comment", user.name)),
                redirect_to: Some(format!("/post/{}?comment={}", post_id, comment_id)),
            })
            .await;
    }

    Ok(Json(LikeResponse {
        liked,
        likes: mapping::group_ids(likes)
            .remove(&comment_id.to_string())
            .unwrap_or_default(),
    }))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req)?;

    let comment = load_comment(&state, post_id, comment_id).await?;
    if comment.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    let updated = blocking(&state.db, move |db| {
        let id = comment_id.to_string();
        db.update_comment(&id, &req.content)?;
        let row = db
            .get_comment(&id)?
            .ok_or_else(|| anyhow::anyhow!("comment {} vanished during update", id))?;
        Ok(hydrate(db, vec![row])?.remove(0))
    })
    .await?;

    Ok(Json(updated))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = load_comment(&state, post_id, comment_id).await?;
    if comment.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    blocking(&state.db, move |db| db.delete_comment(&comment_id.to_string())).await?;

    Ok(StatusCode::NO_CONTENT)
}
