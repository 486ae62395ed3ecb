use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::StoryRow;
use murmur_db::{Database, timestamp};
use murmur_types::api::{
    AddStoryRequest, ArchivedStory, LikeResponse, StoryFeedEntry, StoryResponse, UserListResponse,
};
use murmur_types::models::{NotificationKind, StoryState, active_cutoff, story_state};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::notifications::NewNotification;

fn hydrate(db: &Database, viewer: Uuid, rows: Vec<StoryRow>) -> anyhow::Result<Vec<StoryResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut views = mapping::group_ids(db.story_views(&ids)?);
    let mut likes = mapping::group_ids(db.story_likes(&ids)?);

    Ok(rows
        .into_iter()
        .map(|row| StoryResponse {
            id: mapping::id(&row.id, "story"),
            viewed_by: views.remove(&row.id).unwrap_or_default(),
            is_liked: likes
                .remove(&row.id)
                .is_some_and(|users| users.contains(&viewer)),
            created_at: mapping::time(&row.created_at, "story"),
            author: mapping::person(row.author),
            image: row.image,
        })
        .collect())
}

fn archived(row: StoryRow) -> ArchivedStory {
    ArchivedStory {
        id: mapping::id(&row.id, "story"),
        created_at: mapping::time(&row.created_at, "story"),
        image: row.image,
    }
}

fn state_of(row: &StoryRow, now: DateTime<Utc>) -> StoryState {
    story_state(mapping::time(&row.created_at, "story"), now)
}

async fn load_story(state: &AppState, story_id: Uuid) -> Result<StoryRow, ApiError> {
    blocking(&state.db, move |db| db.get_story(&story_id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("story"))
}

/// An active story. Archived stories are visible to their author only, so
/// for everyone else they do not exist.
async fn load_visible_story(
    state: &AppState,
    story_id: Uuid,
    viewer: &AuthUser,
) -> Result<StoryRow, ApiError> {
    let story = load_story(state, story_id).await?;
    let own = story.author.id == viewer.id.to_string();
    if !own && state_of(&story, Utc::now()) == StoryState::Archived {
        return Err(ApiError::NotFound("story"));
    }
    Ok(story)
}

pub async fn add_story(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AddStoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state.media.upload(&req.image).await?;

    let story_id = Uuid::new_v4();
    let viewer = user.id;
    let story = blocking(&state.db, move |db| {
        let id = story_id.to_string();
        db.add_story(&id, &viewer.to_string(), &image, &timestamp(Utc::now()))?;
        let row = db
            .get_story(&id)?
            .ok_or_else(|| anyhow::anyhow!("story {} vanished after insert", id))?;
        Ok(hydrate(db, viewer, vec![row])?.remove(0))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(story)))
}

/// Followed users with active stories; users with unseen stories first.
pub async fn story_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let cutoff = timestamp(active_cutoff(Utc::now()));
    let rows = blocking(&state.db, move |db| db.story_feed(&user.id.to_string(), &cutoff)).await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| StoryFeedEntry {
                user: mapping::person(row.user),
                is_viewed: row.all_viewed,
            })
            .collect::<Vec<_>>(),
    ))
}

/// A user's active stories in playback order.
pub async fn user_stories(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let cutoff = timestamp(active_cutoff(Utc::now()));
    let stories = blocking(&state.db, move |db| {
        let rows = db.active_stories_by(&user_id.to_string(), &cutoff)?;
        hydrate(db, user.id, rows)
    })
    .await?;

    Ok(Json(stories))
}

/// The caller's own archived stories, newest first.
pub async fn archived_stories(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let cutoff = timestamp(active_cutoff(Utc::now()));
    let rows = blocking(&state.db, move |db| {
        db.archived_stories_by(&user.id.to_string(), &cutoff)
    })
    .await?;

    Ok(Json(rows.into_iter().map(archived).collect::<Vec<_>>()))
}

pub async fn archived_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let story = load_story(&state, story_id).await?;
    if story.author.id != user.id.to_string() || state_of(&story, Utc::now()) != StoryState::Archived {
        return Err(ApiError::NotFound("story"));
    }
    Ok(Json(archived(story)))
}

/// Record that the caller saw the story. Authors viewing their own story
/// are not recorded.
pub async fn view_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let story = load_visible_story(&state, story_id, &user).await?;

    if story.author.id != user.id.to_string() {
        blocking(&state.db, move |db| {
            db.view_story(&story_id.to_string(), &user.id.to_string())
        })
        .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Who saw the story. Author only.
pub async fn story_viewers(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let story = load_story(&state, story_id).await?;
    if story.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    let viewers = blocking(&state.db, move |db| db.story_viewers(&story_id.to_string())).await?;

    Ok(Json(UserListResponse {
        users: viewers.into_iter().map(mapping::person).collect(),
    }))
}

pub async fn like_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let story = load_visible_story(&state, story_id, &user).await?;

    let user_id = user.id;
    let (liked, likes) = blocking(&state.db, move |db| {
        let id = story_id.to_string();
        let liked = db.toggle_story_like(&id, &user_id.to_string())?;
        Ok((liked, db.story_likes(&[id])?))
    })
    .await?;

    if liked {
        state
            .notifier
            .notify(NewNotification {
                kind: NotificationKind::Like,
                sender_id: user.id,
                receiver_id: mapping::id(&story.author.id, "author"),
                message: Some(format!("{} liked your story", user.name)),
                redirect_to: Some(format!("/stories/{}", story.author.id)),
            })
            .await;
    }

    Ok(Json(LikeResponse {
        liked,
        likes: mapping::group_ids(likes)
            .remove(&story_id.to_string())
            .unwrap_or_default(),
    }))
}

pub async fn delete_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let story = load_story(&state, story_id).await?;
    if story.author.id != user.id.to_string() {
        return Err(ApiError::Forbidden);
    }

    if let Err(e) = state.media.delete(&[story.image]).await {
        warn!("Leaving orphaned media for story {}: {}", story_id, e);
    }

    blocking(&state.db, move |db| db.delete_story(&story_id.to_string())).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use chrono::Duration;

    fn story_at(state: &AppState, author: &AuthUser, at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .add_story(&id.to_string(), &author.id.to_string(), "/media/s.png", &timestamp(at))
            .unwrap();
        id
    }

    fn follow(state: &AppState, follower: &AuthUser, following: &AuthUser) {
        state
            .db
            .toggle_follow(
                &Uuid::new_v4().to_string(),
                &follower.id.to_string(),
                &following.id.to_string(),
            )
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stories_move_to_the_archive_after_a_day() {
        let state = test_support::state().await;
        let ada = test_support::user(&state, "ada");
        let bob = test_support::user(&state, "bob");
        let now = Utc::now();
        let fresh = story_at(&state, &ada, now - Duration::hours(1));
        let old = story_at(&state, &ada, now - Duration::hours(25));

        let cutoff = timestamp(active_cutoff(now));
        let active = state.db.active_stories_by(&ada.id.to_string(), &cutoff).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.to_string());

        let archive = state.db.archived_stories_by(&ada.id.to_string(), &cutoff).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].id, old.to_string());

        // Author can open it from the archive; others cannot see it at all
        assert!(archived_story(State(state.clone()), Path(old), Extension(ada.clone())).await.is_ok());
        let fresh_from_archive = archived_story(State(state.clone()), Path(fresh), Extension(ada.clone())).await;
        assert!(matches!(fresh_from_archive, Err(ApiError::NotFound(_))));
        let peek = view_story(State(state.clone()), Path(old), Extension(bob.clone())).await;
        assert!(matches!(peek, Err(ApiError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn feed_lists_followed_users_and_tracks_views() {
        let state = test_support::state().await;
        let ada = test_support::user(&state, "ada");
        let bob = test_support::user(&state, "bob");
        let cy = test_support::user(&state, "cy");
        follow(&state, &bob, &ada);
        follow(&state, &bob, &cy);

        let story = story_at(&state, &ada, Utc::now());
        story_at(&state, &cy, Utc::now() - Duration::hours(30));

        let cutoff = timestamp(active_cutoff(Utc::now()));
        let feed = state.db.story_feed(&bob.id.to_string(), &cutoff).unwrap();
        assert_eq!(feed.len(), 1);
        assert!(!feed[0].all_viewed);

        view_story(State(state.clone()), Path(story), Extension(bob.clone()))
            .await
            .unwrap();
        view_story(State(state.clone()), Path(story), Extension(ada.clone()))
            .await
            .unwrap();

        let feed = state.db.story_feed(&bob.id.to_string(), &cutoff).unwrap();
        assert!(feed[0].all_viewed);

        let viewers = state.db.story_viewers(&story.to_string()).unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers[0].id, bob.id.to_string());

        let not_author = story_viewers(State(state.clone()), Path(story), Extension(bob)).await;
        assert!(matches!(not_author, Err(ApiError::Forbidden)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_like_transition_notifies() {
        let state = test_support::state().await;
        let ada = test_support::user(&state, "ada");
        let bob = test_support::user(&state, "bob");
        let story = story_at(&state, &ada, Utc::now());

        for _ in 0..3 {
            like_story(State(state.clone()), Path(story), Extension(bob.clone()))
                .await
                .unwrap();
        }

        // like, unlike, like
        assert_eq!(state.notifier.count_unread(ada.id).await.unwrap(), 2);
        assert_eq!(state.db.story_likes(&[story.to_string()]).unwrap().len(), 1);
    }
}
