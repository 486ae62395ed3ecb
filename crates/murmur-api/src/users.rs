use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_db::timestamp;
use murmur_types::api::{
    AvailabilityRequest, AvailabilityResponse, FollowResponse, UpdateProfileRequest,
    UserListResponse, UserProfileResponse,
};
use murmur_types::models::{NotificationKind, active_cutoff};

use crate::auth::{
    AppState, already_registered, identity, profile, taken_message, unique_or_conflict,
};
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::middleware::AuthUser;
use crate::notifications::NewNotification;

const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct NameFilter {
    pub name: Option<String>,
}

impl NameFilter {
    fn needle(self) -> Option<String> {
        self.name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
    }
}

/// The caller's own account.
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let row = blocking(&state.db, move |db| db.get_user_by_id(&user.id.to_string()))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(profile(row)))
}

/// Edit the caller's name, email, bio, gender and picture. A new picture
/// replaces the stored one, which is then removed from the media store.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (email, name) = identity(&req.email, &req.name)?;

    let id = user.id.to_string();
    let (current, taken) = {
        let (id, email, name) = (id.clone(), email.clone(), name.clone());
        blocking(&state.db, move |db| {
            let current = db.get_user_by_id(&id)?;
            let taken = db.registered_field(&email, &name, Some(&id))?;
            Ok((current, taken))
        })
        .await?
    };
    let current = current.ok_or(ApiError::NotFound("user"))?;
    if let Some(field) = taken {
        return Err(already_registered(field));
    }

    let replacement = match req.image.as_deref().map(str::trim) {
        Some(image) if !image.is_empty() && Some(image) != current.image.as_deref() => {
            Some(state.media.upload(image).await?)
        }
        _ => None,
    };

    let updated = {
        let image = replacement.clone();
        blocking(&state.db, move |db| {
            let written = db.update_profile(
                &id,
                &name,
                &email,
                image.as_deref(),
                req.bio.as_deref(),
                req.gender.as_deref(),
            );
            if let Err(conflict) = unique_or_conflict(written)? {
                return Ok(Err(conflict));
            }
            db.get_user_by_id(&id)?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished during update", id))
                .map(Ok)
        })
        .await?
    };

    let stale = match (&updated, replacement) {
        (Ok(_), Some(_)) => current.image,
        (Err(_), fresh) => fresh,
        (Ok(_), None) => None,
    };
    if let Some(url) = stale {
        if let Err(e) = state.media.delete(&[url]).await {
            warn!("Leaving orphaned profile image for {}: {}", user.id, e);
        }
    }

    let row = updated?;
    info!("user {} updated their profile", user.id);
    Ok(Json(profile(row)))
}

/// Whether an email and name are both free for a new account.
pub async fn check_availability(
    State(state): State<AppState>,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let name = req.name.trim().to_string();
    let taken = blocking(&state.db, move |db| db.registered_field(&email, &name, None)).await?;

    Ok(Json(AvailabilityResponse {
        available: taken.is_none(),
        message: taken.map(|field| taken_message(field).to_string()),
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let cutoff = timestamp(active_cutoff(Utc::now()));
    let found = blocking(&state.db, move |db| {
        let id = user_id.to_string();
        let Some(row) = db.get_user_by_id(&id)? else {
            return Ok(None);
        };
        let (followers, following) = db.follow_counts(&id)?;
        let posts = db.count_posts_by(&id)?;
        let has_story = db.has_active_story(&id, &cutoff)?;
        Ok(Some((row, followers, following, posts, has_story)))
    })
    .await?;

    let (row, followers, following, posts, has_story) = found.ok_or(ApiError::NotFound("user"))?;

    Ok(Json(UserProfileResponse {
        id: mapping::id(&row.id, "user"),
        created_at: mapping::time(&row.created_at, "user"),
        name: row.name,
        image: row.image,
        bio: row.bio,
        gender: row.gender,
        role: row.role,
        is_verified: row.is_verified,
        followers,
        following,
        posts,
        has_story,
    }))
}

/// Case-insensitive name search, excluding the caller.
pub async fn search_users(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let needle = name.trim().to_string();
    if needle.is_empty() {
        return Err(ApiError::Validation("search term is required".into()));
    }

    let rows = blocking(&state.db, move |db| {
        db.search_users(&needle, &user.id.to_string(), SEARCH_LIMIT)
    })
    .await?;

    Ok(Json(UserListResponse {
        users: rows.into_iter().map(mapping::person).collect(),
    }))
}

/// Toggle following `user_id`. Starting to follow notifies them;
/// unfollowing is silent.
pub async fn follow(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    if user_id == user.id {
        return Err(ApiError::Validation("cannot follow yourself".into()));
    }

    let follower = user.id;
    let following = blocking(&state.db, move |db| {
        let target = user_id.to_string();
        if !db.user_exists(&target)? {
            return Ok(None);
        }
        db.toggle_follow(&Uuid::new_v4().to_string(), &follower.to_string(), &target)
            .map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    if following {
        state
            .notifier
            .notify(NewNotification {
                kind: NotificationKind::Follow,
                sender_id: user.id,
                receiver_id: user_id,
                message: Some(format!("{} started following you", user.name)),
                redirect_to: Some(format!("/profile/{}", user.id)),
            })
            .await;
    }

    Ok(Json(FollowResponse { following }))
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(filter): Query<NameFilter>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let needle = filter.needle();
    let rows = blocking(&state.db, move |db| {
        db.followers_of(&user_id.to_string(), needle.as_deref())
    })
    .await?;

    Ok(Json(UserListResponse {
        users: rows.into_iter().map(mapping::person).collect(),
    }))
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(filter): Query<NameFilter>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let needle = filter.needle();
    let rows = blocking(&state.db, move |db| {
        db.following_of(&user_id.to_string(), needle.as_deref())
    })
    .await?;

    Ok(Json(UserListResponse {
        users: rows.into_iter().map(mapping::person).collect(),
    }))
}
