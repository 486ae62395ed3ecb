use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::info;
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::{TakenField, UserRow};
use murmur_gateway::dispatcher::Dispatcher;
use murmur_types::api::{
    AuthResponse, Claims, LoginRequest, Profile, RegisterRequest, UpdatePasswordRequest,
};

use crate::blocking;
use crate::error::ApiError;
use crate::mapping;
use crate::media::MediaStore;
use crate::messages::Conversations;
use crate::middleware::AuthUser;
use crate::notifications::Notifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub notifier: Notifier,
    pub conversations: Conversations,
    pub media: MediaStore,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Wire the coordinators to a shared store and hub.
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, media: MediaStore, jwt_secret: String) -> Self {
        Self {
            notifier: Notifier::new(db.clone(), dispatcher.clone()),
            conversations: Conversations::new(db.clone(), dispatcher.clone()),
            db,
            dispatcher,
            media,
            jwt_secret,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (email, name) = identity(&req.email, &req.name)?;
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let taken = {
        let (email, name) = (email.clone(), name.clone());
        blocking(&state.db, move |db| db.registered_field(&email, &name, None)).await?
    };
    if let Some(field) = taken {
        return Err(already_registered(field));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();
    let row = insert_user(&state, user_id, email, name, password_hash, req.bio, req.gender).await?;

    let token = create_token(&state.jwt_secret, user_id)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: profile(row),
            token,
        }),
    ))
}

/// Insert an account. Losing a registration race to the same email or name
/// is a `Conflict`, not an internal error.
async fn insert_user(
    state: &AppState,
    user_id: Uuid,
    email: String,
    name: String,
    password_hash: String,
    bio: Option<String>,
    gender: Option<String>,
) -> Result<UserRow, ApiError> {
    blocking(&state.db, move |db| {
        let id = user_id.to_string();
        let created = db.create_user(
            &id,
            &email,
            &name,
            &password_hash,
            bio.as_deref(),
            gender.as_deref(),
        );
        if let Err(conflict) = unique_or_conflict(created)? {
            return Ok(Err(conflict));
        }
        db.get_user_by_id(&id)?
            .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", id))
            .map(Ok)
    })
    .await?
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = blocking(&state.db, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if !password_matches(&user, &req.password)? {
        return Err(ApiError::Unauthorized);
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id)?;

    Ok(Json(AuthResponse {
        user: profile(user),
        token,
    }))
}

/// Change the caller's password after checking the current one.
pub async fn update_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    if req.old_password.is_empty() || req.new_password.is_empty() || req.confirm_password.is_empty() {
        return Err(ApiError::Validation("all password fields are required".into()));
    }
    if req.new_password != req.confirm_password {
        return Err(ApiError::Validation("new passwords do not match".into()));
    }
    if req.new_password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let id = user.id.to_string();
    let row = {
        let id = id.clone();
        blocking(&state.db, move |db| db.get_user_by_id(&id))
            .await?
            .ok_or(ApiError::NotFound("user"))?
    };
    if !password_matches(&row, &req.old_password)? {
        return Err(ApiError::Validation("old password is incorrect".into()));
    }

    let password_hash = hash_password(&req.new_password)?;
    blocking(&state.db, move |db| db.update_password(&id, &password_hash)).await?;
    info!("user {} changed their password", user.id);

    Ok(StatusCode::NO_CONTENT)
}

/// Normalized `(email, name)` for an account, validated.
pub(crate) fn identity(email: &str, name: &str) -> Result<(String, String), ApiError> {
    let email = email.trim().to_lowercase();
    let name = name.trim().to_string();

    if !email.contains('@') {
        return Err(ApiError::Validation("a valid email is required".into()));
    }
    if name.len() < 3 || name.len() > 32 {
        return Err(ApiError::Validation("name must be 3 to 32 characters".into()));
    }
    Ok((email, name))
}

pub(crate) fn taken_message(field: TakenField) -> &'static str {
    match field {
        TakenField::Email => "email already registered",
        TakenField::Name => "name already registered",
    }
}

pub(crate) fn already_registered(field: TakenField) -> ApiError {
    ApiError::Conflict(taken_message(field).into())
}

/// Maps a unique-constraint failure on the users table to `Conflict` and
/// lets every other store error propagate.
pub(crate) fn unique_or_conflict<T>(result: anyhow::Result<T>) -> anyhow::Result<Result<T, ApiError>> {
    match result {
        Err(e) if murmur_db::is_constraint_violation(&e) => Ok(Err(ApiError::Conflict(
            "email or name already registered".into(),
        ))),
        other => other.map(Ok),
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn password_matches(user: &UserRow, password: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for '{}' is unreadable: {}", user.id, e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub(crate) fn profile(row: UserRow) -> Profile {
    Profile {
        id: mapping::id(&row.id, "user"),
        email: row.email,
        name: row.name,
        image: row.image,
        role: row.role,
        is_verified: row.is_verified,
    }
}

pub fn create_token(secret: &str, user_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a token and return the user id it was issued for.
pub fn verify_token(secret: &str, token: &str) -> Result<Uuid, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| ApiError::Unauthorized)
}
