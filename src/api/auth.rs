use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::middleware::AuthSession;
use crate::api::state::AppState;
use crate::crypto::CredentialError;
use crate::db::{SessionRepository, User, UserRepository};
use crate::error::AppError;

/// The only message a failed login ever produces
const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub user_id: String,
    pub username: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// Validate and sanitize username
fn validate_username(username: &str) -> Result<String, AppError> {
    let trimmed = username.trim();

    if trimmed.len() < 3 || trimmed.len() > 32 {
        return Err(AppError::Validation("Username must be 3-32 characters".to_string()));
    }

    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::Validation(
            "Username must be alphanumeric, underscore, or hyphen".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

fn validate_password(password: &str, min_len: usize) -> Result<(), AppError> {
    if password.chars().count() < min_len {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            min_len
        )));
    }
    Ok(())
}

/// Derive a new stored credential off the async runtime
async fn derive_credential(state: &AppState, password: String) -> Result<String, AppError> {
    let verifier = state.verifier;
    let credential = tokio::task::spawn_blocking(move || verifier.derive(&password)).await??;
    Ok(credential.to_string())
}

/// Check `password` against the user's stored credential.
///
/// A malformed stored credential is logged and treated as a mismatch,
/// after costing the same derivation a real check would.
async fn password_matches(state: &AppState, user: &User, password: String) -> Result<bool, AppError> {
    let verifier = state.verifier;
    let stored = user.credential.clone();
    let outcome =
        tokio::task::spawn_blocking(move || verifier.verify_or_burn(&password, &stored)).await?;

    match outcome {
        Ok(matched) => Ok(matched),
        Err(CredentialError::Malformed(reason)) => {
            tracing::error!(user_id = %user.id, reason, "❌ Stored credential is malformed");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve username + password to a user, or `None` without saying which part failed
async fn authenticate(
    state: &AppState,
    username: &str,
    password: String,
) -> Result<Option<User>, AppError> {
    let Some(user) = UserRepository::get_by_username(&state.db, username).await? else {
        // Same cost as a real verification
        let verifier = state.verifier;
        tokio::task::spawn_blocking(move || verifier.burn(&password)).await??;
        return Ok(None);
    };

    if password_matches(state, &user, password).await? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let username = validate_username(&req.username)?;
    validate_password(&req.password, state.config.min_password_length)?;

    if UserRepository::get_by_username(&state.db, &username).await?.is_some() {
        return Err(AppError::Validation("Username already exists".to_string()));
    }

    let credential = derive_credential(&state, req.password).await?;
    let user = UserRepository::create(&state.db, username, &credential).await?;

    tracing::info!(user_id = %user.id, username = %user.username, "👤 User registered");

    Ok(Json(RegisterResponse {
        user_id: user.id,
        username: user.username,
    }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // A name that could never have registered fails like any other
    let username = validate_username(&req.username)
        .map_err(|_| AppError::Auth(INVALID_CREDENTIALS.to_string()))?;

    let user = authenticate(&state, &username, req.password)
        .await?
        .ok_or_else(|| {
            tracing::warn!(%username, "🔒 Failed login");
            AppError::Auth(INVALID_CREDENTIALS.to_string())
        })?;

    let session = SessionRepository::create(
        &state.db,
        user.id.clone(),
        state.config.session_expiry_hours,
    ).await?;

    tracing::info!(user_id = %user.id, "🔑 Login succeeded");

    Ok(Json(LoginResponse {
        session_token: session.token,
        expires_at: session.expires_at,
    }))
}

/// POST /api/auth/logout (requires auth)
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Result<Json<serde_json::Value>, AppError> {
    SessionRepository::delete(&state.db, &session.token).await?;

    Ok(Json(serde_json::json!({"success": true})))
}

/// GET /api/auth/me (requires auth)
pub async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Result<Json<UserInfoResponse>, AppError> {
    let user = UserRepository::get_by_id(&state.db, &session.user_id)
        .await?
        .ok_or_else(|| AppError::Internal("Session refers to a missing user".to_string()))?;

    Ok(Json(UserInfoResponse {
        user_id: user.id,
        username: user.username,
        created_at: user.created_at,
    }))
}

/// POST /api/auth/password (requires auth)
///
/// Replaces the credential and revokes every session, including this one.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_password(&req.new_password, state.config.min_password_length)?;

    let user = UserRepository::get_by_id(&state.db, &session.user_id)
        .await?
        .ok_or_else(|| AppError::Internal("Session refers to a missing user".to_string()))?;

    if !password_matches(&state, &user, req.current_password).await? {
        return Err(AppError::Auth("Current password is incorrect".to_string()));
    }

    let credential = derive_credential(&state, req.new_password).await?;

    // Both or neither: a new credential must never outlive the old sessions
    let mut tx = state.db.begin().await?;
    UserRepository::update_credential(&mut *tx, &user.id, &credential).await?;
    let revoked = SessionRepository::delete_for_user(&mut *tx, &user.id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, revoked, "🔁 Password changed");

    Ok(Json(serde_json::json!({"success": true})))
}

/// DELETE /api/auth/me (requires auth)
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = UserRepository::get_by_id(&state.db, &session.user_id)
        .await?
        .ok_or_else(|| AppError::Internal("Session refers to a missing user".to_string()))?;

    if !password_matches(&state, &user, req.password).await? {
        return Err(AppError::Auth("Password is incorrect".to_string()));
    }

    UserRepository::delete(&state.db, &user.id).await?;

    tracing::info!(user_id = %user.id, "🗑️ Account deleted");

    Ok(Json(serde_json::json!({"success": true})))
}
