pub mod auth;
pub mod state;
pub mod middleware;

pub use state::AppState;
pub use middleware::{AuthSession, RateLimiter};

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::time::Duration;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn create_router(state: AppState) -> Router {
    // Unauthenticated endpoints that run a password derivation
    let public = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me).delete(auth::delete_account))
        .route("/api/auth/password", post(auth::change_password))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/api/health", get(health))
        .merge(public)
        .merge(protected)
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::testing::memory_pool;
    use crate::db::UserRepository;

    const INVALID_MESSAGE: &str = "Invalid username or password";

    async fn test_state() -> AppState {
        let config = Config {
            scrypt_log_n: 4,
            auth_rate_limit: 1000,
            ..Config::default()
        };
        AppState::new(memory_pool().await, Arc::new(config))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_and_login(app: &Router, username: &str, password: &str) -> String {
        let creds = json!({"username": username, "password": password});
        let (status, _) = call(app, Method::POST, "/api/auth/register", None, Some(creds.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(app, Method::POST, "/api/auth/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::OK);
        body["session_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state().await);
        let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_register_login_me_logout() {
        let app = create_router(test_state().await);
        let token = register_and_login(&app, "Amira", "Tr0ub4dor&3").await;

        let (status, body) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "amira");
        assert!(body.get("credential").is_none());

        let (status, _) = call(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stored_credential_has_expected_shape() {
        let state = test_state().await;
        let app = create_router(state.clone());
        register_and_login(&app, "khalid", "long-enough-pass").await;

        let user = UserRepository::get_by_username(&state.db, "khalid").await.unwrap().unwrap();
        let (digest, salt) = user.credential.split_once('.').unwrap();
        assert_eq!(digest.len(), 128);
        assert_eq!(salt.len(), 32);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let app = create_router(test_state().await);
        register_and_login(&app, "fatima", "correct-password").await;

        let wrong = json!({"username": "fatima", "password": "wrong-password"});
        let (status_wrong, body_wrong) =
            call(&app, Method::POST, "/api/auth/login", None, Some(wrong)).await;

        let unknown = json!({"username": "nobody", "password": "correct-password"});
        let (status_unknown, body_unknown) =
            call(&app, Method::POST, "/api/auth/login", None, Some(unknown)).await;

        assert_eq!(status_wrong, StatusCode::UNAUTHORIZED);
        assert_eq!(status_unknown, StatusCode::UNAUTHORIZED);
        assert_eq!(body_wrong, body_unknown);
        assert_eq!(body_wrong["error"], INVALID_MESSAGE);
    }

    #[tokio::test]
    async fn test_malformed_stored_credential_fails_closed() {
        let state = test_state().await;
        let app = create_router(state.clone());
        UserRepository::create(&state.db, "broken".to_string(), "not-a-valid-credential-string")
            .await
            .unwrap();

        let creds = json!({"username": "broken", "password": "anything-at-all"});
        let (status, body) = call(&app, Method::POST, "/api/auth/login", None, Some(creds)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], INVALID_MESSAGE);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = create_router(test_state().await);

        let short = json!({"username": "salma", "password": "short"});
        let (status, _) = call(&app, Method::POST, "/api/auth/register", None, Some(short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_name = json!({"username": "a b", "password": "long-enough-pass"});
        let (status, _) = call(&app, Method::POST, "/api/auth/register", None, Some(bad_name)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        register_and_login(&app, "salma", "long-enough-pass").await;
        let dup = json!({"username": "SALMA", "password": "another-pass-123"});
        let (status, body) = call(&app, Method::POST, "/api/auth/register", None, Some(dup)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Username already exists");
    }

    #[tokio::test]
    async fn test_change_password_revokes_sessions() {
        let app = create_router(test_state().await);
        let token = register_and_login(&app, "tariq", "first-password").await;

        let wrong = json!({"current_password": "not-it-at-all", "new_password": "second-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/password", Some(&token), Some(wrong)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let change = json!({"current_password": "first-password", "new_password": "second-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/password", Some(&token), Some(change)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let old = json!({"username": "tariq", "password": "first-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(old)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let new = json!({"username": "tariq", "password": "second-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(new)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_revocation_rolls_back_password_change() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let token = register_and_login(&app, "mariam", "first-password").await;

        sqlx::query(
            r#"
CREATE TRIGGER lock_sessions BEFORE DELETE ON sessions
BEGIN
    SELECT RAISE(ABORT, 'sessions are locked');
END
            "#,
        )
        .execute(&state.db)
        .await
        .unwrap();

        let change = json!({"current_password": "first-password", "new_password": "second-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/password", Some(&token), Some(change)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let old = json!({"username": "mariam", "password": "first-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(old)).await;
        assert_eq!(status, StatusCode::OK);

        let new = json!({"username": "mariam", "password": "second-password"});
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(new)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_account() {
        let app = create_router(test_state().await);
        let token = register_and_login(&app, "huda", "delete-me-please").await;

        let wrong = json!({"password": "not-my-password"});
        let (status, _) = call(&app, Method::DELETE, "/api/auth/me", Some(&token), Some(wrong)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let right = json!({"password": "delete-me-please"});
        let (status, _) = call(&app, Method::DELETE, "/api/auth/me", Some(&token), Some(right)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let creds = json!({"username": "huda", "password": "delete-me-please"});
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = create_router(test_state().await);

        let (status, _) = call(&app, Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::GET, "/api/auth/me", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_endpoints_are_rate_limited() {
        let config = Config {
            scrypt_log_n: 4,
            auth_rate_limit: 2,
            ..Config::default()
        };
        let app = create_router(AppState::new(memory_pool().await, Arc::new(config)));
        let creds = json!({"username": "ghost", "password": "whatever-pass"});

        for _ in 0..2 {
            let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(creds.clone())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _) = call(&app, Method::POST, "/api/auth/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let (status, _) = call(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
