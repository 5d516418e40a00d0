//! Registration endpoints: start, resend and verify.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::verifier::{PendingTicket, User, Verifier, VerifyError};

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct PendingResponse {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl From<PendingTicket> for PendingResponse {
    fn from(ticket: PendingTicket) -> Self {
        Self {
            email: ticket.email,
            expires_at: ticket.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

/// Map workflow failures to status codes. Internal details stay in the logs.
pub(crate) fn error_response(err: &VerifyError) -> (StatusCode, String) {
    match err {
        VerifyError::AlreadyRegistered => (StatusCode::CONFLICT, err.to_string()),
        VerifyError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
        VerifyError::InvalidCode | VerifyError::InvalidInput(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        VerifyError::ExpiredCode => (StatusCode::GONE, err.to_string()),
        VerifyError::Internal(inner) => {
            error!("registration request failed: {inner:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

/// Start a registration and send a verification code.
#[utoipa::path(
    post,
    path = "/v1/registrations",
    request_body = RegisterRequest,
    responses(
        (status = 202, description = "Verification code sent", body = PendingResponse),
        (status = 400, description = "Invalid email, username or password", body = String),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "registrations"
)]
pub async fn register(
    verifier: Extension<Arc<Verifier>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let password = SecretString::from(request.password);
    match verifier
        .register(&request.email, &request.username, &password)
        .await
    {
        Ok(ticket) => (StatusCode::ACCEPTED, Json(PendingResponse::from(ticket))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Issue a new code for a pending registration.
#[utoipa::path(
    post,
    path = "/v1/registrations/resend",
    request_body = ResendRequest,
    responses(
        (status = 202, description = "New verification code sent", body = PendingResponse),
        (status = 400, description = "Invalid email", body = String),
        (status = 404, description = "No live pending registration", body = String),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "registrations"
)]
pub async fn resend(
    verifier: Extension<Arc<Verifier>>,
    payload: Option<Json<ResendRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match verifier.resend_verification(&request.email).await {
        Ok(ticket) => (StatusCode::ACCEPTED, Json(PendingResponse::from(ticket))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Confirm a registration with the emailed code.
#[utoipa::path(
    post,
    path = "/v1/registrations/verify",
    request_body = VerifyRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid code", body = String),
        (status = 404, description = "No pending registration", body = String),
        (status = 409, description = "Email already registered", body = String),
        (status = 410, description = "Code expired", body = String)
    ),
    tag = "registrations"
)]
pub async fn verify(
    verifier: Extension<Arc<Verifier>>,
    payload: Option<Json<VerifyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match verifier.verify(&request.email, &request.code).await {
        Ok(user) => (StatusCode::CREATED, Json(UserResponse::from(user))).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}
