use super::handlers::{health, registration};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        registration::register,
        registration::resend,
        registration::verify,
    ),
    components(schemas(
        health::Health,
        registration::RegisterRequest,
        registration::ResendRequest,
        registration::VerifyRequest,
        registration::PendingResponse,
        registration::UserResponse,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "registrations", description = "Signup with email verification codes"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
