use crate::server::{Result, ServerRouter, auth::AuthenticatedUser};
use axum_extra::routing::{RouterExt, TypedPath};

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(login)
}

#[derive(TypedPath)]
#[typed_path("/login")]
struct LoginPath;

async fn login(_: LoginPath, user: AuthenticatedUser) -> Result<String> {
    Ok(format!("valid login for user id: {}", user.user_id()))
}
