use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Basic};
use postbook_common::model::{
    Id,
    auth::Password,
    user::{Email, User, UserMarker},
};
use postbook_db::client::DbClient;
use std::sync::Arc;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Basic>>;

/// A user whose email and password from the `Authorization: Basic` header
/// matched a stored account. Checked again on every request.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser {
    user: User,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.user.id
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?;

        // Neither can belong to a stored user, so they fail like a wrong password.
        let email = Email::new(header.username().to_owned())
            .map_err(|_| ServerError::InvalidCredentials)?;
        let password = Password::new(header.password().to_owned())
            .map_err(|_| ServerError::InvalidCredentials)?;

        let credentials = Arc::<DbClient>::from_ref(state)
            .fetch_credentials(&email)
            .await?
            .ok_or(ServerError::InvalidCredentials)?;

        if !credentials.password_hash.verify(&password) {
            debug!(user_id = %credentials.user.id, "Password mismatch");
            return Err(ServerError::InvalidCredentials);
        }

        Ok(Self {
            user: credentials.user,
        })
    }
}
