use crate::server::{Result, ServerError, ServerRouter, json::Json, routes::SUCCESS};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use postbook_common::model::{
    Id,
    user::{User, UserContent, UserMarker},
};
use postbook_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_users)
        .typed_post(create_user)
        .typed_get(get_user)
        .typed_put(update_user)
        .typed_delete(delete_user)
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct UserList {
    users: Vec<User>,
}

#[derive(TypedPath)]
#[typed_path("/user")]
struct UsersPath;

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/{id}", rejection(ServerError))]
struct UserPath {
    id: Id<UserMarker>,
}

async fn get_users(_: UsersPath, State(db): State<Arc<DbClient>>) -> Result<Json<UserList>> {
    let users = db.fetch_users().await?;

    Ok(Json(UserList { users }))
}

async fn create_user(
    _: UsersPath,
    State(db): State<Arc<DbClient>>,
    Json(user): Json<UserContent>,
) -> Result<Json<User>> {
    let user = db.create_user(&user).await?;

    Ok(Json(user))
}

async fn get_user(
    UserPath { id }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}

async fn update_user(
    UserPath { id }: UserPath,
    State(db): State<Arc<DbClient>>,
    Json(user): Json<UserContent>,
) -> Result<String> {
    db.update_user(id, &user)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(SUCCESS.to_owned())
}

async fn delete_user(
    UserPath { id }: UserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<String> {
    if !db.delete_user(id).await? {
        return Err(ServerError::UserByIdNotFound(id));
    }

    Ok(SUCCESS.to_owned())
}
