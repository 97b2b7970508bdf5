use crate::server::{Result, ServerError, ServerRouter, json::Json, routes::SUCCESS};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use postbook_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
    user::UserMarker,
};
use postbook_db::client::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_posts)
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_get(get_user_posts)
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct PostList {
    posts: Vec<Post>,
}

#[derive(TypedPath)]
#[typed_path("/post")]
struct PostsPath;

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/user/{id}", rejection(ServerError))]
struct UserPostsPath {
    id: Id<UserMarker>,
}

async fn get_posts(_: PostsPath, State(db): State<Arc<DbClient>>) -> Result<Json<PostList>> {
    let posts = db.fetch_posts().await?;

    Ok(Json(PostList { posts }))
}

async fn create_post(
    _: PostsPath,
    State(db): State<Arc<DbClient>>,
    Json(post): Json<PostContent>,
) -> Result<Json<Post>> {
    let post = db.create_post(&post).await?;

    Ok(Json(post))
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn update_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    Json(post): Json<PostContent>,
) -> Result<String> {
    db.update_post(id, &post)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(SUCCESS.to_owned())
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<String> {
    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(SUCCESS.to_owned())
}

async fn get_user_posts(
    UserPostsPath { id }: UserPostsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<PostList>> {
    let posts = db
        .fetch_user_posts(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(PostList { posts }))
}
