use crate::server::ServerRouter;

mod login;
mod posts;
mod users;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(login::routes())
        .merge(posts::routes())
        .merge(users::routes())
}

/// Plain-text body of a successful update or delete.
const SUCCESS: &str = "success";
