use crate::model::{Id, user::UserMarker};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub body: PostBody,
    pub user_id: Id<UserMarker>,
}

/// Payload for creating a post or replacing its fields. Ids are always
/// assigned by the database, so a client-sent `id` is ignored.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct PostContent {
    pub body: PostBody,
    pub user_id: Id<UserMarker>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct PostBody(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The post body is empty")]
pub struct EmptyPostBodyError(String);

impl PostBody {
    pub fn new(body: String) -> Result<Self, EmptyPostBodyError> {
        if body.trim().is_empty() {
            Err(EmptyPostBodyError(body))
        } else {
            Ok(PostBody(body))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PostBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostBody::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"PostBody"))
    }
}
