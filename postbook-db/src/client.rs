use crate::record::{CredentialsRecord, PostRecord, UserRecord};
use postbook_common::model::{
    Id, ModelValidationError,
    auth::{Credentials, PasswordHashError},
    post::{Post, PostContent, PostMarker},
    user::{Email, User, UserContent, UserMarker},
};
use sqlx::{
    SqlitePool,
    migrate::MigrateError,
    query, query_as, query_scalar,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error("A user with this email address already exists")]
    DuplicateEmail,
    #[error("A post with this body already exists")]
    DuplicatePostBody,
    #[error("Post author with id {0} does not exist")]
    UnknownAuthor(Id<UserMarker>),
}

impl DbError {
    fn from_unique_violation(err: sqlx::Error, duplicate: DbError) -> DbError {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => duplicate,
            _ => DbError::Sqlx(err),
        }
    }

    fn from_post_write(err: sqlx::Error, author: Id<UserMarker>) -> DbError {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::UnknownAuthor(author)
            }
            _ => DbError::from_unique_violation(err, DbError::DuplicatePostBody),
        }
    }
}

/// Access to the `user` and `post` tables.
///
/// Every write runs in its own transaction and is only committed once all of
/// its statements succeeded. Returning early with an error drops the
/// transaction, which rolls it back.
#[derive(Clone, Debug)]
pub struct DbClient {
    pool: SqlitePool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Opens a fresh, migrated database that lives only as long as the client.
    ///
    /// Every SQLite connection to `:memory:` sees its own database, so the pool
    /// is pinned to exactly one connection that is never recycled.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let client = Self::new(pool);
        client.migrate().await?;
        Ok(client)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>> {
        let records = query_as::<_, UserRecord>(
            r#"
            SELECT id, email, first_name, last_name
            FROM "user"
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            r#"
            SELECT id, email, first_name, last_name
            FROM "user"
            WHERE id = ?
            "#,
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_credentials(&self, email: &Email) -> Result<Option<Credentials>> {
        let record = query_as::<_, CredentialsRecord>(
            r#"
            SELECT id, email, first_name, last_name, password
            FROM "user"
            WHERE email = ?
            "#,
        )
        .bind(email.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record.map(Credentials::try_from).transpose()?;
        Ok(credentials)
    }

    pub async fn create_user(&self, user: &UserContent) -> Result<User> {
        let password_hash = user.password.hash()?;

        let mut transaction = self.pool.begin().await?;
        let record = query_as::<_, UserRecord>(
            r#"
            INSERT INTO "user" (email, first_name, last_name, password)
            VALUES (?, ?, ?, ?)
            RETURNING id, email, first_name, last_name
            "#,
        )
        .bind(user.email.get())
        .bind(user.first_name.as_deref())
        .bind(user.last_name.as_deref())
        .bind(password_hash.get())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|err| DbError::from_unique_violation(err, DbError::DuplicateEmail))?;
        transaction.commit().await?;

        debug!(user_id = record.id, "Created user");
        Ok(User::try_from(record)?)
    }

    /// Replaces every field of the user, rehashing the password.
    /// Returns `None` if no user has this id.
    pub async fn update_user(
        &self,
        user_id: Id<UserMarker>,
        user: &UserContent,
    ) -> Result<Option<User>> {
        let password_hash = user.password.hash()?;

        let mut transaction = self.pool.begin().await?;
        let record = query_as::<_, UserRecord>(
            r#"
            UPDATE "user"
            SET email = ?, first_name = ?, last_name = ?, password = ?
            WHERE id = ?
            RETURNING id, email, first_name, last_name
            "#,
        )
        .bind(user.email.get())
        .bind(user.first_name.as_deref())
        .bind(user.last_name.as_deref())
        .bind(password_hash.get())
        .bind(user_id.get())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|err| DbError::from_unique_violation(err, DbError::DuplicateEmail))?;
        transaction.commit().await?;

        if record.is_some() {
            debug!(%user_id, "Updated user");
        }
        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    /// Deletes the user together with all of their posts.
    /// Returns `false` if no user has this id.
    pub async fn delete_user(&self, user_id: Id<UserMarker>) -> Result<bool> {
        let mut transaction = self.pool.begin().await?;

        let deleted_posts = query("DELETE FROM post WHERE user_id = ?")
            .bind(user_id.get())
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        let deleted_users = query(r#"DELETE FROM "user" WHERE id = ?"#)
            .bind(user_id.get())
            .execute(&mut *transaction)
            .await?
            .rows_affected();

        if deleted_users == 0 {
            // Nothing to commit; dropping the transaction rolls it back.
            return Ok(false);
        }
        transaction.commit().await?;

        debug!(%user_id, deleted_posts, "Deleted user");
        Ok(true)
    }

    pub async fn fetch_posts(&self) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT id, body, user_id
            FROM post
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT id, body, user_id
            FROM post
            WHERE id = ?
            ",
        )
        .bind(post_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// All posts written by a user, oldest first.
    /// Returns `None` if the user does not exist.
    pub async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Option<Vec<Post>>> {
        let mut transaction = self.pool.begin().await?;

        if !Self::user_exists(&mut transaction, user_id).await? {
            return Ok(None);
        }

        let records = query_as::<_, PostRecord>(
            "
            SELECT id, body, user_id
            FROM post
            WHERE user_id = ?
            ORDER BY id
            ",
        )
        .bind(user_id.get())
        .fetch_all(&mut *transaction)
        .await?;
        transaction.commit().await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(posts))
    }

    pub async fn create_post(&self, post: &PostContent) -> Result<Post> {
        let mut transaction = self.pool.begin().await?;
        let record = query_as::<_, PostRecord>(
            "
            INSERT INTO post (body, user_id)
            VALUES (?, ?)
            RETURNING id, body, user_id
            ",
        )
        .bind(post.body.get())
        .bind(post.user_id.get())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|err| DbError::from_post_write(err, post.user_id))?;
        transaction.commit().await?;

        debug!(post_id = record.id, user_id = record.user_id, "Created post");
        Ok(Post::try_from(record)?)
    }

    /// Returns `None` if no post has this id.
    pub async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        post: &PostContent,
    ) -> Result<Option<Post>> {
        let mut transaction = self.pool.begin().await?;
        let record = query_as::<_, PostRecord>(
            "
            UPDATE post
            SET body = ?, user_id = ?
            WHERE id = ?
            RETURNING id, body, user_id
            ",
        )
        .bind(post.body.get())
        .bind(post.user_id.get())
        .bind(post_id.get())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|err| DbError::from_post_write(err, post.user_id))?;
        transaction.commit().await?;

        if record.is_some() {
            debug!(%post_id, "Updated post");
        }
        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// Returns `false` if no post has this id.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let mut transaction = self.pool.begin().await?;

        let deleted = query("DELETE FROM post WHERE id = ?")
            .bind(post_id.get())
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        transaction.commit().await?;

        if deleted > 0 {
            debug!(%post_id, "Deleted post");
        }
        Ok(deleted > 0)
    }

    async fn user_exists(
        transaction: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: Id<UserMarker>,
    ) -> Result<bool> {
        let found = query_scalar::<_, i64>(r#"SELECT id FROM "user" WHERE id = ?"#)
            .bind(user_id.get())
            .fetch_optional(&mut **transaction)
            .await?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{DbClient, DbError};
    use postbook_common::model::{
        Id,
        auth::Password,
        post::{PostBody, PostContent},
        user::{Email, UserContent, UserMarker},
    };

    fn user_content(email: &str, password: &str) -> UserContent {
        UserContent {
            email: Email::new(email.to_owned()).unwrap(),
            password: Password::new(password.to_owned()).unwrap(),
            first_name: None,
            last_name: None,
        }
    }

    fn post_content(body: &str, user_id: Id<UserMarker>) -> PostContent {
        PostContent {
            body: PostBody::new(body.to_owned()).unwrap(),
            user_id,
        }
    }

    #[tokio::test]
    async fn user_crud() {
        let db = DbClient::connect_in_memory().await.unwrap();

        let mut content = user_content("a@b.com", "pw");
        content.first_name = Some("Ada".to_owned());
        let user = db.create_user(&content).await.unwrap();
        assert_eq!(user.id, Id::new(1));
        assert_eq!(user.email.get(), "a@b.com");
        assert_eq!(user.first_name.as_deref(), Some("Ada"));

        assert_eq!(db.fetch_user(user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(db.fetch_users().await.unwrap(), vec![user.clone()]);

        let updated = db
            .update_user(user.id, &user_content("c@d.com", "pw2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, user.id);
        assert_eq!(updated.email.get(), "c@d.com");
        assert_eq!(updated.first_name, None);

        assert!(db.delete_user(user.id).await.unwrap());
        assert_eq!(db.fetch_user(user.id).await.unwrap(), None);
        assert!(!db.delete_user(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn missing_rows_are_none() {
        let db = DbClient::connect_in_memory().await.unwrap();

        assert_eq!(db.fetch_user(Id::new(1)).await.unwrap(), None);
        assert_eq!(db.fetch_post(Id::new(1)).await.unwrap(), None);
        assert_eq!(db.fetch_user_posts(Id::new(1)).await.unwrap(), None);
        assert_eq!(
            db.update_user(Id::new(1), &user_content("a@b.com", "pw"))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            db.update_post(Id::new(1), &post_content("hello", Id::new(1)))
                .await
                .unwrap(),
            None
        );
        assert!(!db.delete_post(Id::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn credentials_check_password() {
        let db = DbClient::connect_in_memory().await.unwrap();
        let user = db.create_user(&user_content("a@b.com", "pw")).await.unwrap();

        let email = Email::new("a@b.com".to_owned()).unwrap();
        let credentials = db.fetch_credentials(&email).await.unwrap().unwrap();
        assert_eq!(credentials.user, user);
        assert!(
            credentials
                .password_hash
                .verify(&Password::new("pw".to_owned()).unwrap())
        );
        assert!(
            !credentials
                .password_hash
                .verify(&Password::new("wrong".to_owned()).unwrap())
        );

        let unknown = Email::new("x@y.com".to_owned()).unwrap();
        assert!(db.fetch_credentials(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let db = DbClient::connect_in_memory().await.unwrap();
        db.create_user(&user_content("a@b.com", "pw")).await.unwrap();
        let other = db.create_user(&user_content("c@d.com", "pw")).await.unwrap();

        let err = db
            .create_user(&user_content("a@b.com", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateEmail), "{err:?}");

        let err = db
            .update_user(other.id, &user_content("a@b.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateEmail), "{err:?}");
        assert_eq!(db.fetch_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn post_crud() {
        let db = DbClient::connect_in_memory().await.unwrap();
        let author = db.create_user(&user_content("a@b.com", "pw")).await.unwrap();
        let other = db.create_user(&user_content("c@d.com", "pw")).await.unwrap();

        let post = db
            .create_post(&post_content("hello", author.id))
            .await
            .unwrap();
        assert_eq!(post.body.get(), "hello");
        assert_eq!(post.user_id, author.id);
        assert_eq!(db.fetch_post(post.id).await.unwrap(), Some(post.clone()));
        assert_eq!(db.fetch_posts().await.unwrap(), vec![post.clone()]);

        let moved = db
            .update_post(post.id, &post_content("hello again", other.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.id, post.id);
        assert_eq!(moved.body.get(), "hello again");
        assert_eq!(db.fetch_user_posts(author.id).await.unwrap(), Some(vec![]));
        assert_eq!(
            db.fetch_user_posts(other.id).await.unwrap(),
            Some(vec![moved])
        );

        assert!(db.delete_post(post.id).await.unwrap());
        assert!(db.fetch_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_post_body_conflicts() {
        let db = DbClient::connect_in_memory().await.unwrap();
        let author = db.create_user(&user_content("a@b.com", "pw")).await.unwrap();

        let first = db
            .create_post(&post_content("hello", author.id))
            .await
            .unwrap();
        let second = db
            .create_post(&post_content("world", author.id))
            .await
            .unwrap();

        let err = db
            .create_post(&post_content("hello", author.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicatePostBody), "{err:?}");

        let err = db
            .update_post(second.id, &post_content("hello", author.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicatePostBody), "{err:?}");

        assert_eq!(db.fetch_posts().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn post_needs_existing_author() {
        let db = DbClient::connect_in_memory().await.unwrap();

        let err = db
            .create_post(&post_content("hello", Id::new(7)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownAuthor(id) if id == Id::new(7)), "{err:?}");
        assert!(db.fetch_posts().await.unwrap().is_empty());

        let author = db.create_user(&user_content("a@b.com", "pw")).await.unwrap();
        let post = db
            .create_post(&post_content("hello", author.id))
            .await
            .unwrap();
        let err = db
            .update_post(post.id, &post_content("hello", Id::new(7)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownAuthor(id) if id == Id::new(7)), "{err:?}");
        assert_eq!(db.fetch_post(post.id).await.unwrap(), Some(post));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_post_writes_wait_for_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("postbook.db").display());
        let db = DbClient::connect(&url, 5).await.unwrap();
        db.migrate().await.unwrap();
        let author_id = db
            .create_user(&user_content("a@b.com", "pw"))
            .await
            .unwrap()
            .id;

        let mut writes = tokio::task::JoinSet::new();
        for i in 0..100 {
            let db = db.clone();
            writes.spawn(async move {
                let post = db
                    .create_post(&post_content(&format!("post {i}"), author_id))
                    .await?;
                let edited = post_content(&format!("edited {i}"), author_id);
                db.update_post(post.id, &edited).await
            });
        }
        while let Some(write) = writes.join_next().await {
            let updated = write.unwrap().unwrap();
            assert!(updated.is_some());
        }

        let posts = db.fetch_user_posts(author_id).await.unwrap().unwrap();
        assert_eq!(posts.len(), 100);
        assert!(posts.iter().all(|post| post.body.get().starts_with("edited ")));
    }

    #[tokio::test]
    async fn deleting_user_deletes_their_posts() {
        let db = DbClient::connect_in_memory().await.unwrap();
        let author = db.create_user(&user_content("a@b.com", "pw")).await.unwrap();
        let other = db.create_user(&user_content("c@d.com", "pw")).await.unwrap();

        db.create_post(&post_content("first", author.id))
            .await
            .unwrap();
        db.create_post(&post_content("second", author.id))
            .await
            .unwrap();
        let kept = db
            .create_post(&post_content("third", other.id))
            .await
            .unwrap();

        assert!(db.delete_user(author.id).await.unwrap());
        assert_eq!(db.fetch_posts().await.unwrap(), vec![kept]);
        assert_eq!(db.fetch_user_posts(author.id).await.unwrap(), None);
    }
}
