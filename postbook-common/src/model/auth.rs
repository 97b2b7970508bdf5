use crate::model::user::User;
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use serde::{
    Deserialize, Deserializer,
    de::{Error, Unexpected},
};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

pub const PASSWORD_SALT_LEN: usize = 16;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing password failed: {0}")]
pub struct PasswordHashError(password_hash::Error);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The password is empty")]
pub struct EmptyPasswordError;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The stored password hash is not a valid PHC string")]
pub struct InvalidPasswordHashError;

/// A plaintext password as received from a client.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Password(String);

/// An argon2 PHC string. This is the only form in which passwords are stored.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PasswordHash(String);

/// A user together with their stored password hash, used only to check a login.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Credentials {
    pub user: User,
    pub password_hash: PasswordHash,
}

impl Password {
    pub fn new(password: String) -> Result<Self, EmptyPasswordError> {
        if password.is_empty() {
            Err(EmptyPasswordError)
        } else {
            Ok(Self(password))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> Result<PasswordHash, PasswordHashError> {
        let salt_bytes: [u8; PASSWORD_SALT_LEN] = rand::random();
        let salt = SaltString::encode_b64(&salt_bytes).map_err(PasswordHashError)?;

        let hash = Argon2::default()
            .hash_password(self.0.as_bytes(), &salt)
            .map_err(PasswordHashError)?;

        Ok(PasswordHash(hash.to_string()))
    }
}

impl PasswordHash {
    pub fn new(hash: String) -> Result<Self, InvalidPasswordHashError> {
        password_hash::PasswordHash::new(&hash).map_err(|_| InvalidPasswordHashError)?;

        Ok(Self(hash))
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    /// Checks `password` against this hash. The comparison itself is done by
    /// argon2 and does not short-circuit on the first differing byte.
    #[must_use]
    pub fn verify(&self, password: &Password) -> bool {
        password_hash::PasswordHash::new(&self.0).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.0.as_bytes(), &parsed)
                .is_ok()
        })
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Password::new(inner)
            .map_err(|_| Error::invalid_value(Unexpected::Str(""), &"a non-empty password"))
    }
}

impl Debug for Password {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Password").field(&"[redacted]").finish()
    }
}

impl Debug for PasswordHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordHash").field(&"[redacted]").finish()
    }
}
