//! Access tokens - issuing and verifying the bearer tokens that identify callers.
//!
//! A token carries the user id and the user's password epoch at issue time. It is
//! accepted only while the epoch still matches, so
//! [`TokenService::invalidate_tokens`] revokes everything issued before it.

use crate::{
    core::users,
    entities::user,
    errors::{Error, Result},
};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind as JwtErrorKind,
};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims embedded in an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// User's password epoch when the token was issued
    pub epoch: i64,
    /// Expiration (Unix timestamp seconds)
    pub exp: i64,
    /// Issued at (Unix timestamp seconds)
    pub iat: i64,
}

/// Issues and verifies access tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates a service signing with HS256 under `secret`.
    #[must_use]
    pub fn new(secret: &str, ttl: chrono::Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    /// Issues a token for the user.
    pub fn issue(&self, user: &user::Model) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            epoch: user.password_epoch,
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::internal(format!("Failed to sign token: {e}")))
    }

    /// Verifies signature and expiry and returns the claims.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                match e.kind() {
                    JwtErrorKind::ExpiredSignature => debug!("Token expired"),
                    _ => debug!("Token rejected: {e}"),
                }
                Error::Unauthorized
            })
    }

    /// Resolves a token to its user, rejecting tokens from an older password epoch.
    pub async fn authenticate<C>(&self, db: &C, token: &str) -> Result<user::Model>
    where
        C: ConnectionTrait,
    {
        let claims = self.decode(token)?;
        let user_id: i64 = claims.sub.parse().map_err(|_| Error::Unauthorized)?;

        let user = match users::get_user(db, user_id).await {
            Ok(user) => user,
            Err(Error::NotFound { .. }) => return Err(Error::Unauthorized),
            Err(e) => return Err(e),
        };

        if user.password_epoch != claims.epoch {
            debug!(user_id, "Token issued before the current password epoch");
            return Err(Error::Unauthorized);
        }
        Ok(user)
    }

    /// Resolves an optional `Authorization` header value.
    ///
    /// A missing header means an anonymous caller; a present but invalid one is
    /// rejected.
    pub async fn authenticate_header<C>(
        &self,
        db: &C,
        header: Option<&str>,
    ) -> Result<Option<user::Model>>
    where
        C: ConnectionTrait,
    {
        let Some(header) = header else {
            return Ok(None);
        };
        let token = extract_from_header(header).ok_or(Error::Unauthorized)?;
        self.authenticate(db, token).await.map(Some)
    }

    /// Revokes every token issued to the user so far.
    pub async fn invalidate_tokens<C>(&self, db: &C, user_id: i64) -> Result<user::Model>
    where
        C: ConnectionTrait,
    {
        users::bump_password_epoch(db, user_id).await
    }
}

/// Strips the `Bearer ` prefix from an `Authorization` header value.
#[must_use]
pub fn extract_from_header(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
