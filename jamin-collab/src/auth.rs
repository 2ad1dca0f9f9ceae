use argon2::{
    password_hash::{Encoding, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{Duration, Utc};
use log::warn;
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    util::random_string, Database, DatabaseError, MemberData, NewMember, NewSession, SessionData,
    UpdatedMember,
};

pub struct Auth<Db> {
    db: Arc<Db>,
    argon: Argon2<'static>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
    #[error("HashError: {0}")]
    HashError(String),
}

impl<Db> Auth<Db>
where
    Db: Database,
{
    const SESSION_DURATION_IN_DAYS: usize = 7;

    pub fn new(db: &Arc<Db>) -> Self {
        Self {
            db: db.clone(),
            argon: Argon2::default(),
        }
    }

    /// Logs in a member, returning a new session
    pub async fn login(&self, credentials: Credentials) -> Result<SessionData, AuthError> {
        self.clear_expired().await;

        let member = self
            .db
            .member_by_username(&credentials.username)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound {
                    resource: _,
                    identifier: _,
                } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        let stored_password = PasswordHash::parse(&member.password, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(credentials.password.as_bytes(), &stored_password)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let expires_at = Utc::now() + Duration::days(Self::SESSION_DURATION_IN_DAYS as i64);

        let new_session = NewSession {
            token: random_string(32),
            member_id: member.id,
            expires_at,
        };

        let new_session = self
            .db
            .create_session(new_session)
            .await
            .map_err(AuthError::Db)?;

        Ok(new_session)
    }

    /// Deletes the associated session, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.db.delete_session_by_token(token).await
    }

    /// Registers a new member with a hashed password
    pub async fn register(&self, new_member: NewMember) -> Result<MemberData, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = self
            .argon
            .hash_password(new_member.password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        self.db
            .create_member(NewMember {
                username: new_member.username,
                email: new_member.email,
                password: hashed_password,
                display_name: new_member.display_name,
            })
            .await
            .map_err(AuthError::Db)
    }

    /// Updates a member's profile details
    pub async fn update_profile(
        &self,
        updated_member: UpdatedMember,
    ) -> Result<MemberData, DatabaseError> {
        self.db.update_member(updated_member).await
    }

    /// Returns a session if it exists
    pub async fn session(&self, token: &str) -> Result<SessionData, DatabaseError> {
        self.db.session_by_token(token).await
    }

    async fn clear_expired(&self) {
        if let Err(e) = self.db.clear_expired_sessions().await {
            warn!("Failed to clear expired sessions: {e}")
        }
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Auth, AuthError, Credentials};
    use crate::{MemoryDatabase, NewMember};

    fn new_member(username: &str) -> NewMember {
        NewMember {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "hunter2hunter2".to_string(),
            display_name: username.to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let db = Arc::new(MemoryDatabase::new());
        let auth = Auth::new(&db);

        let member = auth.register(new_member("mare")).await.unwrap();
        assert_ne!(member.password, "hunter2hunter2", "password must be hashed");

        let session = auth
            .login(Credentials {
                username: "mare".to_string(),
                password: "hunter2hunter2".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.member.id, member.id);

        let looked_up = auth.session(&session.token).await.unwrap();
        assert_eq!(looked_up.member.username, "mare");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let auth = Auth::new(&db);

        auth.register(new_member("june")).await.unwrap();

        let result = auth
            .login(Credentials {
                username: "june".to_string(),
                password: "not-the-password".to_string(),
            })
            .await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn logout_removes_session() {
        let db = Arc::new(MemoryDatabase::new());
        let auth = Auth::new(&db);

        auth.register(new_member("remy")).await.unwrap();
        let session = auth
            .login(Credentials {
                username: "remy".to_string(),
                password: "hunter2hunter2".to_string(),
            })
            .await
            .unwrap();

        auth.logout(&session.token).await.unwrap();
        assert!(auth.session(&session.token).await.is_err());
    }
}
