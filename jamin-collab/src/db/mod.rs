use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) => match e {
                DatabaseError::NotFound {
                    resource: _,
                    identifier: _,
                } => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Represents a type that can fetch and store Jamin data in a database
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn member_by_id(&self, member_id: PrimaryKey) -> Result<MemberData>;
    async fn member_by_username(&self, username: &str) -> Result<MemberData>;
    async fn member_by_email(&self, email: &str) -> Result<MemberData>;
    async fn create_member(&self, new_member: NewMember) -> Result<MemberData>;
    async fn update_member(&self, updated_member: UpdatedMember) -> Result<MemberData>;

    async fn session_by_token(&self, token: &str) -> Result<SessionData>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn delete_session_by_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_sessions(&self) -> Result<()>;

    async fn theme_by_id(&self, theme_id: PrimaryKey) -> Result<ThemeData>;
    /// Lists original themes only, newest first
    async fn list_original_themes(&self) -> Result<Vec<ThemeData>>;
    async fn create_theme(&self, new_theme: NewTheme) -> Result<ThemeData>;
    async fn update_theme(&self, updated_theme: UpdatedTheme) -> Result<ThemeData>;
    async fn delete_theme(&self, theme_id: PrimaryKey) -> Result<()>;
    /// Counts the layers attached to the given original theme
    async fn count_layers(&self, parent_id: PrimaryKey) -> Result<i64>;
    /// Returns every layer joined to its collaboration root, optionally
    /// narrowed to the layers of a single root
    async fn list_layer_rows(&self, parent_id: Option<PrimaryKey>) -> Result<Vec<LayerJoinRow>>;
}

#[derive(Debug)]
pub struct NewMember {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Default)]
pub struct UpdatedMember {
    pub id: PrimaryKey,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    pub instrument: Option<String>,
}

#[derive(Debug)]
pub struct NewSession {
    pub token: String,
    pub member_id: PrimaryKey,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewTheme {
    /// The creator of the new theme or layer
    pub member_id: PrimaryKey,
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub key_signature: Option<String>,
    pub mode: Option<String>,
    pub chords: Option<String>,
    pub scale: Option<String>,
    pub tempo: Option<i32>,
    pub duration_seconds: i32,
    pub recording_url: String,
    pub instrument: Option<String>,
    pub status: ThemeStatus,
    /// Set for layers, absent for original themes
    pub parent_id: Option<PrimaryKey>,
}

#[derive(Debug, Default)]
pub struct UpdatedTheme {
    pub id: PrimaryKey,
    pub title: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub key_signature: Option<String>,
    pub mode: Option<String>,
    pub chords: Option<String>,
    pub scale: Option<String>,
    pub tempo: Option<i32>,
    pub instrument: Option<String>,
    pub status: Option<ThemeStatus>,
}
