use chrono::{DateTime, Utc};

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// A registered Jamin member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberData {
    pub id: PrimaryKey,
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    pub instrument: Option<String>,
}

/// Login session data for authentication
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub id: PrimaryKey,
    /// The session token, or key if you will
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// The member that is logged in
    pub member: MemberData,
}

/// Whether a theme is still open for new layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeStatus {
    InProgress,
    Complete,
}

impl ThemeStatus {
    /// The exact string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Distinguishes an original theme from a layer added on top of one.
///
/// Both live in the same `themes` table, discriminated by a nullable
/// self-referential parent column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeRole {
    /// The root of a collaboration
    Original,
    /// A recording layered onto the collaboration rooted at `parent_id`
    Layer { parent_id: PrimaryKey },
}

impl ThemeRole {
    pub fn from_parent(parent_id: Option<PrimaryKey>) -> Self {
        match parent_id {
            Some(parent_id) => Self::Layer { parent_id },
            None => Self::Original,
        }
    }

    pub fn parent_id(&self) -> Option<PrimaryKey> {
        match self {
            Self::Original => None,
            Self::Layer { parent_id } => Some(*parent_id),
        }
    }

    pub fn is_layer(&self) -> bool {
        matches!(self, Self::Layer { .. })
    }
}

/// A row in the `themes` table, either an original theme or a layer.
///
/// Invariant: `recording_url` is never empty, uploads are mandatory and
/// enforced before insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeData {
    pub id: PrimaryKey,
    pub creator: MemberData,
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub key_signature: Option<String>,
    pub mode: Option<String>,
    pub chords: Option<String>,
    pub scale: Option<String>,
    /// Tempo in beats per minute
    pub tempo: Option<i32>,
    pub duration_seconds: i32,
    pub recording_url: String,
    pub instrument: Option<String>,
    pub status: ThemeStatus,
    pub role: ThemeRole,
    pub created_at: DateTime<Utc>,
}

/// A layer joined to the collaboration root it belongs to, as returned by
/// [crate::Database::list_layer_rows]. Both sides carry their creator.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerJoinRow {
    pub layer: ThemeData,
    pub parent: ThemeData,
}
