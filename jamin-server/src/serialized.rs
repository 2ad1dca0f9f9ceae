//! All schemas that are exposed from endpoints are defined here
//! along with the conversion impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use jamin_collab::{
    CollabSnapshot, FieldErrors, MemberData, Participant as CollabParticipant, PrimaryKey,
    SessionData, ThemeData,
};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Member {
    id: PrimaryKey,
    username: String,
    email: String,
    display_name: String,
    avatar_url: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    country: Option<String>,
    instrument: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResult {
    token: String,
    member: Member,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Theme {
    id: PrimaryKey,
    title: String,
    description: Option<String>,
    genre: Option<String>,
    key_signature: Option<String>,
    mode: Option<String>,
    chords: Option<String>,
    scale: Option<String>,
    tempo: Option<i32>,
    duration_seconds: i32,
    recording_url: String,
    instrument: Option<String>,
    status: String,
    parent_id: Option<PrimaryKey>,
    created_at: DateTime<Utc>,
    creator: Member,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Participant {
    id: PrimaryKey,
    display_name: String,
    avatar_url: Option<String>,
}

/// A collaboration as it existed after a particular layer was added. The
/// top-level display fields come from that layer.
#[derive(Debug, Serialize, ToSchema)]
pub struct Collaboration {
    id: PrimaryKey,
    title: String,
    instrument: Option<String>,
    recording_url: String,
    created_at: DateTime<Utc>,
    theme: Theme,
    layers: Vec<Theme>,
    participants: Vec<Participant>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignedRecording {
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MixResult {
    pub url: String,
}

/// The outcome of a theme or layer submission, rendered inline by the
/// submitting form
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// For layers, the collaboration root to navigate back to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_id: Option<PrimaryKey>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<Member> for MemberData {
    fn to_serialized(&self) -> Member {
        Member {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            country: self.country.clone(),
            instrument: self.instrument.clone(),
        }
    }
}

impl ToSerialized<LoginResult> for SessionData {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.token.clone(),
            member: self.member.to_serialized(),
        }
    }
}

impl ToSerialized<Theme> for ThemeData {
    fn to_serialized(&self) -> Theme {
        Theme {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            genre: self.genre.clone(),
            key_signature: self.key_signature.clone(),
            mode: self.mode.clone(),
            chords: self.chords.clone(),
            scale: self.scale.clone(),
            tempo: self.tempo,
            duration_seconds: self.duration_seconds,
            recording_url: self.recording_url.clone(),
            instrument: self.instrument.clone(),
            status: self.status.as_str().to_string(),
            parent_id: self.role.parent_id(),
            created_at: self.created_at,
            creator: self.creator.to_serialized(),
        }
    }
}

impl ToSerialized<Participant> for CollabParticipant {
    fn to_serialized(&self) -> Participant {
        Participant {
            id: self.id,
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

impl ToSerialized<Collaboration> for CollabSnapshot {
    fn to_serialized(&self) -> Collaboration {
        let latest = self.latest();

        Collaboration {
            id: self.id(),
            title: latest.title.clone(),
            instrument: latest.instrument.clone(),
            recording_url: latest.recording_url.clone(),
            created_at: self.created_at(),
            theme: self.root.to_serialized(),
            layers: self.layers.to_serialized(),
            participants: self.participants.to_serialized(),
        }
    }
}
