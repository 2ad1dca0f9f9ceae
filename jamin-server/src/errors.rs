use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use thiserror::Error;
use jamin_collab::{AuthError, CollabError, DatabaseError, MixError, StorageError, ThemeError};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Malformed multipart request")]
    MalformedRequest,
    #[error("Only the creator can modify this theme")]
    NotOwner,
    #[error("A theme that still has layers cannot be deleted")]
    HasLayers,
    #[error("The audio processor is unavailable")]
    MixerUnavailable,
    #[error("Mixing failed")]
    MixFailed,
    #[error("Storage is unavailable")]
    StorageUnavailable,
    #[error("Internal server error")]
    Unknown,
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials => StatusCode::BAD_REQUEST,
            Self::MalformedRequest => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NotOwner => StatusCode::FORBIDDEN,
            Self::HasLayers => StatusCode::CONFLICT,
            Self::MixerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::MixFailed => StatusCode::BAD_GATEWAY,
            Self::StorageUnavailable => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::Db(e) => e.into(),
            e => {
                error!("Unexpected auth failure: {e}");
                Self::Unknown
            }
        }
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            // Internal details are logged, never surfaced to clients
            e => {
                error!("Database failure: {e}");
                Self::Unknown
            }
        }
    }
}

impl From<ThemeError> for ServerError {
    fn from(value: ThemeError) -> Self {
        match value {
            ThemeError::NotOwner => Self::NotOwner,
            ThemeError::HasLayers => Self::HasLayers,
            ThemeError::Storage(e) => e.into(),
            ThemeError::Db(e) => e.into(),
        }
    }
}

impl From<CollabError> for ServerError {
    fn from(value: CollabError) -> Self {
        match value {
            CollabError::NotFound(_) => Self::NotFound {
                resource: "collaboration",
                identifier: "layer id",
            },
            CollabError::Db(e) => e.into(),
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(_) => Self::NotFound {
                resource: "recording",
                identifier: "key",
            },
            e => {
                error!("Storage failure: {e}");
                Self::StorageUnavailable
            }
        }
    }
}

impl From<MixError> for ServerError {
    fn from(value: MixError) -> Self {
        match value {
            MixError::BinaryUnavailable(_) => Self::MixerUnavailable,
            // The pipeline already logged the failure with context
            _ => Self::MixFailed,
        }
    }
}
