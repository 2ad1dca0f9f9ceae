use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json,
};
use jamin_collab::{
    FieldErrors, MediaPayload, PrimaryKey, SubmissionError, ThemeData, ThemeRole, ThemeSubmission,
    UpdatedTheme,
};
use log::error;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{UpdateThemeSchema, ValidatedJson},
    serialized::{MixResult, SignedRecording, SubmissionResponse, Theme, ToSerialized},
    Router,
};

/// Recordings are a few minutes of audio at most
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[utoipa::path(
    get,
    path = "/v1/themes",
    tag = "themes",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Theme>)
    )
)]
async fn list_themes(
    _session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<Vec<Theme>>> {
    let themes = context.collab.themes.list_originals().await?;

    Ok(Json(themes.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/themes/{id}",
    tag = "themes",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Theme)
    )
)]
async fn theme(
    _session: Session,
    State(context): State<ServerContext>,
    Path(theme_id): Path<PrimaryKey>,
) -> ServerResult<Json<Theme>> {
    let theme = context.collab.themes.theme_by_id(theme_id).await?;

    Ok(Json(theme.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/themes/{id}/recording",
    tag = "themes",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SignedRecording)
    )
)]
async fn recording(
    _session: Session,
    State(context): State<ServerContext>,
    Path(theme_id): Path<PrimaryKey>,
) -> ServerResult<Json<SignedRecording>> {
    let url = context
        .collab
        .themes
        .signed_recording_url(theme_id)
        .await?;

    Ok(Json(SignedRecording { url }))
}

#[utoipa::path(
    post,
    path = "/v1/themes",
    tag = "themes",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Theme fields plus the recording"),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SubmissionResponse),
        (status = 422, body = SubmissionResponse)
    )
)]
async fn create_theme(
    session: Session,
    State(context): State<ServerContext>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<SubmissionResponse>)> {
    let (submission, errors) = read_submission(multipart).await?;

    if !errors.is_empty() {
        return Ok(submission_failure(SubmissionError::Validation(errors)));
    }

    let result = context
        .collab
        .themes
        .create_theme(&session.member(), submission)
        .await;

    Ok(submission_result(result))
}

#[utoipa::path(
    post,
    path = "/v1/themes/{id}/layers",
    tag = "themes",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Layer fields plus the recording"),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = SubmissionResponse),
        (status = 422, body = SubmissionResponse)
    )
)]
async fn create_layer(
    session: Session,
    State(context): State<ServerContext>,
    Path(theme_id): Path<PrimaryKey>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<SubmissionResponse>)> {
    let (submission, errors) = read_submission(multipart).await?;

    if !errors.is_empty() {
        return Ok(submission_failure(SubmissionError::Validation(errors)));
    }

    let result = context
        .collab
        .themes
        .create_layer(&session.member(), theme_id, submission)
        .await;

    Ok(submission_result(result))
}

#[utoipa::path(
    patch,
    path = "/v1/themes/{id}",
    tag = "themes",
    request_body = UpdateThemeSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Theme)
    )
)]
async fn update_theme(
    session: Session,
    State(context): State<ServerContext>,
    Path(theme_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<UpdateThemeSchema>,
) -> ServerResult<Json<Theme>> {
    let updated = context
        .collab
        .themes
        .update_theme(
            &session.member(),
            UpdatedTheme {
                id: theme_id,
                title: body.title,
                description: body.description,
                genre: body.genre,
                key_signature: body.key_signature,
                mode: body.mode,
                chords: body.chords,
                scale: body.scale,
                tempo: body.tempo,
                instrument: body.instrument,
                status: body.status.map(Into::into),
            },
        )
        .await?;

    Ok(Json(updated.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/themes/{id}",
    tag = "themes",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "Theme was deleted")
    )
)]
async fn delete_theme(
    session: Session,
    State(context): State<ServerContext>,
    Path(theme_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .themes
        .delete_theme(&session.member(), theme_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/themes/{id}/layers/{layer_id}/mix",
    tag = "themes",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = MixResult)
    )
)]
async fn mix_layer(
    _session: Session,
    State(context): State<ServerContext>,
    Path((theme_id, layer_id)): Path<(PrimaryKey, PrimaryKey)>,
) -> ServerResult<Json<MixResult>> {
    let layer = context.collab.themes.theme_by_id(layer_id).await?;

    let belongs_to_theme = layer.role == ThemeRole::Layer { parent_id: theme_id };
    if !belongs_to_theme {
        return Err(ServerError::NotFound {
            resource: "layer",
            identifier: "id",
        });
    }

    let theme = context.collab.themes.theme_by_id(theme_id).await?;

    let url = context
        .collab
        .mixer
        .mix(&theme.recording_url, &layer.recording_url)
        .await?;

    Ok(Json(MixResult { url }))
}

/// Collects the multipart form into a submission. Transport-level problems
/// (an unparsable tempo, a broken stream) surface as field errors next to the
/// domain validation.
async fn read_submission(
    mut multipart: Multipart,
) -> ServerResult<(ThemeSubmission, FieldErrors)> {
    let mut submission = ThemeSubmission::default();
    let mut errors = FieldErrors::new();

    while let Some(field) = next_field(&mut multipart).await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match name.as_str() {
            "recording" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);

                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        error!("Failed to read recording part: {e}");
                        ServerError::MalformedRequest
                    })?
                    .to_vec();

                submission.recording = Some(to_media_payload(bytes, content_type, file_name));
            }
            "tempo" => match read_number(field.text().await.ok()) {
                Ok(tempo) => submission.tempo = tempo,
                Err(()) => add_field_error(&mut errors, "tempo", "Tempo must be a number"),
            },
            "durationSeconds" => match read_number(field.text().await.ok()) {
                Ok(duration) => submission.duration_seconds = duration.unwrap_or_default(),
                Err(()) => {
                    add_field_error(&mut errors, "durationSeconds", "Duration must be a number")
                }
            },
            "title" => submission.title = field.text().await.unwrap_or_default(),
            "description" => submission.description = read_text(field.text().await.ok()),
            "genre" => submission.genre = read_text(field.text().await.ok()),
            "keySignature" => submission.key_signature = read_text(field.text().await.ok()),
            "mode" => submission.mode = read_text(field.text().await.ok()),
            "chords" => submission.chords = read_text(field.text().await.ok()),
            "scale" => submission.scale = read_text(field.text().await.ok()),
            "instrument" => submission.instrument = read_text(field.text().await.ok()),
            // Unknown fields are ignored, clients ship extras
            _ => {}
        }
    }

    Ok((submission, errors))
}

async fn next_field(
    multipart: &mut Multipart,
) -> ServerResult<Option<axum::extract::multipart::Field<'_>>> {
    multipart.next_field().await.map_err(|e| {
        error!("Failed to read multipart field: {e}");
        ServerError::MalformedRequest
    })
}

/// Picks the payload variant matching what the transport actually sent:
/// a named file part, a bare data-URL string, or raw bytes.
fn to_media_payload(
    bytes: Vec<u8>,
    content_type: Option<String>,
    file_name: Option<String>,
) -> MediaPayload {
    if file_name.is_none() && bytes.starts_with(b"data:") {
        return MediaPayload::DataUrl(String::from_utf8_lossy(&bytes).into_owned());
    }

    if file_name.is_none() && content_type.is_none() {
        return MediaPayload::Bytes(bytes);
    }

    MediaPayload::Blob {
        bytes,
        content_type,
        file_name,
    }
}

fn read_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn read_number(value: Option<String>) -> Result<Option<i32>, ()> {
    let Some(text) = read_text(value) else {
        return Ok(None);
    };

    text.parse().map(Some).map_err(|_| ())
}

fn add_field_error(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn submission_result(
    result: Result<ThemeData, SubmissionError>,
) -> (StatusCode, Json<SubmissionResponse>) {
    match result {
        Ok(theme) => {
            let theme_id = match theme.role {
                ThemeRole::Layer { parent_id } => parent_id,
                ThemeRole::Original => theme.id,
            };

            let response = SubmissionResponse {
                success: true,
                errors: None,
                message: None,
                theme_id: Some(theme_id),
            };

            (StatusCode::OK, Json(response))
        }
        Err(e) => submission_failure(e),
    }
}

fn submission_failure(error: SubmissionError) -> (StatusCode, Json<SubmissionResponse>) {
    let (status, errors, message) = match error {
        SubmissionError::Validation(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Some(errors),
            "Submission is invalid".to_string(),
        ),
        SubmissionError::Upload(e) => {
            error!("Recording upload failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                None,
                "Recording upload failed".to_string(),
            )
        }
        // Already logged with the orphaned key where it happened
        SubmissionError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Database error".to_string(),
        ),
    };

    let response = SubmissionResponse {
        success: false,
        errors,
        message: Some(message),
        theme_id: None,
    };

    (status, Json(response))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_themes))
        .route("/", post(create_theme))
        .route("/:id", get(theme))
        .route("/:id", patch(update_theme))
        .route("/:id", delete(delete_theme))
        .route("/:id/recording", get(recording))
        .route("/:id/layers", post(create_layer))
        .route("/:id/layers/:layer_id/mix", post(mix_layer))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[cfg(test)]
mod test {
    use jamin_collab::{MediaPayload, SubmissionError};

    use super::{read_number, submission_failure, to_media_payload};

    #[test]
    fn tempo_strings_are_coerced() {
        assert_eq!(read_number(Some("120".to_string())), Ok(Some(120)));
        assert_eq!(read_number(Some("  ".to_string())), Ok(None));
        assert_eq!(read_number(None), Ok(None));
        assert_eq!(read_number(Some("fast".to_string())), Err(()));
    }

    #[test]
    fn payload_variant_follows_the_transport_shape() {
        let as_file = to_media_payload(
            vec![1, 2, 3],
            Some("audio/wav".to_string()),
            Some("take.wav".to_string()),
        );
        assert!(matches!(as_file, MediaPayload::Blob { .. }));

        let as_data_url = to_media_payload(b"data:audio/wav;base64,AAAA".to_vec(), None, None);
        assert!(matches!(as_data_url, MediaPayload::DataUrl(_)));

        let as_bytes = to_media_payload(vec![1, 2, 3], None, None);
        assert!(matches!(as_bytes, MediaPayload::Bytes(_)));
    }

    #[test]
    fn validation_failures_keep_their_field_errors() {
        let mut errors = jamin_collab::FieldErrors::new();
        errors.insert("title".to_string(), vec!["Title is required".to_string()]);

        let (status, response) = submission_failure(SubmissionError::Validation(errors));

        assert_eq!(status, 422);
        assert!(!response.0.success);
        assert!(response.0.errors.as_ref().unwrap().contains_key("title"));
    }
}
