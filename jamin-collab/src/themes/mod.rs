use log::{info, warn};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    object_key, upload_with_retry, CollabContext, CollabEvent, Database, DatabaseError,
    MediaPayload, MemberData, NormalizedMedia, PrimaryKey, Storage, StorageError, ThemeData,
    ThemeStatus, UpdatedTheme,
};

/// Validation failures keyed by the offending form field
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Handles the submission lifecycle of themes and layers: validation, the
/// recording upload, and the row insert.
pub struct ThemeManager<Db, St> {
    context: CollabContext<Db, St>,
}

/// The outcome of a failed theme or layer submission. Validation and upload
/// failures happen before any database write.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Submission is invalid")]
    Validation(FieldErrors),
    #[error("Recording upload failed: {0}")]
    Upload(StorageError),
    #[error("Database error")]
    Database(DatabaseError),
}

/// Errors for the non-submission theme operations
#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Only the creator can modify a theme")]
    NotOwner,
    #[error("A theme that still has layers cannot be deleted")]
    HasLayers,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// A submitted theme or layer form, before validation
#[derive(Debug, Default, Clone)]
pub struct ThemeSubmission {
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub key_signature: Option<String>,
    pub mode: Option<String>,
    pub chords: Option<String>,
    pub scale: Option<String>,
    pub tempo: Option<i32>,
    pub duration_seconds: i32,
    pub instrument: Option<String>,
    pub recording: Option<MediaPayload>,
}

impl<Db, St> ThemeManager<Db, St>
where
    Db: Database,
    St: Storage,
{
    pub fn new(context: &CollabContext<Db, St>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a new original theme. The theme starts out `in progress`,
    /// waiting for other members to layer onto it.
    pub async fn create_theme(
        &self,
        member: &MemberData,
        mut submission: ThemeSubmission,
    ) -> Result<ThemeData, SubmissionError> {
        let errors = base_field_errors(&submission, false);
        if !errors.is_empty() {
            return Err(SubmissionError::Validation(errors));
        }

        let media = normalize_recording(submission.recording.take())?;
        let key = object_key("themes", None, &media.file_name);
        let recording_url = self.upload(&key, &media).await?;

        let theme = self
            .insert(member, submission, recording_url, ThemeStatus::InProgress, None, &key)
            .await?;

        info!(
            "{} uploaded a new theme \"{}\"",
            member.display_name, theme.title
        );

        self.context.emit(CollabEvent::ThemeCreated { theme_id: theme.id });

        Ok(theme)
    }

    /// Adds a layer to the collaboration rooted at `parent_id`. Layers are
    /// final recordings, so they are inserted as `complete`.
    pub async fn create_layer(
        &self,
        member: &MemberData,
        parent_id: PrimaryKey,
        mut submission: ThemeSubmission,
    ) -> Result<ThemeData, SubmissionError> {
        let mut errors = base_field_errors(&submission, true);

        match self.context.database.theme_by_id(parent_id).await {
            Ok(parent) if parent.role.is_layer() => {
                add_field_error(
                    &mut errors,
                    "theme",
                    "Layers can only be added to an original theme",
                );
            }
            Ok(_) => {}
            Err(DatabaseError::NotFound { .. }) => {
                add_field_error(&mut errors, "theme", "Parent theme doesn't exist");
            }
            Err(e) => return Err(SubmissionError::Database(e)),
        }

        if !errors.is_empty() {
            return Err(SubmissionError::Validation(errors));
        }

        let media = normalize_recording(submission.recording.take())?;
        let key = object_key("layers", Some(parent_id), &media.file_name);
        let recording_url = self.upload(&key, &media).await?;

        let layer = self
            .insert(
                member,
                submission,
                recording_url,
                ThemeStatus::Complete,
                Some(parent_id),
                &key,
            )
            .await?;

        info!(
            "{} layered \"{}\" onto theme {}",
            member.display_name, layer.title, parent_id
        );

        self.context.emit(CollabEvent::LayerCreated {
            theme_id: parent_id,
            layer_id: layer.id,
        });

        Ok(layer)
    }

    /// Updates a theme's metadata. Only the creator may do this.
    pub async fn update_theme(
        &self,
        member: &MemberData,
        updated_theme: UpdatedTheme,
    ) -> Result<ThemeData, ThemeError> {
        let theme = self.context.database.theme_by_id(updated_theme.id).await?;

        if theme.creator.id != member.id {
            return Err(ThemeError::NotOwner);
        }

        Ok(self.context.database.update_theme(updated_theme).await?)
    }

    /// Deletes a theme. Refused while layers still reference it, deleting the
    /// root of a collaboration would orphan them.
    pub async fn delete_theme(
        &self,
        member: &MemberData,
        theme_id: PrimaryKey,
    ) -> Result<(), ThemeError> {
        let theme = self.context.database.theme_by_id(theme_id).await?;

        if theme.creator.id != member.id {
            return Err(ThemeError::NotOwner);
        }

        if self.context.database.count_layers(theme_id).await? > 0 {
            return Err(ThemeError::HasLayers);
        }

        self.context.database.delete_theme(theme_id).await?;
        self.context.emit(CollabEvent::ThemeDeleted { theme_id });

        Ok(())
    }

    pub async fn theme_by_id(&self, theme_id: PrimaryKey) -> Result<ThemeData, DatabaseError> {
        self.context.database.theme_by_id(theme_id).await
    }

    pub async fn list_originals(&self) -> Result<Vec<ThemeData>, DatabaseError> {
        self.context.database.list_original_themes().await
    }

    /// Returns a short-lived signed URL for a theme's stored recording
    pub async fn signed_recording_url(&self, theme_id: PrimaryKey) -> Result<String, ThemeError> {
        let theme = self.context.database.theme_by_id(theme_id).await?;

        Ok(self.context.storage.signed_url(&theme.recording_url).await?)
    }

    async fn upload(&self, key: &str, media: &NormalizedMedia) -> Result<String, SubmissionError> {
        upload_with_retry(self.context.storage.as_ref(), key, media)
            .await
            .map_err(SubmissionError::Upload)
    }

    async fn insert(
        &self,
        member: &MemberData,
        submission: ThemeSubmission,
        recording_url: String,
        status: ThemeStatus,
        parent_id: Option<PrimaryKey>,
        key: &str,
    ) -> Result<ThemeData, SubmissionError> {
        self.context
            .database
            .create_theme(crate::NewTheme {
                member_id: member.id,
                title: submission.title.trim().to_string(),
                description: submission.description,
                genre: submission.genre,
                key_signature: submission.key_signature,
                mode: submission.mode,
                chords: submission.chords,
                scale: submission.scale,
                tempo: submission.tempo,
                duration_seconds: submission.duration_seconds,
                recording_url,
                instrument: submission.instrument,
                status,
                parent_id,
            })
            .await
            .map_err(|e| {
                // The recording is already stored at this point. The orphaned
                // object is accepted and logged instead of rolled back.
                warn!("Theme insert failed, uploaded object {key} is now orphaned: {e}");
                SubmissionError::Database(e)
            })
    }
}

fn base_field_errors(submission: &ThemeSubmission, is_layer: bool) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if submission.title.trim().is_empty() {
        add_field_error(&mut errors, "title", "Title is required");
    }

    let instrument = submission.instrument.as_deref().unwrap_or("");
    if is_layer && instrument.trim().is_empty() {
        add_field_error(&mut errors, "instrument", "Instrument is required");
    }

    if submission.recording.is_none() {
        add_field_error(&mut errors, "recording", "A recording is required");
    }

    errors
}

fn add_field_error(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn normalize_recording(recording: Option<MediaPayload>) -> Result<NormalizedMedia, SubmissionError> {
    let payload = match recording {
        Some(payload) => payload,
        // Already caught by field validation, kept for call sites that skip it
        None => {
            let mut errors = FieldErrors::new();
            add_field_error(&mut errors, "recording", "A recording is required");
            return Err(SubmissionError::Validation(errors));
        }
    };

    payload.normalize().map_err(|e| {
        let mut errors = FieldErrors::new();
        add_field_error(&mut errors, "recording", &e.to_string());
        SubmissionError::Validation(errors)
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{SubmissionError, ThemeError, ThemeManager, ThemeSubmission};
    use crate::{
        events, CollabContext, CollabEvent, Database, EventReceiver, MediaPayload, MemberData,
        MemoryDatabase, MemoryStorage, NewMember, ThemeRole, ThemeStatus,
    };

    struct Setup {
        database: Arc<MemoryDatabase>,
        storage: Arc<MemoryStorage>,
        themes: ThemeManager<MemoryDatabase, MemoryStorage>,
        events: EventReceiver,
    }

    async fn setup() -> (Setup, MemberData) {
        let database = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MemoryStorage::new());
        let (sender, receiver) = events::channel();

        let context = CollabContext {
            database: database.clone(),
            storage: storage.clone(),
            events: sender,
        };

        let member = database
            .create_member(NewMember {
                username: "ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "irrelevant".to_string(),
                display_name: "Ada".to_string(),
            })
            .await
            .unwrap();

        let setup = Setup {
            database,
            storage,
            themes: ThemeManager::new(&context),
            events: receiver,
        };

        (setup, member)
    }

    fn submission(title: &str) -> ThemeSubmission {
        ThemeSubmission {
            title: title.to_string(),
            instrument: Some("guitar".to_string()),
            duration_seconds: 30,
            recording: Some(MediaPayload::Bytes(vec![1, 2, 3, 4])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_recording_fails_without_side_effects() {
        let (setup, member) = setup().await;

        let mut invalid = submission("First light");
        invalid.recording = None;

        let result = setup.themes.create_theme(&member, invalid).await;

        let Err(SubmissionError::Validation(errors)) = result else {
            panic!("expected a validation error");
        };

        assert!(errors.contains_key("recording"));
        assert!(setup.storage.is_empty());
        assert!(setup.database.list_original_themes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_field_errors_are_reported_together() {
        let (setup, member) = setup().await;

        let result = setup
            .themes
            .create_theme(&member, ThemeSubmission::default())
            .await;

        let Err(SubmissionError::Validation(errors)) = result else {
            panic!("expected a validation error");
        };

        assert!(errors.contains_key("title"));
        assert!(errors.contains_key("recording"));
    }

    #[tokio::test]
    async fn created_themes_start_in_progress() {
        let (setup, member) = setup().await;

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();

        assert_eq!(theme.status, ThemeStatus::InProgress);
        assert_eq!(theme.role, ThemeRole::Original);
        assert!(theme.recording_url.starts_with("memory://themes/"));
        assert_eq!(setup.storage.len(), 1);
        assert_eq!(
            setup.events.try_recv().unwrap(),
            CollabEvent::ThemeCreated { theme_id: theme.id }
        );
    }

    #[tokio::test]
    async fn layers_are_complete_and_namespaced_under_their_root() {
        let (setup, member) = setup().await;

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();
        let _ = setup.events.try_recv();

        let layer = setup
            .themes
            .create_layer(&member, theme.id, submission("Bass line"))
            .await
            .unwrap();

        assert_eq!(layer.status, ThemeStatus::Complete);
        assert_eq!(layer.role, ThemeRole::Layer { parent_id: theme.id });
        assert!(layer
            .recording_url
            .starts_with(&format!("memory://layers/{}/", theme.id)));
        assert_eq!(
            setup.events.try_recv().unwrap(),
            CollabEvent::LayerCreated {
                theme_id: theme.id,
                layer_id: layer.id
            }
        );
    }

    #[tokio::test]
    async fn layers_require_an_instrument_and_a_real_parent() {
        let (setup, member) = setup().await;

        let mut incomplete = submission("Bass line");
        incomplete.instrument = None;

        let result = setup.themes.create_layer(&member, 999, incomplete).await;

        let Err(SubmissionError::Validation(errors)) = result else {
            panic!("expected a validation error");
        };

        assert!(errors.contains_key("instrument"));
        assert!(errors.contains_key("theme"));
    }

    #[tokio::test]
    async fn layers_cannot_stack_on_other_layers() {
        let (setup, member) = setup().await;

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();
        let layer = setup
            .themes
            .create_layer(&member, theme.id, submission("Bass line"))
            .await
            .unwrap();

        let result = setup
            .themes
            .create_layer(&member, layer.id, submission("Overdub"))
            .await;

        let Err(SubmissionError::Validation(errors)) = result else {
            panic!("expected a validation error");
        };

        assert!(errors.contains_key("theme"));
    }

    #[tokio::test]
    async fn uploads_survive_transient_storage_failures() {
        let (setup, member) = setup().await;
        setup.storage.fail_next(2);

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();

        assert!(!theme.recording_url.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_abort_before_any_insert() {
        let (setup, member) = setup().await;
        setup.storage.fail_next(3);

        let result = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await;

        assert!(matches!(result, Err(SubmissionError::Upload(_))));
        assert!(setup.database.list_original_themes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_creator_can_delete_and_roots_with_layers_are_kept() {
        let (setup, member) = setup().await;

        let other = setup
            .database
            .create_member(NewMember {
                username: "bo".to_string(),
                email: "bo@example.com".to_string(),
                password: "irrelevant".to_string(),
                display_name: "Bo".to_string(),
            })
            .await
            .unwrap();

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();

        let result = setup.themes.delete_theme(&other, theme.id).await;
        assert!(matches!(result, Err(ThemeError::NotOwner)));

        setup
            .themes
            .create_layer(&other, theme.id, submission("Bass line"))
            .await
            .unwrap();

        let result = setup.themes.delete_theme(&member, theme.id).await;
        assert!(matches!(result, Err(ThemeError::HasLayers)));
    }

    #[tokio::test]
    async fn signed_urls_resolve_for_stored_recordings() {
        let (setup, member) = setup().await;

        let theme = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();

        let url = setup.themes.signed_recording_url(theme.id).await.unwrap();
        assert!(url.ends_with("?signed"));
    }
}
