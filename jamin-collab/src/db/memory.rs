use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    Database, DatabaseError, DatabaseResult, LayerJoinRow, MemberData, NewMember, NewSession,
    NewTheme, PrimaryKey, Result, SessionData, ThemeData, ThemeRole, UpdatedMember, UpdatedTheme,
};

/// An in-memory [Database] implementation, used by tests and local
/// experimentation. Mirrors the conflict and not-found semantics of
/// [crate::PgDatabase].
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    members: Vec<MemberData>,
    themes: Vec<ThemeData>,
    sessions: Vec<SessionData>,
    next_id: PrimaryKey,
}

impl Inner {
    fn issue_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn member_by_id(&self, member_id: PrimaryKey) -> Result<MemberData> {
        self.inner
            .lock()
            .members
            .iter()
            .find(|m| m.id == member_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "member",
                identifier: "id",
            })
    }

    async fn member_by_username(&self, username: &str) -> Result<MemberData> {
        self.inner
            .lock()
            .members
            .iter()
            .find(|m| m.username == username)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "member",
                identifier: "username",
            })
    }

    async fn member_by_email(&self, email: &str) -> Result<MemberData> {
        self.inner
            .lock()
            .members
            .iter()
            .find(|m| m.email == email)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "member",
                identifier: "email",
            })
    }

    async fn create_member(&self, new_member: NewMember) -> Result<MemberData> {
        self.member_by_username(&new_member.username)
            .await
            .conflict_or_ok("member", "username", &new_member.username)?;

        self.member_by_email(&new_member.email)
            .await
            .conflict_or_ok("member", "email", &new_member.email)?;

        let mut inner = self.inner.lock();
        let member = MemberData {
            id: inner.issue_id(),
            username: new_member.username,
            email: new_member.email,
            password: new_member.password,
            display_name: new_member.display_name,
            avatar_url: None,
            first_name: None,
            last_name: None,
            country: None,
            instrument: None,
        };

        inner.members.push(member.clone());
        Ok(member)
    }

    async fn update_member(&self, updated_member: UpdatedMember) -> Result<MemberData> {
        let mut inner = self.inner.lock();
        let member = inner
            .members
            .iter_mut()
            .find(|m| m.id == updated_member.id)
            .ok_or(DatabaseError::NotFound {
                resource: "member",
                identifier: "id",
            })?;

        if let Some(display_name) = updated_member.display_name {
            member.display_name = display_name;
        }

        member.avatar_url = updated_member.avatar_url.or(member.avatar_url.take());
        member.first_name = updated_member.first_name.or(member.first_name.take());
        member.last_name = updated_member.last_name.or(member.last_name.take());
        member.country = updated_member.country.or(member.country.take());
        member.instrument = updated_member.instrument.or(member.instrument.take());

        Ok(member.clone())
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.token == token)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            })
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        let member = self.member_by_id(new_session.member_id).await?;

        let mut inner = self.inner.lock();
        let session = SessionData {
            id: inner.issue_id(),
            token: new_session.token,
            expires_at: new_session.expires_at,
            member,
        };

        inner.sessions.push(session.clone());
        Ok(session)
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        let _ = self.session_by_token(token).await?;

        self.inner.lock().sessions.retain(|s| s.token != token);
        Ok(())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        let now = Utc::now();

        self.inner.lock().sessions.retain(|s| s.expires_at > now);
        Ok(())
    }

    async fn theme_by_id(&self, theme_id: PrimaryKey) -> Result<ThemeData> {
        self.inner
            .lock()
            .themes
            .iter()
            .find(|t| t.id == theme_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "theme",
                identifier: "id",
            })
    }

    async fn list_original_themes(&self) -> Result<Vec<ThemeData>> {
        let mut themes: Vec<_> = self
            .inner
            .lock()
            .themes
            .iter()
            .filter(|t| !t.role.is_layer())
            .cloned()
            .collect();

        themes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(themes)
    }

    async fn create_theme(&self, new_theme: NewTheme) -> Result<ThemeData> {
        if let Some(parent_id) = new_theme.parent_id {
            let _ = self.theme_by_id(parent_id).await?;
        }

        let creator = self.member_by_id(new_theme.member_id).await?;

        let mut inner = self.inner.lock();
        let theme = ThemeData {
            id: inner.issue_id(),
            creator,
            title: new_theme.title,
            description: new_theme.description,
            genre: new_theme.genre,
            key_signature: new_theme.key_signature,
            mode: new_theme.mode,
            chords: new_theme.chords,
            scale: new_theme.scale,
            tempo: new_theme.tempo,
            duration_seconds: new_theme.duration_seconds,
            recording_url: new_theme.recording_url,
            instrument: new_theme.instrument,
            status: new_theme.status,
            role: ThemeRole::from_parent(new_theme.parent_id),
            created_at: Utc::now(),
        };

        inner.themes.push(theme.clone());
        Ok(theme)
    }

    async fn update_theme(&self, updated_theme: UpdatedTheme) -> Result<ThemeData> {
        let mut inner = self.inner.lock();
        let theme = inner
            .themes
            .iter_mut()
            .find(|t| t.id == updated_theme.id)
            .ok_or(DatabaseError::NotFound {
                resource: "theme",
                identifier: "id",
            })?;

        if let Some(title) = updated_theme.title {
            theme.title = title;
        }
        if let Some(status) = updated_theme.status {
            theme.status = status;
        }

        theme.description = updated_theme.description.or(theme.description.take());
        theme.genre = updated_theme.genre.or(theme.genre.take());
        theme.key_signature = updated_theme.key_signature.or(theme.key_signature.take());
        theme.mode = updated_theme.mode.or(theme.mode.take());
        theme.chords = updated_theme.chords.or(theme.chords.take());
        theme.scale = updated_theme.scale.or(theme.scale.take());
        theme.tempo = updated_theme.tempo.or(theme.tempo);
        theme.instrument = updated_theme.instrument.or(theme.instrument.take());

        Ok(theme.clone())
    }

    async fn delete_theme(&self, theme_id: PrimaryKey) -> Result<()> {
        let _ = self.theme_by_id(theme_id).await?;

        self.inner.lock().themes.retain(|t| t.id != theme_id);
        Ok(())
    }

    async fn count_layers(&self, parent_id: PrimaryKey) -> Result<i64> {
        let count = self
            .inner
            .lock()
            .themes
            .iter()
            .filter(|t| t.role.parent_id() == Some(parent_id))
            .count();

        Ok(count as i64)
    }

    async fn list_layer_rows(&self, parent_id: Option<PrimaryKey>) -> Result<Vec<LayerJoinRow>> {
        let inner = self.inner.lock();

        let mut rows = Vec::new();
        for layer in inner.themes.iter() {
            let Some(layer_parent) = layer.role.parent_id() else {
                continue;
            };

            if parent_id.is_some() && parent_id != Some(layer_parent) {
                continue;
            }

            let parent = inner
                .themes
                .iter()
                .find(|t| t.id == layer_parent)
                .cloned()
                .ok_or(DatabaseError::NotFound {
                    resource: "theme",
                    identifier: "parent_id",
                })?;

            rows.push(LayerJoinRow {
                layer: layer.clone(),
                parent,
            });
        }

        Ok(rows)
    }
}
