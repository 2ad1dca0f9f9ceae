use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, query, query_as, query_scalar, Error as SqlxError, FromRow, PgPool};

use crate::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, LayerJoinRow, MemberData,
    NewMember, NewSession, NewTheme, PrimaryKey, Result, SessionData, ThemeData, ThemeRole,
    ThemeStatus, UpdatedMember, UpdatedTheme,
};

/// A postgres database implementation for Jamin
pub struct PgDatabase {
    pool: PgPool,
}

const MEMBER_COLUMNS: &str = "
    id, username, email, password, display_name,
    avatar_url, first_name, last_name, country, instrument";

const THEME_SELECT: &str = "
    SELECT
        themes.id, themes.member_id, themes.title, themes.description, themes.genre,
        themes.key_signature, themes.mode, themes.chords, themes.scale, themes.tempo,
        themes.duration_seconds, themes.recording_url, themes.instrument, themes.status,
        themes.parent_id, themes.created_at,
        members.username AS creator_username,
        members.email AS creator_email,
        members.password AS creator_password,
        members.display_name AS creator_display_name,
        members.avatar_url AS creator_avatar_url,
        members.first_name AS creator_first_name,
        members.last_name AS creator_last_name,
        members.country AS creator_country,
        members.instrument AS creator_instrument
    FROM themes
        INNER JOIN members ON themes.member_id = members.id";

#[derive(FromRow)]
struct MemberRow {
    id: PrimaryKey,
    username: String,
    email: String,
    password: String,
    display_name: String,
    avatar_url: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    country: Option<String>,
    instrument: Option<String>,
}

impl From<MemberRow> for MemberData {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password: row.password,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            first_name: row.first_name,
            last_name: row.last_name,
            country: row.country,
            instrument: row.instrument,
        }
    }
}

#[derive(FromRow)]
struct ThemeRow {
    id: PrimaryKey,
    member_id: PrimaryKey,
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
    creator_username: String,
    creator_email: String,
    creator_password: String,
    creator_display_name: String,
    creator_avatar_url: Option<String>,
    creator_first_name: Option<String>,
    creator_last_name: Option<String>,
    creator_country: Option<String>,
    creator_instrument: Option<String>,
}

impl ThemeRow {
    fn into_data(self) -> Result<ThemeData> {
        let status = ThemeStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::Internal(format!("unknown theme status '{}'", self.status).into())
        })?;

        Ok(ThemeData {
            id: self.id,
            creator: MemberData {
                id: self.member_id,
                username: self.creator_username,
                email: self.creator_email,
                password: self.creator_password,
                display_name: self.creator_display_name,
                avatar_url: self.creator_avatar_url,
                first_name: self.creator_first_name,
                last_name: self.creator_last_name,
                country: self.creator_country,
                instrument: self.creator_instrument,
            },
            title: self.title,
            description: self.description,
            genre: self.genre,
            key_signature: self.key_signature,
            mode: self.mode,
            chords: self.chords,
            scale: self.scale,
            tempo: self.tempo,
            duration_seconds: self.duration_seconds,
            recording_url: self.recording_url,
            instrument: self.instrument,
            status,
            role: ThemeRole::from_parent(self.parent_id),
            created_at: self.created_at,
        })
    }
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn member_by_id(&self, member_id: PrimaryKey) -> Result<MemberData> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1");

        query_as::<_, MemberRow>(&sql)
            .bind(member_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("member", "id"))
    }

    async fn member_by_username(&self, username: &str) -> Result<MemberData> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE username = $1");

        query_as::<_, MemberRow>(&sql)
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("member", "username"))
    }

    async fn member_by_email(&self, email: &str) -> Result<MemberData> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE email = $1");

        query_as::<_, MemberRow>(&sql)
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("member", "email"))
    }

    async fn create_member(&self, new_member: NewMember) -> Result<MemberData> {
        self.member_by_username(&new_member.username)
            .await
            .conflict_or_ok("member", "username", &new_member.username)?;

        self.member_by_email(&new_member.email)
            .await
            .conflict_or_ok("member", "email", &new_member.email)?;

        let sql = format!(
            "INSERT INTO members (username, email, password, display_name)
             VALUES ($1, $2, $3, $4)
             RETURNING {MEMBER_COLUMNS}"
        );

        query_as::<_, MemberRow>(&sql)
            .bind(&new_member.username)
            .bind(&new_member.email)
            .bind(&new_member.password)
            .bind(&new_member.display_name)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.any())
    }

    async fn update_member(&self, updated_member: UpdatedMember) -> Result<MemberData> {
        let member = self.member_by_id(updated_member.id).await?;

        query(
            "UPDATE members SET
                display_name = $1,
                avatar_url = $2,
                first_name = $3,
                last_name = $4,
                country = $5,
                instrument = $6
            WHERE id = $7",
        )
        .bind(updated_member.display_name.unwrap_or(member.display_name))
        .bind(updated_member.avatar_url.or(member.avatar_url))
        .bind(updated_member.first_name.or(member.first_name))
        .bind(updated_member.last_name.or(member.last_name))
        .bind(updated_member.country.or(member.country))
        .bind(updated_member.instrument.or(member.instrument))
        .bind(updated_member.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.member_by_id(updated_member.id).await
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        #[derive(FromRow)]
        struct SessionRow {
            id: PrimaryKey,
            token: String,
            expires_at: DateTime<Utc>,
            member_id: PrimaryKey,
        }

        let row = query_as::<_, SessionRow>(
            "SELECT id, token, expires_at, member_id FROM sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("session", "token"))?;

        let member = self.member_by_id(row.member_id).await?;

        Ok(SessionData {
            id: row.id,
            token: row.token,
            expires_at: row.expires_at,
            member,
        })
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        let token: String = query_scalar(
            "INSERT INTO sessions (token, member_id, expires_at) VALUES ($1, $2, $3) RETURNING token",
        )
        .bind(&new_session.token)
        .bind(new_session.member_id)
        .bind(new_session.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.session_by_token(&token).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        // Ensure session exists
        let _ = self.session_by_token(token).await?;

        query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        query("DELETE FROM sessions WHERE timezone('UTC', now()) > expires_at")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn theme_by_id(&self, theme_id: PrimaryKey) -> Result<ThemeData> {
        let sql = format!("{THEME_SELECT} WHERE themes.id = $1");

        query_as::<_, ThemeRow>(&sql)
            .bind(theme_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("theme", "id"))?
            .into_data()
    }

    async fn list_original_themes(&self) -> Result<Vec<ThemeData>> {
        let sql = format!(
            "{THEME_SELECT} WHERE themes.parent_id IS NULL ORDER BY themes.created_at DESC"
        );

        query_as::<_, ThemeRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .into_iter()
            .map(ThemeRow::into_data)
            .collect()
    }

    async fn create_theme(&self, new_theme: NewTheme) -> Result<ThemeData> {
        // Layers must reference an existing original
        if let Some(parent_id) = new_theme.parent_id {
            let _ = self.theme_by_id(parent_id).await?;
        }

        let id: PrimaryKey = query_scalar(
            "INSERT INTO themes (
                member_id, title, description, genre, key_signature, mode, chords,
                scale, tempo, duration_seconds, recording_url, instrument, status, parent_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id",
        )
        .bind(new_theme.member_id)
        .bind(&new_theme.title)
        .bind(&new_theme.description)
        .bind(&new_theme.genre)
        .bind(&new_theme.key_signature)
        .bind(&new_theme.mode)
        .bind(&new_theme.chords)
        .bind(&new_theme.scale)
        .bind(new_theme.tempo)
        .bind(new_theme.duration_seconds)
        .bind(&new_theme.recording_url)
        .bind(&new_theme.instrument)
        .bind(new_theme.status.as_str())
        .bind(new_theme.parent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.theme_by_id(id).await
    }

    async fn update_theme(&self, updated_theme: UpdatedTheme) -> Result<ThemeData> {
        let theme = self.theme_by_id(updated_theme.id).await?;

        query(
            "UPDATE themes SET
                title = $1,
                description = $2,
                genre = $3,
                key_signature = $4,
                mode = $5,
                chords = $6,
                scale = $7,
                tempo = $8,
                instrument = $9,
                status = $10
            WHERE id = $11",
        )
        .bind(updated_theme.title.unwrap_or(theme.title))
        .bind(updated_theme.description.or(theme.description))
        .bind(updated_theme.genre.or(theme.genre))
        .bind(updated_theme.key_signature.or(theme.key_signature))
        .bind(updated_theme.mode.or(theme.mode))
        .bind(updated_theme.chords.or(theme.chords))
        .bind(updated_theme.scale.or(theme.scale))
        .bind(updated_theme.tempo.or(theme.tempo))
        .bind(updated_theme.instrument.or(theme.instrument))
        .bind(updated_theme.status.unwrap_or(theme.status).as_str())
        .bind(updated_theme.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.theme_by_id(updated_theme.id).await
    }

    async fn delete_theme(&self, theme_id: PrimaryKey) -> Result<()> {
        // Ensure theme exists
        let _ = self.theme_by_id(theme_id).await?;

        query("DELETE FROM themes WHERE id = $1")
            .bind(theme_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn count_layers(&self, parent_id: PrimaryKey) -> Result<i64> {
        query_scalar("SELECT COUNT(*) FROM themes WHERE parent_id = $1")
            .bind(parent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn list_layer_rows(&self, parent_id: Option<PrimaryKey>) -> Result<Vec<LayerJoinRow>> {
        let rows = match parent_id {
            Some(parent_id) => {
                let sql = format!(
                    "{THEME_SELECT} WHERE themes.parent_id = $1
                     ORDER BY themes.created_at ASC, themes.id ASC"
                );

                query_as::<_, ThemeRow>(&sql)
                    .bind(parent_id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "{THEME_SELECT} WHERE themes.parent_id IS NOT NULL
                     ORDER BY themes.created_at ASC, themes.id ASC"
                );

                query_as::<_, ThemeRow>(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| e.any())?;

        let layers: Vec<ThemeData> = rows
            .into_iter()
            .map(ThemeRow::into_data)
            .collect::<Result<_>>()?;

        let mut parent_ids: Vec<PrimaryKey> =
            layers.iter().filter_map(|l| l.role.parent_id()).collect();
        parent_ids.sort_unstable();
        parent_ids.dedup();

        let mut parents = Vec::with_capacity(parent_ids.len());
        for id in parent_ids {
            parents.push(self.theme_by_id(id).await?);
        }

        let mut result = Vec::with_capacity(layers.len());
        for layer in layers {
            let parent = parents
                .iter()
                .find(|p| Some(p.id) == layer.role.parent_id())
                .cloned()
                .ok_or(DatabaseError::NotFound {
                    resource: "theme",
                    identifier: "parent_id",
                })?;

            result.push(LayerJoinRow { layer, parent });
        }

        Ok(result)
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
