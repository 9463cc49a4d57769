//! Postgres-backed stores.
//!
//! `update_session` serializes concurrent writers with `SELECT ... FOR
//! UPDATE`; the mutator runs in memory between the lock and the write, and
//! never spans any network I/O other than the transaction itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::collections::BTreeSet;
use uuid::Uuid;

use clipflow_core::{AppError, AppResult, SessionMetadata, UploadSession, Video, VideoUpdate};

use crate::traits::{check_mutation_allowed, SessionMutator, SessionStore, VideoStore};

/// Create the tables the ingest core needs, idempotently. Run at boot.
pub async fn ensure_schema(pool: &PgPool) -> AppResult<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id UUID PRIMARY KEY,
            owner UUID NOT NULL,
            target_filename TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_size BIGINT NOT NULL,
            chunk_size BIGINT NOT NULL,
            total_chunks INTEGER NOT NULL,
            received INTEGER[] NOT NULL DEFAULT '{}',
            state TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        );
        CREATE INDEX IF NOT EXISTS sessions_owner_idx ON sessions (owner, created_at DESC);
        CREATE INDEX IF NOT EXISTS sessions_expires_idx ON sessions (expires_at);

        CREATE TABLE IF NOT EXISTS videos (
            id UUID PRIMARY KEY,
            owner UUID NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tags TEXT[] NOT NULL DEFAULT '{}',
            category TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            thumbnail_key TEXT,
            duration_s DOUBLE PRECISION,
            resolution TEXT,
            codec TEXT,
            file_size BIGINT NOT NULL,
            bitrate BIGINT,
            state TEXT NOT NULL,
            views BIGINT NOT NULL DEFAULT 0,
            likes BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}

fn db_err(err: sqlx::Error) -> AppError {
    AppError::transient("database error", err)
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    owner: Uuid,
    target_filename: String,
    original_filename: String,
    file_size: i64,
    chunk_size: i64,
    total_chunks: i32,
    received: Vec<i32>,
    state: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> AppResult<UploadSession> {
        let metadata: SessionMetadata = serde_json::from_value(self.metadata)?;
        Ok(UploadSession {
            id: self.id,
            owner: self.owner,
            target_filename: self.target_filename,
            original_filename: self.original_filename,
            file_size: self.file_size as u64,
            chunk_size: self.chunk_size as u64,
            total_chunks: self.total_chunks as u32,
            received: self.received.into_iter().map(|i| i as u32).collect(),
            state: self
                .state
                .parse()
                .map_err(|e| AppError::Fatal(format!("corrupt session state: {}", e)))?,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

fn received_column(received: &BTreeSet<u32>) -> Vec<i32> {
    received.iter().map(|i| *i as i32).collect()
}

const SESSION_COLUMNS: &str = "id, owner, target_filename, original_filename, file_size, \
     chunk_size, total_chunks, received, state, metadata, created_at, updated_at, expires_at";

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: UploadSession) -> AppResult<UploadSession> {
        let metadata = serde_json::to_value(&session.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, owner, target_filename, original_filename, file_size,
                chunk_size, total_chunks, received, state, metadata, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.id)
        .bind(session.owner)
        .bind(&session.target_filename)
        .bind(&session.original_filename)
        .bind(session.file_size as i64)
        .bind(session.chunk_size as i64)
        .bind(session.total_chunks as i32)
        .bind(received_column(&session.received))
        .bind(session.state.to_string())
        .bind(metadata)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<UploadSession>> {
        let row: Option<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn update_session(&self, id: Uuid, mutate: SessionMutator) -> AppResult<UploadSession> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE id = $1 FOR UPDATE",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let pre = row
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?
            .into_session()?;
        let mut post = pre.clone();
        mutate(&mut post)?;
        check_mutation_allowed(&pre, &post)?;
        post.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE sessions
            SET received = $2, state = $3, metadata = $4, updated_at = $5, expires_at = $6
            WHERE id = $1
            "#,
        )
        .bind(post.id)
        .bind(received_column(&post.received))
        .bind(post.state.to_string())
        .bind(serde_json::to_value(&post.metadata)?)
        .bind(post.updated_at)
        .bind(post.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(post)
    }

    async fn delete_session(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner: Uuid,
        page: u32,
        limit: u32,
    ) -> AppResult<Vec<UploadSession>> {
        let offset = page.saturating_sub(1) as i64 * limit as i64;
        let rows: Vec<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE owner = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            SESSION_COLUMNS
        ))
        .bind(owner)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    async fn find_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<Vec<UploadSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as::<Postgres, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE expires_at < $1",
            SESSION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}

#[derive(sqlx::FromRow)]
struct VideoRow {
    id: Uuid,
    owner: Uuid,
    title: String,
    description: String,
    tags: Vec<String>,
    category: String,
    mime_type: String,
    storage_key: String,
    thumbnail_key: Option<String>,
    duration_s: Option<f64>,
    resolution: Option<String>,
    codec: Option<String>,
    file_size: i64,
    bitrate: Option<i64>,
    state: String,
    views: i64,
    likes: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VideoRow {
    fn into_video(self) -> AppResult<Video> {
        Ok(Video {
            id: self.id,
            owner: self.owner,
            title: self.title,
            description: self.description,
            tags: self.tags,
            category: self.category,
            mime_type: self.mime_type,
            storage_key: self.storage_key,
            thumbnail_key: self.thumbnail_key,
            duration_s: self.duration_s,
            resolution: self.resolution,
            codec: self.codec,
            file_size: self.file_size as u64,
            bitrate: self.bitrate.map(|b| b as u64),
            state: self
                .state
                .parse()
                .map_err(|e| AppError::Fatal(format!("corrupt video state: {}", e)))?,
            views: self.views as u64,
            likes: self.likes as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const VIDEO_COLUMNS: &str = "id, owner, title, description, tags, category, mime_type, \
     storage_key, thumbnail_key, duration_s, resolution, codec, file_size, bitrate, state, \
     views, likes, created_at, updated_at";

#[derive(Clone)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn create_video(&self, video: Video) -> AppResult<Video> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO videos (id, owner, title, description, tags, category, mime_type,
                storage_key, thumbnail_key, duration_s, resolution, codec, file_size, bitrate,
                state, views, likes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(video.id)
        .bind(video.owner)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.tags)
        .bind(&video.category)
        .bind(&video.mime_type)
        .bind(&video.storage_key)
        .bind(&video.thumbnail_key)
        .bind(video.duration_s)
        .bind(&video.resolution)
        .bind(&video.codec)
        .bind(video.file_size as i64)
        .bind(video.bitrate.map(|b| b as i64))
        .bind(video.state.to_string())
        .bind(video.views as i64)
        .bind(video.likes as i64)
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if inserted.rows_affected() == 0 {
            // Redelivery: the deterministic id already exists.
            let existing = self.get_video(video.id).await?;
            return existing
                .ok_or_else(|| AppError::Transient(format!("video {} vanished", video.id)));
        }
        Ok(video)
    }

    async fn get_video(&self, id: Uuid) -> AppResult<Option<Video>> {
        let row: Option<VideoRow> = sqlx::query_as::<Postgres, VideoRow>(&format!(
            "SELECT {} FROM videos WHERE id = $1",
            VIDEO_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(VideoRow::into_video).transpose()
    }

    async fn update_video(&self, id: Uuid, update: VideoUpdate) -> AppResult<Video> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<VideoRow> = sqlx::query_as::<Postgres, VideoRow>(&format!(
            "SELECT {} FROM videos WHERE id = $1 FOR UPDATE",
            VIDEO_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut video = row
            .ok_or_else(|| AppError::NotFound(format!("video {}", id)))?
            .into_video()?;
        update.apply(&mut video);

        sqlx::query(
            r#"
            UPDATE videos
            SET thumbnail_key = $2, duration_s = $3, resolution = $4, codec = $5,
                file_size = $6, bitrate = $7, state = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(&video.thumbnail_key)
        .bind(video.duration_s)
        .bind(&video.resolution)
        .bind(&video.codec)
        .bind(video.file_size as i64)
        .bind(video.bitrate.map(|b| b as i64))
        .bind(video.state.to_string())
        .bind(video.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(video)
    }
}
