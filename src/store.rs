//! SQLite-backed content store.
//!
//! [`Store`] wraps the connection pool together with a process-wide write
//! gate. Every mutation takes the gate before it reads the sibling counts
//! it bases its order indices on, so "read current max, then insert" is a
//! single atomic unit even when several requests grow the same topic at
//! once. Readers never take the gate.
//!
//! Two write modes are offered:
//!
//! - [`Store::begin_write`]: one transaction; nothing is visible until
//!   [`WriteTx::commit`], and dropping it rolls everything back.
//! - [`Store::begin_autocommit`]: a plain connection; each statement is
//!   visible as soon as it completes. Tree materialization uses this so a
//!   parent is always committed before any of its children.
//!
//! The row-level helpers in this module are generic over
//! [`sqlx::Executor`] so they run against the pool, a transaction, or an
//! autocommit connection alike.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use autodidact_core::models::{
    Activity, ActivityStatus, Concept, Link, LinkKind, Note, Resource, ResourceKind, Topic,
    TopicStatus,
};
use autodidact_core::payload::ActivityDraft;

use crate::config::Config;
use crate::db;
use crate::error::{AppError, Result};
use crate::migrate;

pub(crate) const TOPIC_COLUMNS: &str =
    "id, title, description, parent_id, order_index, status, created_at";
pub(crate) const CONCEPT_COLUMNS: &str = "id, topic_id, title, description, order_index, created_at";
pub(crate) const ACTIVITY_COLUMNS: &str =
    "id, concept_id, kind, instructions, content, status, user_score, created_at";
pub(crate) const RESOURCE_COLUMNS: &str =
    "id, topic_id, kind, location, raw_content, summary, created_at";
pub(crate) const NOTE_COLUMNS: &str = "id, topic_id, resource_id, content, created_at, updated_at";

/// Handle to the content database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Connects to the configured database and ensures the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Takes the write gate and opens a transaction.
    pub async fn begin_write(&self) -> Result<WriteTx> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTx { tx, _gate: gate })
    }

    /// Takes the write gate and checks out a connection in autocommit mode.
    pub async fn begin_autocommit(&self) -> Result<WriteConn> {
        let gate = self.write_gate.clone().lock_owned().await;
        let conn = self.pool.acquire().await?;
        Ok(WriteConn { conn, _gate: gate })
    }

    /// Stores a single resource, e.g. an uploaded PDF or a fetched page.
    pub async fn add_resource(&self, new: NewResource) -> Result<Resource> {
        let mut tx = self.begin_write().await?;
        if let Some(topic_id) = &new.topic_id {
            fetch_topic(tx.conn(), topic_id).await?;
        }
        let resource = insert_resource(tx.conn(), new).await?;
        tx.commit().await?;
        tracing::info!(resource_id = %resource.id, kind = %resource.kind, "resource added");
        Ok(resource)
    }

    /// Stores a note on a topic, a resource, or both.
    pub async fn add_note(
        &self,
        topic_id: Option<&str>,
        resource_id: Option<&str>,
        content: &str,
    ) -> Result<Note> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("note content must not be empty".into()));
        }
        if topic_id.is_none() && resource_id.is_none() {
            return Err(AppError::Validation(
                "a note needs a topic_id or a resource_id".into(),
            ));
        }

        let mut tx = self.begin_write().await?;
        if let Some(id) = topic_id {
            fetch_topic(tx.conn(), id).await?;
        }
        if let Some(id) = resource_id {
            fetch_resource(tx.conn(), id).await?;
        }

        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            topic_id: topic_id.map(str::to_string),
            resource_id: resource_id.map(str::to_string),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO notes (id, topic_id, resource_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&note.id)
        .bind(&note.topic_id)
        .bind(&note.resource_id)
        .bind(&note.content)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(note)
    }

    /// Adds a typed cross-reference between two existing topics.
    pub async fn add_link(&self, source_id: &str, target_id: &str, kind: LinkKind) -> Result<Link> {
        if source_id == target_id {
            return Err(AppError::Validation(
                "a topic cannot link to itself".into(),
            ));
        }
        let mut tx = self.begin_write().await?;
        fetch_topic(tx.conn(), source_id).await?;
        fetch_topic(tx.conn(), target_id).await?;
        let id = sqlx::query("INSERT INTO links (source_id, target_id, kind) VALUES (?, ?, ?)")
            .bind(source_id)
            .bind(target_id)
            .bind(kind.as_str())
            .execute(tx.conn())
            .await?
            .last_insert_rowid();
        tx.commit().await?;
        Ok(Link {
            id,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            kind,
        })
    }
}

/// An open write transaction holding the write gate.
pub struct WriteTx {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTx {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commits and then releases the write gate.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// An autocommit connection holding the write gate.
pub struct WriteConn {
    conn: PoolConnection<Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteConn {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

/// Fields for a resource insert.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub topic_id: Option<String>,
    pub kind: ResourceKind,
    pub location: String,
    pub raw_content: Option<String>,
    pub summary: Option<String>,
}

// ============ Row decoding ============

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn corrupt(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("corrupt row: {}", e))
}

pub(crate) fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    let status: String = row.try_get("status")?;
    Ok(Topic {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        parent_id: row.try_get("parent_id")?,
        order_index: row.try_get("order_index")?,
        status: status.parse::<TopicStatus>().map_err(corrupt)?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub(crate) fn concept_from_row(row: &SqliteRow) -> Result<Concept> {
    Ok(Concept {
        id: row.try_get("id")?,
        topic_id: row.try_get("topic_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        order_index: row.try_get("order_index")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub(crate) fn activity_from_row(row: &SqliteRow) -> Result<Activity> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let score: Option<i64> = row.try_get("user_score")?;
    Ok(Activity {
        id: row.try_get("id")?,
        concept_id: row.try_get("concept_id")?,
        kind: kind.parse().map_err(corrupt)?,
        instructions: row.try_get("instructions")?,
        content: row.try_get("content")?,
        status: status.parse::<ActivityStatus>().map_err(corrupt)?,
        user_score: score
            .map(|s| u8::try_from(s).map_err(corrupt))
            .transpose()?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub(crate) fn resource_from_row(row: &SqliteRow) -> Result<Resource> {
    let kind: String = row.try_get("kind")?;
    Ok(Resource {
        id: row.try_get("id")?,
        topic_id: row.try_get("topic_id")?,
        kind: kind.parse().map_err(corrupt)?,
        location: row.try_get("location")?,
        raw_content: row.try_get("raw_content")?,
        summary: row.try_get("summary")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub(crate) fn link_from_row(row: &SqliteRow) -> Result<Link> {
    let kind: String = row.try_get("kind")?;
    Ok(Link {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        target_id: row.try_get("target_id")?,
        kind: kind.parse().map_err(corrupt)?,
    })
}

pub(crate) fn note_from_row(row: &SqliteRow) -> Result<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        topic_id: row.try_get("topic_id")?,
        resource_id: row.try_get("resource_id")?,
        content: row.try_get("content")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

// ============ Single-row fetches ============

pub(crate) async fn fetch_topic<'e, E>(ex: E, id: &str) -> Result<Topic>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM topics WHERE id = ?", TOPIC_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| AppError::not_found("Topic", id))?;
    topic_from_row(&row)
}

pub(crate) async fn fetch_concept<'e, E>(ex: E, id: &str) -> Result<Concept>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM concepts WHERE id = ?", CONCEPT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| AppError::not_found("Concept", id))?;
    concept_from_row(&row)
}

pub(crate) async fn fetch_activity<'e, E>(ex: E, id: &str) -> Result<Activity>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM activities WHERE id = ?", ACTIVITY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| AppError::not_found("Activity", id))?;
    activity_from_row(&row)
}

pub(crate) async fn fetch_resource<'e, E>(ex: E, id: &str) -> Result<Resource>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM resources WHERE id = ?", RESOURCE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?
        .ok_or_else(|| AppError::not_found("Resource", id))?;
    resource_from_row(&row)
}

// ============ Sibling bookkeeping ============

/// Highest order index among topics whose parent is `parent_id` (roots
/// when `None`).
pub(crate) async fn max_child_topic_index<'e, E>(
    ex: E,
    parent_id: Option<&str>,
) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM topics WHERE parent_id IS ?")
            .bind(parent_id)
            .fetch_one(ex)
            .await?;
    Ok(max)
}

pub(crate) async fn max_concept_index<'e, E>(ex: E, topic_id: &str) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM concepts WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(ex)
            .await?;
    Ok(max)
}

// ============ Inserts and updates ============

pub(crate) async fn insert_topic(
    conn: &mut SqliteConnection,
    title: &str,
    description: Option<&str>,
    parent_id: Option<&str>,
    order_index: i64,
) -> Result<Topic> {
    let topic = Topic {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        description: description.map(str::to_string),
        parent_id: parent_id.map(str::to_string),
        order_index,
        status: TopicStatus::Pending,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO topics (id, title, description, parent_id, order_index, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&topic.id)
    .bind(&topic.title)
    .bind(&topic.description)
    .bind(&topic.parent_id)
    .bind(topic.order_index)
    .bind(topic.status.as_str())
    .bind(topic.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(topic)
}

pub(crate) async fn insert_concept(
    conn: &mut SqliteConnection,
    topic_id: &str,
    title: &str,
    description: &str,
    order_index: i64,
) -> Result<Concept> {
    let concept = Concept {
        id: Uuid::new_v4().to_string(),
        topic_id: topic_id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        order_index,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO concepts (id, topic_id, title, description, order_index, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&concept.id)
    .bind(&concept.topic_id)
    .bind(&concept.title)
    .bind(&concept.description)
    .bind(concept.order_index)
    .bind(concept.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(concept)
}

pub(crate) async fn insert_activity(
    conn: &mut SqliteConnection,
    concept_id: &str,
    draft: &ActivityDraft,
) -> Result<Activity> {
    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        concept_id: concept_id.to_string(),
        kind: draft.kind,
        instructions: draft.instructions.clone(),
        content: draft.content.clone(),
        status: ActivityStatus::Pending,
        user_score: None,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO activities (id, concept_id, kind, instructions, content, status, user_score, created_at) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)",
    )
    .bind(&activity.id)
    .bind(&activity.concept_id)
    .bind(activity.kind.as_str())
    .bind(&activity.instructions)
    .bind(&activity.content)
    .bind(activity.status.as_str())
    .bind(activity.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(activity)
}

pub(crate) async fn insert_resource(
    conn: &mut SqliteConnection,
    new: NewResource,
) -> Result<Resource> {
    let resource = Resource {
        id: Uuid::new_v4().to_string(),
        topic_id: new.topic_id,
        kind: new.kind,
        location: new.location,
        raw_content: new.raw_content,
        summary: new.summary,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO resources (id, topic_id, kind, location, raw_content, summary, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&resource.id)
    .bind(&resource.topic_id)
    .bind(resource.kind.as_str())
    .bind(&resource.location)
    .bind(&resource.raw_content)
    .bind(&resource.summary)
    .bind(resource.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(resource)
}

pub(crate) async fn update_topic_description(
    conn: &mut SqliteConnection,
    topic_id: &str,
    description: &str,
) -> Result<()> {
    sqlx::query("UPDATE topics SET description = ? WHERE id = ?")
        .bind(description)
        .bind(topic_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn update_topic_status(
    conn: &mut SqliteConnection,
    topic_id: &str,
    status: TopicStatus,
) -> Result<()> {
    sqlx::query("UPDATE topics SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(topic_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn mark_activity_completed(
    conn: &mut SqliteConnection,
    activity_id: &str,
    score: u8,
) -> Result<()> {
    sqlx::query("UPDATE activities SET status = ?, user_score = ? WHERE id = ?")
        .bind(ActivityStatus::Completed.as_str())
        .bind(i64::from(score))
        .bind(activity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
