//! Read-only projections over the content store.
//!
//! Nothing here takes the write gate. Listings are ordered by order index
//! where the entity has one, otherwise by insertion.

use sqlx::SqlitePool;

use autodidact_core::models::{Activity, Concept, Link, Note, Resource, Topic, TopicTree};

use crate::error::{AppError, Result};
use crate::store::{
    self, activity_from_row, concept_from_row, link_from_row, note_from_row, resource_from_row,
    topic_from_row, ACTIVITY_COLUMNS, CONCEPT_COLUMNS, NOTE_COLUMNS, RESOURCE_COLUMNS,
    TOPIC_COLUMNS,
};

/// All topics, oldest first.
pub async fn list_topics(pool: &SqlitePool) -> Result<Vec<Topic>> {
    let sql = format!(
        "SELECT {} FROM topics ORDER BY created_at, rowid",
        TOPIC_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(topic_from_row).collect()
}

/// Direct children of a topic, by order index.
pub async fn list_child_topics(pool: &SqlitePool, parent_id: &str) -> Result<Vec<Topic>> {
    store::fetch_topic(pool, parent_id).await?;
    let sql = format!(
        "SELECT {} FROM topics WHERE parent_id = ? ORDER BY order_index, rowid",
        TOPIC_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(parent_id).fetch_all(pool).await?;
    rows.iter().map(topic_from_row).collect()
}

/// A topic with all of its descendants.
pub async fn topic_tree(pool: &SqlitePool, root_id: &str) -> Result<TopicTree> {
    let sql = format!(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM topics WHERE id = ?
            UNION ALL
            SELECT t.id FROM topics t JOIN subtree s ON t.parent_id = s.id
        )
        SELECT {} FROM topics WHERE id IN (SELECT id FROM subtree)
        ORDER BY order_index, rowid
        "#,
        TOPIC_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(root_id).fetch_all(pool).await?;
    let topics = rows.iter().map(topic_from_row).collect::<Result<Vec<_>>>()?;
    TopicTree::assemble(root_id, topics).ok_or_else(|| AppError::not_found("Topic", root_id))
}

pub async fn get_topic(pool: &SqlitePool, id: &str) -> Result<Topic> {
    store::fetch_topic(pool, id).await
}

pub async fn get_concept(pool: &SqlitePool, id: &str) -> Result<Concept> {
    store::fetch_concept(pool, id).await
}

pub async fn get_activity(pool: &SqlitePool, id: &str) -> Result<Activity> {
    store::fetch_activity(pool, id).await
}

pub async fn get_resource(pool: &SqlitePool, id: &str) -> Result<Resource> {
    store::fetch_resource(pool, id).await
}

/// Concepts of a topic, by order index.
pub async fn list_concepts(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Concept>> {
    let sql = format!(
        "SELECT {} FROM concepts WHERE topic_id = ? ORDER BY order_index, rowid",
        CONCEPT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(topic_id).fetch_all(pool).await?;
    rows.iter().map(concept_from_row).collect()
}

/// Activities of a concept, in insertion order.
pub async fn list_activities(pool: &SqlitePool, concept_id: &str) -> Result<Vec<Activity>> {
    let sql = format!(
        "SELECT {} FROM activities WHERE concept_id = ? ORDER BY rowid",
        ACTIVITY_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(concept_id).fetch_all(pool).await?;
    rows.iter().map(activity_from_row).collect()
}

/// Resources attached to a topic, oldest first.
pub async fn list_resources(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Resource>> {
    let sql = format!(
        "SELECT {} FROM resources WHERE topic_id = ? ORDER BY created_at, rowid",
        RESOURCE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(topic_id).fetch_all(pool).await?;
    rows.iter().map(resource_from_row).collect()
}

/// Links touching a topic, in either direction.
pub async fn list_links(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Link>> {
    let rows = sqlx::query(
        "SELECT id, source_id, target_id, kind FROM links WHERE source_id = ? OR target_id = ? ORDER BY id",
    )
    .bind(topic_id)
    .bind(topic_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(link_from_row).collect()
}

pub async fn list_notes_for_topic(pool: &SqlitePool, topic_id: &str) -> Result<Vec<Note>> {
    let sql = format!(
        "SELECT {} FROM notes WHERE topic_id = ? ORDER BY created_at, rowid",
        NOTE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(topic_id).fetch_all(pool).await?;
    rows.iter().map(note_from_row).collect()
}

pub async fn list_notes_for_resource(pool: &SqlitePool, resource_id: &str) -> Result<Vec<Note>> {
    let sql = format!(
        "SELECT {} FROM notes WHERE resource_id = ? ORDER BY created_at, rowid",
        NOTE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(resource_id).fetch_all(pool).await?;
    rows.iter().map(note_from_row).collect()
}

/// Number of concepts per topic id, for tree rendering.
pub async fn concept_counts(
    pool: &SqlitePool,
) -> Result<std::collections::HashMap<String, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT topic_id, COUNT(*) FROM concepts GROUP BY topic_id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}
