//! Tree synchronizer.
//!
//! Reconciles normalized generation payloads into the persisted topic
//! hierarchy. All growth is append-only: existing siblings keep their order
//! indices, new entries are placed after them, and nothing is deleted.
//!
//! # Consistency
//!
//! - [`TreeSynchronizer::materialize_tree`] inserts depth-first, pre-order,
//!   on an autocommit connection. Each topic is committed before any of its
//!   children, so a failure partway through leaves a valid prefix of the
//!   tree and never a child without its parent.
//! - Every other mutation runs in a single transaction: the whole merge is
//!   visible or none of it is.
//! - Sibling maxima are read while holding the store's write
//!   gate, in the same unit as the inserts based on them. Concurrent
//!   appends to one topic therefore never share an order index.
//!
//! Payloads arrive fully generated and normalized. No generation call is
//! ever awaited while the write gate is held.

use sqlx::SqliteConnection;

use autodidact_core::models::{
    validate_score, Activity, ActivityStatus, Concept, ResourceKind, Topic, TopicStatus,
};
use autodidact_core::ordering::{
    append_positions, next_position, offset_in_range, offset_positions, positions_after,
};
use autodidact_core::payload::{ActivityDraft, ConceptDraft, Elaboration, TreeNode};

use crate::error::{AppError, Result};
use crate::store::{self, NewResource, Store};

#[derive(Clone)]
pub struct TreeSynchronizer {
    store: Store,
}

impl TreeSynchronizer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates one topic per node of `payload` and returns the root.
    ///
    /// The root is placed under `parent` (a new root when `None`) at
    /// `start_order`, or after the existing siblings when `start_order` is
    /// `None`. Children are numbered `0..n` in payload order.
    pub async fn materialize_tree(
        &self,
        payload: &TreeNode,
        parent: Option<&str>,
        start_order: Option<i64>,
    ) -> Result<Topic> {
        let mut wc = self.store.begin_autocommit().await?;
        if let Some(parent_id) = parent {
            store::fetch_topic(wc.conn(), parent_id).await?;
        }
        let order = match start_order {
            Some(order) => order,
            None => next_position(store::max_child_topic_index(wc.conn(), parent).await?)
                .ok_or_else(out_of_range)?,
        };

        let root = insert_tree(wc.conn(), payload, parent, order).await?;
        tracing::info!(
            topic_id = %root.id,
            title = %root.title,
            nodes = payload.node_count(),
            "materialized topic tree"
        );
        Ok(root)
    }

    /// Applies an elaboration onto an existing topic in one transaction.
    ///
    /// A non-blank description replaces the current one. Subtopics
    /// (with their nested subtrees) and concepts are appended after the
    /// existing ones. Each resource is stored as a URL resource summarized
    /// as `"Recommended: {title}"`.
    pub async fn merge_elaboration(&self, topic_id: &str, payload: &Elaboration) -> Result<Topic> {
        let mut tx = self.store.begin_write().await?;
        let mut topic = store::fetch_topic(tx.conn(), topic_id).await?;

        if let Some(description) = payload
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            store::update_topic_description(tx.conn(), topic_id, description).await?;
            topic.description = Some(description.to_string());
        }

        let max = store::max_child_topic_index(tx.conn(), Some(topic_id)).await?;
        let positions =
            positions_after(max, payload.subtopics.len()).ok_or_else(out_of_range)?;
        for (node, order) in payload.subtopics.iter().zip(positions) {
            insert_tree(tx.conn(), node, Some(topic_id), order).await?;
        }

        for suggestion in &payload.resources {
            store::insert_resource(
                tx.conn(),
                NewResource {
                    topic_id: Some(topic_id.to_string()),
                    kind: ResourceKind::Url,
                    location: suggestion.url.clone(),
                    raw_content: None,
                    summary: Some(format!("Recommended: {}", suggestion.title)),
                },
            )
            .await?;
        }

        let max = store::max_concept_index(tx.conn(), topic_id).await?;
        let positions =
            positions_after(max, payload.concepts.len()).ok_or_else(out_of_range)?;
        insert_concepts(tx.conn(), topic_id, &payload.concepts, &positions).await?;

        tx.commit().await?;
        tracing::info!(
            topic_id,
            subtopics = payload.subtopics.len(),
            resources = payload.resources.len(),
            concepts = payload.concepts.len(),
            "merged elaboration"
        );
        Ok(topic)
    }

    /// Appends concepts (and any activities they carry) to a topic.
    ///
    /// Indices continue from the current maximum, offset by each item's
    /// own `order_index` when it has one, else by its position plus one.
    pub async fn append_concepts(
        &self,
        topic_id: &str,
        items: &[ConceptDraft],
    ) -> Result<Vec<Concept>> {
        let offsets: Vec<Option<i64>> = items.iter().map(|c| c.order_index).collect();
        if offsets.iter().flatten().any(|o| !offset_in_range(*o)) {
            return Err(out_of_range());
        }

        let mut tx = self.store.begin_write().await?;
        store::fetch_topic(tx.conn(), topic_id).await?;

        let max = store::max_concept_index(tx.conn(), topic_id).await?;
        let positions = offset_positions(max, &offsets).ok_or_else(out_of_range)?;
        let concepts = insert_concepts(tx.conn(), topic_id, items, &positions).await?;

        tx.commit().await?;
        tracing::info!(topic_id, count = concepts.len(), "appended concepts");
        Ok(concepts)
    }

    /// Appends activities to a concept, in payload order.
    pub async fn append_activities(
        &self,
        concept_id: &str,
        items: &[ActivityDraft],
    ) -> Result<Vec<Activity>> {
        let mut tx = self.store.begin_write().await?;
        store::fetch_concept(tx.conn(), concept_id).await?;

        let mut activities = Vec::with_capacity(items.len());
        for draft in items {
            activities.push(store::insert_activity(tx.conn(), concept_id, draft).await?);
        }

        tx.commit().await?;
        tracing::info!(concept_id, count = activities.len(), "appended activities");
        Ok(activities)
    }

    /// Marks an activity completed with a self-assessment score in `1..=5`.
    ///
    /// Completing an already completed activity overwrites its score.
    pub async fn complete_activity(&self, activity_id: &str, score: i64) -> Result<Activity> {
        let score = validate_score(score)?;

        let mut tx = self.store.begin_write().await?;
        let mut activity = store::fetch_activity(tx.conn(), activity_id).await?;
        store::mark_activity_completed(tx.conn(), activity_id, score).await?;
        tx.commit().await?;

        if let Some(previous) = activity.user_score {
            tracing::debug!(activity_id, previous, score, "overwriting activity score");
        }
        activity.status = ActivityStatus::Completed;
        activity.user_score = Some(score);
        Ok(activity)
    }

    pub async fn set_topic_status(&self, topic_id: &str, status: TopicStatus) -> Result<Topic> {
        let mut tx = self.store.begin_write().await?;
        let mut topic = store::fetch_topic(tx.conn(), topic_id).await?;
        store::update_topic_status(tx.conn(), topic_id, status).await?;
        tx.commit().await?;

        topic.status = status;
        Ok(topic)
    }
}

fn out_of_range() -> AppError {
    AppError::Validation("order index out of range".into())
}

/// Inserts `root` and its descendants, pre-order, and returns the root.
///
/// Iterative so that payload depth is bounded only by memory. Each child is
/// inserted after the parent whose id it references.
async fn insert_tree(
    conn: &mut SqliteConnection,
    root: &TreeNode,
    parent: Option<&str>,
    order: i64,
) -> Result<Topic> {
    let mut stack: Vec<(&TreeNode, Option<String>, i64)> =
        vec![(root, parent.map(str::to_string), order)];
    let mut inserted_root = None;

    while let Some((node, parent_id, order)) = stack.pop() {
        let topic = store::insert_topic(
            &mut *conn,
            &node.title,
            node.description.as_deref(),
            parent_id.as_deref(),
            order,
        )
        .await?;

        let children: Vec<(&TreeNode, i64)> = node
            .subtopics
            .iter()
            .zip(append_positions(0, node.subtopics.len()))
            .collect();
        // reversed so the first child is popped next
        for (child, index) in children.into_iter().rev() {
            stack.push((child, Some(topic.id.clone()), index));
        }

        if inserted_root.is_none() {
            inserted_root = Some(topic);
        }
    }

    inserted_root.ok_or_else(|| AppError::Internal("tree insert produced no root".into()))
}

async fn insert_concepts(
    conn: &mut SqliteConnection,
    topic_id: &str,
    drafts: &[ConceptDraft],
    positions: &[i64],
) -> Result<Vec<Concept>> {
    let mut concepts = Vec::with_capacity(drafts.len());
    for (draft, &order) in drafts.iter().zip(positions) {
        let concept =
            store::insert_concept(&mut *conn, topic_id, &draft.title, &draft.description, order)
                .await?;
        for activity in &draft.activities {
            store::insert_activity(&mut *conn, &concept.id, activity).await?;
        }
        concepts.push(concept);
    }
    Ok(concepts)
}
