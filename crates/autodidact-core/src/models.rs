//! Content schema shared by the synchronizer, the query surface, and the
//! HTTP layer.
//!
//! Topics form a forest through `parent_id`; concepts hang off a topic,
//! activities off a concept. Resources and notes annotate topics, and links
//! are a sparse typed overlay between topics that is independent of the
//! parent/child tree.
//!
//! Wire names follow the JSON shape served to the web client: an activity's
//! kind is serialized as `type`, a resource's location as `path_or_url`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::decode_content;

/// Lowest accepted self-assessment score.
pub const MIN_SCORE: i64 = 1;
/// Highest accepted self-assessment score.
pub const MAX_SCORE: i64 = 5;

/// Returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': expected one of {expected}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Returned by [`validate_score`] for scores outside `MIN_SCORE..=MAX_SCORE`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("score must be between 1 and 5, got {0}")]
pub struct ScoreError(pub i64);

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $label,
                        value: s.to_string(),
                        expected: concat!($($text, " "),+),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Completion state of a topic. Both directions are allowed.
    TopicStatus, "topic status", {
        Pending => "pending",
        Completed => "completed",
    }
);

string_enum!(
    /// Lifecycle of an activity: `pending → completed`, one-way.
    ActivityStatus, "activity status", {
        Pending => "pending",
        Completed => "completed",
    }
);

string_enum!(
    ActivityKind, "activity type", {
        Read => "read",
        Watch => "watch",
        Quiz => "quiz",
        Drill => "drill",
        Flashcard => "flashcard",
        Project => "project",
    }
);

string_enum!(
    ResourceKind, "resource type", {
        Pdf => "pdf",
        Url => "url",
        Text => "text",
    }
);

string_enum!(
    /// Edge label for the cross-reference overlay between topics.
    LinkKind, "link type", {
        Related => "related",
        Prerequisite => "prerequisite",
        Mentioned => "mentioned",
    }
);

/// A node in the learning hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// `None` for roots.
    pub parent_id: Option<String>,
    /// Zero-based position among siblings sharing `parent_id`.
    pub order_index: i64,
    pub status: TopicStatus,
    pub created_at: DateTime<Utc>,
}

/// An atomic learning unit scoped to one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub topic_id: String,
    pub title: String,
    pub description: String,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

/// A concrete exercise scoped to one concept.
///
/// `content` is always text at rest. Structured content produced by the
/// generator is stored as canonical JSON text; use
/// [`Activity::decoded_content`] to get it back as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub concept_id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub instructions: String,
    pub content: String,
    pub status: ActivityStatus,
    /// Self-assessment, set only on completion.
    pub user_score: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn decoded_content(&self) -> serde_json::Value {
        decode_content(&self.content)
    }
}

/// An external or ingested reference attached to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub topic_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(rename = "path_or_url")]
    pub location: String,
    pub raw_content: Option<String>,
    #[serde(rename = "content_summary")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Typed directed edge between two topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: LinkKind,
}

/// Free-text annotation on a topic, a resource, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub topic_id: Option<String>,
    pub resource_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A topic together with its descendants, children ordered by index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicTree {
    #[serde(flatten)]
    pub topic: Topic,
    pub children: Vec<TopicTree>,
}

impl TopicTree {
    /// Assembles the subtree rooted at `root_id` from a flat list of topics.
    ///
    /// Topics that are not reachable from the root are ignored. Siblings are
    /// ordered by `order_index`; the sort is stable, so ties keep the order
    /// in which `topics` lists them.
    pub fn assemble(root_id: &str, topics: Vec<Topic>) -> Option<TopicTree> {
        let mut root = None;
        let mut by_parent: HashMap<String, Vec<Topic>> = HashMap::new();
        for topic in topics {
            if topic.id == root_id {
                root = Some(topic);
            } else if let Some(parent) = topic.parent_id.clone() {
                by_parent.entry(parent).or_default().push(topic);
            }
        }
        for siblings in by_parent.values_mut() {
            siblings.sort_by_key(|t| t.order_index);
        }
        root.map(|topic| build_subtree(topic, &mut by_parent))
    }

    /// Number of topics in the tree, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TopicTree::node_count).sum::<usize>()
    }
}

fn build_subtree(topic: Topic, by_parent: &mut HashMap<String, Vec<Topic>>) -> TopicTree {
    let children = by_parent
        .remove(&topic.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_subtree(child, by_parent))
        .collect();
    TopicTree { topic, children }
}

/// Checks a self-assessment score against the accepted `1..=5` range.
pub fn validate_score(score: i64) -> Result<u8, ScoreError> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score as u8)
    } else {
        Err(ScoreError(score))
    }
}
