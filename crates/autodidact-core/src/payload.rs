//! Canonical generation payloads and their normalization.
//!
//! Generative backends drift: a syllabus may nest children under `modules`
//! or `subtopics`, lists arrive bare or wrapped in an object, and activity
//! content is sometimes prose and sometimes a structured object. Everything
//! is folded into the shapes below before it reaches the synchronizer, so
//! the synchronizer never branches on alternate field names.
//!
//! Normalization fails fast. A node without a usable `title` is rejected
//! rather than defaulted, since an empty title cannot be repaired once it
//! has been persisted into the hierarchy.
//!
//! # Example
//!
//! ```rust
//! use autodidact_core::payload::TreeNode;
//!
//! let value = serde_json::json!({
//!     "title": "Rust",
//!     "modules": [{ "title": "Ownership" }],
//!     "subtopics": [{ "title": "Traits", "subtopics": [] }]
//! });
//! let tree = TreeNode::from_value(&value).unwrap();
//! assert_eq!(tree.subtopics[0].title, "Ownership");
//! assert_eq!(tree.node_count(), 3);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{ActivityKind, ParseEnumError};
use crate::ordering;

/// Why a generated payload could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("malformed payload: {entity} is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("malformed payload: expected {expected} for {entity}")]
    InvalidShape {
        entity: &'static str,
        expected: &'static str,
    },

    #[error("malformed payload: {entity} field '{field}' is out of range")]
    OutOfRange {
        entity: &'static str,
        field: &'static str,
    },

    #[error("malformed payload: {0}")]
    InvalidEnum(#[from] ParseEnumError),

    #[error("response is not valid JSON: {0}")]
    NotJson(String),
}

/// One node of a generated syllabus tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub title: String,
    pub description: Option<String>,
    pub subtopics: Vec<TreeNode>,
}

impl TreeNode {
    /// Normalizes a syllabus node and all of its descendants.
    ///
    /// Children are the concatenation of `modules` and `subtopics`, in that
    /// order. A child given as a bare string is taken as a title.
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        match value {
            Value::String(title) => Ok(TreeNode {
                title: non_blank(title).ok_or(PayloadError::MissingField {
                    entity: "topic",
                    field: "title",
                })?,
                description: None,
                subtopics: Vec::new(),
            }),
            Value::Object(obj) => {
                let title = required_text(obj, "title", "topic")?;
                let description = optional_text(obj, "description");
                let mut subtopics = Vec::new();
                for key in ["modules", "subtopics"] {
                    for child in list_field(obj, key, "topic")? {
                        subtopics.push(TreeNode::from_value(child)?);
                    }
                }
                Ok(TreeNode {
                    title,
                    description,
                    subtopics,
                })
            }
            _ => Err(PayloadError::InvalidShape {
                entity: "topic",
                expected: "an object",
            }),
        }
    }

    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self
            .subtopics
            .iter()
            .map(TreeNode::node_count)
            .sum::<usize>()
    }
}

/// A recommended external resource from an elaboration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSuggestion {
    pub title: String,
    pub url: String,
}

/// A generated activity with its content already reduced to text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityDraft {
    pub kind: ActivityKind,
    pub instructions: String,
    /// Canonical text; see [`canonical_content`].
    pub content: String,
}

impl ActivityDraft {
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let obj = as_object(value, "activity")?;
        let kind_text = obj
            .get("type")
            .or_else(|| obj.get("kind"))
            .and_then(Value::as_str)
            .ok_or(PayloadError::MissingField {
                entity: "activity",
                field: "type",
            })?;
        Ok(ActivityDraft {
            kind: kind_text.parse()?,
            instructions: required_text(obj, "instructions", "activity")?,
            content: canonical_content(obj.get("content")),
        })
    }
}

/// A generated concept, optionally carrying its activities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptDraft {
    pub title: String,
    pub description: String,
    /// Position relative to the existing concepts, when the generator gave one.
    pub order_index: Option<i64>,
    pub activities: Vec<ActivityDraft>,
}

impl ConceptDraft {
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let obj = as_object(value, "concept")?;
        let activities = list_field(obj, "activities", "concept")?
            .iter()
            .map(ActivityDraft::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let order_index = match obj.get("order_index") {
            Some(Value::Number(n)) => Some(
                n.as_i64()
                    .filter(|offset| ordering::offset_in_range(*offset))
                    .ok_or(PayloadError::OutOfRange {
                        entity: "concept",
                        field: "order_index",
                    })?,
            ),
            _ => None,
        };
        Ok(ConceptDraft {
            title: required_text(obj, "title", "concept")?,
            description: optional_text(obj, "description").unwrap_or_default(),
            order_index,
            activities,
        })
    }
}

/// An incremental expansion of an existing topic. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Elaboration {
    pub description: Option<String>,
    pub subtopics: Vec<TreeNode>,
    pub resources: Vec<ResourceSuggestion>,
    pub concepts: Vec<ConceptDraft>,
}

impl Elaboration {
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let obj = as_object(value, "elaboration")?;

        let mut subtopics = Vec::new();
        for key in ["modules", "subtopics"] {
            for child in list_field(obj, key, "elaboration")? {
                subtopics.push(TreeNode::from_value(child)?);
            }
        }

        let resources = list_field(obj, "resources", "elaboration")?
            .iter()
            .map(|item| -> Result<ResourceSuggestion, PayloadError> {
                let res = as_object(item, "resource")?;
                Ok(ResourceSuggestion {
                    title: required_text(res, "title", "resource")?,
                    url: required_text(res, "url", "resource")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let concepts = list_field(obj, "concepts", "elaboration")?
            .iter()
            .map(ConceptDraft::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Elaboration {
            description: optional_text(obj, "description"),
            subtopics,
            resources,
            concepts,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.subtopics.is_empty()
            && self.resources.is_empty()
            && self.concepts.is_empty()
    }
}

/// Normalizes a concept list, given bare or as `{"concepts": [...]}`.
pub fn parse_concept_list(value: &Value) -> Result<Vec<ConceptDraft>, PayloadError> {
    unwrap_list(value, "concepts")?
        .iter()
        .map(ConceptDraft::from_value)
        .collect()
}

/// Normalizes an activity list, given bare or as `{"activities": [...]}`.
pub fn parse_activity_list(value: &Value) -> Result<Vec<ActivityDraft>, PayloadError> {
    unwrap_list(value, "activities")?
        .iter()
        .map(ActivityDraft::from_value)
        .collect()
}

/// Parses a model response as JSON, tolerating a surrounding Markdown fence.
pub fn parse_json_response(text: &str) -> Result<Value, PayloadError> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // drop the info string ("json") on the opening fence line
        body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
        body = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }
    serde_json::from_str(body).map_err(|e| PayloadError::NotJson(e.to_string()))
}

/// Reduces activity content to the text stored at rest.
///
/// Objects and arrays become compact JSON with object keys sorted, so equal
/// structures always encode to equal text. Strings are kept verbatim unless
/// they would themselves decode as JSON (e.g. the prose `{"a":1}`); those
/// are stored as a quoted JSON string literal so [`decode_content`] gives
/// back the original text. Missing or null content is the empty string.
pub fn canonical_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) if decode_encoded(s).is_some() => {
            Value::String(s.clone()).to_string()
        }
        Some(Value::String(s)) => s.clone(),
        Some(other) => canonicalize(other).to_string(),
    }
}

/// Recovers content written by [`canonical_content`].
///
/// Text holding a JSON object or array decodes to that value, and a quoted
/// JSON string literal to the string it quotes. Anything else comes back as
/// a JSON string unchanged.
pub fn decode_content(text: &str) -> Value {
    decode_encoded(text).unwrap_or_else(|| Value::String(text.to_string()))
}

fn decode_encoded(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"')) {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|value| value.is_object() || value.is_array() || value.is_string())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn unwrap_list<'a>(value: &'a Value, key: &'static str) -> Result<&'a Vec<Value>, PayloadError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(obj) => match obj.get(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(PayloadError::MissingField {
                entity: "response",
                field: key,
            }),
        },
        _ => Err(PayloadError::InvalidShape {
            entity: "response",
            expected: "a list",
        }),
    }
}

fn as_object<'a>(
    value: &'a Value,
    entity: &'static str,
) -> Result<&'a Map<String, Value>, PayloadError> {
    value.as_object().ok_or(PayloadError::InvalidShape {
        entity,
        expected: "an object",
    })
}

fn list_field<'a>(
    obj: &'a Map<String, Value>,
    key: &'static str,
    entity: &'static str,
) -> Result<&'a [Value], PayloadError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(PayloadError::InvalidShape {
            entity,
            expected: "a list",
        }),
    }
}

fn required_text(
    obj: &Map<String, Value>,
    field: &'static str,
    entity: &'static str,
) -> Result<String, PayloadError> {
    obj.get(field)
        .and_then(Value::as_str)
        .and_then(non_blank)
        .ok_or(PayloadError::MissingField { entity, field })
}

fn optional_text(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field).and_then(Value::as_str).and_then(non_blank)
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modules_precede_subtopics() {
        let value = json!({
            "title": "X",
            "subtopics": [{"title": "S1"}],
            "modules": [{"title": "M1"}, {"title": "M2"}]
        });
        let tree = TreeNode::from_value(&value).unwrap();
        let titles: Vec<_> = tree.subtopics.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["M1", "M2", "S1"]);
    }

    #[test]
    fn test_nested_tree_without_depth_limit() {
        let mut value = json!({"title": "leaf"});
        for depth in 0..40 {
            value = json!({"title": format!("level {}", depth), "subtopics": [value]});
        }
        let tree = TreeNode::from_value(&value).unwrap();
        assert_eq!(tree.node_count(), 41);
    }

    #[test]
    fn test_missing_title_fails_fast() {
        let value = json!({"title": "Root", "subtopics": [{"description": "no title"}]});
        let err = TreeNode::from_value(&value).unwrap_err();
        assert_eq!(
            err,
            PayloadError::MissingField {
                entity: "topic",
                field: "title"
            }
        );
    }

    #[test]
    fn test_blank_title_is_missing() {
        assert!(TreeNode::from_value(&json!({"title": "   "})).is_err());
        assert!(TreeNode::from_value(&json!({"title": 42})).is_err());
    }

    #[test]
    fn test_string_children_become_titles() {
        let tree = TreeNode::from_value(&json!({"title": "R", "subtopics": ["A", "B"]})).unwrap();
        assert_eq!(tree.subtopics[1].title, "B");
        assert!(tree.subtopics[1].subtopics.is_empty());
    }

    #[test]
    fn test_subtopics_must_be_a_list() {
        let err = TreeNode::from_value(&json!({"title": "R", "subtopics": "A"})).unwrap_err();
        assert!(matches!(err, PayloadError::InvalidShape { .. }));
    }

    #[test]
    fn test_empty_elaboration_defaults() {
        let elab = Elaboration::from_value(&json!({})).unwrap();
        assert!(elab.is_empty());

        let elab = Elaboration::from_value(&json!({"description": ""})).unwrap();
        assert!(elab.description.is_none());
    }

    #[test]
    fn test_full_elaboration() {
        let value = json!({
            "description": "Deep dive",
            "subtopics": [{"title": "Next", "subtopics": [{"title": "Deeper"}]}],
            "resources": [{"title": "Docs", "url": "https://docs.example", "type": "url"}],
            "concepts": [{
                "title": "C1",
                "activities": [
                    {"type": "quiz", "instructions": "Pick one", "content": {"question": "?", "options": ["a", "b"], "correct": "a"}},
                    {"type": "read", "instructions": "Read it", "content": "Some text"}
                ]
            }]
        });
        let elab = Elaboration::from_value(&value).unwrap();
        assert_eq!(elab.description.as_deref(), Some("Deep dive"));
        assert_eq!(elab.subtopics[0].node_count(), 2);
        assert_eq!(elab.resources[0].url, "https://docs.example");
        assert_eq!(elab.concepts[0].description, "");
        assert_eq!(elab.concepts[0].activities.len(), 2);
        assert_eq!(elab.concepts[0].activities[1].content, "Some text");
    }

    #[test]
    fn test_resource_without_url_rejected() {
        let err = Elaboration::from_value(&json!({"resources": [{"title": "Docs"}]})).unwrap_err();
        assert_eq!(
            err,
            PayloadError::MissingField {
                entity: "resource",
                field: "url"
            }
        );
    }

    #[test]
    fn test_unknown_activity_kind_rejected() {
        let err = ActivityDraft::from_value(&json!({"type": "dance", "instructions": "x"}))
            .unwrap_err();
        assert!(matches!(err, PayloadError::InvalidEnum(_)));
    }

    #[test]
    fn test_structured_content_round_trips() {
        let content = json!({"question": "2+2?", "options": ["3", "4"], "correct": "4"});
        let text = canonical_content(Some(&content));
        assert_eq!(text, r#"{"correct":"4","options":["3","4"],"question":"2+2?"}"#);
        assert_eq!(decode_content(&text), content);
    }

    #[test]
    fn test_plain_content_stays_text() {
        assert_eq!(canonical_content(Some(&json!("# Notes"))), "# Notes");
        assert_eq!(canonical_content(None), "");
        assert_eq!(canonical_content(Some(&json!(3))), "3");
        assert_eq!(decode_content("# Notes"), json!("# Notes"));
        assert_eq!(decode_content("{not json"), json!("{not json"));
    }

    #[test]
    fn test_json_looking_text_stays_text() {
        for text in [r#"{"a":1}"#, "[1, 2]", r#""quoted""#, r#"  "padded" "#] {
            let stored = canonical_content(Some(&json!(text)));
            assert_ne!(stored, text);
            assert_eq!(decode_content(&stored), json!(text), "{text}");
        }
        // a stray quote that is not a JSON literal is kept as is
        assert_eq!(canonical_content(Some(&json!("\"Hi"))), "\"Hi");
        assert_eq!(decode_content("\"Hi"), json!("\"Hi"));
    }

    #[test]
    fn test_concept_order_index_bounds() {
        let err = ConceptDraft::from_value(&json!({"title": "A", "order_index": i64::MAX}))
            .unwrap_err();
        assert_eq!(
            err,
            PayloadError::OutOfRange {
                entity: "concept",
                field: "order_index"
            }
        );
        assert!(ConceptDraft::from_value(&json!({"title": "A", "order_index": u64::MAX})).is_err());
        assert!(ConceptDraft::from_value(&json!({"title": "A", "order_index": 1.5})).is_err());
        let draft = ConceptDraft::from_value(&json!({"title": "A", "order_index": "2"})).unwrap();
        assert_eq!(draft.order_index, None);
    }

    #[test]
    fn test_concept_list_bare_or_wrapped() {
        let bare = json!([{"title": "A", "order_index": 1}, {"title": "B"}]);
        let list = parse_concept_list(&bare).unwrap();
        assert_eq!(list[0].order_index, Some(1));
        assert_eq!(list[1].order_index, None);

        let wrapped = json!({"concepts": [{"title": "A"}]});
        assert_eq!(parse_concept_list(&wrapped).unwrap().len(), 1);
        assert!(parse_concept_list(&json!({"items": []})).is_err());
    }

    #[test]
    fn test_activity_list_wrapped() {
        let value = json!({"activities": [{"type": "Flashcard", "instructions": "Flip", "content": {"front": "a", "back": "b"}}]});
        let list = parse_activity_list(&value).unwrap();
        assert_eq!(list[0].kind, ActivityKind::Flashcard);
    }

    #[test]
    fn test_fenced_json_response() {
        let text = "```json\n{\"title\": \"X\"}\n```";
        assert_eq!(parse_json_response(text).unwrap(), json!({"title": "X"}));
        assert!(matches!(
            parse_json_response("not json at all"),
            Err(PayloadError::NotJson(_))
        ));
    }
}
