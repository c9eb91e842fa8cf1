//! In-memory retrospective state
//!
//! Holds the current retrospective plus its questions and answers keyed by
//! id. Entity payloads stay opaque JSON; only the `id` field is interpreted.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Handler, SessionStateSink, Snapshot};
use crate::protocol::{Action, EntityType, EventKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrospectiveState {
    pub retrospective: Option<Value>,
    pub questions: BTreeMap<String, Value>,
    pub answers: BTreeMap<String, Value>,

    /// Bumped on every applied mutation or snapshot
    pub version: u64,
}

/// Shared handle to the local retrospective state
#[derive(Debug, Clone, Default)]
pub struct RetrospectiveStore {
    state: Arc<RwLock<RetrospectiveState>>,
}

impl RetrospectiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> RetrospectiveState {
        self.state.read().clone()
    }

    pub fn question(&self, id: &str) -> Option<Value> {
        self.state.read().questions.get(id).cloned()
    }

    pub fn answer(&self, id: &str) -> Option<Value> {
        self.state.read().answers.get(id).cloned()
    }

    pub fn retrospective(&self) -> Option<Value> {
        self.state.read().retrospective.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Apply one mutation; returns false when the payload carries no usable id
    pub fn apply(&self, key: EventKey, value: Value) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let applied = match key.entity {
            EntityType::Retrospective => {
                match key.action {
                    Action::Create => state.retrospective = Some(value),
                    Action::Update => match state.retrospective.as_mut() {
                        Some(current) => merge(current, value),
                        None => state.retrospective = Some(value),
                    },
                    Action::Delete => {
                        state.retrospective = None;
                        state.questions.clear();
                        state.answers.clear();
                    }
                }
                true
            }
            EntityType::Question => apply_entity(&mut state.questions, key.action, value),
            EntityType::Answer => apply_entity(&mut state.answers, key.action, value),
        };

        if applied {
            state.version += 1;
            tracing::debug!(handler = %key, version = state.version, "applied mutation");
        } else {
            tracing::warn!(handler = %key, "mutation payload has no id, ignored");
        }
        applied
    }
}

impl SessionStateSink for RetrospectiveStore {
    fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut retrospective = snapshot.retrospective;
        let questions = take_collection(&mut retrospective, "questions");
        let answers = take_collection(&mut retrospective, "answers");

        let mut state = self.state.write();
        state.retrospective = Some(retrospective);
        if let Some(questions) = questions {
            state.questions = questions;
        }
        if let Some(answers) = answers {
            state.answers = answers;
        }
        state.version += 1;
        tracing::debug!(
            questions = state.questions.len(),
            answers = state.answers.len(),
            "applied snapshot"
        );
    }

    fn handler(&self, key: EventKey) -> Option<Handler> {
        let store = self.clone();
        Some(Arc::new(move |value| {
            store.apply(key, value);
        }))
    }
}

fn apply_entity(map: &mut BTreeMap<String, Value>, action: Action, value: Value) -> bool {
    let Some(id) = entity_id(&value) else {
        return false;
    };

    match action {
        Action::Create => {
            map.insert(id, value);
        }
        Action::Update => match map.get_mut(&id) {
            Some(current) => merge(current, value),
            None => {
                map.insert(id, value);
            }
        },
        Action::Delete => {
            map.remove(&id);
        }
    }
    true
}

/// Entity id: the `id` field of an object, or the payload itself when it is a
/// bare string/number (delete events may carry just the id)
fn entity_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("id").and_then(entity_id),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shallow merge of object fields; non-objects replace the current value
fn merge(current: &mut Value, update: Value) {
    match (current, update) {
        (Value::Object(current), Value::Object(update)) => {
            for (k, v) in update {
                current.insert(k, v);
            }
        }
        (current, update) => *current = update,
    }
}

/// Pull an embedded entity list (e.g. `questions`) out of a snapshot
fn take_collection(retrospective: &mut Value, field: &str) -> Option<BTreeMap<String, Value>> {
    let obj: &mut Map<String, Value> = retrospective.as_object_mut()?;
    match obj.remove(field)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| entity_id(&item).map(|id| (id, item)))
                .collect(),
        ),
        other => {
            obj.insert(field.to_string(), other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(action: Action, entity: EntityType) -> EventKey {
        EventKey::new(action, entity)
    }

    #[test]
    fn test_question_lifecycle() {
        let store = RetrospectiveStore::new();
        assert!(store.apply(
            key(Action::Create, EntityType::Question),
            json!({"id": "q1", "title": "What went well?", "order": 1}),
        ));
        assert!(store.apply(
            key(Action::Update, EntityType::Question),
            json!({"id": "q1", "title": "What went great?"}),
        ));

        let question = store.question("q1").unwrap();
        assert_eq!(question["title"], "What went great?");
        assert_eq!(question["order"], 1);

        assert!(store.apply(key(Action::Delete, EntityType::Question), json!("q1")));
        assert!(store.question("q1").is_none());
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_payload_without_id_is_ignored() {
        let store = RetrospectiveStore::new();
        assert!(!store.apply(key(Action::Create, EntityType::Answer), json!({"text": "x"})));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_snapshot_replaces_collections() {
        let store = RetrospectiveStore::new();
        store.apply(
            key(Action::Create, EntityType::Question),
            json!({"id": "stale"}),
        );

        store.apply_snapshot(Snapshot::new(json!({
            "id": "r1",
            "name": "Sprint 12",
            "questions": [{"id": "q1"}, {"id": "q2"}],
            "answers": [{"id": "a1", "questionId": "q1"}],
        })));

        let state = store.snapshot();
        assert_eq!(state.retrospective.unwrap()["name"], "Sprint 12");
        assert_eq!(
            state.questions.keys().cloned().collect::<Vec<_>>(),
            vec!["q1", "q2"]
        );
        assert!(state.answers.contains_key("a1"));
    }

    #[test]
    fn test_delete_retrospective_clears_everything() {
        let store = RetrospectiveStore::new();
        store.apply(key(Action::Create, EntityType::Retrospective), json!({"id": "r1"}));
        store.apply(key(Action::Create, EntityType::Answer), json!({"id": "a1"}));
        store.apply(key(Action::Delete, EntityType::Retrospective), json!({"id": "r1"}));

        let state = store.snapshot();
        assert!(state.retrospective.is_none());
        assert!(state.answers.is_empty());
    }

    #[test]
    fn test_handler_applies_through_sink() {
        let store = RetrospectiveStore::new();
        let handler = store
            .handler(key(Action::Update, EntityType::Answer))
            .unwrap();
        handler(json!({"id": "a1", "text": "x"}));
        assert_eq!(store.answer("a1").unwrap()["text"], "x");
    }
}
