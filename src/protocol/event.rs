use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ErrorCategory;

/// Mutation carried by an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Create, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

/// Entity an inbound event applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Question,
    Retrospective,
    Answer,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::Question,
        EntityType::Retrospective,
        EntityType::Answer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Question => "question",
            EntityType::Retrospective => "retrospective",
            EntityType::Answer => "answer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

/// Routing key of an event: one handler per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub action: Action,
    pub entity: EntityType,
}

impl EventKey {
    pub const fn new(action: Action, entity: EntityType) -> Self {
        Self { action, entity }
    }

    /// Every action/entity combination
    pub fn all() -> impl Iterator<Item = EventKey> {
        Action::ALL.into_iter().flat_map(|action| {
            EntityType::ALL
                .into_iter()
                .map(move |entity| EventKey::new(action, entity))
        })
    }
}

impl fmt::Display for EventKey {
    /// Handler-style name, e.g. `updateAnswer`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.entity.as_str();
        let (head, tail) = entity.split_at(1);
        write!(
            f,
            "{}{}{}",
            self.action.as_str(),
            head.to_ascii_uppercase(),
            tail
        )
    }
}

/// Wire shape of an inbound frame, before the tags are checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub action: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub value: Value,
}

/// A routed inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub key: EventKey,
    pub value: Value,
}

#[derive(Debug)]
pub enum DecodeError {
    /// Frame is not JSON or lacks the `action`/`type` fields
    Malformed(serde_json::Error),

    /// Well-formed frame naming an action/type pair with no handler
    Unsupported { action: String, kind: String },
}

impl DecodeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DecodeError::Malformed(_) => ErrorCategory::Decode,
            DecodeError::Unsupported { .. } => ErrorCategory::Routing,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed websocket frame: {}", e),
            DecodeError::Unsupported { action, kind } => write!(
                f,
                "Unsupported event sent in websocket. Action: \"{}\", Type: \"{}\"",
                action, kind
            ),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(e) => Some(e),
            DecodeError::Unsupported { .. } => None,
        }
    }
}

/// Parse a text frame into a routed event
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let raw: RawEvent = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

    match (Action::parse(&raw.action), EntityType::parse(&raw.kind)) {
        (Some(action), Some(entity)) => Ok(InboundEvent {
            key: EventKey::new(action, entity),
            value: raw.value,
        }),
        _ => Err(DecodeError::Unsupported {
            action: raw.action,
            kind: raw.kind,
        }),
    }
}
