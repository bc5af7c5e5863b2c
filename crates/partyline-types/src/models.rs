use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one counter: scoped to a channel, name always lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub channel: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(channel: &str, name: &str) -> Self {
        Self {
            channel: channel.to_string(),
            name: name.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Increment,
    Decrement,
}

impl Action {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "++" => Some(Self::Increment),
            "--" => Some(Self::Decrement),
            _ => None,
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "increment" => Some(Self::Increment),
            "decrement" => Some(Self::Decrement),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Increment => Self::Decrement,
            Self::Decrement => Self::Increment,
        }
    }

    pub fn delta(self) -> i64 {
        match self {
            Self::Increment => 1,
            Self::Decrement => -1,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Increment => "increment",
            Self::Decrement => "decrement",
        }
    }
}

/// A named counter. Created lazily with score 0, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub key: TargetKey,
    pub score: i64,
}

impl Target {
    pub fn new(key: TargetKey) -> Self {
        Self { key, score: 0 }
    }
}

/// One immutable ledger entry: a single ±1 change and the score it produced.
///
/// Undoing never rewrites an entry. The compensating entry points back at
/// the one it reverses through `reverses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub id: Uuid,
    pub target: TargetKey,
    /// Normalized identity of the member who acted.
    pub actor: String,
    pub action: Action,
    /// Full text of the message that carried the mention.
    pub message: String,
    /// Score snapshot right after this entry was applied.
    pub score: i64,
    pub reverses: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Reason {
    pub fn score_before(&self) -> i64 {
        self.score - self.action.delta()
    }

    /// The mention as the user typed it, e.g. `x++`.
    pub fn mention(&self) -> String {
        format!("{}{}", self.target.name, self.action.symbol())
    }

    pub fn is_undo(&self) -> bool {
        self.reverses.is_some()
    }
}

/// Heterogeneous record set handed to the store for one atomic write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Target(Target),
    Reason(Reason),
}
