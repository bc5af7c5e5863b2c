/// Database row types, mapped straight from SQLite rows.
/// Converted to partyline-types models at the edge of this crate.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use partyline_types::models::{Action, Reason, TargetKey};

pub struct ChannelRow {
    pub name: String,
    /// JSON-encoded channel aggregate, members included.
    pub body: String,
    pub updated_at: String,
}

pub struct ReasonRow {
    pub id: String,
    pub channel: String,
    pub target: String,
    pub actor: String,
    pub action: String,
    pub message: String,
    pub score: i64,
    pub reverses: Option<String>,
    pub created_at: String,
}

impl ReasonRow {
    pub fn from_reason(reason: &Reason) -> Self {
        Self {
            id: reason.id.to_string(),
            channel: reason.target.channel.clone(),
            target: reason.target.name.clone(),
            actor: reason.actor.clone(),
            action: reason.action.verb().to_string(),
            message: reason.message.clone(),
            score: reason.score,
            reverses: reason.reverses.map(|id| id.to_string()),
            created_at: reason.created_at.to_rfc3339(),
        }
    }

    pub fn into_reason(self) -> Result<Reason> {
        let action = Action::from_verb(&self.action)
            .ok_or_else(|| anyhow!("Unknown action {:?} on reason {}", self.action, self.id))?;
        let reverses = self.reverses.as_deref().map(Uuid::parse_str).transpose()?;

        Ok(Reason {
            id: Uuid::parse_str(&self.id)?,
            target: TargetKey::new(&self.channel, &self.target),
            actor: self.actor,
            action,
            message: self.message,
            score: self.score,
            reverses,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
        })
    }
}
