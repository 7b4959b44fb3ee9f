//! `DialogSession` / `DialogTurn` (§3): the persisted state `CheckpointStore`
//! holds under `dialog/<session_id>` (§6.5). Pure data — all mutation
//! lives in `GuidedDialogEngine`.

use crate::types::{now, ExtractedFields, RoutingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// §3 DialogSession lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Expired,
}

/// §3 DialogTurn role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// §3 DialogTurn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub fields_extracted_this_turn: ExtractedFields,
    pub decision_snapshot: RoutingDecision,
}

/// §3 DialogSession, owned exclusively by `GuidedDialogEngine` (§3
/// "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub initial_decision: RoutingDecision,
    pub current_decision: RoutingDecision,
    pub turns: Vec<DialogTurn>,
    pub accumulated_fields: ExtractedFields,
}

impl DialogSession {
    pub fn new(session_id: String, initial_decision: RoutingDecision) -> Self {
        let timestamp = now();
        let accumulated_fields = initial_decision.extracted_fields.clone();
        Self {
            session_id,
            created_at: timestamp,
            last_update_at: timestamp,
            status: SessionStatus::Active,
            current_decision: initial_decision.clone(),
            initial_decision,
            turns: Vec::new(),
            accumulated_fields,
        }
    }

    /// §8 invariant 3: the category never flips across a dialog's life.
    pub fn category_invariant_holds(&self) -> bool {
        self.initial_decision.intent_category == self.current_decision.intent_category
    }

    pub fn is_idle_expired(&self, idle_timeout: chrono::Duration) -> bool {
        now() - self.last_update_at >= idle_timeout
    }

    pub fn push_turn(&mut self, turn: DialogTurn) {
        self.last_update_at = now();
        self.turns.push(turn);
    }
}
