//! Session events — the audit trail of an interactive run.
//!
//! Every applied steering command and every emitted artifact is recorded
//! in the session log, so an operator can reconstruct after the fact which
//! commands produced which outputs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::command::SteeringCommand;
use crate::types::{RunId, StepIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RunInitialized {
        run_id: RunId,
        seed: u64,
        runs: usize,
    },
    CommandApplied {
        command: SteeringCommand,
    },
    CheckpointSaved {
        index: usize,
    },
    CheckpointRestored {
        index: usize,
    },
    OutputWritten {
        kind: String,
        name: String,
    },
    RunsSynced,
    SimulationEnded,
}

/// Extract a stable string name from a SessionEvent variant. Used for the
/// event_type column in the session log.
pub fn event_type_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::RunInitialized { .. } => "run_initialized",
        SessionEvent::CommandApplied { .. } => "command_applied",
        SessionEvent::CheckpointSaved { .. } => "checkpoint_saved",
        SessionEvent::CheckpointRestored { .. } => "checkpoint_restored",
        SessionEvent::OutputWritten { .. } => "output_written",
        SessionEvent::RunsSynced => "runs_synced",
        SessionEvent::SimulationEnded => "simulation_ended",
    }
}

/// A session log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub step: StepIndex,
    pub sim_date: NaiveDate,
    pub event_type: String,
    pub payload: String,
}
