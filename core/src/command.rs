//! Steering commands and the queue bridging the network thread to the
//! scheduler.
//!
//! RULE: a command carries its payload inside the variant. There are no
//! out-of-band staging fields, so applying a command is atomic with its
//! arguments even when commands race with the simulation loop.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::types::Year;

/// All operator-issued steering commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum SteeringCommand {
    Play,
    Pause,
    StepForward,
    StepBack,
    Stop,
    /// Navigate to a checkpoint index (backward) or extend the target date
    /// (forward). Index 1 is the end of the first simulated year.
    GoTo { year: i32 },
    /// Inject an intervention raster for `year`, discarding any previously
    /// scheduled interventions for that year and later.
    LoadData { year: Year, name: String },
    /// Change the basename of subsequently emitted output series.
    ChangeName { name: String },
    /// Resynchronize every realization to the canonical one at the next
    /// year boundary.
    SyncRuns,
}

/// FIFO of steering commands. The network thread pushes, the scheduler pops
/// one command at the top of every loop iteration. `pop` never blocks.
#[derive(Clone)]
pub struct CommandQueue {
    tx: Sender<SteeringCommand>,
    rx: Receiver<SteeringCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, cmd: SteeringCommand) {
        // the queue holds both ends, so the channel cannot be disconnected
        self.tx.send(cmd).ok();
    }

    pub fn pop(&self) -> Option<SteeringCommand> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let queue = CommandQueue::new();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn commands_come_out_in_arrival_order() {
        let queue = CommandQueue::new();
        queue.push(SteeringCommand::Play);
        queue.push(SteeringCommand::GoTo { year: 3 });
        queue.push(SteeringCommand::Stop);
        assert_eq!(queue.pop(), Some(SteeringCommand::Play));
        assert_eq!(queue.pop(), Some(SteeringCommand::GoTo { year: 3 }));
        assert_eq!(queue.pop(), Some(SteeringCommand::Stop));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn commands_serialize_with_tag_and_payload() {
        let cmd = SteeringCommand::LoadData {
            year: 2021,
            name: "spray_block_a".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"cmd\":\"load_data\""), "got {json}");
        assert!(json.contains("\"year\":2021"), "got {json}");
    }
}
