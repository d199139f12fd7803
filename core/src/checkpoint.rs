//! Year-indexed snapshot arena for rewind.
//!
//! The store is pre-sized to one slot per simulated year plus one: slot 0
//! holds the pristine initial state, slot i holds the state exactly at the
//! end of simulated year i-1. Slots up to `last_index` are valid; a save
//! resets `last_index` to the saved slot, which implicitly truncates any
//! stale future left behind by a rewind.

use chrono::NaiveDate;

use crate::raster::HostRaster;
use crate::realization::Realization;
use crate::types::StepIndex;

#[derive(Debug, Clone)]
pub struct CheckpointSlot {
    pub susceptible: Vec<HostRaster>,
    pub infected: Vec<HostRaster>,
    pub step: StepIndex,
    pub date: NaiveDate,
}

pub struct CheckpointStore {
    slots: Vec<CheckpointSlot>,
    last: usize,
}

impl CheckpointStore {
    /// Allocate the full arena up front and capture the initial state in
    /// slot 0.
    pub fn new(
        num_years: usize,
        num_runs: usize,
        initial_susceptible: &HostRaster,
        initial_infected: &HostRaster,
        start: NaiveDate,
    ) -> Self {
        let initial = CheckpointSlot {
            susceptible: vec![initial_susceptible.clone(); num_runs],
            infected: vec![initial_infected.clone(); num_runs],
            step: 0,
            date: start,
        };
        Self {
            slots: vec![initial; num_years + 1],
            last: 0,
        }
    }

    /// Total number of slots (years + 1).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the most recently saved checkpoint.
    pub fn last_index(&self) -> usize {
        self.last
    }

    /// Deep-copy every realization's raster state into `index` and mark it
    /// as the newest checkpoint.
    pub fn save(
        &mut self,
        index: usize,
        realizations: &[Realization],
        step: StepIndex,
        date: NaiveDate,
    ) {
        let slot = &mut self.slots[index];
        for (run, realization) in realizations.iter().enumerate() {
            slot.susceptible[run].clone_from(&realization.susceptible);
            slot.infected[run].clone_from(&realization.infected);
        }
        slot.step = step;
        slot.date = date;
        self.last = index;
    }

    /// Read-only access to a saved slot. Only indices up to `last_index`
    /// hold meaningful state.
    pub fn slot(&self, index: usize) -> &CheckpointSlot {
        &self.slots[index]
    }

    /// Move the checkpoint cursor one year back. Returns the new cursor
    /// index, or None when already at the initial state.
    pub fn step_back(&mut self) -> Option<usize> {
        if self.last == 0 {
            return None;
        }
        self.last -= 1;
        Some(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{DispersalKernel, KernelKind};
    use crate::model::SporeModel;

    fn realization(value: i32) -> Realization {
        Realization::new(
            0,
            HostRaster::filled(2, 2, value),
            HostRaster::filled(2, 2, 0),
            3,
            DispersalKernel::new(KernelKind::Cauchy, 10.0, 100.0, 100.0, 1, 0),
            Box::new(SporeModel::new(1, 2, 2)),
            100.0,
            100.0,
        )
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
    }

    #[test]
    fn arena_is_pre_sized_with_initial_state() {
        let sus = HostRaster::filled(2, 2, 9);
        let inf = HostRaster::filled(2, 2, 1);
        let store = CheckpointStore::new(3, 2, &sus, &inf, start());
        assert_eq!(store.len(), 4);
        assert_eq!(store.last_index(), 0);
        assert_eq!(store.slot(0).susceptible[1], sus);
        assert_eq!(store.slot(0).date, start());
    }

    #[test]
    fn save_then_step_back_restores_the_cursor() {
        let sus = HostRaster::filled(2, 2, 9);
        let inf = HostRaster::filled(2, 2, 1);
        let mut store = CheckpointStore::new(3, 1, &sus, &inf, start());

        let members = vec![realization(7)];
        let year_end = NaiveDate::from_ymd_opt(2000, 12, 1).unwrap();
        store.save(1, &members, 11, year_end);
        assert_eq!(store.last_index(), 1);
        assert_eq!(store.slot(1).susceptible[0], HostRaster::filled(2, 2, 7));
        assert_eq!(store.slot(1).step, 11);

        assert_eq!(store.step_back(), Some(0));
        assert_eq!(store.step_back(), None, "slot 0 is the floor");
    }
}
