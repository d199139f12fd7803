//! Year-indexed intervention schedule.
//!
//! A treatment raster holds the treated fraction per cell (1.0 = fully
//! treated). Rewinding past an applied intervention is supported through
//! `clear_after_year`, which discards the schedule from a given year on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::raster::{CoeffRaster, HostRaster};
use crate::types::Year;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentApplication {
    /// Scale every host pool by the untreated fraction of the cell.
    RatioToAll,
    /// Remove every infected host in a treated cell; susceptible hosts are
    /// still scaled by the untreated fraction.
    AllInfectedInCell,
}

#[derive(Debug, Clone)]
pub struct TreatmentSchedule {
    application: TreatmentApplication,
    maps: BTreeMap<Year, CoeffRaster>,
}

impl TreatmentSchedule {
    pub fn new(application: TreatmentApplication) -> Self {
        Self {
            application,
            maps: BTreeMap::new(),
        }
    }

    pub fn add_treatment(&mut self, year: Year, map: CoeffRaster) {
        self.maps.insert(year, map);
    }

    /// Discard every scheduled intervention for `year` and later.
    pub fn clear_after_year(&mut self, year: Year) {
        self.maps.retain(|&y, _| y < year);
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn scheduled_years(&self) -> impl Iterator<Item = Year> + '_ {
        self.maps.keys().copied()
    }

    /// Apply the intervention scheduled for `year`, if any, to both host
    /// pools. No-op when the year has no treatment.
    pub fn apply_treatment_host(
        &self,
        year: Year,
        infected: &mut HostRaster,
        susceptible: &mut HostRaster,
    ) {
        let Some(map) = self.maps.get(&year) else {
            return;
        };
        for row in 0..map.rows() {
            for col in 0..map.cols() {
                let treated = map[(row, col)];
                if treated <= 0.0 {
                    continue;
                }
                let keep = 1.0 - treated;
                match self.application {
                    TreatmentApplication::RatioToAll => {
                        infected[(row, col)] =
                            (f64::from(infected[(row, col)]) * keep).round() as i32;
                    }
                    TreatmentApplication::AllInfectedInCell => {
                        infected[(row, col)] = 0;
                    }
                }
                susceptible[(row, col)] =
                    (f64::from(susceptible[(row, col)]) * keep).round() as i32;
            }
        }
    }

    /// Apply the intervention scheduled for `year` to one infected age
    /// cohort. Used when mortality tracking is enabled.
    pub fn apply_treatment_infected(&self, year: Year, cohort: &mut HostRaster) {
        let Some(map) = self.maps.get(&year) else {
            return;
        };
        for row in 0..map.rows() {
            for col in 0..map.cols() {
                let treated = map[(row, col)];
                if treated <= 0.0 {
                    continue;
                }
                match self.application {
                    TreatmentApplication::RatioToAll => {
                        cohort[(row, col)] =
                            (f64::from(cohort[(row, col)]) * (1.0 - treated)).round() as i32;
                    }
                    TreatmentApplication::AllInfectedInCell => {
                        cohort[(row, col)] = 0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_treatment(rows: usize, cols: usize) -> CoeffRaster {
        CoeffRaster::filled(rows, cols, 1.0)
    }

    #[test]
    fn ratio_application_scales_both_pools() {
        let mut schedule = TreatmentSchedule::new(TreatmentApplication::RatioToAll);
        let mut map = CoeffRaster::filled(1, 2, 0.0);
        map[(0, 0)] = 0.5;
        schedule.add_treatment(2020, map);

        let mut infected = HostRaster::from_cells(1, 2, vec![10, 10]).unwrap();
        let mut susceptible = HostRaster::from_cells(1, 2, vec![20, 20]).unwrap();
        schedule.apply_treatment_host(2020, &mut infected, &mut susceptible);

        assert_eq!(infected.cells(), &[5, 10]);
        assert_eq!(susceptible.cells(), &[10, 20]);
    }

    #[test]
    fn all_infected_application_empties_treated_cells() {
        let mut schedule = TreatmentSchedule::new(TreatmentApplication::AllInfectedInCell);
        schedule.add_treatment(2020, full_treatment(1, 1));

        let mut infected = HostRaster::from_cells(1, 1, vec![7]).unwrap();
        let mut susceptible = HostRaster::from_cells(1, 1, vec![3]).unwrap();
        schedule.apply_treatment_host(2020, &mut infected, &mut susceptible);

        assert_eq!(infected.cells(), &[0]);
        assert_eq!(susceptible.cells(), &[0]);
    }

    #[test]
    fn unscheduled_year_is_a_no_op() {
        let schedule = TreatmentSchedule::new(TreatmentApplication::RatioToAll);
        let mut infected = HostRaster::from_cells(1, 1, vec![7]).unwrap();
        let mut susceptible = HostRaster::from_cells(1, 1, vec![3]).unwrap();
        schedule.apply_treatment_host(2020, &mut infected, &mut susceptible);
        assert_eq!(infected.cells(), &[7]);
        assert_eq!(susceptible.cells(), &[3]);
    }

    #[test]
    fn clear_after_year_truncates_inclusively() {
        let mut schedule = TreatmentSchedule::new(TreatmentApplication::RatioToAll);
        schedule.add_treatment(2019, full_treatment(1, 1));
        schedule.add_treatment(2020, full_treatment(1, 1));
        schedule.add_treatment(2021, full_treatment(1, 1));

        schedule.clear_after_year(2020);
        let years: Vec<_> = schedule.scheduled_years().collect();
        assert_eq!(years, vec![2019]);
    }
}
