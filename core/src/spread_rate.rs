//! Yearly directional spread rates.
//!
//! The tracker follows the bounding box of the infestation and reports how
//! far each edge (N, S, E, W) moved per simulated year, in map units. A
//! direction with no movement reports 0; a year with no infestation at
//! either end of the comparison reports NaN for all directions.

use serde::{Deserialize, Serialize};

use crate::raster::HostRaster;
use crate::types::Year;

/// One CSV row of the spread-rate output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadRateRow {
    pub year: Year,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    north_row: usize,
    south_row: usize,
    west_col: usize,
    east_col: usize,
}

fn bounds(infected: &HostRaster) -> Option<Bounds> {
    let mut found: Option<Bounds> = None;
    for row in 0..infected.rows() {
        for col in 0..infected.cols() {
            if infected[(row, col)] <= 0 {
                continue;
            }
            found = Some(match found {
                None => Bounds {
                    north_row: row,
                    south_row: row,
                    west_col: col,
                    east_col: col,
                },
                Some(b) => Bounds {
                    north_row: b.north_row.min(row),
                    south_row: b.south_row.max(row),
                    west_col: b.west_col.min(col),
                    east_col: b.east_col.max(col),
                },
            });
        }
    }
    found
}

#[derive(Debug, Clone)]
pub struct SpreadRateTracker {
    ew_res: f64,
    ns_res: f64,
    boundary: Option<Bounds>,
    rates: Vec<(f64, f64, f64, f64)>,
}

impl SpreadRateTracker {
    pub fn new(initial_infected: &HostRaster, ew_res: f64, ns_res: f64, num_years: usize) -> Self {
        Self {
            ew_res,
            ns_res,
            boundary: bounds(initial_infected),
            rates: vec![(f64::NAN, f64::NAN, f64::NAN, f64::NAN); num_years],
        }
    }

    /// Record the rate for `year` (zero-based simulation year) from the
    /// current infestation extent, and roll the reference boundary forward.
    pub fn compute_yearly(&mut self, infected: &HostRaster, year: usize) {
        let new = bounds(infected);
        let rate = match (self.boundary, new) {
            (Some(old), Some(new)) => (
                (old.north_row as f64 - new.north_row as f64) * self.ns_res,
                (new.south_row as f64 - old.south_row as f64) * self.ns_res,
                (new.east_col as f64 - old.east_col as f64) * self.ew_res,
                (old.west_col as f64 - new.west_col as f64) * self.ew_res,
            ),
            _ => (f64::NAN, f64::NAN, f64::NAN, f64::NAN),
        };
        if let Some(slot) = self.rates.get_mut(year) {
            *slot = rate;
        }
        if new.is_some() {
            self.boundary = new;
        }
    }

    pub fn yearly_rate(&self, year: usize) -> (f64, f64, f64, f64) {
        self.rates
            .get(year)
            .copied()
            .unwrap_or((f64::NAN, f64::NAN, f64::NAN, f64::NAN))
    }

    /// Rows for this tracker alone (used after the ensemble has been
    /// synced to one canonical realization).
    pub fn rows(&self, num_years: usize, start_year: Year) -> Vec<SpreadRateRow> {
        (0..num_years)
            .map(|year| {
                let (north, south, east, west) = self.yearly_rate(year);
                SpreadRateRow {
                    year: start_year + year as Year,
                    north: rounded(north),
                    south: rounded(south),
                    east: rounded(east),
                    west: rounded(west),
                }
            })
            .collect()
    }
}

/// Average rates across trackers per direction, skipping NaN entries.
pub fn average_rows(
    trackers: &[&SpreadRateTracker],
    num_years: usize,
    start_year: Year,
) -> Vec<SpreadRateRow> {
    (0..num_years)
        .map(|year| {
            let mut sums = [0.0f64; 4];
            let mut counts = [0usize; 4];
            for tracker in trackers {
                let (n, s, e, w) = tracker.yearly_rate(year);
                for (i, value) in [n, s, e, w].into_iter().enumerate() {
                    if !value.is_nan() {
                        sums[i] += value;
                        counts[i] += 1;
                    }
                }
            }
            let avg = |i: usize| {
                if counts[i] == 0 {
                    f64::NAN
                } else {
                    rounded(sums[i] / counts[i] as f64)
                }
            };
            SpreadRateRow {
                year: start_year + year as Year,
                north: avg(0),
                south: avg(1),
                east: avg(2),
                west: avg(3),
            }
        })
        .collect()
}

fn rounded(value: f64) -> f64 {
    if value.is_nan() {
        value
    } else {
        value.round()
    }
}
