//! Simulation clock — owns the simulated date, the sub-step counter, and
//! the movable target date that steering commands manipulate.
//!
//! Week stepping uses the 52-week year: weeks 1-51 are seven days, week 52
//! absorbs the remaining days of the year. Advancing from week 52 lands on
//! Jan 1 of the next year. Invariant: start <= target <= end; the current
//! date only moves backward through an explicit `restore`.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::types::{StepIndex, Year};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Week,
    Month,
}

/// Months in which spread is active, as a closed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub first_month: u32,
    pub last_month: u32,
}

impl Season {
    pub fn month_in_season(&self, month: u32) -> bool {
        month >= self.first_month && month <= self.last_month
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    start:        NaiveDate,
    end:          NaiveDate,
    current:      NaiveDate,
    target:       NaiveDate,
    current_step: StepIndex,
    step_kind:    StepKind,
}

/// First ordinal day of the last (52nd) week of any year.
const LAST_WEEK_ORDINAL: u32 = 7 * 51 + 1;

fn date(year: Year, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

fn year_end(year: Year) -> NaiveDate {
    date(year, 12, 31)
}

fn last_day_of_month(year: Year, month: u32) -> NaiveDate {
    if month == 12 {
        year_end(year)
    } else {
        date(year, month + 1, 1) - Duration::days(1)
    }
}

impl SimulationClock {
    /// Batch-mode clock: runs from Jan 1 of `start_year` straight through
    /// Dec 31 of `end_year`.
    pub fn new(start_year: Year, end_year: Year, step_kind: StepKind) -> Self {
        let start = date(start_year, 1, 1);
        Self {
            start,
            end: year_end(end_year),
            current: start,
            target: year_end(end_year),
            current_step: 0,
            step_kind,
        }
    }

    /// Pull the target back to the start date. Used when a steering session
    /// attaches: the run waits for an explicit Play.
    pub fn hold_at_start(&mut self) {
        self.target = self.start;
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn current(&self) -> NaiveDate {
        self.current
    }

    pub fn target(&self) -> NaiveDate {
        self.target
    }

    pub fn current_step(&self) -> StepIndex {
        self.current_step
    }

    pub fn step_kind(&self) -> StepKind {
        self.step_kind
    }

    pub fn num_years(&self) -> usize {
        (self.end.year() - self.start.year() + 1) as usize
    }

    /// Simulation year of the current date, counted from zero.
    pub fn years_from_start(&self) -> usize {
        (self.current.year() - self.start.year()) as usize
    }

    pub fn play(&mut self) {
        self.target = self.end;
    }

    pub fn pause(&mut self) {
        self.target = self.current;
    }

    /// Allow execution up to the end of the next simulated year, clamped
    /// to the overall end date.
    pub fn step_forward(&mut self) {
        let next = self.next_year_end();
        self.target = next.min(self.end);
    }

    /// Forward jump: allow execution up to Dec 31 of simulated year
    /// `year_index` (1 = first year).
    pub fn jump_forward(&mut self, year_index: i32) {
        self.target = year_end(self.start.year() + year_index - 1);
    }

    /// Reset both current and target date after a checkpoint restore.
    pub fn restore(&mut self, at: NaiveDate, step: StepIndex) {
        self.current = at;
        self.target = at;
        self.current_step = step;
    }

    /// True while stepping is allowed: the target has moved past the start
    /// and the current date has not overtaken it.
    pub fn should_step(&self) -> bool {
        self.target > self.start && self.current <= self.target
    }

    pub fn past_end(&self) -> bool {
        self.current > self.end
    }

    pub fn is_last_step_of_year(&self) -> bool {
        match self.step_kind {
            StepKind::Month => self.current.month() == 12,
            StepKind::Week => self.current.ordinal() >= LAST_WEEK_ORDINAL,
        }
    }

    /// Last calendar day of the current sub-step period.
    pub fn period_end(&self) -> NaiveDate {
        match self.step_kind {
            StepKind::Month => last_day_of_month(self.current.year(), self.current.month()),
            StepKind::Week => {
                if self.current.ordinal() >= LAST_WEEK_ORDINAL {
                    year_end(self.current.year())
                } else {
                    self.current + Duration::days(6)
                }
            }
        }
    }

    /// Move to the first day of the next sub-step period.
    pub fn advance(&mut self) {
        self.current = match self.step_kind {
            StepKind::Month => {
                if self.current.month() == 12 {
                    date(self.current.year() + 1, 1, 1)
                } else {
                    date(self.current.year(), self.current.month() + 1, 1)
                }
            }
            StepKind::Week => {
                if self.current.ordinal() >= LAST_WEEK_ORDINAL {
                    date(self.current.year() + 1, 1, 1)
                } else {
                    self.current + Duration::days(7)
                }
            }
        };
        self.current_step += 1;
    }

    fn next_year_end(&self) -> NaiveDate {
        let this_year_end = year_end(self.current.year());
        if self.current == this_year_end {
            year_end(self.current.year() + 1)
        } else {
            this_year_end
        }
    }
}
