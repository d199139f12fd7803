//! Run configuration and scenario inputs.
//!
//! `SimulationConfig` is everything the scheduler needs to know about a
//! run; `ScenarioConfig` is the JSON shape of the input data (host grids,
//! weather series). Both load from plain JSON files.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clock::{Season, StepKind};
use crate::error::{SimError, SimResult};
use crate::kernel::KernelKind;
use crate::output::OutputConfig;
use crate::raster::{CoeffRaster, HostRaster, Raster};
use crate::treatment::TreatmentApplication;
use crate::types::Year;
use crate::weather::WeatherSeries;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub kind: KernelKind,
    /// Distance parameter of the dispersal kernel, in map units.
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LethalConfig {
    /// Temperature below which the pathogen dies.
    pub temperature: f64,
    /// Month in which lethal-condition culling fires, once per year.
    pub month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MortalityConfig {
    /// Fraction of each infected cohort that dies per year.
    pub rate: f64,
    /// Years from infection until mortality can occur (1 = hosts may die
    /// at the end of their first year).
    pub first_year_to_die: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub start_year: Year,
    pub end_year: Year,
    pub step: StepKind,
    pub season: Season,
    pub runs: usize,
    pub threads: usize,
    pub master_seed: u64,
    /// Spores or pest units produced by a single host under optimal
    /// weather conditions.
    pub reproductive_rate: f64,
    pub kernel: KernelConfig,
    /// Cell resolution in map units, east-west and north-south.
    pub ew_res: f64,
    pub ns_res: f64,
    #[serde(default)]
    pub lethal: Option<LethalConfig>,
    #[serde(default)]
    pub treatment_month: Option<u32>,
    #[serde(default = "default_treatment_application")]
    pub treatment_application: TreatmentApplication,
    #[serde(default)]
    pub mortality: Option<MortalityConfig>,
    #[serde(default)]
    pub outputs: OutputConfig,
}

fn default_treatment_application() -> TreatmentApplication {
    TreatmentApplication::RatioToAll
}

impl SimulationConfig {
    pub fn load(path: &Path) -> SimResult<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_years(&self) -> usize {
        (self.end_year - self.start_year + 1) as usize
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.start_year > self.end_year {
            return Err(SimError::InvalidConfig(
                "start year must precede the end year".into(),
            ));
        }
        if self.runs == 0 {
            return Err(SimError::InvalidConfig("at least one run is required".into()));
        }
        if self.threads == 0 {
            return Err(SimError::InvalidConfig("at least one thread is required".into()));
        }
        if self.season.first_month < 1
            || self.season.last_month > 12
            || self.season.first_month > self.season.last_month
        {
            return Err(SimError::InvalidConfig(format!(
                "invalid season {},{}",
                self.season.first_month, self.season.last_month
            )));
        }
        if let Some(mortality) = &self.mortality {
            if !(0.0..=1.0).contains(&mortality.rate) {
                return Err(SimError::InvalidConfig(
                    "mortality rate must be within 0..=1".into(),
                ));
            }
            if mortality.first_year_to_die == 0 {
                return Err(SimError::InvalidConfig(
                    "mortality time lag counts from 1".into(),
                ));
            }
            if mortality.first_year_to_die > self.num_years() {
                return Err(SimError::InvalidConfig(format!(
                    "mortality time lag {} exceeds the {} simulated years",
                    mortality.first_year_to_die,
                    self.num_years()
                )));
            }
        }
        if self.outputs.dead_series.is_some()
            && (self.mortality.is_none() || !self.outputs.series_as_single_run)
        {
            return Err(SimError::InvalidConfig(
                "dead series requires mortality and single-run series output".into(),
            ));
        }
        Ok(())
    }
}

/// JSON shape of the scenario inputs: initial grids plus optional weather
/// series. Cell data is row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub rows: usize,
    pub cols: usize,
    /// Hosts of the modeled species per cell.
    pub host: Vec<i32>,
    /// All plants per cell (hosts and non-hosts).
    pub total: Vec<i32>,
    /// Initially infected hosts per cell.
    pub infected: Vec<i32>,
    /// One coefficient grid per simulation step.
    #[serde(default)]
    pub weather_coefficients: Vec<Vec<f64>>,
    /// One temperature grid per simulated year.
    #[serde(default)]
    pub temperatures: Vec<Vec<f64>>,
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> SimResult<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Initial (host, total, infected) rasters.
    pub fn rasters(&self) -> SimResult<(HostRaster, HostRaster, HostRaster)> {
        let host = Raster::from_cells(self.rows, self.cols, self.host.clone())?;
        let total = Raster::from_cells(self.rows, self.cols, self.total.clone())?;
        let infected = Raster::from_cells(self.rows, self.cols, self.infected.clone())?;
        Ok((host, total, infected))
    }

    pub fn weather(&self) -> SimResult<WeatherSeries> {
        let coefficients = self
            .weather_coefficients
            .iter()
            .map(|cells| CoeffRaster::from_cells(self.rows, self.cols, cells.clone()))
            .collect::<SimResult<Vec<_>>>()?;
        let temperatures = self
            .temperatures
            .iter()
            .map(|cells| CoeffRaster::from_cells(self.rows, self.cols, cells.clone()))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(WeatherSeries::from_coefficients(coefficients).with_temperatures(temperatures))
    }
}
