//! Weather inputs for the simulation.
//!
//! Two series feed the loop: per-step weather coefficients (either supplied
//! directly or as a moisture/temperature coefficient pair multiplied
//! elementwise) and per-year actual temperature rasters for lethal-condition
//! culling. A missing temperature year is fatal; the loop checks before it
//! commits to a year-closing batch.

use crate::error::{SimError, SimResult};
use crate::raster::CoeffRaster;
use crate::types::StepIndex;

#[derive(Debug, Clone, Default)]
pub struct WeatherSeries {
    coefficients: Vec<CoeffRaster>,
    temperatures: Vec<CoeffRaster>,
}

impl WeatherSeries {
    /// No weather influence; every step runs under optimal conditions.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_coefficients(coefficients: Vec<CoeffRaster>) -> Self {
        Self {
            coefficients,
            temperatures: Vec::new(),
        }
    }

    /// Combine separate moisture and temperature coefficient series into
    /// one weather coefficient per step.
    pub fn from_moisture_temperature(
        moisture: Vec<CoeffRaster>,
        temperature: Vec<CoeffRaster>,
    ) -> SimResult<Self> {
        let coefficients = moisture
            .iter()
            .zip(&temperature)
            .map(|(m, t)| m.product(t))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            coefficients,
            temperatures: Vec::new(),
        })
    }

    pub fn with_temperatures(mut self, temperatures: Vec<CoeffRaster>) -> Self {
        self.temperatures = temperatures;
        self
    }

    pub fn has_weather(&self) -> bool {
        !self.coefficients.is_empty()
    }

    pub fn has_temperatures(&self) -> bool {
        !self.temperatures.is_empty()
    }

    pub fn temperature_years(&self) -> usize {
        self.temperatures.len()
    }

    pub fn coefficient(&self, step: StepIndex) -> SimResult<&CoeffRaster> {
        self.coefficients
            .get(step)
            .ok_or(SimError::MissingWeather { step })
    }

    pub fn temperature(&self, year: usize) -> SimResult<&CoeffRaster> {
        self.temperatures
            .get(year)
            .ok_or(SimError::MissingTemperature { year })
    }
}
