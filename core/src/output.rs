//! Cross-realization aggregation and artifact emission.
//!
//! The aggregator is pure in-memory computation: it reduces the ensemble's
//! infected rasters to mean / standard deviation / occurrence probability
//! and hands finished artifacts to an `OutputWriter`. Storage formats and
//! projections live behind that trait, outside this crate's concern.

use std::any::Any;
use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::error::{SimError, SimResult};
use crate::raster::{CoeffRaster, HostRaster};
use crate::spread_rate::SpreadRateRow;

/// Artifact sink. Write order follows emission order; the writer never
/// sees partial state.
pub trait OutputWriter: Send {
    fn write_raster(
        &mut self,
        raster: &HostRaster,
        name: &str,
        title: &str,
        date: NaiveDate,
    ) -> SimResult<()>;

    fn write_spread_rate(&mut self, rows: &[SpreadRateRow]) -> SimResult<()>;

    /// Per-realization escape points, raw (row, col) offsets.
    fn write_outside_dispersers(
        &mut self,
        by_run: &[Vec<(i64, i64)>],
        date: NaiveDate,
    ) -> SimResult<()>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// Named-raster source consumed when steering injects new intervention
/// data mid-run.
pub trait RasterSource: Send {
    fn read_by_name(&mut self, name: &str) -> SimResult<CoeffRaster>;
}

/// `basename` + zero-padded year/month/day, the identifier attached to
/// every periodic artifact.
pub fn generate_name(basename: &str, date: NaiveDate) -> String {
    format!(
        "{basename}_{:04}_{:02}_{:02}",
        date.year(),
        date.month(),
        date.day()
    )
}

/// Arithmetic mean raster (integer division, matching host-count rasters).
pub fn mean_raster(rasters: &[&HostRaster]) -> HostRaster {
    let first = rasters[0];
    let mut mean = HostRaster::filled(first.rows(), first.cols(), 0);
    let n = rasters.len() as i64;
    for (i, cell) in mean.cells_mut().iter_mut().enumerate() {
        let sum: i64 = rasters.iter().map(|r| i64::from(r.cells()[i])).sum();
        *cell = (sum / n) as i32;
    }
    mean
}

/// Population standard deviation against a precomputed mean.
pub fn stddev_raster(rasters: &[&HostRaster], mean: &HostRaster) -> HostRaster {
    let mut stddev = HostRaster::filled(mean.rows(), mean.cols(), 0);
    let n = rasters.len() as i64;
    for (i, cell) in stddev.cells_mut().iter_mut().enumerate() {
        let m = i64::from(mean.cells()[i]);
        let sum_sq: i64 = rasters
            .iter()
            .map(|r| {
                let d = i64::from(r.cells()[i]) - m;
                d * d
            })
            .sum();
        *cell = ((sum_sq / n) as f64).sqrt() as i32;
    }
    stddev
}

/// Percentage of realizations with any infection per cell, 0-100.
pub fn occurrence_probability(rasters: &[&HostRaster]) -> HostRaster {
    let first = rasters[0];
    let mut probability = HostRaster::filled(first.rows(), first.cols(), 0);
    let n = rasters.len() as i32;
    for (i, cell) in probability.cells_mut().iter_mut().enumerate() {
        let occurrences = rasters.iter().filter(|r| r.cells()[i] > 0).count() as i32;
        *cell = occurrences * 100 / n;
    }
    probability
}

/// Which artifacts a run emits. Each series option carries its own
/// basename, mirroring one output family per name.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OutputConfig {
    /// Basename of the periodic infected series (ensemble mean, or
    /// realization 0 when `series_as_single_run` is set).
    pub series: Option<String>,
    pub stddev_series: Option<String>,
    pub probability_series: Option<String>,
    /// Accumulated dead hosts per year; requires mortality and
    /// `series_as_single_run`.
    pub dead_series: Option<String>,
    /// Name of the final mean raster written after the loop exits.
    pub final_output: Option<String>,
    pub final_stddev: Option<String>,
    pub final_probability: Option<String>,
    #[serde(default)]
    pub series_as_single_run: bool,
    #[serde(default)]
    pub spread_rate: bool,
    #[serde(default)]
    pub outside_dispersers: bool,
}

/// What a year-closing emission produced: the primary series name (used
/// for the end-of-run notification) and every name the steering server
/// should be told about.
#[derive(Debug, Default)]
pub struct YearlyEmission {
    pub primary: Option<String>,
    pub notify: Vec<String>,
    pub written: Vec<(String, String)>,
}

pub struct OutputAggregator {
    outputs: OutputConfig,
    series_basename: Option<String>,
    writer: Box<dyn OutputWriter>,
}

impl OutputAggregator {
    pub fn new(outputs: OutputConfig, writer: Box<dyn OutputWriter>) -> Self {
        let series_basename = outputs.series.clone();
        Self {
            outputs,
            series_basename,
            writer,
        }
    }

    /// Live basename for the primary series; steering can change it
    /// mid-run.
    pub fn set_basename(&mut self, name: String) {
        self.series_basename = Some(name);
    }

    pub fn basename(&self) -> Option<&str> {
        self.series_basename.as_deref()
    }

    pub fn writer(&self) -> &dyn OutputWriter {
        self.writer.as_ref()
    }

    pub fn emit_yearly(
        &mut self,
        infected: &[&HostRaster],
        accumulated_dead: Option<&HostRaster>,
        date: NaiveDate,
    ) -> SimResult<YearlyEmission> {
        let mut emission = YearlyEmission::default();
        let single_run = self.outputs.series_as_single_run;

        let needs_mean = (self.series_basename.is_some() && !single_run)
            || self.outputs.stddev_series.is_some();
        let mean = needs_mean.then(|| mean_raster(infected));

        if let Some(basename) = &self.series_basename {
            let name = generate_name(basename, date);
            let (raster, title) = if single_run {
                (infected[0], "Occurrence from a single stochastic run")
            } else {
                (
                    mean.as_ref().ok_or_else(|| {
                        SimError::InvalidConfig("mean raster not computed".into())
                    })?,
                    "Average occurrence from all stochastic runs",
                )
            };
            self.writer.write_raster(raster, &name, title, date)?;
            log::debug!("output raster {name} written");
            emission.notify.push(name.clone());
            emission.written.push(("series".into(), name.clone()));
            emission.primary = Some(name);
        }

        if let (Some(basename), Some(mean)) = (&self.outputs.stddev_series, &mean) {
            let stddev = stddev_raster(infected, mean);
            let name = generate_name(basename, date);
            self.writer.write_raster(
                &stddev,
                &name,
                "Standard deviation of average occurrence from all stochastic runs",
                date,
            )?;
            log::debug!("output raster {name} written");
            emission.written.push(("stddev".into(), name));
        }

        if let Some(basename) = &self.outputs.probability_series {
            let probability = occurrence_probability(infected);
            let name = generate_name(basename, date);
            self.writer
                .write_raster(&probability, &name, "Probability of occurrence", date)?;
            log::debug!("output raster {name} written");
            emission.notify.push(name.clone());
            emission.written.push(("probability".into(), name));
        }

        if let (Some(basename), Some(dead)) = (&self.outputs.dead_series, accumulated_dead) {
            let name = generate_name(basename, date);
            self.writer
                .write_raster(dead, &name, "Number of dead hosts to date", date)?;
            log::debug!("output raster {name} written");
            emission.written.push(("dead".into(), name));
        }

        Ok(emission)
    }

    /// Final non-series artifacts, written once after the loop exits.
    pub fn emit_final(
        &mut self,
        infected: &[&HostRaster],
        date: NaiveDate,
    ) -> SimResult<Vec<(String, String)>> {
        let mut written = Vec::new();
        let needs_mean =
            self.outputs.final_output.is_some() || self.outputs.final_stddev.is_some();
        let mean = needs_mean.then(|| mean_raster(infected));

        if let (Some(name), Some(mean)) = (&self.outputs.final_output, &mean) {
            self.writer.write_raster(
                mean,
                name,
                "Average occurrence from all stochastic runs",
                date,
            )?;
            written.push(("final".into(), name.clone()));
        }
        if let (Some(name), Some(mean)) = (&self.outputs.final_stddev, &mean) {
            let stddev = stddev_raster(infected, mean);
            self.writer
                .write_raster(&stddev, name, "Standard deviations", date)?;
            written.push(("final_stddev".into(), name.clone()));
        }
        if let Some(name) = &self.outputs.final_probability {
            let probability = occurrence_probability(infected);
            self.writer
                .write_raster(&probability, name, "Probability of occurrence", date)?;
            written.push(("final_probability".into(), name.clone()));
        }
        Ok(written)
    }

    pub fn write_spread_rate(&mut self, rows: &[SpreadRateRow]) -> SimResult<()> {
        self.writer.write_spread_rate(rows)
    }

    pub fn write_outside_dispersers(
        &mut self,
        by_run: &[Vec<(i64, i64)>],
        date: NaiveDate,
    ) -> SimResult<()> {
        self.writer.write_outside_dispersers(by_run, date)
    }

    pub fn outputs(&self) -> &OutputConfig {
        &self.outputs
    }
}

/// A raster the in-memory writer captured.
#[derive(Debug, Clone)]
pub struct WrittenRaster {
    pub name: String,
    pub title: String,
    pub date: NaiveDate,
    pub raster: HostRaster,
}

/// Writer used by tests and tooling: keeps every artifact in memory.
#[derive(Default)]
pub struct MemoryWriter {
    pub rasters: Vec<WrittenRaster>,
    pub spread_rate: Vec<Vec<SpreadRateRow>>,
    pub outside_dispersers: Vec<(NaiveDate, Vec<Vec<(i64, i64)>>)>,
}

impl OutputWriter for MemoryWriter {
    fn write_raster(
        &mut self,
        raster: &HostRaster,
        name: &str,
        title: &str,
        date: NaiveDate,
    ) -> SimResult<()> {
        self.rasters.push(WrittenRaster {
            name: name.to_string(),
            title: title.to_string(),
            date,
            raster: raster.clone(),
        });
        Ok(())
    }

    fn write_spread_rate(&mut self, rows: &[SpreadRateRow]) -> SimResult<()> {
        self.spread_rate.push(rows.to_vec());
        Ok(())
    }

    fn write_outside_dispersers(
        &mut self,
        by_run: &[Vec<(i64, i64)>],
        date: NaiveDate,
    ) -> SimResult<()> {
        self.outside_dispersers.push((date, by_run.to_vec()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Raster source backed by a name -> raster map.
#[derive(Default)]
pub struct MemoryRasterSource {
    maps: HashMap<String, CoeffRaster>,
}

impl MemoryRasterSource {
    pub fn with(mut self, name: &str, raster: CoeffRaster) -> Self {
        self.maps.insert(name.to_string(), raster);
        self
    }
}

impl RasterSource for MemoryRasterSource {
    fn read_by_name(&mut self, name: &str) -> SimResult<CoeffRaster> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::Steering(format!("unknown raster name: {name}")))
    }
}
