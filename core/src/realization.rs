//! One independent stochastic ensemble member.
//!
//! RULE: a realization is exclusively owned by the scheduler and never
//! aliased to another realization except during an explicit sync, which
//! copies rasters between members while no step batch is in flight.

use crate::kernel::DispersalKernel;
use crate::model::DispersalModel;
use crate::raster::HostRaster;
use crate::spread_rate::SpreadRateTracker;

pub struct Realization {
    pub index: usize,
    pub susceptible: HostRaster,
    pub infected: HostRaster,
    /// Infected hosts bucketed by the simulation year in which they became
    /// infected. Length = number of simulated years.
    pub infected_by_year: Vec<HostRaster>,
    /// Hosts that died this simulated year (reset at each year close).
    pub dead_this_year: HostRaster,
    /// Dead hosts accumulated over the whole run.
    pub dead_total: HostRaster,
    pub kernel: DispersalKernel,
    pub model: Box<dyn DispersalModel>,
    pub spread_rate: SpreadRateTracker,
    /// Dispersers that left the modeled area, as raw (row, col) offsets.
    pub outside_dispersers: Vec<(i64, i64)>,
}

impl Realization {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        susceptible: HostRaster,
        infected: HostRaster,
        num_years: usize,
        kernel: DispersalKernel,
        model: Box<dyn DispersalModel>,
        ew_res: f64,
        ns_res: f64,
    ) -> Self {
        let zeroed = HostRaster::filled(susceptible.rows(), susceptible.cols(), 0);
        let spread_rate = SpreadRateTracker::new(&infected, ew_res, ns_res, num_years);
        Self {
            index,
            susceptible,
            infected,
            infected_by_year: vec![zeroed.clone(); num_years],
            dead_this_year: zeroed.clone(),
            dead_total: zeroed,
            kernel,
            model,
            spread_rate,
            outside_dispersers: Vec::new(),
        }
    }
}
