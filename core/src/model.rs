//! The dispersal model collaborator.
//!
//! The scheduler only depends on the `DispersalModel` trait: generate
//! dispersers from infected hosts, scatter them, and cull under lethal
//! conditions. `SporeModel` is the default implementation; its RNG stream
//! is derived from the master seed like everything else, independent of
//! the kernel stream.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::kernel::DispersalKernel;
use crate::raster::{CoeffRaster, HostRaster};

pub trait DispersalModel: Send {
    /// Produce dispersers from currently infected hosts. A weather
    /// coefficient of `None` means optimal conditions.
    fn generate(
        &mut self,
        infected: &HostRaster,
        weather: Option<&CoeffRaster>,
        reproductive_rate: f64,
    );

    /// Scatter the generated dispersers. Establishing dispersers move one
    /// host from susceptible to infected and into the given age cohort;
    /// dispersers landing outside the modeled area are appended to
    /// `outside`.
    #[allow(clippy::too_many_arguments)]
    fn disperse(
        &mut self,
        susceptible: &mut HostRaster,
        infected: &mut HostRaster,
        cohort: &mut HostRaster,
        total_hosts: &HostRaster,
        outside: &mut Vec<(i64, i64)>,
        weather: Option<&CoeffRaster>,
        kernel: &mut DispersalKernel,
    );

    /// Cull the pathogen where conditions are lethal: every infected host
    /// in a cell below the lethal temperature reverts to susceptible.
    fn remove(
        &mut self,
        infected: &mut HostRaster,
        susceptible: &mut HostRaster,
        temperature: &CoeffRaster,
        lethal_temperature: f64,
    );
}

pub struct SporeModel {
    rng:        Pcg64Mcg,
    dispersers: HostRaster,
}

impl SporeModel {
    pub fn new(seed: u64, rows: usize, cols: usize) -> Self {
        Self {
            rng: Pcg64Mcg::seed_from_u64(seed),
            dispersers: HostRaster::filled(rows, cols, 0),
        }
    }

    /// Knuth Poisson draw; lambdas here are small (per-cell counts).
    fn poisson(&mut self, lambda: f64) -> i32 {
        if lambda <= 0.0 {
            return 0;
        }
        let limit = (-lambda).exp();
        let mut k = 0;
        let mut p = 1.0;
        loop {
            p *= self.rng.gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }
}

impl DispersalModel for SporeModel {
    fn generate(
        &mut self,
        infected: &HostRaster,
        weather: Option<&CoeffRaster>,
        reproductive_rate: f64,
    ) {
        for row in 0..infected.rows() {
            for col in 0..infected.cols() {
                let count = infected[(row, col)];
                if count <= 0 {
                    self.dispersers[(row, col)] = 0;
                    continue;
                }
                let coeff = weather.map_or(1.0, |w| w[(row, col)]);
                let lambda = reproductive_rate * coeff * f64::from(count);
                self.dispersers[(row, col)] = self.poisson(lambda);
            }
        }
    }

    fn disperse(
        &mut self,
        susceptible: &mut HostRaster,
        infected: &mut HostRaster,
        cohort: &mut HostRaster,
        total_hosts: &HostRaster,
        outside: &mut Vec<(i64, i64)>,
        weather: Option<&CoeffRaster>,
        kernel: &mut DispersalKernel,
    ) {
        for row in 0..self.dispersers.rows() {
            for col in 0..self.dispersers.cols() {
                let count = self.dispersers[(row, col)];
                for _ in 0..count {
                    let (land_row, land_col) = kernel.draw(row, col);
                    if !susceptible.contains(land_row, land_col) {
                        outside.push((land_row, land_col));
                        continue;
                    }
                    let cell = (land_row as usize, land_col as usize);
                    let total = total_hosts[cell];
                    if total <= 0 || susceptible[cell] <= 0 {
                        continue;
                    }
                    let coeff = weather.map_or(1.0, |w| w[cell]);
                    let establish =
                        coeff * f64::from(susceptible[cell]) / f64::from(total);
                    if self.rng.gen::<f64>() < establish {
                        susceptible[cell] -= 1;
                        infected[cell] += 1;
                        cohort[cell] += 1;
                    }
                }
                self.dispersers[(row, col)] = 0;
            }
        }
    }

    fn remove(
        &mut self,
        infected: &mut HostRaster,
        susceptible: &mut HostRaster,
        temperature: &CoeffRaster,
        lethal_temperature: f64,
    ) {
        for row in 0..infected.rows() {
            for col in 0..infected.cols() {
                if temperature[(row, col)] < lethal_temperature && infected[(row, col)] > 0 {
                    susceptible[(row, col)] += infected[(row, col)];
                    infected[(row, col)] = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelKind;

    fn kernel() -> DispersalKernel {
        DispersalKernel::new(KernelKind::Exponential, 50.0, 100.0, 100.0, 11, 0)
    }

    #[test]
    fn zero_rate_generates_no_dispersers() {
        let infected = HostRaster::filled(4, 4, 3);
        let mut sus = HostRaster::filled(4, 4, 10);
        let mut inf = infected.clone();
        let mut cohort = HostRaster::filled(4, 4, 0);
        let total = HostRaster::filled(4, 4, 13);
        let mut outside = Vec::new();

        let mut model = SporeModel::new(1, 4, 4);
        model.generate(&infected, None, 0.0);
        model.disperse(
            &mut sus,
            &mut inf,
            &mut cohort,
            &total,
            &mut outside,
            None,
            &mut kernel(),
        );

        assert_eq!(inf, infected, "no new infections expected");
        assert!(outside.is_empty());
        assert!(cohort.is_all_zero());
    }

    #[test]
    fn dispersal_conserves_hosts_per_cell() {
        let mut sus = HostRaster::filled(6, 6, 8);
        let mut inf = HostRaster::filled(6, 6, 0);
        inf[(3, 3)] = 4;
        sus[(3, 3)] = 4;
        let total = HostRaster::filled(6, 6, 8);
        let mut cohort = HostRaster::filled(6, 6, 0);
        let mut outside = Vec::new();

        let before: i64 = sus.sum() + inf.sum();
        let mut model = SporeModel::new(2, 6, 6);
        model.generate(&inf.clone(), None, 4.4);
        model.disperse(
            &mut sus,
            &mut inf,
            &mut cohort,
            &total,
            &mut outside,
            None,
            &mut kernel(),
        );

        assert_eq!(sus.sum() + inf.sum(), before, "hosts are moved, not created");
        assert_eq!(cohort.sum(), inf.sum() - 4, "every new infection joins the cohort");
    }

    #[test]
    fn remove_reverts_infected_below_lethal_temperature() {
        let mut inf = HostRaster::filled(2, 2, 5);
        let mut sus = HostRaster::filled(2, 2, 1);
        let mut temps = CoeffRaster::filled(2, 2, 10.0);
        temps[(0, 0)] = -20.0;
        temps[(1, 1)] = -20.0;

        let mut model = SporeModel::new(3, 2, 2);
        model.remove(&mut inf, &mut sus, &temps, -15.0);

        assert_eq!(inf[(0, 0)], 0);
        assert_eq!(sus[(0, 0)], 6);
        assert_eq!(inf[(1, 1)], 0);
        assert_eq!(inf[(0, 1)], 5, "cells above the threshold are untouched");
    }
}
