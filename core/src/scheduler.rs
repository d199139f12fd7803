//! The ensemble scheduler — the interactive control loop.
//!
//! EXECUTION ORDER per iteration (fixed, never reordered):
//!   1. Pop at most one steering command and apply it. Restores and syncs
//!      only happen here or at a year boundary, never while a step batch
//!      is in flight.
//!   2. While the current date has not overtaken the target date, record
//!      the step as unresolved; on the last sub-step of a simulated year,
//!      run the year-closing batch (parallel across realizations, with a
//!      barrier before checkpointing, sync, and aggregation).
//!   3. Advance the clock, or sleep briefly and re-poll when paused.
//!
//! RULES:
//!   - This thread is the sole mutator of realization and checkpoint
//!     state. The steering thread only pushes commands.
//!   - Realizations never interact during a step batch; the batch is
//!     embarrassingly parallel over the worker pool.
//!   - Stop is observable at the top of every iteration and idempotent.

use std::thread;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;

use crate::checkpoint::CheckpointStore;
use crate::clock::SimulationClock;
use crate::command::{CommandQueue, SteeringCommand};
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::event::{event_type_name, SessionEvent, SessionLogEntry};
use crate::kernel::{derived_seed, DispersalKernel};
use crate::model::SporeModel;
use crate::output::{OutputAggregator, OutputWriter, RasterSource};
use crate::raster::HostRaster;
use crate::realization::Realization;
use crate::spread_rate::{average_rows, SpreadRateTracker};
use crate::steering::{Notifier, SteeringChannel};
use crate::store::RunStore;
use crate::treatment::TreatmentSchedule;
use crate::types::{RunId, StepIndex};
use crate::weather::WeatherSeries;

const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Whether the control loop keeps going after handling a command or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct EnsembleScheduler {
    config: SimulationConfig,
    clock: SimulationClock,
    realizations: Vec<Realization>,
    checkpoints: CheckpointStore,
    treatments: TreatmentSchedule,
    weather: WeatherSeries,
    total_hosts: HostRaster,
    queue: CommandQueue,
    channel: Option<SteeringChannel>,
    notifier: Option<Notifier>,
    aggregator: OutputAggregator,
    source: Box<dyn RasterSource>,
    store: RunStore,
    run_id: RunId,
    pool: rayon::ThreadPool,
    /// Sub-steps recorded but not yet simulated, resolved in one chunk at
    /// the year boundary.
    unresolved: Vec<(StepIndex, NaiveDate)>,
    sync_requested: bool,
    synced: bool,
    /// Set right after a checkpoint restore so the restored year-end does
    /// not re-run its year-closing batch.
    suppress_closing: bool,
    use_treatments: bool,
    last_output_name: String,
    last_period_end: NaiveDate,
    end_notified: bool,
}

impl EnsembleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SimulationConfig,
        host: HostRaster,
        total_plants: HostRaster,
        infected: HostRaster,
        weather: WeatherSeries,
        treatments: TreatmentSchedule,
        writer: Box<dyn OutputWriter>,
        source: Box<dyn RasterSource>,
        store: RunStore,
        run_id: RunId,
    ) -> SimResult<Self> {
        config.validate()?;
        if !host.same_shape(&total_plants) || !host.same_shape(&infected) {
            return Err(SimError::ShapeMismatch {
                expected_rows: host.rows(),
                expected_cols: host.cols(),
                rows: infected.rows(),
                cols: infected.cols(),
            });
        }

        let susceptible = host.difference(&infected);
        let num_years = config.num_years();
        let (rows, cols) = (host.rows(), host.cols());

        // each realization owns a private kernel and model stream
        let realizations: Vec<Realization> = (0..config.runs)
            .map(|run| {
                let kernel = DispersalKernel::new(
                    config.kernel.kind,
                    config.kernel.scale,
                    config.ew_res,
                    config.ns_res,
                    config.master_seed,
                    (run * 2) as u64,
                );
                let model = Box::new(SporeModel::new(
                    derived_seed(config.master_seed, (run * 2 + 1) as u64),
                    rows,
                    cols,
                ));
                Realization::new(
                    run,
                    susceptible.clone(),
                    infected.clone(),
                    num_years,
                    kernel,
                    model,
                    config.ew_res,
                    config.ns_res,
                )
            })
            .collect();

        let clock = SimulationClock::new(config.start_year, config.end_year, config.step);
        let checkpoints =
            CheckpointStore::new(num_years, config.runs, &susceptible, &infected, clock.start());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|err| SimError::Other(anyhow::anyhow!(err)))?;

        let use_treatments = !treatments.is_empty();
        let aggregator = OutputAggregator::new(config.outputs.clone(), writer);
        let last_period_end = clock.period_end();
        let seed = config.master_seed;
        let runs = config.runs;

        let scheduler = Self {
            config,
            clock,
            realizations,
            checkpoints,
            treatments,
            weather,
            total_hosts: total_plants,
            queue: CommandQueue::new(),
            channel: None,
            notifier: None,
            aggregator,
            source,
            store,
            run_id,
            pool,
            unresolved: Vec::new(),
            sync_requested: false,
            synced: false,
            suppress_closing: false,
            use_treatments,
            last_output_name: String::new(),
            last_period_end,
            end_notified: false,
        };
        scheduler.log_event(&SessionEvent::RunInitialized {
            run_id: scheduler.run_id.clone(),
            seed,
            runs,
        })?;
        Ok(scheduler)
    }

    /// Attach a live steering session. The clock holds at the start date
    /// until the first Play arrives, and the treatment machinery is
    /// enabled so LoadData can inject the first intervention mid-run.
    pub fn attach_steering(
        &mut self,
        address: &str,
        port: u16,
        read_timeout: Option<Duration>,
    ) -> SimResult<()> {
        let channel = SteeringChannel::connect(address, port, read_timeout, self.queue.clone())?;
        self.notifier = Some(channel.notifier());
        self.channel = Some(channel);
        self.clock.hold_at_start();
        self.use_treatments = true;
        Ok(())
    }

    /// Handle for pushing commands programmatically (tests, embedding).
    pub fn queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn realizations(&self) -> &[Realization] {
        &self.realizations
    }

    /// For tests and tooling only.
    pub fn realizations_mut(&mut self) -> &mut [Realization] {
        &mut self.realizations
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn aggregator(&self) -> &OutputAggregator {
        &self.aggregator
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Drive the control loop until Stop, the end date (batch mode), or an
    /// unrecoverable error. Stop and end-of-run flush final outputs; a
    /// fatal error aborts immediately, tearing down only the steering
    /// session.
    pub fn run(&mut self) -> SimResult<()> {
        match self.control_loop() {
            Ok(()) => self.finish(),
            Err(err) => {
                if let Some(mut channel) = self.channel.take() {
                    channel.shutdown();
                }
                Err(err)
            }
        }
    }

    fn control_loop(&mut self) -> SimResult<()> {
        loop {
            if let Some(cmd) = self.queue.pop() {
                log::debug!("steering command: {cmd:?}");
                self.log_event(&SessionEvent::CommandApplied {
                    command: cmd.clone(),
                })?;
                if self.apply_command(cmd)? == Flow::Stop {
                    return Ok(());
                }
            }
            if self.clock.should_step() {
                if self.step()? == Flow::Stop {
                    return Ok(());
                }
            } else {
                thread::sleep(PAUSE_POLL);
            }
        }
    }

    /// Apply one steering command. Only StepBack, backward GoTo and the
    /// deferred sync mutate realization state, and those are serialized
    /// with the step batch by construction: commands are applied strictly
    /// between batches.
    pub fn apply_command(&mut self, cmd: SteeringCommand) -> SimResult<Flow> {
        match cmd {
            SteeringCommand::Play => self.clock.play(),
            SteeringCommand::Pause => self.clock.pause(),
            SteeringCommand::StepForward => self.clock.step_forward(),
            SteeringCommand::StepBack => {
                if let Some(index) = self.checkpoints.step_back() {
                    self.restore_checkpoint(index)?;
                }
            }
            SteeringCommand::Stop => return Ok(Flow::Stop),
            SteeringCommand::GoTo { year } => {
                if year < 0 || year as usize >= self.checkpoints.len() {
                    log::debug!("ignoring out-of-range goto {year}");
                } else if (year as usize) <= self.checkpoints.last_index() {
                    self.restore_checkpoint(year as usize)?;
                } else {
                    self.clock.jump_forward(year);
                }
            }
            SteeringCommand::LoadData { year, name } => {
                log::info!("loading treatment {name} for year {year}");
                let map = self.source.read_by_name(&name)?;
                self.treatments.clear_after_year(year);
                self.treatments.add_treatment(year, map);
                self.use_treatments = true;
            }
            SteeringCommand::ChangeName { name } => {
                log::info!("output basename changed to {name}");
                self.aggregator.set_basename(name);
            }
            SteeringCommand::SyncRuns => self.sync_requested = true,
        }
        Ok(Flow::Continue)
    }

    fn restore_checkpoint(&mut self, index: usize) -> SimResult<()> {
        {
            let slot = self.checkpoints.slot(index);
            for (run, realization) in self.realizations.iter_mut().enumerate() {
                realization.susceptible.clone_from(&slot.susceptible[run]);
                realization.infected.clone_from(&slot.infected[run]);
            }
            self.clock.restore(slot.date, slot.step);
            log::info!("restored checkpoint {index} at {}", slot.date);
        }
        self.unresolved.clear();
        self.suppress_closing = true;
        self.log_event(&SessionEvent::CheckpointRestored { index })
    }

    fn step(&mut self) -> SimResult<Flow> {
        self.unresolved
            .push((self.clock.current_step(), self.clock.current()));
        self.last_period_end = self.clock.period_end();

        if self.realizations.iter().any(|r| r.susceptible.is_all_zero()) {
            log::warn!("every susceptible host is infected; ending the run early");
            return Ok(Flow::Stop);
        }

        if self.clock.is_last_step_of_year() && !self.suppress_closing {
            self.close_year()?;
        }
        self.suppress_closing = false;
        self.clock.advance();

        if self.clock.past_end() {
            let Some(notifier) = &self.notifier else {
                return Ok(Flow::Stop);
            };
            // under steering the run idles at the end until Stop arrives
            if !self.end_notified {
                notifier.send(&format!("info:last:{}", self.last_output_name));
                self.end_notified = true;
            }
        }
        Ok(Flow::Continue)
    }

    /// The year-closing batch: resolve buffered steps in parallel, then
    /// checkpoint, age mortality cohorts, account spread rates, sync if
    /// requested, and emit aggregated outputs.
    fn close_year(&mut self) -> SimResult<()> {
        let sim_year = self.clock.years_from_start();
        let period_end = self.clock.period_end();

        if !self.unresolved.is_empty() {
            self.run_step_batch(sim_year)?;
            self.unresolved.clear();
        }

        let index = sim_year + 1;
        self.checkpoints.save(
            index,
            &self.realizations,
            self.clock.current_step(),
            self.clock.current(),
        );
        self.log_event(&SessionEvent::CheckpointSaved { index })?;

        self.apply_mortality(sim_year);
        self.compute_spread_rates(sim_year);

        if self.sync_requested {
            self.sync_runs()?;
        }

        if self.config.outputs.spread_rate {
            let years = sim_year + 1;
            let rows = if self.synced {
                self.realizations[0]
                    .spread_rate
                    .rows(years, self.config.start_year)
            } else {
                let trackers: Vec<&SpreadRateTracker> =
                    self.realizations.iter().map(|r| &r.spread_rate).collect();
                average_rows(&trackers, years, self.config.start_year)
            };
            self.aggregator.write_spread_rate(&rows)?;
        }

        let infected: Vec<&HostRaster> =
            self.realizations.iter().map(|r| &r.infected).collect();
        let dead = (self.config.mortality.is_some()
            && self.config.outputs.series_as_single_run)
            .then(|| &self.realizations[0].dead_total);
        let emission = self.aggregator.emit_yearly(&infected, dead, period_end)?;

        if let Some(notifier) = &self.notifier {
            for name in &emission.notify {
                notifier.send(&format!("output:{name}|"));
            }
        }
        for (kind, name) in &emission.written {
            self.log_event(&SessionEvent::OutputWritten {
                kind: kind.clone(),
                name: name.clone(),
            })?;
        }
        if let Some(name) = emission.primary {
            self.last_output_name = name;
        }
        Ok(())
    }

    /// Resolve every buffered sub-step for each realization, in parallel
    /// across realizations. Weather availability is verified up front so
    /// the parallel region itself cannot fail on missing data.
    fn run_step_batch(&mut self, sim_year: usize) -> SimResult<()> {
        let lethal = self
            .config
            .lethal
            .filter(|_| self.weather.has_temperatures());
        if lethal.is_some() {
            // insufficient temperature data for this year is fatal
            self.weather.temperature(sim_year)?;
        }
        if self.weather.has_weather() {
            for &(step, _) in &self.unresolved {
                self.weather.coefficient(step)?;
            }
        }

        let unresolved = self.unresolved.as_slice();
        let weather = &self.weather;
        let treatments = &self.treatments;
        let total_hosts = &self.total_hosts;
        let season = self.config.season;
        let reproductive_rate = self.config.reproductive_rate;
        let treatment_month = self.config.treatment_month.filter(|_| self.use_treatments);
        let mortality = self.config.mortality;
        let realizations = &mut self.realizations;

        self.pool.install(|| {
            realizations.par_iter_mut().try_for_each(|r| -> SimResult<()> {
                let mut lethality_done = false;
                let mut treatments_done = false;
                for &(step, date) in unresolved {
                    if let Some(lethal) = lethal {
                        if !lethality_done && date.month() == lethal.month {
                            let temperature = weather.temperature(sim_year)?;
                            r.model.remove(
                                &mut r.infected,
                                &mut r.susceptible,
                                temperature,
                                lethal.temperature,
                            );
                            lethality_done = true;
                        }
                    }
                    if let Some(month) = treatment_month {
                        if !treatments_done && date.month() == month {
                            treatments.apply_treatment_host(
                                date.year(),
                                &mut r.infected,
                                &mut r.susceptible,
                            );
                            if let Some(m) = mortality {
                                if sim_year + 1 >= m.first_year_to_die {
                                    let max_age = sim_year + 1 - m.first_year_to_die;
                                    for age in 0..=max_age {
                                        treatments.apply_treatment_infected(
                                            date.year(),
                                            &mut r.infected_by_year[age],
                                        );
                                    }
                                }
                            }
                            treatments_done = true;
                        }
                    }
                    if !season.month_in_season(date.month()) {
                        continue;
                    }
                    let coeff = if weather.has_weather() {
                        Some(weather.coefficient(step)?)
                    } else {
                        None
                    };
                    r.model.generate(&r.infected, coeff, reproductive_rate);
                    r.model.disperse(
                        &mut r.susceptible,
                        &mut r.infected,
                        &mut r.infected_by_year[sim_year],
                        total_hosts,
                        &mut r.outside_dispersers,
                        coeff,
                        &mut r.kernel,
                    );
                }
                Ok(())
            })
        })
    }

    fn apply_mortality(&mut self, sim_year: usize) {
        let Some(m) = self.config.mortality else {
            return;
        };
        if sim_year + 1 < m.first_year_to_die {
            return;
        }
        let max_age = sim_year + 1 - m.first_year_to_die;
        let rate = m.rate;
        let realizations = &mut self.realizations;
        self.pool.install(|| {
            realizations.par_iter_mut().for_each(|r| {
                r.dead_this_year.zero();
                for age in 0..=max_age {
                    let dead = r.infected_by_year[age].scaled(rate);
                    r.infected_by_year[age] -= &dead;
                    r.dead_this_year += &dead;
                }
                r.infected -= &r.dead_this_year;
                r.dead_total += &r.dead_this_year;
            });
        });
    }

    fn compute_spread_rates(&mut self, sim_year: usize) {
        if !self.config.outputs.spread_rate {
            return;
        }
        let realizations = &mut self.realizations;
        self.pool.install(|| {
            realizations
                .par_iter_mut()
                .for_each(|r| r.spread_rate.compute_yearly(&r.infected, sim_year));
        });
    }

    /// Overwrite every member's state with the canonical realization's.
    /// Deliberately realization 0: selecting a "best" member is disabled
    /// because no deterministic selection rule survives rewinding.
    fn sync_runs(&mut self) -> SimResult<()> {
        if let Some((canonical, rest)) = self.realizations.split_first_mut() {
            for r in rest {
                r.susceptible.clone_from(&canonical.susceptible);
                r.infected.clone_from(&canonical.infected);
            }
        }
        self.sync_requested = false;
        self.synced = true;
        log::info!("ensemble synced to the canonical realization");
        self.log_event(&SessionEvent::RunsSynced)
    }

    fn finish(&mut self) -> SimResult<()> {
        let infected: Vec<&HostRaster> =
            self.realizations.iter().map(|r| &r.infected).collect();
        let written = self.aggregator.emit_final(&infected, self.last_period_end)?;
        for (kind, name) in &written {
            self.log_event(&SessionEvent::OutputWritten {
                kind: kind.clone(),
                name: name.clone(),
            })?;
        }
        if self.config.outputs.outside_dispersers {
            let by_run: Vec<Vec<(i64, i64)>> = self
                .realizations
                .iter()
                .map(|r| r.outside_dispersers.clone())
                .collect();
            self.aggregator
                .write_outside_dispersers(&by_run, self.last_period_end)?;
        }
        self.log_event(&SessionEvent::SimulationEnded)?;
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown();
        }
        log::info!("simulation ended at {}", self.clock.current());
        Ok(())
    }

    fn log_event(&self, event: &SessionEvent) -> SimResult<()> {
        self.store.append_event(&SessionLogEntry {
            id: None,
            run_id: self.run_id.clone(),
            step: self.clock.current_step(),
            sim_date: self.clock.current(),
            event_type: event_type_name(event).into(),
            payload: serde_json::to_string(event)?,
        })
    }
}
