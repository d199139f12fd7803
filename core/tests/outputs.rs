//! Output aggregation wiring: series naming, single-run mode, and
//! steering-injected treatments.

use chrono::Datelike;

use outbreak_core::clock::{Season, StepKind};
use outbreak_core::command::SteeringCommand;
use outbreak_core::config::{KernelConfig, SimulationConfig};
use outbreak_core::kernel::KernelKind;
use outbreak_core::output::{MemoryRasterSource, MemoryWriter, OutputConfig};
use outbreak_core::raster::{CoeffRaster, HostRaster};
use outbreak_core::scheduler::EnsembleScheduler;
use outbreak_core::store::RunStore;
use outbreak_core::treatment::{TreatmentApplication, TreatmentSchedule};
use outbreak_core::weather::WeatherSeries;

fn config(outputs: OutputConfig) -> SimulationConfig {
    SimulationConfig {
        start_year: 2000,
        end_year: 2001,
        step: StepKind::Month,
        season: Season { first_month: 1, last_month: 12 },
        runs: 2,
        threads: 1,
        master_seed: 31,
        reproductive_rate: 4.4,
        kernel: KernelConfig { kind: KernelKind::Exponential, scale: 150.0 },
        ew_res: 100.0,
        ns_res: 100.0,
        lethal: None,
        treatment_month: None,
        treatment_application: TreatmentApplication::RatioToAll,
        mortality: None,
        outputs,
    }
}

fn build_scheduler(
    config: SimulationConfig,
    infected: HostRaster,
    source: MemoryRasterSource,
) -> EnsembleScheduler {
    let host = HostRaster::filled(8, 8, 10);
    let total = HostRaster::filled(8, 8, 12);

    let store = RunStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
        .insert_run("output-test", config.master_seed, "test")
        .expect("insert run");

    EnsembleScheduler::new(
        config,
        host,
        total,
        infected,
        WeatherSeries::none(),
        TreatmentSchedule::new(TreatmentApplication::RatioToAll),
        Box::new(MemoryWriter::default()),
        Box::new(source),
        store,
        "output-test".into(),
    )
    .expect("scheduler")
}

fn writer(scheduler: &EnsembleScheduler) -> &MemoryWriter {
    scheduler
        .aggregator()
        .writer()
        .as_any()
        .downcast_ref::<MemoryWriter>()
        .expect("memory writer")
}

fn center_infected() -> HostRaster {
    let mut infected = HostRaster::filled(8, 8, 0);
    infected[(4, 4)] = 3;
    infected
}

#[test]
fn every_configured_series_is_emitted_per_year() {
    let outputs = OutputConfig {
        series: Some("spread".into()),
        stddev_series: Some("spread_sd".into()),
        probability_series: Some("spread_prob".into()),
        final_output: Some("spread_final".into()),
        ..OutputConfig::default()
    };
    let mut scheduler = build_scheduler(
        config(outputs),
        center_infected(),
        MemoryRasterSource::default(),
    );
    scheduler.run().expect("run");

    let names: Vec<&str> = writer(&scheduler)
        .rasters
        .iter()
        .map(|artifact| artifact.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "spread_2000_12_31",
            "spread_sd_2000_12_31",
            "spread_prob_2000_12_31",
            "spread_2001_12_31",
            "spread_sd_2001_12_31",
            "spread_prob_2001_12_31",
            "spread_final",
        ]
    );

    for artifact in &writer(&scheduler).rasters {
        if artifact.name.starts_with("spread_prob") {
            assert!(artifact.raster.cells().iter().all(|&v| (0..=100).contains(&v)));
        }
        if artifact.name.starts_with("spread_2") {
            assert_eq!(artifact.date.month(), 12);
            assert_eq!(artifact.date.day(), 31);
        }
    }
}

#[test]
fn single_run_series_carries_the_first_realization() {
    let outputs = OutputConfig {
        series: Some("single".into()),
        series_as_single_run: true,
        ..OutputConfig::default()
    };
    let mut scheduler = build_scheduler(
        config(outputs),
        center_infected(),
        MemoryRasterSource::default(),
    );
    scheduler.run().expect("run");

    let last = writer(&scheduler)
        .rasters
        .last()
        .expect("series artifact");
    assert_eq!(last.raster, scheduler.realizations()[0].infected);
    assert_eq!(last.title, "Occurrence from a single stochastic run");
}

#[test]
fn loaded_treatment_is_applied_at_the_treatment_month() {
    let mut cfg = config(OutputConfig::default());
    cfg.start_year = 2000;
    cfg.end_year = 2000;
    cfg.runs = 1;
    cfg.reproductive_rate = 0.0; // isolate the treatment effect
    cfg.treatment_month = Some(4);

    let mut infected = HostRaster::filled(8, 8, 0);
    infected[(4, 4)] = 10;

    let source =
        MemoryRasterSource::default().with("spray_all", CoeffRaster::filled(8, 8, 0.5));
    let mut scheduler = build_scheduler(cfg, infected, source);

    scheduler
        .apply_command(SteeringCommand::LoadData {
            year: 2000,
            name: "spray_all".into(),
        })
        .expect("load data");
    scheduler.run().expect("run");

    // half of the 10 infected hosts at the focus survive the spraying
    assert_eq!(scheduler.realizations()[0].infected[(4, 4)], 5);
}

#[test]
fn change_name_renames_subsequent_series_outputs() {
    let outputs = OutputConfig {
        series: Some("before".into()),
        ..OutputConfig::default()
    };
    let mut scheduler = build_scheduler(
        config(outputs),
        center_infected(),
        MemoryRasterSource::default(),
    );
    scheduler
        .apply_command(SteeringCommand::ChangeName { name: "after".into() })
        .expect("change name");
    scheduler.run().expect("run");

    let names: Vec<&str> = writer(&scheduler)
        .rasters
        .iter()
        .map(|artifact| artifact.name.as_str())
        .collect();
    assert_eq!(names, vec!["after_2000_12_31", "after_2001_12_31"]);
}
