//! spread-runner: headless runner for the ensemble spread simulation.
//!
//! Usage:
//!   spread-runner --seed 42 --runs 10 --start-year 2000 --end-year 2005
//!   spread-runner --scenario scenario.json --out-dir ./out --db run.db
//!   spread-runner --connect 127.0.0.1 --port 9000   (live steering)

use std::any::Any;
use std::env;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use outbreak_core::clock::{Season, StepKind};
use outbreak_core::config::{KernelConfig, ScenarioConfig, SimulationConfig};
use outbreak_core::error::{SimError, SimResult};
use outbreak_core::kernel::KernelKind;
use outbreak_core::output::{OutputConfig, OutputWriter, RasterSource};
use outbreak_core::raster::{CoeffRaster, HostRaster};
use outbreak_core::scheduler::EnsembleScheduler;
use outbreak_core::spread_rate::SpreadRateRow;
use outbreak_core::store::RunStore;
use outbreak_core::treatment::{TreatmentApplication, TreatmentSchedule};
use outbreak_core::types::generate_run_id;
use outbreak_core::weather::WeatherSeries;

/// Writes every artifact as JSON (rasters) or CSV (spread rates) into a
/// flat output directory.
struct JsonDirWriter {
    dir: PathBuf,
}

#[derive(serde::Serialize)]
struct RasterArtifact<'a> {
    name: &'a str,
    title: &'a str,
    date: NaiveDate,
    raster: &'a HostRaster,
}

impl OutputWriter for JsonDirWriter {
    fn write_raster(
        &mut self,
        raster: &HostRaster,
        name: &str,
        title: &str,
        date: NaiveDate,
    ) -> SimResult<()> {
        let artifact = RasterArtifact { name, title, date, raster };
        let path = self.dir.join(format!("{name}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&artifact)?)?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    fn write_spread_rate(&mut self, rows: &[SpreadRateRow]) -> SimResult<()> {
        let mut out = String::from("year,N,S,E,W\n");
        for row in rows {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                row.year, row.north, row.south, row.east, row.west
            ));
        }
        fs::write(self.dir.join("spread_rate.csv"), out)?;
        Ok(())
    }

    fn write_outside_dispersers(
        &mut self,
        by_run: &[Vec<(i64, i64)>],
        date: NaiveDate,
    ) -> SimResult<()> {
        let artifact = serde_json::json!({ "date": date, "by_run": by_run });
        fs::write(
            self.dir.join("outside_dispersers.json"),
            serde_json::to_vec_pretty(&artifact)?,
        )?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads named coefficient rasters (steered treatment injections) from
/// `<data-dir>/<name>.json`.
struct JsonDirSource {
    dir: PathBuf,
}

impl RasterSource for JsonDirSource {
    fn read_by_name(&mut self, name: &str) -> SimResult<CoeffRaster> {
        let path = self.dir.join(format!("{name}.json"));
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(SimError::from)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let runs = parse_arg(&args, "--runs", 5usize);
    let threads = parse_arg(&args, "--threads", 1usize);
    let start_year = parse_arg(&args, "--start-year", 2000i32);
    let end_year = parse_arg(&args, "--end-year", 2004i32);
    let step = match str_arg(&args, "--step").unwrap_or("month") {
        "week" => StepKind::Week,
        _ => StepKind::Month,
    };
    let basename = str_arg(&args, "--basename").unwrap_or("spread").to_string();
    let out_dir = PathBuf::from(str_arg(&args, "--out-dir").unwrap_or("./out"));
    let data_dir = PathBuf::from(str_arg(&args, "--data-dir").unwrap_or("./data"));
    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let connect = str_arg(&args, "--connect");
    let port = parse_arg(&args, "--port", 9000u16);

    fs::create_dir_all(&out_dir).context("creating output directory")?;

    let scenario = match str_arg(&args, "--scenario") {
        Some(path) => ScenarioConfig::load(Path::new(path))
            .with_context(|| format!("loading scenario {path}"))?,
        None => synthetic_scenario(),
    };
    let (host, total, infected) = scenario.rasters()?;
    let weather = scenario.weather()?;

    let config = SimulationConfig {
        start_year,
        end_year,
        step,
        season: Season { first_month: 1, last_month: 12 },
        runs,
        threads,
        master_seed: seed,
        reproductive_rate: 4.4,
        kernel: KernelConfig { kind: KernelKind::Cauchy, scale: 150.0 },
        ew_res: 100.0,
        ns_res: 100.0,
        lethal: None,
        treatment_month: Some(4),
        treatment_application: TreatmentApplication::RatioToAll,
        mortality: None,
        outputs: OutputConfig {
            series: Some(basename),
            probability_series: Some("probability".into()),
            final_output: Some("spread_final".into()),
            spread_rate: true,
            outside_dispersers: true,
            ..OutputConfig::default()
        },
    };

    let store = if db == ":memory:" {
        RunStore::in_memory()?
    } else {
        RunStore::open(db)?
    };
    store.migrate()?;

    let run_id = generate_run_id("run");
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    println!("spread-runner");
    println!("  run_id:  {run_id}");
    println!("  seed:    {seed}");
    println!("  runs:    {runs}");
    println!("  years:   {start_year}-{end_year}");
    println!();

    let writer = Box::new(JsonDirWriter { dir: out_dir.clone() });
    let source = Box::new(JsonDirSource { dir: data_dir });

    let mut scheduler = EnsembleScheduler::new(
        config,
        host,
        total,
        infected,
        weather,
        TreatmentSchedule::new(TreatmentApplication::RatioToAll),
        writer,
        source,
        store,
        run_id.clone(),
    )?;

    if let Some(address) = connect {
        scheduler
            .attach_steering(address, port, None)
            .with_context(|| format!("attaching steering session {address}:{port}"))?;
        println!("steering session attached to {address}:{port}");
    }

    scheduler.run()?;
    print_summary(&scheduler, &run_id)?;
    Ok(())
}

fn print_summary(scheduler: &EnsembleScheduler, run_id: &str) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:       {run_id}");
    println!("  final date:   {}", scheduler.clock().current());
    println!("  checkpoints:  {}", scheduler.checkpoints().last_index());
    for realization in scheduler.realizations() {
        println!(
            "  run {:>2}: {:>8} infected, {:>6} escapes",
            realization.index,
            realization.infected.sum(),
            realization.outside_dispersers.len()
        );
    }
    let outputs = scheduler.store().event_count(run_id, "output_written")?;
    println!("  artifacts:    {outputs}");
    std::io::stdout().flush()?;
    Ok(())
}

/// A small self-contained scenario: a uniform host grid with one infected
/// focus in the middle. Used when no scenario file is given.
fn synthetic_scenario() -> ScenarioConfig {
    let (rows, cols) = (30, 30);
    let mut infected = vec![0; rows * cols];
    infected[(rows / 2) * cols + cols / 2] = 5;
    ScenarioConfig {
        rows,
        cols,
        host: vec![10; rows * cols],
        total: vec![12; rows * cols],
        infected,
        weather_coefficients: Vec::new(),
        temperatures: Vec::new(),
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
