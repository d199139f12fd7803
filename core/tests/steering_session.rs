//! Live steering over a real loopback socket: command flow, notifications,
//! and the implicit-Stop-on-receive-failure contract.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use outbreak_core::clock::{Season, StepKind};
use outbreak_core::command::{CommandQueue, SteeringCommand};
use outbreak_core::config::{KernelConfig, SimulationConfig};
use outbreak_core::kernel::KernelKind;
use outbreak_core::output::{MemoryRasterSource, MemoryWriter, OutputConfig};
use outbreak_core::raster::HostRaster;
use outbreak_core::scheduler::EnsembleScheduler;
use outbreak_core::steering::SteeringChannel;
use outbreak_core::store::RunStore;
use outbreak_core::treatment::{TreatmentApplication, TreatmentSchedule};
use outbreak_core::weather::WeatherSeries;

/// Poll the queue until `expected` commands arrived or the deadline hits.
fn drain_queue(queue: &CommandQueue, expected: usize, deadline: Duration) -> Vec<SteeringCommand> {
    let start = Instant::now();
    let mut commands = Vec::new();
    while commands.len() < expected && start.elapsed() < deadline {
        match queue.pop() {
            Some(cmd) => commands.push(cmd),
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
    commands
}

#[test]
fn commands_flow_from_the_server_to_the_queue() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream
            .write_all(b"cmd:play;goto:2;load:2001:spray_a;")
            .expect("write");
        // keep the connection alive until the client drains the queue
        thread::sleep(Duration::from_millis(500));
        stream.write_all(b"cmd:stop;").expect("write stop");
    });

    let queue = CommandQueue::new();
    let channel = SteeringChannel::connect("127.0.0.1", port, None, queue.clone()).expect("connect");

    let commands = drain_queue(&queue, 3, Duration::from_secs(5));
    assert_eq!(
        commands,
        vec![
            SteeringCommand::Play,
            SteeringCommand::GoTo { year: 2 },
            SteeringCommand::LoadData { year: 2001, name: "spray_a".into() },
        ]
    );

    let stop = drain_queue(&queue, 1, Duration::from_secs(5));
    assert_eq!(stop, vec![SteeringCommand::Stop]);

    server.join().expect("server thread");
    drop(channel);
}

#[test]
fn receive_failure_produces_exactly_one_stop() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        thread::sleep(Duration::from_millis(100));
        drop(stream); // peer closes: a receive failure on our side
    });

    let queue = CommandQueue::new();
    let channel = SteeringChannel::connect("127.0.0.1", port, None, queue.clone()).expect("connect");
    server.join().expect("server thread");

    let commands = drain_queue(&queue, 1, Duration::from_secs(5));
    assert_eq!(commands, vec![SteeringCommand::Stop]);

    // nothing else ever arrives
    thread::sleep(Duration::from_millis(200));
    assert!(queue.is_empty(), "only one Stop may be queued");
    drop(channel);
}

fn build_scheduler() -> EnsembleScheduler {
    let config = SimulationConfig {
        start_year: 2000,
        end_year: 2000,
        step: StepKind::Month,
        season: Season { first_month: 1, last_month: 12 },
        runs: 1,
        threads: 1,
        master_seed: 5,
        reproductive_rate: 4.4,
        kernel: KernelConfig { kind: KernelKind::Cauchy, scale: 120.0 },
        ew_res: 100.0,
        ns_res: 100.0,
        lethal: None,
        treatment_month: None,
        treatment_application: TreatmentApplication::RatioToAll,
        mortality: None,
        outputs: OutputConfig {
            series: Some("steered".into()),
            ..OutputConfig::default()
        },
    };

    let host = HostRaster::filled(8, 8, 8);
    let total = HostRaster::filled(8, 8, 10);
    let mut infected = HostRaster::filled(8, 8, 0);
    infected[(4, 4)] = 2;

    let store = RunStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store.insert_run("steer-test", 5, "test").expect("insert run");

    EnsembleScheduler::new(
        config,
        host,
        total,
        infected,
        WeatherSeries::none(),
        TreatmentSchedule::new(TreatmentApplication::RatioToAll),
        Box::new(MemoryWriter::default()),
        Box::new(MemoryRasterSource::default()),
        store,
        "steer-test".into(),
    )
    .expect("scheduler")
}

/// Read from the server end until `needle` shows up or the deadline hits.
fn read_until(stream: &mut TcpStream, needle: &str, deadline: Duration) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(100)))
        .expect("timeout");
    let start = Instant::now();
    let mut received = String::new();
    let mut buf = [0u8; 256];
    while !received.contains(needle) && start.elapsed() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received.push_str(&String::from_utf8_lossy(&buf[..n])),
            Err(_) => {}
        }
    }
    received
}

#[test]
fn steered_run_plays_to_the_end_and_notifies_outputs() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.write_all(b"cmd:play;").expect("write play");
        let received = read_until(&mut stream, "info:last:", Duration::from_secs(20));
        stream.write_all(b"cmd:stop;").expect("write stop");
        received
    });

    let mut scheduler = build_scheduler();
    scheduler
        .attach_steering("127.0.0.1", port, None)
        .expect("attach");
    scheduler.run().expect("run");

    let received = server.join().expect("server thread");
    assert!(
        received.contains("output:steered_2000_12_31|"),
        "missing output notification, got: {received:?}"
    );
    assert!(
        received.contains("info:last:steered_2000_12_31"),
        "missing end-of-run notification, got: {received:?}"
    );
    assert_eq!(scheduler.checkpoints().last_index(), 1);
}
