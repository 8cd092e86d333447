use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod altitude;
mod bench;
mod config;
mod context;
mod hardware;
mod logger;
mod sensors;
mod state;
mod telemetry;

use bench::BenchRig;
use config::{FlightConfig, Mode};
use context::{signal_abort, signal_shutdown, Context};
use logger::FlightLogger;
use sensors::SensorFault;
use state::ShutdownCause;
use telemetry::Telemetry;

#[derive(Parser)]
#[command(name = "kestrel-avionics")]
#[command(about = "Parachute deployment computer for the Kestrel airframe")]
#[command(version)]
struct Cli {
    /// Where samples come from and where outputs go.
    #[arg(long, value_enum, default_value = "flight")]
    mode: Mode,

    #[command(flatten)]
    config: FlightConfig,

    /// Serial device for the telemetry downlink; "none" disables it.
    #[arg(long, default_value = "/dev/serial0")]
    telemetry_port: String,

    /// Directory for flight record files.
    #[arg(long, default_value = "logs")]
    log_dir: String,

    /// Noise seed for bench runs.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Press the abort button at this mission time in a bench run.
    #[arg(long)]
    abort_at_ms: Option<u32>,
}

type LineEdges = Rc<RefCell<Vec<(u32, bool)>>>;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let paced = cli.mode == Mode::Flight;
    info!("starting in {:?} mode", cli.mode);

    let (mut mission, line_edges) = match cli.mode {
        Mode::Flight => (build_flight(&cli)?, None),
        Mode::Bench => {
            let (mission, edges) = build_bench(&cli)?;
            (mission, Some(edges))
        }
    };

    let outcome = run(&mut mission, cli.config.tick_ms, paced);

    let aborted = match &outcome {
        Err(_) => true,
        Ok(()) => mission.shutdown_cause() == Some(ShutdownCause::ManualAbort),
    };
    if aborted {
        signal_abort(mission.indicator_mut(), paced);
    } else {
        signal_shutdown(mission.indicator_mut(), paced);
    }

    let summary = mission.finish();
    info!(
        "mission over in {:?}: peak {:.1} m, deployed at {:?} ms, {} ms total",
        summary.phase, summary.peak_altitude_m, summary.deployed_at_ms, summary.duration_ms
    );
    if summary.cause == Some(ShutdownCause::Timeout) {
        warn!("descent never stabilized; the hard timeout closed it out");
    }
    if let Some(edges) = line_edges {
        report_deployment(&edges.borrow());
    }

    outcome.context("sensor fault ended the mission")?;
    if summary.cause == Some(ShutdownCause::ManualAbort) {
        anyhow::bail!("mission aborted by manual command");
    }
    Ok(())
}

fn run(mission: &mut Context, tick_ms: u32, paced: bool) -> Result<(), SensorFault> {
    let tick = Duration::from_millis(tick_ms as u64);
    loop {
        let started = Instant::now();
        mission.update()?;
        if mission.is_complete() {
            return Ok(());
        }
        // Bench runs skip the sleep and replay the mission flat out.
        if paced {
            let elapsed = started.elapsed();
            if elapsed < tick {
                thread::sleep(tick - elapsed);
            } else {
                warn!("tick overrun: {} ms", elapsed.as_millis());
            }
        }
    }
}

fn build_flight(cli: &Cli) -> anyhow::Result<Context> {
    let logger = FlightLogger::create(&cli.log_dir).context("flight record file")?;
    let sensors = hardware::HardwareSensors::init().context("sensor bring-up")?;
    let parachute = hardware::HardwareParachute::init().context("parachute line")?;
    let indicator = hardware::HardwareIndicator::init().context("indicators")?;
    let abort = hardware::HardwareAbort::init().context("abort switch")?;

    let telemetry = match cli.telemetry_port.as_str() {
        "none" => None,
        path => match Telemetry::open(path) {
            Ok(telemetry) => Some(telemetry),
            Err(e) => {
                warn!("telemetry port unavailable, flying without it: {}", e);
                None
            }
        },
    };

    let mission = Context::arm(
        cli.config.clone(),
        true,
        Box::new(sensors),
        Box::new(parachute),
        Box::new(indicator),
        Box::new(abort),
        logger,
        telemetry,
    )
    .context("arming")?;
    Ok(mission)
}

fn build_bench(cli: &Cli) -> anyhow::Result<(Context, LineEdges)> {
    let logger = FlightLogger::create(&cli.log_dir).context("flight record file")?;
    let rig = BenchRig::new(cli.config.tick_ms, cli.seed, cli.abort_at_ms)?;
    let edges = rig.line_edges.clone();

    let mission = Context::arm(
        cli.config.clone(),
        false,
        Box::new(rig.sensors),
        Box::new(rig.parachute),
        Box::new(rig.indicator),
        Box::new(rig.abort),
        logger,
        None,
    )
    .context("arming")?;
    Ok((mission, edges))
}

fn report_deployment(edges: &[(u32, bool)]) {
    match edges {
        [] => info!("parachute line never moved"),
        [(up, true), (down, false)] => info!("deployment pulse held {} ms", down - up),
        other => warn!("unexpected parachute line activity: {:?}", other),
    }
}
