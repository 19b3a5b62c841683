//! Demo and replay driver
//!
//! Feeds the engine from a built-in scenario, a recorded file or the mesh
//! simulator, runs it on a simulated clock and prints the resulting layout as
//! JSON. `listen` instead reads one transport payload per stdin line and runs
//! the engine on the wall clock.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use uwb_positioning::simulation::{scenario, scenario_names, MeshSimulator, SimulatorConfig};
use uwb_positioning::utils::{LogFormat, LogLevel};
use uwb_positioning::validation::{EdgeResidual, TriangleViolation};
use uwb_positioning::{
    init_logging, ConfigurationManager, EngineEvent, EngineRuntime, GpsAnchorConfig, LayoutSnapshot,
    PositioningEngine,
};

#[derive(Parser, Debug)]
#[command(name = "uwb-positioning", version, about = "UWB distance-graph localization engine")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GPS anchor as `ID,LAT,LNG`; enables geo projection. Repeatable.
    #[arg(long, global = true, value_parser = parse_anchor)]
    anchor: Vec<GpsAnchorConfig>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Override the configured log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<CliLogFormat>,

    /// Print every engine event as a JSON line before the final report
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in scenarios
    Scenarios,
    /// Relax one built-in scenario
    Scenario {
        name: String,
        /// Solver ticks to run
        #[arg(long, default_value_t = 1500)]
        ticks: u64,
    },
    /// Replay a JSON file of recorded payloads
    Replay {
        file: PathBuf,
        /// Solver ticks between two recorded batches
        #[arg(long, default_value_t = 60)]
        ticks_per_batch: u64,
    },
    /// Drive the engine from the mesh simulator
    Simulate {
        #[arg(long, default_value_t = 100)]
        steps: u64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Solver ticks between two simulated batches
        #[arg(long, default_value_t = 30)]
        ticks_per_step: u64,
    },
    /// Read one payload per stdin line and run on the wall clock
    Listen {
        /// Time to keep relaxing after input ends
        #[arg(long, default_value_t = 2000)]
        settle_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
    Compact,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Json => LogFormat::Json,
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Compact => LogFormat::Compact,
        }
    }
}

fn parse_anchor(value: &str) -> Result<GpsAnchorConfig, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [id, lat, lng] = parts.as_slice() else {
        return Err(format!("expected ID,LAT,LNG, got '{}'", value));
    };
    let lat: f64 = lat.parse().map_err(|e| format!("invalid latitude '{}': {}", lat, e))?;
    let lng: f64 = lng.parse().map_err(|e| format!("invalid longitude '{}': {}", lng, e))?;
    Ok(GpsAnchorConfig::new(*id, lat, lng))
}

/// Final output of a run
#[derive(Serialize)]
struct RunReport {
    snapshot: LayoutSnapshot,
    residuals: Vec<EdgeResidual>,
    triangle_violations: Vec<TriangleViolation>,
}

impl RunReport {
    fn from_engine(engine: &PositioningEngine) -> Self {
        Self {
            snapshot: engine.snapshot(),
            residuals: engine.residuals(),
            triangle_violations: engine.triangle_violations(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut manager = match &cli.config {
        Some(path) => ConfigurationManager::from_file(path)?,
        None => ConfigurationManager::new(),
    };
    for anchor in &cli.anchor {
        manager.set_gps_anchor(anchor.clone())?;
    }
    if !cli.anchor.is_empty() {
        manager.set_geo_enabled(true);
    }

    let mut log_config = manager.config().logging.clone();
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    if let Some(format) = cli.log_format {
        log_config.format = format.into();
    }
    init_logging(&log_config);

    let validation = ConfigurationManager::validate(manager.config());
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }

    let mut engine = PositioningEngine::with_manager(manager);
    if cli.events {
        engine.subscribe(Box::new(|event: &EngineEvent| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
        }));
    }

    let report = match cli.command {
        Command::Scenarios => {
            for name in scenario_names() {
                if let Some(s) = scenario(name) {
                    println!("{:<16} {}", s.name, s.description);
                }
            }
            return Ok(());
        }
        Command::Scenario { name, ticks } => {
            let scenario = scenario(&name).ok_or_else(|| {
                format!(
                    "unknown scenario '{}', expected one of: {}",
                    name,
                    scenario_names().collect::<Vec<_>>().join(", ")
                )
            })?;
            tracing::info!(scenario = scenario.name, measurements = scenario.measurements.len(), "running scenario");
            let mut clock = SimClock::new(&engine);
            engine.apply_batch(&scenario.measurements, clock.now());
            clock.run(&mut engine, ticks);
            RunReport::from_engine(&engine)
        }
        Command::Replay { file, ticks_per_batch } => {
            let payloads = load_recording(&file)?;
            tracing::info!(file = %file.display(), batches = payloads.len(), "replaying recording");
            let mut clock = SimClock::new(&engine);
            for payload in payloads {
                if let Err(e) = engine.apply_payload(&payload, clock.now()) {
                    tracing::warn!(error = %e, "skipping recorded payload");
                }
                clock.run(&mut engine, ticks_per_batch);
            }
            RunReport::from_engine(&engine)
        }
        Command::Simulate {
            steps,
            seed,
            ticks_per_step,
        } => {
            let simulator = MeshSimulator::new(SimulatorConfig {
                seed,
                ..SimulatorConfig::default()
            });
            let mut clock = SimClock::new(&engine);
            for batch in simulator.take(steps as usize) {
                engine.apply_batch(&batch, clock.now());
                clock.run(&mut engine, ticks_per_step);
            }
            RunReport::from_engine(&engine)
        }
        Command::Listen { settle_ms } => listen(engine, settle_ms)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Simulated time advanced by one solver interval per tick
struct SimClock {
    now_ms: u64,
    step_ms: u64,
}

impl SimClock {
    fn new(engine: &PositioningEngine) -> Self {
        Self {
            now_ms: 0,
            step_ms: engine.config().runtime.solver_interval_ms.max(1),
        }
    }

    fn now(&self) -> u64 {
        self.now_ms
    }

    fn run(&mut self, engine: &mut PositioningEngine, ticks: u64) {
        for _ in 0..ticks {
            engine.tick(self.now_ms);
            self.now_ms += self.step_ms;
        }
    }
}

/// Accepts either a JSON array of payloads or the publisher's sample format,
/// an array of `{"measurements": [...]}` objects
fn load_recording(path: &PathBuf) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    let Value::Array(entries) = value else {
        return Err("recording must be a JSON array".into());
    };
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(mut object) => object.remove("measurements").unwrap_or(Value::Null).to_string(),
            other => other.to_string(),
        })
        .collect())
}

fn listen(engine: PositioningEngine, settle_ms: u64) -> Result<RunReport, Box<dyn std::error::Error>> {
    let mut runtime = EngineRuntime::start(engine)?;
    let ingest = runtime.ingest_handle();

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        ingest.submit_payload(line);
    }

    std::thread::sleep(Duration::from_millis(settle_ms));
    let report = runtime.with_engine(|engine| RunReport::from_engine(engine));
    runtime.stop();
    Ok(report)
}
