use clap::{Args, Parser, Subcommand};
use georef_align::{
    read_observations_csv, read_trajectory_csv, AlignmentConfig, AlignmentReport, InboundMessage,
    IngestOutcome, ObservationHandler, SolveReport,
};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "georef-align")]
#[command(version, about = "Estimate the world-to-georef alignment from recorded data")]
struct Cli {
    /// Log solver progress at debug level.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay recorded observations against a recorded world trajectory.
    Replay(ReplayArgs),
    /// Write a config file holding every default.
    InitConfig {
        #[arg(long, default_value = "georef_align.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// JSON config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV with header `stamp,frame_id,x,y` (georeferenced positions).
    #[arg(long)]
    observations: PathBuf,

    /// CSV with header `stamp,x,y` (world-frame positions of the receiver).
    #[arg(long)]
    trajectory: PathBuf,

    /// Where to write the JSON report.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Issue one run-optimization request after the last observation.
    #[arg(long, default_value_t = false)]
    run_optimization: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    match cli.command {
        Command::Replay(args) => replay(args),
        Command::InitConfig { output } => {
            AlignmentConfig::default().write_json(&output)?;
            println!("wrote {}", output.display());
            Ok(())
        }
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, json: bool) -> Result<(), log::SetLoggerError> {
    if json {
        eprintln!("--json-logs needs the `tracing` feature; using plain logs");
    }
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    georef_align::core::init_with_level(level)
}

#[cfg(feature = "tracing")]
fn init_logging(verbose: bool, json: bool) -> Result<(), log::SetLoggerError> {
    let _ = tracing_log::LogTracer::init_with_filter(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    georef_align::core::init_tracing(json);
    Ok(())
}

#[derive(Default)]
struct ReplayTally {
    ingested: usize,
    dropped: usize,
    frame_mismatches: usize,
    solves: usize,
    last: Option<SolveReport>,
}

impl ReplayTally {
    fn record(&mut self, outcome: IngestOutcome) {
        let solve = match outcome {
            IngestOutcome::Ingested {
                frame_mismatch,
                solve,
                ..
            } => {
                self.ingested += 1;
                self.frame_mismatches += usize::from(frame_mismatch);
                solve
            }
            IngestOutcome::Solved(report) => Some(report),
        };
        if let Some(report) = solve {
            self.solves += 1;
            self.last = Some(report);
        }
    }
}

fn replay(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => AlignmentConfig::load_json(path)?,
        None => AlignmentConfig::default(),
    };
    let estimator = Arc::new(config.build_estimator()?);
    let buffer = read_trajectory_csv(&args.trajectory, &config.frames.child, &config.frames.source)?;
    let observations = read_observations_csv(&args.observations)?;
    log::info!(
        "replaying {} observations against {} trajectory samples",
        observations.len(),
        buffer.len()
    );

    // The trajectory is fully loaded, so waiting for later samples is pointless.
    let mut handler_params = config.handler_params();
    handler_params.lookup_timeout = Duration::ZERO;
    let handler = ObservationHandler::new(Arc::clone(&estimator), buffer, handler_params);

    let mut tally = ReplayTally::default();
    let total = observations.len();
    for obs in observations {
        // Failures are already logged by the handler.
        match handler.handle(InboundMessage::Observation(obs)) {
            Ok(outcome) => tally.record(outcome),
            Err(_) => tally.dropped += 1,
        }
    }
    if args.run_optimization {
        if let Ok(outcome) = handler.handle(InboundMessage::RunOptimization(None)) {
            tally.record(outcome);
        }
    }

    let snapshot = estimator.snapshot();
    println!(
        "translation: {} {}",
        snapshot.estimate.translation.x, snapshot.estimate.translation.y
    );
    println!("rotation: {}", snapshot.estimate.rotation);
    println!(
        "correspondences: {} (dropped {}), solves: {}",
        snapshot.correspondences, tally.dropped, tally.solves
    );

    if let Some(path) = &args.report {
        let report = AlignmentReport {
            config_path: args.config.as_ref().map(|p| p.display().to_string()),
            observations_path: args.observations.display().to_string(),
            trajectory_path: args.trajectory.display().to_string(),
            observations: total,
            ingested: tally.ingested,
            dropped: tally.dropped,
            frame_mismatches: tally.frame_mismatches,
            solves: tally.solves,
            generation: snapshot.generation,
            estimate: snapshot.estimate,
            diagnostics_path: tally
                .last
                .as_ref()
                .and_then(|r| r.diagnostics.as_ref())
                .map(|p| p.display().to_string()),
            last_summary: tally.last.map(|r| r.summary),
        };
        report.write_json(path)?;
        log::info!("report written to {}", path.display());
    }
    Ok(())
}
