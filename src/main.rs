mod args;
mod config;
mod monitor;
mod process;
mod signals;
mod status;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::args::ParsedArgs;
use crate::monitor::Monitor;
use crate::process::ProcFs;
use crate::signals::SignalHandler;
use crate::status::StatusTracker;

/// Exit code for config file and runtime setup failures.
const SETUP_FAILURE: u8 = 1;

/// A Rust CLI tool that watches every process with a given name and
/// kills the ones that have been running longer than a threshold,
/// checking again after each interval until none are left.
#[derive(Parser, Debug)]
#[command(name = "agewatch", version, about)]
pub struct Cli {
    /// processName killMinutes checkMinutes
    #[arg(value_name = "ARGS", allow_negative_numbers = true)]
    args: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "agewatch.toml")]
    config: PathBuf,

    /// Check once and exit instead of looping
    #[arg(long)]
    once: bool,

    /// Validate arguments and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (state changes, config resolution)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    tracing::debug!(?cli, "parsed CLI arguments");

    let watch_config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(SETUP_FAILURE);
        }
    };

    let table = ProcFs::new();
    if let Err(e) = args::validate_args(cli.args.as_slice(), &table) {
        eprintln!("error: {e}");
        return ExitCode::from(e.exit_code());
    }

    let parsed = match args::parse_args(cli.args.as_slice(), &watch_config.monitor) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    if let ParsedArgs::Partial { config, defaulted } = &parsed {
        tracing::warn!(
            field = %defaulted,
            kill_minutes = config.kill_minutes,
            check_minutes = config.check_minutes,
            "time argument did not parse, default kept"
        );
    }
    let monitor_config = parsed.into_config();

    if cli.dry_run {
        println!("agewatch v{}", env!("CARGO_PKG_VERSION"));
        println!("Process:        {}", monitor_config.process_name);
        println!("Kill after:     {} min", monitor_config.kill_minutes);
        println!("Check every:    {} min", monitor_config.check_minutes);
        println!("Stop file:      {}", watch_config.shutdown.stop_file.display());
        match &watch_config.status.file {
            Some(path) => println!("Status file:    {}", path.display()),
            None => println!("Status file:    (none)"),
        }
        println!("Dry run mode, arguments validated, not running.");
        return ExitCode::SUCCESS;
    }

    let status = StatusTracker::new(watch_config.status.file.clone(), &monitor_config);
    let mut monitor = Monitor::new(monitor_config, table)
        .with_status(status)
        .with_stop_file(watch_config.shutdown.stop_file.clone())
        .with_max_kill_failures(watch_config.monitor.max_kill_failures);

    if cli.once {
        let report = monitor.run_once();
        tracing::info!(?report, "single check finished");
        monitor.close();
        return ExitCode::SUCCESS;
    }

    let signals = match SignalHandler::install(watch_config.status.file.clone()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to install signal handlers: {e}");
            return ExitCode::from(SETUP_FAILURE);
        }
    };

    let outcome = monitor.run(signals.subscribe()).await;
    tracing::info!(?outcome, state = ?monitor.state(), "monitor finished");
    monitor.close();
    ExitCode::SUCCESS
}
