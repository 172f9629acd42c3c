mod ad_size;
mod aliases;
mod auction;
mod auction_config;
mod bid;
mod browser_signals;
mod browser_state;
mod config;
mod currency;
mod errors;
mod host;
mod interest_group;
mod logger;
mod origin;
mod per_buyer;
mod reporting;
mod resources;
mod scenarios;
mod score;
mod utils;
mod wasm_helper;
mod worklet;
mod worklets;

use auction_config::AuctionConfig;
use clap::{Parser, Subcommand, ValueEnum};
use config::HostConfig;
use interest_group::InterestGroup;
use logger::{sanitize_filename, ConsoleReceiver, FileReceiver, LogEvent, Logger, TracingReceiver};
use scenarios::{get_scenario_catalog, ScenarioContext};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fledge-worklets", about = "Runs Protected Audience auction scenarios against the worklet contract")]
struct Cli {
    /// JSON host config; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default tracing filter when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered scenarios
    List,
    /// Run one scenario, or `all`
    Run {
        scenario: String,
        /// Number of runs per scenario, each with its own seed
        #[arg(short, long, default_value_t = 1)]
        iterations: u64,
        /// Seed of the first run
        #[arg(long, default_value_t = 0)]
        start_seed: u64,
        /// Stop at the first failing run
        #[arg(long)]
        fastbreak: bool,
        /// Print auction and reporting details to the console
        #[arg(long)]
        verbose: bool,
    },
    /// Parse and validate a JSON document
    Check {
        #[arg(value_enum)]
        kind: CheckKind,
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckKind {
    InterestGroup,
    AuctionConfig,
    HostConfig,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Command::List => {
            for scenario in get_scenario_catalog() {
                println!("{}", scenario.short_name);
            }
            Ok(true)
        }
        Command::Run { scenario, iterations, start_seed, fastbreak, verbose } => {
            load_config(cli.config.as_deref()).and_then(|config| {
                run_scenarios(&config, &scenario, iterations.max(1), start_seed, fastbreak, verbose)
            })
        }
        Command::Check { kind, file } => check_document(kind, &file),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HostConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(HostConfig::load(path)?),
        None => Ok(HostConfig::default()),
    }
}

/// Returns whether every run passed
fn run_scenarios(
    config: &HostConfig,
    scenario_arg: &str,
    iterations: u64,
    start_seed: u64,
    fastbreak: bool,
    verbose: bool,
) -> Result<bool, Box<dyn Error>> {
    let all_scenarios = get_scenario_catalog();
    let scenarios: Vec<_> = if scenario_arg == "all" {
        all_scenarios
    } else {
        match all_scenarios.iter().find(|s| s.short_name == scenario_arg) {
            Some(scenario) => vec![scenario.clone()],
            None => {
                let available: Vec<&str> = all_scenarios.iter().map(|s| s.short_name).collect();
                return Err(format!("scenario '{}' not found, available: {}", scenario_arg, available.join(", ")).into());
            }
        }
    };

    // Individual checks only go to the console for a single run of a single scenario
    let mut logger = Logger::new();
    let mut console_events = vec![LogEvent::Validation];
    if scenario_arg != "all" && iterations == 1 {
        console_events.push(LogEvent::Scenario);
    }
    if verbose {
        console_events.extend([LogEvent::Auction, LogEvent::Report]);
    }
    logger.add_receiver(ConsoleReceiver::new(console_events));
    logger.add_receiver(TracingReceiver::new(vec![LogEvent::Worklet, LogEvent::Auction, LogEvent::Report]));
    let summary_receiver_id = logger.add_receiver(FileReceiver::new(Path::new("log/summary.log"), vec![LogEvent::Validation])?);

    if iterations > 1 {
        logln!(&mut logger, LogEvent::Validation, "Running '{}' {} times from seed {}...\n", scenario_arg, iterations, start_seed);
    } else {
        logln!(&mut logger, LogEvent::Validation, "Running '{}' with seed {}...\n", scenario_arg, start_seed);
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    'scenarios: for scenario in &scenarios {
        log!(&mut logger, LogEvent::Validation, "{}: ", scenario.short_name);
        let log_path = PathBuf::from(format!("log/{}/scenario.log", sanitize_filename(scenario.short_name)));
        let scenario_receiver_id = logger.add_receiver(FileReceiver::new(&log_path, vec![LogEvent::Auction, LogEvent::Report, LogEvent::Scenario])?);

        for seed in start_seed..start_seed.saturating_add(iterations) {
            if iterations > 1 {
                log!(&mut logger, LogEvent::Validation, "[{}/{}] ", seed - start_seed + 1, iterations);
            }
            let ctx = ScenarioContext { name: scenario.short_name, config, seed: config.seed.wrapping_add(seed) };
            match (scenario.run)(&ctx, &mut logger) {
                Ok(()) => {
                    passed += 1;
                    if iterations > 1 {
                        logln!(&mut logger, LogEvent::Validation, "✓");
                    } else {
                        logln!(&mut logger, LogEvent::Validation, "✓ PASSED");
                    }
                }
                Err(e) => {
                    failed += 1;
                    if iterations > 1 {
                        logln!(&mut logger, LogEvent::Validation, "✗");
                    } else {
                        logln!(&mut logger, LogEvent::Validation, "✗ FAILED: {}", e);
                    }
                    if fastbreak {
                        logger.remove_receiver(scenario_receiver_id);
                        logln!(&mut logger, LogEvent::Validation, "\nStopping scenario execution due to failure (--fastbreak enabled)");
                        logln!(&mut logger, LogEvent::Validation, "Error at seed {}: {}", seed, e);
                        break 'scenarios;
                    }
                }
            }
            logger.flush()?;
        }
        logger.remove_receiver(scenario_receiver_id);
    }

    logln!(&mut logger, LogEvent::Validation, "\n{} passed, {} failed", passed, failed);
    logger.flush()?;
    logger.remove_receiver(summary_receiver_id);
    Ok(failed == 0)
}

fn check_document(kind: CheckKind, path: &Path) -> Result<bool, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let verdict = match kind {
        CheckKind::InterestGroup => serde_json::from_str::<InterestGroup>(&text)
            .map_err(|e| e.to_string())
            .and_then(|group| group.validate().map_err(|e| e.to_string())),
        CheckKind::AuctionConfig => serde_json::from_str::<AuctionConfig>(&text)
            .map_err(|e| e.to_string())
            .and_then(|config| config.validate().map_err(|e| e.to_string())),
        CheckKind::HostConfig => HostConfig::load(path).map(|_| ()).map_err(|e| e.to_string()),
    };
    match verdict {
        Ok(()) => {
            println!("✓ {} is valid", path.display());
            Ok(true)
        }
        Err(reason) => {
            println!("✗ {}: {}", path.display(), reason);
            Ok(false)
        }
    }
}
