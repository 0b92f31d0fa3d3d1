//! Breakwater CLI.
//!
//! Validate resilience configuration, preview retry schedules, replay call
//! patterns through a circuit breaker, and fetch URLs through the full
//! retry-plus-breaker stack.

use anyhow::{Context, Result};
use breakwater_core::{
    delay_with_fraction, CircuitCore, ResilienceConfig, RetryOverrides, RetryPreset,
    RetrySettings,
};
use breakwater_runtime::{RequestOptions, ReqwestTransport, ResilienceRegistry};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod simulate;

#[derive(Parser)]
#[command(name = "breakwater")]
#[command(about = "Retry and circuit breaker toolkit", long_about = None, version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a YAML or JSON resilience config
    Validate {
        file: PathBuf,

        /// Print the effective configuration as YAML
        #[arg(long)]
        print: bool,
    },
    /// Print the delay before each retry
    Schedule(ScheduleArgs),
    /// Replay a success/failure pattern through a circuit breaker
    Simulate(SimulateArgs),
    /// Fetch a URL with retries behind a circuit breaker
    Fetch(FetchArgs),
}

#[derive(Args)]
struct ScheduleArgs {
    /// Config file supplying the base retry settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start from a preset (exponential, linear, fixed)
    #[arg(long)]
    preset: Option<RetryPreset>,

    /// Initial delay, e.g. "100ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    initial: Option<Duration>,

    /// Maximum delay, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    max: Option<Duration>,

    #[arg(long)]
    factor: Option<f64>,

    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    jitter: Option<bool>,
}

#[derive(Args)]
struct SimulateArgs {
    /// Calls to replay: s = success, f = failure, - = idle tick
    #[arg(short, long)]
    pattern: String,

    /// Config file supplying the circuit settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Breaker name, for per-breaker overrides
    #[arg(long, default_value = "simulated")]
    breaker: String,

    /// Simulated time between steps
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Print only the final stats as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct FetchArgs {
    url: String,

    /// Config file supplying retry and circuit settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "http")]
    breaker: String,

    /// Override the configured retry count
    #[arg(long)]
    retries: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { file, print } => validate(&file, print),
        Commands::Schedule(args) => schedule(args),
        Commands::Simulate(args) => simulate(args),
        Commands::Fetch(args) => fetch(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "breakwater=debug"
    } else {
        "breakwater=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ResilienceConfig> {
    match path {
        Some(path) => ResilienceConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ResilienceConfig::default()),
    }
}

fn validate(file: &Path, print: bool) -> Result<()> {
    let config = load_config(Some(file))?;
    tracing::info!(file = %file.display(), breakers = config.breakers.len(), "Configuration valid");

    println!("{}: ok", file.display());
    if print {
        print!("{}", config.to_yaml()?);
    }
    Ok(())
}

fn schedule(args: ScheduleArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut base = config.retry;
    if let Some(preset) = args.preset {
        let delay = args.initial.unwrap_or(base.initial_delay);
        base = RetrySettings::preset(preset, delay)?.with_max_retries(base.max_retries);
    }

    let overrides = RetryOverrides {
        max_retries: args.retries,
        initial_delay: args.initial,
        max_delay: args.max,
        factor: args.factor,
        jitter: args.jitter,
    };
    let settings = overrides.apply_to(&base)?;

    println!(
        "max_retries={} initial={} max={} factor={} jitter={}",
        settings.max_retries,
        humantime::format_duration(settings.initial_delay),
        humantime::format_duration(settings.max_delay),
        settings.factor,
        settings.jitter
    );

    let mut lowest = Duration::ZERO;
    let mut highest = Duration::ZERO;
    for attempt in 0..settings.max_retries {
        let low = delay_with_fraction(attempt, &settings, 0.0);
        let high = delay_with_fraction(attempt, &settings, 1.0);
        lowest += low;
        highest += high;

        if low == high {
            println!("retry {:>3}: {}", attempt + 1, humantime::format_duration(low));
        } else {
            println!(
                "retry {:>3}: {} .. {}",
                attempt + 1,
                humantime::format_duration(low),
                humantime::format_duration(high)
            );
        }
    }

    if lowest == highest {
        println!("total wait: {}", humantime::format_duration(lowest));
    } else {
        println!(
            "total wait: {} .. {}",
            humantime::format_duration(lowest),
            humantime::format_duration(highest)
        );
    }
    Ok(())
}

fn simulate(args: SimulateArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let steps = simulate::parse_pattern(&args.pattern)?;

    let mut core = CircuitCore::new(args.breaker.as_str(), config.circuit_for(&args.breaker));
    let start = Instant::now();
    let reports = simulate::replay(&mut core, &steps, start, args.interval)?;

    if !args.json {
        for report in &reports {
            println!("{report}");
        }
    }

    let elapsed = reports.last().map(|r| r.offset).unwrap_or_default();
    let wall_now = chrono::Utc::now() + chrono::Duration::from_std(elapsed)?;
    let stats = core.stats(start + elapsed, wall_now);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn fetch(args: FetchArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let registry = ResilienceRegistry::new(config)?;
    let transport = Arc::new(ReqwestTransport::new()?);
    let fetch = registry.fetch(&args.breaker, transport);

    let overrides = RetryOverrides {
        max_retries: args.retries,
        ..Default::default()
    };
    let result = fetch
        .fetch(&args.url, &RequestOptions::get(), &overrides)
        .await;

    match &result {
        Ok(response) => println!("{} ({} bytes)", response.status, response.body.len()),
        Err(err) => eprintln!("fetch failed: {err}"),
    }
    println!("{}", serde_json::to_string_pretty(&registry.stats())?);

    result.map(|_| ()).context("Request did not succeed")
}
