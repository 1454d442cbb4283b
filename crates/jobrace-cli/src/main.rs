//! `jobrace` command-line tool
//!
//! Runs seeded race simulations against the in-memory change feed and prints
//! the effective configuration.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use jobrace_core::JobraceConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod simulate;

use simulate::SimulationConfig;

fn cli() -> Command {
    Command::new("jobrace")
        .version(jobrace_core::VERSION)
        .about("Single-winner job completion arbitration")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Race simulated HTTP responses against change-feed pushes")
                .arg(
                    Arg::new("jobs")
                        .long("jobs")
                        .default_value("100")
                        .value_parser(value_parser!(usize))
                        .help("Number of jobs to submit"),
                )
                .arg(
                    Arg::new("http-delay-ms")
                        .long("http-delay-ms")
                        .default_value("120")
                        .value_parser(value_parser!(u64))
                        .help("Base latency of the HTTP response"),
                )
                .arg(
                    Arg::new("feed-delay-ms")
                        .long("feed-delay-ms")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Base latency of the change-feed push"),
                )
                .arg(
                    Arg::new("jitter-ms")
                        .long("jitter-ms")
                        .default_value("80")
                        .value_parser(value_parser!(u64))
                        .help("Uniform jitter added to each latency"),
                )
                .arg(
                    Arg::new("deadline-ms")
                        .long("deadline-ms")
                        .default_value("2000")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Per-job deadline"),
                )
                .arg(
                    Arg::new("drop-rate")
                        .long("drop-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that either channel never reports"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML config file (optional)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

async fn run_simulate(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = SimulationConfig {
        jobs: arg(args, "jobs")?,
        http_delay: Duration::from_millis(arg(args, "http-delay-ms")?),
        feed_delay: Duration::from_millis(arg(args, "feed-delay-ms")?),
        jitter: Duration::from_millis(arg(args, "jitter-ms")?),
        deadline: Duration::from_millis(arg(args, "deadline-ms")?),
        drop_rate: arg(args, "drop-rate")?,
        seed: arg(args, "seed")?,
    };
    if !(0.0..=1.0).contains(&config.drop_rate) {
        anyhow::bail!("--drop-rate must be between 0 and 1");
    }

    let report = simulate::run(&config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_config(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let mut config = match args.get_one::<PathBuf>("file") {
        Some(path) => JobraceConfig::load(path)?,
        None => {
            let mut config = JobraceConfig::default();
            config.apply_env()?;
            config
        }
    };
    if config.http.bearer_token.is_some() {
        config.http.bearer_token = Some("<redacted>".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => run_simulate(args).await,
        Some(("config", args)) => run_config(args),
        _ => Ok(ExitCode::FAILURE),
    }
}
