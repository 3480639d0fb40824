//! arena-sync - host-authoritative replication for a P2P arena shooter
//!
//! Headless driver: runs a host and several clients over an in-process lossy
//! network and reports whether the clients converged on the host's state.

mod config;
mod headless;

use anyhow::Result;
use config::SimConfig;
use headless::HeadlessConfig;
use std::{env, path::PathBuf};
use tracing::info;

fn main() -> Result<()> {
    // Initialize tracing with WARN level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    info!("Starting arena-sync v{}", env!("CARGO_PKG_VERSION"));

    let cli = CliOptions::parse(env::args().skip(1));
    if cli.help {
        print_help();
        return Ok(());
    }

    let mut sim = match &cli.config {
        Some(path) => SimConfig::load_from_path(path),
        None => SimConfig::load(),
    };
    if let Some(ticks) = cli.ticks {
        sim.ticks = ticks;
    }
    if let Some(clients) = cli.clients {
        sim.clients = clients;
    }
    if let Some(seed) = cli.seed {
        sim.seed = seed;
        sim.replication.seed = seed;
    }
    if let Some(drop_rate) = cli.drop_rate {
        sim.network.drop_rate = drop_rate;
    }

    let report = headless::run(HeadlessConfig {
        sim,
        metrics: cli.metrics,
        events: cli.events,
    })?;

    println!(
        "{}: {} ms simulated, {} delivered, {} dropped, {} full syncs",
        serde_json::to_string(&report.result)?,
        report.sim_time_ms,
        report.network.delivered,
        report.network.dropped,
        report.host.full_syncs,
    );
    for client in &report.clients {
        println!(
            "  {}: {} entities, {} missing, {} ghosts, {} stale",
            client.peer, client.entities, client.missing, client.ghosts, client.stale
        );
    }

    if cli.strict && report.result == arena_testkit::TestResult::Fail {
        anyhow::bail!("clients did not converge on the host's state");
    }
    Ok(())
}

fn print_help() {
    println!(
        "usage: arena-sync [--config PATH] [--ticks N] [--clients N] [--seed N] \
         [--drop-rate P] [--metrics PATH] [--events PATH] [--strict]"
    );
}

#[derive(Debug, Default)]
struct CliOptions {
    help: bool,
    config: Option<PathBuf>,
    ticks: Option<u64>,
    clients: Option<usize>,
    seed: Option<u64>,
    drop_rate: Option<f64>,
    metrics: Option<PathBuf>,
    events: Option<PathBuf>,
    strict: bool,
}

impl CliOptions {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Self {
        let mut opts = CliOptions::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--strict" => opts.strict = true,
                "--config" => match args.next() {
                    Some(path) => opts.config = Some(PathBuf::from(path)),
                    None => tracing::error!("--config requires a file path"),
                },
                "--metrics" => match args.next() {
                    Some(path) => opts.metrics = Some(PathBuf::from(path)),
                    None => tracing::error!("--metrics requires a file path"),
                },
                "--events" => match args.next() {
                    Some(path) => opts.events = Some(PathBuf::from(path)),
                    None => tracing::error!("--events requires a file path"),
                },
                "--ticks" => opts.ticks = parse_value(&mut args, "--ticks"),
                "--clients" => opts.clients = parse_value(&mut args, "--clients"),
                "--seed" => opts.seed = parse_value(&mut args, "--seed"),
                "--drop-rate" => opts.drop_rate = parse_value(&mut args, "--drop-rate"),
                other => tracing::warn!(arg = other, "ignoring unknown argument"),
            }
        }

        opts
    }
}

fn parse_value<T, I>(args: &mut I, flag: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    I: Iterator<Item = String>,
{
    let Some(raw) = args.next() else {
        tracing::error!("{flag} requires a value");
        return None;
    };
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(%err, value = %raw, "{flag} has an invalid value");
            None
        }
    }
}
