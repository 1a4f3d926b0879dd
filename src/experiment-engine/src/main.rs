//! Experiment Engine: deterministic variant assignment and bandit simulation
//! from the command line.

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use experiment_bandits::BanditEngine;
use experiment_core::config::AppConfig;
use experiment_core::types::{Arm, BanditAlgorithm, Experiment, ExperimentStatus, Variant};
use experiment_core::{MemoryDefinitionStore, MemoryOutcomeStore};
use experiment_reporting::{analyze_bandit, recommend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "experiment-engine")]
#[command(about = "A/B assignment and multi-armed bandit decision engine")]
#[command(version)]
struct Cli {
    /// Config file (TOML/JSON/YAML); environment variables still apply
    #[arg(long, global = true, env = "EXPERIMENT_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, global = true, env = "EXPERIMENT_ENGINE__NODE_ID")]
    node_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the variant a unit sees in an active experiment
    Assign {
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        unit: String,
        /// Comma separated `id:weight` pairs, control first
        #[arg(long, default_value = "control:1,treatment:1")]
        variants: String,
        /// Fraction of units included, 0.0-1.0
        #[arg(long)]
        rollout: Option<f64>,
    },
    /// Run a bandit against simulated Bernoulli arms and print the analysis
    Simulate {
        /// epsilon_greedy, ucb1, thompson_sampling or bayesian
        #[arg(long, default_value = "thompson_sampling")]
        algorithm: String,
        /// Comma separated true conversion rate per arm
        #[arg(long, default_value = "0.05,0.04")]
        rates: String,
        #[arg(long)]
        rounds: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "experiment_engine=info,experiment_core=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    info!(node_id = %config.node_id, "Configuration loaded");

    match cli.command {
        Command::Assign {
            experiment,
            unit,
            variants,
            rollout,
        } => run_assign(&experiment, &unit, &variants, rollout),
        Command::Simulate {
            algorithm,
            rates,
            rounds,
            workers,
            seed,
        } => {
            let algorithm: BanditAlgorithm = algorithm.parse()?;
            let rates = parse_rates(&rates)?;
            if let Some(rounds) = rounds {
                config.simulation.rounds = rounds;
            }
            if let Some(workers) = workers {
                config.simulation.workers = workers;
            }
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            run_simulation(&config, algorithm, rates).await
        }
    }
}

fn run_assign(experiment_id: &str, unit: &str, variants: &str, rollout: Option<f64>) -> anyhow::Result<()> {
    let mut experiment = Experiment::new(experiment_id, experiment_id, parse_variants(variants)?)
        .with_status(ExperimentStatus::Active);
    if let Some(fraction) = rollout {
        experiment = experiment.with_rollout(fraction);
    }
    experiment.validate()?;

    let outcome = experiment_core::experimentation::assign(&experiment, unit, &HashMap::new());
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_simulation(
    config: &AppConfig,
    algorithm: BanditAlgorithm,
    rates: Vec<f64>,
) -> anyhow::Result<()> {
    let engine = Arc::new(BanditEngine::new(
        Arc::new(MemoryDefinitionStore::new()),
        Arc::new(MemoryOutcomeStore::new()),
        &config.bandit,
    ));
    let arms = (0..rates.len())
        .map(|i| Arm::new(format!("arm-{i}"), format!("Arm {i}")))
        .collect();
    let experiment_id = "simulation";
    engine.create_with_defaults(experiment_id, "Simulation", algorithm, arms)?;

    let settings = &config.simulation;
    let workers = settings.workers.max(1);
    let rates = Arc::new(rates);
    info!(
        algorithm = ?algorithm,
        rounds = settings.rounds,
        workers,
        seed = settings.seed,
        "Starting simulation"
    );

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let share = settings.rounds / workers + usize::from(worker < settings.rounds % workers);
        let engine = engine.clone();
        let rates = rates.clone();
        let seed = settings.seed.wrapping_add(worker as u64);
        handles.push(tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut rng = StdRng::seed_from_u64(seed);
            let context = HashMap::new();
            for round in 0..share {
                let unit = format!("worker-{worker}-unit-{round}");
                let arm = engine.select_arm_with_rng(experiment_id, &unit, &context, &mut rng)?;
                let rate = arm
                    .id
                    .strip_prefix("arm-")
                    .and_then(|i| i.parse::<usize>().ok())
                    .and_then(|i| rates.get(i).copied())
                    .with_context(|| format!("no simulated rate for arm {}", arm.id))?;
                let success = rng.gen_bool(rate);
                let reward = if success { 1.0 } else { 0.0 };
                engine.record_reward(experiment_id, &arm.id, &unit, reward, success, HashMap::new())?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let snapshot = engine.snapshot(experiment_id)?;
    let analysis = analyze_bandit(&snapshot, &config.statistics);
    let recommendation = recommend(&analysis, &config.advisor);
    info!(
        total_pulls = analysis.total_pulls,
        decision = ?recommendation.decision,
        "Simulation finished"
    );

    let report = json!({
        "algorithm": algorithm,
        "true_rates": *rates,
        "analysis": analysis,
        "recommendation": recommendation,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_variants(raw: &str) -> anyhow::Result<Vec<Variant>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (id, weight) = pair.split_once(':').unwrap_or((pair, "1"));
            let weight: f64 = weight
                .trim()
                .parse()
                .with_context(|| format!("invalid weight in variant {pair:?}"))?;
            Ok(Variant::new(id.trim(), id.trim(), weight))
        })
        .collect()
}

fn parse_rates(raw: &str) -> anyhow::Result<Vec<f64>> {
    let rates = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|r| r.parse::<f64>().with_context(|| format!("invalid rate {r:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if rates.is_empty() {
        bail!("at least one arm rate is required");
    }
    if let Some(bad) = rates.iter().find(|r| !(0.0..=1.0).contains(*r)) {
        bail!("arm rate {bad} is outside [0, 1]");
    }
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let variants = parse_variants("control:3, b:1,c").unwrap();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].id, "control");
        assert_eq!(variants[0].weight, 3.0);
        assert_eq!(variants[2].weight, 1.0);
        assert!(parse_variants("a:heavy").is_err());
    }

    #[test]
    fn test_parse_rates() {
        assert_eq!(parse_rates("0.4, 0.1").unwrap(), vec![0.4, 0.1]);
        assert!(parse_rates("").is_err());
        assert!(parse_rates("1.5").is_err());
        assert!(parse_rates("x").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "experiment-engine",
            "simulate",
            "--algorithm",
            "ucb1",
            "--rounds",
            "50",
        ])
        .unwrap();
        match cli.command {
            Command::Simulate { algorithm, rounds, .. } => {
                assert_eq!(algorithm, "ucb1");
                assert_eq!(rounds, Some(50));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
