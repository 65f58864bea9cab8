use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use limitgate::config::LimitgateConfig;
use limitgate::grpc::RemoteLimiter;
use limitgate::ratelimit::{retry_after_secs, Evaluator, FacadeReporter, RuleEvaluator};

/// Inspect and exercise rate limit rules against the quota service.
#[derive(Debug, Parser)]
#[command(name = "limitgate", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "LIMITGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and list rules and guards
    Validate,
    /// Query the quota service health
    Health,
    /// Charge hits against a rule for one entity and print the decision
    Check {
        /// Rule name
        #[arg(long)]
        rule: String,
        /// Entity key
        #[arg(long)]
        key: String,
        /// Hits to charge
        #[arg(long, default_value_t = 1)]
        hits: i64,
        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => LimitgateConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LimitgateConfig::default(),
    };
    info!(address = %config.remote.address, rules = config.rules.len(), "Configuration loaded");

    match cli.command {
        Command::Validate => {
            for rule in &config.rules {
                println!(
                    "rule  {:<24} limit={} window={:?} algorithm={} behavior={}",
                    rule.name(),
                    rule.limit(),
                    rule.window(),
                    rule.algorithm(),
                    rule.behavior()
                );
            }
            for (name, guard) in &config.guards {
                println!(
                    "guard {:<24} rule={} key={:?} hit_value={} retry_hint={} fail_open={}",
                    name, guard.rule, guard.key, guard.hit_value, guard.retry_hint, guard.fail_open
                );
            }
        }
        Command::Health => {
            let limiter = RemoteLimiter::connect_lazy(&config.remote)?;
            let health = limiter.health_check().await?;
            println!(
                "status={} peers={} {}",
                health.status, health.peer_count, health.message
            );
        }
        Command::Check {
            rule,
            key,
            hits,
            json,
        } => {
            let rule = config
                .rule(&rule)
                .cloned()
                .with_context(|| format!("unknown rule: {}", rule))?;
            let limiter = RemoteLimiter::connect_lazy(&config.remote)?;
            let evaluator = RuleEvaluator::new(limiter, Arc::new(rule), key)?
                .with_reporter(Arc::new(FacadeReporter));

            let decision = evaluator.evaluate_with_wait_time(hits).await?;

            if json {
                let output = serde_json::json!({
                    "rule": evaluator.rule().name(),
                    "key": evaluator.key(),
                    "hits": hits,
                    "allowed": decision.allowed,
                    "wait_ms": decision.wait_time.as_millis() as u64,
                    "retry_after": retry_after_secs(decision.wait_time),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if decision.allowed {
                println!("allowed");
            } else {
                println!(
                    "over limit, retry after {:?} (Retry-After: {})",
                    decision.wait_time,
                    retry_after_secs(decision.wait_time)
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
