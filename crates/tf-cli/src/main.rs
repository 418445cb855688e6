use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tf_config::TelefuseConfig;
use tf_core::EvalError;
use tf_core::eval::Evaluator;
use tf_core::rule::GlobalRule;
use tf_runtime::lifecycle::{Engine, wait_for_signal};
use tf_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "telefuse", about = "Telefuse telemetry aggregation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Run {
        /// Path to telefuse.toml config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a config file, including every synthetic expression and rule
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Evaluate one expression against literal variable values
    Eval {
        expression: String,
        /// Variable binding, `name=value`; repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, f64)>,
    },
    /// List the built-in functions
    Functions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config_path = config
                .canonicalize()
                .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
            let telefuse_config = TelefuseConfig::load(&config_path)?;
            let base_dir = config_path
                .parent()
                .expect("config path must have a parent directory");

            let _guard = init_tracing(&telefuse_config.logging, base_dir)?;

            let engine = Engine::start(telefuse_config, base_dir)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(domain = "sys", listen = %engine.listen_addr(), "Telefuse engine started");

            wait_for_signal(engine.cancel_token()).await;
            engine.shutdown();
            engine.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Commands::Check { config } => {
            let telefuse_config = TelefuseConfig::load(&config)?;
            check(&telefuse_config)?;
            println!(
                "{}: ok ({} devices, {} synthetics, {} rules)",
                config.display(),
                telefuse_config.devices.len(),
                telefuse_config.synthetics.len(),
                telefuse_config.rules.len()
            );
        }
        Commands::Eval { expression, vars } => {
            let vars: BTreeMap<String, f64> = vars.into_iter().collect();
            let value = Evaluator::new().evaluate(&expression, &vars, None)?;
            println!("{value}");
        }
        Commands::Functions => {
            for f in Evaluator::new().functions() {
                let windowed = if f.is_windowed() { "  (windowed)" } else { "" };
                println!("{:<16} {:<12} {:>3}{windowed}", f.name, f.category.to_string(), f.arity.to_string());
            }
        }
    }

    Ok(())
}

/// Checks that need the evaluator: function names and arity in every
/// synthetic expression, and every rule's selector, function and operator.
fn check(config: &TelefuseConfig) -> Result<()> {
    let evaluator = Evaluator::new();
    for s in &config.synthetics {
        let expr = tf_lang::parse_expr(&s.expression).map_err(EvalError::from)?;
        evaluator
            .validate(&expr)
            .map_err(|e| anyhow::anyhow!("synthetic {:?}: {e}", s.name))?;
    }
    for r in &config.rules {
        GlobalRule::from_config(r).map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(())
}

fn parse_var(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("{name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}
