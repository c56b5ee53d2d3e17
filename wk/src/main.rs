//! walker - step engine CLI
//!
//! Inspection and budget tooling around the engine: cumulative budget gate,
//! routing lookups, effective configuration and the cost ledger.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use costledger::{CostLedger, CostRecord, check_cumulative_budget};
use walker::cli::{Cli, Command, LedgerCommand};
use walker::config::Config;
use walker::router::{ActionCategory, ModelRouter};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("walker")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("walker.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(ledger) = &cli.ledger {
        config.ledger.path = ledger.clone();
    }
    info!("walker loaded config: ledger={}", config.ledger.path.display());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Budget { per_day, per_month } => cmd_budget(&config, per_day, per_month),
        Command::Route { category, escalated } => cmd_route(&config, &category, escalated),
        Command::Config { check } => cmd_config(&config, check),
        Command::Ledger { command } => cmd_ledger(&config, command),
    }
}

fn cmd_budget(config: &Config, per_day: Option<f64>, per_month: Option<f64>) -> Result<()> {
    debug!(?per_day, ?per_month, "cmd_budget: called");
    let status = check_cumulative_budget(
        &config.ledger.path,
        per_day.unwrap_or(config.budget.per_day_usd),
        per_month.unwrap_or(config.budget.per_month_usd),
    )
    .context("Failed to check cumulative budget")?;

    println!("Daily:   ${:.2} / ${:.2}", status.daily_spent, status.daily_limit);
    println!("Monthly: ${:.2} / ${:.2}", status.monthly_spent, status.monthly_limit);
    if let Some(reason) = status.refusal_reason() {
        println!("{} {}", "✗".red(), reason);
        std::process::exit(2);
    }
    println!("{} Within budget", "✓".green());
    Ok(())
}

fn cmd_route(config: &Config, category: &str, escalated: bool) -> Result<()> {
    debug!(%category, escalated, "cmd_route: called");
    let category: ActionCategory = category.parse().map_err(|e: String| eyre!(e))?;
    let router = ModelRouter::new(config.routing.table.clone());
    let tier = router.route(category, u8::from(escalated));
    let model = config
        .pricing
        .models
        .get(&tier)
        .map(String::as_str)
        .unwrap_or("unknown model");
    println!("{} -> {} ({})", category, tier.to_string().cyan(), model);
    Ok(())
}

fn cmd_config(config: &Config, check: bool) -> Result<()> {
    debug!(check, "cmd_config: called");
    config.validate()?;
    if check {
        println!("{} Configuration valid", "✓".green());
    } else {
        print!("{}", serde_yaml::to_string(config).context("Failed to render configuration")?);
    }
    Ok(())
}

fn cmd_ledger(config: &Config, command: LedgerCommand) -> Result<()> {
    debug!(?command, "cmd_ledger: called");
    let ledger = CostLedger::open(&config.ledger.path).context("Failed to open ledger")?;

    match command {
        LedgerCommand::Verify => {
            let verification = ledger.verify_chain()?;
            match verification.first_mismatch {
                None => println!(
                    "{} Chain intact ({} records)",
                    "✓".green(),
                    verification.records_checked
                ),
                Some(mismatch) => {
                    println!(
                        "{} Chain broken at record {}: {}",
                        "✗".red(),
                        mismatch.index,
                        mismatch.reason
                    );
                    std::process::exit(1);
                }
            }
        }
        LedgerCommand::List => {
            let records = ledger.records()?;
            if records.is_empty() {
                println!("No records found");
            }
            for r in records {
                println!(
                    "{} {} {} {} ${:.6}",
                    r.timestamp.to_rfc3339().dimmed(),
                    r.run_id.cyan(),
                    r.product,
                    r.level,
                    r.cost_usd
                );
            }
        }
        LedgerCommand::Record {
            run_id,
            cost_usd,
            product,
            level,
        } => {
            let product = product.unwrap_or_else(|| config.ledger.product.clone());
            let level = level.unwrap_or_else(|| config.ledger.level.clone());
            let record = ledger.append(CostRecord::new(run_id, product, level, cost_usd))?;
            println!("{} Recorded {} (${:.6})", "✓".green(), record.run_id.cyan(), record.cost_usd);
        }
    }
    Ok(())
}
