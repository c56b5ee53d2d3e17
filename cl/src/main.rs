use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use costledger::cli::{Cli, Command};
use costledger::config::Config;
use costledger::{CostLedger, CostRecord};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let ledger_path = cli.ledger.clone().unwrap_or(config.ledger_path.clone());

    info!("costledger starting: {}", ledger_path.display());
    let ledger = CostLedger::open(&ledger_path).context("Failed to open ledger")?;

    match cli.command {
        Command::Append {
            run_id,
            cost_usd,
            product,
            level,
        } => {
            let record = ledger.append(CostRecord::new(run_id, product, level, cost_usd))?;
            println!("{} Appended {} (${:.6}) {}", "✓".green(), record.run_id.cyan(), record.cost_usd, record.hash.dimmed());
        }
        Command::List => {
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
        Command::Sum { from, to } => {
            let total = ledger.sum_for_period(from, to)?;
            println!("{:.6}", total);
        }
        Command::Check { per_day, per_month } => {
            let status = ledger.check_cumulative_budget(
                per_day.unwrap_or(config.per_day_usd),
                per_month.unwrap_or(config.per_month_usd),
            )?;
            println!("Daily:   ${:.2} / ${:.2}", status.daily_spent, status.daily_limit);
            println!("Monthly: ${:.2} / ${:.2}", status.monthly_spent, status.monthly_limit);
            if let Some(reason) = status.refusal_reason() {
                println!("{} {}", "✗".red(), reason);
                std::process::exit(2);
            }
            println!("{} Within budget", "✓".green());
        }
        Command::Verify => {
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
    }

    Ok(())
}
