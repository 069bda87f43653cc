//! Terminal earnings dashboard. Reads the billing ledger and prints a
//! snapshot of revenue, per-client totals, and recent transactions.

use chrono::{Datelike, Duration, Utc};

use outcome_desk::config::Config;
use outcome_desk::error::DeskError;
use outcome_desk::tools::billing::BillingSystem;

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Err(e) = run() {
        eprintln!("dashboard error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), DeskError> {
    let config = Config::from_env();
    let billing = BillingSystem::new(&config)?;

    let today = Utc::now().date_naive();
    let all_time = billing.all_time_total()?;
    let daily = billing.daily_total(today)?;
    let monthly = billing.monthly_total(today.year(), today.month())?;

    // Average over the trailing week drives the projections.
    let mut week = 0.0;
    for offset in 0..7 {
        week += billing.daily_total(today - Duration::days(offset))?;
    }
    let daily_avg = week / 7.0;

    let completed = billing.completed_records()?;
    let avg_time_ms = if completed.is_empty() {
        0.0
    } else {
        completed.iter().map(|r| r.execution_time_ms).sum::<f64>() / completed.len() as f64
    };

    println!("==============================================");
    println!("  OUTCOME DESK - EARNINGS");
    println!("==============================================");
    println!("  Today:          ${daily:>10.2}");
    println!("  This month:     ${monthly:>10.2}");
    println!("  All time:       ${all_time:>10.2}");
    println!("  Fixes total:    {:>11}", completed.len());
    println!("  Avg fix time:   {avg_time_ms:>9.0} ms");
    println!("----------------------------------------------");
    println!("  PROJECTIONS (trailing 7-day average)");
    println!("  Per day:        ${daily_avg:>10.2}");
    println!("  Per month:      ${:>10.2}", daily_avg * 30.0);
    println!("  Per year:       ${:>10.2}", daily_avg * 365.0);
    println!("----------------------------------------------");
    println!("  RECENT TRANSACTIONS");

    let recent = billing.recent_records(10)?;
    if recent.is_empty() {
        println!("  (none yet)");
    } else {
        for record in recent.iter().rev() {
            println!(
                "  {}  {:<18} {:<12} ${:>7.2}  {}",
                record.timestamp,
                record.company_name,
                record.fix_type,
                record.amount_usd,
                record.status
            );
        }
    }
    println!("==============================================");
    Ok(())
}
