use anyhow::Context;
use chrono::{Datelike, Days, NaiveDate, Utc};
use clap::Parser;

use coursepay::{config::Settings, service::ServiceContext};

/// Calculates instructor payouts for a period and disburses the ones
/// cleared for automatic payout.
#[derive(Debug, Parser)]
#[command(name = "payout-batch", version)]
struct Cli {
    /// First day of the period (defaults to the first day of last month)
    #[arg(long)]
    period_start: Option<NaiveDate>,

    /// Last day of the period, inclusive (defaults to the last day of last month)
    #[arg(long)]
    period_end: Option<NaiveDate>,

    /// Only create payout records; leave them pending
    #[arg(long)]
    no_disburse: bool,
}

fn previous_month(today: NaiveDate) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let end = today
        .with_day(1)
        .and_then(|first| first.checked_sub_days(Days::new(1)))
        .context("cannot compute last month")?;
    let start = end.with_day(1).context("cannot compute last month")?;
    Ok((start, end))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "coursepay=info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let (default_start, default_end) = previous_month(Utc::now().date_naive())?;
    let period_start = cli.period_start.unwrap_or(default_start);
    let period_end = cli.period_end.unwrap_or(default_end);

    let settings = Settings::new()?;
    let context = ServiceContext::from_settings(&settings).await?;

    tracing::info!("Running payout batch for {} to {}", period_start, period_end);
    let summary = context
        .payout_service
        .run_batch(period_start, period_end, !cli.no_disburse)
        .await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.failed.is_empty() {
        tracing::warn!("{} payouts failed", summary.failed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_month_spans_whole_month() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let (start, end) = previous_month(today).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn previous_month_wraps_the_year() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let (start, end) = previous_month(today).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }
}
