use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remon_core::{resolve_identifier, FetchOutcome, ListingKey};
use remon_storage::{HttpFetcher, SqliteListingStore};
use remon_sync::{
    estimate_batch_duration, maybe_build_scheduler, BatchRow, MonitorConfig, RefreshOrchestrator,
    RefreshReport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "remon")]
#[command(about = "Track real-estate listings and their status changes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Track a listing by URL or MLS / ZPID number.
    Add {
        input: String,
        /// Only record the listing; do not fetch it now.
        #[arg(long)]
        no_refresh: bool,
    },
    /// Stop tracking listings and discard their history.
    Remove {
        #[arg(required = true)]
        listings: Vec<String>,
    },
    /// Stop tracking every listing. Settings are kept.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Show tracked listings with their current snapshot (default).
    List,
    /// Refresh one listing.
    Refresh { listing: String },
    /// Refresh every tracked listing, one at a time.
    RefreshAll,
    /// Show the status change history of a listing.
    History { listing: String },
    /// Show or change auto-refresh settings.
    Settings {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=30))]
        interval_days: Option<u32>,
    },
    /// Run the auto-refresh scheduler until interrupted.
    Watch,
}

fn parse_listing_key(raw: &str) -> Result<ListingKey> {
    if let Ok(key) = ListingKey::from_str(raw) {
        return Ok(key);
    }
    Ok(resolve_identifier(raw)?.key())
}

fn format_price(price: u64) -> String {
    let digits = price.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("${out}")
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 60, secs % 60) {
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m {s}s"),
    }
}

fn print_report(report: &RefreshReport) {
    let key = report.listing.key();
    match &report.outcome {
        FetchOutcome::Success(snapshot) => {
            let price = snapshot.price.map(format_price).unwrap_or_else(|| "-".into());
            println!("{key}: {} {price}", snapshot.status);
        }
        FetchOutcome::TransportFailure(failure) => println!("{key}: fetch failed ({})", failure.kind),
        FetchOutcome::ExtractionFailure(failure) => println!("{key}: {}", failure.kind),
    }
    if let Some(event) = &report.transition {
        println!("  status changed: {} -> {}", event.from_status, event.to_status);
    }
    if let Some(note) = &report.note {
        println!("  note: {note}");
    }
}

async fn build_orchestrator(config: &MonitorConfig) -> Result<Arc<RefreshOrchestrator>> {
    let store = SqliteListingStore::connect(&config.database_url).await?;
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    Ok(Arc::new(RefreshOrchestrator::from_config(
        config,
        Arc::new(store),
        Arc::new(fetcher),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::from_env();
    let orchestrator = build_orchestrator(&config).await?;

    match cli.command.unwrap_or(Commands::List) {
        Commands::Add { input, no_refresh } => {
            let added = orchestrator.resolve_and_add(&input).await?;
            let key = added.listing.key();
            if added.already_tracked {
                println!("{key} is already tracked ({})", added.listing.canonical_url);
                return Ok(());
            }
            println!("tracking {key} ({})", added.listing.canonical_url);
            if !no_refresh {
                print_report(&orchestrator.refresh_one(&key).await?);
            }
        }
        Commands::Remove { listings } => {
            let keys = listings
                .iter()
                .map(|raw| parse_listing_key(raw))
                .collect::<Result<Vec<_>>>()?;
            for key in keys {
                if orchestrator.remove(&key).await? {
                    println!("removed {key}");
                } else {
                    println!("{key} was not tracked");
                }
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                let count = orchestrator.overview().await?.len();
                println!("this removes {count} listing(s) and all history; rerun with --yes");
                return Ok(());
            }
            let removed = orchestrator.clear_all().await?;
            println!("removed {removed} listing(s)");
        }
        Commands::List => {
            let rows = orchestrator.overview().await?;
            if rows.is_empty() {
                println!("no listings tracked; add one with `remon add <url or MLS#>`");
            }
            for row in rows {
                let key = row.listing.key();
                let status = row
                    .known_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "Unknown".into());
                match row.snapshot {
                    Some(snapshot) => println!(
                        "{key}\t{status}\t{}\t{}\tchecked {}",
                        snapshot.price.map(format_price).unwrap_or_else(|| "-".into()),
                        snapshot.address.as_deref().unwrap_or("-"),
                        snapshot.fetched_at.format("%Y-%m-%d %H:%M UTC"),
                    ),
                    None => println!("{key}\t{status}\t(never refreshed)\t{}", row.listing.canonical_url),
                }
            }
        }
        Commands::Refresh { listing } => {
            let key = parse_listing_key(&listing)?;
            print_report(&orchestrator.refresh_one(&key).await?);
        }
        Commands::RefreshAll => {
            let count = orchestrator.overview().await?.len();
            let estimate = estimate_batch_duration(count, orchestrator.policy());
            println!(
                "refreshing {count} listing(s) one at a time; this takes about {}",
                format_duration(estimate)
            );
            let policy = *orchestrator.policy();
            let batch = orchestrator.refresh_all(&policy).await?;
            for row in &batch.rows {
                match row {
                    BatchRow::Refreshed(report) => print_report(report),
                    BatchRow::Failed { listing, error } => {
                        println!("{}: could not record refresh ({error})", listing.key())
                    }
                }
            }
            for listing in &batch.skipped {
                println!("{}: skipped, batch time budget exhausted", listing.key());
            }
            println!(
                "run {}: {} of {} refreshed, {} status change(s)",
                batch.run_id,
                batch.succeeded(),
                batch.rows.len() + batch.skipped.len(),
                batch.transitions().count()
            );
        }
        Commands::History { listing } => {
            let key = parse_listing_key(&listing)?;
            let events = orchestrator.history(&key).await?;
            if events.is_empty() {
                println!("no status changes recorded for {key}");
            }
            for event in events {
                println!(
                    "{}\t{} -> {}",
                    event.observed_at.format("%Y-%m-%d %H:%M UTC"),
                    event.from_status,
                    event.to_status
                );
            }
        }
        Commands::Settings {
            enable,
            disable,
            interval_days,
        } => {
            let current = orchestrator.auto_refresh_settings().await?;
            if enable || disable || interval_days.is_some() {
                let enabled = if enable { true } else if disable { false } else { current.enabled };
                orchestrator
                    .set_auto_refresh_settings(enabled, interval_days.unwrap_or(current.interval_days))
                    .await?;
            }
            let settings = orchestrator.auto_refresh_settings().await?;
            println!("auto-refresh: {}", if settings.enabled { "on" } else { "off" });
            println!("interval: every {} day(s)", settings.interval_days);
            match settings.last_refresh {
                Some(ts) => println!("last refresh: {}", ts.format("%Y-%m-%d %H:%M UTC")),
                None => println!("last refresh: never"),
            }
        }
        Commands::Watch => {
            let Some(sched) = maybe_build_scheduler(orchestrator.clone(), &config.scheduler_cron).await?
            else {
                println!("auto-refresh is off; enable it with `remon settings --enable`");
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!(cron = %config.scheduler_cron, "watching for due refreshes");
            if let Some(batch) = orchestrator.refresh_all_if_due().await? {
                tracing::info!(run_id = %batch.run_id, "startup refresh finished");
            }
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remon_core::SourceSite;

    #[test]
    fn listing_keys_accept_keys_and_identifiers() {
        let key = parse_listing_key("zillow:12345678").unwrap();
        assert_eq!(key, ListingKey::new(SourceSite::Zillow, "12345678"));
        let key = parse_listing_key("MLS 1987654").unwrap();
        assert_eq!(key, ListingKey::new(SourceSite::UtahRealEstate, "1987654"));
        assert!(parse_listing_key("not a listing").is_err());
    }

    #[test]
    fn remove_takes_several_listings_and_interval_is_bounded() {
        let cli = Cli::try_parse_from(["remon", "remove", "1987654", "zillow:12345678"]).unwrap();
        match cli.command {
            Some(Commands::Remove { listings }) => assert_eq!(listings.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["remon", "remove"]).is_err());
        assert!(Cli::try_parse_from(["remon", "settings", "--interval-days", "31"]).is_err());
        assert!(Cli::try_parse_from(["remon", "settings", "--interval-days", "0"]).is_err());
        assert!(Cli::try_parse_from(["remon", "settings", "--interval-days", "30"]).is_ok());
    }

    #[test]
    fn prices_and_durations_are_human_readable() {
        assert_eq!(format_price(1_149_900), "$1,149,900");
        assert_eq!(format_price(950), "$950");
        assert_eq!(format_duration(Duration::from_secs(40)), "40s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
