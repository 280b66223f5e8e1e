use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use clickstats::analytics::{
    aggregate_clicks, classify_referrer, normalize_rate, time_series_at, QueryWindow,
    RollupService,
};
use clickstats::config::Config;
use clickstats::storage::{self, ClickQuery, ClickScope};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "clickstats-admin")]
#[command(about = "Clickstats analytics management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print summary metrics for a link or workspace
    Stats {
        /// Link ID (or workspace ID with --workspace)
        id: String,
        /// Treat the ID as a workspace
        #[arg(long)]
        workspace: bool,
        /// Lookback window in days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print the click time series for a link
    Timeseries {
        link_id: String,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Run a single rollup pass now
    Rollup,
    /// Classify a referrer URL
    Classify {
        referrer: String,
        /// Destination URL to read UTM parameters from
        #[arg(long)]
        destination: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Classification needs no database
    if let Commands::Classify {
        referrer,
        destination,
    } = &cli.command
    {
        let parsed = classify_referrer(Some(referrer), destination.as_deref());
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    let config = Config::from_env()?;
    let storage = storage::connect(&config.database).await?;
    storage.init().await?;

    match cli.command {
        Commands::Stats {
            id,
            workspace,
            days,
        } => {
            let now = Utc::now();
            let window = QueryWindow::resolve(days, &config.analytics, now);
            let scope = if workspace {
                ClickScope::Workspace(id.clone())
            } else {
                ClickScope::Link(id.clone())
            };
            let events = storage
                .fetch_clicks(&ClickQuery {
                    scope,
                    since: window.start,
                    until: window.end,
                    limit: window.limit,
                })
                .await?;

            let metrics = aggregate_clicks(&events);
            let rate = normalize_rate(metrics.total_clicks, window.start, window.end);

            println!("Clicks for '{}' over the last {} days", id, window.days);
            if window.is_truncated(events.len()) {
                println!("⚠ Row cap of {} reached, results are partial", window.limit);
            }
            println!("{}", "-".repeat(60));
            println!("{:<20} {}", "Total clicks", metrics.total_clicks);
            println!("{:<20} {}", "Unique visitors", metrics.unique_clicks);
            println!("{:<20} {:.2} {}", "Rate", rate.rate, rate.period);
            println!(
                "{:<20} mobile {} / desktop {} / tablet {}",
                "Devices",
                metrics.device_breakdown.mobile,
                metrics.device_breakdown.desktop,
                metrics.device_breakdown.tablet
            );

            println!("\nTop referrers:");
            for entry in &metrics.top_referrers {
                println!("  {:<50} {}", entry.value, entry.count);
            }
            println!("\nTop countries:");
            for entry in &metrics.top_countries {
                println!("  {:<50} {}", entry.value, entry.count);
            }
        }
        Commands::Timeseries { link_id, days } => {
            let now = Utc::now();
            let window = QueryWindow::resolve(days, &config.analytics, now);
            let events = storage
                .fetch_clicks(&ClickQuery {
                    scope: ClickScope::Link(link_id),
                    since: window.start,
                    until: window.end,
                    limit: window.limit,
                })
                .await?;

            let series = time_series_at(&events, window.days, now);
            if series.is_empty() {
                println!("No clicks in the last {} days.", window.days);
            } else {
                println!("{:<20} {:>10} {:>10}", "Bucket", "Clicks", "Unique");
                for point in series {
                    println!(
                        "{:<20} {:>10} {:>10}",
                        point.timestamp, point.clicks, point.unique_clicks
                    );
                }
            }
        }
        Commands::Rollup => {
            let service = RollupService::new(Arc::clone(&storage), &config.rollup, &config.analytics);
            let report = service.run_once(Utc::now()).await?;
            println!(
                "✓ Rolled up {} links ({} rows written, {} truncated)",
                report.links, report.rows_written, report.truncated_links
            );
        }
        Commands::Classify { .. } => {}
    }

    Ok(())
}
