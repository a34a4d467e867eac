// Wayfarer travel itinerary engine
// Main entry point for the wayfarer binary

use clap::Parser;
use wayfarer_engine::broker::BrokerOutcome;
use wayfarer_engine::cli::{Cli, Command};
use wayfarer_engine::config::Config;
use wayfarer_engine::service::TravelService;
use wayfarer_engine::store::Database;
use wayfarer_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use wayfarer_engine::workflow::ExecutionState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with config-driven log level
    // (only takes effect if RUST_LOG env var is not set)
    init_telemetry_with_level(&config.core.log_level);

    let db = Database::new(&config.db_path()).await?;
    let service = TravelService::from_config(&config, &db);

    match cli.command {
        Command::Extract { text } => {
            let outcome = service.extract(&text).await?;
            print_outcome(&text, &outcome, cli.json)?;
        }

        Command::Run { text } => {
            let (outcome, report) = service.run_to_completion(&text).await?;
            print_outcome(&text, &outcome, cli.json)?;

            match report.map(|r| r.state) {
                Some(ExecutionState::Succeeded) => {
                    if let Some(record) = service.fetch(&outcome.fingerprint).await? {
                        if let Some(narrative) = record.narrative {
                            println!("\n{narrative}");
                        }
                    }
                }
                Some(ExecutionState::Failed { node, error }) => {
                    println!("\nPipeline failed at {node}: {error}");
                }
                _ => {}
            }
        }

        Command::Status { fingerprint } => match service.fetch(&fingerprint).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("No record for fingerprint {fingerprint}"),
        },

        Command::Gc => {
            let removed = service.gc().await?;
            println!("Removed {removed} expired request records");
        }
    }

    db.close().await?;
    Ok(())
}

/// Print a formatted verdict for one request
fn print_outcome(input: &str, outcome: &BrokerOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.intent)?);
        return Ok(());
    }

    let intent = &outcome.intent;
    let separator = "-".repeat(60);

    println!("{separator}");
    println!("INPUT:       {input}");
    println!("FINGERPRINT: {}", outcome.fingerprint);
    println!(
        "STATUS:      {}{}",
        intent.status.as_str(),
        if outcome.cached { " (cached)" } else { "" }
    );

    if intent.is_ready() {
        let fields = &intent.extracted;
        let dates = fields.travel_dates.clone().unwrap_or_default();
        println!("  Origin      : {}", fields.origin_city.as_deref().unwrap_or("-"));
        println!("  Destination : {}", fields.destination.as_deref().unwrap_or("-"));
        println!("  Departure   : {}", dates.departure.as_deref().unwrap_or("-"));
        println!("  Return      : {}", dates.return_date.as_deref().unwrap_or("-"));
        println!("  Budget (CAD): {}", fields.budget_cad.unwrap_or(0.0));
        println!("  Travellers  : {}", fields.traveller_count.unwrap_or(1));
        if let Some(warning) = &intent.budget_warning {
            println!("  BUDGET WARNING: {warning}");
        }
    } else {
        println!("  Missing     : {}", intent.missing_fields.join(", "));
        if let Some(clarification) = &intent.clarification_needed {
            println!("  Action      : {clarification}");
        }
    }

    if let Some(usage) = &intent.usage {
        println!(
            "  Tokens      : {} in / {} out",
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0)
        );
    }

    Ok(())
}
