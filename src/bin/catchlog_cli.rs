use catchlog_rs::cache::CacheStore;
use catchlog_rs::client::{CaptureOutcome, CatchLogClient};
use catchlog_rs::config::AppConfig;
use catchlog_rs::models::{CatchInput, Location};
use catchlog_rs::record_store::LocalRecordStore;
use catchlog_rs::storage::NativeDbStorage;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: log_catch, pending, sync, full_sync, status, purge_cache, monitor
    #[arg(short, long)]
    command: String,

    /// Species name (for log_catch)
    #[arg(long)]
    species: Option<String>,

    /// Latitude of the catch, or of the user for full_sync
    #[arg(long)]
    latitude: Option<f64>,

    /// Longitude of the catch, or of the user for full_sync
    #[arg(long)]
    longitude: Option<f64>,

    /// GPS accuracy in metres
    #[arg(long)]
    accuracy: Option<f64>,

    #[arg(long)]
    weight: Option<f64>,

    #[arg(long)]
    length: Option<f64>,

    #[arg(long)]
    bait: Option<String>,

    #[arg(long)]
    technique: Option<String>,

    #[arg(long)]
    notes: Option<String>,

    /// Photo file to copy into the photo vault (for log_catch)
    #[arg(long, name = "photo_path")]
    photo_path: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

// example usage:
// CATCHLOG_DATABASE_REST_URL=https://xyz.supabase.co SUPABASE_PUBLIC_API_KEY=anon ./target/release/catchlog_cli --command log_catch --species "Brown Trout" --latitude 46.5 --longitude 7.9 --length 41
// ./target/release/catchlog_cli --command pending
// ./target/release/catchlog_cli --command sync
// ./target/release/catchlog_cli --command full_sync --latitude 46.5 --longitude 7.9
// ./target/release/catchlog_cli --command monitor --log_level debug

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("catchlog_rs={},catchlog_cli={}", args.log_level, args.log_level))
        .init();

    let config = AppConfig::from_env()?;

    match args.command.as_str() {
        "pending" => {
            let storage = Arc::new(NativeDbStorage::open(config.database_path())?);
            let pending = LocalRecordStore::new(storage).list_pending();
            if let Some(warning) = &pending.warning {
                warn!("{}", warning);
            }
            println!("{}", serde_json::to_string_pretty(&pending.catches)?);
        }
        "purge_cache" => {
            let storage = Arc::new(NativeDbStorage::open(config.database_path())?);
            let purged = CacheStore::new(storage).purge_expired()?;
            println!("Purged {} expired cache entries", purged);
        }
        "log_catch" => {
            let species = match args.species.clone() {
                Some(species) => species,
                None => {
                    error!("--species is required for log_catch");
                    std::process::exit(1);
                }
            };
            let location = require_location(&args);

            let client = CatchLogClient::from_config(&config)?;
            let state = client.probe().await;
            info!("Connectivity: {:?}", state);

            let mut input = CatchInput::new(species, location);
            if let Some(weight) = args.weight {
                input = input.with_weight(weight);
            }
            if let Some(length) = args.length {
                input = input.with_length(length);
            }
            if let Some(bait) = args.bait.clone() {
                input = input.with_bait(bait);
            }
            if let Some(technique) = args.technique.clone() {
                input = input.with_technique(technique);
            }
            if let Some(notes) = args.notes.clone() {
                input = input.with_notes(notes);
            }
            if let Some(report) = client.cached_weather(&location).hit() {
                input = input.with_weather(report.snapshot());
            }
            if let Some(photo_path) = &args.photo_path {
                let tag = format!("catch_{}", chrono::Utc::now().timestamp_millis());
                input = input.with_photo(client.save_photo(photo_path, &tag).await?);
            }

            match client.record_catch(input).await? {
                CaptureOutcome::Uploaded => println!("Catch uploaded"),
                CaptureOutcome::SavedLocally { id_local, message } => {
                    println!("Catch {} {}", id_local, message)
                }
            }
        }
        "sync" => {
            let client = CatchLogClient::from_config(&config)?;
            let result = client.sync_now().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        "full_sync" => {
            let client = CatchLogClient::from_config(&config)?;
            let location = optional_location(&args);
            let result = client.full_sync(location).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        "status" => {
            let client = CatchLogClient::from_config(&config)?;
            client.probe().await;
            let status = client.status();
            println!("Connectivity:   {:?}", status.connectivity);
            println!("Pending (live): {}", status.pending_count);
            println!("Queued:         {}", status.queued_count);
            println!(
                "Species cache:  {}",
                if client.cached_species().is_hit() { "fresh" } else { "missing or stale" }
            );
        }
        "monitor" => {
            let client = CatchLogClient::from_config(&config)?;
            let mut state_rx = client.monitor().subscribe();
            let runtime = client.start().await?;
            info!("Monitoring connectivity, press Ctrl-C to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *state_rx.borrow_and_update();
                        info!("Connectivity now {:?}, {} pending", state, client.monitor().pending_count());
                    }
                }
            }

            runtime.shutdown().await;
            let status = client.status();
            if let Some(result) = status.last_result {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn optional_location(args: &Args) -> Option<Location> {
    match (args.latitude, args.longitude) {
        (Some(latitude), Some(longitude)) => {
            let location = Location::new(latitude, longitude);
            Some(match args.accuracy {
                Some(accuracy) => location.with_accuracy(accuracy),
                None => location,
            })
        }
        _ => None,
    }
}

fn require_location(args: &Args) -> Location {
    match optional_location(args) {
        Some(location) => location,
        None => {
            error!("--latitude and --longitude are required for this command");
            std::process::exit(1);
        }
    }
}
