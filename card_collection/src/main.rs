//! Card Collection - HTTP service
//!
//! Serves `/analyze`, `/delete_card` and `/cards` on top of a SQLite store.

use card_collection::classifier::{DEFAULT_CLASSIFIER_URL, DEFAULT_MODEL};
use card_collection::pricing::DEFAULT_PRICE_API_URL;
use card_collection::{web, CollectionService, Database, InferenceClassifier, PriceClient};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Card collection server - identifies card photos and tracks ownership
#[derive(Parser, Debug)]
#[command(name = "card_collection")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value_t = default_db_path())]
    database: String,

    /// Port for the HTTP API
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Base URL of the card price API
    #[arg(long, env = "PRICE_API_URL", default_value = DEFAULT_PRICE_API_URL)]
    price_api_url: String,

    /// API key for the card price API
    #[arg(long, env = "PRICE_API_KEY")]
    price_api_key: Option<String>,

    /// Base URL of the inference endpoint hosting the detection model
    #[arg(long, env = "CLASSIFIER_URL", default_value = DEFAULT_CLASSIFIER_URL)]
    classifier_url: String,

    /// Detection model identifier
    #[arg(long, env = "CLASSIFIER_MODEL", default_value = DEFAULT_MODEL)]
    classifier_model: String,

    /// Bearer token for the inference endpoint
    #[arg(long, env = "CLASSIFIER_TOKEN")]
    classifier_token: Option<String>,

    /// Timeout for outbound HTTP calls in seconds (0 = wait indefinitely)
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 0)]
    http_timeout_secs: u64,

    /// How long a writer waits for the database lock, in milliseconds
    #[arg(long, env = "DB_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    db_busy_timeout_ms: u64,

    /// Maximum accepted upload size in MiB
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 10)]
    max_upload_mb: usize,
}

/// Returns the default database path: ~/.local/share/card_collection/collection.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("card_collection")
        .join("collection.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = PathBuf::from(&args.database);

    log::info!("Starting card_collection...");
    log::info!("Database path: {}", db_path.display());

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    let db = match Database::open(&db_path, Duration::from_millis(args.db_busy_timeout_ms)) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = match args.http_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let prices = match PriceClient::new(&args.price_api_url, args.price_api_key.clone(), timeout) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Failed to build price client: {}", e);
            std::process::exit(1);
        }
    };

    let classifier = match InferenceClassifier::new(
        &args.classifier_url,
        &args.classifier_model,
        args.classifier_token.clone(),
        timeout,
    ) {
        Ok(classifier) => classifier,
        Err(e) => {
            log::error!("Failed to build classifier client: {}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "Classifier: {}/{}",
        classifier.endpoint,
        classifier.model
    );

    let service = Arc::new(CollectionService::new(db, Arc::new(classifier), prices));
    let router = web::create_router(service, args.max_upload_mb * 1024 * 1024);

    if let Err(e) = web::serve(router, args.port).await {
        log::error!("Web server error: {}", e);
        std::process::exit(1);
    }
}
