use chrono_tz::Tz;
use clap::Parser;
use pokeday::web::{self, AppState};
use pokeday::Dataset;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "pokeday")]
#[command(about = "Serve the Pokémon of the day from a static 365-day table")]
struct Args {
    /// Path to the day table (JSON object keyed "1".."365")
    #[arg(long, env = "DATASET_PATH", default_value = "data_gen/pokemon_cleaned.json")]
    dataset: PathBuf,

    /// IANA timezone that decides when the day rolls over
    #[arg(long, env = "LOCAL_TIMEZONE", default_value = "America/Monterrey")]
    timezone: String,

    /// Port for the HTTP server
    #[arg(short, long, env = "PORT", default_value = "8001")]
    port: u16,
}

/// Reload the dataset on SIGHUP
#[cfg(unix)]
fn spawn_reload_listener(dataset: Arc<Dataset>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Cannot listen for SIGHUP, reload disabled: {}", e);
                return;
            }
        };
        while hangups.recv().await.is_some() {
            log::info!("SIGHUP received, reloading '{}'", dataset.path().display());
            // Errors are logged inside reload
            let _ = dataset.reload();
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_dataset: Arc<Dataset>) {}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let timezone: Tz = match args.timezone.parse() {
        Ok(tz) => tz,
        Err(e) => {
            log::error!("Invalid timezone {:?}: {}", args.timezone, e);
            std::process::exit(1);
        }
    };

    log::info!("Dataset: {}", args.dataset.display());
    log::info!("Timezone: {}", timezone);

    let dataset = Arc::new(Dataset::load(&args.dataset));
    spawn_reload_listener(Arc::clone(&dataset));

    let state = AppState {
        dataset,
        timezone,
        clock: web::system_clock(),
    };

    if let Err(e) = web::serve(web::create_router(state), args.port).await {
        log::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
