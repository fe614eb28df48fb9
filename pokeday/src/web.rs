//! HTTP API for the day-of-year service
//!
//! - `GET /` status
//! - `GET /docs` endpoint list
//! - `GET /today` today's entry

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::dataset::Dataset;
use crate::day_key::{self, TodayEntry};
use crate::error::Result;

/// Source of the current instant; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub timezone: Tz,
    pub clock: Clock,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    message: &'static str,
    docs: &'static str,
    pokemon_endpoint: &'static str,
}

/// GET /
async fn root_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Pokémon of the Day API is running!",
        docs: "/docs",
        pokemon_endpoint: "/today",
    })
}

#[derive(Debug, Serialize)]
struct EndpointDoc {
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

const ENDPOINTS: &[EndpointDoc] = &[
    EndpointDoc {
        method: "GET",
        path: "/",
        description: "Service status",
    },
    EndpointDoc {
        method: "GET",
        path: "/docs",
        description: "This endpoint list",
    },
    EndpointDoc {
        method: "GET",
        path: "/today",
        description: "Entry for the current local day: {day_of_year, name, color, types, ...}. \
                      503 if the dataset is not loaded, 404 if the day has no entry",
    },
];

/// GET /docs
async fn docs_handler() -> Json<&'static [EndpointDoc]> {
    Json(ENDPOINTS)
}

/// GET /today
async fn today_handler(State(state): State<AppState>) -> Result<Json<TodayEntry>> {
    let now = (state.clock)();
    Ok(Json(day_key::today(&state.dataset, now, state.timezone)?))
}

/// Build the web server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/docs", get(docs_handler))
        .route("/today", get(today_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Pokémon of the day listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await
}
