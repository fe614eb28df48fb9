//! Reconciliation workflow: classify -> price -> record ownership
//!
//! SQLite calls and image decoding are blocking, so they run on tokio's
//! blocking pool; each storage step gets its own session.

use crate::classifier::{decode_image, CardClassifier};
use crate::database::{self, Database, OwnedCard, OwnershipAction};
use crate::error::{CollectionError, Result};
use crate::pricing::{Price, PriceClient};
use serde::Serialize;
use std::sync::Arc;

/// Response of a successful detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub action: OwnershipAction,
    pub user: String,
    pub card: String,
    pub price: Price,
    pub confidence: f64,
}

/// A user's collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub user: String,
    pub cards: Vec<OwnedCard>,
}

/// The collection service and its three collaborators
pub struct CollectionService {
    db: Database,
    classifier: Arc<dyn CardClassifier>,
    prices: PriceClient,
}

impl CollectionService {
    pub fn new(db: Database, classifier: Arc<dyn CardClassifier>, prices: PriceClient) -> Self {
        Self {
            db,
            classifier,
            prices,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Identify the card in `image`, refresh its price and add it to the
    /// user's collection.
    pub async fn record_detection(&self, external_id: &str, image: &[u8]) -> Result<DetectionOutcome> {
        let external_id = non_blank(external_id, "user_clerk_id")?;

        let bytes = image.to_vec();
        tokio::task::spawn_blocking(move || decode_image(&bytes)).await??;

        // Best guess only: the first detection in model order wins
        let best = self
            .classifier
            .classify(image)
            .await?
            .into_iter()
            .next()
            .ok_or(CollectionError::NoDetection)?;

        log::info!(
            "Detected {:?} ({:.3}) for user {}",
            best.label,
            best.score,
            external_id
        );

        let price = self.prices.lookup_or_default(&best.label).await;

        let db = self.db.clone();
        let user = external_id.to_string();
        let card = best.label.clone();
        let recorded = tokio::task::spawn_blocking(move || {
            let mut conn = db.session()?;
            database::record_detection(&mut conn, &user, &card, price)
        })
        .await??;

        if let Some(previous) = recorded.previous_price {
            if price.is_zero() && !previous.is_zero() {
                log::warn!(
                    "Price of {:?} dropped from {} to 0 (lookup returned nothing usable)",
                    best.label,
                    previous
                );
            }
        }

        Ok(DetectionOutcome {
            action: recorded.action,
            user: external_id.to_string(),
            card: best.label,
            price,
            confidence: best.score,
        })
    }

    /// Remove one card from a user's collection; returns a confirmation message
    pub async fn remove_ownership(&self, external_id: &str, card_name: &str) -> Result<String> {
        let db = self.db.clone();
        let user = external_id.to_string();
        let card = card_name.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = db.session()?;
            database::remove_ownership(&mut conn, &user, &card)
        })
        .await??;

        Ok(format!("Deleted {} from user {}", card_name, external_id))
    }

    /// All cards owned by a user, with current prices
    pub async fn list_ownership(&self, external_id: &str) -> Result<Collection> {
        let db = self.db.clone();
        let user = external_id.to_string();
        let cards = tokio::task::spawn_blocking(move || -> Result<Vec<OwnedCard>> {
            let conn = db.session()?;
            database::list_ownership(&conn, &user)
        })
        .await??;

        Ok(Collection {
            user: external_id.to_string(),
            cards,
        })
    }
}

/// Reject blank values; anything else is passed through verbatim
fn non_blank<'a>(value: &'a str, field: &'static str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(CollectionError::MissingField(field))
    } else {
        Ok(value)
    }
}
