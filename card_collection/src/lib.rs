//! Card Collection - photo-based trading card tracker
//!
//! Identifies a card from a photo, looks up its market price and records
//! ownership (with quantity) per user in a SQLite database.

pub mod classifier;
pub mod collection;
pub mod database;
pub mod error;
pub mod pricing;
pub mod web;

pub use classifier::{CardClassifier, Detection, InferenceClassifier};
pub use collection::{Collection, CollectionService, DetectionOutcome};
pub use database::{init_schema, Database, OwnedCard, OwnershipAction};
pub use error::{CollectionError, LookupError, Result};
pub use pricing::{Price, PriceClient};
