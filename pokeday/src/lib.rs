//! Pokémon of the day
//!
//! Serves one entry of a static day-of-year table, chosen by the local date.

pub mod dataset;
pub mod day_key;
pub mod error;
pub mod web;

pub use dataset::{Dataset, DatasetState, DayEntry, DayTable};
pub use day_key::{day_of_year, resolve_key, today, TodayEntry};
pub use error::{DayError, Result};
