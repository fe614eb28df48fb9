//! Market price lookup against the Pokémon TCG API
//!
//! The API nests prices per printing (`holofoil`, `normal`, ...) and any level
//! may be missing. `lookup` reports exactly what went wrong; callers that just
//! want a number use `lookup_or_default`, which collapses every failure to zero.

use crate::error::LookupError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default Pokémon TCG API base URL
pub const DEFAULT_PRICE_API_URL: &str = "https://api.pokemontcg.io/v2";

/// A market price in dollars, always held at two fraction digits.
///
/// Zero means "unknown or free".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    /// Round a decimal to cents (banker's rounding, as the upstream service did)
    pub fn new(value: Decimal) -> Self {
        Price(value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
    }

    /// Convert a JSON float; non-finite values yield `None`.
    ///
    /// Rounds the exact binary value, so `2.675` (stored as 2.67499...) gives 2.67.
    pub fn from_f64(value: f64) -> Option<Self> {
        Decimal::from_f64_retain(value).map(Price::new)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Price::new)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl ToSql for Price {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Price {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(_) => value
                .as_str()?
                .parse()
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Integer(i) => Ok(Price::new(Decimal::from(i))),
            ValueRef::Real(f) => Price::from_f64(f).ok_or(FromSqlError::InvalidType),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// ── API response shape ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CardSearchResponse {
    #[serde(default)]
    data: Vec<TcgCard>,
}

#[derive(Debug, Deserialize)]
struct TcgCard {
    #[serde(default)]
    tcgplayer: Option<TcgPlayer>,
}

#[derive(Debug, Deserialize)]
struct TcgPlayer {
    #[serde(default)]
    prices: Option<TcgPrices>,
}

#[derive(Debug, Default, Deserialize)]
struct TcgPrices {
    #[serde(default)]
    holofoil: Option<MarketPrice>,
    #[serde(default)]
    normal: Option<MarketPrice>,
}

#[derive(Debug, Deserialize)]
struct MarketPrice {
    #[serde(default)]
    market: Option<f64>,
}

impl TcgPrices {
    /// Holofoil market price, else normal market price. A zero holofoil
    /// price counts as missing.
    fn best_market(&self) -> Option<f64> {
        let usable = |p: &Option<MarketPrice>| {
            p.as_ref()
                .and_then(|m| m.market)
                .filter(|v| v.is_finite() && *v != 0.0)
        };
        usable(&self.holofoil).or_else(|| usable(&self.normal))
    }
}

/// Extract the market price from a raw search response body
fn parse_price(name: &str, body: &str) -> Result<Price, LookupError> {
    let response: CardSearchResponse = serde_json::from_str(body)?;
    let card = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| LookupError::NoMatch(name.to_string()))?;

    card.tcgplayer
        .and_then(|t| t.prices)
        .and_then(|p| p.best_market())
        .and_then(Price::from_f64)
        .ok_or_else(|| LookupError::NoPrice(name.to_string()))
}

/// HTTP client for the price API
#[derive(Debug, Clone)]
pub struct PriceClient {
    pub base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl PriceClient {
    /// Build a client. `timeout = None` blocks until the API answers.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent("card_collection/1.0");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: builder.build()?,
        })
    }

    /// Look up the current market price for a card by name
    pub async fn lookup(&self, name: &str) -> Result<Price, LookupError> {
        let query = format!("name:\"{}\"", name);
        let url = format!("{}/cards?q={}", self.base_url, urlencoding::encode(&query));

        log::debug!("Looking up price for {:?}", name);

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(LookupError::HttpStatus(response.status()));
        }

        let body = response.text().await?;
        parse_price(name, &body)
    }

    /// Like `lookup`, but any failure becomes `Price::ZERO`
    pub async fn lookup_or_default(&self, name: &str) -> Price {
        match self.lookup(name).await {
            Ok(price) => price,
            Err(e) => {
                log::warn!("Price lookup for {:?} failed, using 0: {}", name, e);
                Price::ZERO
            }
        }
    }
}

#[cfg(test)]
#[path = "pricing_tests.rs"]
mod tests;
