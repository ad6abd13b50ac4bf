use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spot price of one precious metal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalQuote {
    /// Ticker such as `XAU`.
    pub code: String,
    pub name: String,
    pub quote: MetalPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetalPrice {
    #[serde(rename = "EUR")]
    pub eur: f64,
    #[serde(rename = "USD")]
    pub usd: f64,
}

impl fmt::Display for MetalQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<10} {:>10.2} EUR {:>10.2} USD",
            self.code, self.name, self.quote.eur, self.quote.usd
        )
    }
}

/// Latest price of a security on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuote {
    pub isin: String,
    pub exchange: String,
    pub currency: String,
    pub price: f64,
    pub datetime: DateTime<Utc>,
    /// When the quote service cached this price upstream.
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

/// An asset on the user's watchlist together with its latest quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub id: String,
    pub isin: String,
    pub exchange: String,
    pub name: String,
    #[serde(default)]
    pub wkn: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub quote: Option<StockQuote>,
}

impl fmt::Display for WatchlistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quote {
            Some(quote) => write!(
                f,
                "{} {} ({}) {:.2} {}",
                self.isin, self.name, self.exchange, quote.price, quote.currency
            ),
            None => write!(f, "{} {} ({}) no quote", self.isin, self.name, self.exchange),
        }
    }
}
