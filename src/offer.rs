use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Marketplace an offer was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferSource {
    Kleinanzeigen,
}

impl OfferSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferSource::Kleinanzeigen => "kleinanzeigen",
        }
    }
}

impl fmt::Display for OfferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single listing as seen on one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: String,
    pub source_url: String,
    pub thumbnail_url: Option<String>,
    pub location: String,
    pub timestamp: String,
    pub title: String,
    pub description: String,
    pub price: String,
    pub raw_price_text: String,
    pub raw_inner_markup: String,
    pub observed_at: DateTime<Utc>,
    pub source: OfferSource,
}

impl Offer {
    /// Offers missing any of these are never surfaced.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.title.is_empty()
            && !self.description.is_empty()
            && !self.price.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.source, &self.id, &self.raw_price_text)
    }
}

/// Number of digest bytes kept. 16 bytes gives 32 hex chars, which the ledger capacity is sized for.
const FINGERPRINT_BYTES: usize = 16;

/// Hex identity of an offer at a given price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(source: OfferSource, id: &str, raw_price_text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}-{}-{}", source.as_str(), id, raw_price_text).as_bytes());
        let digest = hasher.finalize();

        let hex: String = digest[..FINGERPRINT_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Fingerprint(hex)
    }

    /// Wraps an already encoded fingerprint, e.g. one read back from a ledger blob.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Fingerprint(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
pub(crate) fn sample_offer(id: &str, raw_price: &str) -> Offer {
    Offer {
        id: id.to_string(),
        source_url: format!("https://kleinanzeigen.de/s-anzeige/item/{id}"),
        thumbnail_url: None,
        location: "10115 Berlin".to_string(),
        timestamp: "Heute, 12:00".to_string(),
        title: format!("Item {id}"),
        description: "Kaum benutzt".to_string(),
        price: crate::text::split_price(raw_price, "€").to_string(),
        raw_price_text: raw_price.to_string(),
        raw_inner_markup: String::new(),
        observed_at: Utc::now(),
        source: OfferSource::Kleinanzeigen,
    }
}
