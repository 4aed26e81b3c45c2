use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use url::Url;

use crate::offer::{Offer, OfferSource};
use crate::text::{clean_string, split_price};
use crate::{Error, Result, MAX_FRAGMENTS_PER_PAGE};

const LISTING_SELECTOR: &str = "ul#srchrslt-adtable li.ad-listitem article.aditem";
const THUMBNAIL_SELECTOR: &str = "div.imagebox img";
const LOCATION_SELECTOR: &str = "div.aditem-main--top--left";
const TIMESTAMP_SELECTOR: &str = "div.aditem-main--top--right";
const TITLE_SELECTOR: &str = "div.aditem-main--middle h2";
const DESCRIPTION_SELECTOR: &str =
    "div.aditem-main--middle p.aditem-main--middle--description";
const PRICE_SELECTOR: &str = "div.aditem-main--middle div.aditem-main--middle--price-shipping";
const LINK_SELECTOR: &str = "a[href]";

/// Everything the extractor needs to know about the marketplace it reads.
#[derive(Debug, Clone)]
pub struct Marketplace {
    pub source: OfferSource,
    /// Base of the search URL: `{search_base}/{query}/k0`.
    pub search_base: String,
    /// Base the relative listing links are resolved against.
    pub link_base: String,
    pub currency_symbol: String,
    pub max_fragments: usize,
}

impl Default for Marketplace {
    fn default() -> Self {
        Self {
            source: OfferSource::Kleinanzeigen,
            search_base: "https://www.kleinanzeigen.de".to_string(),
            link_base: "https://kleinanzeigen.de".to_string(),
            currency_symbol: "€".to_string(),
            max_fragments: MAX_FRAGMENTS_PER_PAGE,
        }
    }
}

/// Raw text pulled out of one listing fragment. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFields {
    pub id: String,
    pub thumbnail_url: String,
    pub location: String,
    pub timestamp: String,
    pub title: String,
    pub description: String,
    pub raw_price: String,
}

impl RawFields {
    /// Separator rows carry none of the content fields. The id is not considered.
    pub fn is_separator(&self) -> bool {
        [
            &self.thumbnail_url,
            &self.location,
            &self.timestamp,
            &self.title,
            &self.description,
            &self.raw_price,
        ]
        .iter()
        .all(|field| field.is_empty())
    }
}

struct Selectors {
    listing: Selector,
    thumbnail: Selector,
    location: Selector,
    timestamp: Selector,
    title: Selector,
    description: Selector,
    price: Selector,
    link: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            listing: create_selector(LISTING_SELECTOR)?,
            thumbnail: create_selector(THUMBNAIL_SELECTOR)?,
            location: create_selector(LOCATION_SELECTOR)?,
            timestamp: create_selector(TIMESTAMP_SELECTOR)?,
            title: create_selector(TITLE_SELECTOR)?,
            description: create_selector(DESCRIPTION_SELECTOR)?,
            price: create_selector(PRICE_SELECTOR)?,
            link: create_selector(LINK_SELECTOR)?,
        })
    }
}

/// Runs [`extract_offers`] on a blocking thread so the parsed DOM never crosses an await.
pub async fn parse_page(
    html: Arc<String>,
    marketplace: Arc<Marketplace>,
    observed_at: DateTime<Utc>,
) -> Result<Vec<Offer>> {
    let offers =
        spawn_blocking(move || extract_offers(&html, &marketplace, observed_at)).await??;
    Ok(offers)
}

/// Extracts the valid offers of a search results page, in document order.
///
/// An empty body is an error. A page without the results container yields no offers.
pub fn extract_offers(
    body: &str,
    marketplace: &Marketplace,
    observed_at: DateTime<Utc>,
) -> Result<Vec<Offer>> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::EmptyInput);
    }

    let selectors = Selectors::new()?;
    let link_base = Url::parse(&marketplace.link_base)?;
    let doc = Html::parse_document(body);

    let mut offers = Vec::new();
    let mut separators = 0usize;
    for listing in doc.select(&selectors.listing).take(marketplace.max_fragments) {
        let fields = extract_fields(listing, &selectors);
        if fields.is_separator() {
            separators += 1;
            continue;
        }

        let offer = Offer {
            price: split_price(&fields.raw_price, &marketplace.currency_symbol).to_string(),
            source_url: resolve_link(listing, &selectors, &link_base),
            thumbnail_url: Some(fields.thumbnail_url).filter(|url| !url.is_empty()),
            id: fields.id,
            location: fields.location,
            timestamp: fields.timestamp,
            title: fields.title,
            description: fields.description,
            raw_price_text: fields.raw_price,
            raw_inner_markup: listing.inner_html(),
            observed_at,
            source: marketplace.source,
        };

        if offer.is_valid() {
            offers.push(offer);
        } else {
            debug!(id = %offer.id, "dropping incomplete offer");
        }
    }

    info!(offers = offers.len(), separators, "extracted offers");
    Ok(offers)
}

/// Pulls the raw fields out of a single listing fragment.
fn extract_fields(listing: ElementRef<'_>, selectors: &Selectors) -> RawFields {
    RawFields {
        id: clean_string(listing.value().attr("data-adid").unwrap_or_default()),
        thumbnail_url: listing
            .select(&selectors.thumbnail)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(clean_string)
            .unwrap_or_default(),
        location: select_text(listing, &selectors.location),
        timestamp: select_text(listing, &selectors.timestamp),
        title: select_text(listing, &selectors.title),
        description: select_text(listing, &selectors.description),
        raw_price: select_text(listing, &selectors.price),
    }
}

/// Text of the first match of `selector` below `listing`, whitespace cleaned.
fn select_text(listing: ElementRef<'_>, selector: &Selector) -> String {
    listing
        .select(selector)
        .next()
        .map(|el| clean_string(&el.text().collect::<String>()))
        .unwrap_or_default()
}

/// Absolute listing URL from `data-href`, falling back to the first anchor. Links that
/// cannot be resolved leave the marketplace base as the source URL.
fn resolve_link(listing: ElementRef<'_>, selectors: &Selectors, base: &Url) -> String {
    let href = listing
        .value()
        .attr("data-href")
        .or_else(|| {
            listing
                .select(&selectors.link)
                .next()
                .and_then(|a| a.value().attr("href"))
        })
        .map(str::trim)
        .unwrap_or_default();

    base.join(href)
        .map(String::from)
        .unwrap_or_else(|_| base.to_string())
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::InvalidSelector(sel_str.into()))
}
