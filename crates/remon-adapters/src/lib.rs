//! Per-site listing page extractors.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use remon_core::{
    ExtractionFailure, ListingDetails, ListingSnapshot, ListingStatus, SnapshotField, SourceSite,
};
use scraper::{ElementRef, Html, Node, Selector};

pub const CRATE_NAME: &str = "remon-adapters";

/// Turns the raw HTML of one listing page into a snapshot.
///
/// Fields are read independently and a miss only adds a gap. The call fails
/// only when the page lacks the site's structural anchor, i.e. it is not a
/// listing page at all (search results, bot checks, removed listings).
pub trait SiteExtractor: Send + Sync {
    fn site(&self) -> SourceSite;

    fn extract(
        &self,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<ListingSnapshot, ExtractionFailure>;
}

pub fn extractor_for_site(site: SourceSite) -> Box<dyn SiteExtractor> {
    match site {
        SourceSite::UtahRealEstate => Box::new(UtahRealEstateExtractor),
        SourceSite::Zillow => Box::new(ZillowExtractor),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatusLexicon {
    entries: &'static [(&'static str, ListingStatus)],
}

impl StatusLexicon {
    pub const fn new(entries: &'static [(&'static str, ListingStatus)]) -> Self {
        Self { entries }
    }

    pub fn classify(&self, raw: &str) -> ListingStatus {
        let normalized = normalize_status_text(raw);
        self.entries
            .iter()
            .find(|(text, _)| *text == normalized)
            .map(|(_, status)| *status)
            .unwrap_or(ListingStatus::Unknown)
    }
}

pub fn normalize_status_text(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '_' | '-' => ' ',
            other => other.to_ascii_lowercase(),
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub static UTAH_STATUS_LEXICON: StatusLexicon = StatusLexicon::new(&[
    ("active", ListingStatus::ForSale),
    ("for sale", ListingStatus::ForSale),
    ("back on market", ListingStatus::ForSale),
    ("under contract", ListingStatus::Pending),
    ("active under contract", ListingStatus::Pending),
    ("pending", ListingStatus::Pending),
    ("contingent", ListingStatus::Pending),
    ("backup offers", ListingStatus::Pending),
    ("closed", ListingStatus::Sold),
    ("sold", ListingStatus::Sold),
]);

pub static ZILLOW_STATUS_LEXICON: StatusLexicon = StatusLexicon::new(&[
    ("for sale", ListingStatus::ForSale),
    ("active", ListingStatus::ForSale),
    ("price change", ListingStatus::ForSale),
    ("new construction", ListingStatus::ForSale),
    ("pending", ListingStatus::Pending),
    ("under contract", ListingStatus::Pending),
    ("contingent", ListingStatus::Pending),
    ("accepting backup offers", ListingStatus::Pending),
    ("sold", ListingStatus::Sold),
    ("recently sold", ListingStatus::Sold),
    ("closed", ListingStatus::Sold),
]);

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid CSS selector")
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid extraction regex")
}

fn embedded_string(key: &str) -> Regex {
    regex(&format!(r#"\\?"{key}\\?"\s*:\s*\\?"([^"\\]+)"#))
}

fn embedded_number(key: &str) -> Regex {
    regex(&format!(r#"\\?"{key}\\?"\s*:\s*([0-9][0-9,.]*)"#))
}

static NUMBER: LazyLock<Regex> = LazyLock::new(|| regex(r"\d[\d,]*(?:\.\d+)?"));

#[derive(Debug, Default)]
struct FieldGaps(BTreeSet<SnapshotField>);

impl FieldGaps {
    fn track<T>(&mut self, field: SnapshotField, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.0.insert(field);
        }
        value
    }

    fn into_inner(self) -> BTreeSet<SnapshotField> {
        self.0
    }
}

fn clean_text(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

fn select_first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(element_text)
}

fn select_first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .find_map(clean_text)
}

fn page_text(document: &Html) -> String {
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

fn capture(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .and_then(|m| clean_text(m.as_str()))
}

fn first_number(text: &str) -> Option<String> {
    NUMBER
        .find(text)
        .map(|m| m.as_str().replace(',', ""))
}

/// Whole-number part of the first number in `text`: `"$1,149,900"` -> 1149900.
fn parse_whole<T: std::str::FromStr>(text: &str) -> Option<T> {
    let number = first_number(text)?;
    number.split('.').next()?.parse().ok()
}

fn parse_decimal(text: &str) -> Option<f64> {
    first_number(text)?.parse().ok()
}

fn read_status(
    gaps: &mut FieldGaps,
    raw: Option<String>,
    lexicon: &StatusLexicon,
) -> (ListingStatus, Option<String>) {
    match gaps.track(SnapshotField::Status, raw) {
        Some(raw) => (lexicon.classify(&raw), Some(raw)),
        None => (ListingStatus::Unknown, None),
    }
}

static URE_FACTS_HEADER: LazyLock<Selector> = LazyLock::new(|| selector("span.facts-header"));
static URE_HEADLINE: LazyLock<Selector> = LazyLock::new(|| selector("h2"));
static URE_LOCATION: LazyLock<Selector> = LazyLock::new(|| selector("#location-data"));
static URE_PRICE: LazyLock<Selector> = LazyLock::new(|| selector(".listing-price, .price"));
static URE_AGENT_LINK: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"a[href*="/roster/agent.listings.report.public/agentid/"]"#)
});
static URE_PHONE_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="tel:"]"#));
static URE_CONTACT: LazyLock<Selector> =
    LazyLock::new(|| selector(".contact-agent, #contact-agent"));
static URE_EMAIL_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="mailto:"]"#));
static URE_BROKERAGE: LazyLock<Selector> =
    LazyLock::new(|| selector(".broker-overview-content strong"));
static URE_AGENT_PHOTO: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"img[src^="https://webdrive.utahrealestate.com/"]"#));
static URE_GALLERY_IMAGES: LazyLock<Selector> =
    LazyLock::new(|| selector(".photo-gallery img, #photo-gallery img"));

static URE_DOLLARS: LazyLock<Regex> = LazyLock::new(|| regex(r"\$\s?(\d{1,3}(?:,\d{3})+)"));
static URE_PHOTO_COUNT: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)\b(\d+)\s+photos?\b"));
static URE_BEDS: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\b(\d+)\s*(?:bedrooms?|beds?|bd)\b"));
static URE_BATHS: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\b(\d+(?:\.\d+)?)\s*(?:bathrooms?|baths?|ba)\b"));
static URE_SQFT: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\b(\d[\d,]*)\s*(?:sq\.?\s*ft|sqft|square feet)"));
static PHONE: LazyLock<Regex> = LazyLock::new(|| regex(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}"));

#[derive(Debug, Clone, Copy, Default)]
pub struct UtahRealEstateExtractor;

#[derive(Debug, Default)]
struct UtahFacts(Vec<(String, String)>);

impl UtahFacts {
    fn collect(document: &Html) -> Self {
        let facts = document
            .select(&URE_FACTS_HEADER)
            .filter_map(|header| {
                let label = element_text(header)?
                    .trim_end_matches(':')
                    .trim()
                    .to_ascii_lowercase();
                let value = fact_value(header)?;
                Some((label, value))
            })
            .collect();
        Self(facts)
    }

    fn get(&self, labels: &[&str]) -> Option<String> {
        labels.iter().find_map(|wanted| {
            self.0
                .iter()
                .find(|(label, _)| label == wanted)
                .map(|(_, value)| value.clone())
        })
    }
}

fn fact_value(header: ElementRef<'_>) -> Option<String> {
    header.next_siblings().find_map(|node| {
        let text = match node.value() {
            Node::Text(text) => clean_text(text),
            Node::Element(_) => ElementRef::wrap(node).and_then(element_text),
            _ => None,
        }?;
        clean_text(text.trim_matches(|c| c == '"' || c == '\''))
    })
}

impl SiteExtractor for UtahRealEstateExtractor {
    fn site(&self) -> SourceSite {
        SourceSite::UtahRealEstate
    }

    fn extract(
        &self,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<ListingSnapshot, ExtractionFailure> {
        let document = Html::parse_document(html);
        if document.select(&URE_FACTS_HEADER).next().is_none() {
            return Err(ExtractionFailure::not_a_listing_page(
                "no listing facts section (span.facts-header) on UtahRealEstate.com page",
            ));
        }

        let facts = UtahFacts::collect(&document);
        let text = page_text(&document);
        let mut gaps = FieldGaps::default();

        let (status, raw_status) =
            read_status(&mut gaps, facts.get(&["status"]), &UTAH_STATUS_LEXICON);

        let price = facts
            .get(&["list price", "price", "sold price"])
            .and_then(|v| parse_whole(&v))
            .or_else(|| select_first_text(&document, &URE_PRICE).and_then(|v| parse_whole(&v)))
            .or_else(|| capture(&URE_DOLLARS, &text).and_then(|v| parse_whole(&v)));

        let street = document
            .select(&URE_HEADLINE)
            .filter_map(element_text)
            .find(|h| !h.eq_ignore_ascii_case("contact agent"));
        let location = select_first_text(&document, &URE_LOCATION)
            .and_then(|loc| clean_text(loc.trim_start_matches(',')));
        let address = match (street, location) {
            (Some(street), Some(location)) => Some(format!("{street}, {location}")),
            (street, location) => street.or(location),
        };

        let photo_count = capture(&URE_PHOTO_COUNT, &text)
            .and_then(|v| parse_whole(&v))
            .or_else(|| {
                let images = document.select(&URE_GALLERY_IMAGES).count();
                u32::try_from(images).ok().filter(|count| *count > 0)
            });

        let agent_phone = select_first_text(&document, &URE_PHONE_LINK).or_else(|| {
            select_first_text(&document, &URE_CONTACT)
                .and_then(|contact| PHONE.find(&contact).map(|m| m.as_str().to_string()))
        });
        let agent_email = select_first_attr(&document, &URE_EMAIL_LINK, "href").and_then(|href| {
            let address = href.trim_start_matches("mailto:");
            clean_text(address.split('?').next().unwrap_or(address))
        });

        let details = ListingDetails {
            beds: gaps.track(
                SnapshotField::Beds,
                facts
                    .get(&["bedrooms", "beds"])
                    .or_else(|| capture(&URE_BEDS, &text))
                    .and_then(|v| parse_whole(&v)),
            ),
            baths: gaps.track(
                SnapshotField::Baths,
                facts
                    .get(&["bathrooms", "baths", "total baths"])
                    .or_else(|| capture(&URE_BATHS, &text))
                    .and_then(|v| parse_decimal(&v)),
            ),
            square_feet: gaps.track(
                SnapshotField::SquareFeet,
                facts
                    .get(&["square feet", "total sq ft", "sq ft"])
                    .or_else(|| capture(&URE_SQFT, &text))
                    .and_then(|v| parse_whole(&v)),
            ),
            year_built: gaps.track(
                SnapshotField::YearBuilt,
                facts.get(&["year built"]).and_then(|v| parse_whole(&v)),
            ),
            property_type: gaps.track(SnapshotField::PropertyType, facts.get(&["type", "property type"])),
            mls_number: gaps.track(SnapshotField::MlsNumber, facts.get(&["mls#", "mls #", "mls"])),
            days_on_market: gaps.track(
                SnapshotField::DaysOnMarket,
                facts
                    .get(&["days on ure", "days on market"])
                    .and_then(|v| parse_whole(&v)),
            ),
            brokerage: gaps.track(
                SnapshotField::Brokerage,
                select_first_text(&document, &URE_BROKERAGE),
            ),
            agent_phone: gaps.track(SnapshotField::AgentPhone, agent_phone),
            agent_email: gaps.track(SnapshotField::AgentEmail, agent_email),
            agent_photo_url: gaps.track(
                SnapshotField::AgentPhoto,
                select_first_attr(&document, &URE_AGENT_PHOTO, "src"),
            ),
        };

        Ok(ListingSnapshot {
            status,
            raw_status,
            price: gaps.track(SnapshotField::Price, price),
            address: gaps.track(SnapshotField::Address, address),
            agent_name: gaps.track(
                SnapshotField::AgentName,
                select_first_text(&document, &URE_AGENT_LINK),
            ),
            photo_count: gaps.track(SnapshotField::PhotoCount, photo_count),
            details,
            fetched_at,
            raw_field_gaps: gaps.into_inner(),
        })
    }
}

static ZILLOW_PRICE: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="price"]"#));
static ZILLOW_HEADLINE: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static ZILLOW_STATUS: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        r#"[data-testid="home-status"], [data-testid="listing-status"], [data-testid="status"], [data-test="status"], [data-test="listing-status"]"#,
    )
});

static ZPID_KEY: LazyLock<Regex> = LazyLock::new(|| regex(r#"\\?"zpid\\?"\s*:"#));
static HOME_STATUS: LazyLock<Regex> = LazyLock::new(|| embedded_string("homeStatus"));
static AVAILABILITY: LazyLock<Regex> = LazyLock::new(|| embedded_string("availability"));
static EMBEDDED_PRICE: LazyLock<Regex> = LazyLock::new(|| embedded_number("price"));
static BEDROOMS: LazyLock<Regex> = LazyLock::new(|| embedded_number("bedrooms"));
static BATHROOMS: LazyLock<Regex> = LazyLock::new(|| embedded_number("bathrooms"));
static LIVING_AREA: LazyLock<Regex> = LazyLock::new(|| embedded_number("livingArea"));
static YEAR_BUILT: LazyLock<Regex> = LazyLock::new(|| embedded_number("yearBuilt"));
static DAYS_ON_ZILLOW: LazyLock<Regex> = LazyLock::new(|| embedded_number("daysOnZillow"));
static PHOTO_COUNT: LazyLock<Regex> = LazyLock::new(|| embedded_number("photoCount"));
static HOME_TYPE: LazyLock<Regex> = LazyLock::new(|| embedded_string("homeType"));
static MLS_ID: LazyLock<Regex> = LazyLock::new(|| embedded_string("mlsid"));
static MLS_TEXT: LazyLock<Regex> = LazyLock::new(|| regex(r"MLS\s*#\s*:?\s*([A-Z0-9][A-Z0-9-]{3,})"));
static STREET: LazyLock<Regex> = LazyLock::new(|| embedded_string("streetAddress"));
static CITY: LazyLock<Regex> = LazyLock::new(|| embedded_string("city"));
static STATE: LazyLock<Regex> = LazyLock::new(|| embedded_string("state"));
static ZIPCODE: LazyLock<Regex> = LazyLock::new(|| embedded_string("zipcode"));
static AGENT_NAME: LazyLock<Regex> = LazyLock::new(|| attribution("agentName"));
static AGENT_PHONE: LazyLock<Regex> = LazyLock::new(|| attribution("agentPhoneNumber"));
static AGENT_EMAIL: LazyLock<Regex> = LazyLock::new(|| attribution("agentEmail"));
static BROKERAGE: LazyLock<Regex> = LazyLock::new(|| attribution("brokerageName"));

fn attribution(key: &str) -> Regex {
    regex(&format!(
        r#"\\?"attributionInfo\\?"\s*:\s*\{{[^}}]*?\\?"{key}\\?"\s*:\s*\\?"([^"\\]+)"#
    ))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZillowExtractor;

impl SiteExtractor for ZillowExtractor {
    fn site(&self) -> SourceSite {
        SourceSite::Zillow
    }

    fn extract(
        &self,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<ListingSnapshot, ExtractionFailure> {
        let document = Html::parse_document(html);
        let headline = select_first_text(&document, &ZILLOW_HEADLINE);
        let price_text = select_first_text(&document, &ZILLOW_PRICE);
        let has_anchor = ZPID_KEY.is_match(html) || (price_text.is_some() && headline.is_some());
        if !has_anchor {
            return Err(ExtractionFailure::not_a_listing_page(
                "no zpid data or price headline on Zillow page",
            ));
        }

        let mut gaps = FieldGaps::default();
        let raw_status = capture(&HOME_STATUS, html)
            .or_else(|| select_first_text(&document, &ZILLOW_STATUS))
            .or_else(|| capture(&AVAILABILITY, html));
        let (status, raw_status) = read_status(&mut gaps, raw_status, &ZILLOW_STATUS_LEXICON);

        let price = price_text
            .and_then(|v| parse_whole(&v))
            .or_else(|| capture(&EMBEDDED_PRICE, html).and_then(|v| parse_whole(&v)));

        let address = headline.or_else(|| {
            let street = capture(&STREET, html)?;
            let locality = [&CITY, &STATE]
                .into_iter()
                .filter_map(|re| capture(re, html))
                .collect::<Vec<_>>()
                .join(", ");
            let mut address = street;
            if !locality.is_empty() {
                address = format!("{address}, {locality}");
            }
            if let Some(zip) = capture(&ZIPCODE, html) {
                address = format!("{address} {zip}");
            }
            Some(address)
        });

        let mls_number = capture(&MLS_ID, html).or_else(|| capture(&MLS_TEXT, &page_text(&document)));

        let details = ListingDetails {
            beds: gaps.track(SnapshotField::Beds, capture(&BEDROOMS, html).and_then(|v| parse_whole(&v))),
            baths: gaps.track(SnapshotField::Baths, capture(&BATHROOMS, html).and_then(|v| parse_decimal(&v))),
            square_feet: gaps.track(
                SnapshotField::SquareFeet,
                capture(&LIVING_AREA, html).and_then(|v| parse_whole(&v)),
            ),
            year_built: gaps.track(
                SnapshotField::YearBuilt,
                capture(&YEAR_BUILT, html).and_then(|v| parse_whole(&v)),
            ),
            property_type: gaps.track(SnapshotField::PropertyType, capture(&HOME_TYPE, html)),
            mls_number: gaps.track(SnapshotField::MlsNumber, mls_number),
            days_on_market: gaps.track(
                SnapshotField::DaysOnMarket,
                capture(&DAYS_ON_ZILLOW, html).and_then(|v| parse_whole(&v)),
            ),
            brokerage: gaps.track(SnapshotField::Brokerage, capture(&BROKERAGE, html)),
            agent_phone: gaps.track(SnapshotField::AgentPhone, capture(&AGENT_PHONE, html)),
            agent_email: gaps.track(SnapshotField::AgentEmail, capture(&AGENT_EMAIL, html)),
            agent_photo_url: None,
        };

        Ok(ListingSnapshot {
            status,
            raw_status,
            price: gaps.track(SnapshotField::Price, price),
            address: gaps.track(SnapshotField::Address, address),
            agent_name: gaps.track(SnapshotField::AgentName, capture(&AGENT_NAME, html)),
            photo_count: gaps.track(
                SnapshotField::PhotoCount,
                capture(&PHOTO_COUNT, html).and_then(|v| parse_whole(&v)),
            ),
            details,
            fetched_at,
            raw_field_gaps: gaps.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remon_core::ExtractionFailureKind;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::path::{Path, PathBuf};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenSnapshot {
        status: ListingStatus,
        raw_status: Option<String>,
        price: Option<u64>,
        address: Option<String>,
        agent_name: Option<String>,
        photo_count: Option<u32>,
        details: ListingDetails,
        raw_field_gaps: BTreeSet<SnapshotField>,
    }

    impl From<ListingSnapshot> for GoldenSnapshot {
        fn from(s: ListingSnapshot) -> Self {
            Self {
                status: s.status,
                raw_status: s.raw_status,
                price: s.price,
                address: s.address,
                agent_name: s.agent_name,
                photo_count: s.photo_count,
                details: s.details,
                raw_field_gaps: s.raw_field_gaps,
            }
        }
    }

    fn fixture_dir(site: SourceSite) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(site.slug())
            .join("sample")
    }

    fn assert_golden(site: SourceSite) {
        let dir = fixture_dir(site);
        let html = fs::read_to_string(dir.join("listing.html")).expect("read listing fixture");
        let expected: GoldenSnapshot = serde_json::from_str(
            &fs::read_to_string(dir.join("snapshot.json")).expect("read snapshot"),
        )
        .expect("parse snapshot");

        let extractor = extractor_for_site(site);
        assert_eq!(extractor.site(), site);
        let snapshot = extractor.extract(&html, Utc::now()).expect("extract fixture");
        assert_eq!(GoldenSnapshot::from(snapshot), expected);
    }

    #[test]
    fn golden_snapshot_utahrealestate() {
        assert_golden(SourceSite::UtahRealEstate);
    }

    #[test]
    fn golden_snapshot_zillow() {
        assert_golden(SourceSite::Zillow);
    }

    #[test]
    fn lexicons_normalize_case_and_separators() {
        assert_eq!(ZILLOW_STATUS_LEXICON.classify("RECENTLY_SOLD"), ListingStatus::Sold);
        assert_eq!(ZILLOW_STATUS_LEXICON.classify("  for-sale "), ListingStatus::ForSale);
        assert_eq!(UTAH_STATUS_LEXICON.classify("Active  Under Contract"), ListingStatus::Pending);
        assert_eq!(UTAH_STATUS_LEXICON.classify("Back On Market"), ListingStatus::ForSale);
        assert_eq!(UTAH_STATUS_LEXICON.classify("Off Market"), ListingStatus::Unknown);
    }

    #[test]
    fn zillow_pending_status_is_read_from_page() {
        let html = r#"<html><body>
            <h1>77 Test Ave, Provo, UT 84604</h1>
            <span data-testid="price">$400,000</span>
            <span data-testid="home-status">Pending</span>
        </body></html>"#;
        let snapshot = ZillowExtractor.extract(html, Utc::now()).unwrap();
        assert_eq!(snapshot.status, ListingStatus::Pending);
        assert_eq!(snapshot.price, Some(400_000));
        assert_eq!(snapshot.address.as_deref(), Some("77 Test Ave, Provo, UT 84604"));
        assert!(snapshot.has_gap(SnapshotField::AgentName));
    }

    #[test]
    fn unrecognized_status_is_unknown_with_raw_text() {
        let html = r#"<html><body>
            <h1>77 Test Ave</h1>
            <span data-testid="price">$400,000</span>
            <span data-testid="home-status">Auction Scheduled</span>
        </body></html>"#;
        let snapshot = ZillowExtractor.extract(html, Utc::now()).unwrap();
        assert_eq!(snapshot.status, ListingStatus::Unknown);
        assert_eq!(snapshot.raw_status.as_deref(), Some("Auction Scheduled"));
        assert!(!snapshot.has_gap(SnapshotField::Status));
    }

    #[test]
    fn missing_status_is_a_gap_not_a_failure() {
        let html = r#"<html><body>
            <h2>12 Oak Ln</h2>
            <ul><li><span class="facts-header">MLS#</span> 1999999</li></ul>
        </body></html>"#;
        let snapshot = UtahRealEstateExtractor.extract(html, Utc::now()).unwrap();
        assert_eq!(snapshot.status, ListingStatus::Unknown);
        assert!(snapshot.raw_status.is_none());
        assert!(snapshot.has_gap(SnapshotField::Status));
        assert_eq!(snapshot.details.mls_number.as_deref(), Some("1999999"));
        assert_eq!(snapshot.address.as_deref(), Some("12 Oak Ln"));
    }

    #[test]
    fn agent_photo_comes_only_from_the_agent_photo_host() {
        let html = r#"<html><body>
            <ul><li><span class="facts-header">Status</span> Active</li></ul>
            <img src="https://assets.utahrealestate.com/photos/1.jpg" alt="Kitchen">
        </body></html>"#;
        let snapshot = UtahRealEstateExtractor.extract(html, Utc::now()).unwrap();
        assert_eq!(snapshot.details.agent_photo_url, None);
        assert!(snapshot.has_gap(SnapshotField::AgentPhoto));

        let with_photo = html.replace(
            "</body>",
            r#"<img src="https://webdrive.utahrealestate.com/agentphotos/42.jpg" alt="Agent"></body>"#,
        );
        let snapshot = UtahRealEstateExtractor.extract(&with_photo, Utc::now()).unwrap();
        assert_eq!(
            snapshot.details.agent_photo_url.as_deref(),
            Some("https://webdrive.utahrealestate.com/agentphotos/42.jpg")
        );
        assert!(!snapshot.has_gap(SnapshotField::AgentPhoto));
    }

    #[test]
    fn pages_without_anchor_are_not_listing_pages() {
        let bot_check = "<html><body><h1>Press &amp; Hold to confirm you are a human</h1></body></html>";
        let err = ZillowExtractor.extract(bot_check, Utc::now()).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::NotAListingPage);

        let search = "<html><body><h2>Search Results</h2><p>No listings found</p></body></html>";
        let err = UtahRealEstateExtractor.extract(search, Utc::now()).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::NotAListingPage);
    }

    #[test]
    fn escaped_embedded_data_is_readable() {
        let html = r#"<script>window.cache = "{\"zpid\":5551234,\"homeStatus\":\"SOLD\",\"price\":389000}";</script>"#;
        let snapshot = ZillowExtractor.extract(html, Utc::now()).unwrap();
        assert_eq!(snapshot.status, ListingStatus::Sold);
        assert_eq!(snapshot.price, Some(389_000));
    }
}
