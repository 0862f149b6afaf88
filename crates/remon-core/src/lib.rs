//! Core domain model and identifier resolution for the listing monitor.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CRATE_NAME: &str = "remon-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSite {
    UtahRealEstate,
    Zillow,
}

impl SourceSite {
    pub const ALL: [SourceSite; 2] = [SourceSite::UtahRealEstate, SourceSite::Zillow];

    pub fn slug(&self) -> &'static str {
        match self {
            SourceSite::UtahRealEstate => "utahrealestate",
            SourceSite::Zillow => "zillow",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceSite::UtahRealEstate => "UtahRealEstate.com",
            SourceSite::Zillow => "Zillow.com",
        }
    }

    pub fn origin(&self) -> &'static str {
        match self {
            SourceSite::UtahRealEstate => "https://www.utahrealestate.com",
            SourceSite::Zillow => "https://www.zillow.com",
        }
    }

    pub fn canonical_url(&self, listing_id: &str) -> String {
        match self {
            SourceSite::UtahRealEstate => format!("{}/report/{listing_id}", self.origin()),
            SourceSite::Zillow => format!("{}/homedetails/{listing_id}_zpid/", self.origin()),
        }
    }

    pub fn example_url(&self) -> String {
        match self {
            SourceSite::UtahRealEstate => self.canonical_url("1987654"),
            SourceSite::Zillow => self.canonical_url("12345678"),
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        match host {
            "utahrealestate.com" => Some(SourceSite::UtahRealEstate),
            "zillow.com" => Some(SourceSite::Zillow),
            _ => None,
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SourceSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utahrealestate" | "utahrealestate.com" | "ure" => Ok(SourceSite::UtahRealEstate),
            "zillow" | "zillow.com" => Ok(SourceSite::Zillow),
            other => Err(format!("unknown source site {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingKey {
    pub source_site: SourceSite,
    pub listing_id: String,
}

impl ListingKey {
    pub fn new(source_site: SourceSite, listing_id: impl Into<String>) -> Self {
        Self {
            source_site,
            listing_id: listing_id.into(),
        }
    }
}

impl fmt::Display for ListingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_site.slug(), self.listing_id)
    }
}

impl FromStr for ListingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (site, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <site>:<listing id>, got {s:?}"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("missing listing id in {s:?}"));
        }
        Ok(Self::new(site.parse()?, id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedListing {
    pub source_site: SourceSite,
    pub listing_id: String,
    pub canonical_url: String,
    pub input_text: String,
    pub added_at: DateTime<Utc>,
}

impl TrackedListing {
    pub fn key(&self) -> ListingKey {
        ListingKey::new(self.source_site, self.listing_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    ForSale,
    Pending,
    Sold,
    Unknown,
}

impl ListingStatus {
    pub fn is_known(&self) -> bool {
        !matches!(self, ListingStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::ForSale => "for_sale",
            ListingStatus::Pending => "pending",
            ListingStatus::Sold => "sold",
            ListingStatus::Unknown => "unknown",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ListingStatus::ForSale => "For Sale",
            ListingStatus::Pending => "Pending",
            ListingStatus::Sold => "Sold",
            ListingStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "for_sale" => Ok(ListingStatus::ForSale),
            "pending" => Ok(ListingStatus::Pending),
            "sold" => Ok(ListingStatus::Sold),
            "unknown" => Ok(ListingStatus::Unknown),
            other => Err(format!("unknown listing status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Status,
    Price,
    Address,
    AgentName,
    PhotoCount,
    Beds,
    Baths,
    SquareFeet,
    YearBuilt,
    PropertyType,
    MlsNumber,
    DaysOnMarket,
    Brokerage,
    AgentPhone,
    AgentEmail,
    AgentPhoto,
}

impl SnapshotField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotField::Status => "status",
            SnapshotField::Price => "price",
            SnapshotField::Address => "address",
            SnapshotField::AgentName => "agent_name",
            SnapshotField::PhotoCount => "photo_count",
            SnapshotField::Beds => "beds",
            SnapshotField::Baths => "baths",
            SnapshotField::SquareFeet => "square_feet",
            SnapshotField::YearBuilt => "year_built",
            SnapshotField::PropertyType => "property_type",
            SnapshotField::MlsNumber => "mls_number",
            SnapshotField::DaysOnMarket => "days_on_market",
            SnapshotField::Brokerage => "brokerage",
            SnapshotField::AgentPhone => "agent_phone",
            SnapshotField::AgentEmail => "agent_email",
            SnapshotField::AgentPhoto => "agent_photo",
        }
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingDetails {
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub square_feet: Option<u32>,
    pub year_built: Option<u32>,
    pub property_type: Option<String>,
    pub mls_number: Option<String>,
    pub days_on_market: Option<u32>,
    pub brokerage: Option<String>,
    pub agent_phone: Option<String>,
    pub agent_email: Option<String>,
    #[serde(default)]
    pub agent_photo_url: Option<String>,
}

/// Point-in-time facts extracted from one successful fetch.
///
/// `status == Unknown` is a valid snapshot: the page was fetched and looked
/// like a listing, but the status could not be read reliably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub status: ListingStatus,
    pub raw_status: Option<String>,
    pub price: Option<u64>,
    pub address: Option<String>,
    pub agent_name: Option<String>,
    pub photo_count: Option<u32>,
    #[serde(default)]
    pub details: ListingDetails,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_field_gaps: BTreeSet<SnapshotField>,
}

impl ListingSnapshot {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            status: ListingStatus::Unknown,
            raw_status: None,
            price: None,
            address: None,
            agent_name: None,
            photo_count: None,
            details: ListingDetails::default(),
            fetched_at,
            raw_field_gaps: BTreeSet::new(),
        }
    }

    pub fn record_gap(&mut self, field: SnapshotField) {
        self.raw_field_gaps.insert(field);
    }

    pub fn has_gap(&self, field: SnapshotField) -> bool {
        self.raw_field_gaps.contains(&field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransitionEvent {
    pub listing: ListingKey,
    pub from_status: ListingStatus,
    pub to_status: ListingStatus,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for StatusTransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} at {}",
            self.listing,
            self.from_status,
            self.to_status,
            self.observed_at.to_rfc3339()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum TransportFailureKind {
    Blocked(u16),
    NotFound,
    Timeout,
    NetworkError,
    UnexpectedStatus(u16),
}

impl TransportFailureKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            403 | 429 => Some(TransportFailureKind::Blocked(status)),
            404 | 410 => Some(TransportFailureKind::NotFound),
            other => Some(TransportFailureKind::UnexpectedStatus(other)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TransportFailureKind::Blocked(_)
            | TransportFailureKind::Timeout
            | TransportFailureKind::NetworkError => true,
            TransportFailureKind::NotFound => false,
            TransportFailureKind::UnexpectedStatus(status) => (500..600).contains(status),
        }
    }
}

impl fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailureKind::Blocked(status) => write!(f, "blocked (HTTP {status})"),
            TransportFailureKind::NotFound => f.write_str("not found"),
            TransportFailureKind::Timeout => f.write_str("timed out"),
            TransportFailureKind::NetworkError => f.write_str("network error"),
            TransportFailureKind::UnexpectedStatus(status) => {
                write!(f, "unexpected HTTP status {status}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    NotAListingPage,
}

impl fmt::Display for ExtractionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionFailureKind::NotAListingPage => f.write_str("not a listing page"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExtractionFailure {
    pub kind: ExtractionFailureKind,
    pub message: String,
}

impl ExtractionFailure {
    pub fn not_a_listing_page(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionFailureKind::NotAListingPage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FetchOutcome {
    Success(ListingSnapshot),
    TransportFailure(TransportFailure),
    ExtractionFailure(ExtractionFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn snapshot(&self) -> Option<&ListingSnapshot> {
        match self {
            FetchOutcome::Success(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::TransportFailure(_) => "transport_failure",
            FetchOutcome::ExtractionFailure(_) => "extraction_failure",
        }
    }
}

impl From<TransportFailure> for FetchOutcome {
    fn from(value: TransportFailure) -> Self {
        FetchOutcome::TransportFailure(value)
    }
}

impl From<ExtractionFailure> for FetchOutcome {
    fn from(value: ExtractionFailure) -> Self {
        FetchOutcome::ExtractionFailure(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    NoHistory,
    Known(ListingStatus),
}

impl TrackerState {
    pub fn from_known_status(status: Option<ListingStatus>) -> Self {
        match status {
            Some(status) if status.is_known() => TrackerState::Known(status),
            _ => TrackerState::NoHistory,
        }
    }

    pub fn known_status(&self) -> Option<ListingStatus> {
        match self {
            TrackerState::NoHistory => None,
            TrackerState::Known(status) => Some(*status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentifier {
    pub source_site: SourceSite,
    pub listing_id: String,
    pub canonical_url: String,
}

impl ResolvedIdentifier {
    fn new(source_site: SourceSite, listing_id: &str) -> Self {
        Self {
            source_site,
            listing_id: listing_id.to_string(),
            canonical_url: source_site.canonical_url(listing_id),
        }
    }

    pub fn key(&self) -> ListingKey {
        ListingKey::new(self.source_site, self.listing_id.clone())
    }

    pub fn into_tracked(self, input_text: impl Into<String>, added_at: DateTime<Utc>) -> TrackedListing {
        TrackedListing {
            source_site: self.source_site,
            listing_id: self.listing_id,
            canonical_url: self.canonical_url,
            input_text: input_text.into(),
            added_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("input is empty; expected a listing URL or an MLS number")]
    Empty,
    #[error("could not parse URL ({0}); expected a listing URL on UtahRealEstate.com or Zillow.com")]
    InvalidUrl(String),
    #[error("unsupported website {host:?}; expected a UtahRealEstate.com or Zillow.com listing URL")]
    UnsupportedHost { host: String },
    #[error("{site} URL is not a listing page; expected a URL like {}", .site.example_url())]
    NotAListingUrl { site: SourceSite },
    #[error("looks like a street address; find the listing URL or MLS number and enter that instead")]
    LooksLikeAddress,
    #[error("expected a listing URL or a 6-10 digit MLS number (optionally prefixed MLS, URE or ZPID)")]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed identifier {input:?}: {reason}")]
pub struct MalformedIdentifier {
    pub input: String,
    pub reason: MalformedReason,
}

static PREFIXED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(mls|ure|zpid|zillow)?\s*[#:\-]?\s*(\d{6,10})$").expect("valid prefixed number regex")
});

static URE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:report/)?(\d{6,10})/?$").expect("valid utahrealestate path regex")
});

static ZPID_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{5,12})_zpid").expect("valid zpid path regex"));

static ADDRESS_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+.*[A-Za-z].*,").expect("valid address regex"));

/// Normalize free-form user input into a canonical listing identity.
///
/// Accepts a listing URL on a supported site, or a 6-10 digit MLS-style
/// number. Unprefixed numbers (and `MLS`/`URE` prefixes) resolve to
/// UtahRealEstate; `ZPID`/`ZILLOW` prefixes resolve to Zillow.
pub fn resolve_identifier(raw: &str) -> Result<ResolvedIdentifier, MalformedIdentifier> {
    let input = raw.trim();
    let malformed = |reason| MalformedIdentifier {
        input: input.to_string(),
        reason,
    };

    if input.is_empty() {
        return Err(malformed(MalformedReason::Empty));
    }

    if let Some(url_text) = url_candidate(input) {
        return resolve_url(&url_text).map_err(malformed);
    }

    if let Some(caps) = PREFIXED_NUMBER.captures(input) {
        let site = match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
            Some(prefix) if prefix == "zpid" || prefix == "zillow" => SourceSite::Zillow,
            _ => SourceSite::UtahRealEstate,
        };
        return Ok(ResolvedIdentifier::new(site, &caps[2]));
    }

    if ADDRESS_LIKE.is_match(input) {
        return Err(malformed(MalformedReason::LooksLikeAddress));
    }

    Err(malformed(MalformedReason::Unrecognized))
}

fn url_candidate(input: &str) -> Option<String> {
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(input.to_string());
    }
    let bare_host = lower.strip_prefix("www.").unwrap_or(&lower);
    if bare_host.starts_with("utahrealestate.com") || bare_host.starts_with("zillow.com") {
        return Some(format!("https://{input}"));
    }
    None
}

fn resolve_url(text: &str) -> Result<ResolvedIdentifier, MalformedReason> {
    let url = Url::parse(text).map_err(|e| MalformedReason::InvalidUrl(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| MalformedReason::InvalidUrl("URL has no host".to_string()))?;
    let site = SourceSite::from_host(host).ok_or_else(|| MalformedReason::UnsupportedHost {
        host: host.to_string(),
    })?;

    let listing_id = match site {
        SourceSite::UtahRealEstate => URE_PATH.captures(url.path()).map(|c| c[1].to_string()),
        SourceSite::Zillow => ZPID_PATH.captures(url.path()).map(|c| c[1].to_string()),
    };
    let listing_id = listing_id.ok_or(MalformedReason::NotAListingUrl { site })?;
    Ok(ResolvedIdentifier::new(site, &listing_id))
}
