//! Region catalog
//!
//! Static mapping of exchange market codes to geographic regions and the
//! catalog of known market indices. The catalog is built once and shared as
//! an immutable snapshot; cloning a `RegionCatalog` is cheap and never
//! aliases mutable state.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Geographic region a security or index belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    Us,
    Eu,
    Asia,
    Russia,
    MiddleEast,
    CentralAsia,
    Unknown,
}

impl Region {
    /// Regions backed by dedicated market indices
    pub const INDEXED: [Region; 3] = [Region::Us, Region::Eu, Region::Asia];

    /// All regions, including those that always resolve via fallback
    pub const ALL: [Region; 7] = [
        Region::Us,
        Region::Eu,
        Region::Asia,
        Region::Russia,
        Region::MiddleEast,
        Region::CentralAsia,
        Region::Unknown,
    ];

    /// Storage key for this region
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Eu => "EU",
            Self::Asia => "ASIA",
            Self::Russia => "RUSSIA",
            Self::MiddleEast => "MIDDLE_EAST",
            Self::CentralAsia => "CENTRAL_ASIA",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether this region has dedicated indices (US, EU, ASIA)
    pub fn has_indices(&self) -> bool {
        Self::INDEXED.contains(self)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Self::Us),
            "EU" => Ok(Self::Eu),
            "ASIA" => Ok(Self::Asia),
            "RUSSIA" => Ok(Self::Russia),
            "MIDDLE_EAST" => Ok(Self::MiddleEast),
            "CENTRAL_ASIA" => Ok(Self::CentralAsia),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Invalid region: {}", s)),
        }
    }
}

/// Kind of market index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexKind {
    /// Price index, used for composite returns
    Price,
    /// Volatility index, never part of composite returns
    Volatility,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price => write!(f, "PRICE"),
            Self::Volatility => write!(f, "VOLATILITY"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRICE" => Ok(Self::Price),
            "VOLATILITY" => Ok(Self::Volatility),
            _ => Err(format!("Invalid index kind: {}", s)),
        }
    }
}

/// A known market index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownIndex {
    pub symbol: String,
    pub name: String,
    pub market_code: String,
    pub region: Region,
    pub kind: IndexKind,
}

impl KnownIndex {
    pub fn new(symbol: &str, name: &str, market_code: &str, region: Region, kind: IndexKind) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            market_code: market_code.to_string(),
            region,
            kind,
        }
    }
}

#[derive(Debug)]
struct CatalogData {
    market_codes: HashMap<String, Region>,
    indices: Vec<KnownIndex>,
}

/// Immutable snapshot of market-code mappings and known indices
#[derive(Debug, Clone)]
pub struct RegionCatalog {
    inner: Arc<CatalogData>,
}

const MARKET_CODES: &[(&str, Region)] = &[
    // United States
    ("XNYS", Region::Us),
    ("XNAS", Region::Us),
    ("XASE", Region::Us),
    ("ARCX", Region::Us),
    ("BATS", Region::Us),
    ("NYSE", Region::Us),
    ("NASDAQ", Region::Us),
    ("AMEX", Region::Us),
    // Europe
    ("XETR", Region::Eu),
    ("XFRA", Region::Eu),
    ("XLON", Region::Eu),
    ("XPAR", Region::Eu),
    ("XAMS", Region::Eu),
    ("XBRU", Region::Eu),
    ("XMIL", Region::Eu),
    ("XMAD", Region::Eu),
    ("XSWX", Region::Eu),
    ("XSTO", Region::Eu),
    ("XHEL", Region::Eu),
    ("XCSE", Region::Eu),
    ("XOSL", Region::Eu),
    ("XWBO", Region::Eu),
    ("XDUB", Region::Eu),
    ("XLIS", Region::Eu),
    ("XSTX", Region::Eu),
    ("LSE", Region::Eu),
    ("EURONEXT", Region::Eu),
    // Asia-Pacific
    ("XTKS", Region::Asia),
    ("XHKG", Region::Asia),
    ("XSHG", Region::Asia),
    ("XSHE", Region::Asia),
    ("XKRX", Region::Asia),
    ("XTAI", Region::Asia),
    ("XSES", Region::Asia),
    ("XBOM", Region::Asia),
    ("XNSE", Region::Asia),
    ("XASX", Region::Asia),
    ("TSE", Region::Asia),
    ("HKEX", Region::Asia),
    // Russia
    ("MISX", Region::Russia),
    ("MOEX", Region::Russia),
    ("RTSX", Region::Russia),
    // Middle East
    ("XTAE", Region::MiddleEast),
    ("XSAU", Region::MiddleEast),
    ("XDFM", Region::MiddleEast),
    ("XADS", Region::MiddleEast),
    ("DSMD", Region::MiddleEast),
    ("XKUW", Region::MiddleEast),
    // Central Asia
    ("XKAZ", Region::CentralAsia),
    ("AIXK", Region::CentralAsia),
    ("XUZB", Region::CentralAsia),
];

lazy_static! {
    static ref BUILTIN: RegionCatalog = RegionCatalog::new(
        MARKET_CODES
            .iter()
            .map(|(code, region)| (code.to_string(), *region))
            .collect(),
        vec![
            KnownIndex::new("^GSPC", "S&P 500", "XNYS", Region::Us, IndexKind::Price),
            KnownIndex::new("^DJI", "Dow Jones Industrial Average", "XNYS", Region::Us, IndexKind::Price),
            KnownIndex::new("^IXIC", "NASDAQ Composite", "XNAS", Region::Us, IndexKind::Price),
            KnownIndex::new("^VIX", "CBOE Volatility Index", "XNYS", Region::Us, IndexKind::Volatility),
            KnownIndex::new("^STOXX50E", "Euro Stoxx 50", "XSTX", Region::Eu, IndexKind::Price),
            KnownIndex::new("^GDAXI", "DAX", "XETR", Region::Eu, IndexKind::Price),
            KnownIndex::new("^FTSE", "FTSE 100", "XLON", Region::Eu, IndexKind::Price),
            KnownIndex::new("^FCHI", "CAC 40", "XPAR", Region::Eu, IndexKind::Price),
            KnownIndex::new("^V2TX", "VSTOXX", "XSTX", Region::Eu, IndexKind::Volatility),
            KnownIndex::new("^N225", "Nikkei 225", "XTKS", Region::Asia, IndexKind::Price),
            KnownIndex::new("^HSI", "Hang Seng", "XHKG", Region::Asia, IndexKind::Price),
            KnownIndex::new("000001.SS", "SSE Composite", "XSHG", Region::Asia, IndexKind::Price),
            KnownIndex::new("^KS11", "KOSPI", "XKRX", Region::Asia, IndexKind::Price),
        ],
    );
}

impl RegionCatalog {
    /// Build a catalog from explicit mappings
    pub fn new(market_codes: HashMap<String, Region>, indices: Vec<KnownIndex>) -> Self {
        let market_codes = market_codes
            .into_iter()
            .map(|(code, region)| (code.to_ascii_uppercase(), region))
            .collect();

        Self {
            inner: Arc::new(CatalogData {
                market_codes,
                indices,
            }),
        }
    }

    /// The process-wide built-in catalog
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Resolve a market code to its region (case-insensitive, unmapped => Unknown)
    pub fn region_for_market(&self, market_code: &str) -> Region {
        self.inner
            .market_codes
            .get(&market_code.trim().to_ascii_uppercase())
            .copied()
            .unwrap_or(Region::Unknown)
    }

    /// Whether a region has dedicated indices in this catalog
    pub fn region_has_indices(&self, region: Region) -> bool {
        region.has_indices()
    }

    /// PRICE-kind indices for a region
    pub fn price_indices(&self, region: Region) -> Vec<KnownIndex> {
        self.inner
            .indices
            .iter()
            .filter(|idx| idx.region == region && idx.kind == IndexKind::Price)
            .cloned()
            .collect()
    }

    /// All known indices
    pub fn indices(&self) -> &[KnownIndex] {
        &self.inner.indices
    }

    /// Snapshot restricted to the given enabled symbols
    pub fn with_enabled_symbols(&self, enabled: &HashSet<String>) -> Self {
        let indices = self
            .inner
            .indices
            .iter()
            .filter(|idx| enabled.contains(&idx.symbol))
            .cloned()
            .collect();

        Self {
            inner: Arc::new(CatalogData {
                market_codes: self.inner.market_codes.clone(),
                indices,
            }),
        }
    }
}

impl Default for RegionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
