//! Market Identifiers
//!
//! Value types naming what the gateway asks the brokerage for: securities,
//! feed types, candle periods, trading markets and account environments.
//!
//! Each enum carries the numeric code OpenD uses on the wire next to the tag
//! callers type, so the vendor adapter never has to guess a mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Failure to parse a caller-supplied identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketParseError {
    /// Symbol is not of the form `<MARKET>.<code>`.
    #[error("invalid symbol '{0}': expected <MARKET>.<code>, e.g. HK.00700")]
    InvalidSymbol(String),

    /// Quote market prefix is not recognised.
    #[error("unknown market: {0}")]
    UnknownMarket(String),

    /// Feed type tag is not recognised.
    #[error("unknown subscription type: {0}")]
    UnknownFeedType(String),

    /// K-line period tag is not recognised.
    #[error("unknown K-line type: {0}")]
    UnknownKlType(String),

    /// Trading market tag is not recognised.
    #[error("unknown trading market: {0}")]
    UnknownTrdMarket(String),

    /// Trading environment tag is not recognised.
    #[error("unknown trading environment: {0}")]
    UnknownTrdEnv(String),

    /// Security firm tag is not recognised.
    #[error("unknown security firm: {0}")]
    UnknownSecurityFirm(String),

    /// Security type tag is not recognised.
    #[error("unknown security type: {0}")]
    UnknownSecType(String),
}

// =============================================================================
// Quote Market
// =============================================================================

/// Quote market a security is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QotMarket {
    /// Hong Kong securities.
    Hk,
    /// US securities.
    Us,
    /// Shanghai A-shares.
    Sh,
    /// Shenzhen A-shares.
    Sz,
}

impl QotMarket {
    /// Parse the market prefix used in symbols.
    ///
    /// # Errors
    ///
    /// Returns `MarketParseError::UnknownMarket` for anything else.
    pub fn from_str_case_insensitive(s: &str) -> Result<Self, MarketParseError> {
        match s.to_uppercase().as_str() {
            "HK" => Ok(Self::Hk),
            "US" => Ok(Self::Us),
            "SH" => Ok(Self::Sh),
            "SZ" => Ok(Self::Sz),
            _ => Err(MarketParseError::UnknownMarket(s.to_string())),
        }
    }

    /// Symbol prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hk => "HK",
            Self::Us => "US",
            Self::Sh => "SH",
            Self::Sz => "SZ",
        }
    }

    /// OpenD `QotMarket` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Hk => 1,
            Self::Us => 11,
            Self::Sh => 21,
            Self::Sz => 22,
        }
    }

    /// Reverse of [`QotMarket::code`].
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Hk),
            11 => Some(Self::Us),
            21 => Some(Self::Sh),
            22 => Some(Self::Sz),
            _ => None,
        }
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Market-prefixed security identifier such as `HK.00700` or `US.AAPL`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    market: QotMarket,
    code: String,
}

impl Symbol {
    /// Create a symbol from its parts.
    #[must_use]
    pub fn new(market: QotMarket, code: impl Into<String>) -> Self {
        Self {
            market,
            code: code.into(),
        }
    }

    /// Listing market.
    #[must_use]
    pub const fn market(&self) -> QotMarket {
        self.market
    }

    /// Exchange code without the market prefix.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl FromStr for Symbol {
    type Err = MarketParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, code)) = s.trim().split_once('.') else {
            return Err(MarketParseError::InvalidSymbol(s.to_string()));
        };
        if code.is_empty() {
            return Err(MarketParseError::InvalidSymbol(s.to_string()));
        }
        let market = QotMarket::from_str_case_insensitive(prefix)?;
        Ok(Self::new(market, code))
    }
}

impl TryFrom<String> for Symbol {
    type Error = MarketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.market.as_str(), self.code)
    }
}

// =============================================================================
// K-line Type
// =============================================================================

/// Candle period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum KlType {
    /// 1 minute.
    K1m,
    /// 3 minutes.
    K3m,
    /// 5 minutes.
    K5m,
    /// 15 minutes.
    K15m,
    /// 30 minutes.
    K30m,
    /// 60 minutes.
    K60m,
    /// Daily.
    KDay,
    /// Weekly.
    KWeek,
    /// Monthly.
    KMon,
    /// Quarterly.
    KQuarter,
    /// Yearly.
    KYear,
}

impl KlType {
    /// Every supported period.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::K1m,
            Self::K3m,
            Self::K5m,
            Self::K15m,
            Self::K30m,
            Self::K60m,
            Self::KDay,
            Self::KWeek,
            Self::KMon,
            Self::KQuarter,
            Self::KYear,
        ]
    }

    /// Period tag, e.g. `K_DAY`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::K1m => "K_1M",
            Self::K3m => "K_3M",
            Self::K5m => "K_5M",
            Self::K15m => "K_15M",
            Self::K30m => "K_30M",
            Self::K60m => "K_60M",
            Self::KDay => "K_DAY",
            Self::KWeek => "K_WEEK",
            Self::KMon => "K_MON",
            Self::KQuarter => "K_QUARTER",
            Self::KYear => "K_YEAR",
        }
    }

    /// OpenD `KLType` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::K1m => 1,
            Self::KDay => 2,
            Self::KWeek => 3,
            Self::KMon => 4,
            Self::KYear => 5,
            Self::K5m => 6,
            Self::K15m => 7,
            Self::K30m => 8,
            Self::K60m => 9,
            Self::K3m => 10,
            Self::KQuarter => 11,
        }
    }

    /// Reverse of [`KlType::code`].
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::all().iter().copied().find(|k| i64::from(k.code()) == code)
    }
}

impl FromStr for KlType {
    type Err = MarketParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == upper)
            .ok_or_else(|| MarketParseError::UnknownKlType(s.to_string()))
    }
}

impl TryFrom<String> for KlType {
    type Error = MarketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KlType> for &'static str {
    fn from(kl_type: KlType) -> Self {
        kl_type.as_str()
    }
}

impl fmt::Display for KlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Feed Type
// =============================================================================

/// Real-time feed a client can subscribe to for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum FeedType {
    /// Basic quote.
    Quote,
    /// Order book depth.
    OrderBook,
    /// Tick-by-tick trades.
    Ticker,
    /// Intraday time-sharing data.
    RtData,
    /// Broker queue.
    Broker,
    /// Candles of the given period.
    Kline(KlType),
}

impl FeedType {
    /// Every supported feed type.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut all = vec![
            Self::Quote,
            Self::OrderBook,
            Self::Ticker,
            Self::RtData,
            Self::Broker,
        ];
        all.extend(KlType::all().iter().copied().map(Self::Kline));
        all
    }

    /// Subscription tag, e.g. `QUOTE` or `K_1M`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "QUOTE",
            Self::OrderBook => "ORDER_BOOK",
            Self::Ticker => "TICKER",
            Self::RtData => "RT_DATA",
            Self::Broker => "BROKER",
            Self::Kline(k) => k.as_str(),
        }
    }

    /// OpenD `SubType` code.
    #[must_use]
    pub const fn sub_type_code(&self) -> i32 {
        match self {
            Self::Quote => 1,
            Self::OrderBook => 2,
            Self::Ticker => 4,
            Self::RtData => 5,
            Self::Broker => 14,
            Self::Kline(k) => match k {
                KlType::KDay => 6,
                KlType::K5m => 7,
                KlType::K15m => 8,
                KlType::K30m => 9,
                KlType::K60m => 10,
                KlType::K1m => 11,
                KlType::KWeek => 12,
                KlType::KMon => 13,
                KlType::KQuarter => 15,
                KlType::KYear => 16,
                KlType::K3m => 17,
            },
        }
    }
}

impl FromStr for FeedType {
    type Err = MarketParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        match upper.as_str() {
            "QUOTE" => Ok(Self::Quote),
            "ORDER_BOOK" => Ok(Self::OrderBook),
            "TICKER" => Ok(Self::Ticker),
            "RT_DATA" => Ok(Self::RtData),
            "BROKER" => Ok(Self::Broker),
            other => other
                .parse::<KlType>()
                .map(Self::Kline)
                .map_err(|_| MarketParseError::UnknownFeedType(s.to_string())),
        }
    }
}

impl TryFrom<String> for FeedType {
    type Error = MarketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedType> for &'static str {
    fn from(feed: FeedType) -> Self {
        feed.as_str()
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Ordered by vendor code so `get_subscription` output is stable.
impl PartialOrd for KlType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KlType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.code().cmp(&other.code())
    }
}

// =============================================================================
// Security Type
// =============================================================================

/// Security category used when listing a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecType {
    /// Ordinary shares.
    #[default]
    Stock,
    /// Exchange-traded funds.
    Etf,
    /// Warrants.
    Warrant,
    /// Indices.
    Index,
    /// Bonds.
    Bond,
    /// Options and other derivatives.
    Drvt,
    /// Futures.
    Future,
}

impl SecType {
    /// Parse a security type tag.
    ///
    /// # Errors
    ///
    /// Returns `MarketParseError::UnknownSecType` for anything else.
    pub fn from_str_case_insensitive(s: &str) -> Result<Self, MarketParseError> {
        match s.to_uppercase().as_str() {
            "STOCK" => Ok(Self::Stock),
            "ETF" => Ok(Self::Etf),
            "WARRANT" => Ok(Self::Warrant),
            "IDX" | "INDEX" => Ok(Self::Index),
            "BOND" => Ok(Self::Bond),
            "DRVT" => Ok(Self::Drvt),
            "FUTURE" => Ok(Self::Future),
            _ => Err(MarketParseError::UnknownSecType(s.to_string())),
        }
    }

    /// OpenD `SecurityType` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Bond => 1,
            Self::Stock => 3,
            Self::Etf => 4,
            Self::Warrant => 5,
            Self::Index => 6,
            Self::Drvt => 8,
            Self::Future => 10,
        }
    }
}

// =============================================================================
// Trading Selectors
// =============================================================================

/// Market a trade session is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrdMarket {
    /// Hong Kong.
    #[default]
    Hk,
    /// United States.
    Us,
    /// China A-shares.
    Cn,
    /// Hong Kong Stock Connect.
    Hkcc,
}

impl TrdMarket {
    /// Parse a trading market tag.
    ///
    /// # Errors
    ///
    /// Returns `MarketParseError::UnknownTrdMarket` for anything else.
    pub fn from_str_case_insensitive(s: &str) -> Result<Self, MarketParseError> {
        match s.trim().to_uppercase().as_str() {
            "HK" => Ok(Self::Hk),
            "US" => Ok(Self::Us),
            "CN" => Ok(Self::Cn),
            "HKCC" => Ok(Self::Hkcc),
            _ => Err(MarketParseError::UnknownTrdMarket(s.to_string())),
        }
    }

    /// Tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hk => "HK",
            Self::Us => "US",
            Self::Cn => "CN",
            Self::Hkcc => "HKCC",
        }
    }

    /// OpenD `TrdMarket` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Hk => 1,
            Self::Us => 2,
            Self::Cn => 3,
            Self::Hkcc => 4,
        }
    }
}

/// Simulated or real-money trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrdEnv {
    /// Paper trading.
    #[default]
    Simulate,
    /// Real money.
    Real,
}

impl TrdEnv {
    /// Parse a trading environment tag.
    ///
    /// # Errors
    ///
    /// Returns `MarketParseError::UnknownTrdEnv` for anything else.
    pub fn from_str_case_insensitive(s: &str) -> Result<Self, MarketParseError> {
        match s.trim().to_uppercase().as_str() {
            "SIMULATE" | "SIM" | "PAPER" => Ok(Self::Simulate),
            "REAL" | "LIVE" => Ok(Self::Real),
            _ => Err(MarketParseError::UnknownTrdEnv(s.to_string())),
        }
    }

    /// Tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulate => "SIMULATE",
            Self::Real => "REAL",
        }
    }

    /// OpenD `TrdEnv` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Simulate => 0,
            Self::Real => 1,
        }
    }

    /// Reverse of [`TrdEnv::code`].
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Simulate),
            1 => Some(Self::Real),
            _ => None,
        }
    }
}

/// Broker entity the account is held with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityFirm {
    /// Futu Securities (Hong Kong).
    #[default]
    FutuSecurities,
    /// Moomoo Financial Inc. (US).
    FutuInc,
    /// Moomoo Financial Singapore.
    FutuSg,
    /// Moomoo Securities Australia.
    FutuAu,
}

impl SecurityFirm {
    /// Parse a security firm tag.
    ///
    /// # Errors
    ///
    /// Returns `MarketParseError::UnknownSecurityFirm` for anything else.
    pub fn from_str_case_insensitive(s: &str) -> Result<Self, MarketParseError> {
        match s.trim().to_uppercase().as_str() {
            "FUTUSECURITIES" => Ok(Self::FutuSecurities),
            "FUTUINC" => Ok(Self::FutuInc),
            "FUTUSG" => Ok(Self::FutuSg),
            "FUTUAU" => Ok(Self::FutuAu),
            _ => Err(MarketParseError::UnknownSecurityFirm(s.to_string())),
        }
    }

    /// Tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FutuSecurities => "FUTUSECURITIES",
            Self::FutuInc => "FUTUINC",
            Self::FutuSg => "FUTUSG",
            Self::FutuAu => "FUTUAU",
        }
    }

    /// OpenD `SecurityFirm` code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::FutuSecurities => 1,
            Self::FutuInc => 2,
            Self::FutuSg => 3,
            Self::FutuAu => 4,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("HK.00700", QotMarket::Hk, "00700" ; "hong kong")]
    #[test_case("us.AAPL", QotMarket::Us, "AAPL" ; "lowercase prefix")]
    #[test_case("SH.600519", QotMarket::Sh, "600519" ; "shanghai")]
    #[test_case("SZ.000001", QotMarket::Sz, "000001" ; "shenzhen")]
    #[test_case("US.BRK.B", QotMarket::Us, "BRK.B" ; "code containing a dot")]
    fn symbol_parses(input: &str, market: QotMarket, code: &str) {
        let symbol: Symbol = input.parse().unwrap();
        assert_eq!(symbol.market(), market);
        assert_eq!(symbol.code(), code);
    }

    #[test_case("00700" ; "missing prefix")]
    #[test_case("HK." ; "empty code")]
    #[test_case("XX.00700" ; "unknown market")]
    fn symbol_rejects(input: &str) {
        assert!(input.parse::<Symbol>().is_err());
    }

    #[test]
    fn symbol_display_normalises_prefix() {
        let symbol: Symbol = "hk.00700".parse().unwrap();
        assert_eq!(symbol.to_string(), "HK.00700");
    }

    #[test]
    fn symbol_serde_as_string() {
        let symbol: Symbol = serde_json::from_str("\"US.AAPL\"").unwrap();
        assert_eq!(serde_json::to_string(&symbol).unwrap(), "\"US.AAPL\"");
        assert!(serde_json::from_str::<Symbol>("\"AAPL\"").is_err());
    }

    #[test_case("QUOTE", FeedType::Quote, 1)]
    #[test_case("order_book", FeedType::OrderBook, 2)]
    #[test_case("TICKER", FeedType::Ticker, 4)]
    #[test_case("RT_DATA", FeedType::RtData, 5)]
    #[test_case("BROKER", FeedType::Broker, 14)]
    #[test_case("K_DAY", FeedType::Kline(KlType::KDay), 6)]
    #[test_case("K_1M", FeedType::Kline(KlType::K1m), 11)]
    #[test_case("K_3M", FeedType::Kline(KlType::K3m), 17)]
    fn feed_type_tags_and_codes(tag: &str, feed: FeedType, code: i32) {
        assert_eq!(tag.parse::<FeedType>().unwrap(), feed);
        assert_eq!(feed.sub_type_code(), code);
    }

    #[test]
    fn feed_type_round_trips_through_tag() {
        for feed in FeedType::all() {
            assert_eq!(feed.as_str().parse::<FeedType>().unwrap(), feed);
        }
        assert_eq!(FeedType::all().len(), 16);
    }

    #[test]
    fn feed_type_unknown_tag() {
        assert_eq!(
            "SPARKLES".parse::<FeedType>(),
            Err(MarketParseError::UnknownFeedType("SPARKLES".to_string()))
        );
    }

    #[test]
    fn kl_type_codes_are_unique() {
        let mut codes: Vec<_> = KlType::all().iter().map(KlType::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), KlType::all().len());
        assert_eq!(KlType::from_code(2), Some(KlType::KDay));
        assert_eq!(KlType::from_code(99), None);
    }

    #[test]
    fn trading_selectors_parse() {
        assert_eq!(TrdMarket::from_str_case_insensitive("us").unwrap(), TrdMarket::Us);
        assert_eq!(TrdEnv::from_str_case_insensitive("real").unwrap(), TrdEnv::Real);
        assert_eq!(
            SecurityFirm::from_str_case_insensitive("FutuSecurities").unwrap(),
            SecurityFirm::FutuSecurities
        );
        assert!(TrdMarket::from_str_case_insensitive("MARS").is_err());
        assert!(SecurityFirm::from_str_case_insensitive("ACME").is_err());
    }

    #[test]
    fn sec_type_defaults_to_stock() {
        assert_eq!(SecType::default().code(), 3);
        assert_eq!(SecType::from_str_case_insensitive("idx").unwrap(), SecType::Index);
    }
}
