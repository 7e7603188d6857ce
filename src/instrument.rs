use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Asset {
    BTC,
    ETH,
    USDC,
}

impl Asset {
    /// Every asset a wallet may hold, in display order.
    pub fn all() -> &'static [Asset] {
        &[Asset::BTC, Asset::ETH, Asset::USDC]
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Asset {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Asset::all()
            .iter()
            .find(|a| a.to_string() == s)
            .copied()
            .ok_or_else(|| format!("unsupported currency: `{}`", s))
    }
}

impl TryFrom<String> for Asset {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Asset> for String {
    fn from(a: Asset) -> Self {
        a.to_string()
    }
}

//A Trading pair: base/quote
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// The asset you buy or sell
    pub base: Asset,
    /// The asset you pay or receive
    pub quote: Asset,
}

/// Every tradable currency is quoted in this asset.
pub const QUOTE_ASSET: Asset = Asset::USDC;

impl Pair {
    /// Returns the usual string code, e.g "BTC-USDC"
    pub fn code(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    ///crypto-USDC factory spot pairs
    pub fn crypto_usdc(base: Asset) -> Self {
        Pair {
            base,
            quote: QUOTE_ASSET,
        }
    }

    pub fn supported() -> &'static [Pair] {
        &[BTC_USDC, ETH_USDC]
    }

    /// Resolves the book a client addresses by its base currency ("BTC").
    pub fn for_currency(currency: &str) -> Result<Pair, String> {
        let asset: Asset = currency.parse()?;
        Pair::supported()
            .iter()
            .find(|p| p.base == asset)
            .copied()
            .ok_or_else(|| format!("currency `{}` is not tradable", currency))
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for Pair {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::supported()
            .iter()
            .find(|p| p.code() == s)
            .copied()
            .ok_or_else(|| format!("unsupported symbol: `{}`", s))
    }
}

impl TryFrom<String> for Pair {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(p: Pair) -> Self {
        p.code()
    }
}

pub const BTC_USDC: Pair = Pair {
    base: Asset::BTC,
    quote: Asset::USDC,
};
pub const ETH_USDC: Pair = Pair {
    base: Asset::ETH,
    quote: Asset::USDC,
};
