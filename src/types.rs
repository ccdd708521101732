//! Core types: Symbol, Money, Weight, and the ids of the account hierarchy.

use std::fmt;

use rust_decimal::Decimal;

/// Monetary amount in the account currency.
///
/// Fixed-point decimal so that long replays never accumulate binary
/// floating-point drift.
pub type Money = Decimal;

/// Target percentage in `[0, 100]`.
pub type Weight = Decimal;

/// Maximum number of bytes in a [`Symbol`].
pub const SYMBOL_MAX_LEN: usize = 8;

/// Ticker symbol stored inline (no heap allocation, `Copy`).
///
/// [`Symbol::CASH`] is the reserved sentinel for the cash/unallocated
/// position. It is an ordinary key everywhere weights are summed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    bytes: [u8; SYMBOL_MAX_LEN],
    len: u8,
}

impl Symbol {
    /// The cash/unallocated position.
    pub const CASH: Symbol = Symbol::from_static("$$$");

    /// Build a symbol at compile time. Panics (at compile time when used in a
    /// const) if `s` is empty or longer than 8 bytes.
    pub const fn from_static(s: &str) -> Self {
        let src = s.as_bytes();
        assert!(!src.is_empty() && src.len() <= SYMBOL_MAX_LEN, "invalid symbol length");
        let mut bytes = [0u8; SYMBOL_MAX_LEN];
        let mut i = 0;
        while i < src.len() {
            bytes[i] = src[i];
            i += 1;
        }
        Self {
            bytes,
            len: src.len() as u8,
        }
    }

    /// Create a symbol.
    ///
    /// # Panics
    ///
    /// Panics if `s` is empty or longer than 8 bytes. Use [`Symbol::try_new`]
    /// for untrusted input.
    #[track_caller]
    pub fn new(s: &str) -> Self {
        match Self::try_new(s) {
            Some(sym) => sym,
            None => panic!("invalid symbol {s:?}: must be 1..=8 bytes"),
        }
    }

    /// Create a symbol, returning `None` if `s` is empty or too long.
    pub fn try_new(s: &str) -> Option<Self> {
        let src = s.as_bytes();
        if src.is_empty() || src.len() > SYMBOL_MAX_LEN {
            return None;
        }
        let mut bytes = [0u8; SYMBOL_MAX_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Some(Self {
            bytes,
            len: src.len() as u8,
        })
    }

    /// The symbol text.
    pub fn as_str(&self) -> &str {
        // Constructed only from &str, so the prefix is always valid UTF-8.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    /// True for the reserved cash position.
    #[inline]
    pub fn is_cash(&self) -> bool {
        *self == Self::CASH
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl std::str::FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::try_new(s).ok_or_else(|| format!("invalid symbol {s:?}: must be 1..=8 bytes"))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of a brokerage account, as assigned by the persistence layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a portfolio inside an account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PortfolioId(pub String);

impl PortfolioId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PortfolioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A child slot of an account: one of its portfolios, or the unallocated
/// remainder that stays in account cash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sleeve {
    Portfolio(PortfolioId),
    Unallocated,
}

impl fmt::Display for Sleeve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sleeve::Portfolio(id) => write!(f, "portfolio {id}"),
            Sleeve::Unallocated => f.write_str("unallocated"),
        }
    }
}

/// The level of the hierarchy an operation applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scope {
    /// Children are portfolios.
    Account(AccountId),
    /// Children are positions.
    Portfolio(PortfolioId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Account(id) => write!(f, "account {id}"),
            Scope::Portfolio(id) => write!(f, "portfolio {id}"),
        }
    }
}
