//! FLOW token amounts.
//!
//! Flow balances are `UFix64`: an unsigned count of 10^-8 FLOW. The access
//! API returns them as decimal strings of that integer count.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// Number of fractional digits in a `UFix64`.
const DECIMALS: u32 = 8;

/// Units per whole FLOW.
const SCALE: u64 = 10u64.pow(DECIMALS);

/// An amount of FLOW in 10^-8 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    /// Zero FLOW.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from a count of 10^-8 FLOW.
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Returns the count of 10^-8 FLOW.
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / SCALE, self.0 % SCALE)
    }
}

impl FromStr for Amount {
    type Err = Error;

    /// Parses the integer unit count used by the access API.
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| Error::Registry(format!("invalid balance {s:?}")))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_eight_decimals() {
        assert_eq!(Amount::from_units(0).to_string(), "0.00000000");
        assert_eq!(Amount::from_units(100_000_000).to_string(), "1.00000000");
        assert_eq!(Amount::from_units(123_456_789).to_string(), "1.23456789");
        assert_eq!(Amount::from_units(1).to_string(), "0.00000001");
    }

    #[test]
    fn parse_unit_count() {
        assert_eq!("100001000".parse::<Amount>().unwrap(), Amount::from_units(100_001_000));
        assert!("1.5".parse::<Amount>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let amount: Amount = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(amount.units(), 42);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"42\"");
    }
}
