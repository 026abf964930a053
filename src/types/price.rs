use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use std::fmt;

/// Energy price in currency per kWh, fixed at 3 decimal places.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const DECIMALS: u32 = 3;

    const KWH_PER_MWH: i64 = 1000;

    pub fn new(value: Decimal) -> Self {
        Price(value.round_dp(Self::DECIMALS))
    }

    /// Converts a wholesale price quoted per MWh.
    pub fn from_per_mwh(value: Decimal) -> Self {
        Self::new(value / Decimal::from(Self::KWH_PER_MWH))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
