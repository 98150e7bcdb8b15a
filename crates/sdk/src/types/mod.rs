mod cut;
mod facet;

use std::fmt::Display;

use chrono::{DateTime, Utc};
pub use cut::*;
pub use facet::*;
use serde::{Deserialize, Serialize};

/// 4-byte function selector used by the proxy for routing.
pub type Selector = alloy::primitives::Selector;

/// Instant in chain history a cut was confirmed at.
#[derive(
    Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockInstant {
    block_number: u64,
    block_timestamp: u64,
}

impl BlockInstant {
    pub fn new(block_number: u64, block_timestamp: u64) -> Self {
        Self { block_number, block_timestamp }
    }

    pub fn block_number(&self) -> u64 { self.block_number }

    pub fn block_timestamp(&self) -> u64 { self.block_timestamp }
}

impl Display for BlockInstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ts = DateTime::<Utc>::from_timestamp(self.block_timestamp as i64, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d %H:%M:%S");
        if self.block_number > 0 {
            write!(f, "#{} @ {}", self.block_number, ts)
        } else {
            write!(f, "{}", ts)
        }
    }
}

/// Formats selectors as a comma separated list of hex values.
pub fn format_selectors<'a>(selectors: impl IntoIterator<Item = &'a Selector>) -> String {
    use itertools::Itertools;

    selectors.into_iter().map(|s| s.to_string()).join(", ")
}
