pub mod connectors;
pub mod aggregator;

pub use aggregator::{FusionEngine, FusionOutcome, FusionResult};
pub use connectors::{EntsoeConnector, PriceProvider, TibberConnector};
