pub mod fused;
pub mod hour;
pub mod price;
pub mod series;

pub use fused::{FusedRecord, DEFAULT_PERCENT};
pub use hour::HourKey;
pub use price::Price;
pub use series::{PricePoint, PriceSeries, ProviderId};
