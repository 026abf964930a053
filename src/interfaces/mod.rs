pub mod price_reader;

pub use price_reader::PercentReader;
