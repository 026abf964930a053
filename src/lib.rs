pub mod config;
pub mod error;
pub mod interfaces;
pub mod observability;
pub mod price_infra;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{Error, FetchError, Result};
