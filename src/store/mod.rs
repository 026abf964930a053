pub mod atomic;
pub mod source_cache;
pub mod fused_store;

pub use fused_store::FusedStore;
pub use source_cache::SourceCache;
