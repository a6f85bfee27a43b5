//! Externally-supplied search configuration consumed by the region model
//! and the scan drivers.

pub mod types;

pub use types::{ByteOrder, DataType, OffsetComparison, Qualifier, SearchParameters, SearchType};
