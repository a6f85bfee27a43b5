//! Scan drivers and async coordination.
//!
//! - `driver`: direct value search over filtered regions
//! - `indirect`: pointer-chain search (pointer table + level walk)
//! - `manager`: one-scan-at-a-time async lifecycle

pub mod driver;
pub mod indirect;
pub mod manager;


pub use driver::{collect_static_metadata, run_direct_search, run_direct_search_over_regions, StaticMetadata, PAGE_MASK, PAGE_SIZE};
pub use indirect::{run_indirect_search, run_indirect_search_over_regions};
pub use manager::{ScanManager, ValueSearchSpec};
