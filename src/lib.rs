//! Live process-memory inspection and search engine.
//!
//! Enumerates the mapped regions of a running process, scans them for
//! values matching caller-supplied criteria, and streams compact
//! fixed-stride result sets back through a progress listener while the
//! scan is running. Supports direct value searches and multi-level
//! pointer-chain ("indirect") searches whose results can be re-walked and
//! re-resolved after the target relaunches.
//!
//! # Architecture
//!
//! - `region`: region model — enumeration from /proc and pure filtering
//! - `results`: result-set encoding and the `SearchResults` aggregate
//! - `progress`: the push-based progress protocol
//! - `params`: immutable search configuration
//! - `scan`: direct and indirect drivers plus the async `ScanManager`
//! - `core`: the external memory access capability seam
//!
//! Physical memory access is not implemented here; callers supply a
//! [`MemoryAccess`] implementation and the drivers go through it.

pub mod core;
pub mod error;
pub mod params;
pub mod progress;
pub mod region;
pub mod results;
pub mod scan;

pub use crate::core::MemoryAccess;
pub use crate::error::ScanError;
pub use crate::params::{ByteOrder, DataType, OffsetComparison, Qualifier, SearchParameters, SearchType};
pub use crate::progress::{AddressType, ChannelProgressListener, NullProgressListener, ProgressEvent, ProgressUpdate, SearchProgress, SearchProgressListener};
pub use crate::region::{enumerate_regions, enumerate_regions_with_extended_info, enumerate_submap_regions, filter_regions, Protection, ProtectionMode, Region};
pub use crate::results::{indirect_stride, DecodedRecord, ResultSetWriter, ResultType, SearchResults};
pub use crate::scan::{collect_static_metadata, run_direct_search, run_indirect_search, ScanManager, StaticMetadata, ValueSearchSpec};
