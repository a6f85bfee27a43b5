//! Result-set encoding and the search-results aggregate.

pub mod encoding;
pub mod search_results;

pub use encoding::{indirect_stride, read_address, read_offsets, write_address, ResultSetWriter, INDIRECT_OFFSET_SIZE, RESULT_SET_MAX_BYTES};
pub use search_results::{DecodedRecord, ResultType, SearchResults};
