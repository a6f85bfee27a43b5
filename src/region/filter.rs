//! Pure region filtering. No I/O; deterministic and idempotent, so a
//! narrowed re-filter with the same predicate is a no-op.

use super::types::{ProtectionMode, Region};
use once_cell::sync::Lazy;
use std::ops::Range;

/// Path prefixes treated as system libraries when excluding static data.
static SYSTEM_LIBRARY_PREFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "/usr/lib",
        "/usr/lib64",
        "/lib",
        "/lib64",
        "/system/lib",
        "/system/lib64",
        "/apex/",
        "/vendor/lib",
        "/vendor/lib64",
    ]
});

pub fn is_system_library_path(path: &str) -> bool {
    SYSTEM_LIBRARY_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Whether `address` falls inside a static segment attributed to a system
/// library. `ranges` and `file_paths` share indexing.
fn in_system_library_static_range(address: u64, ranges: &[Range<u64>], file_paths: &[String]) -> bool {
    ranges
        .iter()
        .zip(file_paths.iter())
        .any(|(range, path)| range.contains(&address) && is_system_library_path(path))
}

/// Filter an enumerated region list down to what a scan should touch.
///
/// Applied in order: address-bound intersection (whole-region keep/drop,
/// partially overlapping regions are kept, never split), protection-mode
/// superset match, shared-memory exclusion, heap/stack exclusion, and
/// system-library static-data exclusion. Order-preserving.
#[allow(clippy::too_many_arguments)]
pub fn filter_regions(
    regions: Vec<Region>,
    begin_address: u64,
    end_address: u64,
    protection_mode: ProtectionMode,
    include_shared_memory: bool,
    filter_heap_and_stack_data: bool,
    total_static_segment_ranges: Option<&[Range<u64>]>,
    exclude_static_data_from_system_libraries: bool,
    file_paths: Option<&[String]>,
) -> Vec<Region> {
    regions
        .into_iter()
        .filter(|region| region.intersects(begin_address, end_address))
        .filter(|region| protection_mode.admits(region.protection()))
        .filter(|region| include_shared_memory || !region.is_shared())
        .filter(|region| !filter_heap_and_stack_data || !region.is_heap_or_stack())
        .filter(|region| {
            if !exclude_static_data_from_system_libraries {
                return true;
            }
            match (total_static_segment_ranges, file_paths) {
                (Some(ranges), Some(paths)) => !in_system_library_static_range(region.address(), ranges, paths),
                _ => true,
            }
        })
        .collect()
}
