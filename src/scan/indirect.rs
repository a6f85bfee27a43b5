//! Indirect (pointer-chain) search driver.
//!
//! Two phases, the same shape a pointer scanner always has:
//! 1. sweep the address-protection-filtered regions for anything that looks
//!    like a pointer into mapped memory, building a value-sorted table;
//! 2. walk levels outward from the target address, admitting per-level
//!    offsets under the configured comparison policy and accumulating each
//!    level's matches into the growing result set.
//!
//! Every record is allocated at the search's configured maximum level, so
//! all buffers of one search share a stride and level results can be merged
//! with `append_indirect_results`.

use super::driver::StaticMetadata;
use crate::core::MemoryAccess;
use crate::error::ScanError;
use crate::params::{ByteOrder, OffsetComparison, SearchParameters, SearchType};
use crate::progress::{AddressType, ProgressUpdate, SearchProgress, SearchProgressListener};
use crate::region::{enumerate_regions_with_extended_info, filter_regions, Region};
use crate::results::{indirect_stride, ResultSetWriter, ResultType, SearchResults, RESULT_SET_MAX_BYTES};
use log::{debug, log_enabled, warn, Level};
use rayon::prelude::*;

/// 每层最大候选数，防止内存爆炸
const MAX_CANDIDATES_PER_LEVEL: usize = 1_000_000;

/// One discovered pointer: the address it lives at and the address it
/// holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PointerEntry {
    address: u64,
    value: u64,
}

/// A frontier node of the level walk: a pointer address together with the
/// base-to-leaf offset chain that reaches the original target from it.
#[derive(Debug, Clone)]
struct ChainNode {
    address: u64,
    offsets: Vec<i32>,
}

#[inline]
fn read_pointer_value(window: &[u8], pointer_size: u64, byte_order: ByteOrder) -> u64 {
    // Native little-endian 8-byte loads dominate; bytemuck does the
    // unaligned pod read, everything else goes through the generic decoder.
    if pointer_size == 8 && byte_order == ByteOrder::Little && cfg!(target_endian = "little") {
        bytemuck::pod_read_unaligned::<u64>(&window[..8])
    } else {
        crate::results::read_address(window, pointer_size, byte_order)
    }
}

/// Phase 1: collect every aligned value in the candidate regions that
/// points into mapped memory. Returns the table sorted by pointee value.
fn build_pointer_table<M: MemoryAccess>(
    memory: &M,
    regions: &[Region],
    params: &SearchParameters,
    progress: &SearchProgress,
) -> Vec<PointerEntry> {
    let pointer_size = params.pointer_size;
    let alignment = if params.ignore_data_alignment { 1 } else { pointer_size };

    // A pointee is plausible when it lands inside any mapped region; the
    // sorted starts/ends let the hot loop do one binary search per value.
    let starts: Vec<u64> = regions.iter().map(Region::address).collect();
    let ends: Vec<u64> = regions.iter().map(Region::end).collect();
    let is_mapped = |value: u64| -> bool {
        let index = starts.partition_point(|&start| start <= value);
        index > 0 && value < ends[index - 1]
    };

    let mut table: Vec<PointerEntry> = regions
        .par_iter()
        .filter_map(|region| {
            if progress.is_cancel_requested() {
                return None;
            }

            let bytes = match memory.read_snapshot(region.address(), region.size() as usize) {
                Ok(bytes) => bytes,
                Err(error) => {
                    if log_enabled!(Level::Debug) {
                        warn!("pointer sweep read failed for region 0x{:X}: {}", region.address(), error);
                    }
                    progress.advance(1, 0);
                    return Some(Vec::new());
                },
            };

            let active = region.clone().with_bytes(bytes);
            let mut entries = Vec::new();
            if let Some(haystack) = active.bytes() {
                let mut position = 0usize;
                while position + pointer_size as usize <= haystack.len() {
                    let value = read_pointer_value(&haystack[position..position + pointer_size as usize], pointer_size, params.byte_order);
                    if value != 0 && is_mapped(value) {
                        entries.push(PointerEntry {
                            address: region.address() + position as u64,
                            value,
                        });
                    }
                    position += alignment as usize;
                }
            }
            progress.advance(1, 0);
            Some(entries)
        })
        .reduce(Vec::new, |mut a, mut b| {
            a.append(&mut b);
            a
        });

    table.sort_unstable_by_key(|entry| entry.value);
    table
}

/// Pointers whose value lands in the admission window around `target`.
fn pointers_reaching<'t>(table: &'t [PointerEntry], target: u64, params: &SearchParameters) -> impl Iterator<Item = (&'t PointerEntry, i64)> {
    let max_offset = params.indirect_max_offset;
    let same_offset = params.indirect_same_offset;
    let comparison = params.indirect_offset_comparison;

    // offset = target - value; the policy's admission window translates to
    // a contiguous value window, so two partition points bound the scan.
    let (low, high) = match comparison {
        OffsetComparison::Max => (target.saturating_sub(max_offset.max(0) as u64), target),
        OffsetComparison::Same => {
            let value = target.wrapping_sub(same_offset as u64);
            (value, value)
        },
        OffsetComparison::AbsoluteMax => (
            target.saturating_sub(max_offset.max(0) as u64),
            target.saturating_add(max_offset.max(0) as u64),
        ),
    };

    let from = table.partition_point(|entry| entry.value < low);
    let to = table.partition_point(|entry| entry.value <= high);

    table[from..to].iter().filter_map(move |entry| {
        let offset = target.wrapping_sub(entry.value) as i64;
        comparison.admits(offset, max_offset, same_offset).then_some((entry, offset))
    })
}

/// Run an indirect search for pointer chains that reach `target_address`.
///
/// Partial results are returned on cancellation: levels completed before
/// the flag was observed are kept, deeper levels are simply not explored.
pub fn run_indirect_search<M: MemoryAccess>(
    memory: &M,
    pid: i32,
    params: &SearchParameters,
    target_address: u64,
    progress: &SearchProgress,
    listener: &(dyn SearchProgressListener),
) -> Result<SearchResults, ScanError> {
    let all_regions = enumerate_regions_with_extended_info(pid)?;
    let static_metadata = super::driver::collect_static_metadata(pid)?;

    let static_ranges = static_metadata.ranges.clone();
    let candidate_regions = filter_regions(
        all_regions,
        params.begin_address,
        params.end_address,
        params.address_protection_mode,
        params.include_shared_memory,
        params.indirect_filter_heap_and_stack_data,
        Some(&static_ranges),
        params.indirect_exclude_static_data_from_system_libraries,
        Some(&static_metadata.file_paths),
    );

    run_indirect_search_over_regions(memory, candidate_regions, &static_metadata, params, target_address, progress, listener)
}

/// Search body over an already filtered candidate-region list. Split out
/// so callers with their own region source (and the tests) can drive it
/// directly.
pub fn run_indirect_search_over_regions<M: MemoryAccess>(
    memory: &M,
    candidate_regions: Vec<Region>,
    static_metadata: &StaticMetadata,
    params: &SearchParameters,
    target_address: u64,
    progress: &SearchProgress,
    listener: &(dyn SearchProgressListener),
) -> Result<SearchResults, ScanError> {
    params.validate()?;
    if params.search_type != SearchType::Address {
        return Err(ScanError::invalid_configuration("indirect search requires an address search type"));
    }

    let max_levels = params.indirect_max_levels;
    let stride = indirect_stride(max_levels, params.pointer_size);

    progress.begin(candidate_regions.len() as u64 + max_levels as u64);
    listener.progress_will_begin(progress);

    let table = build_pointer_table(memory, &candidate_regions, params, progress);

    if log_enabled!(Level::Debug) {
        debug!(
            "indirect search: target=0x{:X}, {} candidate regions, {} pointers, max levels {}",
            target_address,
            candidate_regions.len(),
            table.len(),
            max_levels
        );
    }

    let mut total = SearchResults::new(
        Vec::new(),
        ResultType::Indirect,
        params.data_type,
        stride,
        params.ignore_data_alignment,
        params.byte_order,
        params.pointer_size,
    );

    // Frontier of the previous level; level 0 is the target itself with an
    // empty chain.
    let mut frontier = vec![ChainNode {
        address: target_address,
        offsets: Vec::new(),
    }];

    for level in 1..=max_levels {
        if progress.is_cancel_requested() {
            debug!("indirect search cancelled at level {}", level);
            break;
        }

        let mut writer = ResultSetWriter::indirect(max_levels, params.pointer_size, params.byte_order, RESULT_SET_MAX_BYTES);
        let mut next_frontier: Vec<ChainNode> = Vec::new();

        for node in &frontier {
            for (entry, offset) in pointers_reaching(&table, node.address, params) {
                let mut offsets = Vec::with_capacity(node.offsets.len() + 1);
                offsets.push(offset as i32);
                offsets.extend_from_slice(&node.offsets);

                writer.append_indirect_match(entry.address, &offsets);

                // A chain rooted in a static segment is already stable;
                // extending it further only adds noise.
                let is_static = static_metadata.contains(entry.address);
                if !(params.indirect_stop_at_static_addresses && is_static) {
                    next_frontier.push(ChainNode {
                        address: entry.address,
                        offsets,
                    });
                }
            }
        }

        let found = writer.record_count();
        let buffers = writer.finish();
        progress.advance(1, found);

        if !buffers.is_empty() {
            listener.progress_advanced(
                progress,
                ProgressUpdate {
                    total_result_set_length: buffers.iter().map(Vec::len).sum(),
                    result_sets: buffers.clone(),
                    result_type: ResultType::Indirect,
                    data_type: params.data_type,
                    address_type: AddressType::Regular,
                    stride,
                    header_addresses: Some(static_metadata.header_addresses.clone()),
                },
            );
        }

        let level_results = SearchResults::new(
            buffers,
            ResultType::Indirect,
            params.data_type,
            stride,
            params.ignore_data_alignment,
            params.byte_order,
            params.pointer_size,
        )
        .with_indirect_max_levels(level);

        total = total.append_indirect_results(&level_results)?;

        if next_frontier.is_empty() {
            break;
        }

        // Dedup by address: one representative chain per base is enough to
        // seed the next level, and the earliest found is the shortest.
        next_frontier.sort_by_key(|node| node.address);
        next_frontier.dedup_by_key(|node| node.address);

        if next_frontier.len() > MAX_CANDIDATES_PER_LEVEL {
            warn!(
                "pruning level {} frontier from {} to {} candidates",
                level,
                next_frontier.len(),
                MAX_CANDIDATES_PER_LEVEL
            );
            next_frontier.truncate(MAX_CANDIDATES_PER_LEVEL);
        }

        frontier = next_frontier;
    }

    total.update_header_addresses(
        static_metadata.header_addresses.clone(),
        static_metadata.ranges.clone(),
        static_metadata.file_paths.clone(),
    )?;

    if log_enabled!(Level::Debug) {
        debug!("indirect search finished: {} chains, cancelled={}", total.count(), progress.is_cancel_requested());
    }

    Ok(total)
}
