//! Direct value search driver.
//!
//! Regions are independent, so the comparison pass runs on rayon with one
//! private result writer per region. Sealed buffers are flushed through
//! the progress listener as each region completes and all buffers are
//! merged into one `SearchResults` only after the parallel pass joins, so
//! no buffer ever has more than one writer.

use crate::core::MemoryAccess;
use crate::error::ScanError;
use crate::params::{SearchParameters, SearchType};
use crate::progress::{AddressType, ProgressUpdate, SearchProgress, SearchProgressListener};
use crate::region::{enumerate_regions, enumerate_regions_with_extended_info, filter_regions, main_executable_path, Region};
use crate::results::{ResultSetWriter, ResultType, SearchResults, RESULT_SET_MAX_BYTES};
use lazy_static::lazy_static;
use log::{debug, log_enabled, warn, Level};
use memchr::memchr_iter;
use rayon::prelude::*;
use std::ops::Range;

lazy_static! {
    pub static ref PAGE_SIZE: usize = {
        nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .filter(|&size| size > 0)
            .map(|size| size as usize)
            .unwrap_or(4096)
    };
    pub static ref PAGE_MASK: usize = !(*PAGE_SIZE - 1);
}

/// Per-read chunk size when snapshotting large regions. Regions bigger
/// than one chunk are scanned chunk by chunk so peak memory stays bounded
/// even for processes with more memory than the scanner has.
const READ_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Static-segment metadata resolved from extended region info, used to
/// classify result addresses and to stamp re-resolution metadata onto the
/// final results. Index 0 is the main executable.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    pub header_addresses: Vec<u64>,
    pub ranges: Vec<Range<u64>>,
    pub file_paths: Vec<String>,
}

impl StaticMetadata {
    pub fn classify(&self, address: u64) -> AddressType {
        match self.ranges.iter().position(|range| range.contains(&address)) {
            Some(0) => AddressType::StaticMainExecutable,
            Some(_) => AddressType::StaticOtherLibrary,
            None => AddressType::Regular,
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.ranges.iter().any(|range| range.contains(&address))
    }
}

/// Resolve the static segments of `pid` from its mapped images: one entry
/// per distinct backing file, spanning that file's lowest to highest
/// mapping, main executable first.
pub fn collect_static_metadata(pid: i32) -> Result<StaticMetadata, ScanError> {
    let regions = enumerate_regions_with_extended_info(pid)?;
    let exe_path = main_executable_path(pid)?;

    let mut metadata = StaticMetadata::default();
    for region in &regions {
        let Some(path) = region.path() else { continue };
        match metadata.file_paths.iter().position(|known| known == path) {
            Some(index) => {
                let range = &mut metadata.ranges[index];
                range.start = range.start.min(region.address());
                range.end = range.end.max(region.end());
                metadata.header_addresses[index] = metadata.header_addresses[index].min(region.address());
            },
            None => {
                metadata.file_paths.push(path.to_string());
                metadata.ranges.push(region.address()..region.end());
                metadata.header_addresses.push(region.address());
            },
        }
    }

    // Main executable goes first so classification can tell it apart from
    // other libraries by index.
    if let Some(exe_index) = metadata.file_paths.iter().position(|path| *path == exe_path) {
        if exe_index != 0 {
            metadata.file_paths.swap(0, exe_index);
            metadata.ranges.swap(0, exe_index);
            metadata.header_addresses.swap(0, exe_index);
        }
    }

    Ok(metadata)
}

/// Append every match of `candidate` positions inside `haystack` to the
/// writer. Candidate addresses are clipped to `[candidate_begin,
/// candidate_end)` so chunked region reads never report one match twice.
#[allow(clippy::too_many_arguments)]
fn scan_slice(
    haystack: &[u8],
    base_address: u64,
    candidate_begin: u64,
    candidate_end: u64,
    value_size: usize,
    alignment: u64,
    needle: Option<&[u8]>,
    matcher: &(dyn Fn(&[u8]) -> bool + Sync),
    writer: &mut ResultSetWriter,
) -> u64 {
    if haystack.len() < value_size {
        return 0;
    }
    let mut found = 0u64;

    match needle {
        // Anchored fast path: let memchr race through the haystack for the
        // first needle byte, then confirm alignment and the full needle.
        Some(needle) if !needle.is_empty() => {
            for position in memchr_iter(needle[0], &haystack[..haystack.len() - value_size + 1]) {
                let address = base_address + position as u64;
                if address % alignment != 0 || address < candidate_begin || address >= candidate_end {
                    continue;
                }
                if &haystack[position..position + value_size] == needle {
                    writer.append_match(address);
                    found += 1;
                }
            }
        },
        _ => {
            // First aligned position at or after base_address.
            let misalign = base_address % alignment;
            let mut position = if misalign == 0 { 0 } else { (alignment - misalign) as usize };
            while position + value_size <= haystack.len() {
                let address = base_address + position as u64;
                if address >= candidate_begin && address < candidate_end && matcher(&haystack[position..position + value_size]) {
                    writer.append_match(address);
                    found += 1;
                }
                position += alignment as usize;
            }
        },
    }

    found
}

/// Scan one region through the memory access capability, chunk by chunk.
/// A failed read skips the rest of the region; matches found in chunks
/// already read are kept. The snapshot lives only for the duration of the
/// comparison pass.
#[allow(clippy::too_many_arguments)]
fn scan_region<M: MemoryAccess>(
    memory: &M,
    region: &Region,
    scan_begin: u64,
    scan_end: u64,
    value_size: usize,
    alignment: u64,
    needle: Option<&[u8]>,
    matcher: &(dyn Fn(&[u8]) -> bool + Sync),
    writer: &mut ResultSetWriter,
) -> u64 {
    let begin = region.address().max(scan_begin);
    let end = region.end().min(scan_end);
    if begin >= end {
        return 0;
    }

    let mut found = 0u64;
    // 读取从页对齐地址开始，匹配窗口由候选边界裁剪
    let mut chunk_start = (begin & *PAGE_MASK as u64).max(region.address());
    while chunk_start < end {
        let chunk_end = (chunk_start + READ_CHUNK_SIZE as u64).min(end);
        // Overlap so values straddling the chunk boundary are still seen;
        // candidate clipping keeps the report unique.
        let read_end = (chunk_end + value_size as u64 - 1).min(end);
        let read_len = (read_end - chunk_start) as usize;

        let bytes = match memory.read_snapshot(chunk_start, read_len) {
            Ok(bytes) => bytes,
            Err(error) => {
                if log_enabled!(Level::Debug) {
                    warn!("read failed at 0x{:X}..0x{:X}, skipping rest of region: {}", chunk_start, read_end, error);
                }
                break;
            },
        };

        let active = region.clone().with_bytes(bytes);
        if let Some(haystack) = active.bytes() {
            found += scan_slice(haystack, chunk_start, begin.max(chunk_start), chunk_end, value_size, alignment, needle, matcher, writer);
        }
        // `active` drops here, releasing the snapshot before the next read.

        chunk_start = chunk_end;
    }

    found
}

/// Run a direct value search over `pid`.
///
/// The comparison predicate is caller-supplied: `matcher` decides whether a
/// `value_size`-byte window matches; `needle` optionally names the exact
/// byte pattern so the driver can take the anchored fast path. Fatal errors
/// (parameter validation, region enumeration) are returned synchronously
/// with no listener event; cancellation returns the partial results of the
/// regions completed so far.
#[allow(clippy::too_many_arguments)]
pub fn run_direct_search<M: MemoryAccess>(
    memory: &M,
    pid: i32,
    params: &SearchParameters,
    value_size: usize,
    needle: Option<&[u8]>,
    matcher: &(dyn Fn(&[u8]) -> bool + Sync),
    static_metadata: Option<&StaticMetadata>,
    progress: &SearchProgress,
    listener: &(dyn SearchProgressListener),
) -> Result<SearchResults, ScanError> {
    let regions = enumerate_regions(pid)?;
    let regions = filter_regions(
        regions,
        params.begin_address,
        params.end_address,
        params.value_protection_mode,
        params.include_shared_memory,
        false,
        None,
        false,
        None,
    );
    run_direct_search_over_regions(memory, regions, params, value_size, needle, matcher, static_metadata, progress, listener)
}

/// Search body over an already filtered region list. Split out so callers
/// with their own region source (and the tests) can drive it directly.
#[allow(clippy::too_many_arguments)]
pub fn run_direct_search_over_regions<M: MemoryAccess>(
    memory: &M,
    regions: Vec<Region>,
    params: &SearchParameters,
    value_size: usize,
    needle: Option<&[u8]>,
    matcher: &(dyn Fn(&[u8]) -> bool + Sync),
    static_metadata: Option<&StaticMetadata>,
    progress: &SearchProgress,
    listener: &(dyn SearchProgressListener),
) -> Result<SearchResults, ScanError> {
    params.validate()?;
    if params.search_type != SearchType::Value {
        return Err(ScanError::invalid_configuration("direct search requires a value search type"));
    }
    if value_size == 0 {
        return Err(ScanError::invalid_configuration("value size must be non-zero"));
    }

    let alignment = params.data_alignment().max(1);
    let stride = params.pointer_size;

    progress.begin(regions.len() as u64);
    listener.progress_will_begin(progress);

    if log_enabled!(Level::Debug) {
        debug!(
            "direct search: {} regions, value_size={}, alignment={}, stride={}",
            regions.len(),
            value_size,
            alignment,
            stride
        );
    }

    let region_buffers: Vec<Vec<Vec<u8>>> = regions
        .par_iter()
        .filter_map(|region| {
            // Cancellation is polled between regions, never inside one.
            if progress.is_cancel_requested() {
                return None;
            }

            let mut writer = ResultSetWriter::direct(stride, params.byte_order, RESULT_SET_MAX_BYTES);
            let found = scan_region(
                memory,
                region,
                params.begin_address,
                params.end_address,
                value_size,
                alignment,
                needle,
                matcher,
                &mut writer,
            );

            let buffers = writer.finish();
            progress.advance(1, found);

            if !buffers.is_empty() {
                let address_type = static_metadata.map_or(AddressType::Regular, |meta| meta.classify(region.address()));
                listener.progress_advanced(
                    progress,
                    ProgressUpdate {
                        total_result_set_length: buffers.iter().map(Vec::len).sum(),
                        result_sets: buffers.clone(),
                        result_type: ResultType::Direct,
                        data_type: params.data_type,
                        address_type,
                        stride,
                        header_addresses: static_metadata.map(|meta| meta.header_addresses.clone()),
                    },
                );
            }

            Some(buffers)
        })
        .collect();

    let result_sets: Vec<Vec<u8>> = region_buffers.into_iter().flatten().filter(|buffer| !buffer.is_empty()).collect();

    let mut results = SearchResults::new(
        result_sets,
        ResultType::Direct,
        params.data_type,
        stride,
        params.ignore_data_alignment,
        params.byte_order,
        params.pointer_size,
    );

    if let Some(meta) = static_metadata {
        results.update_header_addresses(meta.header_addresses.clone(), meta.ranges.clone(), meta.file_paths.clone())?;
    }

    if log_enabled!(Level::Debug) {
        debug!("direct search finished: {} results, cancelled={}", results.count(), progress.is_cancel_requested());
    }

    Ok(results)
}
