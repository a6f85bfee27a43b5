//! Region enumeration from /proc.
//!
//! `/proc/<pid>/maps` is the bulk point-in-time query; `smaps` carries the
//! finer-grained per-mapping detail (sharing counters) used to refine
//! classification. A process can have thousands of mappings, so parsing
//! reuses one line buffer and allocates per region only what it keeps.

use super::types::{user_tags, Protection, Region};
use crate::error::ScanError;
use itertools::Itertools;
use log::{debug, log_enabled, warn, Level};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};

fn maps_io_error(pid: i32, err: std::io::Error) -> ScanError {
    match err.kind() {
        ErrorKind::NotFound => ScanError::process_access(pid, "process not found"),
        ErrorKind::PermissionDenied => ScanError::process_access(pid, "access denied"),
        _ => ScanError::process_access(pid, err.to_string()),
    }
}

fn classify_tag(path: &str, shared: bool) -> u32 {
    if path == "[heap]" {
        user_tags::HEAP
    } else if path == "[stack]" || path.starts_with("[stack:") {
        user_tags::STACK
    } else if shared {
        user_tags::SHARED
    } else if path.is_empty() {
        user_tags::ANON
    } else {
        user_tags::MAPPED_FILE
    }
}

fn is_shared_path(path: &str) -> bool {
    path.starts_with("/dev/shm/") || path.starts_with("/dev/ashmem") || path.starts_with("/memfd:") || path.starts_with("/SYSV")
}

/// Parse one maps/smaps header line:
/// `start-end perms offset dev inode      pathname`
fn parse_maps_line(line: &str) -> Option<(u64, u64, Protection, bool, &str)> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;

    let (start_str, end_str) = range.split_once('-')?;
    let start = u64::from_str_radix(start_str, 16).ok()?;
    let end = u64::from_str_radix(end_str, 16).ok()?;
    if end <= start {
        return None;
    }

    let mut perm_chars = perms.chars();
    let mut protection = Protection::empty();
    if perm_chars.next()? == 'r' {
        protection |= Protection::READ;
    }
    if perm_chars.next()? == 'w' {
        protection |= Protection::WRITE;
    }
    if perm_chars.next()? == 'x' {
        protection |= Protection::EXECUTE;
    }
    let shared = perm_chars.next()? == 's';

    // offset, dev, inode are not kept
    let path = line.split_whitespace().nth(5).unwrap_or("");

    Some((start, end, protection, shared, path))
}

fn build_region(start: u64, end: u64, protection: Protection, shared: bool, path: &str, keep_path: bool) -> Region {
    let shared = shared || is_shared_path(path);
    let tag = classify_tag(path, shared);
    let path = if keep_path && !path.is_empty() && !path.starts_with('[') {
        Some(path.to_string())
    } else {
        None
    };
    Region::new(start, end - start, protection, tag).with_shared(shared).with_path(path)
}

fn read_maps(pid: i32, keep_path: bool) -> Result<Vec<Region>, ScanError> {
    let file = File::open(format!("/proc/{}/maps", pid)).map_err(|e| maps_io_error(pid, e))?;
    let mut reader = BufReader::new(file);
    let mut regions = Vec::with_capacity(256);
    let mut line = String::with_capacity(256);

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(|e| maps_io_error(pid, e))?;
        if n == 0 {
            break;
        }
        match parse_maps_line(line.trim_end()) {
            Some((start, end, protection, shared, path)) => {
                regions.push(build_region(start, end, protection, shared, path, keep_path));
            },
            None => {
                if log_enabled!(Level::Debug) {
                    warn!("unparseable maps line for pid {}: {:?}", pid, line.trim_end());
                }
            },
        }
    }

    debug_assert!(regions.windows(2).all(|w| w[0].end() <= w[1].address()), "maps regions must be ordered and disjoint");

    Ok(regions)
}

/// Enumerate all mapped segments of `pid`, address-ordered and
/// non-overlapping. Snapshot at a point in time; a racing munmap simply
/// shows up as a later read failure on that region.
pub fn enumerate_regions(pid: i32) -> Result<Vec<Region>, ScanError> {
    let regions = read_maps(pid, false)?;
    if log_enabled!(Level::Debug) {
        debug!("enumerated {} regions for pid {}", regions.len(), pid);
    }
    Ok(regions)
}

/// Enumerate with the owning image path resolved per region. More expensive
/// (per-region path allocation); used only when static-segment
/// classification is requested.
pub fn enumerate_regions_with_extended_info(pid: i32) -> Result<Vec<Region>, ScanError> {
    read_maps(pid, true)
}

/// Path of the main executable image, used to tell "static main executable"
/// from "static other library" when classifying result addresses.
pub fn main_executable_path(pid: i32) -> Result<String, ScanError> {
    let path = std::fs::read_link(format!("/proc/{}/exe", pid)).map_err(|e| maps_io_error(pid, e))?;
    Ok(path.to_string_lossy().into_owned())
}

/// Enumerate finer-grained sub-mappings from `/proc/<pid>/smaps`,
/// optionally clipped to `parent`. smaps repeats the maps header per
/// mapping and adds sharing counters; a mapping with shared resident pages
/// is reclassified as shared even when its perms say private.
///
/// Adjacent sub-mappings with identical protection, tag and sharing are
/// coalesced, since smaps granularity can be finer than the caller needs.
pub fn enumerate_submap_regions(pid: i32, parent: Option<&Region>) -> Result<Vec<Region>, ScanError> {
    let file = File::open(format!("/proc/{}/smaps", pid)).map_err(|e| maps_io_error(pid, e))?;
    let mut reader = BufReader::new(file);
    let mut line = String::with_capacity(256);

    struct PendingEntry {
        start: u64,
        end: u64,
        protection: Protection,
        shared: bool,
        path: String,
    }

    let mut entries: Vec<PendingEntry> = Vec::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(|e| maps_io_error(pid, e))?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim_end();

        if let Some((start, end, protection, shared, path)) = parse_maps_line(trimmed) {
            // Header lines contain a dash range; attribute lines ("Rss: ...")
            // never parse as one.
            entries.push(PendingEntry {
                start,
                end,
                protection,
                shared,
                path: path.to_string(),
            });
        } else if let Some(entry) = entries.last_mut() {
            // Sharing counters refine the classification of the entry they
            // follow.
            if let Some(rest) = trimmed.strip_prefix("Shared_Clean:").or_else(|| trimmed.strip_prefix("Shared_Dirty:")) {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0);
                if kb > 0 {
                    entry.shared = true;
                }
            }
        }
    }

    let regions = entries
        .into_iter()
        .filter(|e| match parent {
            Some(p) => e.end > p.address() && e.start < p.end(),
            None => true,
        })
        .map(|e| build_region(e.start, e.end, e.protection, e.shared, &e.path, true))
        .coalesce(|a, b| {
            let contiguous = a.end() == b.address();
            let same_class = a.protection() == b.protection() && a.user_tag() == b.user_tag() && a.is_shared() == b.is_shared() && a.path() == b.path();
            if contiguous && same_class {
                Ok(Region::new(a.address(), b.end() - a.address(), a.protection(), a.user_tag())
                    .with_shared(a.is_shared())
                    .with_path(a.path().map(str::to_string)))
            } else {
                Err((a, b))
            }
        })
        .collect();

    Ok(regions)
}
