use super::encoding::{read_address, read_offsets};
use crate::error::ScanError;
use crate::params::{ByteOrder, DataType};
use crate::progress::AddressType;
use log::debug;
use std::ops::ControlFlow;
use std::ops::Range;

/// Whether records are literal match addresses or pointer-chain records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Direct,
    Indirect,
}

/// A decoded record, for callers that want structure instead of raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub address: u64,
    /// Base-to-leaf offsets; empty for direct records. Always carries the
    /// full slot capacity of the producing search, zero-filled past the
    /// record's active depth.
    pub offsets: Vec<i32>,
}

/// The aggregate owning a scan pass's sealed result-set buffers.
///
/// Buffer order is discovery order. `result_type`, `data_type` and `stride`
/// are fixed at construction; buffers may later be trimmed by
/// enumerate-with-removal or extended by appending another compatible
/// instance when chaining indirection levels.
#[derive(Debug, Clone)]
pub struct SearchResults {
    result_sets: Vec<Vec<u8>>,
    result_type: ResultType,
    data_type: DataType,
    stride: u64,
    unaligned_access: bool,
    byte_order: ByteOrder,
    pointer_size: u64,
    indirect_max_levels: u16,
    // Re-resolution metadata; the three share indexing and are replaced
    // together or not at all. Index 0 is the main executable.
    header_addresses: Option<Vec<u64>>,
    total_static_segment_ranges: Option<Vec<Range<u64>>>,
    file_paths: Option<Vec<String>>,
}

impl SearchResults {
    pub fn new(
        result_sets: Vec<Vec<u8>>,
        result_type: ResultType,
        data_type: DataType,
        stride: u64,
        unaligned_access: bool,
        byte_order: ByteOrder,
        pointer_size: u64,
    ) -> Self {
        debug_assert!(stride > 0);
        debug_assert!(result_sets.iter().all(|buffer| buffer.len() as u64 % stride == 0), "result set length must be a stride multiple");
        Self {
            result_sets,
            result_type,
            data_type,
            stride,
            unaligned_access,
            byte_order,
            pointer_size,
            indirect_max_levels: 0,
            header_addresses: None,
            total_static_segment_ranges: None,
            file_paths: None,
        }
    }

    pub fn with_indirect_max_levels(mut self, levels: u16) -> Self {
        debug_assert_eq!(self.result_type, ResultType::Indirect);
        self.indirect_max_levels = levels;
        self
    }

    #[inline]
    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    #[inline]
    pub fn unaligned_access(&self) -> bool {
        self.unaligned_access
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    #[inline]
    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    #[inline]
    pub fn indirect_max_levels(&self) -> u16 {
        self.indirect_max_levels
    }

    #[inline]
    pub fn result_sets(&self) -> &[Vec<u8>] {
        &self.result_sets
    }

    #[inline]
    pub fn header_addresses(&self) -> Option<&[u64]> {
        self.header_addresses.as_deref()
    }

    #[inline]
    pub fn total_static_segment_ranges(&self) -> Option<&[Range<u64>]> {
        self.total_static_segment_ranges.as_deref()
    }

    #[inline]
    pub fn file_paths(&self) -> Option<&[String]> {
        self.file_paths.as_deref()
    }

    /// Total record count, recomputed from the buffers every time so it can
    /// never desync from the actual storage.
    pub fn count(&self) -> u64 {
        self.result_sets.iter().map(|buffer| buffer.len() as u64 / self.stride).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.result_sets.iter().all(Vec::is_empty)
    }

    /// Walk up to `count` records in buffer order, then record order within
    /// each buffer. The callback receives the raw record bytes and steers
    /// with `ControlFlow`; `Break` stops immediately and leaves unvisited
    /// records untouched.
    ///
    /// With `remove_results`, every record handed to the callback is
    /// dropped from storage afterwards (front-to-back compaction), so the
    /// next enumeration starts at the remainder. This is the narrowing
    /// primitive: a secondary filter pass re-appends survivors elsewhere
    /// and never duplicates the whole result set.
    pub fn enumerate<F>(&mut self, count: u64, remove_results: bool, mut callback: F)
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let limit = count.min(self.count());
        let stride = self.stride as usize;
        let mut visited: u64 = 0;

        'outer: for buffer in &self.result_sets {
            for record in buffer.chunks_exact(stride) {
                if visited >= limit {
                    break 'outer;
                }
                visited += 1;
                if callback(record).is_break() {
                    break 'outer;
                }
            }
        }

        if remove_results && visited > 0 {
            self.drop_front_records(visited);
        }
    }

    /// Decoded-record convenience over `enumerate`.
    pub fn enumerate_decoded<F>(&mut self, count: u64, remove_results: bool, mut callback: F)
    where
        F: FnMut(DecodedRecord) -> ControlFlow<()>,
    {
        let result_type = self.result_type;
        let pointer_size = self.pointer_size;
        let byte_order = self.byte_order;
        self.enumerate(count, remove_results, |record| {
            let address = read_address(record, pointer_size, byte_order);
            let offsets = match result_type {
                ResultType::Direct => Vec::new(),
                ResultType::Indirect => read_offsets(record, pointer_size, byte_order),
            };
            callback(DecodedRecord { address, offsets })
        })
    }

    fn drop_front_records(&mut self, mut records: u64) {
        let stride = self.stride;
        let mut whole_buffers = 0;
        for buffer in &self.result_sets {
            let in_buffer = buffer.len() as u64 / stride;
            if records >= in_buffer {
                records -= in_buffer;
                whole_buffers += 1;
            } else {
                break;
            }
        }
        if whole_buffers > 0 {
            self.result_sets.drain(..whole_buffers);
        }
        if records > 0 {
            if let Some(first) = self.result_sets.first_mut() {
                first.drain(..(records * stride) as usize);
            }
        }
    }

    fn check_append_compatible(&self, other: &SearchResults) -> Result<(), ScanError> {
        let compatible = self.result_type == ResultType::Indirect
            && other.result_type == ResultType::Indirect
            && self.data_type == other.data_type
            && self.stride == other.stride;
        if compatible {
            Ok(())
        } else {
            Err(ScanError::IncompatibleResults {
                left_type: self.result_type,
                left_data: self.data_type,
                left_stride: self.stride,
                right_type: other.result_type,
                right_data: other.data_type,
                right_stride: other.stride,
            })
        }
    }

    /// Produce a new instance whose buffer list is `self ++ other`,
    /// with `indirect_max_levels` raised to the larger operand. Used to
    /// accumulate results level-by-level in a multi-hop pointer search.
    /// Compatibility is checked before anything is copied.
    pub fn append_indirect_results(&self, other: &SearchResults) -> Result<SearchResults, ScanError> {
        self.check_append_compatible(other)?;

        let mut result_sets = Vec::with_capacity(self.result_sets.len() + other.result_sets.len());
        result_sets.extend(self.result_sets.iter().cloned());
        result_sets.extend(other.result_sets.iter().cloned());

        let mut merged = SearchResults::new(
            result_sets,
            ResultType::Indirect,
            self.data_type,
            self.stride,
            self.unaligned_access || other.unaligned_access,
            self.byte_order,
            self.pointer_size,
        )
        .with_indirect_max_levels(self.indirect_max_levels.max(other.indirect_max_levels));

        merged.header_addresses = self.header_addresses.clone();
        merged.total_static_segment_ranges = self.total_static_segment_ranges.clone();
        merged.file_paths = self.file_paths.clone();

        debug!(
            "appended indirect results: {} + {} records, max levels {}",
            self.count(),
            other.count(),
            merged.indirect_max_levels
        );
        Ok(merged)
    }

    /// Replace the re-resolution metadata atomically. The three arrays
    /// share indexing (index 0 is the main executable); a length mismatch
    /// leaves the existing metadata untouched.
    ///
    /// Called after the target process relaunched at different load
    /// addresses, so saved static-relative results can be translated to the
    /// new absolute addresses.
    pub fn update_header_addresses(
        &mut self,
        header_addresses: Vec<u64>,
        total_static_segment_ranges: Vec<Range<u64>>,
        file_paths: Vec<String>,
    ) -> Result<(), ScanError> {
        if header_addresses.len() != total_static_segment_ranges.len() || header_addresses.len() != file_paths.len() {
            return Err(ScanError::invalid_configuration(format!(
                "header metadata lengths must agree: {} headers, {} ranges, {} paths",
                header_addresses.len(),
                total_static_segment_ranges.len(),
                file_paths.len()
            )));
        }
        self.header_addresses = Some(header_addresses);
        self.total_static_segment_ranges = Some(total_static_segment_ranges);
        self.file_paths = Some(file_paths);
        Ok(())
    }

    /// Classify an absolute address against the static-segment metadata.
    pub fn classify_address(&self, address: u64) -> AddressType {
        let Some(ranges) = self.total_static_segment_ranges.as_deref() else {
            return AddressType::Regular;
        };
        match ranges.iter().position(|range| range.contains(&address)) {
            Some(0) => AddressType::StaticMainExecutable,
            Some(_) => AddressType::StaticOtherLibrary,
            None => AddressType::Regular,
        }
    }

    /// Translate an absolute address into its "library + offset" identity,
    /// stable across relaunches of the target.
    pub fn static_identity(&self, address: u64) -> Option<(usize, &str, u64)> {
        let ranges = self.total_static_segment_ranges.as_deref()?;
        let headers = self.header_addresses.as_deref()?;
        let paths = self.file_paths.as_deref()?;
        let index = ranges.iter().position(|range| range.contains(&address))?;
        Some((index, paths[index].as_str(), address - headers[index]))
    }

    /// Translate a "library + offset" identity back to an absolute address
    /// under the current header addresses.
    pub fn resolve_static(&self, index: usize, offset: u64) -> Option<u64> {
        let headers = self.header_addresses.as_deref()?;
        headers.get(index).map(|header| header + offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::results::encoding::{indirect_stride, ResultSetWriter, RESULT_SET_MAX_BYTES};

    fn direct_results(buffers: Vec<Vec<u8>>) -> SearchResults {
        SearchResults::new(buffers, ResultType::Direct, DataType::Int32, 8, false, ByteOrder::Little, 8)
    }

    fn addresses_buffer(addresses: &[u64]) -> Vec<u8> {
        let mut writer = ResultSetWriter::direct(8, ByteOrder::Little, RESULT_SET_MAX_BYTES);
        for &address in addresses {
            writer.append_match(address);
        }
        writer.finish().pop().unwrap()
    }

    #[test]
    fn count_spans_buffers() {
        let results = direct_results(vec![addresses_buffer(&[1, 2, 3]), addresses_buffer(&[4, 5])]);
        assert_eq!(results.count(), 5);
    }

    #[test]
    fn enumerate_with_removal_stop_after_two_leaves_three() {
        // Two buffers of 3 and 2 records; remove-enumerate stopping after
        // the second record leaves 3 behind.
        let mut results = direct_results(vec![addresses_buffer(&[0x10, 0x20, 0x30]), addresses_buffer(&[0x40, 0x50])]);
        assert_eq!(results.count(), 5);

        let mut seen = Vec::new();
        results.enumerate(u64::MAX, true, |record| {
            seen.push(read_address(record, 8, ByteOrder::Little));
            if seen.len() == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        });

        assert_eq!(seen, vec![0x10, 0x20]);
        assert_eq!(results.count(), 3);

        // The next enumeration starts from the remainder.
        let mut rest = Vec::new();
        results.enumerate(u64::MAX, false, |record| {
            rest.push(read_address(record, 8, ByteOrder::Little));
            ControlFlow::Continue(())
        });
        assert_eq!(rest, vec![0x30, 0x40, 0x50]);
    }

    #[test]
    fn removal_drops_whole_buffers_and_compacts_partials() {
        let mut results = direct_results(vec![addresses_buffer(&[1, 2]), addresses_buffer(&[3, 4, 5])]);
        // Visit 3: drops the first buffer entirely plus one record of the second.
        results.enumerate(3, true, |_| ControlFlow::Continue(()));
        assert_eq!(results.count(), 2);
        assert_eq!(results.result_sets().len(), 1);
    }

    #[test]
    fn count_limit_caps_enumeration_without_removal_side_effects() {
        let mut results = direct_results(vec![addresses_buffer(&[1, 2, 3])]);
        let mut visited = 0;
        results.enumerate(2, false, |_| {
            visited += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(visited, 2);
        assert_eq!(results.count(), 3);
    }

    #[test]
    fn count_matches_full_enumeration_after_mixed_operations() {
        let mut results = direct_results(vec![addresses_buffer(&[1, 2, 3]), addresses_buffer(&[4, 5, 6, 7])]);
        results.enumerate(2, true, |_| ControlFlow::Continue(()));
        results.enumerate(1, true, |_| ControlFlow::Continue(()));

        let mut retrievable = 0u64;
        results.enumerate(u64::MAX, false, |_| {
            retrievable += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(results.count(), retrievable);
        assert_eq!(retrievable, 4);
    }

    fn indirect_results(levels: u16, chains: &[(u64, Vec<i32>)]) -> SearchResults {
        let mut writer = ResultSetWriter::indirect(levels, 8, ByteOrder::Little, RESULT_SET_MAX_BYTES);
        for (address, offsets) in chains {
            writer.append_indirect_match(*address, offsets);
        }
        SearchResults::new(
            writer.finish(),
            ResultType::Indirect,
            DataType::Int32,
            indirect_stride(levels, 8),
            false,
            ByteOrder::Little,
            8,
        )
        .with_indirect_max_levels(levels)
    }

    #[test]
    fn indirect_merge_keeps_every_record_and_takes_max_levels() {
        let left = indirect_results(3, &[(0x1000, vec![0x10]), (0x2000, vec![0x20, 0x28])]);
        // Same stride: both writers were sized for 3 levels.
        let right = indirect_results(3, &[(0x3000, vec![0x30, 0x38, 0x40])]).with_indirect_max_levels(2);

        let mut merged = left.append_indirect_results(&right).unwrap();
        assert_eq!(merged.count(), left.count() + right.count());
        assert_eq!(merged.indirect_max_levels(), 3);

        let mut addresses = Vec::new();
        merged.enumerate_decoded(u64::MAX, false, |record| {
            addresses.push(record.address);
            ControlFlow::Continue(())
        });
        assert_eq!(addresses, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn merge_rejects_mismatched_result_type() {
        let indirect = indirect_results(1, &[(0x1000, vec![0x10])]);
        let direct = direct_results(vec![addresses_buffer(&[0x2000])]);
        let err = indirect.append_indirect_results(&direct).unwrap_err();
        assert!(matches!(err, ScanError::IncompatibleResults { .. }));
        // Operands untouched.
        assert_eq!(indirect.count(), 1);
        assert_eq!(direct.count(), 1);
    }

    #[test]
    fn merge_rejects_mismatched_data_type_even_with_equal_stride() {
        let mut writer = ResultSetWriter::indirect(2, 8, ByteOrder::Little, RESULT_SET_MAX_BYTES);
        writer.append_indirect_match(0x1000, &[8, 16]);
        let float_results = SearchResults::new(
            writer.finish(),
            ResultType::Indirect,
            DataType::Float,
            indirect_stride(2, 8),
            false,
            ByteOrder::Little,
            8,
        );
        let int_results = indirect_results(2, &[(0x2000, vec![4, 12])]);
        assert_eq!(float_results.stride(), int_results.stride());
        assert!(matches!(
            int_results.append_indirect_results(&float_results),
            Err(ScanError::IncompatibleResults { .. })
        ));
    }

    #[test]
    fn merge_rejects_mismatched_stride() {
        let shallow = indirect_results(1, &[(0x1000, vec![0x10])]);
        let deep = indirect_results(4, &[(0x2000, vec![0x10, 0x18])]);
        assert!(matches!(shallow.append_indirect_results(&deep), Err(ScanError::IncompatibleResults { .. })));
    }

    #[test]
    fn header_metadata_is_atomic_and_classifies() {
        let mut results = direct_results(vec![addresses_buffer(&[0x1000])]);
        assert_eq!(results.classify_address(0x4000_0010), AddressType::Regular);

        let err = results.update_header_addresses(vec![0x4000_0000], vec![0x4000_0000..0x4001_0000], vec![]);
        assert!(matches!(err, Err(ScanError::InvalidConfiguration(_))));
        assert!(results.header_addresses().is_none());

        results
            .update_header_addresses(
                vec![0x4000_0000, 0x7f00_0000],
                vec![0x4000_0000..0x4001_0000, 0x7f00_0000..0x7f10_0000],
                vec!["/opt/game/game".to_string(), "/usr/lib/libc.so.6".to_string()],
            )
            .unwrap();

        assert_eq!(results.classify_address(0x4000_0010), AddressType::StaticMainExecutable);
        assert_eq!(results.classify_address(0x7f00_0abc), AddressType::StaticOtherLibrary);
        assert_eq!(results.classify_address(0x9000_0000), AddressType::Regular);

        let (index, path, offset) = results.static_identity(0x7f00_0abc).unwrap();
        assert_eq!(index, 1);
        assert_eq!(path, "/usr/lib/libc.so.6");
        assert_eq!(offset, 0xabc);
        assert_eq!(results.resolve_static(index, offset), Some(0x7f00_0abc));
    }
}
