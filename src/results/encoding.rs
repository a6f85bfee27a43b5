//! Fixed-stride record packing.
//!
//! Result sets are sequences of fixed-width records packed back to back in
//! byte buffers. The layout is a bit-exact contract between producer and
//! consumer within one run:
//! - direct record: the raw match address, pointer-size wide (4 or 8)
//! - indirect record: pointer-size address field followed by
//!   `max_levels` signed 32-bit offsets in base-to-leaf order
//! Endianness follows the configured byte order in both cases.

use crate::params::ByteOrder;

/// Width in bytes of one signed offset field inside an indirect record.
pub const INDIRECT_OFFSET_SIZE: u64 = 4;

/// Default maximum byte size of one result-set buffer before it is sealed
/// and a new one opened. Bounds memory growth and gives the progress
/// protocol its flushing granularity.
pub const RESULT_SET_MAX_BYTES: usize = 256 * 1024;

/// Stride of an indirect record. Pure; both the scan drivers and the
/// result consumers derive record geometry from this one function so
/// buffers stay self-describing through their stored stride.
#[inline]
pub fn indirect_stride(max_levels: u16, pointer_size: u64) -> u64 {
    pointer_size + max_levels as u64 * INDIRECT_OFFSET_SIZE
}

#[inline]
pub fn write_address(out: &mut Vec<u8>, address: u64, pointer_size: u64, byte_order: ByteOrder) {
    debug_assert!(pointer_size == 8 || address <= u32::MAX as u64, "address 0x{:X} does not fit a 4-byte pointer", address);
    match (pointer_size, byte_order) {
        (4, ByteOrder::Little) => out.extend_from_slice(&(address as u32).to_le_bytes()),
        (4, ByteOrder::Big) => out.extend_from_slice(&(address as u32).to_be_bytes()),
        (_, ByteOrder::Little) => out.extend_from_slice(&address.to_le_bytes()),
        (_, ByteOrder::Big) => out.extend_from_slice(&address.to_be_bytes()),
    }
}

#[inline]
pub fn read_address(record: &[u8], pointer_size: u64, byte_order: ByteOrder) -> u64 {
    match (pointer_size, byte_order) {
        (4, ByteOrder::Little) => u32::from_le_bytes(record[..4].try_into().unwrap()) as u64,
        (4, ByteOrder::Big) => u32::from_be_bytes(record[..4].try_into().unwrap()) as u64,
        (_, ByteOrder::Little) => u64::from_le_bytes(record[..8].try_into().unwrap()),
        (_, ByteOrder::Big) => u64::from_be_bytes(record[..8].try_into().unwrap()),
    }
}

#[inline]
fn write_offset(out: &mut Vec<u8>, offset: i32, byte_order: ByteOrder) {
    match byte_order {
        ByteOrder::Little => out.extend_from_slice(&offset.to_le_bytes()),
        ByteOrder::Big => out.extend_from_slice(&offset.to_be_bytes()),
    }
}

/// Decode the offset fields of an indirect record, base-to-leaf.
#[inline]
pub fn read_offsets(record: &[u8], pointer_size: u64, byte_order: ByteOrder) -> Vec<i32> {
    record[pointer_size as usize..]
        .chunks_exact(INDIRECT_OFFSET_SIZE as usize)
        .map(|chunk| {
            let bytes: [u8; 4] = chunk.try_into().unwrap();
            match byte_order {
                ByteOrder::Little => i32::from_le_bytes(bytes),
                ByteOrder::Big => i32::from_be_bytes(bytes),
            }
        })
        .collect()
}

/// Packs match records into bounded buffers.
///
/// One writer belongs to exactly one scan worker; buffers are sealed when
/// they reach `max_buffer_bytes` so the worker can hand them off to the
/// progress protocol without ever reallocating one unbounded buffer.
#[derive(Debug)]
pub struct ResultSetWriter {
    stride: u64,
    pointer_size: u64,
    byte_order: ByteOrder,
    /// Offset slot count of indirect records; zero for direct records.
    capacity_levels: u16,
    max_buffer_bytes: usize,
    open: Vec<u8>,
    sealed: Vec<Vec<u8>>,
}

impl ResultSetWriter {
    pub fn direct(pointer_size: u64, byte_order: ByteOrder, max_buffer_bytes: usize) -> Self {
        Self::with_stride(pointer_size, pointer_size, byte_order, 0, max_buffer_bytes)
    }

    pub fn indirect(capacity_levels: u16, pointer_size: u64, byte_order: ByteOrder, max_buffer_bytes: usize) -> Self {
        let stride = indirect_stride(capacity_levels, pointer_size);
        Self::with_stride(stride, pointer_size, byte_order, capacity_levels, max_buffer_bytes)
    }

    fn with_stride(stride: u64, pointer_size: u64, byte_order: ByteOrder, capacity_levels: u16, max_buffer_bytes: usize) -> Self {
        // Round the seal threshold down to a record boundary so buffers are
        // always exact stride multiples.
        let records_per_buffer = (max_buffer_bytes as u64 / stride).max(1);
        Self {
            stride,
            pointer_size,
            byte_order,
            capacity_levels,
            max_buffer_bytes: (records_per_buffer * stride) as usize,
            open: Vec::new(),
            sealed: Vec::new(),
        }
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Pack one direct match.
    pub fn append_match(&mut self, address: u64) {
        debug_assert_eq!(self.capacity_levels, 0, "direct append on an indirect writer");
        write_address(&mut self.open, address, self.pointer_size, self.byte_order);
        self.seal_if_full();
    }

    /// Pack one indirect match. `offsets` is base-to-leaf; unused trailing
    /// levels are zero-filled so every record of one search shares the
    /// writer's stride.
    pub fn append_indirect_match(&mut self, address: u64, offsets: &[i32]) {
        debug_assert!(offsets.len() <= self.capacity_levels as usize, "offset chain deeper than writer capacity");
        write_address(&mut self.open, address, self.pointer_size, self.byte_order);
        for &offset in offsets {
            write_offset(&mut self.open, offset, self.byte_order);
        }
        for _ in offsets.len()..self.capacity_levels as usize {
            write_offset(&mut self.open, 0, self.byte_order);
        }
        self.seal_if_full();
    }

    #[inline]
    fn seal_if_full(&mut self) {
        if self.open.len() >= self.max_buffer_bytes {
            let full = std::mem::take(&mut self.open);
            self.sealed.push(full);
        }
    }

    /// Total records across sealed and open buffers.
    pub fn record_count(&self) -> u64 {
        let sealed: usize = self.sealed.iter().map(Vec::len).sum();
        (sealed + self.open.len()) as u64 / self.stride
    }

    /// Hand off the buffers sealed so far, leaving the open one growing.
    /// This is the incremental-flush hook for the progress protocol.
    pub fn drain_sealed(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sealed)
    }

    /// Seal the remainder and return every outstanding buffer.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.open.is_empty() {
            let rest = std::mem::take(&mut self.open);
            self.sealed.push(rest);
        }
        self.sealed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indirect_stride_is_strictly_increasing() {
        for &pointer_size in &[4u64, 8u64] {
            assert_eq!(indirect_stride(0, pointer_size), pointer_size);
            let mut previous = indirect_stride(0, pointer_size);
            for levels in 1..=16u16 {
                let stride = indirect_stride(levels, pointer_size);
                assert!(stride > previous);
                previous = stride;
            }
        }
    }

    #[test]
    fn direct_record_round_trips_both_byte_orders() {
        for &byte_order in &[ByteOrder::Little, ByteOrder::Big] {
            let mut out = Vec::new();
            write_address(&mut out, 0xDEAD_BEEF_1234, 8, byte_order);
            assert_eq!(out.len(), 8);
            assert_eq!(read_address(&out, 8, byte_order), 0xDEAD_BEEF_1234);

            let mut narrow = Vec::new();
            write_address(&mut narrow, 0x8000_1000, 4, byte_order);
            assert_eq!(narrow.len(), 4);
            assert_eq!(read_address(&narrow, 4, byte_order), 0x8000_1000);
        }
    }

    #[test]
    fn indirect_record_round_trips_offsets_exactly() {
        for &byte_order in &[ByteOrder::Little, ByteOrder::Big] {
            let mut writer = ResultSetWriter::indirect(3, 8, byte_order, RESULT_SET_MAX_BYTES);
            writer.append_indirect_match(0x5000, &[0x18, -0x20, 0x7FFF_FFFF]);
            let buffers = writer.finish();
            assert_eq!(buffers.len(), 1);
            let record = &buffers[0];
            assert_eq!(record.len() as u64, indirect_stride(3, 8));
            assert_eq!(read_address(record, 8, byte_order), 0x5000);
            assert_eq!(read_offsets(record, 8, byte_order), vec![0x18, -0x20, 0x7FFF_FFFF]);
        }
    }

    #[test]
    fn short_chains_are_zero_padded_to_capacity() {
        let mut writer = ResultSetWriter::indirect(4, 8, ByteOrder::Little, RESULT_SET_MAX_BYTES);
        writer.append_indirect_match(0x9000, &[0x10]);
        let buffers = writer.finish();
        let offsets = read_offsets(&buffers[0], 8, ByteOrder::Little);
        assert_eq!(offsets, vec![0x10, 0, 0, 0]);
    }

    #[test]
    fn buffers_seal_at_the_configured_size() {
        // Room for exactly two records per buffer.
        let mut writer = ResultSetWriter::direct(8, ByteOrder::Little, 16);
        for address in 0..5u64 {
            writer.append_match(0x1000 + address * 8);
        }
        assert_eq!(writer.record_count(), 5);
        let sealed = writer.drain_sealed();
        assert_eq!(sealed.len(), 2);
        assert!(sealed.iter().all(|b| b.len() == 16));
        let rest = writer.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].len(), 8);
    }

    #[test]
    fn every_buffer_is_a_stride_multiple() {
        let mut writer = ResultSetWriter::indirect(2, 8, ByteOrder::Little, 100);
        for i in 0..20u64 {
            writer.append_indirect_match(i * 0x10, &[4, 8]);
        }
        let stride = writer.stride();
        for buffer in writer.finish() {
            assert_eq!(buffer.len() as u64 % stride, 0);
            assert!(!buffer.is_empty());
        }
    }
}
