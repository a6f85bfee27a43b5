//! Memory access capability.
//!
//! The engine never reads or writes target memory directly. Callers supply
//! an implementation of [`MemoryAccess`] (a debugger driver, ptrace,
//! process_vm_readv, a kernel module...) and the scan drivers go through it.

use crate::error::ScanError;

/// Read/write capability over one target process's address space.
///
/// Implementations must be callable from multiple scan workers at once.
pub trait MemoryAccess: Send + Sync {
    /// Read `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// A failure means the whole read failed; the scan drivers treat this
    /// as a local, recoverable condition (the region is skipped).
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), ScanError>;

    /// Write `bytes` to `address`.
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<(), ScanError>;

    /// Read a region-sized snapshot. Default goes through `read_bytes`;
    /// implementations with scatter-gather primitives may override.
    fn read_snapshot(&self, address: u64, size: usize) -> Result<Vec<u8>, ScanError> {
        let mut buf = vec![0u8; size];
        self.read_bytes(address, &mut buf)?;
        Ok(buf)
    }
}
