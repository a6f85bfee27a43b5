use thiserror::Error;

use crate::params::DataType;
use crate::results::ResultType;

/// Errors surfaced to the caller that initiated a scan or result operation.
///
/// Per-region read failures during scanning are recovered locally and never
/// reach this type; only a total inability to enumerate the target process
/// is fatal.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The target process cannot be opened or queried. Either the pid is
    /// gone (process exited mid-scan) or access was denied.
    #[error("cannot access process {pid}: {reason}")]
    ProcessAccess { pid: i32, reason: String },

    /// Attempted to merge result sets with mismatched result type, data
    /// type or stride. Rejected before either operand is mutated.
    #[error("incompatible result sets: {left_type:?}/{left_data:?} stride {left_stride} vs {right_type:?}/{right_data:?} stride {right_stride}")]
    IncompatibleResults {
        left_type: ResultType,
        left_data: DataType,
        left_stride: u64,
        right_type: ResultType,
        right_data: DataType,
        right_stride: u64,
    },

    /// Search parameters failed validation before scan start.
    #[error("invalid search configuration: {0}")]
    InvalidConfiguration(String),

    /// A read or write through the memory access capability failed.
    #[error("memory access failed at 0x{address:X} ({size} bytes): {reason}")]
    MemoryAccess { address: u64, size: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn process_access(pid: i32, reason: impl Into<String>) -> Self {
        ScanError::ProcessAccess { pid, reason: reason.into() }
    }

    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        ScanError::InvalidConfiguration(reason.into())
    }

    pub fn memory_access(address: u64, size: usize, reason: impl Into<String>) -> Self {
        ScanError::MemoryAccess {
            address,
            size,
            reason: reason.into(),
        }
    }
}
