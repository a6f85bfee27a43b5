use crate::error::ScanError;
use crate::region::ProtectionMode;
use crate::results::INDIRECT_OFFSET_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type tag of a searched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String8,
    String16,
    ByteArray,
    Pointer,
}

impl DataType {
    #[inline]
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(DataType::Int8),
            1 => Some(DataType::Int16),
            2 => Some(DataType::Int32),
            3 => Some(DataType::Int64),
            4 => Some(DataType::Float),
            5 => Some(DataType::Double),
            6 => Some(DataType::String8),
            7 => Some(DataType::String16),
            8 => Some(DataType::ByteArray),
            9 => Some(DataType::Pointer),
            _ => None,
        }
    }

    #[inline]
    pub fn to_id(&self) -> i32 {
        match self {
            DataType::Int8 => 0,
            DataType::Int16 => 1,
            DataType::Int32 => 2,
            DataType::Int64 => 3,
            DataType::Float => 4,
            DataType::Double => 5,
            DataType::String8 => 6,
            DataType::String16 => 7,
            DataType::ByteArray => 8,
            DataType::Pointer => 9,
        }
    }

    /// Byte size for fixed-width types; strings and byte arrays take their
    /// length from the search value instead.
    #[inline]
    pub fn fixed_size(&self, pointer_size: u64) -> Option<u64> {
        match self {
            DataType::Int8 => Some(1),
            DataType::Int16 => Some(2),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
            DataType::Pointer => Some(pointer_size),
            DataType::String8 | DataType::String16 | DataType::ByteArray => None,
        }
    }

    /// Natural alignment used when data alignment is not ignored.
    #[inline]
    pub fn alignment(&self, pointer_size: u64) -> u64 {
        match self {
            DataType::Int8 | DataType::String8 | DataType::ByteArray => 1,
            DataType::Int16 | DataType::String16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double => 8,
            DataType::Pointer => pointer_size,
        }
    }

    #[inline]
    pub fn is_float_type(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    #[inline]
    pub fn is_string_type(&self) -> bool {
        matches!(self, DataType::String8 | DataType::String16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String8 => "String8",
            DataType::String16 => "String16",
            DataType::ByteArray => "ByteArray",
            DataType::Pointer => "Pointer",
        };
        write!(f, "{}", name)
    }
}

/// What kind of search is being run: a plain value search or an
/// address-pattern (pointer chain) search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    Value,
    Address,
}

/// Signedness qualifier applied by integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qualifier {
    Signed,
    Unsigned,
}

/// Byte order the searched process stores values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    #[inline]
    pub fn native() -> Self {
        if cfg!(target_endian = "big") { ByteOrder::Big } else { ByteOrder::Little }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::native()
    }
}

/// Per-level offset admission policy for indirect searches. The three are
/// distinct policies, not spellings of one another:
/// - `Max` admits forward offsets in `[0, max_offset]`
/// - `Same` admits exactly `same_offset` at every level
/// - `AbsoluteMax` admits offsets with `|offset| <= max_offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetComparison {
    Max,
    Same,
    AbsoluteMax,
}

impl OffsetComparison {
    #[inline]
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(OffsetComparison::Max),
            1 => Some(OffsetComparison::Same),
            2 => Some(OffsetComparison::AbsoluteMax),
            _ => None,
        }
    }

    #[inline]
    pub fn to_id(&self) -> i32 {
        match self {
            OffsetComparison::Max => 0,
            OffsetComparison::Same => 1,
            OffsetComparison::AbsoluteMax => 2,
        }
    }

    /// Whether `offset` (target minus pointer value) is admitted.
    #[inline]
    pub fn admits(&self, offset: i64, max_offset: i64, same_offset: i64) -> bool {
        match self {
            OffsetComparison::Max => offset >= 0 && offset <= max_offset,
            OffsetComparison::Same => offset == same_offset,
            OffsetComparison::AbsoluteMax => offset.abs() <= max_offset,
        }
    }
}

/// Immutable search configuration, supplied by the caller per scan.
///
/// This is a plain value: the drivers never hold ambient mutable search
/// state. The serde derives exist so an embedding layer can ferry the
/// configuration across its own boundary as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameters {
    pub search_type: SearchType,
    pub data_type: DataType,
    pub qualifier: Qualifier,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Pointer width of the target process in bytes, 4 or 8.
    pub pointer_size: u64,
    pub begin_address: u64,
    pub end_address: u64,
    /// Protection filter for the searched value's region.
    pub value_protection_mode: ProtectionMode,
    /// Protection filter for pointer addresses in indirect searches.
    pub address_protection_mode: ProtectionMode,
    pub ignore_data_alignment: bool,
    pub exact_string_length: bool,
    pub ignore_string_case: bool,
    pub include_shared_memory: bool,
    /// Maximum number of levels an indirect search may chain through.
    pub indirect_max_levels: u16,
    pub indirect_max_offset: i64,
    pub indirect_same_offset: i64,
    pub indirect_offset_comparison: OffsetComparison,
    /// Stop extending a chain once its base lands in a static segment.
    pub indirect_stop_at_static_addresses: bool,
    /// Drop heap/stack regions from the pointer-address candidates, cutting
    /// false positives in pointer scans.
    pub indirect_filter_heap_and_stack_data: bool,
    pub indirect_exclude_static_data_from_system_libraries: bool,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            search_type: SearchType::Value,
            data_type: DataType::Int32,
            qualifier: Qualifier::Signed,
            byte_order: ByteOrder::native(),
            pointer_size: 8,
            begin_address: 0,
            end_address: u64::MAX,
            value_protection_mode: ProtectionMode::All,
            address_protection_mode: ProtectionMode::Write,
            ignore_data_alignment: false,
            exact_string_length: false,
            ignore_string_case: false,
            include_shared_memory: false,
            indirect_max_levels: 0,
            indirect_max_offset: 0x400,
            indirect_same_offset: 0,
            indirect_offset_comparison: OffsetComparison::Max,
            indirect_stop_at_static_addresses: true,
            indirect_filter_heap_and_stack_data: true,
            indirect_exclude_static_data_from_system_libraries: false,
        }
    }
}

impl SearchParameters {
    /// Effective scan step for the configured data type.
    #[inline]
    pub fn data_alignment(&self) -> u64 {
        if self.ignore_data_alignment {
            1
        } else {
            self.data_type.alignment(self.pointer_size)
        }
    }

    /// Validate before scan start. Everything here is rejected up front so
    /// drivers never observe a half-legal configuration.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(ScanError::invalid_configuration(format!("pointer size must be 4 or 8, got {}", self.pointer_size)));
        }
        if self.begin_address >= self.end_address {
            return Err(ScanError::invalid_configuration(format!(
                "begin address 0x{:X} must be below end address 0x{:X}",
                self.begin_address, self.end_address
            )));
        }
        if self.search_type == SearchType::Address {
            if self.indirect_max_levels == 0 {
                return Err(ScanError::invalid_configuration("indirect search requires max levels >= 1"));
            }
            let offset_limit = (1i64 << (INDIRECT_OFFSET_SIZE as i64 * 8 - 1)) - 1;
            if self.indirect_max_offset.abs() > offset_limit || self.indirect_same_offset.abs() > offset_limit {
                return Err(ScanError::invalid_configuration(format!(
                    "indirect offsets must fit a {}-byte signed field",
                    INDIRECT_OFFSET_SIZE
                )));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let params: SearchParameters = serde_json::from_str(json).map_err(|e| ScanError::invalid_configuration(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("search parameters always serialize")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_type_ids_round_trip() {
        for id in 0..10 {
            let dt = DataType::from_id(id).unwrap();
            assert_eq!(dt.to_id(), id);
        }
        assert!(DataType::from_id(10).is_none());
    }

    #[test]
    fn alignment_follows_width() {
        assert_eq!(DataType::Int64.alignment(8), 8);
        assert_eq!(DataType::String16.alignment(8), 2);
        assert_eq!(DataType::Pointer.alignment(4), 4);
        let mut params = SearchParameters::default();
        params.data_type = DataType::Int64;
        assert_eq!(params.data_alignment(), 8);
        params.ignore_data_alignment = true;
        assert_eq!(params.data_alignment(), 1);
    }

    #[test]
    fn offset_comparison_policies_are_distinct() {
        // Max: forward window only
        assert!(OffsetComparison::Max.admits(0, 0x100, 0));
        assert!(OffsetComparison::Max.admits(0x100, 0x100, 0));
        assert!(!OffsetComparison::Max.admits(-8, 0x100, 0));
        assert!(!OffsetComparison::Max.admits(0x101, 0x100, 0));
        // Same: exact equality, sign included
        assert!(OffsetComparison::Same.admits(0x18, 0x100, 0x18));
        assert!(!OffsetComparison::Same.admits(0x17, 0x100, 0x18));
        assert!(OffsetComparison::Same.admits(-0x20, 0x100, -0x20));
        // AbsoluteMax: symmetric window
        assert!(OffsetComparison::AbsoluteMax.admits(-0x100, 0x100, 0));
        assert!(OffsetComparison::AbsoluteMax.admits(0x100, 0x100, 0));
        assert!(!OffsetComparison::AbsoluteMax.admits(0x101, 0x100, 0));
    }

    #[test]
    fn validation_rejects_bad_configurations() {
        let mut params = SearchParameters::default();
        params.search_type = SearchType::Address;
        params.indirect_max_levels = 0;
        assert!(matches!(params.validate(), Err(ScanError::InvalidConfiguration(_))));

        params.indirect_max_levels = 3;
        assert!(params.validate().is_ok());

        params.indirect_max_offset = i64::MAX;
        assert!(matches!(params.validate(), Err(ScanError::InvalidConfiguration(_))));

        let mut params = SearchParameters::default();
        params.pointer_size = 2;
        assert!(matches!(params.validate(), Err(ScanError::InvalidConfiguration(_))));

        let mut params = SearchParameters::default();
        params.begin_address = 0x2000;
        params.end_address = 0x1000;
        assert!(matches!(params.validate(), Err(ScanError::InvalidConfiguration(_))));
    }

    #[test]
    fn json_round_trip() {
        let mut params = SearchParameters::default();
        params.search_type = SearchType::Address;
        params.indirect_max_levels = 4;
        let json = params.to_json();
        let back = SearchParameters::from_json(&json).unwrap();
        assert_eq!(back.indirect_max_levels, 4);
        assert_eq!(back.search_type, SearchType::Address);
    }
}
