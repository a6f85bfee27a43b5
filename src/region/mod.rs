//! Region model: enumeration and filtering of a process's mapped segments.

pub mod enumerate;
pub mod filter;
pub mod types;

pub use enumerate::{enumerate_regions, enumerate_regions_with_extended_info, enumerate_submap_regions, main_executable_path};
pub use filter::{filter_regions, is_system_library_path};
pub use types::{user_tags, Protection, ProtectionMode, Region};
