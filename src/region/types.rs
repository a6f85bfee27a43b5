use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Protection mask of one mapped segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.contains(Protection::READ) { 'r' } else { '-' },
            if self.contains(Protection::WRITE) { 'w' } else { '-' },
            if self.contains(Protection::EXECUTE) { 'x' } else { '-' },
        )
    }
}

/// Which protection combination a search should touch.
///
/// `All` admits anything readable; the others additionally require the
/// write/execute bit. A region qualifies when its mask is a superset of the
/// requested combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProtectionMode {
    All,
    Write,
    Execute,
}

impl ProtectionMode {
    #[inline]
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ProtectionMode::All),
            1 => Some(ProtectionMode::Write),
            2 => Some(ProtectionMode::Execute),
            _ => None,
        }
    }

    #[inline]
    pub fn to_id(&self) -> i32 {
        match self {
            ProtectionMode::All => 0,
            ProtectionMode::Write => 1,
            ProtectionMode::Execute => 2,
        }
    }

    /// Required protection bits for this mode.
    #[inline]
    pub fn required(&self) -> Protection {
        match self {
            ProtectionMode::All => Protection::READ,
            ProtectionMode::Write => Protection::READ | Protection::WRITE,
            ProtectionMode::Execute => Protection::READ | Protection::EXECUTE,
        }
    }

    #[inline]
    pub fn admits(&self, protection: Protection) -> bool {
        protection.contains(self.required())
    }
}

/// Opaque OS-assigned region tags. On Linux these are synthesized from the
/// mapping pathname since the kernel exposes no numeric tag.
pub mod user_tags {
    pub const NONE: u32 = 0;
    pub const HEAP: u32 = 1;
    pub const STACK: u32 = 2;
    pub const ANON: u32 = 3;
    pub const MAPPED_FILE: u32 = 4;
    pub const SHARED: u32 = 5;
}

/// One contiguous mapped segment of a target process, snapshotted at
/// enumeration time. Value-like and never mutated after creation; the only
/// exception is the byte snapshot attached while the region is actively
/// being scanned and released right after.
#[derive(Debug, Clone)]
pub struct Region {
    address: u64,
    size: u64,
    protection: Protection,
    user_tag: u32,
    shared: bool,
    path: Option<String>,
    bytes: Option<Vec<u8>>,
}

impl Region {
    pub fn new(address: u64, size: u64, protection: Protection, user_tag: u32) -> Self {
        debug_assert!(size > 0, "region size must be non-zero");
        Self {
            address,
            size,
            protection,
            user_tag,
            shared: false,
            path: None,
            bytes: None,
        }
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    /// Attach a byte snapshot for the duration of a comparison pass.
    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// Release the snapshot, bounding peak memory between regions.
    pub fn take_bytes(&mut self) -> Option<Vec<u8>> {
        self.bytes.take()
    }

    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    #[inline]
    pub fn protection(&self) -> Protection {
        self.protection
    }

    #[inline]
    pub fn user_tag(&self) -> u32 {
        self.user_tag
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[inline]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }

    /// Whether `[begin, end)` intersects this region at all. Filtering is
    /// whole-region: partially overlapping regions are kept, never split.
    #[inline]
    pub fn intersects(&self, begin: u64, end: u64) -> bool {
        self.end() > begin && self.address < end
    }

    #[inline]
    pub fn is_heap_or_stack(&self) -> bool {
        self.user_tag == user_tags::HEAP || self.user_tag == user_tags::STACK
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn protection_mode_superset() {
        let rw = Protection::READ | Protection::WRITE;
        let rx = Protection::READ | Protection::EXECUTE;
        let rwx = Protection::all();

        assert!(ProtectionMode::All.admits(rw));
        assert!(ProtectionMode::All.admits(rx));
        assert!(ProtectionMode::Write.admits(rw));
        assert!(!ProtectionMode::Write.admits(rx));
        assert!(ProtectionMode::Write.admits(rwx));
        assert!(ProtectionMode::Execute.admits(rx));
        assert!(!ProtectionMode::Execute.admits(rw));
    }

    #[test]
    fn region_intersection_is_whole_region() {
        let region = Region::new(0x1000, 0x1000, Protection::READ, user_tags::NONE);
        assert!(region.intersects(0, 0x10000));
        assert!(region.intersects(0x1800, 0x1900)); // fully inside still counts
        assert!(region.intersects(0x0, 0x1001)); // one byte of overlap counts
        assert!(!region.intersects(0x2000, 0x3000));
        assert!(!region.intersects(0x0, 0x1000)); // end is exclusive
    }
}
