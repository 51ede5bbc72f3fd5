use std::path::Path;

/// Stable identifier for an indexed file, derived from its normalized
/// absolute path.
///
/// The metadata store keeps the authoritative path → id mapping; this only
/// provides the preferred id. On the (unlikely) event that two paths hash to
/// the same value the store probes with [`FileId::next_candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

impl FileId {
    pub fn for_path(path: &Path) -> Self {
        let hash = blake3::hash(path.to_string_lossy().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        // Zero is reserved so that an unset id is never a valid one.
        Self(u64::from_le_bytes(bytes).max(1))
    }

    pub fn next_candidate(self) -> Self {
        Self(self.0.wrapping_add(1).max(1))
    }

    /// Short hex string for human display (e.g. "a1b2c3").
    pub fn short(self) -> String {
        format!("{:016x}", self.0)[..6].to_string()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short())
    }
}
