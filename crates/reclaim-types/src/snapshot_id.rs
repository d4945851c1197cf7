use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage prefix under which snapshot metadata objects live.
pub const SNAPSHOTS_PREFIX: &str = "snapshots/";

/// A 32-byte snapshot identifier (random).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub [u8; 32]);

impl SnapshotId {
    /// Generate a random snapshot ID.
    pub fn generate() -> Self {
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        SnapshotId(buf)
    }

    /// Hex-encode the full snapshot ID.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Storage key path: `snapshots/<hex>`.
    pub fn storage_key(&self) -> String {
        format!("{SNAPSHOTS_PREFIX}{}", self.to_hex())
    }

    /// Parse a SnapshotId from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(SnapshotId(arr))
    }

    /// Parse a SnapshotId from its `snapshots/<hex>` storage key.
    pub fn from_storage_key(key: &str) -> std::result::Result<Self, String> {
        let hex_str = key
            .strip_prefix(SNAPSHOTS_PREFIX)
            .ok_or_else(|| format!("not a snapshot key: '{key}'"))?;
        Self::from_hex(hex_str)
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
