//! Serializable engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to resume an engine's output exactly.
///
/// Restoring re-derives the key from `seed`, so a snapshot is as sensitive
/// as the seed itself.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Last seed the engine accepted (after any hash extension).
    pub seed: Vec<u8>,
    /// Big-endian counter value.
    pub counter: Vec<u8>,
    /// Byte position of the next unread word in the current block.
    pub index: usize,
    /// Entropy estimate at capture time.
    pub entropy_bits: i64,
    /// Advisory reseed threshold of the engine.
    pub reseed_threshold_bits: i64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl EngineSnapshot {
    pub(crate) fn new(
        seed: Vec<u8>,
        counter: Vec<u8>,
        index: usize,
        entropy_bits: i64,
        reseed_threshold_bits: i64,
    ) -> Self {
        Self {
            seed,
            counter,
            index,
            entropy_bits,
            reseed_threshold_bits,
            taken_at: Utc::now(),
        }
    }

    /// Encodes the snapshot as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Decodes a snapshot from TOML.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

impl std::fmt::Debug for EngineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSnapshot")
            .field("index", &self.index)
            .field("entropy_bits", &self.entropy_bits)
            .field("taken_at", &self.taken_at)
            .finish_non_exhaustive()
    }
}
