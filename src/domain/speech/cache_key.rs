use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Voice;

/// Deterministic identity of a rendered audio entry.
///
/// Derived from the exact (text, voice, exaggeration, guidance_weight) tuple:
/// identical tuples always yield the same key, any difference in any field
/// yields a different key. The key doubles as the storage file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest the synthesis tuple into a fixed-length identifier.
    ///
    /// Variable-length fields are length-prefixed before hashing, so text
    /// crafted to look like a joined representation of several fields can
    /// never collide with a different field split.
    pub fn derive(text: &str, voice: Voice, exaggeration: f32, guidance_weight: f32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
        let voice = voice.as_str();
        hasher.update((voice.len() as u64).to_le_bytes());
        hasher.update(voice.as_bytes());
        // Exact bit patterns; no normalization or rounding.
        hasher.update(exaggeration.to_le_bytes());
        hasher.update(guidance_weight.to_le_bytes());

        let digest = hasher.finalize();
        let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        CacheKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the cached entry (the cache stores WAV renders).
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
