//! Seed Resolution
//!
//! Precedence is call seed, then global seed, then none (the backend picks
//! a non-deterministic seed). Resolution is a pure function of its inputs;
//! `SeedState` only stores the global value.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

pub type Seed = u32;

/// Where the effective seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedSource {
    /// Supplied with the processing call
    Call,
    /// Process-wide default
    Global,
    /// No seed; results are not reproducible
    Random,
}

impl SeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedSource::Call => "call",
            SeedSource::Global => "global",
            SeedSource::Random => "random",
        }
    }
}

/// Provenance record for the seed used by one processing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMetadata {
    pub seed_used: bool,
    pub effective_seed: Option<Seed>,
    pub call_seed: Option<Seed>,
    pub global_seed: Option<Seed>,
    pub reproducible: bool,
    #[serde(rename = "seed_source")]
    pub source: SeedSource,
}

impl SeedMetadata {
    pub fn write_to(&self, metadata: &mut Metadata) {
        metadata.insert("seed_used", self.seed_used);
        metadata.insert("effective_seed", self.effective_seed);
        metadata.insert("call_seed", self.call_seed);
        metadata.insert("global_seed", self.global_seed);
        metadata.insert("reproducible", self.reproducible);
        metadata.insert("seed_source", self.source.as_str());
    }
}

pub fn resolve_effective_seed(call_seed: Option<Seed>, global_seed: Option<Seed>) -> Option<Seed> {
    call_seed.or(global_seed)
}

pub fn seed_metadata(
    effective_seed: Option<Seed>,
    call_seed: Option<Seed>,
    global_seed: Option<Seed>,
) -> SeedMetadata {
    let source = if call_seed.is_some() {
        SeedSource::Call
    } else if global_seed.is_some() {
        SeedSource::Global
    } else {
        SeedSource::Random
    };

    SeedMetadata {
        seed_used: effective_seed.is_some(),
        effective_seed,
        call_seed,
        global_seed,
        reproducible: effective_seed.is_some(),
        source,
    }
}

/// Holder for the process-wide default seed.
///
/// Shared by reference between callers; the global value is read at the
/// moment a call resolves its seed, not when the call was submitted.
#[derive(Debug, Default)]
pub struct SeedState {
    global: RwLock<Option<Seed>>,
}

impl SeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(seed: Seed) -> Self {
        Self {
            global: RwLock::new(Some(seed)),
        }
    }

    /// Overwrite the global seed (`None` clears it). Returns the previous value.
    pub fn set_global(&self, seed: Option<Seed>) -> Option<Seed> {
        let previous = std::mem::replace(&mut *self.global.write(), seed);
        tracing::debug!(?previous, current = ?seed, "global seed updated");
        previous
    }

    pub fn global(&self) -> Option<Seed> {
        *self.global.read()
    }

    pub fn resolve(&self, call_seed: Option<Seed>) -> Option<Seed> {
        resolve_effective_seed(call_seed, self.global())
    }

    pub fn metadata(&self, effective_seed: Option<Seed>, call_seed: Option<Seed>) -> SeedMetadata {
        seed_metadata(effective_seed, call_seed, self.global())
    }

    /// Resolve and describe in one read of the global seed.
    pub fn snapshot(&self, call_seed: Option<Seed>) -> (Option<Seed>, SeedMetadata) {
        let global = self.global();
        let effective = resolve_effective_seed(call_seed, global);
        (effective, seed_metadata(effective, call_seed, global))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_seed_wins() {
        assert_eq!(resolve_effective_seed(Some(7), Some(3)), Some(7));
        assert_eq!(resolve_effective_seed(Some(7), None), Some(7));
    }

    #[test]
    fn test_global_seed_fallback() {
        assert_eq!(resolve_effective_seed(None, Some(3)), Some(3));
    }

    #[test]
    fn test_no_seed_is_random() {
        let effective = resolve_effective_seed(None, None);
        assert_eq!(effective, None);
        let meta = seed_metadata(effective, None, None);
        assert_eq!(meta.source, SeedSource::Random);
        assert!(!meta.reproducible);
        assert!(!meta.seed_used);
    }

    #[test]
    fn test_metadata_sources() {
        assert_eq!(seed_metadata(Some(7), Some(7), Some(3)).source, SeedSource::Call);
        let global = seed_metadata(Some(3), None, Some(3));
        assert_eq!(global.source, SeedSource::Global);
        assert!(global.reproducible);
        assert_eq!(global.global_seed, Some(3));
    }

    #[test]
    fn test_state_set_and_clear() {
        let state = SeedState::new();
        assert_eq!(state.global(), None);
        assert_eq!(state.set_global(Some(3)), None);
        assert_eq!(state.resolve(None), Some(3));
        assert_eq!(state.resolve(Some(7)), Some(7));
        assert_eq!(state.set_global(None), Some(3));
        assert_eq!(state.resolve(None), None);
    }

    #[test]
    fn test_write_to_metadata() {
        let (effective, meta) = SeedState::with_global(3).snapshot(None);
        assert_eq!(effective, Some(3));
        let mut out = Metadata::new();
        meta.write_to(&mut out);
        assert_eq!(out.get("seed_source").and_then(|v| v.as_str()), Some("global"));
        assert_eq!(out.get("effective_seed").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(out.get("reproducible").and_then(|v| v.as_bool()), Some(true));
    }
}
