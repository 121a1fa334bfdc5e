use serde::{Deserialize, Serialize};

use crate::tier::TierKind;

/// Retention and capacity policy for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Maximum atom count; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Age after which an atom is reported stale, in seconds.
    pub stale_after_secs: Option<u64>,
    /// Age after which an atom is reported expired, in seconds.
    pub expire_after_secs: Option<u64>,
    /// Importance at or above which an atom is reported promotable.
    pub promotion_threshold: Option<f64>,
}

impl TierPolicy {
    /// Policy with no retention, capacity, or promotion semantics.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            stale_after_secs: None,
            expire_after_secs: None,
            promotion_threshold: None,
        }
    }
}

/// Directory-sharding parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Hard cap on shard depth (hex characters consumed).
    pub max_depth: usize,
    /// Direct-entry count beyond which a directory expands.
    pub folder_limit: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            folder_limit: 4096,
        }
    }
}

/// Configuration for the whole memory substrate.
///
/// Defaults reproduce the production constants; tests override the shard
/// folder limit to exercise expansion with small populations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Writes below this importance are rejected outright.
    pub write_min_importance: f64,
    /// Importance at or above which a write routes to Middle.
    pub middle_importance: f64,
    /// Importance at or above which a write routes to Long.
    pub long_importance: f64,
    /// Importance at or above which a write routes to Immortal.
    pub immortal_importance: f64,
    /// Fraction of a tier's atoms a topic must strictly exceed before a
    /// knowlet may be drafted.
    pub majority_ratio: f64,
    /// Sharding parameters shared by tiers and knowlet storage.
    pub shard: ShardConfig,
    /// Short tier policy.
    pub short: TierPolicy,
    /// Middle tier policy.
    pub middle: TierPolicy,
    /// Long tier policy.
    pub long: TierPolicy,
    /// Immortal tier policy.
    pub immortal: TierPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            write_min_importance: 0.3,
            middle_importance: 0.4,
            long_importance: 0.6,
            immortal_importance: 0.9,
            majority_ratio: 0.5,
            shard: ShardConfig::default(),
            short: TierPolicy {
                capacity: None,
                stale_after_secs: Some(1_800),
                expire_after_secs: None,
                promotion_threshold: Some(0.5),
            },
            middle: TierPolicy {
                capacity: None,
                stale_after_secs: Some(10_800),
                expire_after_secs: Some(18_000),
                promotion_threshold: Some(0.7),
            },
            long: TierPolicy {
                capacity: None,
                stale_after_secs: None,
                expire_after_secs: Some(604_800),
                promotion_threshold: Some(0.95),
            },
            immortal: TierPolicy::unbounded(),
        }
    }
}

impl MemoryConfig {
    /// Policy for the given tier.
    #[must_use]
    pub const fn policy(&self, kind: TierKind) -> TierPolicy {
        match kind {
            TierKind::Short => self.short,
            TierKind::Middle => self.middle,
            TierKind::Long => self.long,
            TierKind::Immortal => self.immortal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_constants() {
        let config = MemoryConfig::default();
        assert!((config.write_min_importance - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.shard.max_depth, 8);
        assert_eq!(config.shard.folder_limit, 4096);
        assert_eq!(config.policy(TierKind::Middle).expire_after_secs, Some(18_000));
        assert_eq!(config.policy(TierKind::Long).promotion_threshold, Some(0.95));
        assert!(config.policy(TierKind::Immortal).capacity.is_none());
    }
}
