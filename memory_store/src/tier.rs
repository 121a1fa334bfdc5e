use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::atom::{AtomMetadata, AtomRecord, ATOM_EXT};
use crate::config::{ShardConfig, TierPolicy};
use crate::error::MemoryError;
use crate::repair::quick_check;
use crate::shard::ShardPath;
use crate::telemetry::MemoryTelemetry;

/// Category used when an atom's metadata cannot be parsed.
const FALLBACK_CATEGORY: &str = "uncategorized";
/// Primary key used when an atom's metadata cannot be parsed.
const FALLBACK_PRIMARY: &str = "unknown";

/// Durability class of an atom, totally ordered by rank.
///
/// An atom id exists in at most one tier at a time; promotion moves, never
/// copies-and-keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Current-session atoms, wiped at session end.
    Short,
    /// Repeated-interaction atoms with a bounded lifetime.
    Middle,
    /// Stable atoms retained for days.
    Long,
    /// Identity-locked atoms that can never be deleted.
    Immortal,
}

impl TierKind {
    /// All tiers, shallowest first.
    pub const ALL: [Self; 4] = [Self::Short, Self::Middle, Self::Long, Self::Immortal];

    /// Directory name of the tier.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Middle => "middle",
            Self::Long => "long",
            Self::Immortal => "immortal",
        }
    }

    /// Durability rank 1..4, used by the emotion weighting formula.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Short => 1,
            Self::Middle => 2,
            Self::Long => 3,
            Self::Immortal => 4,
        }
    }

    /// Whether atoms may ever be removed from this tier.
    #[must_use]
    pub const fn deletable(self) -> bool {
        !matches!(self, Self::Immortal)
    }

    /// Next tier up the durability order.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Short => Some(Self::Middle),
            Self::Middle => Some(Self::Long),
            Self::Long => Some(Self::Immortal),
            Self::Immortal => None,
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// File-system backed storage for one tier.
///
/// All four tiers share this implementation; only [`TierKind`] and
/// [`TierPolicy`] differ. The Immortal hard-deny runs through a single
/// mutation guard rather than per-tier overrides.
#[derive(Debug)]
pub struct TierStore {
    kind: TierKind,
    root: PathBuf,
    policy: TierPolicy,
    shard: ShardConfig,
    telemetry: Option<MemoryTelemetry>,
}

impl TierStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        kind: TierKind,
        policy: TierPolicy,
        shard: ShardConfig,
    ) -> Self {
        Self {
            kind,
            root: root.into(),
            policy,
            shard,
            telemetry: None,
        }
    }

    /// Attaches a telemetry handle.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: MemoryTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// The tier this store serves.
    #[must_use]
    pub const fn kind(&self) -> TierKind {
        self.kind
    }

    /// Root directory of the tier.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes an atom, sharding by the category/primary embedded in its
    /// metadata and expanding the shard directory when it overflows.
    pub fn write(&self, id: &str, record: &AtomRecord) -> bool {
        let (category, primary) = AtomMetadata::from_bytes(&record.metadata).map_or_else(
            |_| (FALLBACK_CATEGORY.to_string(), FALLBACK_PRIMARY.to_string()),
            |meta| (meta.category, meta.primary),
        );
        let topic_dir = self.root.join(&category).join(&primary);
        let mut depth = ShardPath::detect_depth(&topic_dir);
        let mut path = ShardPath::build_path(&self.root, &category, &primary, id, depth);

        let shard_dir = path.parent().map(Path::to_path_buf);
        if let Some(shard_dir) = shard_dir {
            if depth < self.shard.max_depth
                && ShardPath::should_expand(&shard_dir, self.shard.folder_limit)
            {
                depth += 1;
                match ShardPath::expand(&topic_dir, ATOM_EXT, depth) {
                    Ok(moved) => {
                        self.log(
                            LogLevel::Info,
                            "tier.shard_expanded",
                            json!({ "tier": self.kind, "category": category, "primary": primary, "depth": depth, "moved": moved }),
                        );
                        path = ShardPath::build_path(&self.root, &category, &primary, id, depth);
                    }
                    Err(err) => {
                        self.log(
                            LogLevel::Error,
                            "tier.shard_expand_failed",
                            json!({ "tier": self.kind, "error": err.to_string() }),
                        );
                    }
                }
            }
        }

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                self.log(
                    LogLevel::Error,
                    "tier.write_failed",
                    json!({ "tier": self.kind, "atom_id": id, "error": err.to_string() }),
                );
                return false;
            }
        }
        match record.save(&path) {
            Ok(()) => {
                self.log(
                    LogLevel::Info,
                    "tier.write",
                    json!({ "tier": self.kind, "atom_id": id }),
                );
                true
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "tier.write_failed",
                    json!({ "tier": self.kind, "atom_id": id, "error": err.to_string() }),
                );
                false
            }
        }
    }

    /// Reads an atom by id, running the corruption quick-check first. A
    /// failed check is treated identically to "not found".
    #[must_use]
    pub fn read(&self, id: &str) -> Option<AtomRecord> {
        let Some(path) = self.locate(id) else {
            self.log(
                LogLevel::Debug,
                "tier.not_found",
                json!({ "tier": self.kind, "atom_id": id }),
            );
            return None;
        };
        if !quick_check(&path) {
            self.log(
                LogLevel::Warn,
                "tier.checksum_failed",
                json!({ "tier": self.kind, "atom_id": id }),
            );
            return None;
        }
        match AtomRecord::load(&path) {
            Ok(record) => Some(record),
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "tier.read_failed",
                    json!({ "tier": self.kind, "atom_id": id, "error": err.to_string() }),
                );
                None
            }
        }
    }

    /// True when the atom file exists in this tier.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.locate(id).is_some()
    }

    /// Ids of every atom stored in this tier.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.entries().into_iter().map(|(id, _)| id).collect()
    }

    /// Number of atoms stored in this tier.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries().len()
    }

    /// Deletes an atom. Always a permission violation on the Immortal tier.
    pub fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        self.guard_mutation("delete")?;
        let Some(path) = self.locate(id) else {
            self.log(
                LogLevel::Debug,
                "tier.delete_not_found",
                json!({ "tier": self.kind, "atom_id": id }),
            );
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                self.log(
                    LogLevel::Warn,
                    "tier.delete",
                    json!({ "tier": self.kind, "atom_id": id }),
                );
                Ok(true)
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "tier.delete_failed",
                    json!({ "tier": self.kind, "atom_id": id, "error": err.to_string() }),
                );
                Ok(false)
            }
        }
    }

    /// Removes every atom in the tier, returning how many were deleted.
    /// Always a permission violation on the Immortal tier.
    pub fn clear(&self) -> Result<usize, MemoryError> {
        self.guard_mutation("clear")?;
        let mut deleted = 0;
        for (_, path) in self.entries() {
            if fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
        self.log(
            LogLevel::Info,
            "tier.clear",
            json!({ "tier": self.kind, "deleted": deleted }),
        );
        Ok(deleted)
    }

    /// True when a capacity is configured and reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.policy
            .capacity
            .is_some_and(|capacity| self.count() >= capacity)
    }

    /// Ids older than the tier's stale window.
    #[must_use]
    pub fn list_stale(&self) -> Vec<String> {
        self.list_older_than(self.policy.stale_after_secs)
    }

    /// Ids older than the tier's expiry window.
    #[must_use]
    pub fn list_expired(&self) -> Vec<String> {
        self.list_older_than(self.policy.expire_after_secs)
    }

    /// Ids whose metadata importance reaches the tier's promotion
    /// threshold. The controller decides what to do with them; tiers never
    /// promote themselves.
    #[must_use]
    pub fn list_promotable(&self) -> Vec<String> {
        let Some(threshold) = self.policy.promotion_threshold else {
            return Vec::new();
        };
        let mut promotable = Vec::new();
        for (id, path) in self.entries() {
            if !quick_check(&path) {
                continue;
            }
            let Ok(record) = AtomRecord::load(&path) else {
                continue;
            };
            let Ok(meta) = AtomMetadata::from_bytes(&record.metadata) else {
                continue;
            };
            if meta.importance >= threshold {
                promotable.push(id);
            }
        }
        promotable
    }

    fn list_older_than(&self, window_secs: Option<u64>) -> Vec<String> {
        let Some(secs) = window_secs else {
            return Vec::new();
        };
        let window_ms = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let now_ms = Utc::now().timestamp_millis();
        let mut aged = Vec::new();
        for (id, path) in self.entries() {
            if !quick_check(&path) {
                continue;
            }
            let Ok(record) = AtomRecord::load(&path) else {
                continue;
            };
            if now_ms.saturating_sub(record.created_ts_ms) > window_ms {
                aged.push(id);
            }
        }
        aged
    }

    fn locate(&self, id: &str) -> Option<PathBuf> {
        ShardPath::locate(&self.root, id, ATOM_EXT)
    }

    fn entries(&self) -> Vec<(String, PathBuf)> {
        ShardPath::files_with_ext(&self.root, ATOM_EXT)
            .into_iter()
            .filter_map(|path| {
                let id = path.file_stem()?.to_string_lossy().into_owned();
                Some((id, path))
            })
            .collect()
    }

    fn guard_mutation(&self, operation: &str) -> Result<(), MemoryError> {
        if self.kind.deletable() {
            Ok(())
        } else {
            Err(MemoryError::PermissionViolation(format!(
                "{operation} is not allowed on the {} tier",
                self.kind
            )))
        }
    }

    fn log(&self, level: LogLevel, message: &str, fields: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, fields);
        }
    }
}
