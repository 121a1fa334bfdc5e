use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use shared_logging::LogLevel;

use crate::atom::{AtomMetadata, AtomRecord, ATOM_EXT};
use crate::config::{MemoryConfig, ShardConfig};
use crate::error::MemoryError;
use crate::repair::quick_check;
use crate::shard::ShardPath;
use crate::telemetry::MemoryTelemetry;
use crate::tier::TierKind;

/// File extension used for knowlets on disk.
pub const KNOWLET_EXT: &str = "knowlet";

/// A consolidated summary drawn from a majority of atoms sharing a topic.
///
/// Construction enforces the integrity rules: at least one parent atom, and
/// a confidence strictly above the parents' mean. A knowlet is promoted at
/// most once, by a named reviewer, and is never deleted by this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowletRecord {
    /// Unique identifier (hex).
    pub knowlet_id: String,
    /// Ids of the atoms this summary was drawn from.
    pub parent_ids: Vec<String>,
    /// Category shared by the parent atoms.
    pub category: String,
    /// Primary topic shared by the parent atoms.
    pub primary: String,
    /// The consolidated summary text.
    pub summary: String,
    /// Confidence of the summary, strictly above `parent_confidence`.
    pub confidence: f64,
    /// Mean confidence of the parent atoms.
    pub parent_confidence: f64,
    /// True once a reviewer has approved the knowlet.
    pub is_promoted: bool,
    /// Reviewer that approved the promotion, set exactly once.
    pub reviewer_id: Option<String>,
    /// Creation timestamp in epoch milliseconds.
    pub created_at_ms: i64,
    /// Promotion timestamp in epoch milliseconds.
    pub promoted_at_ms: Option<i64>,
}

impl KnowletRecord {
    /// Creates a draft knowlet, generating its id and validating the
    /// integrity rules. Confidences are clamped to [0, 1] before the
    /// strict-monotonicity check so clamping can never mask a violation.
    pub fn create(
        parent_ids: Vec<String>,
        category: impl Into<String>,
        primary: impl Into<String>,
        summary: impl Into<String>,
        confidence: f64,
        parent_confidence: f64,
    ) -> Result<Self, MemoryError> {
        let category = category.into();
        let primary = primary.into();
        let summary = summary.into();

        let raw = format!(
            "{category}:{primary}:{summary}:{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let digest = Sha256::digest(raw.as_bytes());
        let knowlet_id = format!("{digest:x}")[..16].to_string();

        let record = Self {
            knowlet_id,
            parent_ids,
            category,
            primary,
            summary,
            confidence: confidence.clamp(0.0, 1.0),
            parent_confidence: parent_confidence.clamp(0.0, 1.0),
            is_promoted: false,
            reviewer_id: None,
            created_at_ms: Utc::now().timestamp_millis(),
            promoted_at_ms: None,
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks the integrity rules; also applied to records read back from
    /// disk so an invalid document never circulates.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.parent_ids.is_empty() {
            return Err(MemoryError::IntegrityViolation(
                "knowlet must reference at least one parent atom".to_string(),
            ));
        }
        if self.confidence <= self.parent_confidence {
            return Err(MemoryError::IntegrityViolation(format!(
                "knowlet confidence ({}) must exceed parent confidence ({})",
                self.confidence, self.parent_confidence
            )));
        }
        Ok(())
    }

    /// Returns a promoted copy. Requires a non-empty reviewer id.
    pub fn promote(&self, reviewer_id: &str) -> Result<Self, MemoryError> {
        if reviewer_id.trim().is_empty() {
            return Err(MemoryError::PermissionViolation(
                "knowlet promotion requires a reviewer id".to_string(),
            ));
        }
        let mut promoted = self.clone();
        promoted.is_promoted = true;
        promoted.reviewer_id = Some(reviewer_id.to_string());
        promoted.promoted_at_ms = Some(Utc::now().timestamp_millis());
        Ok(promoted)
    }
}

/// Consolidates atoms sharing a topic into knowlets under the majority rule.
#[derive(Debug)]
pub struct KnowletController {
    knowlet_root: PathBuf,
    production_root: PathBuf,
    majority_ratio: f64,
    shard: ShardConfig,
    telemetry: Option<MemoryTelemetry>,
}

impl KnowletController {
    /// Creates a controller with the default configuration.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let config = MemoryConfig::default();
        Self::with_config(base, config.majority_ratio, config.shard)
    }

    /// Creates a controller with explicit majority and shard settings.
    #[must_use]
    pub fn with_config(base: impl Into<PathBuf>, majority_ratio: f64, shard: ShardConfig) -> Self {
        let base = base.into();
        Self {
            knowlet_root: base.join("knowlet"),
            production_root: base.join("production"),
            majority_ratio,
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

    /// Drafts a knowlet if atoms tagged (category, primary) form a strict
    /// majority of the tier's population.
    ///
    /// Parent confidence is the mean of the matching atoms' metadata
    /// confidences, falling back to 0.5 when none carries one. Returns
    /// `None` when the majority is not reached, the confidence does not
    /// exceed the parents', or persistence fails.
    #[must_use]
    pub fn try_create(
        &self,
        tier: TierKind,
        category: &str,
        primary: &str,
        summary: &str,
        confidence: f64,
    ) -> Option<KnowletRecord> {
        let tier_path = self.production_root.join(tier.dir_name());
        if !tier_path.exists() {
            return None;
        }

        let mut total: usize = 0;
        let mut parent_ids = Vec::new();
        let mut parent_scores = Vec::new();
        for path in ShardPath::files_with_ext(&tier_path, ATOM_EXT) {
            total += 1;
            if !quick_check(&path) {
                continue;
            }
            let Ok(atom) = AtomRecord::load(&path) else {
                continue;
            };
            let Ok(meta) = AtomMetadata::from_bytes(&atom.metadata) else {
                continue;
            };
            if meta.category == category && meta.primary == primary {
                if let Some(id) = path.file_stem() {
                    parent_ids.push(id.to_string_lossy().into_owned());
                }
                if let Some(score) = meta.confidence {
                    parent_scores.push(score);
                }
            }
        }
        if total == 0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let ratio = parent_ids.len() as f64 / total as f64;
        if ratio <= self.majority_ratio {
            self.log(
                LogLevel::Debug,
                "knowlet.majority_not_reached",
                json!({ "category": category, "primary": primary, "matches": parent_ids.len(), "total": total }),
            );
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let parent_confidence = if parent_scores.is_empty() {
            0.5
        } else {
            parent_scores.iter().sum::<f64>() / parent_scores.len() as f64
        };
        if confidence <= parent_confidence {
            self.log(
                LogLevel::Warn,
                "knowlet.confidence_too_low",
                json!({ "confidence": confidence, "parent_confidence": parent_confidence }),
            );
            return None;
        }

        let parents = parent_ids.len();
        let knowlet = match KnowletRecord::create(
            parent_ids,
            category,
            primary,
            summary,
            confidence,
            parent_confidence,
        ) {
            Ok(knowlet) => knowlet,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "knowlet.create_failed",
                    json!({ "error": err.to_string() }),
                );
                return None;
            }
        };

        if self.write(&knowlet) {
            self.log(
                LogLevel::Info,
                "knowlet.created",
                json!({ "knowlet_id": knowlet.knowlet_id, "category": category, "primary": primary, "parents": parents }),
            );
            self.emit(
                "knowlet.created",
                json!({ "knowlet_id": knowlet.knowlet_id, "parents": parents }),
            );
            return Some(knowlet);
        }
        None
    }

    /// Promotes a knowlet. Requires a non-empty reviewer id; promoting an
    /// already-promoted knowlet is a no-op returning the stored record.
    pub fn promote(
        &self,
        knowlet_id: &str,
        category: &str,
        primary: &str,
        reviewer_id: &str,
    ) -> Result<Option<KnowletRecord>, MemoryError> {
        if reviewer_id.trim().is_empty() {
            return Err(MemoryError::PermissionViolation(
                "knowlet promotion requires a reviewer id".to_string(),
            ));
        }

        let Some(knowlet) = self.read(knowlet_id, category, primary) else {
            self.log(
                LogLevel::Warn,
                "knowlet.promote_not_found",
                json!({ "knowlet_id": knowlet_id }),
            );
            return Ok(None);
        };
        if knowlet.is_promoted {
            self.log(
                LogLevel::Warn,
                "knowlet.already_promoted",
                json!({ "knowlet_id": knowlet_id }),
            );
            return Ok(Some(knowlet));
        }

        let promoted = knowlet.promote(reviewer_id)?;
        if self.write(&promoted) {
            self.log(
                LogLevel::Info,
                "knowlet.promoted",
                json!({ "knowlet_id": knowlet_id, "reviewer_id": reviewer_id }),
            );
            self.emit(
                "knowlet.promoted",
                json!({ "knowlet_id": knowlet_id, "reviewer_id": reviewer_id }),
            );
            return Ok(Some(promoted));
        }
        Ok(None)
    }

    /// Reads a knowlet, tolerating a shard depth left mid-expansion.
    #[must_use]
    pub fn read(&self, knowlet_id: &str, category: &str, primary: &str) -> Option<KnowletRecord> {
        let built = self.knowlet_path(knowlet_id, category, primary);
        let path = if built.exists() {
            built
        } else {
            let topic_dir = self.knowlet_root.join(category).join(primary);
            ShardPath::locate(&topic_dir, knowlet_id, KNOWLET_EXT)?
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "knowlet.read_failed",
                    json!({ "knowlet_id": knowlet_id, "error": err.to_string() }),
                );
                return None;
            }
        };
        let record: KnowletRecord = match serde_json::from_str(&text) {
            Ok(record) => record,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "knowlet.parse_failed",
                    json!({ "knowlet_id": knowlet_id, "error": err.to_string() }),
                );
                return None;
            }
        };
        if let Err(err) = record.validate() {
            self.log(
                LogLevel::Error,
                "knowlet.invalid_on_disk",
                json!({ "knowlet_id": knowlet_id, "error": err.to_string() }),
            );
            return None;
        }
        Some(record)
    }

    /// Ids of unpromoted knowlets under (category, primary).
    #[must_use]
    pub fn list_draft(&self, category: &str, primary: &str) -> Vec<String> {
        self.list_by_status(category, primary, false)
    }

    /// Ids of promoted knowlets under (category, primary).
    #[must_use]
    pub fn list_promoted(&self, category: &str, primary: &str) -> Vec<String> {
        self.list_by_status(category, primary, true)
    }

    fn list_by_status(&self, category: &str, primary: &str, promoted: bool) -> Vec<String> {
        let topic_dir = self.knowlet_root.join(category).join(primary);
        let mut ids = Vec::new();
        for path in ShardPath::files_with_ext(&topic_dir, KNOWLET_EXT) {
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<KnowletRecord>(&text) else {
                continue;
            };
            if record.is_promoted == promoted {
                ids.push(record.knowlet_id);
            }
        }
        ids
    }

    fn write(&self, knowlet: &KnowletRecord) -> bool {
        let mut path = self.knowlet_path(&knowlet.knowlet_id, &knowlet.category, &knowlet.primary);
        let topic_dir = self
            .knowlet_root
            .join(&knowlet.category)
            .join(&knowlet.primary);

        let shard_dir = path.parent().map(Path::to_path_buf);
        if let Some(shard_dir) = shard_dir {
            let depth = ShardPath::detect_depth(&topic_dir);
            if depth < self.shard.max_depth
                && ShardPath::should_expand(&shard_dir, self.shard.folder_limit)
            {
                let new_depth = depth + 1;
                match ShardPath::expand(&topic_dir, KNOWLET_EXT, new_depth) {
                    Ok(moved) => {
                        self.log(
                            LogLevel::Info,
                            "knowlet.shard_expanded",
                            json!({ "category": knowlet.category, "primary": knowlet.primary, "depth": new_depth, "moved": moved }),
                        );
                        self.emit(
                            "knowlet.shard_expanded",
                            json!({ "category": knowlet.category, "depth": new_depth }),
                        );
                        path = ShardPath::build_knowlet_path(
                            &self.knowlet_root,
                            &knowlet.category,
                            &knowlet.primary,
                            &knowlet.knowlet_id,
                            new_depth,
                        );
                    }
                    Err(err) => {
                        self.log(
                            LogLevel::Error,
                            "knowlet.shard_expand_failed",
                            json!({ "error": err.to_string() }),
                        );
                    }
                }
            }
        }

        let text = match serde_json::to_string(knowlet) {
            Ok(text) => text,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "knowlet.write_failed",
                    json!({ "knowlet_id": knowlet.knowlet_id, "error": err.to_string() }),
                );
                return false;
            }
        };
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, text));
        match result {
            Ok(()) => true,
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "knowlet.write_failed",
                    json!({ "knowlet_id": knowlet.knowlet_id, "error": err.to_string() }),
                );
                false
            }
        }
    }

    fn knowlet_path(&self, knowlet_id: &str, category: &str, primary: &str) -> PathBuf {
        let topic_dir = self.knowlet_root.join(category).join(primary);
        let depth = ShardPath::detect_depth(&topic_dir);
        ShardPath::build_knowlet_path(&self.knowlet_root, category, primary, knowlet_id, depth)
    }

    fn log(&self, level: LogLevel, message: &str, fields: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, fields);
        }
    }

    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(event_type, payload);
        }
    }
}
