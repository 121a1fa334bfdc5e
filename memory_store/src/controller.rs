use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use shared_logging::LogLevel;

use crate::atom::{AtomMetadata, AtomRecord};
use crate::config::MemoryConfig;
use crate::emotion::EmotionSignal;
use crate::error::MemoryError;
use crate::knowlet::KnowletController;
use crate::telemetry::MemoryTelemetry;
use crate::tier::{TierKind, TierStore};
use crate::topic::TopicDescriptor;

/// Primary key used when a topic carries no keywords.
const FALLBACK_PRIMARY: &str = "unknown";
/// Payload bytes sampled into the content-derived id and gate text.
const PAYLOAD_PREVIEW_LEN: usize = 32;

/// Gate predicate consulted before any write or emotion-weighted read.
///
/// Implemented by the rule/policy layer; this core only honors the verdict.
pub trait MemoryGate: Send + Sync {
    /// Returns whether the memory operation may proceed, with a reason when
    /// it may not.
    fn is_memory_allowed(&self, text: Option<&str>) -> (bool, String);
}

/// An atom together with its deserialized context.
#[derive(Debug, Clone)]
pub struct AtomContext {
    /// Atom id.
    pub atom_id: String,
    /// The stored record.
    pub record: AtomRecord,
    /// Topic embedded in the atom's metadata, if parseable.
    pub topic: Option<TopicDescriptor>,
    /// Tier the atom was found in.
    pub tier: Option<TierKind>,
}

/// An atom scored for response generation.
#[derive(Debug, Clone)]
pub struct WeightedAtom {
    /// The retrieved atom and its context.
    pub context: AtomContext,
    /// Emotion-weighted score; higher ranks earlier.
    pub score: f64,
    /// The atom's stored importance.
    pub importance: f64,
}

/// Counts produced by [`MemoryController::auto_promote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionSummary {
    /// Atoms moved from Short to Middle.
    pub short_to_middle: usize,
    /// Atoms moved from Middle to Long.
    pub middle_to_long: usize,
}

/// Counts produced by [`MemoryController::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    /// Stale Short atoms removed.
    pub short: usize,
    /// Expired Middle atoms removed.
    pub middle: usize,
    /// Expired Long atoms removed.
    pub long: usize,
}

/// Per-tier atom counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Short tier count.
    pub short: usize,
    /// Middle tier count.
    pub middle: usize,
    /// Long tier count.
    pub long: usize,
    /// Immortal tier count.
    pub immortal: usize,
}

/// Orchestrates writes, emotion-weighted reads, promotion, and cleanup
/// across the four tiers. The public entry point for the rest of the agent.
pub struct MemoryController {
    config: MemoryConfig,
    short: TierStore,
    middle: TierStore,
    long: TierStore,
    immortal: TierStore,
    knowlet: KnowletController,
    gate: Option<Arc<dyn MemoryGate>>,
    telemetry: Option<MemoryTelemetry>,
}

impl std::fmt::Debug for MemoryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryController")
            .field("short", &self.short.root())
            .field("immortal", &self.immortal.root())
            .finish_non_exhaustive()
    }
}

impl MemoryController {
    /// Creates a controller with the default configuration.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::with_config(base, MemoryConfig::default())
    }

    /// Creates a controller with an explicit configuration.
    #[must_use]
    pub fn with_config(base: impl Into<PathBuf>, config: MemoryConfig) -> Self {
        let base = base.into();
        let production = base.join("production");
        let tier = |kind: TierKind| {
            TierStore::new(
                production.join(kind.dir_name()),
                kind,
                config.policy(kind),
                config.shard,
            )
        };
        Self {
            short: tier(TierKind::Short),
            middle: tier(TierKind::Middle),
            long: tier(TierKind::Long),
            immortal: tier(TierKind::Immortal),
            knowlet: KnowletController::with_config(&base, config.majority_ratio, config.shard),
            config,
            gate: None,
            telemetry: None,
        }
    }

    /// Attaches the rule-layer gate consulted before writes and
    /// emotion-weighted reads.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn MemoryGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Attaches a telemetry handle, shared with the tiers and knowlet
    /// storage.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: MemoryTelemetry) -> Self {
        self.short = self.short.with_telemetry(telemetry.clone());
        self.middle = self.middle.with_telemetry(telemetry.clone());
        self.long = self.long.with_telemetry(telemetry.clone());
        self.immortal = self.immortal.with_telemetry(telemetry.clone());
        self.knowlet = self.knowlet.with_telemetry(telemetry.clone());
        self.telemetry = Some(telemetry);
        self
    }

    /// Consolidation controller for the same storage base.
    #[must_use]
    pub const fn knowlets(&self) -> &KnowletController {
        &self.knowlet
    }

    /// Writes an atom, deriving its storage address from the topic and
    /// routing by importance when no tier is given.
    ///
    /// Returns the content-derived atom id, or `None` when the gate vetoes
    /// the write, the importance is below the floor, or storage fails.
    pub fn write(
        &self,
        record: &AtomRecord,
        topic: &TopicDescriptor,
        importance: f64,
        tier: Option<TierKind>,
    ) -> Option<String> {
        let preview = payload_preview(&record.payload);
        if !self.gate_allows(Some(&preview), "write") {
            return None;
        }
        if importance < self.config.write_min_importance {
            self.log(
                LogLevel::Debug,
                "memory.write_skipped",
                json!({ "importance": importance }),
            );
            return None;
        }

        let category = topic
            .label
            .clone()
            .unwrap_or_else(|| format!("cluster_{}", topic.cluster_id));
        let primary = topic
            .top_keyword()
            .unwrap_or(FALLBACK_PRIMARY)
            .to_string();
        let target = tier.unwrap_or_else(|| self.select_tier(importance));
        let atom_id = content_id(&category, &primary, &preview);

        let meta = AtomMetadata::new(category.clone(), primary.clone(), importance, target)
            .with_topic(topic.clone());
        let Ok(metadata) = meta.to_bytes() else {
            return None;
        };
        let enriched = AtomRecord {
            payload: record.payload.clone(),
            metadata,
            source: record.source.clone(),
            flags: record.flags,
            created_ts_ms: record.created_ts_ms,
        };

        if self.tier(target).write(&atom_id, &enriched) {
            self.log(
                LogLevel::Info,
                "memory.write",
                json!({ "atom_id": atom_id, "category": category, "primary": primary, "tier": target, "importance": importance }),
            );
            self.emit(
                "memory.write",
                json!({ "atom_id": atom_id, "tier": target }),
            );
            return Some(atom_id);
        }
        None
    }

    /// Records a generated response without the caller having to assemble
    /// an atom or topic itself.
    pub fn write_response(&self, text: &str, context: &str, importance: f64) -> Option<String> {
        let record = AtomRecord::new(text.as_bytes().to_vec())
            .with_source(format!("agent_response_{context}").into_bytes());
        let topic = TopicDescriptor::new(
            crc32fast::hash(context.as_bytes()) % 10_000,
            [context],
            importance.min(1.0),
            Some(context.to_string()),
        );
        self.write(&record, &topic, importance, None)
    }

    /// Reads a raw atom, scoped to a tier or probing most-durable-first.
    #[must_use]
    pub fn read(&self, atom_id: &str, tier: Option<TierKind>) -> Option<AtomRecord> {
        if let Some(kind) = tier {
            return self.tier(kind).read(atom_id);
        }
        self.probe_order()
            .iter()
            .find_map(|kind| self.tier(*kind).read(atom_id))
    }

    /// Reads an atom together with its embedded topic and the tier it was
    /// found in.
    #[must_use]
    pub fn read_with_context(&self, atom_id: &str, tier: Option<TierKind>) -> Option<AtomContext> {
        let (record, found_tier) = if let Some(kind) = tier {
            (self.tier(kind).read(atom_id)?, kind)
        } else {
            self.probe_order()
                .iter()
                .find_map(|kind| self.tier(*kind).read(atom_id).map(|r| (r, *kind)))?
        };

        let topic = AtomMetadata::from_bytes(&record.metadata)
            .ok()
            .and_then(|meta| meta.topic);
        if topic.is_none() {
            self.log(
                LogLevel::Warn,
                "memory.metadata_unreadable",
                json!({ "atom_id": atom_id }),
            );
        }
        Some(AtomContext {
            atom_id: atom_id.to_string(),
            record,
            topic,
            tier: Some(found_tier),
        })
    }

    /// Loads the given atoms and ranks them by the VAD weighting formula,
    /// returning the top `limit` by descending score. A missing emotion
    /// signal defaults to neutral.
    #[must_use]
    pub fn read_for_response(
        &self,
        atom_ids: &[String],
        emotion: Option<&EmotionSignal>,
        limit: usize,
    ) -> Vec<WeightedAtom> {
        if !self.gate_allows(None, "read_for_response") {
            return Vec::new();
        }
        let neutral = EmotionSignal::neutral();
        let signal = emotion.unwrap_or(&neutral);

        let mut results: Vec<WeightedAtom> = Vec::new();
        for atom_id in atom_ids {
            let Some(context) = self.read_with_context(atom_id, None) else {
                continue;
            };
            let importance = AtomMetadata::from_bytes(&context.record.metadata)
                .map_or(self.config.write_min_importance, |meta| meta.importance);
            let coherence = context.topic.as_ref().map_or(0.5, |topic| topic.coherence);
            let rank = context.tier.map_or(1, TierKind::rank);
            let score = emotion_weight(importance, coherence, rank, signal);
            results.push(WeightedAtom {
                context,
                score,
                importance,
            });
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }

    /// True when the atom exists, in the given tier or anywhere.
    #[must_use]
    pub fn exists(&self, atom_id: &str, tier: Option<TierKind>) -> bool {
        if let Some(kind) = tier {
            return self.tier(kind).exists(atom_id);
        }
        TierKind::ALL
            .iter()
            .any(|kind| self.tier(*kind).exists(atom_id))
    }

    /// Moves an atom one tier up the durability order.
    ///
    /// Promotion into Immortal requires a non-empty reviewer id; omitting it
    /// is a permission violation. The stored metadata is re-stamped with the
    /// destination tier so the on-disk tag stays truthful.
    pub fn promote(
        &self,
        atom_id: &str,
        from: TierKind,
        reviewer_id: Option<&str>,
    ) -> Result<bool, MemoryError> {
        let Some(to) = from.next() else {
            return Ok(false);
        };
        if to == TierKind::Immortal && reviewer_id.map_or(true, |id| id.trim().is_empty()) {
            return Err(MemoryError::PermissionViolation(
                "promotion into the immortal tier requires a reviewer id".to_string(),
            ));
        }

        let Some(mut record) = self.tier(from).read(atom_id) else {
            return Ok(false);
        };
        if let Ok(mut meta) = AtomMetadata::from_bytes(&record.metadata) {
            meta.tier = to;
            if let Ok(bytes) = meta.to_bytes() {
                record.metadata = bytes;
            }
        }
        if !self.tier(to).write(atom_id, &record) {
            return Ok(false);
        }
        self.tier(from).delete(atom_id)?;

        self.log(
            LogLevel::Info,
            "memory.promote",
            json!({ "atom_id": atom_id, "from": from, "to": to, "reviewer_id": reviewer_id }),
        );
        self.emit(
            "memory.promote",
            json!({ "atom_id": atom_id, "from": from, "to": to }),
        );
        Ok(true)
    }

    /// Promotes every atom the Short and Middle tiers report promotable.
    /// Promotion into Immortal stays manual because it needs a reviewer.
    #[must_use]
    pub fn auto_promote(&self) -> PromotionSummary {
        let mut summary = PromotionSummary::default();
        for atom_id in self.short.list_promotable() {
            if matches!(self.promote(&atom_id, TierKind::Short, None), Ok(true)) {
                summary.short_to_middle += 1;
            }
        }
        for atom_id in self.middle.list_promotable() {
            if matches!(self.promote(&atom_id, TierKind::Middle, None), Ok(true)) {
                summary.middle_to_long += 1;
            }
        }
        self.emit("memory.auto_promote", json!(summary));
        summary
    }

    /// Deletes expired Middle/Long atoms and stale Short atoms, sparing
    /// Short atoms that are simultaneously promotable.
    #[must_use]
    pub fn cleanup(&self) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for atom_id in self.middle.list_expired() {
            if matches!(self.middle.delete(&atom_id), Ok(true)) {
                summary.middle += 1;
            }
        }
        for atom_id in self.long.list_expired() {
            if matches!(self.long.delete(&atom_id), Ok(true)) {
                summary.long += 1;
            }
        }
        let promotable = self.short.list_promotable();
        for atom_id in self.short.list_stale() {
            if promotable.contains(&atom_id) {
                continue;
            }
            if matches!(self.short.delete(&atom_id), Ok(true)) {
                summary.short += 1;
            }
        }
        self.log(LogLevel::Info, "memory.cleanup", json!(summary));
        self.emit("memory.cleanup", json!(summary));
        summary
    }

    /// Wipes the Short tier at session end, returning how many atoms were
    /// removed.
    #[must_use]
    pub fn clear_session(&self) -> usize {
        let cleared = self.short.clear().unwrap_or_default();
        self.log(LogLevel::Info, "memory.clear_session", json!({ "cleared": cleared }));
        cleared
    }

    /// Per-tier atom counts.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            short: self.short.count(),
            middle: self.middle.count(),
            long: self.long.count(),
            immortal: self.immortal.count(),
        }
    }

    /// Routes an importance score to a tier.
    fn select_tier(&self, importance: f64) -> TierKind {
        if importance >= self.config.immortal_importance {
            TierKind::Immortal
        } else if importance >= self.config.long_importance {
            TierKind::Long
        } else if importance >= self.config.middle_importance {
            TierKind::Middle
        } else {
            TierKind::Short
        }
    }

    const fn probe_order(&self) -> [TierKind; 4] {
        [
            TierKind::Immortal,
            TierKind::Long,
            TierKind::Middle,
            TierKind::Short,
        ]
    }

    const fn tier(&self, kind: TierKind) -> &TierStore {
        match kind {
            TierKind::Short => &self.short,
            TierKind::Middle => &self.middle,
            TierKind::Long => &self.long,
            TierKind::Immortal => &self.immortal,
        }
    }

    fn gate_allows(&self, text: Option<&str>, operation: &str) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };
        let (allowed, reason) = gate.is_memory_allowed(text);
        if !allowed {
            self.log(
                LogLevel::Warn,
                "memory.gate_blocked",
                json!({ "operation": operation, "reason": reason }),
            );
        }
        allowed
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

/// The VAD weighting formula.
///
/// Negative valence biases toward importance, positive valence toward
/// coherence; arousal boosts everything up to 1.5x; dominance above 0.5
/// pulls weight toward deeper tiers, below 0.5 toward shallow ones.
#[must_use]
pub fn emotion_weight(
    importance: f64,
    coherence: f64,
    tier_rank: u8,
    emotion: &EmotionSignal,
) -> f64 {
    let v_norm = (emotion.valence + 1.0) / 2.0;
    let blended = (1.0 - v_norm).mul_add(importance, v_norm * coherence);
    let arousal_boost = emotion.arousal.mul_add(0.5, 1.0);
    let tier_factor = (emotion.dominance - 0.5).mul_add(f64::from(tier_rank) / 4.0, 1.0);
    blended * arousal_boost * tier_factor
}

fn payload_preview(payload: &[u8]) -> String {
    let take = payload.len().min(PAYLOAD_PREVIEW_LEN);
    String::from_utf8_lossy(&payload[..take]).into_owned()
}

fn content_id(category: &str, primary: &str, preview: &str) -> String {
    let raw = format!(
        "{category}:{primary}:{preview}:{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let digest = Sha256::digest(raw.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShardConfig, TierPolicy};
    use tempfile::tempdir;

    struct DenyAll;

    impl MemoryGate for DenyAll {
        fn is_memory_allowed(&self, _text: Option<&str>) -> (bool, String) {
            (false, "blocked by rule".to_string())
        }
    }

    fn topic(label: &str, keyword: &str, coherence: f64) -> TopicDescriptor {
        TopicDescriptor::new(1, [keyword], coherence, Some(label.to_string()))
    }

    fn atom(text: &str) -> AtomRecord {
        AtomRecord::new(text.as_bytes().to_vec()).with_source(b"test".to_vec())
    }

    fn permissive_config() -> MemoryConfig {
        MemoryConfig {
            write_min_importance: 0.0,
            ..MemoryConfig::default()
        }
    }

    #[test]
    fn importance_routes_to_tiers() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());

        assert!(controller.write(&atom("a"), &topic("t", "k", 0.5), 0.1, None).is_none());

        let cases = [
            (0.35, TierKind::Short),
            (0.55, TierKind::Middle),
            (0.75, TierKind::Long),
            (0.95, TierKind::Immortal),
        ];
        for (importance, expected) in cases {
            let id = controller
                .write(&atom("routed"), &topic("t", "k", 0.5), importance, None)
                .unwrap();
            assert!(
                controller.exists(&id, Some(expected)),
                "importance {importance} should land in {expected}"
            );
        }

        let stats = controller.stats();
        assert_eq!(stats.short, 1);
        assert_eq!(stats.middle, 1);
        assert_eq!(stats.long, 1);
        assert_eq!(stats.immortal, 1);
    }

    #[test]
    fn write_embeds_typed_metadata() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let id = controller
            .write(&atom("hello"), &topic("fact", "gravity", 0.8), 0.75, None)
            .unwrap();
        let record = controller.read(&id, None).unwrap();
        let meta = AtomMetadata::from_bytes(&record.metadata).unwrap();
        assert_eq!(meta.category, "fact");
        assert_eq!(meta.primary, "gravity");
        assert!((meta.importance - 0.75).abs() < f64::EPSILON);
        assert_eq!(meta.tier, TierKind::Long);
        assert_eq!(meta.topic.unwrap().label.as_deref(), Some("fact"));
    }

    #[test]
    fn unlabeled_topic_derives_cluster_category() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let unlabeled = TopicDescriptor::new(42, ["signal"], 0.6, None);
        let id = controller.write(&atom("x"), &unlabeled, 0.5, None).unwrap();
        let meta =
            AtomMetadata::from_bytes(&controller.read(&id, None).unwrap().metadata).unwrap();
        assert_eq!(meta.category, "cluster_42");
        assert_eq!(meta.primary, "signal");
    }

    #[test]
    fn read_probes_most_durable_first() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        // plant the same id in Short and Long through raw tier stores
        let meta = AtomMetadata::new("c".into(), "p".into(), 0.5, TierKind::Short);
        let in_short = AtomRecord::new(b"shallow".to_vec())
            .with_metadata(meta.to_bytes().unwrap());
        let in_long = AtomRecord::new(b"durable".to_vec())
            .with_metadata(meta.to_bytes().unwrap());
        let shard = ShardConfig::default();
        let short = TierStore::new(
            dir.path().join("production").join("short"),
            TierKind::Short,
            TierPolicy::unbounded(),
            shard,
        );
        let long = TierStore::new(
            dir.path().join("production").join("long"),
            TierKind::Long,
            TierPolicy::unbounded(),
            shard,
        );
        assert!(short.write("cafe01", &in_short));
        assert!(long.write("cafe01", &in_long));

        let record = controller.read("cafe01", None).unwrap();
        assert_eq!(record.payload, b"durable");
        let scoped = controller.read("cafe01", Some(TierKind::Short)).unwrap();
        assert_eq!(scoped.payload, b"shallow");
    }

    #[test]
    fn promotion_into_immortal_requires_reviewer() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let id = controller
            .write(&atom("vital"), &topic("identity", "core", 0.9), 0.75, None)
            .unwrap();
        assert!(controller.exists(&id, Some(TierKind::Long)));

        assert!(matches!(
            controller.promote(&id, TierKind::Long, None),
            Err(MemoryError::PermissionViolation(_))
        ));
        assert!(matches!(
            controller.promote(&id, TierKind::Long, Some("  ")),
            Err(MemoryError::PermissionViolation(_))
        ));

        assert!(controller.promote(&id, TierKind::Long, Some("rev-9")).unwrap());
        assert!(controller.exists(&id, Some(TierKind::Immortal)));
        assert!(!controller.exists(&id, Some(TierKind::Long)));

        let meta =
            AtomMetadata::from_bytes(&controller.read(&id, None).unwrap().metadata).unwrap();
        assert_eq!(meta.tier, TierKind::Immortal);

        // top of the order: nowhere to go
        assert!(!controller.promote(&id, TierKind::Immortal, Some("rev-9")).unwrap());
    }

    #[test]
    fn auto_promote_walks_promotable_atoms_up() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let id = controller
            .write(&atom("keeper"), &topic("t", "k", 0.5), 0.8, Some(TierKind::Short))
            .unwrap();

        let summary = controller.auto_promote();
        assert_eq!(summary.short_to_middle, 1);
        assert_eq!(summary.middle_to_long, 1);
        assert!(controller.exists(&id, Some(TierKind::Long)));
        assert!(!controller.exists(&id, Some(TierKind::Short)));
    }

    #[test]
    fn cleanup_spares_promotable_stale_atoms() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let now = Utc::now().timestamp_millis();

        let mut stale_low = atom("stale-low");
        stale_low.created_ts_ms = now - 3_600_000; // an hour old
        let swept = controller
            .write(&stale_low, &topic("t", "k", 0.5), 0.35, None)
            .unwrap();

        let mut stale_high = atom("stale-high");
        stale_high.created_ts_ms = now - 3_600_000;
        let spared = controller
            .write(&stale_high, &topic("t", "k", 0.5), 0.8, Some(TierKind::Short))
            .unwrap();

        let mut middle_old = atom("middle-old");
        middle_old.created_ts_ms = now - 19_000_000; // past the 5h expiry
        let expired = controller
            .write(&middle_old, &topic("t", "k", 0.5), 0.45, None)
            .unwrap();

        let summary = controller.cleanup();
        assert_eq!(summary.short, 1);
        assert_eq!(summary.middle, 1);
        assert_eq!(summary.long, 0);
        assert!(!controller.exists(&swept, None));
        assert!(controller.exists(&spared, Some(TierKind::Short)));
        assert!(!controller.exists(&expired, None));
    }

    #[test]
    fn clear_session_wipes_short_only() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        controller.write(&atom("a"), &topic("t", "k", 0.5), 0.35, None).unwrap();
        controller.write(&atom("b"), &topic("t", "k", 0.5), 0.35, None).unwrap();
        let kept = controller
            .write(&atom("c"), &topic("t", "k", 0.5), 0.75, None)
            .unwrap();

        assert_eq!(controller.clear_session(), 2);
        assert_eq!(controller.stats().short, 0);
        assert!(controller.exists(&kept, Some(TierKind::Long)));
    }

    #[test]
    fn vad_ranking_follows_valence_polarity() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::with_config(dir.path(), permissive_config());

        let heavy = controller
            .write(
                &atom("heavyweight"),
                &topic("t", "heavy", 0.2),
                0.9,
                Some(TierKind::Short),
            )
            .unwrap();
        let coherent = controller
            .write(
                &atom("coherent"),
                &topic("t", "coherent", 0.9),
                0.2,
                Some(TierKind::Short),
            )
            .unwrap();
        let ids = vec![heavy.clone(), coherent.clone()];

        let negative = EmotionSignal::new(-0.9, 0.2, 0.5);
        let ranked = controller.read_for_response(&ids, Some(&negative), 5);
        assert_eq!(ranked[0].context.atom_id, heavy);

        let positive = EmotionSignal::new(0.9, 0.2, 0.5);
        let ranked = controller.read_for_response(&ids, Some(&positive), 5);
        assert_eq!(ranked[0].context.atom_id, coherent);

        let top_only = controller.read_for_response(&ids, None, 1);
        assert_eq!(top_only.len(), 1);
    }

    #[test]
    fn emotion_weight_matches_formula() {
        let signal = EmotionSignal::new(0.5, 0.4, 0.8);
        let score = emotion_weight(0.6, 0.8, 4, &signal);
        // v=0.75, blended=0.25*0.6+0.75*0.8=0.75, arousal=1.2, tier=1.3
        assert!((score - 0.75 * 1.2 * 1.3).abs() < 1e-9);

        let neutral = EmotionSignal::neutral();
        let flat = emotion_weight(0.6, 0.8, 2, &neutral);
        assert!((flat - 0.7).abs() < 1e-9);
    }

    #[test]
    fn gate_vetoes_writes_and_weighted_reads() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path()).with_gate(Arc::new(DenyAll));
        assert!(controller
            .write(&atom("blocked"), &topic("t", "k", 0.5), 0.9, None)
            .is_none());
        assert!(controller
            .read_for_response(&["anything".to_string()], None, 5)
            .is_empty());
        assert_eq!(controller.stats().immortal, 0);
    }

    #[test]
    fn write_response_synthesizes_atom_and_topic() {
        let dir = tempdir().unwrap();
        let controller = MemoryController::new(dir.path());
        let id = controller.write_response("the answer", "math", 0.5).unwrap();
        let context = controller.read_with_context(&id, None).unwrap();
        assert_eq!(context.record.payload, b"the answer");
        assert_eq!(context.record.source, b"agent_response_math");
        assert_eq!(context.tier, Some(TierKind::Middle));
        assert_eq!(context.topic.unwrap().label.as_deref(), Some("math"));
    }
}
