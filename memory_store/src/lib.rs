#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Sentra persistent memory substrate: binary atom storage across four
//! durability tiers, corruption repair, majority-vote consolidation, and
//! emotion-weighted recall.

/// Binary atom container codec and typed metadata.
pub mod atom;
/// Configuration structs with production defaults.
pub mod config;
/// Orchestration of writes, reads, promotion, and cleanup across tiers.
pub mod controller;
/// VAD emotion signal used as a read-time ranking input.
pub mod emotion;
/// Error taxonomy.
pub mod error;
/// Majority-vote consolidation into knowlets.
pub mod knowlet;
/// Corruption diagnosis and best-effort recovery.
pub mod repair;
/// Directory-sharding scheme shared by tiers and knowlet storage.
pub mod shard;
/// Durability tiers and their storage contract.
pub mod tier;
/// Topic descriptors embedded in atom metadata.
pub mod topic;

/// Telemetry helpers for memory operations.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use atom::{AtomHeader, AtomMetadata, AtomRecord};
pub use config::{MemoryConfig, ShardConfig, TierPolicy};
pub use controller::{
    AtomContext, CleanupSummary, MemoryController, MemoryGate, MemoryStats, PromotionSummary,
    WeightedAtom,
};
pub use emotion::EmotionSignal;
pub use error::{FormatError, MemoryError};
pub use knowlet::{KnowletController, KnowletRecord};
pub use repair::{auto_repair, diagnose, quick_check, repair, Issue, RepairReport};
pub use shard::ShardPath;
pub use telemetry::{MemoryTelemetry, MemoryTelemetryBuilder};
pub use tier::{TierKind, TierStore};
pub use topic::TopicDescriptor;
