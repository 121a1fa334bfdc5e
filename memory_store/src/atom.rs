use std::{fs, path::Path};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, MemoryError};
use crate::tier::TierKind;
use crate::topic::TopicDescriptor;

/// Magic bytes opening every atom container.
pub const MAGIC: [u8; 4] = *b"ATOM";
/// Current container version.
pub const VERSION: u8 = 1;
/// Fixed header size: magic 4 + version 1 + flags 1 + reserved 2 +
/// timestamp 8 + three length fields 4 each.
pub const HEADER_SIZE: usize = 28;
/// Trailing CRC32 size.
pub const FOOTER_SIZE: usize = 4;
/// File extension used for atoms on disk.
pub const ATOM_EXT: &str = "atom";

/// Schema tag embedded in every typed metadata document.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Fixed-size header of the atom container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    /// Container version.
    pub version: u8,
    /// Caller-defined flag bits.
    pub flags: u8,
    /// Reserved, must be zero.
    pub reserved: u16,
    /// Creation time in epoch milliseconds.
    pub created_ts_ms: i64,
    /// Payload section length.
    pub payload_len: u32,
    /// Metadata section length.
    pub metadata_len: u32,
    /// Source section length.
    pub source_len: u32,
}

impl AtomHeader {
    /// Packs the header into its big-endian wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0_u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = self.version;
        out[5] = self.flags;
        out[6..8].copy_from_slice(&self.reserved.to_be_bytes());
        out[8..16].copy_from_slice(&self.created_ts_ms.to_be_bytes());
        out[16..20].copy_from_slice(&self.payload_len.to_be_bytes());
        out[20..24].copy_from_slice(&self.metadata_len.to_be_bytes());
        out[24..28].copy_from_slice(&self.source_len.to_be_bytes());
        out
    }

    /// Parses a header from the start of `data`, checking length and magic.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Undersized {
                len: data.len(),
                min: HEADER_SIZE,
            });
        }
        if data[0..4] != MAGIC {
            let mut found = [0_u8; 4];
            found.copy_from_slice(&data[0..4]);
            return Err(FormatError::BadMagic { found });
        }
        Ok(Self::parse_unchecked(data))
    }

    /// Parses header fields by position without validating magic. Caller
    /// must supply at least `HEADER_SIZE` bytes.
    pub(crate) fn parse_unchecked(data: &[u8]) -> Self {
        Self {
            version: data[4],
            flags: data[5],
            reserved: u16::from_be_bytes([data[6], data[7]]),
            created_ts_ms: i64::from_be_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
            payload_len: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            metadata_len: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
            source_len: u32::from_be_bytes([data[24], data[25], data[26], data[27]]),
        }
    }

    /// Total container size this header declares.
    #[must_use]
    pub const fn expected_total(&self) -> usize {
        HEADER_SIZE
            + self.payload_len as usize
            + self.metadata_len as usize
            + self.source_len as usize
            + FOOTER_SIZE
    }
}

/// The fundamental unit of persisted memory.
///
/// Immutable once encoded; mutation means re-encoding a new value at the
/// same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomRecord {
    /// Opaque content bytes.
    pub payload: Vec<u8>,
    /// Serialized [`AtomMetadata`] document, by convention.
    pub metadata: Vec<u8>,
    /// Opaque provenance identifier.
    pub source: Vec<u8>,
    /// Caller-defined flag bits.
    pub flags: u8,
    /// Creation time in epoch milliseconds, defaulted at construction.
    pub created_ts_ms: i64,
}

impl AtomRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Vec::new(),
            source: Vec::new(),
            flags: 0,
            created_ts_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Attaches metadata bytes.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Attaches provenance bytes.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Vec<u8>>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the flag bits.
    #[must_use]
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Header describing this record's sections.
    #[must_use]
    pub fn header(&self) -> AtomHeader {
        #[allow(clippy::cast_possible_truncation)]
        AtomHeader {
            version: VERSION,
            flags: self.flags,
            reserved: 0,
            created_ts_ms: self.created_ts_ms,
            payload_len: self.payload.len() as u32,
            metadata_len: self.metadata.len() as u32,
            source_len: self.source.len() as u32,
        }
    }

    /// Encodes the record into the binary container: header, body, CRC32
    /// footer over everything preceding it. Always succeeds.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut out = Vec::with_capacity(header.expected_total());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.metadata);
        out.extend_from_slice(&self.source);
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    /// Decodes a binary container.
    ///
    /// The four checks are independent: undersized input, magic, declared
    /// size versus actual length, and CRC32. A truncated buffer can carry a
    /// plausible checksum, so the size check never defers to the CRC.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(FormatError::Undersized {
                len: data.len(),
                min: HEADER_SIZE + FOOTER_SIZE,
            });
        }
        let header = AtomHeader::from_bytes(data)?;
        let expected = header.expected_total();
        if data.len() != expected {
            return Err(FormatError::SizeMismatch {
                actual: data.len(),
                expected,
            });
        }

        let crc_offset = expected - FOOTER_SIZE;
        let stored = u32::from_be_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);
        let computed = crc32fast::hash(&data[..crc_offset]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch { stored, computed });
        }

        let mut offset = HEADER_SIZE;
        let payload = data[offset..offset + header.payload_len as usize].to_vec();
        offset += header.payload_len as usize;
        let metadata = data[offset..offset + header.metadata_len as usize].to_vec();
        offset += header.metadata_len as usize;
        let source = data[offset..offset + header.source_len as usize].to_vec();

        Ok(Self {
            payload,
            metadata,
            source,
            flags: header.flags,
            created_ts_ms: header.created_ts_ms,
        })
    }

    /// Writes the encoded container to a file.
    pub fn save(&self, path: &Path) -> Result<(), MemoryError> {
        fs::write(path, self.encode())?;
        Ok(())
    }

    /// Reads and decodes a container from a file.
    pub fn load(path: &Path) -> Result<Self, MemoryError> {
        let data = fs::read(path)?;
        Ok(Self::decode(&data)?)
    }
}

/// Typed metadata document embedded in an atom at write time.
///
/// Replaces ad-hoc key/value maps at the storage boundary; the schema tag
/// lets future readers dispatch on layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomMetadata {
    /// Metadata layout version.
    pub schema_version: u32,
    /// Storage category derived from the topic.
    pub category: String,
    /// Primary topic key derived from the topic's top keyword.
    pub primary: String,
    /// Caller-supplied importance in [0, 1].
    pub importance: f64,
    /// Tier the atom was routed to at write time.
    pub tier: TierKind,
    /// Optional consolidation confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Embedded topic descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicDescriptor>,
}

impl AtomMetadata {
    /// Creates a metadata document with the current schema tag.
    #[must_use]
    pub fn new(
        category: String,
        primary: String,
        importance: f64,
        tier: TierKind,
    ) -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            category,
            primary,
            importance,
            tier,
            confidence: None,
            topic: None,
        }
    }

    /// Attaches the embedded topic descriptor.
    #[must_use]
    pub fn with_topic(mut self, topic: TopicDescriptor) -> Self {
        self.topic = Some(topic);
        self
    }

    /// Serializes into the bytes stored in [`AtomRecord::metadata`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, MemoryError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses the metadata document out of an atom's metadata bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MemoryError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AtomRecord {
        AtomRecord::new(b"the payload".to_vec())
            .with_metadata(b"{\"k\":1}".to_vec())
            .with_source(b"unit-test".to_vec())
            .with_flags(0b0000_0101)
    }

    #[test]
    fn encode_decode_round_trip() {
        let record = sample_record();
        let encoded = record.encode();
        assert_eq!(
            encoded.len(),
            HEADER_SIZE + record.payload.len() + record.metadata.len() + record.source.len()
                + FOOTER_SIZE
        );
        let decoded = AtomRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn body_tamper_fails_checksum() {
        let encoded = sample_record().encode();
        for index in HEADER_SIZE..encoded.len() - FOOTER_SIZE {
            let mut tampered = encoded.clone();
            tampered[index] ^= 0xFF;
            assert!(matches!(
                AtomRecord::decode(&tampered),
                Err(FormatError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn length_field_tamper_fails_size_check() {
        let mut tampered = sample_record().encode();
        // payload_len lives at offset 16..20
        tampered[19] = tampered[19].wrapping_add(1);
        assert!(matches!(
            AtomRecord::decode(&tampered),
            Err(FormatError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut tampered = sample_record().encode();
        tampered[0] = b'X';
        assert!(matches!(
            AtomRecord::decode(&tampered),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn undersized_input_is_rejected() {
        let encoded = sample_record().encode();
        assert!(matches!(
            AtomRecord::decode(&encoded[..HEADER_SIZE + FOOTER_SIZE - 1]),
            Err(FormatError::Undersized { .. })
        ));
    }

    #[test]
    fn save_and_load_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.atom");
        let record = sample_record();
        record.save(&path).unwrap();
        let loaded = AtomRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn metadata_document_round_trips() {
        let meta = AtomMetadata::new("learning".into(), "rust".into(), 0.8, TierKind::Long)
            .with_topic(TopicDescriptor::new(3, ["rust"], 0.9, Some("learning".into())));
        let bytes = meta.to_bytes().unwrap();
        let parsed = AtomMetadata::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.schema_version, METADATA_SCHEMA_VERSION);
    }
}
