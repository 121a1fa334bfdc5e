use std::{fmt, fs, path::Path, path::PathBuf};

use crate::atom::{AtomHeader, AtomRecord, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};
use crate::error::MemoryError;

/// One defect found in a binary atom container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    /// Buffer shorter than header plus footer.
    Undersized {
        /// Actual buffer length.
        len: usize,
    },
    /// Magic bytes are not `ATOM`.
    BadMagic {
        /// The four bytes found at offset 0.
        found: [u8; 4],
    },
    /// Header carries an unknown container version.
    UnsupportedVersion {
        /// Version byte found.
        found: u8,
    },
    /// Reserved field is not zero.
    ReservedNonZero {
        /// Value found.
        value: u16,
    },
    /// Declared size disagrees with the buffer length.
    SizeMismatch {
        /// Actual buffer length.
        actual: usize,
        /// Header-declared total.
        expected: usize,
    },
    /// Stored CRC32 does not match the recomputed checksum.
    ChecksumMismatch {
        /// Checksum stored in the footer.
        stored: u32,
        /// Checksum recomputed over header and body.
        computed: u32,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undersized { len } => {
                write!(f, "buffer too small: {len} bytes (minimum {})", HEADER_SIZE + FOOTER_SIZE)
            }
            Self::BadMagic { found } => write!(f, "invalid magic bytes: {found:?}"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported version: {found} (current: {VERSION})")
            }
            Self::ReservedNonZero { value } => write!(f, "reserved field not zero: {value}"),
            Self::SizeMismatch { actual, expected } => {
                write!(f, "size mismatch: {actual} != {expected}")
            }
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "crc32 mismatch: {stored:08x} != {computed:08x}")
            }
        }
    }
}

/// Outcome of a repair attempt.
///
/// `success` means the result is decodable, not that it is lossless; any
/// data shed along the way is itemized in `warnings`.
#[derive(Debug, Clone)]
pub struct RepairReport {
    /// Whether a decodable record was produced.
    pub success: bool,
    /// Size of the input buffer.
    pub original_size: usize,
    /// Size of the repaired buffer.
    pub repaired_size: usize,
    /// Defects found before repair started.
    pub issues: Vec<Issue>,
    /// Fixes applied, in order.
    pub fixes: Vec<String>,
    /// Data-loss and residual-risk notes.
    pub warnings: Vec<String>,
    /// The recovered record when `success` is true.
    pub recovered: Option<AtomRecord>,
}

impl RepairReport {
    fn failure(
        original_size: usize,
        repaired_size: usize,
        issues: Vec<Issue>,
        fixes: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            original_size,
            repaired_size,
            issues,
            fixes,
            warnings,
            recovered: None,
        }
    }
}

/// Reports every defect in the buffer without modifying anything.
#[must_use]
pub fn diagnose(data: &[u8]) -> Vec<Issue> {
    let mut issues = Vec::new();
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        issues.push(Issue::Undersized { len: data.len() });
        return issues;
    }
    if data[0..4] != MAGIC {
        let mut found = [0_u8; 4];
        found.copy_from_slice(&data[0..4]);
        issues.push(Issue::BadMagic { found });
    }

    // Field positions are fixed, so the rest of the header is readable even
    // under a bad magic.
    let header = AtomHeader::parse_unchecked(data);
    if header.version != VERSION {
        issues.push(Issue::UnsupportedVersion { found: header.version });
    }
    if header.reserved != 0 {
        issues.push(Issue::ReservedNonZero { value: header.reserved });
    }
    let expected = header.expected_total();
    if data.len() != expected {
        issues.push(Issue::SizeMismatch {
            actual: data.len(),
            expected,
        });
    }
    if data.len() >= expected {
        let crc_offset = expected - FOOTER_SIZE;
        let stored = u32::from_be_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);
        let computed = crc32fast::hash(&data[..crc_offset]);
        if stored != computed {
            issues.push(Issue::ChecksumMismatch { stored, computed });
        }
    }
    issues
}

/// Attempts to recover a decodable record from a corrupted buffer.
///
/// Fix order: magic, reserved field, size reconciliation, CRC recompute.
/// Aggressive mode adds truncation salvage and a whole-buffer scan for a
/// container hiding behind leading garbage.
#[must_use]
pub fn repair(data: &[u8], aggressive: bool) -> RepairReport {
    let issues = diagnose(data);
    if issues.is_empty() {
        if let Ok(record) = AtomRecord::decode(data) {
            return RepairReport {
                success: true,
                original_size: data.len(),
                repaired_size: data.len(),
                issues,
                fixes: Vec::new(),
                warnings: Vec::new(),
                recovered: Some(record),
            };
        }
    }

    if aggressive && data.get(0..4) != Some(&MAGIC[..]) {
        if let Some(report) = scan_offsets(data, &issues) {
            return report;
        }
    }

    repair_in_place(data, issues, aggressive)
}

/// Tries a non-aggressive repair at every occurrence of the magic sequence,
/// returning the first recovery that succeeds.
fn scan_offsets(data: &[u8], issues: &[Issue]) -> Option<RepairReport> {
    let positions: Vec<usize> = data
        .windows(MAGIC.len())
        .enumerate()
        .filter(|(_, window)| *window == MAGIC)
        .map(|(index, _)| index)
        .collect();
    if positions.is_empty() {
        return None;
    }

    let preamble = format!("found {} candidate container offset(s)", positions.len());
    for pos in positions {
        if pos + HEADER_SIZE > data.len() {
            continue;
        }
        let mut report = repair(&data[pos..], false);
        if report.success {
            let mut fixes = vec![preamble.clone(), format!("recovered container at offset {pos}")];
            fixes.append(&mut report.fixes);
            report.fixes = fixes;
            report.issues = issues.to_vec();
            report.original_size = data.len();
            return Some(report);
        }
    }
    None
}

fn repair_in_place(data: &[u8], issues: Vec<Issue>, aggressive: bool) -> RepairReport {
    let original_size = data.len();
    let mut fixes = Vec::new();
    let mut warnings = Vec::new();

    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        warnings.push(format!("buffer too small to repair ({} bytes)", data.len()));
        return RepairReport::failure(original_size, data.len(), issues, fixes, warnings);
    }

    let mut work = data.to_vec();
    if work[0..4] != MAGIC {
        work[0..4].copy_from_slice(&MAGIC);
        fixes.push("restored magic bytes to \"ATOM\"".to_string());
    }

    let mut header = AtomHeader::parse_unchecked(&work);
    if header.reserved != 0 {
        work[6..8].copy_from_slice(&0_u16.to_be_bytes());
        header.reserved = 0;
        fixes.push("zeroed reserved field".to_string());
    }

    let expected = header.expected_total();
    if work.len() < expected {
        if aggressive {
            fixes.push("container truncated, attempting partial recovery".to_string());
            return recover_truncated(&work, &header, issues, fixes, warnings);
        }
        warnings.push(format!(
            "container truncated: {} < {expected}; aggressive mode can attempt partial recovery",
            work.len()
        ));
        return RepairReport::failure(original_size, work.len(), issues, fixes, warnings);
    }
    if work.len() > expected {
        let extra = work.len() - expected;
        work.truncate(expected);
        fixes.push(format!("trimmed {extra} trailing byte(s)"));
    }

    let crc_offset = expected - FOOTER_SIZE;
    let computed = crc32fast::hash(&work[..crc_offset]);
    work[crc_offset..].copy_from_slice(&computed.to_be_bytes());
    fixes.push(format!("recomputed crc32: {computed:08x}"));

    match AtomRecord::decode(&work) {
        Ok(record) => {
            if record.payload.is_empty() && record.metadata.is_empty() {
                warnings.push("recovered container carries no payload or metadata".to_string());
            }
            RepairReport {
                success: true,
                original_size,
                repaired_size: work.len(),
                issues,
                fixes,
                warnings,
                recovered: Some(record),
            }
        }
        Err(err) => {
            warnings.push(format!("repair failed: {err}"));
            RepairReport::failure(original_size, work.len(), issues, fixes, warnings)
        }
    }
}

/// Salvages what the available bytes allow, payload first, then metadata,
/// then source, recording exactly how much of each was lost.
fn recover_truncated(
    work: &[u8],
    header: &AtomHeader,
    issues: Vec<Issue>,
    mut fixes: Vec<String>,
    mut warnings: Vec<String>,
) -> RepairReport {
    let available_body = work.len() - HEADER_SIZE;

    let payload_take = (header.payload_len as usize).min(available_body);
    let mut remaining = available_body - payload_take;
    let metadata_take = (header.metadata_len as usize).min(remaining);
    remaining -= metadata_take;
    let source_take = (header.source_len as usize).min(remaining);

    let mut offset = HEADER_SIZE;
    let payload = work[offset..offset + payload_take].to_vec();
    offset += payload_take;
    let metadata = work[offset..offset + metadata_take].to_vec();
    offset += metadata_take;
    let source = work[offset..offset + source_take].to_vec();

    warnings.push(format!(
        "recovered {payload_take}/{} payload byte(s)",
        header.payload_len
    ));
    if payload_take < header.payload_len as usize {
        warnings.push(format!(
            "lost {} payload byte(s)",
            header.payload_len as usize - payload_take
        ));
    }
    if metadata_take < header.metadata_len as usize {
        warnings.push(format!(
            "lost {} metadata byte(s)",
            header.metadata_len as usize - metadata_take
        ));
    }
    if source_take < header.source_len as usize {
        warnings.push(format!(
            "lost {} source byte(s)",
            header.source_len as usize - source_take
        ));
    }

    fixes.push("partial recovery from truncated container".to_string());

    RepairReport {
        success: true,
        original_size: work.len(),
        repaired_size: work.len(),
        issues,
        fixes,
        warnings,
        recovered: Some(AtomRecord {
            payload,
            metadata,
            source,
            flags: header.flags,
            created_ts_ms: header.created_ts_ms,
        }),
    }
}

/// Cheap validity probe used by tiers before every read. Any decode failure
/// counts as invalid.
#[must_use]
pub fn quick_check(path: &Path) -> bool {
    fs::read(path).is_ok_and(|data| AtomRecord::decode(&data).is_ok())
}

/// Repairs a file, optionally writing the repaired container to `output`.
pub fn repair_file(
    input: &Path,
    output: Option<&Path>,
    aggressive: bool,
) -> Result<RepairReport, MemoryError> {
    let data = fs::read(input)?;
    let mut report = repair(&data, aggressive);
    if report.success {
        if let (Some(out), Some(record)) = (output, report.recovered.as_ref()) {
            record.save(out)?;
            report.fixes.push(format!("saved repaired container to {}", out.display()));
        }
    }
    Ok(report)
}

/// Repairs a file in place.
///
/// The repaired container is staged in a sibling file, validated, and only
/// then renamed over the original; the sibling is removed on any failure so
/// the original is never left half-replaced.
pub fn auto_repair(path: &Path, backup: bool) -> Result<bool, MemoryError> {
    let data = fs::read(path)?;
    if backup {
        fs::copy(path, sibling(path, "bak"))?;
    }

    let report = repair(&data, true);
    if !report.success {
        return Ok(false);
    }
    let Some(record) = report.recovered else {
        return Ok(false);
    };

    let staged = sibling(path, "repaired");
    if let Err(err) = record.save(&staged) {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }
    if AtomRecord::load(&staged).is_err() {
        let _ = fs::remove_file(&staged);
        return Ok(false);
    }
    if let Err(err) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(err.into());
    }
    Ok(true)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AtomRecord {
        AtomRecord::new(b"payload-bytes".to_vec())
            .with_metadata(b"{\"importance\":0.7}".to_vec())
            .with_source(b"unit".to_vec())
    }

    #[test]
    fn clean_input_repairs_to_itself_with_zero_fixes() {
        let record = sample_record();
        let report = repair(&record.encode(), false);
        assert!(report.success);
        assert!(report.issues.is_empty());
        assert!(report.fixes.is_empty());
        assert_eq!(report.recovered, Some(record));
    }

    #[test]
    fn diagnose_reports_every_defect() {
        let mut data = sample_record().encode();
        data[0] = b'X';
        data[6] = 0xAB;
        let issues = diagnose(&data);
        assert!(issues.iter().any(|i| matches!(i, Issue::BadMagic { .. })));
        assert!(issues.iter().any(|i| matches!(i, Issue::ReservedNonZero { .. })));
        assert!(issues.iter().any(|i| matches!(i, Issue::ChecksumMismatch { .. })));
    }

    #[test]
    fn diagnose_short_circuits_on_undersized() {
        let issues = diagnose(&[0_u8; 8]);
        assert_eq!(issues.len(), 1);
        assert!(matches!(issues[0], Issue::Undersized { len: 8 }));
    }

    #[test]
    fn restores_magic_and_reserved() {
        let record = sample_record();
        let mut data = record.encode();
        data[0..4].copy_from_slice(b"JUNK");
        data[6..8].copy_from_slice(&7_u16.to_be_bytes());
        let report = repair(&data, false);
        assert!(report.success);
        assert_eq!(report.recovered, Some(record));
        assert!(report.fixes.iter().any(|f| f.contains("magic")));
        assert!(report.fixes.iter().any(|f| f.contains("reserved")));
    }

    #[test]
    fn trims_trailing_garbage() {
        let record = sample_record();
        let mut data = record.encode();
        data.extend_from_slice(b"garbage-tail");
        let report = repair(&data, false);
        assert!(report.success);
        assert_eq!(report.recovered, Some(record));
        assert!(report.fixes.iter().any(|f| f.contains("trimmed 12")));
    }

    #[test]
    fn truncation_needs_aggressive_mode() {
        let record = sample_record();
        let encoded = record.encode();
        // cut into the source section
        let cut = &encoded[..encoded.len() - FOOTER_SIZE - 2];

        let gentle = repair(cut, false);
        assert!(!gentle.success);

        let report = repair(cut, true);
        assert!(report.success);
        let recovered = report.recovered.unwrap();
        assert_eq!(recovered.payload, record.payload);
        assert_eq!(recovered.metadata, record.metadata);
        assert!(recovered.source.len() < record.source.len());
        assert!(report.warnings.iter().any(|w| w.contains("source byte")));
    }

    #[test]
    fn aggressive_scan_skips_leading_garbage() {
        let record = sample_record();
        let mut data = b"leading-noise!".to_vec();
        data.extend_from_slice(&record.encode());

        assert!(!repair(&data, false).success);

        let report = repair(&data, true);
        assert!(report.success);
        assert_eq!(report.recovered, Some(record));
        assert!(report.fixes.iter().any(|f| f.contains("offset 14")));
    }

    #[test]
    fn undersized_buffer_without_magic_fails() {
        let report = repair(&[0x42_u8; 16], true);
        assert!(!report.success);
        assert!(report.recovered.is_none());
    }

    #[test]
    fn quick_check_distinguishes_valid_from_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.atom");
        let bad = dir.path().join("bad.atom");
        sample_record().save(&good).unwrap();
        std::fs::write(&bad, b"not an atom").unwrap();
        assert!(quick_check(&good));
        assert!(!quick_check(&bad));
        assert!(!quick_check(&dir.path().join("missing.atom")));
    }

    #[test]
    fn auto_repair_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("damaged.atom");
        let record = sample_record();
        let mut data = record.encode();
        data[0..4].copy_from_slice(b"JUNK");
        std::fs::write(&path, &data).unwrap();

        assert!(auto_repair(&path, true).unwrap());
        assert!(quick_check(&path));
        assert_eq!(AtomRecord::load(&path).unwrap(), record);
        assert!(dir.path().join("damaged.atom.bak").exists());
        assert!(!dir.path().join("damaged.atom.repaired").exists());
    }

    #[test]
    fn auto_repair_leaves_hopeless_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopeless.atom");
        std::fs::write(&path, vec![0x11_u8; 16]).unwrap();

        assert!(!auto_repair(&path, false).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x11_u8; 16]);
        assert!(!dir.path().join("hopeless.atom.repaired").exists());
        assert!(!dir.path().join("hopeless.atom.bak").exists());
    }

    #[test]
    fn repair_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.atom");
        let output = dir.path().join("out.atom");
        let record = sample_record();
        let mut data = record.encode();
        data[6] = 1;
        std::fs::write(&input, &data).unwrap();

        let report = repair_file(&input, Some(&output), false).unwrap();
        assert!(report.success);
        assert_eq!(AtomRecord::load(&output).unwrap(), record);
    }
}
