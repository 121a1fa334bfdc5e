use std::{fs, io, path::Path, path::PathBuf};

use walkdir::WalkDir;

/// Shard-tree path derivation and maintenance.
///
/// Layout: `{base}/{category}/{primary}/{shard}/{id}.{ext}` where the shard
/// segment is the id's uppercase hex prefix of the directory's current
/// depth. Depth 0 means a flat topic directory; expansion adds one hex
/// character at a time.
pub struct ShardPath;

impl ShardPath {
    /// Shard segment for an id at the given depth. Depth 0 yields an empty
    /// segment (flat layout).
    #[must_use]
    pub fn shard_segment(id: &str, depth: usize) -> String {
        id.chars().take(depth).collect::<String>().to_uppercase()
    }

    /// Infers the shard depth a topic directory already uses: 0 when the
    /// directory is flat or does not exist, otherwise the longest
    /// subdirectory name.
    #[must_use]
    pub fn detect_depth(topic_dir: &Path) -> usize {
        let Ok(entries) = fs::read_dir(topic_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().chars().count())
            .max()
            .unwrap_or(0)
    }

    /// True when the directory's direct entry count exceeds the folder
    /// limit.
    #[must_use]
    pub fn should_expand(dir: &Path, folder_limit: usize) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        entries.count() > folder_limit
    }

    /// Full path for an atom file under a tier root.
    #[must_use]
    pub fn build_path(
        base: &Path,
        category: &str,
        primary: &str,
        id: &str,
        depth: usize,
    ) -> PathBuf {
        Self::build_with_ext(base, category, primary, id, depth, crate::atom::ATOM_EXT)
    }

    /// Full path for a knowlet file under the knowlet root.
    #[must_use]
    pub fn build_knowlet_path(
        base: &Path,
        category: &str,
        primary: &str,
        id: &str,
        depth: usize,
    ) -> PathBuf {
        Self::build_with_ext(base, category, primary, id, depth, crate::knowlet::KNOWLET_EXT)
    }

    fn build_with_ext(
        base: &Path,
        category: &str,
        primary: &str,
        id: &str,
        depth: usize,
        ext: &str,
    ) -> PathBuf {
        let mut path = base.join(category).join(primary);
        let segment = Self::shard_segment(id, depth);
        if !segment.is_empty() {
            path = path.join(segment);
        }
        path.join(format!("{id}.{ext}"))
    }

    /// Moves every `ext` file under `topic_dir` to its shard path at
    /// `new_depth`. Each move is a single rename so an interruption leaves
    /// every file intact at exactly one depth. Returns the number of files
    /// moved.
    pub fn expand(topic_dir: &Path, ext: &str, new_depth: usize) -> io::Result<usize> {
        let mut moved = 0;
        for entry in Self::files_with_ext(topic_dir, ext) {
            let Some(id) = entry.file_stem().map(|stem| stem.to_string_lossy().into_owned())
            else {
                continue;
            };
            let segment = Self::shard_segment(&id, new_depth);
            let target_dir = topic_dir.join(&segment);
            let target = target_dir.join(format!("{id}.{ext}"));
            if target == entry {
                continue;
            }
            fs::create_dir_all(&target_dir)?;
            fs::rename(&entry, &target)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Recursively finds `{id}.{ext}` anywhere under `root`, tolerating a
    /// mix of shard depths left by an interrupted expansion.
    #[must_use]
    pub fn locate(root: &Path, id: &str, ext: &str) -> Option<PathBuf> {
        let wanted = format!("{id}.{ext}");
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name().to_string_lossy() == wanted)
            .map(walkdir::DirEntry::into_path)
    }

    /// All `ext` files under `root`, any depth.
    #[must_use]
    pub fn files_with_ext(root: &Path, ext: &str) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|e| e == ext)
            })
            .map(walkdir::DirEntry::into_path)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shard_segment_is_uppercase_prefix() {
        assert_eq!(ShardPath::shard_segment("a1b2c3", 2), "A1");
        assert_eq!(ShardPath::shard_segment("a1b2c3", 0), "");
        assert_eq!(ShardPath::shard_segment("ab", 8), "AB");
    }

    #[test]
    fn detect_depth_reads_existing_structure() {
        let dir = tempdir().unwrap();
        assert_eq!(ShardPath::detect_depth(&dir.path().join("missing")), 0);
        assert_eq!(ShardPath::detect_depth(dir.path()), 0);
        fs::create_dir_all(dir.path().join("A1")).unwrap();
        fs::create_dir_all(dir.path().join("B2C")).unwrap();
        assert_eq!(ShardPath::detect_depth(dir.path()), 3);
    }

    #[test]
    fn should_expand_compares_direct_entries() {
        let dir = tempdir().unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("{i}.atom")), b"x").unwrap();
        }
        assert!(!ShardPath::should_expand(dir.path(), 3));
        assert!(ShardPath::should_expand(dir.path(), 2));
        assert!(!ShardPath::should_expand(&dir.path().join("missing"), 0));
    }

    #[test]
    fn build_path_depth_zero_is_flat() {
        let base = Path::new("/data/short");
        let flat = ShardPath::build_path(base, "learning", "rust", "a1b2", 0);
        assert_eq!(flat, Path::new("/data/short/learning/rust/a1b2.atom"));
        let sharded = ShardPath::build_path(base, "learning", "rust", "a1b2", 2);
        assert_eq!(sharded, Path::new("/data/short/learning/rust/A1/a1b2.atom"));
    }

    #[test]
    fn expand_moves_files_to_deeper_shards() {
        let dir = tempdir().unwrap();
        for id in ["aa11", "ab22", "ba33"] {
            fs::write(dir.path().join(format!("{id}.atom")), b"x").unwrap();
        }
        let moved = ShardPath::expand(dir.path(), "atom", 1).unwrap();
        assert_eq!(moved, 3);
        assert!(dir.path().join("A").join("aa11.atom").exists());
        assert!(dir.path().join("A").join("ab22.atom").exists());
        assert!(dir.path().join("B").join("ba33.atom").exists());
        assert!(!dir.path().join("aa11.atom").exists());

        // second expansion relocates from the shallower shards
        let moved = ShardPath::expand(dir.path(), "atom", 2).unwrap();
        assert_eq!(moved, 3);
        assert!(dir.path().join("AA").join("aa11.atom").exists());
        assert_eq!(ShardPath::detect_depth(dir.path()), 2);
    }

    #[test]
    fn locate_finds_files_at_any_depth() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("A1")).unwrap();
        fs::write(dir.path().join("A1").join("a1ff.atom"), b"x").unwrap();
        fs::write(dir.path().join("b2ff.atom"), b"x").unwrap();
        assert!(ShardPath::locate(dir.path(), "a1ff", "atom").is_some());
        assert!(ShardPath::locate(dir.path(), "b2ff", "atom").is_some());
        assert!(ShardPath::locate(dir.path(), "c3ff", "atom").is_none());
    }
}
