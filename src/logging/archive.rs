//! Archive slots for rotated log files.
//!
//! Archives live in `<log_dir>/archive/` and are named
//! `<category>.<seq>.log` or, when compressed, `<category>.<seq>.log.gz`.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

const PLAIN_SUFFIX: &str = ".log";
const GZIP_SUFFIX: &str = ".log.gz";

/// An archive file found on disk.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub sequence: u64,
    pub modified: SystemTime,
}

fn suffix(compressed: bool) -> &'static str {
    if compressed {
        GZIP_SUFFIX
    } else {
        PLAIN_SUFFIX
    }
}

/// File name of the archive slot `sequence` for `category`.
pub fn archive_name(category: &str, sequence: u64, compressed: bool) -> String {
    format!("{}.{}{}", category, sequence, suffix(compressed))
}

/// Sequence index encoded in an archive file name, if it belongs to `category`.
pub fn parse_sequence(file_name: &str, category: &str, compressed: bool) -> Option<u64> {
    let rest = file_name.strip_prefix(category)?.strip_prefix('.')?;
    let index = rest.strip_suffix(suffix(compressed))?;
    index.parse().ok()
}

/// Archives of `category` in `dir`, oldest first.
///
/// Ordered by modification time; the sequence index breaks ties between
/// files rotated within the same clock tick.
pub fn list_archives(dir: &Path, category: &str, compressed: bool) -> Vec<ArchiveEntry> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut entries: Vec<ArchiveEntry> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_str()?;
            let sequence = parse_sequence(name, category, compressed)?;
            let modified = e.metadata().ok()?.modified().ok()?;
            Some(ArchiveEntry {
                path: e.path().to_path_buf(),
                sequence,
                modified,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    entries
}

/// Next free sequence index for `category`, counting both archive flavours.
pub fn next_sequence(dir: &Path, category: &str) -> u64 {
    let highest = [true, false]
        .iter()
        .flat_map(|&compressed| list_archives(dir, category, compressed))
        .map(|e| e.sequence)
        .max();
    highest.map_or(1, |s| s + 1)
}

/// Move the active log into the first free archive slot at or after
/// `sequence`. Returns the slot used and the plain archive path.
///
/// A slot is taken when a regular file of either flavour occupies it.
pub fn move_to_archive(
    active: &Path,
    dir: &Path,
    category: &str,
    sequence: u64,
) -> io::Result<(u64, PathBuf)> {
    fs::create_dir_all(dir)?;

    let mut sequence = sequence;
    while dir.join(archive_name(category, sequence, false)).is_file()
        || dir.join(archive_name(category, sequence, true)).is_file()
    {
        sequence += 1;
    }

    let plain = dir.join(archive_name(category, sequence, false));
    fs::rename(active, &plain)?;
    Ok((sequence, plain))
}

/// Gzip a plain archive next to itself and remove the original.
///
/// On failure the plain archive is left in place and any partial `.gz`
/// output is removed.
pub fn compress_archive(plain: &Path) -> io::Result<PathBuf> {
    let gz_path = plain.with_extension("log.gz");
    let target = File::create(&gz_path)?;

    if let Err(e) = gzip_into(plain, target) {
        let _ = fs::remove_file(&gz_path);
        return Err(e);
    }
    fs::remove_file(plain)?;
    Ok(gz_path)
}

fn gzip_into(plain: &Path, target: File) -> io::Result<()> {
    let mut source = File::open(plain)?;
    let mut encoder = GzEncoder::new(target, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Delete all but the newest `retention` archives of either flavour.
/// Returns how many were removed.
pub fn prune(dir: &Path, category: &str, retention: usize) -> io::Result<usize> {
    let mut archives = list_archives(dir, category, true);
    archives.extend(list_archives(dir, category, false));
    archives.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });

    if archives.len() <= retention {
        return Ok(0);
    }

    let excess = archives.len() - retention;
    for entry in &archives[..excess] {
        debug!("Pruning log archive {}", entry.path.display());
        fs::remove_file(&entry.path)?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name("sessions", 3, true), "sessions.3.log.gz");
        assert_eq!(parse_sequence("sessions.3.log.gz", "sessions", true), Some(3));
        assert_eq!(parse_sequence("sessions.3.log.gz", "sessions", false), None);
        assert_eq!(parse_sequence("sessions.12.log", "sessions", false), Some(12));
        assert_eq!(parse_sequence("probe.3.log.gz", "sessions", true), None);
        assert_eq!(parse_sequence("sessions.x.log.gz", "sessions", true), None);
    }

    #[test]
    fn test_archive_and_compress() {
        let tmp = TempDir::new().unwrap();
        let active = tmp.path().join("sessions.log");
        fs::write(&active, "[ts] [INFO] [Test] hello\n").unwrap();
        let archive_dir = tmp.path().join("archive");

        let (sequence, plain) = move_to_archive(&active, &archive_dir, "sessions", 1).unwrap();
        assert_eq!(sequence, 1);
        assert!(!active.exists());

        let archived = compress_archive(&plain).unwrap();
        assert_eq!(archived, archive_dir.join("sessions.1.log.gz"));
        assert!(!plain.exists());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&archived).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "[ts] [INFO] [Test] hello\n");
    }

    #[test]
    fn test_occupied_slot_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sessions.2.log"), "older").unwrap();
        fs::write(tmp.path().join("sessions.3.log.gz"), "older").unwrap();
        let active = tmp.path().join("sessions.log");
        fs::write(&active, "newer").unwrap();

        let (sequence, plain) = move_to_archive(&active, tmp.path(), "sessions", 2).unwrap();

        assert_eq!(sequence, 4);
        assert_eq!(fs::read_to_string(&plain).unwrap(), "newer");
        assert_eq!(fs::read_to_string(tmp.path().join("sessions.2.log")).unwrap(), "older");
    }

    #[test]
    fn test_failed_compression_keeps_plain_archive() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("sessions.1.log");
        fs::write(&plain, "keep me").unwrap();
        fs::create_dir_all(tmp.path().join("sessions.1.log.gz")).unwrap();

        assert!(compress_archive(&plain).is_err());
        assert_eq!(fs::read_to_string(&plain).unwrap(), "keep me");
    }

    #[test]
    fn test_next_sequence() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(next_sequence(tmp.path(), "sessions"), 1);

        fs::write(tmp.path().join("sessions.4.log.gz"), b"").unwrap();
        fs::write(tmp.path().join("sessions.7.log"), b"").unwrap();
        fs::write(tmp.path().join("other.9.log.gz"), b"").unwrap();
        assert_eq!(next_sequence(tmp.path(), "sessions"), 8);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let tmp = TempDir::new().unwrap();
        for seq in 1..=6 {
            fs::write(tmp.path().join(archive_name("sessions", seq, true)), b"x").unwrap();
        }
        fs::write(tmp.path().join("unrelated.txt"), b"keep").unwrap();

        let removed = prune(tmp.path(), "sessions", 3).unwrap();
        assert_eq!(removed, 3);

        let left: Vec<u64> = list_archives(tmp.path(), "sessions", true)
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(left, vec![4, 5, 6]);
        assert!(tmp.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_prune_counts_both_flavours() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(archive_name("sessions", 1, false)), b"x").unwrap();
        fs::write(tmp.path().join(archive_name("sessions", 2, true)), b"x").unwrap();
        fs::write(tmp.path().join(archive_name("sessions", 3, true)), b"x").unwrap();

        assert_eq!(prune(tmp.path(), "sessions", 2).unwrap(), 1);
        assert!(!tmp.path().join("sessions.1.log").exists());
        assert_eq!(list_archives(tmp.path(), "sessions", true).len(), 2);
    }
}
