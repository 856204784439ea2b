//! Dated menu image index.
//!
//! `ImageIndex` maps calendar dates to PNG files in a single directory.
//! Files are named `YYYY-MM-DD.png` or `YYYY-MM-DD_<suffix>.png` (extension
//! case-insensitive). Each [`ImageIndex::scan`] builds a fresh
//! [`IndexSnapshot`] off to the side and publishes it with one pointer swap,
//! so a reader always holds either the old map or the new one, never a mix.
//!
//! The snapshot lock is independent of the scheduler's state lock: lookups
//! from status queries and send attempts never wait on the send path.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<date>\d{4}-\d{2}-\d{2})(?:_.+)?\.png$")
        .expect("menu image pattern should compile")
});

/// Immutable result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    entries: BTreeMap<NaiveDate, PathBuf>,
    scanned_at: Option<DateTime<Utc>>,
}

impl IndexSnapshot {
    pub fn new(entries: BTreeMap<NaiveDate, PathBuf>, scanned_at: DateTime<Utc>) -> Self {
        Self {
            entries,
            scanned_at: Some(scanned_at),
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Path> {
        self.entries.get(&date).map(PathBuf::as_path)
    }

    pub fn entries(&self) -> &BTreeMap<NaiveDate, PathBuf> {
        &self.entries
    }

    pub fn scanned_at(&self) -> Option<DateTime<Utc>> {
        self.scanned_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a single scan did. The index itself is already updated (or left
/// alone) by the time this is returned.
#[derive(Debug)]
pub enum ScanOutcome {
    Indexed { images: usize },
    DirectoryMissing,
    /// Enumeration failed; the previous snapshot is still published.
    Failed(std::io::Error),
}

pub struct ImageIndex {
    dir: PathBuf,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl ImageIndex {
    /// Create an empty index over `dir`. Nothing is read until `scan()`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory and publish a new snapshot.
    ///
    /// A missing directory (`NotFound`) publishes an empty snapshot. Any
    /// other stat or enumeration failure keeps the current snapshot so a transient
    /// filesystem error does not make every image disappear.
    pub fn scan(&self) -> ScanOutcome {
        let scanned_at = Utc::now();

        if let Err(err) = fs::metadata(&self.dir) {
            if err.kind() == ErrorKind::NotFound {
                tracing::warn!("Menu image directory does not exist: {}", self.dir.display());
                self.publish(IndexSnapshot::new(BTreeMap::new(), scanned_at));
                return ScanOutcome::DirectoryMissing;
            }
            tracing::error!(
                "Failed to stat menu image directory {}: {} (keeping previous index)",
                self.dir.display(),
                err
            );
            return ScanOutcome::Failed(err);
        }

        let candidates = match list_candidates(&self.dir) {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::error!(
                    "Failed to scan menu image directory {}: {} (keeping previous index)",
                    self.dir.display(),
                    err
                );
                return ScanOutcome::Failed(err);
            }
        };

        let entries = select_images(candidates);
        let images = entries.len();
        self.publish(IndexSnapshot::new(entries, scanned_at));
        tracing::debug!("Indexed {} menu images from {}", images, self.dir.display());

        ScanOutcome::Indexed { images }
    }

    /// Path of the image for `date`, if the current snapshot has one.
    pub fn lookup(&self, date: NaiveDate) -> Option<PathBuf> {
        self.snapshot().get(date).map(Path::to_path_buf)
    }

    /// Timestamp of the most recent completed scan, `None` before the first.
    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot().scanned_at()
    }

    /// The snapshot current at the time of the call. Holding the returned
    /// `Arc` keeps a consistent view even while later scans publish.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, snapshot: IndexSnapshot) {
        let next = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Extract the date key from a menu image file name.
pub fn parse_date_key(file_name: &str) -> Option<NaiveDate> {
    let captures = DATE_PATTERN.captures(file_name)?;
    NaiveDate::parse_from_str(&captures["date"], "%Y-%m-%d").ok()
}

/// Regular files directly inside `dir`, as `(file name, path)` pairs.
fn list_candidates(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => candidates.push((name, path)),
            Err(raw) => tracing::debug!("Skipping non UTF-8 file name {:?}", raw),
        }
    }
    Ok(candidates)
}

/// Keep one path per date: the lexicographically smallest matching name.
fn select_images<I>(candidates: I) -> BTreeMap<NaiveDate, PathBuf>
where
    I: IntoIterator<Item = (String, PathBuf)>,
{
    let mut chosen: BTreeMap<NaiveDate, (String, PathBuf)> = BTreeMap::new();

    for (name, path) in candidates {
        let Some(date) = parse_date_key(&name) else {
            tracing::trace!("Ignoring {}", name);
            continue;
        };
        match chosen.get(&date) {
            Some((existing, _)) if existing.as_str() <= name.as_str() => {}
            _ => {
                chosen.insert(date, (name, path));
            }
        }
    }

    chosen
        .into_iter()
        .map(|(date, (_, path))| (date, path))
        .collect()
}
