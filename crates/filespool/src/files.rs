//! Segment file naming.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces a fresh backing-file path for every new segment.
///
/// Implementations are responsible for uniqueness; the queue that owns the
/// segment is responsible for unlinking the file on retirement and on
/// teardown.
pub trait SegmentFiles: Send + Sync {
    /// Returns a path no previous call has returned.
    fn next_path(&self) -> PathBuf;
}

/// Counter-named segment files under one directory:
/// `<dir>/spool-000000.seg`, `<dir>/spool-000001.seg`, …
#[derive(Debug)]
pub struct DirSegmentFiles {
    dir: PathBuf,
    counter: AtomicU64,
}

impl DirSegmentFiles {
    /// Creates the directory if needed and returns the factory.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    /// The directory segment files are placed in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SegmentFiles for DirSegmentFiles {
    fn next_path(&self) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("spool-{n:06}.seg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_unique_and_ordered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = DirSegmentFiles::new(dir.path().join("segs")).expect("new");

        let a = files.next_path();
        let b = files.next_path();
        assert_ne!(a, b);
        assert!(a.ends_with("spool-000000.seg"));
        assert!(b.ends_with("spool-000001.seg"));
        assert!(files.dir().is_dir());
    }
}
