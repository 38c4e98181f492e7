use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

const PART_SUFFIX: &str = "part";
const DEFAULT_MAX_FILES: usize = 16;

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// Remote sources fetched to disk so rodio can decode and seek them.
/// The directory belongs to this process and is removed on drop.
#[derive(Debug)]
pub struct StreamCache {
    dir: PathBuf,
    max_files: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSlot {
    part: PathBuf,
    target: PathBuf,
}

impl StreamCache {
    pub fn in_dir(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_files: DEFAULT_MAX_FILES,
        })
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target_for(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 8);
        for byte in digest.iter() {
            let _ = write!(name, "{byte:02x}");
        }
        if let Some(ext) = extension_of(url) {
            name.push('.');
            name.push_str(ext);
        }
        self.dir.join(name)
    }

    pub fn is_cached(&self, url: &str) -> Option<PathBuf> {
        let target = self.target_for(url);
        target.is_file().then_some(target)
    }

    /// A fresh slot for `url`. Concurrent slots for the same URL never share
    /// a part file.
    pub fn slot_for(&self, url: &str) -> CacheSlot {
        let target = self.target_for(url);
        let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut part = target.clone().into_os_string();
        part.push(format!(".{seq}.{PART_SUFFIX}"));
        CacheSlot {
            part: PathBuf::from(part),
            target,
        }
    }

    /// Drops the oldest finished files beyond the cap, never touching `keep`.
    pub fn prune(&self, keep: &Path) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut finished: Vec<(SystemTime, PathBuf)> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && !is_part(path) && path != keep)
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();

        let allowed = self.max_files.saturating_sub(1);
        if finished.len() <= allowed {
            return 0;
        }
        finished.sort_by(|a, b| a.0.cmp(&b.0));
        let excess = finished.len() - allowed;
        finished
            .into_iter()
            .take(excess)
            .filter(|(_, path)| fs::remove_file(path).is_ok())
            .count()
    }

    pub fn clear_cache(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}

impl Drop for StreamCache {
    fn drop(&mut self) {
        let removed = self.clear_cache();
        let _ = fs::remove_dir(&self.dir);
        debug!(removed, dir = %self.dir.display(), "stream cache cleared");
    }
}

impl CacheSlot {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn write(self, mut body: impl Read) -> Result<PathBuf, String> {
        let written = File::create(&self.part)
            .and_then(|mut file| io::copy(&mut body, &mut file))
            .map_err(|err| format!("failed to write {}: {err}", self.part.display()));
        if let Err(err) = written {
            let _ = fs::remove_file(&self.part);
            return Err(err);
        }

        if let Err(err) = fs::rename(&self.part, &self.target) {
            let _ = fs::remove_file(&self.part);
            if !self.target.is_file() {
                return Err(format!(
                    "failed to move {} into place: {err}",
                    self.target.display()
                ));
            }
        }
        Ok(self.target)
    }
}

fn is_part(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PART_SUFFIX)
}

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .then_some(ext)
}
