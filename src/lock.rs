use fs2::FileExt;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

/// Source-tree-scoped lock guard that removes the lock file on drop.
#[derive(Debug)]
pub struct SourceLock {
    file: File,
    path: PathBuf,
}

impl SourceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SourceLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock; a contender that locks the
        // orphaned inode afterwards sees it unlinked and retries.
        for _ in 0..10 {
            if !self.path.exists() {
                break;
            }
            if fs::remove_file(&self.path).is_ok() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        // Best-effort unlock; ignore errors
        let _ = self.file.unlock();
    }
}

/// Acquire a non-blocking exclusive lock for `source_dir`.
///
/// The lock file lives outside the tree so it never enters a build context.
#[instrument(level = "debug", err, fields(path_hash = %hash_source_key_hex(&normalized_source_key(source_dir))))]
pub fn acquire_source_lock(source_dir: &Path) -> io::Result<SourceLock> {
    acquire_lock_at(&lock_path_for(source_dir))
}

const LOCK_ATTEMPTS: usize = 5;

fn lock_held_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::WouldBlock,
        "Another derivebox run is already using this source tree (lock held). Please try again later.",
    )
}

/// Acquire a lock at a specific path (helper for tests).
pub fn acquire_lock_at(p: &Path) -> io::Result<SourceLock> {
    if let Some(parent) = p.parent() {
        let _ = fs::create_dir_all(parent);
    }
    for _ in 0..LOCK_ATTEMPTS {
        let f = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(p)?;
        match f.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(lock_held_error()),
            Err(e) => return Err(e),
        }
        if is_linked_at(&f, p) {
            debug!(path = %p.display(), "acquired source lock");
            return Ok(SourceLock {
                file: f,
                path: p.to_path_buf(),
            });
        }
        // previous holder unlinked the file between our open and lock
        debug!(path = %p.display(), "lock file replaced while locking; retrying");
    }
    Err(lock_held_error())
}

/// Whether `p` still names the file behind `f`.
#[cfg(unix)]
fn is_linked_at(f: &File, p: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (f.metadata(), fs::metadata(p)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_linked_at(_f: &File, p: &Path) -> bool {
    p.exists()
}

/// `<XDG_RUNTIME_DIR or temp dir>/derivebox.<hash(source_dir)>.lock`
pub fn lock_path_for(source_dir: &Path) -> PathBuf {
    let rt_base = env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    let hash = hash_source_key_hex(&normalized_source_key(source_dir));
    rt_base.join(format!("derivebox.{hash}.lock"))
}

/// Normalize a source path string for hashing to a stable key.
pub fn normalized_source_key(p: &Path) -> String {
    let abs = fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    abs.to_string_lossy().to_string()
}

/// Simple stable 64-bit FNV-1a hash for strings; returns 16-hex lowercase id.
pub fn hash_source_key_hex(s: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 1099511628211;
    let mut h: u64 = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_fnv1a() {
        // FNV-1a of the empty string is the offset basis
        assert_eq!(hash_source_key_hex(""), "cbf29ce484222325");
        assert_eq!(hash_source_key_hex("a"), "af63dc4c8601ec8c");
    }

    #[test]
    fn test_lock_path_is_outside_tree_and_per_tree() {
        let a = tempfile::tempdir().expect("tmpdir");
        let b = tempfile::tempdir().expect("tmpdir");
        let pa = lock_path_for(a.path());
        assert!(!pa.starts_with(a.path()));
        assert_ne!(pa, lock_path_for(b.path()));
        assert_eq!(pa, lock_path_for(a.path()));
    }

    #[test]
    fn test_second_lock_would_block_and_file_removed_on_drop() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("x.lock");
        let first = acquire_lock_at(&p).expect("first lock");
        let err = acquire_lock_at(&p).expect_err("held");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        drop(first);
        assert!(!p.exists());
        let _again = acquire_lock_at(&p).expect("reacquire");
    }

    #[test]
    fn test_unlinked_or_replaced_lock_file_is_not_current() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("x.lock");
        let stale = File::create(&p).expect("create");
        assert!(is_linked_at(&stale, &p));
        fs::remove_file(&p).expect("unlink");
        assert!(!is_linked_at(&stale, &p));
        let _fresh = File::create(&p).expect("recreate");
        assert!(!is_linked_at(&stale, &p));
    }

    #[test]
    fn test_drop_unlinks_before_releasing() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("x.lock");
        let held = acquire_lock_at(&p).expect("lock");
        // a contender that opened the file before the holder finished
        let contender = OpenOptions::new().read(true).write(true).open(&p).expect("open");
        drop(held);
        contender.try_lock_exclusive().expect("orphan inode is free");
        assert!(!is_linked_at(&contender, &p), "orphan must not count as the lock");
        let _next = acquire_lock_at(&p).expect("fresh lock file");
    }
}
